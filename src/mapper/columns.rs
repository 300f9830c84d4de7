//! Deterministic column flattening for the main and repeat files.

use crate::model::{DataType, FormModel, NodeId, NodeKind};

pub const SUBMISSION_DATE_COLUMN: &str = "SubmissionDate";
pub const KEY_COLUMN: &str = "KEY";
pub const PARENT_KEY_COLUMN: &str = "PARENT_KEY";
pub const VALIDATED_COLUMN: &str = "isValidated";

/// Geopoints split into one column per component, in this order.
const GEO_SUFFIXES: [&str; 4] = ["Latitude", "Longitude", "Altitude", "Accuracy"];

/// One output column and where its value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub header: String,
    pub source: ColumnSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// A field value found at `path`, relative to the row's base element.
    Field {
        path: Vec<String>,
        data_type: DataType,
        /// Geopoint component index, when the field is split.
        component: Option<usize>,
    },

    /// Placeholder for a repeat whose rows live in their own CSV.
    SetOf { name: String },
}

/// Flattens the fields under `base` into the ordered column list for one row.
///
/// Non-repeat groups are inlined with dash-joined names; repeats emit a
/// single `SET-OF-` placeholder column.
pub fn flatten_columns(model: &FormModel, base: NodeId) -> Vec<ColumnSpec> {
    let mut columns = Vec::new();
    flatten_into(model, base, base, "", &mut columns);
    columns
}

fn flatten_into(model: &FormModel, base: NodeId, node: NodeId, prefix: &str, out: &mut Vec<ColumnSpec>) {
    for &child in model.children(node) {
        let child_node = model.node(child);
        let label = if prefix.is_empty() {
            child_node.name.clone()
        } else {
            format!("{prefix}-{}", child_node.name)
        };

        match child_node.kind {
            NodeKind::Repeat => out.push(ColumnSpec {
                header: format!("SET-OF-{}", child_node.name),
                source: ColumnSource::SetOf { name: child_node.name.clone() },
            }),
            NodeKind::Group => flatten_into(model, base, child, &label, out),
            NodeKind::Field(DataType::Geopoint) => {
                let path = rel_segments(model, base, child);
                for (component, suffix) in GEO_SUFFIXES.iter().enumerate() {
                    out.push(ColumnSpec {
                        header: format!("{label}-{suffix}"),
                        source: ColumnSource::Field {
                            path: path.clone(),
                            data_type: DataType::Geopoint,
                            component: Some(component),
                        },
                    });
                }
            }
            NodeKind::Field(data_type) => out.push(ColumnSpec {
                header: label,
                source: ColumnSource::Field {
                    path: rel_segments(model, base, child),
                    data_type,
                    component: None,
                },
            }),
        }
    }
}

/// Column headers of the main file.
pub fn main_header(model: &FormModel, encrypted: bool) -> Vec<String> {
    let mut headers = vec![SUBMISSION_DATE_COLUMN.to_string()];
    headers.extend(flatten_columns(model, model.root()).into_iter().map(|column| column.header));
    headers.push(KEY_COLUMN.to_string());
    if encrypted {
        headers.push(VALIDATED_COLUMN.to_string());
    }
    headers
}

/// Column headers of one repeat file.
pub fn repeat_header(model: &FormModel, repeat: NodeId) -> Vec<String> {
    let name = &model.node(repeat).name;
    let mut headers = vec![
        PARENT_KEY_COLUMN.to_string(),
        KEY_COLUMN.to_string(),
        format!("SET-OF-{name}"),
    ];
    headers.extend(flatten_columns(model, repeat).into_iter().map(|column| column.header));
    headers
}

/// Path segments from `base` (exclusive) down to `node`.
pub fn rel_segments(model: &FormModel, base: NodeId, node: NodeId) -> Vec<String> {
    model
        .fqn(node)
        .strip_prefix(model.fqn(base))
        .map(|rest| rest.trim_start_matches('/').split('/').map(str::to_string).collect())
        .unwrap_or_default()
}
