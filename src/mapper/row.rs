//! Row generation for the main file and every repeat file.
//!
//! Keys tie the files together: a repeat row's `PARENT_KEY` is the KEY of the
//! row it belongs to (the main row at depth 1), its own KEY is
//! `<parentKey>/<name>[<ordinal>]`, and `SET-OF-` cells carry
//! `<parentKey>/<name>` so sibling rows share a set id.

use std::path::Path;

use chrono::{DateTime, FixedOffset};

use crate::mapper::columns::{self, ColumnSource, ColumnSpec};
use crate::mapper::{Cell, value};
use crate::model::{DataType, FormDefinition, FormModel, NodeId, NodeKind};
use crate::types::ValidationStatus;
use crate::xml::Element;

/// All rows produced by one submission, keyed by repeat node.
#[derive(Debug)]
pub struct SubmissionRows {
    pub main: Vec<Cell>,
    /// One entry per repeat node (pre-order), each holding that repeat's rows
    /// in document order.
    pub repeats: Vec<(NodeId, Vec<Vec<Cell>>)>,
}

/// Maps one parsed submission to its main row and all repeat rows.
pub fn submission_rows(
    form: &FormDefinition,
    root: &Element,
    working_dir: &Path,
    main_key: &str,
    submission_date: Option<&DateTime<FixedOffset>>,
    status: ValidationStatus,
) -> SubmissionRows {
    let model = &form.model;

    let mut main = Vec::new();
    main.push(Cell::Text(submission_date.map(value::format_timestamp).unwrap_or_default()));
    for column in columns::flatten_columns(model, model.root()) {
        main.push(resolve_cell(&column, root, working_dir, main_key));
    }
    main.push(Cell::Text(main_key.to_string()));
    if form.encrypted {
        main.push(Cell::Text(status.cell().to_string()));
    }

    let mut repeats: Vec<(NodeId, Vec<Vec<Cell>>)> =
        model.repeatable_fields().into_iter().map(|id| (id, Vec::new())).collect();
    emit_repeats(model, model.root(), root, main_key, working_dir, &mut repeats);

    SubmissionRows { main, repeats }
}

fn resolve_cell(column: &ColumnSpec, base: &Element, working_dir: &Path, row_key: &str) -> Cell {
    match &column.source {
        ColumnSource::SetOf { name } => Cell::Text(format!("{row_key}/{name}")),
        ColumnSource::Field { path, data_type, component } => {
            let Some(element) = base.find(path) else {
                return Cell::Text(String::new());
            };
            let raw = element.text.as_str();
            match (data_type, component) {
                (DataType::Geopoint, Some(component)) => Cell::Text(value::geo_component(raw, *component)),
                (DataType::Binary, _) => {
                    if raw.is_empty() {
                        Cell::Text(String::new())
                    } else {
                        Cell::Media { source: working_dir.join(raw), name: raw.to_string() }
                    }
                }
                _ => Cell::Text(value::format_field(*data_type, raw)),
            }
        }
    }
}

/// Emits rows for every repeat reachable from `node` without crossing another
/// repeat, then recurses into each instance for nested repeats.
fn emit_repeats(
    model: &FormModel,
    node: NodeId,
    element: &Element,
    parent_key: &str,
    working_dir: &Path,
    out: &mut Vec<(NodeId, Vec<Vec<Cell>>)>,
) {
    for repeat in direct_repeats(model, node) {
        let path = columns::rel_segments(model, node, repeat);
        let mut instances = Vec::new();
        element.find_all(&path, &mut instances);

        let name = model.node(repeat).name.clone();
        for (index, instance) in instances.iter().enumerate() {
            let key = format!("{parent_key}/{name}[{}]", index + 1);
            let mut row = vec![
                Cell::Text(parent_key.to_string()),
                Cell::Text(key.clone()),
                Cell::Text(format!("{parent_key}/{name}")),
            ];
            for column in columns::flatten_columns(model, repeat) {
                row.push(resolve_cell(&column, instance, working_dir, &key));
            }
            if let Some((_, rows)) = out.iter_mut().find(|(id, _)| *id == repeat) {
                rows.push(row);
            }

            emit_repeats(model, repeat, instance, &key, working_dir, out);
        }
    }
}

/// Repeat descendants of `node` reachable without crossing another repeat.
fn direct_repeats(model: &FormModel, node: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    collect_direct(model, node, &mut found);
    found
}

fn collect_direct(model: &FormModel, node: NodeId, out: &mut Vec<NodeId>) {
    for &child in model.children(node) {
        match model.node(child).kind {
            NodeKind::Repeat => out.push(child),
            NodeKind::Group => collect_direct(model, child, out),
            NodeKind::Field(_) => {}
        }
    }
}
