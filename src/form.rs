//! Minimal XForms definition loader.
//!
//! Reads just enough of a form file to drive an export: the primary instance
//! tree, bind types, repeat declarations and the submission element's
//! encryption marker. The export core itself only ever sees the resulting
//! [`FormDefinition`].

use std::path::Path;

use anyhow::{Context, Result};
use hashbrown::{HashMap, HashSet};

use crate::model::{DataType, FormDefinition, ModelBuilder, NodeId};
use crate::xml::{self, Element};

/// Loads a form definition from an XForms file.
pub fn load_form(path: &Path) -> Result<FormDefinition> {
    let document = xml::parse_document(path)
        .with_context(|| format!("failed to read form definition {}", path.display()))?;

    let model_el = document.descendant("model").context("form has no model element")?;
    let instance_root = model_el
        .children
        .iter()
        .filter(|child| child.name == "instance")
        .find_map(|instance| instance.children.first())
        .context("form has no primary instance")?;

    let id = instance_root
        .attribute("id")
        .map_or_else(|| instance_root.name.clone(), str::to_string);
    let version = instance_root.attribute("version").map(str::to_string).filter(|v| !v.is_empty());
    let name = document
        .descendant("title")
        .map(|title| title.text.clone())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| id.clone());
    let encrypted = model_el
        .children
        .iter()
        .any(|child| child.name == "submission" && child.attribute("base64RsaPublicKey").is_some());

    let mut binds = HashMap::new();
    collect_binds(model_el, &mut binds);
    let mut repeats = HashSet::new();
    collect_repeats(&document, &mut repeats);

    let mut builder = ModelBuilder::new(&instance_root.name);
    let root = builder.root();
    add_children(&mut builder, root, instance_root, &format!("/{}", instance_root.name), &binds, &repeats);

    Ok(FormDefinition { id, name, version, encrypted, model: builder.finish() })
}

fn add_children(
    builder: &mut ModelBuilder,
    parent: NodeId,
    element: &Element,
    parent_path: &str,
    binds: &HashMap<String, DataType>,
    repeats: &HashSet<String>,
) {
    let mut seen: HashSet<&str> = HashSet::new();
    for child in &element.children {
        // Skip the meta block (the instance id becomes KEY, not a column),
        // repeat templates, and duplicate declarations.
        if child.name == "meta" && parent == builder.root() {
            continue;
        }
        if child.attribute("template").is_some() || !seen.insert(child.name.as_str()) {
            continue;
        }

        let path = format!("{parent_path}/{}", child.name);
        if child.children.is_empty() {
            let data_type = binds.get(&path).copied().unwrap_or(DataType::Text);
            builder.field(parent, &child.name, data_type);
        } else if repeats.contains(&path) {
            let repeat = builder.repeat(parent, &child.name);
            add_children(builder, repeat, child, &path, binds, repeats);
        } else {
            let group = builder.group(parent, &child.name);
            add_children(builder, group, child, &path, binds, repeats);
        }
    }
}

fn collect_binds(element: &Element, out: &mut HashMap<String, DataType>) {
    for child in &element.children {
        if child.name == "bind"
            && let Some(nodeset) = child.attribute("nodeset").or_else(|| child.attribute("ref"))
            && let Some(bind_type) = child.attribute("type")
        {
            out.insert(nodeset.to_string(), DataType::from_bind(bind_type));
        }
        collect_binds(child, out);
    }
}

fn collect_repeats(element: &Element, out: &mut HashSet<String>) {
    for child in &element.children {
        if child.name == "repeat"
            && let Some(nodeset) = child.attribute("nodeset").or_else(|| child.attribute("ref"))
        {
            out.insert(nodeset.to_string());
        }
        collect_repeats(child, out);
    }
}
