//! Template-aware extraction of user devicetree passages.
//!
//! When parsing a keymap that was generated from a keyboard template, nodes
//! contributed by the template itself (system behaviors, sensor setup) must
//! not be captured as user data. Unknown nodes that do not appear in the
//! template's static text are preserved as `custom_devicetree`.

use super::ast::{DtDocument, DtNode, PropertyValue};
use crate::profile::KeyboardProfile;

/// Node kinds the structured extraction already consumes.
fn is_recognized(node: &DtNode) -> bool {
    let compatible = node.text_property("compatible");
    if matches!(
        compatible,
        Some("zmk,keymap" | "zmk,combos" | "zmk,behavior-hold-tap" | "zmk,behavior-macro")
    ) {
        return true;
    }
    // Container nodes whose children are all recognized (e.g. `behaviors`).
    !node.children.is_empty() && node.children.iter().all(is_recognized)
}

/// Re-serializes a node to devicetree text.
fn render_node(node: &DtNode, indent: usize) -> String {
    let pad = " ".repeat(indent);
    let mut out = String::new();

    match &node.label {
        Some(label) => out.push_str(&format!("{pad}{label}: {} {{\n", node.name)),
        None => out.push_str(&format!("{pad}{} {{\n", node.name)),
    }

    let inner = " ".repeat(indent + 4);
    for (name, value) in &node.properties {
        match value {
            PropertyValue::Flag => out.push_str(&format!("{inner}{name};\n")),
            PropertyValue::Text(text) => {
                out.push_str(&format!("{inner}{name} = \"{text}\";\n"));
            }
            PropertyValue::CellGroups(groups) => {
                let rendered: Vec<String> = groups
                    .iter()
                    .map(|group| {
                        let cells: Vec<String> = group
                            .iter()
                            .map(|c| match c {
                                super::ast::Cell::Number(n) => n.to_string(),
                                super::ast::Cell::Word(w) => w.clone(),
                            })
                            .collect();
                        format!("<{}>", cells.join(" "))
                    })
                    .collect();
                out.push_str(&format!("{inner}{name} = {};\n", rendered.join(", ")));
            }
        }
    }
    for child in &node.children {
        out.push_str(&render_node(child, indent + 4));
    }
    out.push_str(&format!("{pad}}};\n"));
    out
}

fn unrecognized_root_children(doc: &DtDocument) -> Vec<&DtNode> {
    let mut unknown = Vec::new();
    for top in &doc.nodes {
        if top.name == "/" {
            for child in &top.children {
                if !is_recognized(child) {
                    unknown.push(child);
                }
            }
        } else if top.name.starts_with('&') {
            let is_listener = top
                .children
                .iter()
                .any(|c| c.property("input-processors").is_some());
            if !is_listener {
                unknown.push(top);
            }
        }
    }
    unknown
}

/// Full-mode collection: every unrecognized passage becomes custom text.
pub fn collect_unrecognized_nodes(doc: &DtDocument) -> Option<String> {
    let unknown = unrecognized_root_children(doc);
    if unknown.is_empty() {
        return None;
    }
    Some(
        unknown
            .iter()
            .map(|n| render_node(n, 0))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Template-mode collection: unrecognized passages that the keyboard template
/// itself contributes are dropped; only genuinely user-authored nodes remain.
pub fn extract_custom_devicetree(doc: &DtDocument, profile: &KeyboardProfile) -> String {
    let static_text = template_static_text(profile);
    unrecognized_root_children(doc)
        .iter()
        .filter(|node| {
            let needle = node.label.as_deref().unwrap_or(&node.name);
            !static_text.contains(needle)
        })
        .map(|n| render_node(n, 0))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The template rendered with every context key empty: what the keyboard
/// contributes regardless of user data.
fn template_static_text(profile: &KeyboardProfile) -> String {
    let keymap = &profile.keyboard_config.keymap;
    let mut text = String::new();
    if let Some(template) = profile.keymap_template() {
        text.push_str(template);
    }
    text.push_str(&keymap.system_behaviors_dts);
    text.push_str(&keymap.key_position_header);
    text
}
