//! Semantic and RFC-6902 diffing between layout documents.
//!
//! The JSON patch is generated by structural recursion over the canonical
//! (camelCase, unset-omitted) JSON forms, so `apply(base, diff(base, b)) == b`
//! holds exactly. The semantic analysis layered on top names what changed in
//! layout terms: layers, behaviors, custom code.

mod unified;

use crate::error::{Error, Result};
use crate::models::LayoutData;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub use unified::unified_diff;

/// One RFC-6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum PatchOp {
    Add {
        path: String,
        value: Value,
    },
    Remove {
        path: String,
    },
    Replace {
        path: String,
        value: Value,
    },
}

impl PatchOp {
    fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Remove { path } | Self::Replace { path, .. } => path,
        }
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Builds the minimal patch turning `base` into `modified`.
#[must_use]
pub fn make_patch(base: &Value, modified: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_values(base, modified, String::new(), &mut ops);
    ops
}

fn diff_values(base: &Value, modified: &Value, path: String, ops: &mut Vec<PatchOp>) {
    match (base, modified) {
        (Value::Object(base_map), Value::Object(modified_map)) => {
            for key in base_map.keys() {
                if !modified_map.contains_key(key) {
                    ops.push(PatchOp::Remove {
                        path: format!("{path}/{}", escape_pointer(key)),
                    });
                }
            }
            for (key, modified_value) in modified_map {
                let child_path = format!("{path}/{}", escape_pointer(key));
                match base_map.get(key) {
                    Some(base_value) => {
                        diff_values(base_value, modified_value, child_path, ops);
                    }
                    None => ops.push(PatchOp::Add {
                        path: child_path,
                        value: modified_value.clone(),
                    }),
                }
            }
        }
        (Value::Array(base_items), Value::Array(modified_items)) => {
            let common = base_items.len().min(modified_items.len());
            for idx in 0..common {
                diff_values(
                    &base_items[idx],
                    &modified_items[idx],
                    format!("{path}/{idx}"),
                    ops,
                );
            }
            for (idx, item) in modified_items.iter().enumerate().skip(common) {
                ops.push(PatchOp::Add {
                    path: format!("{path}/{idx}"),
                    value: item.clone(),
                });
            }
            // Remove trailing items highest-index-first so paths stay valid.
            for idx in (common..base_items.len()).rev() {
                ops.push(PatchOp::Remove {
                    path: format!("{path}/{idx}"),
                });
            }
        }
        (base, modified) if base == modified => {}
        (_, modified) => ops.push(PatchOp::Replace {
            path,
            value: modified.clone(),
        }),
    }
}

/// Applies a patch to a JSON document.
pub fn apply_ops(document: &Value, ops: &[PatchOp]) -> Result<Value> {
    let mut current = document.clone();
    for op in ops {
        apply_one(&mut current, op)?;
    }
    Ok(current)
}

fn apply_one(document: &mut Value, op: &PatchOp) -> Result<()> {
    let path = op.path();
    let segments: Vec<String> = if path.is_empty() {
        Vec::new()
    } else {
        path.trim_start_matches('/')
            .split('/')
            .map(unescape_pointer)
            .collect()
    };

    if segments.is_empty() {
        return match op {
            PatchOp::Replace { value, .. } | PatchOp::Add { value, .. } => {
                *document = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err(Error::LayoutInvalid(
                "cannot remove the document root".to_string(),
            )),
        };
    }

    let (last, parents) = segments.split_last().expect("segments checked non-empty");
    let mut target = document;
    for segment in parents {
        target = navigate(target, segment, path)?;
    }

    match (op, target) {
        (PatchOp::Add { value, .. }, Value::Object(map)) => {
            map.insert(last.clone(), value.clone());
            Ok(())
        }
        (PatchOp::Add { value, .. }, Value::Array(items)) => {
            let idx = parse_index(last, items.len() + 1, path)?;
            items.insert(idx, value.clone());
            Ok(())
        }
        (PatchOp::Replace { value, .. }, Value::Object(map)) => {
            let slot = map.get_mut(last).ok_or_else(|| missing(path))?;
            *slot = value.clone();
            Ok(())
        }
        (PatchOp::Replace { value, .. }, Value::Array(items)) => {
            let idx = parse_index(last, items.len(), path)?;
            items[idx] = value.clone();
            Ok(())
        }
        (PatchOp::Remove { .. }, Value::Object(map)) => {
            map.remove(last).ok_or_else(|| missing(path))?;
            Ok(())
        }
        (PatchOp::Remove { .. }, Value::Array(items)) => {
            let idx = parse_index(last, items.len(), path)?;
            items.remove(idx);
            Ok(())
        }
        _ => Err(missing(path)),
    }
}

fn navigate<'a>(value: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment).ok_or_else(|| missing(path)),
        Value::Array(items) => {
            let idx = parse_index(segment, items.len(), path)?;
            Ok(&mut items[idx])
        }
        _ => Err(missing(path)),
    }
}

fn parse_index(segment: &str, len: usize, path: &str) -> Result<usize> {
    let idx: usize = segment
        .parse()
        .map_err(|_| Error::LayoutInvalid(format!("invalid array index in patch path '{path}'")))?;
    if idx >= len {
        return Err(Error::LayoutInvalid(format!(
            "patch path '{path}' is out of range"
        )));
    }
    Ok(idx)
}

fn missing(path: &str) -> Error {
    Error::LayoutInvalid(format!("patch path '{path}' does not exist"))
}

/// Operation counts for a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStatistics {
    pub total_operations: usize,
    pub additions: usize,
    pub removals: usize,
    pub replacements: usize,
}

fn calculate_statistics(ops: &[PatchOp]) -> DiffStatistics {
    let mut stats = DiffStatistics {
        total_operations: ops.len(),
        ..DiffStatistics::default()
    };
    for op in ops {
        match op {
            PatchOp::Add { .. } => stats.additions += 1,
            PatchOp::Remove { .. } => stats.removals += 1,
            PatchOp::Replace { .. } => stats.replacements += 1,
        }
    }
    stats
}

/// A layout-level rename record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRename {
    pub index: usize,
    pub from: String,
    pub to: String,
}

/// Name-keyed add/remove/modify sets for one behavior collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl BehaviorChanges {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Semantic change analysis of a layout diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutChanges {
    pub layers_added: Vec<usize>,
    pub layers_removed: Vec<usize>,
    pub layers_modified: Vec<usize>,
    pub layers_reordered: bool,
    pub layer_renames: Vec<LayerRename>,
    pub hold_taps: BehaviorChanges,
    pub combos: BehaviorChanges,
    pub macros: BehaviorChanges,
    pub input_listeners: BehaviorChanges,
    pub devicetree_changed: bool,
    pub behaviors_changed: bool,
}

/// One binding that moved between positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingMovement {
    pub signature: String,
    pub from_layer: usize,
    pub from_position: usize,
    pub to_layer: usize,
    pub to_position: usize,
    pub binding: Value,
}

/// A binding replaced in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingChange {
    pub layer: usize,
    pub position: usize,
    pub from: Value,
    pub to: Value,
}

/// Movement tracking across the two layouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingMovements {
    pub within_layer: Vec<BindingMovement>,
    pub between_layers: Vec<BindingMovement>,
    pub behavior_changes: Vec<BindingChange>,
}

/// Complete diff document: patch, analysis, movements, statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDiff {
    pub metadata: Value,
    pub json_patch: Vec<PatchOp>,
    pub layout_changes: LayoutChanges,
    pub movements: BindingMovements,
    pub statistics: DiffStatistics,
}

fn to_canonical(layout: &LayoutData) -> Result<Value> {
    serde_json::to_value(layout)
        .map_err(|e| Error::LayoutInvalid(format!("layout serialization failed: {e}")))
}

/// Creates a comprehensive diff between two layouts.
pub fn create_layout_diff(base: &LayoutData, modified: &LayoutData) -> Result<LayoutDiff> {
    let base_value = to_canonical(base)?;
    let modified_value = to_canonical(modified)?;

    let json_patch = make_patch(&base_value, &modified_value);
    let statistics = calculate_statistics(&json_patch);
    let layout_changes = analyze_changes(base, modified);
    let movements = track_movements(&base_value, &modified_value);

    Ok(LayoutDiff {
        metadata: json!({
            "base_version": base.version,
            "modified_version": modified.version,
            "base_uuid": base.uuid,
            "modified_uuid": modified.uuid,
            "diff_type": "layout_diff_v1",
        }),
        json_patch,
        layout_changes,
        movements,
        statistics,
    })
}

fn behavior_changes<T, F>(base: &[T], modified: &[T], name: F) -> BehaviorChanges
where
    T: PartialEq,
    F: Fn(&T) -> &str,
{
    let mut changes = BehaviorChanges::default();
    for item in modified {
        match base.iter().find(|b| name(b) == name(item)) {
            None => changes.added.push(name(item).to_string()),
            Some(before) if before != item => changes.modified.push(name(item).to_string()),
            Some(_) => {}
        }
    }
    for item in base {
        if !modified.iter().any(|m| name(m) == name(item)) {
            changes.removed.push(name(item).to_string());
        }
    }
    changes
}

fn analyze_changes(base: &LayoutData, modified: &LayoutData) -> LayoutChanges {
    let mut changes = LayoutChanges::default();

    if modified.layers.len() > base.layers.len() {
        changes.layers_added = (base.layers.len()..modified.layers.len()).collect();
    } else if modified.layers.len() < base.layers.len() {
        changes.layers_removed = (modified.layers.len()..base.layers.len()).collect();
    }
    for idx in 0..base.layers.len().min(modified.layers.len()) {
        if base.layers[idx] != modified.layers[idx] {
            changes.layers_modified.push(idx);
        }
    }
    for idx in 0..base.layer_names.len().min(modified.layer_names.len()) {
        if base.layer_names[idx] != modified.layer_names[idx] {
            changes.layer_renames.push(LayerRename {
                index: idx,
                from: base.layer_names[idx].clone(),
                to: modified.layer_names[idx].clone(),
            });
        }
    }
    let base_set: std::collections::BTreeSet<&String> = base.layer_names.iter().collect();
    let modified_set: std::collections::BTreeSet<&String> = modified.layer_names.iter().collect();
    changes.layers_reordered = base_set == modified_set && base.layer_names != modified.layer_names;

    changes.hold_taps = behavior_changes(&base.hold_taps, &modified.hold_taps, |b| &b.name);
    changes.combos = behavior_changes(&base.combos, &modified.combos, |b| &b.name);
    changes.macros = behavior_changes(&base.macros, &modified.macros, |b| &b.name);
    changes.input_listeners =
        behavior_changes(&base.input_listeners, &modified.input_listeners, |b| &b.code);

    changes.devicetree_changed = base.custom_devicetree != modified.custom_devicetree;
    changes.behaviors_changed = base.custom_defined_behaviors != modified.custom_defined_behaviors;
    changes
}

/// Deterministic content signature for a binding value.
fn binding_signature(binding: &Value) -> String {
    let canonical = serde_json::to_string(binding).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn layer_bindings(value: &Value) -> Vec<Vec<&Value>> {
    value
        .get("layers")
        .and_then(Value::as_array)
        .map(|layers| {
            layers
                .iter()
                .map(|layer| layer.as_array().map(|v| v.iter().collect()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

fn track_movements(base: &Value, modified: &Value) -> BindingMovements {
    let mut movements = BindingMovements::default();
    let base_layers = layer_bindings(base);
    let modified_layers = layer_bindings(modified);

    let mut signature_index: std::collections::BTreeMap<String, Vec<(usize, usize)>> =
        std::collections::BTreeMap::new();
    for (layer_idx, layer) in base_layers.iter().enumerate() {
        for (pos_idx, binding) in layer.iter().enumerate() {
            signature_index
                .entry(binding_signature(binding))
                .or_default()
                .push((layer_idx, pos_idx));
        }
    }

    for (layer_idx, layer) in modified_layers.iter().enumerate() {
        for (pos_idx, binding) in layer.iter().enumerate() {
            let sig = binding_signature(binding);
            let Some(origins) = signature_index.get(&sig) else {
                continue;
            };
            for &(from_layer, from_position) in origins {
                if (from_layer, from_position) == (layer_idx, pos_idx) {
                    continue;
                }
                // Only report a move when the origin slot no longer holds it.
                let still_there = modified_layers
                    .get(from_layer)
                    .and_then(|l| l.get(from_position))
                    .is_some_and(|b| binding_signature(b) == sig);
                if still_there {
                    continue;
                }
                let movement = BindingMovement {
                    signature: sig.clone(),
                    from_layer,
                    from_position,
                    to_layer: layer_idx,
                    to_position: pos_idx,
                    binding: (*binding).clone(),
                };
                if from_layer == layer_idx {
                    movements.within_layer.push(movement);
                } else {
                    movements.between_layers.push(movement);
                }
            }
        }
    }

    for layer_idx in 0..base_layers.len().min(modified_layers.len()) {
        let base_layer = &base_layers[layer_idx];
        let modified_layer = &modified_layers[layer_idx];
        for pos_idx in 0..base_layer.len().min(modified_layer.len()) {
            if base_layer[pos_idx] != modified_layer[pos_idx] {
                movements.behavior_changes.push(BindingChange {
                    layer: layer_idx,
                    position: pos_idx,
                    from: base_layer[pos_idx].clone(),
                    to: modified_layer[pos_idx].clone(),
                });
            }
        }
    }

    movements
}

/// Applies a diff to a base layout. The result is exactly the layout the
/// diff was generated against; provenance stamping is the caller's choice.
pub fn apply_layout_patch(base: &LayoutData, diff: &LayoutDiff) -> Result<LayoutData> {
    let base_value = to_canonical(base)?;
    let patched = apply_ops(&base_value, &diff.json_patch)?;
    let layout: LayoutData = serde_json::from_value(patched)
        .map_err(|e| Error::LayoutInvalid(format!("patched layout is invalid: {e}")))?;
    layout.validate()?;
    Ok(layout)
}

/// One-line human summary of a diff.
#[must_use]
pub fn summarize(diff: &LayoutDiff) -> String {
    let changes = &diff.layout_changes;
    let mut parts = Vec::new();

    if !changes.layers_added.is_empty() {
        parts.push(format!("added {} layers", changes.layers_added.len()));
    }
    if !changes.layers_removed.is_empty() {
        parts.push(format!("removed {} layers", changes.layers_removed.len()));
    }
    if !changes.layers_modified.is_empty() {
        parts.push(format!("modified {} layers", changes.layers_modified.len()));
    }
    let behavior_total = changes.hold_taps.total()
        + changes.combos.total()
        + changes.macros.total()
        + changes.input_listeners.total();
    if behavior_total > 0 {
        parts.push(format!("changed {behavior_total} behaviors"));
    }
    if changes.devicetree_changed || changes.behaviors_changed {
        parts.push("changed custom code".to_string());
    }

    if parts.is_empty() {
        "no significant changes".to_string()
    } else {
        parts.join("; ")
    }
}

/// Unified diff of the two layouts' custom DTSI blocks.
#[must_use]
pub fn dtsi_diff(base: &LayoutData, modified: &LayoutData) -> String {
    let mut out = String::new();
    if base.custom_devicetree != modified.custom_devicetree {
        out.push_str(&unified_diff(
            &base.custom_devicetree,
            &modified.custom_devicetree,
            "custom_devicetree",
        ));
    }
    if base.custom_defined_behaviors != modified.custom_defined_behaviors {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&unified_diff(
            &base.custom_defined_behaviors,
            &modified.custom_defined_behaviors,
            "custom_defined_behaviors",
        ));
    }
    out
}

/// Detailed multi-line report of a diff.
#[must_use]
pub fn detailed_report(diff: &LayoutDiff) -> String {
    let mut out = format!("summary: {}\n", summarize(diff));
    let changes = &diff.layout_changes;

    for rename in &changes.layer_renames {
        out.push_str(&format!(
            "layer {} renamed: '{}' -> '{}'\n",
            rename.index, rename.from, rename.to
        ));
    }
    for idx in &changes.layers_modified {
        out.push_str(&format!("layer {idx} modified\n"));
    }
    for (kind, set) in [
        ("hold-tap", &changes.hold_taps),
        ("combo", &changes.combos),
        ("macro", &changes.macros),
        ("input listener", &changes.input_listeners),
    ] {
        if set.is_empty() {
            continue;
        }
        for name in &set.added {
            out.push_str(&format!("{kind} added: {name}\n"));
        }
        for name in &set.removed {
            out.push_str(&format!("{kind} removed: {name}\n"));
        }
        for name in &set.modified {
            out.push_str(&format!("{kind} modified: {name}\n"));
        }
    }
    out.push_str(&format!(
        "operations: {} ({} add, {} remove, {} replace)\n",
        diff.statistics.total_operations,
        diff.statistics.additions,
        diff.statistics.removals,
        diff.statistics.replacements
    ));
    out
}
