//! User-defined behavior models: hold-taps, combos, macros, input listeners.

use super::layout::{IntValue, LayoutBinding};
use serde::{Deserialize, Serialize};

/// A hold-tap behavior: one action on tap, another on hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldTapBehavior {
    /// Node name without the `&` prefix, e.g. `hm_l`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Exactly two entries: the hold behavior and the tap behavior.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tapping_term_ms: Option<IntValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_tap_ms: Option<IntValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_prior_idle_ms: Option<IntValue>,
    /// One of `hold-preferred`, `balanced`, `tap-preferred`, `tap-unless-interrupted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hold_trigger_key_positions: Vec<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hold_trigger_on_release: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retro_tap: bool,
}

/// A combo: an action triggered by a set of key positions pressed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboBehavior {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<IntValue>,
    /// Physical key positions; may exceed the keyboard's key count for
    /// combo-only virtual positions.
    pub key_positions: Vec<u32>,
    /// Layer names on which the combo is active; empty means all layers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<String>,
    pub binding: LayoutBinding,
}

/// A macro: an ordered sequence of emitted bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroBehavior {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<IntValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_ms: Option<IntValue>,
    #[serde(default)]
    pub bindings: Vec<LayoutBinding>,
}

/// A processor node inside an input listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputListenerNode {
    /// Node label, e.g. `zip_xy_scaler`.
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_processors: Vec<LayoutBinding>,
}

/// An input listener: a device node plus its processor sub-nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputListener {
    /// Listener node reference, e.g. `&trackball_listener`.
    pub code: String,
    #[serde(default)]
    pub nodes: Vec<InputListenerNode>,
}
