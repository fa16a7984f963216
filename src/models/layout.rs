//! Layout document data structures.
//!
//! The layout document is the single source of truth a user edits. It is
//! serialized as JSON with camelCase field aliases; unset optional fields are
//! omitted so that round-tripping an edited document stays minimal.

use crate::constants::MAX_BINDING_DEPTH;
use crate::error::{io_ctx, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One layer is an ordered sequence of bindings.
pub type LayerBindings = Vec<LayoutBinding>;

/// A single key-action entry in a layer, possibly nested.
///
/// `params` is recursive so that references such as `&mt LSHIFT A` or a
/// macro's `&macro_tap &kp A` serialize structurally rather than as flat
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBinding {
    /// Behavior reference, e.g. `&kp` or `&trans`.
    pub value: String,
    /// Positional parameters; empty for parameterless behaviors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<BindingParam>,
}

/// A binding parameter: a bare number, a bare word, or a nested binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingParam {
    /// Numeric parameter, e.g. a layer index or timeout.
    Number(i64),
    /// Keycode or other bare token, e.g. `Q` or `LSHIFT`.
    Word(String),
    /// Nested binding, e.g. the inner `&kp A` of a macro tap.
    Nested(Box<LayoutBinding>),
}

impl LayoutBinding {
    /// Creates a binding with no parameters.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            params: Vec::new(),
        }
    }

    /// Creates a binding whose parameters are bare words.
    pub fn with_words(value: impl Into<String>, words: &[&str]) -> Self {
        Self {
            value: value.into(),
            params: words
                .iter()
                .map(|w| BindingParam::Word((*w).to_string()))
                .collect(),
        }
    }

    /// Renders the binding as Device Tree source, e.g. `&mt LSHIFT A`.
    #[must_use]
    pub fn to_dts(&self) -> String {
        let mut out = self.value.clone();
        for param in &self.params {
            out.push(' ');
            out.push_str(&param.to_dts());
        }
        out
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > MAX_BINDING_DEPTH {
            return Err(Error::LayoutInvalid(format!(
                "binding '{}' exceeds maximum nesting depth of {}",
                self.value, MAX_BINDING_DEPTH
            )));
        }
        for param in &self.params {
            if let BindingParam::Nested(inner) = param {
                inner.check_depth(depth + 1)?;
            }
        }
        Ok(())
    }
}

impl BindingParam {
    /// Renders the parameter as Device Tree source.
    #[must_use]
    pub fn to_dts(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Word(w) => w.clone(),
            Self::Nested(b) => b.to_dts(),
        }
    }
}

/// Integer field that may still hold an unresolved `${...}` reference.
///
/// Numeric behavior fields (tapping terms, timeouts) accept variable
/// references in edit mode; flattening replaces them with plain integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntValue {
    /// Resolved integer value.
    Int(i64),
    /// Unresolved reference such as `${timeouts.tapping}`.
    Var(String),
}

impl IntValue {
    /// Returns the integer, or `LayoutInvalid` if the field is still a reference.
    pub fn resolved(&self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Var(s) => Err(Error::LayoutInvalid(format!(
                "unresolved variable reference '{s}' in numeric field"
            ))),
        }
    }
}

impl From<i64> for IntValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// A named firmware configuration parameter carried in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParameter {
    /// Kconfig option name, e.g. `CONFIG_ZMK_SLEEP`.
    pub param_name: String,
    /// Value to assign.
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Complete layout document: metadata, variables, layers, and behaviors.
///
/// # Validation
///
/// - `layer_names` and `layers` must have the same length
/// - every layer must contain at least one binding
/// - combo key positions must be non-negative; positions beyond the
///   keyboard's key count produce a warning, not an error (combo-only
///   virtual positions exist on some boards)
/// - binding parameter nesting is capped at [`MAX_BINDING_DEPTH`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutData {
    /// Keyboard identifier this layout targets, e.g. `glove80`.
    pub keyboard: String,
    /// Human-readable layout title.
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,

    /// User variables referenced by `${...}` expressions. Stripped by
    /// flattening; preserved verbatim in edit mode.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub variables: serde_json::Map<String, serde_json::Value>,

    /// Ordered layer names; parallel to `layers`.
    #[serde(default)]
    pub layer_names: Vec<String>,
    /// Ordered layers, each an ordered sequence of bindings.
    #[serde(default)]
    pub layers: Vec<LayerBindings>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hold_taps: Vec<super::behaviors::HoldTapBehavior>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub combos: Vec<super::behaviors::ComboBehavior>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub macros: Vec<super::behaviors::MacroBehavior>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_listeners: Vec<super::behaviors::InputListener>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_parameters: Vec<ConfigParameter>,

    /// Opaque DTSI passed through into the behaviors section of the keymap.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_defined_behaviors: String,
    /// Opaque DTSI passed through at devicetree root scope.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_devicetree: String,
}

impl LayoutData {
    /// Creates a minimal single-layer document.
    pub fn new(keyboard: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            keyboard: keyboard.into(),
            title: title.into(),
            uuid: Some(uuid::Uuid::new_v4().to_string()),
            parent_uuid: None,
            version: Some("1.0.0".to_string()),
            base_version: None,
            creator: None,
            notes: None,
            tags: Vec::new(),
            date: Some(Utc::now()),
            variables: serde_json::Map::new(),
            layer_names: Vec::new(),
            layers: Vec::new(),
            hold_taps: Vec::new(),
            combos: Vec::new(),
            macros: Vec::new(),
            input_listeners: Vec::new(),
            config_parameters: Vec::new(),
            custom_defined_behaviors: String::new(),
            custom_devicetree: String::new(),
        }
    }

    /// Loads a layout document from a JSON (or JSON5) file.
    ///
    /// Variable references are preserved verbatim; call
    /// [`LayoutData::to_flattened`] before generation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(io_ctx(path, "failed to read"))?;
        Self::from_json(&content)
    }

    /// Parses a layout document from JSON text, accepting JSON5 relaxations
    /// for hand-edited files.
    pub fn from_json(content: &str) -> Result<Self> {
        let data: Self = match serde_json::from_str(content) {
            Ok(data) => data,
            // Hand-edited files may carry comments or trailing commas.
            Err(json_err) => json5::from_str(content).map_err(|_| {
                Error::LayoutInvalid(format!("layout JSON decode failed: {json_err}"))
            })?,
        };
        data.validate()?;
        Ok(data)
    }

    /// Serializes to pretty JSON and writes atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_ctx(&tmp, "failed to write"))?;
        std::fs::rename(&tmp, path).map_err(io_ctx(path, "failed to rename into"))?;
        Ok(())
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::LayoutInvalid(format!("layout serialization failed: {e}")))
    }

    /// Resolves every `${...}` reference and strips the `variables` map.
    ///
    /// This is the shape the DTSI generator always consumes.
    pub fn to_flattened(&self) -> Result<Self> {
        crate::variables::flatten(self)
    }

    /// Number of layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Index of a layer by name.
    #[must_use]
    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layer_names.iter().position(|n| n == name)
    }

    /// Validates the document structure.
    ///
    /// `key_count` warnings (combo positions beyond the physical grid) are
    /// reported by the profile-aware validation in the generator, not here,
    /// because they need the keyboard descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.layer_names.len() != self.layers.len() {
            return Err(Error::LayoutInvalid(format!(
                "layer count mismatch: {} names but {} layers",
                self.layer_names.len(),
                self.layers.len()
            )));
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.is_empty() {
                return Err(Error::LayoutInvalid(format!(
                    "layer {idx} has no bindings"
                )));
            }
            for binding in layer {
                binding.check_depth(0)?;
            }
        }

        for combo in &self.combos {
            if combo.key_positions.is_empty() {
                return Err(Error::LayoutInvalid(format!(
                    "combo '{}' has no key positions",
                    combo.name
                )));
            }
            for layer_name in &combo.layers {
                if self.layer_index(layer_name).is_none() {
                    return Err(Error::LayoutInvalid(format!(
                        "combo '{}' references unknown layer '{layer_name}'",
                        combo.name
                    )));
                }
            }
        }

        for macro_def in &self.macros {
            for binding in &macro_def.bindings {
                binding.check_depth(0)?;
            }
        }

        Ok(())
    }

    /// Stamps fresh provenance onto an imported or patched document.
    pub fn stamp_provenance(&mut self, parent: Option<&Self>) {
        if let Some(parent) = parent {
            self.parent_uuid.clone_from(&parent.uuid);
            self.base_version.clone_from(&parent.version);
        }
        self.uuid = Some(uuid::Uuid::new_v4().to_string());
        self.date = Some(Utc::now());
    }
}
