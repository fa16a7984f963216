//! Layout compilation: DTSI fragments, Kconfig text, and template rendering.
//!
//! The generator never prints the final `.keymap` directly. It fills a fixed
//! template context consumed by the keyboard descriptor's Jinja template; the
//! default template below is used for descriptors that carry none.

pub mod dtsi;
pub mod kconfig;

use crate::error::{Error, Result};
use crate::models::LayoutData;
use crate::profile::KeyboardProfile;
use serde_json::{json, Value};

/// Template used when the keyboard descriptor does not supply one.
const DEFAULT_KEYMAP_TEMPLATE: &str = "\
{{ resolved_includes }}

{{ key_position_header }}
{{ layer_defines }}

{{ custom_devicetree }}

{{ system_behaviors_dts }}

{{ custom_defined_behaviors }}

{{ user_behaviors_dtsi }}

{{ combos_dtsi }}

{{ user_macros_dtsi }}

{{ input_listeners_dtsi }}

/ {
{{ keymap_node }}
};
";

/// Options controlling keymap generation.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorOptions {
    /// Include `generation_timestamp` in the context. Disable for
    /// byte-reproducible output.
    pub timestamps: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self { timestamps: true }
    }
}

/// The products of one layout compilation.
#[derive(Debug, Clone)]
pub struct CompiledLayout {
    /// Final `.keymap` text.
    pub keymap: String,
    /// Kconfig `.conf` fragment.
    pub conf: String,
    pub layer_count: usize,
}

/// Builds the fixed template context for a flattened layout.
///
/// The key set is part of the external interface; removing or renaming a key
/// breaks keyboard templates in the wild.
pub fn build_template_context(
    profile: &KeyboardProfile,
    layout: &LayoutData,
    options: GeneratorOptions,
) -> Result<Value> {
    let layer_defines = dtsi::generate_layer_defines(&layout.layer_names);
    let keymap_node = dtsi::generate_keymap_node(profile, &layout.layer_names, &layout.layers)?;
    let user_behaviors_dtsi = dtsi::generate_behaviors_dtsi(&layout.hold_taps)?;
    let combos_dtsi = dtsi::generate_combos_dtsi(&layout.combos, &layout.layer_names)?;
    let user_macros_dtsi = dtsi::generate_macros_dtsi(&layout.macros)?;
    let input_listeners_dtsi = dtsi::generate_input_listeners_node(&layout.input_listeners)?;

    let keymap_section = &profile.keyboard_config.keymap;
    let generation_timestamp = if options.timestamps {
        chrono::Utc::now().to_rfc3339()
    } else {
        String::new()
    };

    Ok(json!({
        "keyboard": layout.keyboard,
        "layer_names": layout.layer_names,
        "layers": layout.layers,
        "layer_defines": layer_defines,
        "keymap_node": keymap_node,
        "user_behaviors_dtsi": user_behaviors_dtsi,
        "combos_dtsi": combos_dtsi,
        "input_listeners_dtsi": input_listeners_dtsi,
        "user_macros_dtsi": user_macros_dtsi,
        "resolved_includes": keymap_section.includes.join("\n"),
        "key_position_header": keymap_section.key_position_header,
        "system_behaviors_dts": keymap_section.system_behaviors_dts,
        "custom_defined_behaviors": layout.custom_defined_behaviors,
        "custom_devicetree": layout.custom_devicetree,
        "profile_name": profile.name(),
        "firmware_version": profile.firmware_version.clone().unwrap_or_default(),
        "generation_timestamp": generation_timestamp,
    }))
}

/// Renders the final `.keymap` text through the profile's template.
pub fn render_keymap(
    profile: &KeyboardProfile,
    layout: &LayoutData,
    options: GeneratorOptions,
) -> Result<String> {
    let context = build_template_context(profile, layout, options)?;
    let template = profile
        .keymap_template()
        .unwrap_or(DEFAULT_KEYMAP_TEMPLATE);

    let env = minijinja::Environment::new();
    env.render_str(template, minijinja::Value::from_serialize(&context))
        .map_err(|e| Error::TemplateRenderFailed(e.to_string()))
}

/// Warns about combo positions beyond the physical key count. Keyboards with
/// combo-only virtual positions legitimately exceed the grid, so this never
/// fails the compile.
fn warn_virtual_positions(profile: &KeyboardProfile, layout: &LayoutData) {
    let key_count = profile.keyboard_config.key_count;
    if key_count == 0 {
        return;
    }
    for combo in &layout.combos {
        for &position in &combo.key_positions {
            if position >= key_count {
                tracing::warn!(
                    "combo '{}' key position {position} exceeds key count {key_count}",
                    combo.name
                );
            }
        }
    }
}

/// Compiles a layout document into keymap and conf text.
///
/// The input may still contain `${...}` references; flattening runs first and
/// its failures (undefined variables, cycles) abort the compile.
pub fn compile_layout(
    profile: &KeyboardProfile,
    layout: &LayoutData,
    options: GeneratorOptions,
) -> Result<CompiledLayout> {
    let flattened = layout.to_flattened()?;
    flattened.validate()?;
    warn_virtual_positions(profile, &flattened);

    let keymap = render_keymap(profile, &flattened, options)?;
    let conf = kconfig::generate_conf(profile, &flattened.config_parameters)?;

    Ok(CompiledLayout {
        keymap,
        conf,
        layer_count: flattened.layer_count(),
    })
}
