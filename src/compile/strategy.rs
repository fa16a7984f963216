//! Compile strategy selection.
//!
//! Strategies are few and closed, so they are a tagged variant with
//! per-variant configuration rather than a dynamic registry. New strategies
//! extend the enum.

use crate::error::{Error, Result};
use crate::models::BuildMatrix;
use crate::profile::KeyboardProfile;

/// Generic west-workspace build configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmkConfig {
    pub image: String,
    pub repository: String,
    pub branch: String,
    pub use_cache: bool,
    pub default_boards: Vec<String>,
}

impl Default for ZmkConfig {
    fn default() -> Self {
        Self {
            image: "zmkfirmware/zmk-build-arm:stable".to_string(),
            repository: "zmkfirmware/zmk".to_string(),
            branch: "main".to_string(),
            use_cache: true,
            default_boards: vec!["nice_nano_v2".to_string()],
        }
    }
}

/// Nix-based Moergo build configuration: no west workspace, user mapping off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoergoConfig {
    pub image: String,
    pub repository: String,
    pub branch: String,
    pub default_boards: Vec<String>,
}

impl Default for MoergoConfig {
    fn default() -> Self {
        Self {
            image: "glove80-zmk-config-docker".to_string(),
            repository: "moergo-sc/zmk".to_string(),
            branch: "v25.05".to_string(),
            default_boards: vec!["glove80_lh".to_string(), "glove80_rh".to_string()],
        }
    }
}

/// Closed set of compilation strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileStrategy {
    ZmkConfig(ZmkConfig),
    Moergo(MoergoConfig),
}

impl CompileStrategy {
    /// Resolves the strategy for a profile, honoring an explicit override.
    ///
    /// The keyboard's `compile_methods` list is scanned in order; the first
    /// entry (or the first entry matching the override) wins. Repository and
    /// branch default from the selected firmware's build options.
    pub fn from_profile(profile: &KeyboardProfile, override_name: Option<&str>) -> Result<Self> {
        let methods = &profile.keyboard_config.compile_methods;
        let method = match override_name {
            Some(name) => methods.iter().find(|m| m.method_type == name),
            None => methods.first(),
        };

        let method_type = match (method, override_name) {
            (Some(m), _) => m.method_type.clone(),
            (None, Some(name)) => name.to_string(),
            (None, None) => "zmk_config".to_string(),
        };

        let firmware_options = profile
            .firmware_config
            .as_ref()
            .map(|f| f.build_options.clone());

        match method_type.as_str() {
            "zmk_config" => {
                let mut config = ZmkConfig::default();
                if let Some(options) = &firmware_options {
                    if !options.repository.is_empty() {
                        config.repository.clone_from(&options.repository);
                    }
                    if !options.branch.is_empty() {
                        config.branch.clone_from(&options.branch);
                    }
                }
                if let Some(method) = method {
                    if let Some(image) = &method.image {
                        config.image.clone_from(image);
                    }
                    if let Some(repository) = &method.repository {
                        config.repository.clone_from(repository);
                    }
                    if let Some(branch) = &method.branch {
                        config.branch.clone_from(branch);
                    }
                    if !method.board_targets.is_empty() {
                        config.default_boards.clone_from(&method.board_targets);
                    }
                }
                Ok(Self::ZmkConfig(config))
            }
            "moergo" => {
                let mut config = MoergoConfig::default();
                if let Some(options) = &firmware_options {
                    if !options.repository.is_empty() {
                        config.repository.clone_from(&options.repository);
                    }
                    if !options.branch.is_empty() {
                        config.branch.clone_from(&options.branch);
                    }
                }
                if let Some(method) = method {
                    if let Some(image) = &method.image {
                        config.image.clone_from(image);
                    }
                    if !method.board_targets.is_empty() {
                        config.default_boards.clone_from(&method.board_targets);
                    }
                }
                Ok(Self::Moergo(config))
            }
            other => Err(Error::ProfileInvalid {
                keyboard: profile.keyboard_name().to_string(),
                message: format!("unknown compile strategy '{other}'"),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZmkConfig(_) => "zmk_config",
            Self::Moergo(_) => "moergo",
        }
    }

    #[must_use]
    pub fn image(&self) -> &str {
        match self {
            Self::ZmkConfig(c) => &c.image,
            Self::Moergo(c) => &c.image,
        }
    }

    #[must_use]
    pub fn repository(&self) -> &str {
        match self {
            Self::ZmkConfig(c) => &c.repository,
            Self::Moergo(c) => &c.repository,
        }
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        match self {
            Self::ZmkConfig(c) => &c.branch,
            Self::Moergo(c) => &c.branch,
        }
    }

    /// Default matrix when the repository carries no `build.yaml`.
    #[must_use]
    pub fn default_matrix(&self) -> BuildMatrix {
        let boards = match self {
            Self::ZmkConfig(c) => &c.default_boards,
            Self::Moergo(c) => &c.default_boards,
        };
        BuildMatrix::from_boards(boards)
    }

    /// Whether host uid/gid mapping applies; Moergo images manage their own
    /// permissions and break under mapping.
    #[must_use]
    pub fn user_mapping_enabled(&self, config_default: bool) -> bool {
        match self {
            Self::ZmkConfig(_) => config_default,
            Self::Moergo(_) => false,
        }
    }

    /// Whether workspace caching applies to this strategy.
    #[must_use]
    pub fn uses_workspace_cache(&self) -> bool {
        match self {
            Self::ZmkConfig(c) => c.use_cache,
            Self::Moergo(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyboardConfig;
    use std::sync::Arc;

    fn profile_from_yaml(yaml: &str, firmware: Option<&str>) -> KeyboardProfile {
        let config: KeyboardConfig = serde_yml::from_str(yaml).unwrap();
        KeyboardProfile::new(Arc::new(config), firmware).unwrap()
    }

    #[test]
    fn test_default_strategy_without_methods() {
        let profile = profile_from_yaml("keyboard: test\nkey_count: 2\n", None);
        let strategy = CompileStrategy::from_profile(&profile, None).unwrap();
        assert_eq!(strategy.name(), "zmk_config");
        assert_eq!(strategy.repository(), "zmkfirmware/zmk");
        assert!(strategy.uses_workspace_cache());
    }

    #[test]
    fn test_firmware_build_options_win() {
        let profile = profile_from_yaml(
            r"
keyboard: test
key_count: 2
firmwares:
  v25:
    version: v25
    build_options:
      repository: myfork/zmk
      branch: feature
",
            Some("v25"),
        );
        let strategy = CompileStrategy::from_profile(&profile, None).unwrap();
        assert_eq!(strategy.repository(), "myfork/zmk");
        assert_eq!(strategy.branch(), "feature");
    }

    #[test]
    fn test_moergo_method_selected() {
        let profile = profile_from_yaml(
            r"
keyboard: glove80
key_count: 80
compile_methods:
  - method_type: moergo
    image: glove80-zmk-config-docker
    board_targets:
      - glove80_lh
      - glove80_rh
",
            None,
        );
        let strategy = CompileStrategy::from_profile(&profile, None).unwrap();
        assert_eq!(strategy.name(), "moergo");
        assert!(!strategy.user_mapping_enabled(true));
        assert!(!strategy.uses_workspace_cache());
        assert!(strategy.default_matrix().is_split());
    }

    #[test]
    fn test_override_selects_method() {
        let profile = profile_from_yaml(
            r"
keyboard: glove80
key_count: 80
compile_methods:
  - method_type: moergo
  - method_type: zmk_config
    repository: zmkfirmware/zmk
",
            None,
        );
        let strategy = CompileStrategy::from_profile(&profile, Some("zmk_config")).unwrap();
        assert_eq!(strategy.name(), "zmk_config");
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let profile = profile_from_yaml("keyboard: test\nkey_count: 2\n", None);
        assert!(CompileStrategy::from_profile(&profile, Some("bazel")).is_err());
    }
}
