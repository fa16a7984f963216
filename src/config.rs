//! User configuration management.
//!
//! Configuration lives in TOML under the platform config directory and is
//! constructed once at entry, then threaded explicitly through the pipeline.
//! It carries search-path overrides, the cache root, container defaults, and
//! cache TTL overrides.

use crate::constants::{TTL_BASE_DAYS, TTL_BRANCH_DAYS, TTL_BUILD_DAYS, TTL_FULL_DAYS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Container runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// CLI binary to invoke (`docker` or a compatible drop-in).
    pub binary: String,
    /// Map the host uid/gid into the container so build outputs stay owned
    /// by the invoking user. Strategies may override this.
    pub enable_user_mapping: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            enable_user_mapping: true,
        }
    }
}

/// Per-level cache TTL overrides, in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    pub base_days: u64,
    pub branch_days: u64,
    pub full_days: u64,
    pub build_days: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            base_days: TTL_BASE_DAYS,
            branch_days: TTL_BRANCH_DAYS,
            full_days: TTL_FULL_DAYS,
            build_days: TTL_BUILD_DAYS,
        }
    }
}

/// Firmware flashing defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashDefaults {
    /// Devices to flash per invocation (2 for split keyboards).
    pub count: usize,
    pub timeout_secs: u64,
    pub poll_interval_secs: f64,
}

impl Default for FlashDefaults {
    fn default() -> Self {
        Self {
            count: 2,
            timeout_secs: 60,
            poll_interval_secs: 0.5,
        }
    }
}

/// Application configuration.
///
/// # File Location
///
/// - Linux: `~/.config/glovebox/config.toml`
/// - macOS: `~/Library/Application Support/glovebox/config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserConfig {
    /// Extra keyboard descriptor directories, appended to the search path.
    #[serde(default)]
    pub keyboard_paths: Vec<PathBuf>,
    /// Cache root override; defaults to the platform cache directory.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub cache_ttl: CacheTtlConfig,
    #[serde(default)]
    pub flash: FlashDefaults,
    /// Overall compile wall-clock limit in seconds, when set.
    #[serde(default)]
    pub compile_timeout_secs: Option<u64>,
}

impl UserConfig {
    /// Platform config directory for glovebox.
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("failed to determine config directory")?
            .join("glovebox"))
    }

    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Loads the config file, or defaults when none exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the config atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        self.validate()?;
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config directory: {}", dir.display()))?;

        let content = toml::to_string_pretty(self).context("failed to serialize configuration")?;
        let path = Self::config_file_path()?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("failed to write temp config file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename config file into: {}", path.display()))?;
        Ok(())
    }

    /// Effective cache root.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.cache_root {
            return Ok(root.clone());
        }
        Ok(dirs::cache_dir()
            .context("failed to determine cache directory")?
            .join("glovebox"))
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.docker.binary.trim().is_empty() {
            anyhow::bail!("docker binary cannot be empty");
        }
        if self.flash.count == 0 {
            anyhow::bail!("flash count must be at least 1");
        }
        if self.flash.poll_interval_secs <= 0.0 {
            anyhow::bail!("flash poll interval must be positive");
        }
        for path in &self.keyboard_paths {
            if path.as_os_str().is_empty() {
                anyhow::bail!("keyboard path entries cannot be empty");
            }
        }
        Ok(())
    }
}
