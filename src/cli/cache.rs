//! `glovebox cache workspace` command handlers.

use crate::adapters::fs::unzip_to;
use crate::cache::CacheStore;
use crate::cli::common::{CliError, CliResult, ExitCode};
use crate::config::UserConfig;
use chrono::Duration;
use clap::Args;
use std::path::PathBuf;

fn open_store(config: &UserConfig) -> CliResult<CacheStore> {
    let root = config.cache_root()?;
    Ok(CacheStore::new(root)?)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Show cached workspaces
#[derive(Debug, Clone, Args)]
pub struct CacheShowArgs {}

impl CacheShowArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let store = open_store(config)?;
        let mut entries = store.list_entries()?;
        if entries.is_empty() {
            println!("cache is empty");
            return Ok(ExitCode::Success);
        }
        entries.sort_by(|a, b| a.1.repository.cmp(&b.1.repository));
        println!(
            "{:<30} {:<12} {:<8} {:>10}  last access",
            "repository", "branch", "level", "size"
        );
        for (_, metadata) in entries {
            println!(
                "{:<30} {:<12} {:<8} {:>10}  {}",
                metadata.repository,
                metadata.branch,
                metadata.cache_level.to_string(),
                human_size(metadata.size_bytes),
                metadata.last_access.format("%Y-%m-%d %H:%M"),
            );
        }
        Ok(ExitCode::Success)
    }
}

/// Delete cached workspaces for a repository, or everything
#[derive(Debug, Clone, Args)]
pub struct CacheDeleteArgs {
    /// Repository to delete entries for (e.g. zmkfirmware/zmk)
    #[arg(value_name = "REPOSITORY")]
    pub repository: Option<String>,

    /// Delete every entry
    #[arg(long)]
    pub all: bool,
}

impl CacheDeleteArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let store = open_store(config)?;
        let removed = match (&self.repository, self.all) {
            (Some(repository), false) => store.delete_repository(repository)?,
            (None, true) => store.delete_all()?,
            (Some(_), true) => {
                return Err(CliError::misuse(
                    "pass either a repository or --all, not both",
                ));
            }
            (None, false) => {
                return Err(CliError::misuse(
                    "pass a repository to delete, or --all to wipe the cache",
                ));
            }
        };
        println!("removed {removed} cache entries");
        Ok(ExitCode::Success)
    }
}

/// Remove cache entries older than the given age
#[derive(Debug, Clone, Args)]
pub struct CacheCleanupArgs {
    /// Maximum age in days; entries with older last-access are removed.
    /// Without this, per-level TTLs apply.
    #[arg(long, value_name = "DAYS")]
    pub max_age: Option<i64>,
}

impl CacheCleanupArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let store = open_store(config)?;
        let removed = match self.max_age {
            Some(days) => store.cleanup(Duration::days(days))?,
            None => store.evict_stale()?,
        };
        println!("removed {removed} stale cache entries");
        Ok(ExitCode::Success)
    }
}

/// Register an existing workspace directory or zip as a cache entry
#[derive(Debug, Clone, Args)]
pub struct CacheAddArgs {
    /// Workspace directory or downloaded zip archive
    #[arg(value_name = "PATH")]
    pub source: PathBuf,

    /// Repository the workspace was built from
    #[arg(long, value_name = "REPO")]
    pub repository: String,

    /// Branch the workspace tracks
    #[arg(long, value_name = "BRANCH", default_value = "main")]
    pub branch: String,
}

impl CacheAddArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let store = open_store(config)?;

        let metadata = if self.source.extension().is_some_and(|e| e == "zip") {
            let staging =
                std::env::temp_dir().join(format!("glovebox-inject-{}", std::process::id()));
            std::fs::create_dir_all(&staging)
                .map_err(|e| CliError::failure(format!("failed to create staging dir: {e}")))?;
            let injected = unzip_to(&self.source, &staging)
                .and_then(|()| store.inject(&staging, &self.repository, &self.branch));
            let _ = std::fs::remove_dir_all(&staging);
            injected?
        } else if self.source.is_dir() {
            store.inject(&self.source, &self.repository, &self.branch)?
        } else {
            return Err(CliError::misuse(format!(
                "{} is neither a directory nor a zip archive",
                self.source.display()
            )));
        };

        println!(
            "registered {} at level {} ({})",
            metadata.repository,
            metadata.cache_level,
            human_size(metadata.size_bytes),
        );
        Ok(ExitCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512.0 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
