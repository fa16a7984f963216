//! Content-addressed workspace and build-artifact cache.
//!
//! Entries are keyed by the stable hash of
//! `(normalized repo URL, branch, optional commit, level)` and live at
//! `<root>/<first-two>/<hash>/` with a sibling `<hash>.metadata.json`.
//! A creating process holds an exclusive lock file until the payload is
//! renamed into place, so readers never observe partial payloads.

pub mod copy;

use crate::cancel::CancellationToken;
use crate::constants::{
    TTL_BASE_DAYS, TTL_BRANCH_DAYS, TTL_BUILD_DAYS, TTL_FULL_DAYS, WORKSPACE_COMPONENTS,
};
use crate::error::{io_ctx, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// How far a cached workspace has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    /// Bare clone, no west update.
    Base,
    /// Branch checked out.
    Branch,
    /// `west update` complete, all modules fetched.
    Full,
    /// Completed build artifacts and logs.
    Build,
}

impl CacheLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Branch => "branch",
            Self::Full => "full",
            Self::Build => "build",
        }
    }

    /// Default TTL for the level.
    #[must_use]
    pub fn default_ttl(self) -> Duration {
        let days = match self {
            Self::Base => TTL_BASE_DAYS,
            Self::Branch => TTL_BRANCH_DAYS,
            Self::Full => TTL_FULL_DAYS,
            Self::Build => TTL_BUILD_DAYS,
        };
        Duration::days(i64::try_from(days).expect("ttl fits i64"))
    }

    /// Workspace levels in descending preference for reuse.
    pub const WORKSPACE_PREFERENCE: [Self; 3] = [Self::Full, Self::Branch, Self::Base];
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips protocol, host, and `.git` so equivalent URLs share cache entries.
#[must_use]
pub fn normalize_repository(repository: &str) -> String {
    let mut repo = repository.trim().to_lowercase();
    for prefix in [
        "https://github.com/",
        "http://github.com/",
        "git@github.com:",
        "https://",
        "http://",
    ] {
        if let Some(rest) = repo.strip_prefix(prefix) {
            repo = rest.to_string();
            break;
        }
    }
    repo.trim_end_matches('/')
        .trim_end_matches(".git")
        .to_string()
}

/// Deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub repository: String,
    pub branch: String,
    pub commit: Option<String>,
    pub level: CacheLevel,
}

impl CacheKey {
    #[must_use]
    pub fn new(repository: &str, branch: &str, commit: Option<&str>, level: CacheLevel) -> Self {
        Self {
            repository: normalize_repository(repository),
            branch: branch.to_string(),
            commit: commit.map(str::to_string),
            level,
        }
    }

    /// Stable hex digest identifying the entry on disk.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repository.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.branch.as_bytes());
        hasher.update(b"\0");
        if let Some(commit) = &self.commit {
            hasher.update(commit.as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(self.level.as_str().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Metadata persisted next to each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub repository: String,
    pub branch: String,
    pub cache_level: CacheLevel,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Canonical directories actually present in the payload.
    pub cached_components: Vec<String>,
    #[serde(default)]
    pub auto_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_detected_source: Option<PathBuf>,
}

/// A verified cache hit handed to consumers. The payload is read-only from
/// the consumer's perspective; copies go through [`copy::copy_tree`].
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: PathBuf,
    pub metadata: CacheMetadata,
}

fn directory_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    total
}

/// Components of [`WORKSPACE_COMPONENTS`] present in a directory.
fn detect_components(path: &Path) -> Vec<String> {
    WORKSPACE_COMPONENTS
        .iter()
        .filter(|c| path.join(c).is_dir())
        .map(|c| (*c).to_string())
        .collect()
}

/// Exclusive per-key writer lock, released on drop.
struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    fn acquire(path: PathBuf, key_hash: &str) -> Result<Self> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::CacheLocked(key_hash.to_string()))
            }
            Err(e) => Err(Error::io(format!("failed to lock {}", path.display()), e)),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The sole writer to `<cache-root>`. Concurrent processes coordinate via
/// per-key lock files on the metadata path.
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(io_ctx(&root, "failed to create cache root"))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2])
    }

    fn payload_path(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(hash)
    }

    fn metadata_path(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}.metadata.json"))
    }

    fn lock_path(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}.lock"))
    }

    fn read_metadata(&self, path: &Path) -> Result<CacheMetadata> {
        let content = std::fs::read_to_string(path).map_err(io_ctx(path, "failed to read"))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::CacheCorrupt(format!("metadata decode failed: {e}")))
    }

    fn write_metadata(&self, path: &Path, metadata: &CacheMetadata) -> Result<()> {
        let content = serde_json::to_string_pretty(metadata)
            .map_err(|e| Error::CacheCorrupt(format!("metadata encode failed: {e}")))?;
        std::fs::write(path, content).map_err(io_ctx(path, "failed to write"))?;
        Ok(())
    }

    /// Returns a verified hit, refreshing `last_access`. A payload missing
    /// its expected components is treated as corrupt and removed.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>> {
        let hash = key.hash();
        let metadata_path = self.metadata_path(&hash);
        if !metadata_path.exists() {
            return Ok(None);
        }

        let mut metadata = self.read_metadata(&metadata_path)?;
        let payload = self.payload_path(&hash);

        let missing: Vec<&String> = metadata
            .cached_components
            .iter()
            .filter(|c| !payload.join(c).is_dir())
            .collect();
        if !payload.is_dir() || !missing.is_empty() {
            tracing::warn!(
                "cache entry {hash} is corrupt (missing {missing:?}), removing"
            );
            self.remove_entry(&hash)?;
            return Ok(None);
        }

        metadata.last_access = Utc::now();
        self.write_metadata(&metadata_path, &metadata)?;
        Ok(Some(CacheHit { payload, metadata }))
    }

    /// Stores a directory as the payload for `key`, moving ownership of its
    /// contents into the cache via copy + atomic rename.
    pub fn store(&self, key: &CacheKey, source: &Path) -> Result<CacheMetadata> {
        let hash = key.hash();
        let shard = self.shard_dir(&hash);
        std::fs::create_dir_all(&shard).map_err(io_ctx(&shard, "failed to create"))?;

        let _lock = CacheLock::acquire(self.lock_path(&hash), &hash)?;

        let staging = shard.join(format!("{hash}.staging-{}", std::process::id()));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(io_ctx(&staging, "failed to clear"))?;
        }
        copy::copy_tree(source, &staging, None, &CancellationToken::new())?;

        let payload = self.payload_path(&hash);
        if payload.exists() {
            std::fs::remove_dir_all(&payload).map_err(io_ctx(&payload, "failed to replace"))?;
        }
        std::fs::rename(&staging, &payload).map_err(io_ctx(&payload, "failed to rename into"))?;

        let now = Utc::now();
        let metadata = CacheMetadata {
            repository: key.repository.clone(),
            branch: key.branch.clone(),
            cache_level: key.level,
            size_bytes: directory_size(&payload),
            created_at: now,
            last_access: now,
            cached_components: detect_components(&payload),
            auto_detected: false,
            auto_detected_source: None,
        };
        self.write_metadata(&self.metadata_path(&hash), &metadata)?;
        tracing::info!("cached {} at level {}", key.repository, key.level);
        Ok(metadata)
    }

    /// Registers an existing workspace directory as a cache entry.
    ///
    /// The directory must contain at least one canonical component; the
    /// assigned level reflects what is present.
    pub fn inject(
        &self,
        source: &Path,
        repository: &str,
        branch: &str,
    ) -> Result<CacheMetadata> {
        let components = detect_components(source);
        if !components.iter().any(|c| c == "zmk") {
            return Err(Error::CacheCorrupt(format!(
                "directory {} does not look like a west workspace (no zmk/)",
                source.display()
            )));
        }
        let level = if components.len() == WORKSPACE_COMPONENTS.len() {
            CacheLevel::Full
        } else if components.iter().any(|c| c == ".west") {
            CacheLevel::Branch
        } else {
            CacheLevel::Base
        };

        let key = CacheKey::new(repository, branch, None, level);
        let mut metadata = self.store(&key, source)?;
        metadata.auto_detected = true;
        metadata.auto_detected_source = Some(source.to_path_buf());
        self.write_metadata(&self.metadata_path(&key.hash()), &metadata)?;
        Ok(metadata)
    }

    /// Best workspace entry for a repository and branch: full > branch > base.
    pub fn best_workspace_entry(
        &self,
        repository: &str,
        branch: &str,
    ) -> Result<Option<CacheHit>> {
        for level in CacheLevel::WORKSPACE_PREFERENCE {
            let key = CacheKey::new(repository, branch, None, level);
            if let Some(hit) = self.get(&key)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// All entries in the store.
    pub fn list_entries(&self) -> Result<Vec<(String, CacheMetadata)>> {
        let mut entries = Vec::new();
        let Ok(shards) = std::fs::read_dir(&self.root) else {
            return Ok(entries);
        };
        for shard in shards.flatten() {
            let Ok(files) = std::fs::read_dir(shard.path()) else {
                continue;
            };
            for file in files.flatten() {
                let name = file.file_name().to_string_lossy().to_string();
                let Some(hash) = name.strip_suffix(".metadata.json") else {
                    continue;
                };
                match self.read_metadata(&file.path()) {
                    Ok(metadata) => entries.push((hash.to_string(), metadata)),
                    Err(e) => tracing::warn!("skipping unreadable metadata {name}: {e}"),
                }
            }
        }
        Ok(entries)
    }

    fn remove_entry(&self, hash: &str) -> Result<()> {
        // Metadata first: a crash must not leave metadata pointing at nothing.
        let metadata_path = self.metadata_path(hash);
        if metadata_path.exists() {
            std::fs::remove_file(&metadata_path)
                .map_err(io_ctx(&metadata_path, "failed to remove"))?;
        }
        let payload = self.payload_path(hash);
        if payload.exists() {
            std::fs::remove_dir_all(&payload).map_err(io_ctx(&payload, "failed to remove"))?;
        }
        Ok(())
    }

    /// Deletes entries whose age (since last access) exceeds `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for (hash, metadata) in self.list_entries()? {
            if now - metadata.last_access > max_age {
                self.remove_entry(&hash)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes entries stale by their level's TTL.
    pub fn evict_stale(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for (hash, metadata) in self.list_entries()? {
            if now - metadata.last_access > metadata.cache_level.default_ttl() {
                self.remove_entry(&hash)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drops every entry for a repository.
    pub fn delete_repository(&self, repository: &str) -> Result<usize> {
        let normalized = normalize_repository(repository);
        let mut removed = 0;
        for (hash, metadata) in self.list_entries()? {
            if metadata.repository == normalized {
                self.remove_entry(&hash)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Wipes the store.
    pub fn delete_all(&self) -> Result<usize> {
        let entries = self.list_entries()?;
        let count = entries.len();
        for (hash, _) in entries {
            self.remove_entry(&hash)?;
        }
        Ok(count)
    }

    /// Stores a completed build's artifacts under the `build` level.
    pub fn store_build_artifacts(
        &self,
        repository: &str,
        branch: &str,
        commit: Option<&str>,
        artifacts_dir: &Path,
    ) -> Result<CacheMetadata> {
        let key = CacheKey::new(repository, branch, commit, CacheLevel::Build);
        self.store(&key, artifacts_dir)
    }
}
