//! Build workspace materialization.
//!
//! A workspace is seeded from the cache store when a matching entry exists,
//! otherwise initialized from scratch with `west init/update` inside the
//! container. Workspaces are scoped resources: promoted into the cache on
//! success, deleted on error unless preservation was requested.

use crate::adapters::{ContainerAdapter, ContainerSpec, VolumeMount};
use crate::cache::copy::{copy_tree, CopyProgressCallback};
use crate::cache::{CacheKey, CacheLevel, CacheStore};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::progress::middleware::MiddlewareChain;
use crate::progress::ProgressCoordinator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Container-side mount point for the workspace.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// What a workspace needs to be prepared.
#[derive(Debug, Clone)]
pub struct WorkspaceRequest {
    pub repository: String,
    pub branch: String,
    pub image: String,
    pub target_path: PathBuf,
    /// Host uid/gid to run the container as, when user mapping is enabled.
    pub user: Option<(u32, u32)>,
    /// Keep the directory on error for post-mortem inspection.
    pub preserve_on_error: bool,
}

/// A prepared workspace with scoped cleanup.
///
/// Call [`ScopedWorkspace::promote`] (or [`ScopedWorkspace::keep`]) on
/// success; dropping without either deletes the directory unless
/// preservation was requested.
#[derive(Debug)]
pub struct ScopedWorkspace {
    path: PathBuf,
    /// Cache level the seed came from, if any.
    pub seeded_from: Option<CacheLevel>,
    preserve_on_error: bool,
    released: bool,
}

impl ScopedWorkspace {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Promotes the workspace into the cache at the given level and keeps it.
    pub fn promote(
        mut self,
        cache: &CacheStore,
        repository: &str,
        branch: &str,
        level: CacheLevel,
    ) -> Result<()> {
        let key = CacheKey::new(repository, branch, None, level);
        match cache.store(&key, &self.path) {
            Ok(_) => {
                self.released = true;
                Ok(())
            }
            // Another process is caching the same key; the build succeeded
            // regardless, so keep the workspace and move on.
            Err(Error::CacheLocked(_)) => {
                tracing::warn!("cache key locked by another process, skipping promotion");
                self.released = true;
                Ok(())
            }
            Err(e) => {
                self.released = true;
                Err(e)
            }
        }
    }

    /// Keeps the directory without caching it.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        self.path.clone()
    }
}

impl Drop for ScopedWorkspace {
    fn drop(&mut self) {
        if !self.released && !self.preserve_on_error {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Seeds `target_path` from the best cache entry, if one exists.
///
/// Copy progress is mirrored into the coordinator; cancellation aborts at a
/// file boundary and removes the partial destination.
pub fn seed_from_cache(
    request: &WorkspaceRequest,
    cache: &CacheStore,
    coordinator: &Arc<ProgressCoordinator>,
    cancel: &CancellationToken,
) -> Result<Option<CacheLevel>> {
    let Some(hit) = cache.best_workspace_entry(&request.repository, &request.branch)? else {
        tracing::debug!(
            "no cached workspace for {}@{}",
            request.repository,
            request.branch
        );
        return Ok(None);
    };

    let level = hit.metadata.cache_level;
    tracing::info!(
        "seeding workspace from {level} cache entry ({} bytes)",
        hit.metadata.size_bytes
    );

    let progress_coordinator = Arc::clone(coordinator);
    let callback: CopyProgressCallback = Arc::new(move |p| {
        progress_coordinator.update_copy_progress(p);
    });
    copy_tree(&hit.payload, &request.target_path, Some(callback), cancel)?;
    Ok(Some(level))
}

/// Runs `west init/update/zephyr-export` inside the container.
///
/// `skip_init` is set when a cached seed already carries `.west/`.
pub fn fetch_dependencies(
    request: &WorkspaceRequest,
    container: &dyn ContainerAdapter,
    chain: &mut MiddlewareChain,
    cancel: &CancellationToken,
    skip_init: bool,
) -> Result<()> {
    cancel.check()?;

    let mut commands = Vec::new();
    if !skip_init {
        commands.push(format!("west init -l {CONTAINER_WORKSPACE}/config"));
    }
    commands.push("west update".to_string());
    commands.push("west zephyr-export".to_string());

    let mut spec = ContainerSpec::new(request.image.clone());
    spec.mounts.push(VolumeMount::read_write(
        request.target_path.clone(),
        CONTAINER_WORKSPACE,
    ));
    spec.working_dir = Some(CONTAINER_WORKSPACE.to_string());
    spec.user = request.user;
    spec.commands = commands;

    let exit_code = container.run(&spec, chain, cancel)?;
    if exit_code != 0 {
        let stage = if skip_init { "west_update" } else { "west_init" };
        return Err(Error::workspace(
            stage,
            format!("west exited with code {exit_code}"),
        ));
    }
    Ok(())
}

/// Creates the workspace directory structure and returns the scoped handle.
pub fn create_workspace(request: &WorkspaceRequest) -> Result<ScopedWorkspace> {
    std::fs::create_dir_all(&request.target_path)
        .map_err(|e| Error::workspace("copy", format!("failed to create workspace: {e}")))?;
    std::fs::create_dir_all(request.target_path.join("config"))
        .map_err(|e| Error::workspace("copy", format!("failed to create config dir: {e}")))?;
    Ok(ScopedWorkspace {
        path: request.target_path.clone(),
        seeded_from: None,
        preserve_on_error: request.preserve_on_error,
        released: false,
    })
}

/// Full preparation: cache seed, directory structure, dependency fetch.
///
/// A `full`-level seed skips the container entirely; a partial seed still
/// runs `west update`; a miss runs the whole init sequence.
pub fn prepare_workspace(
    request: &WorkspaceRequest,
    cache: &CacheStore,
    container: &dyn ContainerAdapter,
    coordinator: &Arc<ProgressCoordinator>,
    chain: &mut MiddlewareChain,
    cancel: &CancellationToken,
) -> Result<ScopedWorkspace> {
    use crate::progress::CompilePhase;

    coordinator.transition_to(CompilePhase::CacheSetup, "Checking workspace cache");
    let seeded_from = seed_from_cache(request, cache, coordinator, cancel)?;

    coordinator.transition_to(CompilePhase::WorkspaceSetup, "Preparing workspace");
    cancel.check()?;
    let mut workspace = create_workspace(request)?;
    workspace.seeded_from = seeded_from;

    match seeded_from {
        Some(CacheLevel::Full | CacheLevel::Build) => {
            tracing::info!("full cache hit, skipping dependency fetch");
        }
        Some(_) => {
            coordinator.transition_to(CompilePhase::DependencyFetch, "Updating dependencies");
            fetch_dependencies(request, container, chain, cancel, true).inspect_err(|_| {
                discard_on_error(&mut workspace);
            })?;
        }
        None => {
            coordinator.transition_to(
                CompilePhase::DependencyFetch,
                "Downloading dependencies (west update, this can take a while)",
            );
            fetch_dependencies(request, container, chain, cancel, false).inspect_err(|_| {
                discard_on_error(&mut workspace);
            })?;
        }
    }

    Ok(workspace)
}

fn discard_on_error(workspace: &mut ScopedWorkspace) {
    if workspace.preserve_on_error {
        tracing::info!(
            "preserving failed workspace for inspection: {}",
            workspace.path.display()
        );
        workspace.released = true;
    }
    // Otherwise Drop removes the directory.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::middleware::StreamSource;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted container: records invocations, replays canned output.
    pub struct FakeContainer {
        pub exit_code: i32,
        pub output_lines: Vec<String>,
        pub invocations: Mutex<Vec<ContainerSpec>>,
    }

    impl FakeContainer {
        pub fn succeeding(lines: &[&str]) -> Self {
            Self {
                exit_code: 0,
                output_lines: lines.iter().map(|s| (*s).to_string()).collect(),
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    impl ContainerAdapter for FakeContainer {
        fn run(
            &self,
            spec: &ContainerSpec,
            chain: &mut MiddlewareChain,
            cancel: &CancellationToken,
        ) -> Result<i32> {
            cancel.check()?;
            self.invocations.lock().unwrap().push(spec.clone());
            for line in &self.output_lines {
                chain.process_line(line, StreamSource::Stdout);
            }
            Ok(self.exit_code)
        }
    }

    fn cached_store_with_full_entry(root: &Path) -> CacheStore {
        let store = CacheStore::new(root.to_path_buf()).unwrap();
        let workspace = TempDir::new().unwrap();
        for component in ["zmk", "zephyr", "modules", ".west"] {
            fs::create_dir_all(workspace.path().join(component)).unwrap();
            fs::write(workspace.path().join(component).join("marker"), "x").unwrap();
        }
        let key = CacheKey::new("zmkfirmware/zmk", "main", None, CacheLevel::Full);
        store.store(&key, workspace.path()).unwrap();
        store
    }

    fn request(target: PathBuf) -> WorkspaceRequest {
        WorkspaceRequest {
            repository: "zmkfirmware/zmk".to_string(),
            branch: "main".to_string(),
            image: "zmkfirmware/zmk-build-arm:stable".to_string(),
            target_path: target,
            user: None,
            preserve_on_error: false,
        }
    }

    #[test]
    fn test_full_cache_hit_never_invokes_container() {
        let cache_root = TempDir::new().unwrap();
        let store = cached_store_with_full_entry(cache_root.path());
        let work = TempDir::new().unwrap();
        let container = FakeContainer::succeeding(&[]);
        let coordinator = Arc::new(ProgressCoordinator::new());
        let mut chain = MiddlewareChain::new();

        let workspace = prepare_workspace(
            &request(work.path().join("build")),
            &store,
            &container,
            &coordinator,
            &mut chain,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(workspace.seeded_from, Some(CacheLevel::Full));
        assert!(workspace.path().join("zmk/marker").exists());
        assert!(container.invocations.lock().unwrap().is_empty());
        workspace.keep();
    }

    #[test]
    fn test_cache_setup_precedes_workspace_setup() {
        use crate::progress::CompilePhase;

        let cache_root = TempDir::new().unwrap();
        let store = cached_store_with_full_entry(cache_root.path());
        let work = TempDir::new().unwrap();
        let container = FakeContainer::succeeding(&[]);
        let (coordinator, receiver) = ProgressCoordinator::with_channel(64);
        let coordinator = Arc::new(coordinator);
        let mut chain = MiddlewareChain::new();

        prepare_workspace(
            &request(work.path().join("build")),
            &store,
            &container,
            &coordinator,
            &mut chain,
            &CancellationToken::new(),
        )
        .unwrap()
        .keep();

        drop(coordinator);
        let phases: Vec<CompilePhase> = receiver
            .iter()
            .filter_map(|e| match e {
                crate::progress::ProgressEvent::PhaseChanged { to, .. } => Some(to),
                crate::progress::ProgressEvent::Updated { .. } => None,
            })
            .collect();
        let cache_idx = phases
            .iter()
            .position(|p| *p == CompilePhase::CacheSetup)
            .unwrap();
        let setup_idx = phases
            .iter()
            .position(|p| *p == CompilePhase::WorkspaceSetup)
            .unwrap();
        assert!(cache_idx < setup_idx);
    }

    #[test]
    fn test_miss_runs_west_init_sequence() {
        let cache_root = TempDir::new().unwrap();
        let store = CacheStore::new(cache_root.path().to_path_buf()).unwrap();
        let work = TempDir::new().unwrap();
        let container = FakeContainer::succeeding(&["west update complete"]);
        let coordinator = Arc::new(ProgressCoordinator::new());
        let mut chain = MiddlewareChain::new();

        prepare_workspace(
            &request(work.path().join("build")),
            &store,
            &container,
            &coordinator,
            &mut chain,
            &CancellationToken::new(),
        )
        .unwrap()
        .keep();

        let invocations = container.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        let commands = invocations[0].commands.join(" && ");
        assert!(commands.contains("west init"));
        assert!(commands.contains("west update"));
        assert!(commands.contains("west zephyr-export"));
    }

    #[test]
    fn test_failed_fetch_discards_workspace() {
        let cache_root = TempDir::new().unwrap();
        let store = CacheStore::new(cache_root.path().to_path_buf()).unwrap();
        let work = TempDir::new().unwrap();
        let target = work.path().join("build");
        let container = FakeContainer {
            exit_code: 1,
            output_lines: Vec::new(),
            invocations: Mutex::new(Vec::new()),
        };
        let coordinator = Arc::new(ProgressCoordinator::new());
        let mut chain = MiddlewareChain::new();

        let err = prepare_workspace(
            &request(target.clone()),
            &store,
            &container,
            &coordinator,
            &mut chain,
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), "workspace_setup_failed");
        assert!(!target.exists());
    }

    #[test]
    fn test_cancellation_before_fetch() {
        let cache_root = TempDir::new().unwrap();
        let store = CacheStore::new(cache_root.path().to_path_buf()).unwrap();
        let work = TempDir::new().unwrap();
        let container = FakeContainer::succeeding(&[]);
        let coordinator = Arc::new(ProgressCoordinator::new());
        let mut chain = MiddlewareChain::new();

        let token = CancellationToken::new();
        token.cancel();
        let err = prepare_workspace(
            &request(work.path().join("build")),
            &store,
            &container,
            &coordinator,
            &mut chain,
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
