//! Firmware compilation driver.
//!
//! Strategy-dispatched pipeline: layout compilation, workspace preparation
//! (seeded from cache where possible), a single container invocation running
//! `west build` per matrix target, and artifact collection. The driver owns
//! the phase machine and is the only component that decides transitions
//! outside of container-output detection.

pub mod artifacts;
pub mod strategy;

pub use strategy::{CompileStrategy, MoergoConfig, ZmkConfig};

use crate::adapters::{fs as fsutil, ContainerAdapter, ContainerSpec, VolumeMount};
use crate::cache::{CacheKey, CacheLevel, CacheStore};
use crate::cancel::CancellationToken;
use crate::config::UserConfig;
use crate::constants::CONTAINER_LOG_TAIL;
use crate::error::{Error, Result};
use crate::generator::{compile_layout, GeneratorOptions};
use crate::models::results::BuildOutcome;
use crate::models::{BuildMatrix, BuildResult, LayoutData};
use crate::profile::KeyboardProfile;
use crate::progress::middleware::{
    CompilationProgressMiddleware, LogFilterMiddleware, LogTailMiddleware, MiddlewareChain,
};
use crate::progress::{CompilePhase, ProgressCoordinator};
use crate::workspace::{self, WorkspaceRequest, CONTAINER_WORKSPACE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// One compile invocation.
#[derive(Debug, Clone)]
pub struct CompilationRequest {
    pub layout: LayoutData,
    /// Layout file stem, used for default artifact naming.
    pub layout_basename: String,
    /// Output directory; defaults to the working directory.
    pub output_dir: Option<PathBuf>,
    pub strategy_override: Option<String>,
    /// Extra Kconfig text appended after the generated fragment (the
    /// user-supplied conf that may accompany a keymap input).
    pub extra_conf: Option<String>,
    /// Keep the workspace on failure for post-mortem inspection.
    pub preserve_workspace: bool,
    /// Disable for byte-reproducible keymap output.
    pub timestamps: bool,
    /// Where the transient workspace is created; defaults to a temp dir.
    pub work_root: Option<PathBuf>,
}

/// Drives one compilation end to end.
pub struct CompilationDriver<'a> {
    profile: &'a KeyboardProfile,
    user_config: &'a UserConfig,
    cache: &'a CacheStore,
    container: &'a dyn ContainerAdapter,
    coordinator: Arc<ProgressCoordinator>,
    cancel: CancellationToken,
}

impl<'a> CompilationDriver<'a> {
    pub fn new(
        profile: &'a KeyboardProfile,
        user_config: &'a UserConfig,
        cache: &'a CacheStore,
        container: &'a dyn ContainerAdapter,
        coordinator: Arc<ProgressCoordinator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            profile,
            user_config,
            cache,
            container,
            coordinator,
            cancel,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> Arc<ProgressCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Runs the compile, translating errors into the result record. The
    /// phase machine always ends in `Completed` or `Failed`.
    pub fn compile(&self, request: &CompilationRequest) -> BuildResult {
        let started = Instant::now();
        let mut result = BuildResult::new();
        result.build_id = Some(uuid::Uuid::new_v4().to_string());

        match self.run(request, &mut result, started) {
            Ok(()) => {
                self.coordinator
                    .transition_to(CompilePhase::Completed, "Build complete");
            }
            Err(error) => {
                self.coordinator
                    .transition_to(CompilePhase::Failed, &error.to_string());
                result.fail(&error);
            }
        }
        result.build_time_seconds = Some(started.elapsed().as_secs_f64());
        result
    }

    fn check_deadline(&self, started: Instant) -> Result<()> {
        if let Some(limit) = self.user_config.compile_timeout_secs {
            if started.elapsed().as_secs() > limit {
                return Err(Error::BuildFailed(format!(
                    "compile exceeded wall-clock limit of {limit}s"
                )));
            }
        }
        Ok(())
    }

    fn run(
        &self,
        request: &CompilationRequest,
        result: &mut BuildResult,
        started: Instant,
    ) -> Result<()> {
        self.cancel.check()?;
        self.coordinator
            .transition_to(CompilePhase::Initializing, "Compiling layout");

        if !self.profile.has_firmware() {
            return Err(Error::FirmwareNotFound {
                keyboard: self.profile.keyboard_name().to_string(),
                firmware: "(none selected)".to_string(),
            });
        }

        let compiled = compile_layout(
            self.profile,
            &request.layout,
            GeneratorOptions {
                timestamps: request.timestamps,
            },
        )?;
        result.add_message(format!(
            "compiled layout with {} layers",
            compiled.layer_count
        ));

        let strategy = CompileStrategy::from_profile(
            self.profile,
            request.strategy_override.as_deref(),
        )?;
        result.add_message(format!("using {} strategy", strategy.name()));

        let uid_gid = if strategy.user_mapping_enabled(self.user_config.docker.enable_user_mapping)
        {
            host_uid_gid()
        } else {
            None
        };

        let work_root = match &request.work_root {
            Some(root) => root.clone(),
            None => std::env::temp_dir().join(format!("glovebox-build-{}", std::process::id())),
        };
        let workspace_request = WorkspaceRequest {
            repository: strategy.repository().to_string(),
            branch: strategy.branch().to_string(),
            image: strategy.image().to_string(),
            target_path: work_root.join("workspace"),
            user: uid_gid,
            preserve_on_error: request.preserve_workspace,
        };

        let mut chain = MiddlewareChain::new();
        let progress_middleware = CompilationProgressMiddleware::new(
            self.coordinator(),
            &self.profile.keyboard_config.progress_patterns,
        )?;
        let tail_middleware = LogTailMiddleware::new(CONTAINER_LOG_TAIL);
        let log_tail = tail_middleware.handle();
        chain = chain
            .with(Box::new(progress_middleware))
            .with(Box::new(LogFilterMiddleware))
            .with(Box::new(tail_middleware));

        self.check_deadline(started)?;
        let workspace = self.prepare_workspace_with_retry(
            &strategy,
            &workspace_request,
            &mut chain,
        )?;

        // Config prep: the generated keymap and conf land in the workspace.
        let config_dir = workspace.path().join("config");
        let keyboard = self.profile.keyboard_name();
        fsutil::atomic_write(
            &config_dir.join(format!("{keyboard}.keymap")),
            &compiled.keymap,
        )?;
        let mut conf = compiled.conf.clone();
        if let Some(extra) = &request.extra_conf {
            if !conf.ends_with('\n') && !conf.is_empty() {
                conf.push('\n');
            }
            conf.push_str(extra);
        }
        fsutil::atomic_write(&config_dir.join(format!("{keyboard}.conf")), &conf)?;

        let matrix = load_matrix(workspace.path(), &strategy);
        if matrix.is_empty() {
            return Err(Error::BuildFailed(
                "build matrix resolved to zero targets".to_string(),
            ));
        }
        self.coordinator.set_total_boards(matrix.len());

        self.check_deadline(started)?;
        self.cancel.check()?;
        self.coordinator
            .transition_to(CompilePhase::Building, "Compiling firmware");
        let exit_code = self.run_build_container(
            &strategy,
            &workspace_request,
            &matrix,
            &mut chain,
        )?;
        if exit_code != 0 {
            return Err(Error::ContainerFailed {
                exit_code,
                log_tail: log_tail.lines(),
            });
        }

        self.check_deadline(started)?;
        self.coordinator
            .transition_to(CompilePhase::PostProcessing, "Collecting artifacts");
        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let (output_files, outcome) = artifacts::collect_artifacts(
            &workspace.path().join("build"),
            &matrix,
            &output_dir,
            &request.layout_basename,
        )?;
        result.outcome = outcome;
        for uf2 in output_files.uf2_files() {
            result.add_message(format!("firmware written to {}", uf2.display()));
        }

        // Promote the workspace, then the build artifacts. A partial split
        // build never populates the build cache level.
        if strategy.uses_workspace_cache() {
            if outcome == BuildOutcome::Success {
                let build_key = CacheKey::new(
                    strategy.repository(),
                    strategy.branch(),
                    None,
                    CacheLevel::Build,
                );
                if let Err(e) = self.cache.store(&build_key, &output_dir) {
                    tracing::warn!("failed to cache build artifacts: {e}");
                }
            }
            workspace.promote(
                self.cache,
                strategy.repository(),
                strategy.branch(),
                CacheLevel::Full,
            )?;
        } else {
            // No cache for this strategy; the transient directory goes away.
            drop(workspace);
        }

        result.output_files = Some(output_files);
        Ok(())
    }

    /// Workspace preparation with a single retry after cache corruption.
    fn prepare_workspace_with_retry(
        &self,
        strategy: &CompileStrategy,
        request: &WorkspaceRequest,
        chain: &mut MiddlewareChain,
    ) -> Result<workspace::ScopedWorkspace> {
        if !strategy.uses_workspace_cache() {
            // Strategies without a west workspace still walk the phase
            // sequence so observers always see the same prefix.
            self.coordinator
                .transition_to(CompilePhase::CacheSetup, "Cache not used");
            self.coordinator
                .transition_to(CompilePhase::WorkspaceSetup, "Preparing build directory");
            let ws = workspace::create_workspace(request)?;
            self.coordinator
                .transition_to(CompilePhase::DependencyFetch, "Dependencies are image-provided");
            return Ok(ws);
        }

        match workspace::prepare_workspace(
            request,
            self.cache,
            self.container,
            &self.coordinator,
            chain,
            &self.cancel,
        ) {
            Err(Error::CacheCorrupt(message)) => {
                tracing::warn!("cache corrupt ({message}), evicted; retrying once");
                workspace::prepare_workspace(
                    request,
                    self.cache,
                    self.container,
                    &self.coordinator,
                    chain,
                    &self.cancel,
                )
            }
            other => other,
        }
    }

    fn run_build_container(
        &self,
        strategy: &CompileStrategy,
        workspace_request: &WorkspaceRequest,
        matrix: &BuildMatrix,
        chain: &mut MiddlewareChain,
    ) -> Result<i32> {
        let mut spec = ContainerSpec::new(strategy.image().to_string());
        spec.mounts.push(VolumeMount::read_write(
            workspace_request.target_path.clone(),
            CONTAINER_WORKSPACE,
        ));
        spec.working_dir = Some(CONTAINER_WORKSPACE.to_string());
        spec.user = workspace_request.user;

        match strategy {
            CompileStrategy::ZmkConfig(_) => {
                for target in &matrix.include {
                    let mut command = format!(
                        "west build -p -s zmk/app -d build/{} -b {}",
                        target.build_dir_name(),
                        target.board
                    );
                    if let Some(snippet) = &target.snippet {
                        command.push_str(&format!(" -S {snippet}"));
                    }
                    command.push_str(&format!(
                        " -- -DZMK_CONFIG={CONTAINER_WORKSPACE}/config"
                    ));
                    if let Some(shield) = &target.shield {
                        command.push_str(&format!(" -DSHIELD={shield}"));
                    }
                    for arg in &target.cmake_args {
                        command.push(' ');
                        command.push_str(arg);
                    }
                    spec.commands.push(command);
                }
            }
            CompileStrategy::Moergo(_) => {
                // The Moergo image carries its own Nix toolchain entrypoint;
                // it reads /workspace/config and writes per-board trees under
                // /workspace/build in the same layout west build uses.
                spec.commands.push(format!(
                    "glove80-build {CONTAINER_WORKSPACE}/config {CONTAINER_WORKSPACE}/build"
                ));
            }
        }

        self.container.run(&spec, chain, &self.cancel)
    }
}

/// Host uid/gid for container user mapping.
fn host_uid_gid() -> Option<(u32, u32)> {
    // Without a libc dependency the uid is read from the environment the way
    // login shells export it; absence simply disables mapping.
    let uid = std::env::var("UID").ok()?.parse().ok()?;
    let gid = std::env::var("GID")
        .ok()
        .and_then(|g| g.parse().ok())
        .unwrap_or(uid);
    Some((uid, gid))
}

/// Build matrix: the repository's `build.yaml` when present, else the
/// strategy's default boards.
fn load_matrix(workspace_path: &Path, strategy: &CompileStrategy) -> BuildMatrix {
    for candidate in [
        workspace_path.join("config").join("build.yaml"),
        workspace_path.join("build.yaml"),
        workspace_path.join("zmk").join("app").join("build.yaml"),
    ] {
        let Ok(content) = std::fs::read_to_string(&candidate) else {
            continue;
        };
        match BuildMatrix::from_yaml(&content) {
            Ok(matrix) if !matrix.is_empty() => {
                tracing::debug!("build matrix from {}", candidate.display());
                return matrix;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("ignoring invalid {}: {e}", candidate.display()),
        }
    }
    strategy.default_matrix()
}
