//! End-to-end compile pipeline with a scripted container: cache-hit
//! short-circuit, split artifact naming, and progress-phase invariants.

mod fixtures;

use fixtures::*;
use glovebox::adapters::{ContainerAdapter, ContainerSpec};
use glovebox::cache::{CacheKey, CacheLevel, CacheStore};
use glovebox::cancel::CancellationToken;
use glovebox::compile::{CompilationDriver, CompilationRequest};
use glovebox::config::UserConfig;
use glovebox::error::Result;
use glovebox::models::results::BuildOutcome;
use glovebox::progress::middleware::{MiddlewareChain, StreamSource};
use glovebox::progress::{CompilePhase, ProgressCoordinator, ProgressEvent};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Container fake that simulates `west build` by writing UF2s for every
/// `-d build/<target>` occurrence, and records each invocation.
struct ScriptedContainer {
    exit_code: i32,
    invocations: Mutex<Vec<ContainerSpec>>,
    skip_targets: Vec<String>,
}

impl ScriptedContainer {
    fn new() -> Self {
        Self {
            exit_code: 0,
            invocations: Mutex::new(Vec::new()),
            skip_targets: Vec::new(),
        }
    }

    fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    fn all_commands(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .flat_map(|spec| spec.commands.clone())
            .collect()
    }
}

impl ContainerAdapter for ScriptedContainer {
    fn run(
        &self,
        spec: &ContainerSpec,
        chain: &mut MiddlewareChain,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        cancel.check()?;
        self.invocations.lock().unwrap().push(spec.clone());
        let host_root = &spec.mounts[0].host_path;
        for command in &spec.commands {
            if let Some(position) = command.find("-d build/") {
                let rest = &command[position + "-d build/".len()..];
                let target = rest.split_whitespace().next().unwrap().to_string();
                if self.skip_targets.contains(&target) {
                    continue;
                }
                let dir = host_root.join("build").join(&target).join("zephyr");
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("zmk.uf2"), b"UF2").unwrap();
                chain.process_line(
                    &format!("-- Board: {target}"),
                    StreamSource::Stdout,
                );
                chain.process_line("[100/100] Linking zmk.elf", StreamSource::Stdout);
                chain.process_line("Wrote 412 bytes to zmk.uf2", StreamSource::Stdout);
            }
        }
        Ok(self.exit_code)
    }
}

struct Pipeline {
    _cache_root: TempDir,
    cache: CacheStore,
    out_dir: TempDir,
    work_dir: TempDir,
    config: UserConfig,
}

impl Pipeline {
    fn new() -> Self {
        let cache_root = TempDir::new().unwrap();
        let cache = CacheStore::new(cache_root.path().to_path_buf()).unwrap();
        Self {
            _cache_root: cache_root,
            cache,
            out_dir: TempDir::new().unwrap(),
            work_dir: TempDir::new().unwrap(),
            config: UserConfig::default(),
        }
    }

    fn request(&self) -> CompilationRequest {
        let mut layout = minimal_layout();
        layout.keyboard = "glove80".to_string();
        CompilationRequest {
            layout,
            layout_basename: "mylayout".to_string(),
            output_dir: Some(self.out_dir.path().to_path_buf()),
            strategy_override: None,
            extra_conf: None,
            preserve_workspace: false,
            timestamps: false,
            work_root: Some(self.work_dir.path().to_path_buf()),
        }
    }

    fn seed_full_cache(&self, repository: &str, branch: &str) {
        let ws = TempDir::new().unwrap();
        populate_workspace(ws.path());
        let key = CacheKey::new(repository, branch, None, CacheLevel::Full);
        self.cache.store(&key, ws.path()).unwrap();
    }
}

fn observed_phases(receiver: &std::sync::mpsc::Receiver<ProgressEvent>) -> Vec<CompilePhase> {
    receiver
        .try_iter()
        .filter_map(|event| match event {
            ProgressEvent::PhaseChanged { to, .. } => Some(to),
            ProgressEvent::Updated { .. } => None,
        })
        .collect()
}

#[test]
fn cache_hit_skips_west_init_and_orders_phases() {
    let pipeline = Pipeline::new();
    pipeline.seed_full_cache("moergo-sc/zmk", "main");
    let container = ScriptedContainer::new();
    let (coordinator, receiver) = ProgressCoordinator::with_channel(256);
    let profile = glove_profile();

    let driver = CompilationDriver::new(
        &profile,
        &pipeline.config,
        &pipeline.cache,
        &container,
        Arc::new(coordinator),
        CancellationToken::new(),
    );
    let result = driver.compile(&pipeline.request());
    assert!(result.success, "errors: {:?}", result.errors);

    // Exactly one container invocation: the build. Setup never touched it.
    assert_eq!(container.invocation_count(), 1);
    let commands = container.all_commands();
    assert!(commands.iter().all(|c| !c.contains("west init")));
    assert!(commands.iter().all(|c| !c.contains("west update")));

    // CacheSetup is entered and left before WorkspaceSetup starts, and the
    // observed sequence is a prefix-consistent walk of the happy path.
    let phases = observed_phases(&receiver);
    let expected_order = [
        CompilePhase::Initializing,
        CompilePhase::CacheSetup,
        CompilePhase::WorkspaceSetup,
        CompilePhase::Building,
        CompilePhase::PostProcessing,
        CompilePhase::Completed,
    ];
    let mut last = None;
    for phase in &phases {
        let index = expected_order.iter().position(|p| p == phase).unwrap();
        if let Some(last) = last {
            assert!(index > last, "phase order violated: {phases:?}");
        }
        last = Some(index);
    }
    assert_eq!(phases.last(), Some(&CompilePhase::Completed));
}

#[test]
fn cache_miss_runs_dependency_fetch_before_building() {
    let pipeline = Pipeline::new();
    let container = ScriptedContainer::new();
    let (coordinator, receiver) = ProgressCoordinator::with_channel(256);
    let profile = glove_profile();

    let driver = CompilationDriver::new(
        &profile,
        &pipeline.config,
        &pipeline.cache,
        &container,
        Arc::new(coordinator),
        CancellationToken::new(),
    );
    let result = driver.compile(&pipeline.request());
    assert!(result.success, "errors: {:?}", result.errors);

    // Two invocations: west init/update, then the build.
    assert_eq!(container.invocation_count(), 2);
    let commands = container.all_commands();
    assert!(commands.iter().any(|c| c.contains("west init")));
    assert!(commands.iter().any(|c| c.contains("west build")));

    let phases = observed_phases(&receiver);
    let fetch = phases
        .iter()
        .position(|p| *p == CompilePhase::DependencyFetch)
        .unwrap();
    let build = phases
        .iter()
        .position(|p| *p == CompilePhase::Building)
        .unwrap();
    assert!(fetch < build);
}

#[test]
fn split_firmware_default_naming() {
    let pipeline = Pipeline::new();
    let container = ScriptedContainer::new();
    let profile = glove_profile();

    let driver = CompilationDriver::new(
        &profile,
        &pipeline.config,
        &pipeline.cache,
        &container,
        Arc::new(ProgressCoordinator::new()),
        CancellationToken::new(),
    );
    let result = driver.compile(&pipeline.request());

    assert!(result.success);
    assert_eq!(result.outcome, BuildOutcome::Success);
    let out: &Path = pipeline.out_dir.path();
    assert!(out.join("mylayout_lh.uf2").exists());
    assert!(out.join("mylayout_rh.uf2").exists());
    assert!(out.join("mylayout_artefacts.zip").exists());

    let files = result.output_files.unwrap();
    assert!(files.left_uf2.is_some());
    assert!(files.right_uf2.is_some());
    assert!(files.main_uf2.is_none());
}

#[test]
fn single_side_build_is_partial_and_not_cached_at_build_level() {
    let pipeline = Pipeline::new();
    let mut container = ScriptedContainer::new();
    container.skip_targets = vec!["glove80_rh".to_string()];
    let profile = glove_profile();

    let driver = CompilationDriver::new(
        &profile,
        &pipeline.config,
        &pipeline.cache,
        &container,
        Arc::new(ProgressCoordinator::new()),
        CancellationToken::new(),
    );
    let result = driver.compile(&pipeline.request());

    assert!(result.success);
    assert_eq!(result.outcome, BuildOutcome::PartialSuccess);

    let build_key = CacheKey::new("moergo-sc/zmk", "main", None, CacheLevel::Build);
    assert!(pipeline.cache.get(&build_key).unwrap().is_none());
}

#[test]
fn successful_build_promotes_workspace_and_artifacts() {
    let pipeline = Pipeline::new();
    let container = ScriptedContainer::new();
    let profile = glove_profile();

    let driver = CompilationDriver::new(
        &profile,
        &pipeline.config,
        &pipeline.cache,
        &container,
        Arc::new(ProgressCoordinator::new()),
        CancellationToken::new(),
    );
    let result = driver.compile(&pipeline.request());
    assert!(result.success);

    let full_key = CacheKey::new("moergo-sc/zmk", "main", None, CacheLevel::Full);
    assert!(pipeline.cache.get(&full_key).unwrap().is_some());
    let build_key = CacheKey::new("moergo-sc/zmk", "main", None, CacheLevel::Build);
    assert!(pipeline.cache.get(&build_key).unwrap().is_some());
}

#[test]
fn container_failure_reports_kind_and_phase() {
    let pipeline = Pipeline::new();
    pipeline.seed_full_cache("moergo-sc/zmk", "main");
    let mut container = ScriptedContainer::new();
    container.exit_code = 2;
    let (coordinator, receiver) = ProgressCoordinator::with_channel(256);
    let profile = glove_profile();

    let driver = CompilationDriver::new(
        &profile,
        &pipeline.config,
        &pipeline.cache,
        &container,
        Arc::new(coordinator),
        CancellationToken::new(),
    );
    let result = driver.compile(&pipeline.request());

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("container_failed"));
    let phases = observed_phases(&receiver);
    assert_eq!(phases.last(), Some(&CompilePhase::Failed));
    assert_eq!(
        phases.iter().filter(|p| **p == CompilePhase::Failed).count(),
        1
    );
}
