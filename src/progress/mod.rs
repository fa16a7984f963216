//! Compilation progress: phase machine, coordinator, and event channel.
//!
//! The coordinator owns the single progress record; displays receive
//! immutable snapshots over a bounded channel (or via callback wrappers) and
//! never mutate. Phase transitions are one-way along the happy path with one
//! terminal `Failed`.

pub mod middleware;

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

/// Build pipeline phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilePhase {
    Idle,
    Initializing,
    CacheSetup,
    WorkspaceSetup,
    DependencyFetch,
    Building,
    PostProcessing,
    Completed,
    Failed,
}

impl CompilePhase {
    /// Position in the happy-path sequence; `Failed` sits outside it.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Idle => 0,
            Self::Initializing => 1,
            Self::CacheSetup => 2,
            Self::WorkspaceSetup => 3,
            Self::DependencyFetch => 4,
            Self::Building => 5,
            Self::PostProcessing => 6,
            Self::Completed => 7,
            Self::Failed => 8,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Number of stages shown to the user (the happy path).
    pub const TOTAL_STAGES: usize = 8;
}

impl std::fmt::Display for CompilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::CacheSetup => "Cache setup",
            Self::WorkspaceSetup => "Workspace setup",
            Self::DependencyFetch => "Dependency fetch",
            Self::Building => "Building",
            Self::PostProcessing => "Post-processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// The single record updated throughout a build. Only the coordinator
/// mutates it; everyone else sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationProgress {
    pub phase: CompilePhase,
    pub description: String,
    pub current_stage: usize,
    pub total_stages: usize,

    // Dependency fetch counters.
    pub repositories_downloaded: usize,
    pub total_repositories: usize,
    pub current_repository: String,
    pub objects_received: usize,
    pub total_objects: usize,
    pub transfer_speed_kb_s: f64,

    // Build counters.
    pub boards_completed: usize,
    pub total_boards: usize,
    pub current_board: String,
    pub build_step: usize,
    pub build_total_steps: usize,

    // Cache copy counters.
    pub files_copied: usize,
    pub total_files: usize,
    pub bytes_copied: u64,
    pub total_bytes: u64,
}

impl Default for CompilationProgress {
    fn default() -> Self {
        Self {
            phase: CompilePhase::Idle,
            description: String::new(),
            current_stage: 0,
            total_stages: CompilePhase::TOTAL_STAGES,
            repositories_downloaded: 0,
            total_repositories: 0,
            current_repository: String::new(),
            objects_received: 0,
            total_objects: 0,
            transfer_speed_kb_s: 0.0,
            boards_completed: 0,
            total_boards: 0,
            current_board: String::new(),
            build_step: 0,
            build_total_steps: 0,
            files_copied: 0,
            total_files: 0,
            bytes_copied: 0,
            total_bytes: 0,
        }
    }
}

/// Event published on every transition and sub-step update.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PhaseChanged {
        from: CompilePhase,
        to: CompilePhase,
        snapshot: CompilationProgress,
    },
    Updated {
        snapshot: CompilationProgress,
    },
}

/// Synchronous observer convenience wrappers.
pub type PhaseCallback = Arc<dyn Fn(CompilePhase, CompilePhase) + Send + Sync>;
pub type UpdateCallback = Arc<dyn Fn(&CompilationProgress) + Send + Sync>;

/// Owns the progress record and publishes snapshots.
pub struct ProgressCoordinator {
    progress: Mutex<CompilationProgress>,
    sender: Option<SyncSender<ProgressEvent>>,
    phase_callback: Option<PhaseCallback>,
    update_callback: Option<UpdateCallback>,
}

impl ProgressCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            progress: Mutex::new(CompilationProgress::default()),
            sender: None,
            phase_callback: None,
            update_callback: None,
        }
    }

    /// Coordinator publishing over a bounded event channel.
    #[must_use]
    pub fn with_channel(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = std::sync::mpsc::sync_channel(capacity);
        let mut coordinator = Self::new();
        coordinator.sender = Some(sender);
        (coordinator, receiver)
    }

    pub fn set_phase_callback(&mut self, callback: PhaseCallback) {
        self.phase_callback = Some(callback);
    }

    pub fn set_update_callback(&mut self, callback: UpdateCallback) {
        self.update_callback = Some(callback);
    }

    /// Immutable snapshot of the current record.
    #[must_use]
    pub fn snapshot(&self) -> CompilationProgress {
        self.progress.lock().expect("progress lock poisoned").clone()
    }

    #[must_use]
    pub fn current_phase(&self) -> CompilePhase {
        self.progress.lock().expect("progress lock poisoned").phase
    }

    /// Moves the machine forward. Backward transitions are ignored with a
    /// warning so that late-arriving output cannot rewind the display;
    /// transitions out of a terminal phase are ignored outright.
    pub fn transition_to(&self, phase: CompilePhase, description: &str) {
        let (event, snapshot) = {
            let mut progress = self.progress.lock().expect("progress lock poisoned");
            let from = progress.phase;
            if from == phase {
                return;
            }
            if from.is_terminal() {
                return;
            }
            if phase != CompilePhase::Failed && phase.index() <= from.index() {
                tracing::warn!("ignoring backward phase transition {from} -> {phase}");
                return;
            }
            progress.phase = phase;
            progress.description = description.to_string();
            progress.current_stage = progress.current_stage.max(phase.index().min(
                CompilePhase::TOTAL_STAGES - 1,
            ));
            let snapshot = progress.clone();
            (
                ProgressEvent::PhaseChanged {
                    from,
                    to: phase,
                    snapshot: snapshot.clone(),
                },
                snapshot,
            )
        };

        tracing::debug!("phase transition: {}", snapshot.phase);
        if let ProgressEvent::PhaseChanged { from, to, .. } = &event {
            if let Some(callback) = &self.phase_callback {
                callback(*from, *to);
            }
        }
        self.publish(event, true);
        self.notify_update(&snapshot);
    }

    fn publish(&self, event: ProgressEvent, must_deliver: bool) {
        let Some(sender) = &self.sender else {
            return;
        };
        if must_deliver {
            // Phase changes block rather than drop so observers see every
            // boundary, preserving the prefix invariant.
            let _ = sender.send(event);
        } else {
            match sender.try_send(event) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn notify_update(&self, snapshot: &CompilationProgress) {
        if let Some(callback) = &self.update_callback {
            callback(snapshot);
        }
    }

    /// Applies a mutation to the record and publishes an update event.
    fn update<F: FnOnce(&mut CompilationProgress)>(&self, mutate: F) {
        let snapshot = {
            let mut progress = self.progress.lock().expect("progress lock poisoned");
            mutate(&mut progress);
            progress.clone()
        };
        self.publish(
            ProgressEvent::Updated {
                snapshot: snapshot.clone(),
            },
            false,
        );
        self.notify_update(&snapshot);
    }

    /// Sets the expected repository count for the dependency fetch.
    pub fn set_total_repositories(&self, total: usize) {
        self.update(|p| p.total_repositories = p.total_repositories.max(total));
    }

    /// Records a repository download starting.
    pub fn update_repository_progress(&self, repository: &str) {
        self.update(|p| {
            p.current_repository = repository.to_string();
            p.repositories_downloaded += 1;
            p.total_repositories = p.total_repositories.max(p.repositories_downloaded);
        });
    }

    /// Records git transfer counters for the current repository.
    pub fn update_git_transfer(
        &self,
        objects_received: usize,
        total_objects: usize,
        transfer_speed_kb_s: Option<f64>,
    ) {
        self.update(|p| {
            p.objects_received = objects_received;
            p.total_objects = total_objects;
            if let Some(speed) = transfer_speed_kb_s {
                p.transfer_speed_kb_s = speed;
            }
        });
    }

    /// Sets the number of boards in the build matrix.
    pub fn set_total_boards(&self, total: usize) {
        self.update(|p| p.total_boards = total);
    }

    /// Records the board currently being built.
    pub fn update_board_started(&self, board: &str) {
        self.update(|p| {
            p.current_board = board.to_string();
            p.build_step = 0;
            p.build_total_steps = 0;
        });
    }

    /// Records `[n/m]` build step counters; `current_stage` never decreases.
    pub fn update_build_step(&self, step: usize, total: usize) {
        self.update(|p| {
            p.build_step = p.build_step.max(step);
            p.build_total_steps = p.build_total_steps.max(total);
        });
    }

    /// Records one board completing.
    pub fn update_board_completed(&self) {
        self.update(|p| {
            p.boards_completed += 1;
            p.total_boards = p.total_boards.max(p.boards_completed);
        });
    }

    /// All boards finished: move to post-processing.
    pub fn complete_all_builds(&self) {
        self.transition_to(CompilePhase::PostProcessing, "Collecting artifacts");
    }

    /// Mirrors cache copy progress into the record.
    pub fn update_copy_progress(&self, progress: &crate::cache::copy::CopyProgress) {
        self.update(|p| {
            p.files_copied = progress.files_processed;
            p.total_files = progress.total_files;
            p.bytes_copied = progress.bytes_copied;
            p.total_bytes = progress.total_bytes;
        });
    }
}

impl Default for ProgressCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
