//! Output middleware chain for container line streams.
//!
//! Each line from the container's combined stdout/stderr passes through an
//! ordered list of middlewares. A middleware returns the line (possibly
//! annotated) to pass it on, or `None` to drop it. The compilation-progress
//! middleware is always present in build pipelines; a noise filter is
//! composable in front of log sinks.

use super::{CompilePhase, ProgressCoordinator};
use crate::models::keyboard::ProgressPatterns;
use regex::Regex;
use std::sync::Arc;

/// Which stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One stage of the output pipeline.
pub trait OutputMiddleware: Send {
    /// Processes a line; `None` drops it from the rest of the chain.
    fn process(&mut self, line: &str, stream: StreamSource) -> Option<String>;
}

/// Ordered middleware list.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn OutputMiddleware>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, middleware: Box<dyn OutputMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Runs a line through every middleware in order.
    pub fn process_line(&mut self, line: &str, stream: StreamSource) -> Option<String> {
        let mut current = line.to_string();
        for middleware in &mut self.middlewares {
            current = middleware.process(&current, stream)?;
        }
        Some(current)
    }
}

/// Parses build output and drives the progress coordinator.
pub struct CompilationProgressMiddleware {
    coordinator: Arc<ProgressCoordinator>,
    repo_download: Regex,
    build_start: Regex,
    build_progress: Regex,
    build_complete: Regex,
    board_detection: Regex,
    board_complete: Regex,
    git_objects: Regex,
    git_deltas: Regex,
    project_count: Regex,
}

impl CompilationProgressMiddleware {
    pub fn new(
        coordinator: Arc<ProgressCoordinator>,
        patterns: &ProgressPatterns,
    ) -> crate::error::Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                crate::error::Error::ProfileInvalid {
                    keyboard: String::new(),
                    message: format!("invalid progress pattern '{pattern}': {e}"),
                }
            })
        };
        Ok(Self {
            coordinator,
            repo_download: compile(&patterns.repo_download_pattern)?,
            build_start: compile(&patterns.build_start_pattern)?,
            build_progress: compile(&patterns.build_progress_pattern)?,
            build_complete: compile(&patterns.build_complete_pattern)?,
            board_detection: compile(&patterns.board_detection_pattern)?,
            board_complete: compile(&patterns.board_complete_pattern)?,
            git_objects: Regex::new(
                r"Receiving objects:\s+\d+%\s+\((\d+)/(\d+)\)(?:.*?([\d.]+)\s*(KiB|MiB|GiB)/s)?",
            )
            .expect("static regex"),
            git_deltas: Regex::new(r"Resolving deltas:\s+\d+%\s+\((\d+)/(\d+)\)")
                .expect("static regex"),
            project_count: Regex::new(r"===\s*\((\d+) projects?\)\s*===|(\d+) projects?:")
                .expect("static regex"),
        })
    }

    fn handle_dependency_line(&self, line: &str) {
        if let Some(caps) = self.repo_download.captures(line) {
            if let Some(name) = caps.get(1) {
                self.coordinator.update_repository_progress(name.as_str());
            }
            return;
        }
        if let Some(caps) = self.project_count.captures(line) {
            let count = caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse().ok());
            if let Some(count) = count {
                self.coordinator.set_total_repositories(count);
            }
            return;
        }
        if let Some(caps) = self.git_objects.captures(line) {
            let received = caps[1].parse().unwrap_or(0);
            let total = caps[2].parse().unwrap_or(0);
            let speed = caps.get(3).and_then(|value| {
                let number: f64 = value.as_str().parse().ok()?;
                let unit = caps.get(4)?.as_str();
                Some(match unit {
                    "GiB" => number * 1024.0 * 1024.0,
                    "MiB" => number * 1024.0,
                    _ => number,
                })
            });
            self.coordinator.update_git_transfer(received, total, speed);
            return;
        }
        if let Some(caps) = self.git_deltas.captures(line) {
            let resolved = caps[1].parse().unwrap_or(0);
            let total = caps[2].parse().unwrap_or(0);
            self.coordinator.update_git_transfer(resolved, total, None);
        }
    }

    fn handle_building_line(&self, line: &str) {
        if let Some(caps) = self.board_detection.captures(line) {
            if let Some(board) = caps.get(1) {
                self.coordinator.update_board_started(board.as_str());
            }
        }
        if let Some(caps) = self.build_progress.captures(line) {
            let step = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let total = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            self.coordinator.update_build_step(step, total);
        }
        if self.board_complete.is_match(line) {
            self.coordinator.update_board_completed();
        }
        if self.build_complete.is_match(line) {
            let snapshot = self.coordinator.snapshot();
            if snapshot.total_boards > 0 && snapshot.boards_completed >= snapshot.total_boards {
                self.coordinator.complete_all_builds();
            }
        }
    }
}

impl OutputMiddleware for CompilationProgressMiddleware {
    fn process(&mut self, line: &str, _stream: StreamSource) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Some(line.to_string());
        }

        // Build activity can begin before the driver's own transition lands
        // (cached workspaces skip the fetch phase entirely).
        let phase = self.coordinator.current_phase();
        if phase != CompilePhase::Building
            && !phase.is_terminal()
            && (self.build_start.is_match(trimmed) || self.build_progress.is_match(trimmed))
        {
            self.coordinator
                .transition_to(CompilePhase::Building, "Compiling firmware");
        }

        match self.coordinator.current_phase() {
            CompilePhase::DependencyFetch => self.handle_dependency_line(trimmed),
            CompilePhase::Building => self.handle_building_line(trimmed),
            _ => {}
        }

        Some(line.to_string())
    }
}

/// Drops container noise lines before they reach log sinks.
pub struct LogFilterMiddleware;

const NOISE_MARKERS: [&str; 10] = [
    "Pulling from",
    "Pull complete",
    "Digest: sha256:",
    "Status: Downloaded",
    "Unable to find image",
    "remote: Enumerating objects:",
    "remote: Counting objects:",
    "remote: Compressing objects:",
    "-- Configuring done",
    "-- Generating done",
];

impl OutputMiddleware for LogFilterMiddleware {
    fn process(&mut self, line: &str, _stream: StreamSource) -> Option<String> {
        if NOISE_MARKERS.iter().any(|marker| line.contains(marker)) {
            None
        } else {
            Some(line.to_string())
        }
    }
}

/// Shared view of the trailing log window, readable after the chain is gone.
#[derive(Clone, Default)]
pub struct LogTail {
    lines: Arc<std::sync::Mutex<std::collections::VecDeque<String>>>,
}

impl LogTail {
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("log tail lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

/// Collects the trailing window of lines for failure reports.
pub struct LogTailMiddleware {
    tail: LogTail,
    capacity: usize,
}

impl LogTailMiddleware {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tail: LogTail::default(),
            capacity,
        }
    }

    /// Handle that stays readable after the middleware is boxed away.
    #[must_use]
    pub fn handle(&self) -> LogTail {
        self.tail.clone()
    }

    #[must_use]
    pub fn tail(&self) -> Vec<String> {
        self.tail.lines()
    }
}

impl OutputMiddleware for LogTailMiddleware {
    fn process(&mut self, line: &str, _stream: StreamSource) -> Option<String> {
        let mut lines = self.tail.lines.lock().expect("log tail lock poisoned");
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
        Some(line.to_string())
    }
}
