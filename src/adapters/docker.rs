//! Container runtime adapter.
//!
//! The build pipeline talks to containers exclusively through
//! [`ContainerAdapter`], so tests substitute a scripted fake and the real
//! implementation stays a thin wrapper around the `docker` CLI. Output lines
//! stream through the middleware chain as they arrive; cancellation stops the
//! container with a grace period before killing it.

use crate::cancel::CancellationToken;
use crate::constants::CONTAINER_TERM_GRACE_SECS;
use crate::error::{Error, Result};
use crate::progress::middleware::{MiddlewareChain, StreamSource};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

/// Volume mount mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

/// One host directory mapped into the container.
#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
}

impl VolumeMount {
    #[must_use]
    pub fn read_write(host_path: PathBuf, container_path: impl Into<String>) -> Self {
        Self {
            host_path,
            container_path: container_path.into(),
            mode: MountMode::ReadWrite,
        }
    }

    #[must_use]
    pub fn read_only(host_path: PathBuf, container_path: impl Into<String>) -> Self {
        Self {
            host_path,
            container_path: container_path.into(),
            mode: MountMode::ReadOnly,
        }
    }

    fn to_arg(&self) -> String {
        let suffix = match self.mode {
            MountMode::ReadOnly => ":ro",
            MountMode::ReadWrite => "",
        };
        format!(
            "{}:{}{suffix}",
            self.host_path.display(),
            self.container_path
        )
    }
}

/// Everything needed for one container invocation.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub mounts: Vec<VolumeMount>,
    pub env: Vec<(String, String)>,
    /// Host uid/gid mapping; `None` runs as the image default user.
    pub user: Option<(u32, u32)>,
    /// Shell commands executed in sequence; a failing command aborts the rest.
    pub commands: Vec<String>,
    pub working_dir: Option<String>,
}

impl ContainerSpec {
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            mounts: Vec::new(),
            env: Vec::new(),
            user: None,
            commands: Vec::new(),
            working_dir: None,
        }
    }
}

/// Boundary to the container runtime.
pub trait ContainerAdapter: Send + Sync {
    /// Runs the container to completion, streaming every output line through
    /// the middleware chain. Returns the exit code.
    fn run(
        &self,
        spec: &ContainerSpec,
        chain: &mut MiddlewareChain,
        cancel: &CancellationToken,
    ) -> Result<i32>;
}

/// `docker` CLI implementation.
pub struct DockerCliAdapter {
    binary: String,
}

impl DockerCliAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use a different CLI-compatible binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn container_name() -> String {
        format!(
            "glovebox-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        )
    }
}

impl Default for DockerCliAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerAdapter for DockerCliAdapter {
    fn run(
        &self,
        spec: &ContainerSpec,
        chain: &mut MiddlewareChain,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        cancel.check()?;

        let name = Self::container_name();
        let mut command = Command::new(&self.binary);
        command.arg("run").arg("--rm").arg("--name").arg(&name);
        for mount in &spec.mounts {
            command.arg("-v").arg(mount.to_arg());
        }
        for (key, value) in &spec.env {
            command.arg("-e").arg(format!("{key}={value}"));
        }
        if let Some((uid, gid)) = spec.user {
            command.arg("--user").arg(format!("{uid}:{gid}"));
        }
        if let Some(workdir) = &spec.working_dir {
            command.arg("-w").arg(workdir);
        }
        command
            .arg(&spec.image)
            .arg("/bin/sh")
            .arg("-c")
            .arg(spec.commands.join(" && "))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!("starting container {name} from image {}", spec.image);
        let mut child = command
            .spawn()
            .map_err(|e| Error::io(format!("failed to start {}", self.binary), e))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let (sender, receiver) = mpsc::channel::<(StreamSource, String)>();

        let stdout_sender = sender.clone();
        let stdout_reader = std::thread::spawn(move || {
            for line in std::io::BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                if stdout_sender.send((StreamSource::Stdout, line)).is_err() {
                    break;
                }
            }
        });
        let stderr_reader = std::thread::spawn(move || {
            for line in std::io::BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                if sender.send((StreamSource::Stderr, line)).is_err() {
                    break;
                }
            }
        });

        let mut stopped_for_cancel = false;
        loop {
            match receiver.recv_timeout(Duration::from_millis(200)) {
                Ok((stream, line)) => {
                    chain.process_line(&line, stream);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() && !stopped_for_cancel {
                        stopped_for_cancel = true;
                        tracing::info!("cancellation observed, stopping container {name}");
                        // TERM with a grace period, then KILL.
                        let _ = Command::new(&self.binary)
                            .arg("stop")
                            .arg("--time")
                            .arg(CONTAINER_TERM_GRACE_SECS.to_string())
                            .arg(&name)
                            .status();
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        stdout_reader.join().expect("stdout reader panicked");
        stderr_reader.join().expect("stderr reader panicked");

        let status = child
            .wait()
            .map_err(|e| Error::io("failed to wait for container", e))?;

        if stopped_for_cancel {
            return Err(Error::Cancelled);
        }
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_arg_formatting() {
        let rw = VolumeMount::read_write(PathBuf::from("/work"), "/workspace");
        assert_eq!(rw.to_arg(), "/work:/workspace");

        let ro = VolumeMount::read_only(PathBuf::from("/cfg"), "/config");
        assert_eq!(ro.to_arg(), "/cfg:/config:ro");
    }

    #[test]
    fn test_spec_builder_defaults() {
        let spec = ContainerSpec::new("zmkfirmware/zmk-build-arm:stable");
        assert!(spec.mounts.is_empty());
        assert!(spec.user.is_none());
        assert!(spec.commands.is_empty());
    }
}
