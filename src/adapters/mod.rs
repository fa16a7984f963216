//! Thin, testable boundaries to the OS and the container runtime.

pub mod docker;
pub mod fs;

pub use docker::{ContainerAdapter, ContainerSpec, DockerCliAdapter, MountMode, VolumeMount};
