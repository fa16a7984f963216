//! Error types shared across the toolchain.
//!
//! Leaf modules raise typed errors; the compilation driver catches only the
//! kinds it can act on (a corrupt cache entry is evicted and retried once),
//! everything else propagates unchanged into the result records.

use std::path::PathBuf;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds the core distinguishes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No keyboard descriptor file matched the search path.
    #[error("keyboard configuration not found: {keyboard}")]
    ProfileNotFound { keyboard: String },

    /// A descriptor file exists but failed YAML decoding or schema validation.
    #[error("invalid keyboard configuration '{keyboard}': {message}")]
    ProfileInvalid { keyboard: String, message: String },

    /// The requested firmware id is absent from the keyboard descriptor.
    #[error("firmware '{firmware}' not found for keyboard '{keyboard}'")]
    FirmwareNotFound { keyboard: String, firmware: String },

    /// A layout document violates a structural invariant.
    #[error("invalid layout: {0}")]
    LayoutInvalid(String),

    /// A `${...}` reference could not be resolved.
    #[error("undefined variable: {path}")]
    UndefinedVariable { path: String },

    /// Variable references form a cycle; `chain` names each node in order.
    #[error("variable reference cycle: {}", chain.join(" -> "))]
    VariableCycle { chain: Vec<String> },

    /// The templating adapter failed to render the keymap template.
    #[error("template rendering failed: {0}")]
    TemplateRenderFailed(String),

    /// A `.keymap` file could not be parsed into a layout document.
    #[error("keymap parse failed at line {line}: {message}")]
    ParseFailed { line: usize, message: String },

    /// A cache entry's payload no longer matches its metadata.
    #[error("cache entry corrupt: {0}")]
    CacheCorrupt(String),

    /// Another process holds the exclusive lock for a cache key.
    #[error("cache entry locked: {0}")]
    CacheLocked(String),

    /// Workspace preparation failed; `stage` is one of west_init, west_update, copy.
    #[error("workspace setup failed during {stage}: {message}")]
    WorkspaceSetupFailed { stage: String, message: String },

    /// The container exited non-zero. Carries the tail of its combined output.
    #[error("container exited with code {exit_code}")]
    ContainerFailed {
        exit_code: i32,
        log_tail: Vec<String>,
    },

    /// The container succeeded but expected artifacts are missing.
    #[error("build failed: {0}")]
    BuildFailed(String),

    /// Flashing failed for one or more devices.
    #[error("flash failed: {0}")]
    FlashFailed(String),

    /// The caller's cancellation token was observed. Terminal.
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem or process error outside the categories above.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an I/O error with a short human context string.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Workspace failure during one of the named stages.
    pub fn workspace(stage: &str, message: impl Into<String>) -> Self {
        Self::WorkspaceSetupFailed {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind name, mirrored into JSON result records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProfileNotFound { .. } => "profile_not_found",
            Self::ProfileInvalid { .. } => "profile_invalid",
            Self::FirmwareNotFound { .. } => "firmware_not_found",
            Self::LayoutInvalid(_) => "layout_invalid",
            Self::UndefinedVariable { .. } => "undefined_variable",
            Self::VariableCycle { .. } => "variable_cycle",
            Self::TemplateRenderFailed(_) => "template_render_failed",
            Self::ParseFailed { .. } => "parse_failed",
            Self::CacheCorrupt(_) => "cache_corrupt",
            Self::CacheLocked(_) => "cache_locked",
            Self::WorkspaceSetupFailed { .. } => "workspace_setup_failed",
            Self::ContainerFailed { .. } => "container_failed",
            Self::BuildFailed(_) => "build_failed",
            Self::FlashFailed(_) => "flash_failed",
            Self::Cancelled => "cancelled",
            Self::Io { .. } => "io",
        }
    }
}

/// Helper to convert path-bearing I/O failures into [`Error::Io`].
pub fn io_ctx(path: &std::path::Path, action: &str) -> impl FnOnce(std::io::Error) -> Error {
    let path: PathBuf = path.to_path_buf();
    let action = action.to_string();
    move |e| Error::io(format!("{action} {}", path.display()), e)
}
