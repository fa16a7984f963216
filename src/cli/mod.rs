//! CLI command handlers.
//!
//! Each command is a clap `Args` struct with an `execute` method returning
//! the process exit code; `main` owns argument parsing and dispatch.

pub mod cache;
pub mod common;
pub mod config_cmd;
pub mod firmware;
pub mod layout;

pub use cache::{CacheAddArgs, CacheCleanupArgs, CacheDeleteArgs, CacheShowArgs};
pub use common::{CliError, CliResult, ExitCode, OutputFormat};
pub use config_cmd::{
    ConfigFirmwareArgs, ConfigFirmwaresArgs, ConfigListArgs, ConfigShowArgs, StatusArgs,
};
pub use firmware::{FirmwareCompileArgs, FirmwareDevicesArgs, FirmwareFlashArgs};
pub use layout::{
    LayoutCompileArgs, LayoutDiffArgs, LayoutImportArgs, LayoutParseArgs, LayoutPatchArgs,
};
