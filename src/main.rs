//! Glovebox - ZMK keyboard firmware toolchain.
//!
//! Compiles layout documents to DTSI/Kconfig artifacts, builds firmware in
//! containers with a tiered workspace cache, and flashes UF2 images.

use anyhow::Result;
use clap::{Parser, Subcommand};
use glovebox::cli::{self, CliResult, ExitCode};
use glovebox::config::UserConfig;

/// Glovebox - ZMK keyboard firmware toolchain
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Layout operations: compile, parse, import, diff, patch
    Layout {
        #[command(subcommand)]
        command: LayoutCommand,
    },
    /// Firmware operations: compile, flash, devices
    Firmware {
        #[command(subcommand)]
        command: FirmwareCommand,
    },
    /// Workspace cache operations
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// Keyboard configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Show toolchain status
    Status(cli::StatusArgs),
}

#[derive(Subcommand, Debug)]
enum LayoutCommand {
    /// Compile a layout document into keymap and conf files
    Compile(cli::LayoutCompileArgs),
    /// Parse a .keymap file back into a layout document
    Parse(cli::LayoutParseArgs),
    /// Import a .keymap file as a new layout document
    Import(cli::LayoutImportArgs),
    /// Diff two layout documents
    Diff(cli::LayoutDiffArgs),
    /// Apply a diff to a layout document
    Patch(cli::LayoutPatchArgs),
}

#[derive(Subcommand, Debug)]
enum FirmwareCommand {
    /// Build firmware from a layout document
    Compile(cli::FirmwareCompileArgs),
    /// Flash UF2 firmware to attached keyboards
    Flash(cli::FirmwareFlashArgs),
    /// List attached devices matching the profile
    Devices(cli::FirmwareDevicesArgs),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Workspace cache entries
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommand,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    /// Show cached workspaces
    Show(cli::CacheShowArgs),
    /// Delete cached workspaces
    Delete(cli::CacheDeleteArgs),
    /// Remove stale cache entries
    Cleanup(cli::CacheCleanupArgs),
    /// Register an existing workspace as a cache entry
    Add(cli::CacheAddArgs),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// List available keyboards
    List(cli::ConfigListArgs),
    /// Show a keyboard descriptor
    Show(cli::ConfigShowArgs),
    /// List firmwares for a keyboard
    Firmwares(cli::ConfigFirmwaresArgs),
    /// Show one firmware descriptor
    Firmware(cli::ConfigFirmwareArgs),
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(command: Command, config: &UserConfig) -> CliResult<ExitCode> {
    match command {
        Command::Layout { command } => match command {
            LayoutCommand::Compile(args) => args.execute(config),
            LayoutCommand::Parse(args) => args.execute(config),
            LayoutCommand::Import(args) => args.execute(config),
            LayoutCommand::Diff(args) => args.execute(config),
            LayoutCommand::Patch(args) => args.execute(config),
        },
        Command::Firmware { command } => match command {
            FirmwareCommand::Compile(args) => args.execute(config),
            FirmwareCommand::Flash(args) => args.execute(config),
            FirmwareCommand::Devices(args) => args.execute(config),
        },
        Command::Cache { command } => match command {
            CacheCommand::Workspace { command } => match command {
                WorkspaceCommand::Show(args) => args.execute(config),
                WorkspaceCommand::Delete(args) => args.execute(config),
                WorkspaceCommand::Cleanup(args) => args.execute(config),
                WorkspaceCommand::Add(args) => args.execute(config),
            },
        },
        Command::Config { command } => match command {
            ConfigCommand::List(args) => args.execute(config),
            ConfigCommand::Show(args) => args.execute(config),
            ConfigCommand::Firmwares(args) => args.execute(config),
            ConfigCommand::Firmware(args) => args.execute(config),
        },
        Command::Status(args) => args.execute(config),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match UserConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: failed to load user config: {e:#}");
            UserConfig::default()
        }
    };

    match dispatch(cli.command, &config) {
        Ok(code) => std::process::exit(code as i32),
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(error.exit_code as i32);
        }
    }
}
