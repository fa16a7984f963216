//! `glovebox firmware` command handlers.

use crate::adapters::DockerCliAdapter;
use crate::cache::CacheStore;
use crate::cancel::CancellationToken;
use crate::cli::common::{
    emit_result, profile_loader, resolve_profile, CliError, CliResult, ExitCode, OutputFormat,
};
use crate::compile::{CompilationDriver, CompilationRequest};
use crate::config::UserConfig;
use crate::constants::JSON_FILE_ENV;
use crate::flash::{flash_firmware, list_devices, DeviceProbe, FlashOptions, LsblkProbe};
use crate::models::LayoutData;
use crate::progress::ProgressCoordinator;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Compile firmware from a layout document or keymap/conf pair
#[derive(Debug, Clone, Args)]
pub struct FirmwareCompileArgs {
    /// Layout document (.json) or keymap file; falls back to GLOVEBOX_JSON_FILE
    #[arg(value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Kconfig fragment to append when compiling from a keymap file
    #[arg(value_name = "CONF")]
    pub conf: Option<PathBuf>,

    /// Keyboard profile as KEYBOARD[/FIRMWARE]
    #[arg(long, value_name = "KB[/FW]")]
    pub profile: Option<String>,

    /// Compile strategy override
    #[arg(long, value_name = "NAME")]
    pub strategy: Option<String>,

    /// Output directory for firmware artifacts
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Keep the build workspace on failure
    #[arg(long)]
    pub preserve_workspace: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl FirmwareCompileArgs {
    fn resolve_input(&self) -> CliResult<PathBuf> {
        if let Some(input) = &self.input {
            return Ok(input.clone());
        }
        if let Ok(implicit) = std::env::var(JSON_FILE_ENV) {
            return Ok(PathBuf::from(implicit));
        }
        Err(CliError::misuse(format!(
            "no layout input given and {JSON_FILE_ENV} is not set"
        )))
    }

    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let input = self.resolve_input()?;
        let loader = profile_loader(config);

        // A .keymap input is parsed back into a document first; that path
        // cannot infer the keyboard, so it requires an explicit profile.
        let (layout, profile) = if input.extension().is_some_and(|e| e == "keymap") {
            let profile = resolve_profile(&loader, self.profile.as_deref(), None)?;
            let content = std::fs::read_to_string(&input)
                .map_err(|e| CliError::failure(format!("failed to read keymap: {e}")))?;
            let layout = crate::parser::parse_keymap(
                &content,
                Some(&profile),
                crate::parser::ParseMode::Auto,
                crate::parser::ParseBackend::Ast,
            )?;
            (layout, profile)
        } else {
            let layout = LayoutData::load(&input)?;
            let profile = resolve_profile(
                &loader,
                self.profile.as_deref(),
                Some(layout.keyboard.as_str()),
            )?;
            (layout, profile)
        };

        let cache_root = config.cache_root()?;
        let cache = CacheStore::new(cache_root)?;
        let container = DockerCliAdapter::with_binary(config.docker.binary.clone());

        let coordinator = Arc::new(ProgressCoordinator::new());
        let cancel = CancellationToken::new();
        let driver = CompilationDriver::new(
            &profile,
            config,
            &cache,
            &container,
            Arc::clone(&coordinator),
            cancel,
        );

        let extra_conf = match &self.conf {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .map_err(|e| CliError::failure(format!("failed to read conf: {e}")))?,
            ),
            None => None,
        };

        let request = CompilationRequest {
            layout,
            layout_basename: input
                .file_stem()
                .map_or_else(|| "layout".to_string(), |s| s.to_string_lossy().to_string()),
            output_dir: self.output.clone(),
            strategy_override: self.strategy.clone(),
            extra_conf,
            preserve_workspace: self.preserve_workspace,
            timestamps: true,
            work_root: None,
        };

        let result = driver.compile(&request);
        emit_result(&result, self.output_format)
    }
}

fn flash_one_file(
    probe: &dyn DeviceProbe,
    firmware: &Path,
    profile: &crate::profile::KeyboardProfile,
    options: &FlashOptions,
    format: OutputFormat,
) -> CliResult<ExitCode> {
    let result = flash_firmware(probe, firmware, profile, options)?;
    emit_result(&result, format)
}

/// Expands a flash input: a `.json` layout stands for the UF2s a previous
/// compile left next to it (`<stem>.uf2` or `<stem>_lh.uf2`/`<stem>_rh.uf2`).
fn resolve_flash_inputs(input: &Path) -> CliResult<Vec<PathBuf>> {
    if !input.extension().is_some_and(|e| e == "json") {
        return Ok(vec![input.to_path_buf()]);
    }
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut found = Vec::new();
    for candidate in [
        format!("{stem}.uf2"),
        format!("{stem}_lh.uf2"),
        format!("{stem}_rh.uf2"),
    ] {
        let path = dir.join(candidate);
        if path.is_file() {
            found.push(path);
        }
    }
    if found.is_empty() {
        return Err(CliError::failure(format!(
            "no built firmware found next to {}; run `glovebox firmware compile` first",
            input.display()
        )));
    }
    Ok(found)
}

/// Flash UF2 firmware to attached keyboards
#[derive(Debug, Clone, Args)]
pub struct FirmwareFlashArgs {
    /// UF2 firmware files to flash
    #[arg(value_name = "FILE", required = true)]
    pub firmware: Vec<PathBuf>,

    /// Keyboard profile as KEYBOARD[/FIRMWARE]
    #[arg(long, value_name = "KB[/FW]")]
    pub profile: Option<String>,

    /// Number of devices to flash per file
    #[arg(long, value_name = "N")]
    pub count: Option<usize>,

    /// Wait for devices to appear
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait for devices
    #[arg(long, value_name = "SEC")]
    pub timeout: Option<u64>,

    /// Poll interval in seconds
    #[arg(long, value_name = "SEC")]
    pub poll_interval: Option<f64>,

    /// Skip devices already attached when flashing starts
    #[arg(long)]
    pub skip_existing: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl FirmwareFlashArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let profile = resolve_profile(&loader, self.profile.as_deref(), None)?;

        let options = FlashOptions {
            timeout: Duration::from_secs(self.timeout.unwrap_or(config.flash.timeout_secs)),
            count: self.count.unwrap_or(config.flash.count),
            skip_existing: self.skip_existing,
            wait: self.wait,
            poll_interval: Duration::from_secs_f64(
                self.poll_interval.unwrap_or(config.flash.poll_interval_secs),
            ),
        };

        let probe = LsblkProbe;
        let mut worst = ExitCode::Success;
        for input in &self.firmware {
            for firmware in resolve_flash_inputs(input)? {
                let code =
                    flash_one_file(&probe, &firmware, &profile, &options, self.output_format)?;
                if code != ExitCode::Success {
                    worst = ExitCode::Failure;
                }
            }
        }
        Ok(worst)
    }
}

/// List attached devices matching the profile's flash query
#[derive(Debug, Clone, Args)]
pub struct FirmwareDevicesArgs {
    /// Keyboard profile as KEYBOARD[/FIRMWARE]
    #[arg(long, value_name = "KB[/FW]")]
    pub profile: Option<String>,
}

impl FirmwareDevicesArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let profile = resolve_profile(&loader, self.profile.as_deref(), None)?;

        let devices = list_devices(&LsblkProbe, &profile)?;
        if devices.is_empty() {
            println!("no matching devices attached");
        } else {
            for device in &devices {
                println!(
                    "{}  vendor={}  serial={}  label={}",
                    device.name(),
                    device.get("vendor"),
                    device.serial(),
                    device.get("label"),
                );
            }
        }
        Ok(ExitCode::Success)
    }
}
