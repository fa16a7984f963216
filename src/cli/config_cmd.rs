//! `glovebox config` and `glovebox status` command handlers.

use crate::cli::common::{profile_loader, CliError, CliResult, ExitCode};
use crate::config::UserConfig;
use crate::constants::{APP_NAME, KEYBOARD_PATH_ENV};
use clap::Args;

/// List available keyboards
#[derive(Debug, Clone, Args)]
pub struct ConfigListArgs {}

impl ConfigListArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let keyboards = loader.list_keyboards();
        if keyboards.is_empty() {
            println!("no keyboard descriptors found on the search path");
            println!("add directories via {KEYBOARD_PATH_ENV} or the user config");
        } else {
            for keyboard in keyboards {
                println!("{keyboard}");
            }
        }
        Ok(ExitCode::Success)
    }
}

/// Show a keyboard descriptor
#[derive(Debug, Clone, Args)]
pub struct ConfigShowArgs {
    /// Keyboard name
    #[arg(value_name = "KEYBOARD")]
    pub keyboard: String,
}

impl ConfigShowArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let descriptor = loader.load_keyboard(&self.keyboard)?;
        println!("keyboard:    {}", descriptor.keyboard);
        println!("description: {}", descriptor.description);
        println!("vendor:      {}", descriptor.vendor);
        println!("key count:   {}", descriptor.key_count);
        println!(
            "firmwares:   {}",
            descriptor
                .firmwares
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !descriptor.compile_methods.is_empty() {
            println!(
                "strategies:  {}",
                descriptor
                    .compile_methods
                    .iter()
                    .map(|m| m.method_type.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(ExitCode::Success)
    }
}

/// List firmwares available for a keyboard
#[derive(Debug, Clone, Args)]
pub struct ConfigFirmwaresArgs {
    /// Keyboard name
    #[arg(value_name = "KEYBOARD")]
    pub keyboard: String,
}

impl ConfigFirmwaresArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let firmwares = loader.list_firmwares(&self.keyboard)?;
        if firmwares.is_empty() {
            println!("no firmwares declared for {}", self.keyboard);
        } else {
            for firmware in firmwares {
                println!("{firmware}");
            }
        }
        Ok(ExitCode::Success)
    }
}

/// Show one firmware descriptor
#[derive(Debug, Clone, Args)]
pub struct ConfigFirmwareArgs {
    /// Keyboard name
    #[arg(value_name = "KEYBOARD")]
    pub keyboard: String,

    /// Firmware name
    #[arg(value_name = "FIRMWARE")]
    pub firmware: String,
}

impl ConfigFirmwareArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let descriptor = loader.load_keyboard(&self.keyboard)?;
        let firmware = descriptor.firmwares.get(&self.firmware).ok_or_else(|| {
            CliError::failure(format!(
                "firmware '{}' not found for keyboard '{}'\navailable: {}",
                self.firmware,
                self.keyboard,
                descriptor
                    .firmwares
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        println!("version:     {}", firmware.version);
        println!("description: {}", firmware.description);
        println!("repository:  {}", firmware.build_options.repository);
        println!("branch:      {}", firmware.build_options.branch);
        if let Some(commit) = &firmware.build_options.manifest_commit {
            println!("commit:      {commit}");
        }
        if !firmware.kconfig.is_empty() {
            println!("kconfig overrides:");
            for (name, option) in &firmware.kconfig {
                println!("  {name} = {}", option.default);
            }
        }
        Ok(ExitCode::Success)
    }
}

/// Show toolchain status: config, search paths, cache
#[derive(Debug, Clone, Args)]
pub struct StatusArgs {}

impl StatusArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        println!("{APP_NAME} v{}", env!("CARGO_PKG_VERSION"));

        match UserConfig::config_file_path() {
            Ok(path) if path.exists() => println!("config:      {}", path.display()),
            Ok(path) => println!("config:      {} (defaults, file absent)", path.display()),
            Err(_) => println!("config:      unavailable"),
        }

        let loader = profile_loader(config);
        let keyboards = loader.list_keyboards();
        println!("keyboards:   {} discovered", keyboards.len());

        match config.cache_root() {
            Ok(root) => {
                println!("cache root:  {}", root.display());
                if let Ok(store) = crate::cache::CacheStore::new(root) {
                    if let Ok(entries) = store.list_entries() {
                        let total: u64 = entries.iter().map(|(_, m)| m.size_bytes).sum();
                        println!(
                            "cache:       {} entries, {} bytes",
                            entries.len(),
                            total
                        );
                    }
                }
            }
            Err(e) => println!("cache root:  unavailable ({e})"),
        }

        println!("docker:      {}", config.docker.binary);
        Ok(ExitCode::Success)
    }
}
