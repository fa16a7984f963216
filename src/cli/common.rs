//! Shared CLI plumbing: error type, exit codes, output formatting.

use crate::config::UserConfig;
use crate::error::Error;
use crate::profile::{parse_profile_arg, KeyboardProfile, ProfileLoader};

/// Process exit codes: 0 success, 1 operational failure, 2 misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Misuse = 2,
}

/// CLI-level error with its exit classification.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    /// Invalid arguments or usage.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: ExitCode::Misuse,
        }
    }

    /// Operational failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: ExitCode::Failure,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

impl From<Error> for CliError {
    fn from(error: Error) -> Self {
        Self::failure(error.to_string())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        Self::failure(format!("{error:#}"))
    }
}

pub type CliResult<T> = Result<T, CliError>;

/// Output format for machine-consumable commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds the profile loader from user config.
#[must_use]
pub fn profile_loader(config: &UserConfig) -> ProfileLoader {
    ProfileLoader::new(&config.keyboard_paths)
}

/// Resolves a `--profile KB[/FW]` argument (or a keyboard taken from the
/// layout document) into a profile, enumerating alternatives on failure.
pub fn resolve_profile(
    loader: &ProfileLoader,
    profile_arg: Option<&str>,
    fallback_keyboard: Option<&str>,
) -> CliResult<KeyboardProfile> {
    let (keyboard, firmware) = match (profile_arg, fallback_keyboard) {
        (Some(arg), _) => parse_profile_arg(arg),
        (None, Some(keyboard)) => (keyboard, None),
        (None, None) => {
            return Err(CliError::misuse(
                "no keyboard profile given; pass --profile KB[/FW]",
            ));
        }
    };

    loader.create_profile(keyboard, firmware).map_err(|error| {
        let mut message = error.to_string();
        match &error {
            Error::ProfileNotFound { .. } => {
                let available = loader.list_keyboards();
                if !available.is_empty() {
                    message.push_str(&format!(
                        "\navailable keyboards: {}",
                        available.join(", ")
                    ));
                }
            }
            Error::FirmwareNotFound { keyboard, .. } => {
                if let Ok(available) = loader.list_firmwares(keyboard) {
                    message.push_str(&format!(
                        "\navailable firmwares for {keyboard}: {}",
                        available.join(", ")
                    ));
                }
            }
            _ => {}
        }
        CliError::failure(message)
    })
}

/// Prints a result record in the requested format; returns the exit code.
pub fn emit_result<T: serde::Serialize + crate::models::ResultRecord>(
    result: &T,
    format: OutputFormat,
) -> CliResult<ExitCode> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(result)
                .map_err(|e| CliError::failure(format!("result serialization failed: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Text => {
            for message in result.messages() {
                println!("{message}");
            }
            for error in result.errors() {
                eprintln!("error: {error}");
            }
        }
    }
    Ok(if result.success() {
        ExitCode::Success
    } else {
        ExitCode::Failure
    })
}
