//! `glovebox layout` command handlers.

use crate::adapters::fs::atomic_write;
use crate::cli::common::{
    emit_result, profile_loader, resolve_profile, CliError, CliResult, ExitCode, OutputFormat,
};
use crate::config::UserConfig;
use crate::diff;
use crate::generator::{compile_layout, GeneratorOptions};
use crate::models::{LayoutData, LayoutResult};
use crate::parser::{parse_keymap, ParseBackend, ParseMode};
use clap::Args;
use std::path::{Path, PathBuf};

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "layout".to_string(), |s| s.to_string_lossy().to_string())
}

fn load_layout(path: &Path) -> CliResult<LayoutData> {
    LayoutData::load(path).map_err(CliError::from)
}

/// Compile a layout document into keymap and conf files
#[derive(Debug, Clone, Args)]
pub struct LayoutCompileArgs {
    /// Layout document (.json) or keymap (.keymap) to compile
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Keyboard profile as KEYBOARD[/FIRMWARE]
    #[arg(long, value_name = "KB[/FW]")]
    pub profile: Option<String>,

    /// Output directory for generated files
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Omit the generation timestamp for reproducible output
    #[arg(long)]
    pub no_timestamps: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl LayoutCompileArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let mut result = LayoutResult::new();

        // A .keymap input is parsed back to a document first.
        let layout = if self.input.extension().is_some_and(|e| e == "keymap") {
            let content = std::fs::read_to_string(&self.input)
                .map_err(|e| CliError::failure(format!("failed to read keymap: {e}")))?;
            let profile = resolve_profile(&loader, self.profile.as_deref(), None)?;
            parse_keymap(&content, Some(&profile), ParseMode::Auto, ParseBackend::Ast)?
        } else {
            load_layout(&self.input)?
        };

        let profile = resolve_profile(
            &loader,
            self.profile.as_deref(),
            Some(layout.keyboard.as_str()),
        )?;
        result.profile_name = Some(profile.name());

        let compiled = match compile_layout(
            &profile,
            &layout,
            GeneratorOptions {
                timestamps: !self.no_timestamps,
            },
        ) {
            Ok(compiled) => compiled,
            Err(error) => {
                result.fail(&error);
                return emit_result(&result, self.output_format);
            }
        };

        let output_dir = self.output.clone().unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| CliError::failure(format!("failed to create output dir: {e}")))?;

        let stem = file_stem(&self.input);
        let keymap_path = output_dir.join(format!("{stem}.keymap"));
        let conf_path = output_dir.join(format!("{stem}.conf"));
        atomic_write(&keymap_path, &compiled.keymap)?;
        atomic_write(&conf_path, &compiled.conf)?;

        result.layer_count = Some(compiled.layer_count);
        result.add_message(format!("wrote {}", keymap_path.display()));
        result.add_message(format!("wrote {}", conf_path.display()));
        result.keymap_path = Some(keymap_path);
        result.conf_path = Some(conf_path);
        emit_result(&result, self.output_format)
    }
}

/// Parse a .keymap file back into a layout document
#[derive(Debug, Clone, Args)]
pub struct LayoutParseArgs {
    /// Keymap file to parse
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Keyboard profile as KEYBOARD[/FIRMWARE]
    #[arg(long, value_name = "KB[/FW]")]
    pub profile: Option<String>,

    /// Parse mode
    #[arg(long, default_value = "auto")]
    pub mode: String,

    /// Parse backend
    #[arg(long, default_value = "ast")]
    pub method: String,

    /// Output file (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl LayoutParseArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let mode: ParseMode = self.mode.parse().map_err(CliError::misuse)?;
        let backend: ParseBackend = self.method.parse().map_err(CliError::misuse)?;

        let loader = profile_loader(config);
        let profile = match &self.profile {
            Some(arg) => Some(resolve_profile(&loader, Some(arg), None)?),
            None => None,
        };

        let content = std::fs::read_to_string(&self.input)
            .map_err(|e| CliError::failure(format!("failed to read keymap: {e}")))?;
        let layout = parse_keymap(&content, profile.as_ref(), mode, backend)?;
        let json = layout.to_json()?;

        match &self.output {
            Some(path) => {
                atomic_write(path, &json)?;
                println!("wrote {}", path.display());
            }
            None => println!("{json}"),
        }
        Ok(ExitCode::Success)
    }
}

/// Import a .keymap file as a new layout document with fresh provenance
#[derive(Debug, Clone, Args)]
pub struct LayoutImportArgs {
    /// Keymap file to import
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Keyboard profile as KEYBOARD[/FIRMWARE]
    #[arg(long, value_name = "KB[/FW]")]
    pub profile: Option<String>,

    /// Title for the imported layout
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Destination directory
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    pub directory: PathBuf,
}

impl LayoutImportArgs {
    pub fn execute(&self, config: &UserConfig) -> CliResult<ExitCode> {
        let loader = profile_loader(config);
        let profile = match &self.profile {
            Some(arg) => Some(resolve_profile(&loader, Some(arg), None)?),
            None => None,
        };

        let content = std::fs::read_to_string(&self.input)
            .map_err(|e| CliError::failure(format!("failed to read keymap: {e}")))?;
        let mut layout = parse_keymap(&content, profile.as_ref(), ParseMode::Auto, ParseBackend::Ast)?;

        if let Some(name) = &self.name {
            layout.title.clone_from(name);
        }
        layout.stamp_provenance(None);

        std::fs::create_dir_all(&self.directory)
            .map_err(|e| CliError::failure(format!("failed to create directory: {e}")))?;
        let destination = self
            .directory
            .join(format!("{}.json", file_stem(&self.input)));
        layout.save(&destination)?;
        println!("imported layout to {}", destination.display());
        Ok(ExitCode::Success)
    }
}

/// Diff two layout documents
#[derive(Debug, Clone, Args)]
pub struct LayoutDiffArgs {
    /// Base layout
    #[arg(value_name = "A")]
    pub base: PathBuf,

    /// Modified layout
    #[arg(value_name = "B")]
    pub modified: PathBuf,

    /// Output format
    #[arg(long, default_value = "summary")]
    pub format: String,
}

impl LayoutDiffArgs {
    pub fn execute(&self, _config: &UserConfig) -> CliResult<ExitCode> {
        let base = load_layout(&self.base)?;
        let modified = load_layout(&self.modified)?;
        let layout_diff = diff::create_layout_diff(&base, &modified)?;

        match self.format.as_str() {
            "summary" => println!("{}", diff::summarize(&layout_diff)),
            "detailed" | "pretty" => print!("{}", diff::detailed_report(&layout_diff)),
            "json" => {
                let json = serde_json::to_string_pretty(&layout_diff)
                    .map_err(|e| CliError::failure(format!("diff serialization failed: {e}")))?;
                println!("{json}");
            }
            "dtsi" => {
                let text = diff::dtsi_diff(&base, &modified);
                if text.is_empty() {
                    println!("no custom DTSI changes");
                } else {
                    print!("{text}");
                }
            }
            other => {
                return Err(CliError::misuse(format!(
                    "unknown diff format '{other}' (summary|detailed|pretty|json|dtsi)"
                )));
            }
        }
        Ok(ExitCode::Success)
    }
}

/// Apply a diff file to a layout document
#[derive(Debug, Clone, Args)]
pub struct LayoutPatchArgs {
    /// Source layout
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Patch file produced by `layout diff --format json`
    #[arg(value_name = "PATCH")]
    pub patch: PathBuf,

    /// Output file (source is overwritten when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl LayoutPatchArgs {
    pub fn execute(&self, _config: &UserConfig) -> CliResult<ExitCode> {
        let source = load_layout(&self.source)?;
        let patch_text = std::fs::read_to_string(&self.patch)
            .map_err(|e| CliError::failure(format!("failed to read patch: {e}")))?;
        let layout_diff: diff::LayoutDiff = serde_json::from_str(&patch_text)
            .map_err(|e| CliError::failure(format!("invalid patch file: {e}")))?;

        let patched = diff::apply_layout_patch(&source, &layout_diff)?;
        let destination = self.output.clone().unwrap_or_else(|| self.source.clone());
        patched.save(&destination)?;
        println!("patched layout written to {}", destination.display());
        Ok(ExitCode::Success)
    }
}
