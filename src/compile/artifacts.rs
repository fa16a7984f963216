//! Artifact collection after a successful container run.
//!
//! Each target's UF2 is expected at `<build_dir>/<target>/zephyr/zmk.uf2`.
//! Collected images are named by split-side convention (`_lh`/`_rh`) or left
//! unified, and an `_artefacts.zip` bundles everything for support requests.

use crate::adapters::fs::zip_directory;
use crate::error::{io_ctx, Error, Result};
use crate::models::results::BuildOutcome;
use crate::models::{BuildMatrix, FirmwareOutputFiles};
use std::path::{Path, PathBuf};

/// Where one collected artifact came from and ended up.
#[derive(Debug, Clone)]
struct CollectedArtifact {
    side: Option<&'static str>,
    destination: PathBuf,
}

/// Collects UF2 artifacts from a finished build tree.
///
/// `base_name` is the layout file stem used for default naming. Returns the
/// output file set plus the pairing outcome: a split matrix with only one
/// side present is a partial success and must not populate the build cache.
pub fn collect_artifacts(
    build_root: &Path,
    matrix: &BuildMatrix,
    output_dir: &Path,
    base_name: &str,
) -> Result<(FirmwareOutputFiles, BuildOutcome)> {
    std::fs::create_dir_all(output_dir).map_err(io_ctx(output_dir, "failed to create"))?;

    let mut collected = Vec::new();
    let mut missing = Vec::new();

    for target in &matrix.include {
        let source = build_root
            .join(target.build_dir_name())
            .join("zephyr")
            .join("zmk.uf2");
        if !source.is_file() {
            missing.push(target.build_dir_name());
            continue;
        }

        let side = target.split_side();
        let file_name = match side {
            Some(side) => format!("{base_name}_{side}.uf2"),
            None => format!("{base_name}.uf2"),
        };
        let destination = output_dir.join(file_name);
        std::fs::copy(&source, &destination).map_err(io_ctx(&destination, "failed to copy to"))?;
        collected.push(CollectedArtifact { side, destination });
    }

    if collected.is_empty() {
        return Err(Error::BuildFailed(format!(
            "container succeeded but no UF2 artifacts were produced (missing: {})",
            missing.join(", ")
        )));
    }

    let mut output = FirmwareOutputFiles {
        output_dir: output_dir.to_path_buf(),
        ..FirmwareOutputFiles::default()
    };
    for artifact in &collected {
        match artifact.side {
            Some("lh") => output.left_uf2 = Some(artifact.destination.clone()),
            Some("rh") => output.right_uf2 = Some(artifact.destination.clone()),
            _ => output.main_uf2 = Some(artifact.destination.clone()),
        }
    }

    // Bundle logs and intermediate build products for support requests.
    let zip_path = output_dir.join(format!("{base_name}_artefacts.zip"));
    if build_root.is_dir() {
        zip_directory(build_root, &zip_path)?;
        output.artifacts_zip = Some(zip_path);
    }

    let outcome = if matrix.is_split() && (output.left_uf2.is_none() || output.right_uf2.is_none())
    {
        tracing::warn!(
            "split matrix produced only one side (missing: {})",
            missing.join(", ")
        );
        BuildOutcome::PartialSuccess
    } else if missing.is_empty() {
        BuildOutcome::Success
    } else {
        BuildOutcome::PartialSuccess
    };

    Ok((output, outcome))
}
