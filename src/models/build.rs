//! Build matrix and firmware output models.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One board+shield combination to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub board: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shield: Option<String>,
    /// Override for the artifact file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Extra arguments appended to the CMake invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmake_args: Vec<String>,
}

impl BuildTarget {
    /// Creates a board-only target.
    pub fn board(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            shield: None,
            artifact_name: None,
            snippet: None,
            cmake_args: Vec::new(),
        }
    }

    /// Directory name for the target's build tree, `<board>[_<shield>]`.
    #[must_use]
    pub fn build_dir_name(&self) -> String {
        match &self.shield {
            Some(shield) => format!("{}_{shield}", self.board),
            None => self.board.clone(),
        }
    }

    /// Artifact stem: the explicit `artifact_name` or the build dir name.
    #[must_use]
    pub fn artifact_stem(&self) -> String {
        self.artifact_name
            .clone()
            .unwrap_or_else(|| self.build_dir_name())
    }

    /// Side suffix for split keyboards: `lh`, `rh`, or `None` for unified
    /// boards. Matched against board and shield names.
    #[must_use]
    pub fn split_side(&self) -> Option<&'static str> {
        let haystack = format!(
            "{} {}",
            self.board,
            self.shield.as_deref().unwrap_or_default()
        );
        if haystack.contains("_lh") || haystack.contains("_left") || haystack.contains("left") {
            Some("lh")
        } else if haystack.contains("_rh")
            || haystack.contains("_right")
            || haystack.contains("right")
        {
            Some("rh")
        } else {
            None
        }
    }
}

/// The ordered set of targets for one compile.
///
/// Mirrors the upstream `build.yaml` convention:
///
/// ```yaml
/// include:
///   - board: glove80_lh
///   - board: glove80_rh
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildMatrix {
    #[serde(default)]
    pub include: Vec<BuildTarget>,
}

impl BuildMatrix {
    /// Synthesizes a matrix from a bare board list.
    #[must_use]
    pub fn from_boards(boards: &[String]) -> Self {
        Self {
            include: boards.iter().map(BuildTarget::board).collect(),
        }
    }

    /// Parses the `build.yaml` convention from a repository checkout.
    pub fn from_yaml(content: &str) -> crate::error::Result<Self> {
        serde_yml::from_str(content).map_err(|e| {
            crate::error::Error::BuildFailed(format!("invalid build.yaml matrix: {e}"))
        })
    }

    /// True when the matrix carries both a left-hand and a right-hand target.
    #[must_use]
    pub fn is_split(&self) -> bool {
        let has = |side| self.include.iter().any(|t| t.split_side() == Some(side));
        has("lh") && has("rh")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.include.len()
    }
}

/// Paths to the artifacts a successful build produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FirmwareOutputFiles {
    /// Unified firmware image for non-split keyboards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_uf2: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_uf2: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_uf2: Option<PathBuf>,
    /// Zip with build logs and intermediate artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_zip: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl FirmwareOutputFiles {
    /// All UF2 paths present, in lh/rh/main order.
    #[must_use]
    pub fn uf2_files(&self) -> Vec<&PathBuf> {
        [&self.left_uf2, &self.right_uf2, &self.main_uf2]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_matrix_from_yaml() {
        let yaml = "include:\n  - board: glove80_lh\n  - board: glove80_rh\n";
        let matrix = BuildMatrix::from_yaml(yaml).unwrap();
        assert_eq!(matrix.len(), 2);
        assert!(matrix.is_split());
    }

    #[test]
    fn test_build_matrix_shield_target() {
        let yaml = "include:\n  - board: nice_nano_v2\n    shield: corne_left\n";
        let matrix = BuildMatrix::from_yaml(yaml).unwrap();
        let target = &matrix.include[0];
        assert_eq!(target.build_dir_name(), "nice_nano_v2_corne_left");
        assert_eq!(target.split_side(), Some("lh"));
    }

    #[test]
    fn test_single_board_not_split() {
        let matrix = BuildMatrix::from_boards(&["nice_nano_v2".to_string()]);
        assert!(!matrix.is_split());
        assert!(matrix.include[0].split_side().is_none());
    }

    #[test]
    fn test_artifact_stem_override() {
        let mut target = BuildTarget::board("glove80_lh");
        assert_eq!(target.artifact_stem(), "glove80_lh");
        target.artifact_name = Some("left".to_string());
        assert_eq!(target.artifact_stem(), "left");
    }
}
