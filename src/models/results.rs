//! Result records returned by the high-level operations.
//!
//! Results always carry both a human-readable message list and the
//! machine-readable error kind; the CLI layer decides presentation (plain
//! text or the JSON mirror of these records).

use super::build::FirmwareOutputFiles;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Common fields shared by all operation results.
pub trait ResultRecord {
    fn success(&self) -> bool;
    fn messages(&self) -> &[String];
    fn errors(&self) -> &[String];
}

macro_rules! impl_result_record {
    ($ty:ty) => {
        impl ResultRecord for $ty {
            fn success(&self) -> bool {
                self.success && self.errors.is_empty()
            }
            fn messages(&self) -> &[String] {
                &self.messages
            }
            fn errors(&self) -> &[String] {
                &self.errors
            }
        }
    };
}

/// Result of layout compile/parse operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keymap_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_count: Option<usize>,
}

impl LayoutResult {
    #[must_use]
    pub fn new() -> Self {
        Self {
            success: true,
            timestamp: Utc::now(),
            messages: Vec::new(),
            errors: Vec::new(),
            error_kind: None,
            keymap_path: None,
            conf_path: None,
            json_path: None,
            profile_name: None,
            layer_count: None,
        }
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.messages.push(message);
    }

    pub fn fail(&mut self, error: &crate::error::Error) {
        self.errors.push(error.to_string());
        self.error_kind = Some(error.kind().to_string());
        self.success = false;
    }
}

impl Default for LayoutResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Build outcome classification for split-board pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    /// One side of a split pair built; the other is missing. Not cached.
    PartialSuccess,
    Failed,
}

/// Result of a firmware build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub outcome: BuildOutcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_files: Option<FirmwareOutputFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_time_seconds: Option<f64>,
}

impl BuildResult {
    #[must_use]
    pub fn new() -> Self {
        Self {
            success: true,
            outcome: BuildOutcome::Success,
            timestamp: Utc::now(),
            messages: Vec::new(),
            errors: Vec::new(),
            error_kind: None,
            output_files: None,
            build_id: None,
            build_time_seconds: None,
        }
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.messages.push(message);
    }

    pub fn fail(&mut self, error: &crate::error::Error) {
        self.errors.push(error.to_string());
        self.error_kind = Some(error.kind().to_string());
        self.success = false;
        self.outcome = BuildOutcome::Failed;
    }
}

impl Default for BuildResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-device detail within a flash result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashDeviceDetail {
    pub name: String,
    /// `success` or `failed`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a flash operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub devices_flashed: usize,
    pub devices_failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_details: Vec<FlashDeviceDetail>,
}

impl FlashResult {
    #[must_use]
    pub fn new() -> Self {
        Self {
            success: true,
            timestamp: Utc::now(),
            messages: Vec::new(),
            errors: Vec::new(),
            error_kind: None,
            devices_flashed: 0,
            devices_failed: 0,
            firmware_path: None,
            device_details: Vec::new(),
        }
    }

    /// Records a successful device flash.
    pub fn add_device_success(&mut self, name: impl Into<String>, serial: Option<String>) {
        let name = name.into();
        self.devices_flashed += 1;
        self.messages.push(format!("flashed device: {name}"));
        self.device_details.push(FlashDeviceDetail {
            name,
            status: "success".to_string(),
            serial,
            error: None,
        });
    }

    /// Records a failed device flash.
    pub fn add_device_failure(&mut self, name: impl Into<String>, error: impl Into<String>) {
        let name = name.into();
        let error = error.into();
        self.devices_failed += 1;
        self.errors.push(format!("failed to flash {name}: {error}"));
        self.success = false;
        self.device_details.push(FlashDeviceDetail {
            name,
            status: "failed".to_string(),
            serial: None,
            error: Some(error),
        });
    }
}

impl Default for FlashResult {
    fn default() -> Self {
        Self::new()
    }
}

impl_result_record!(LayoutResult);
impl_result_record!(BuildResult);
impl_result_record!(FlashResult);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_layout_result_fail_records_kind() {
        let mut result = LayoutResult::new();
        result.fail(&Error::UndefinedVariable {
            path: "nope".to_string(),
        });
        assert!(!ResultRecord::success(&result));
        assert_eq!(result.error_kind.as_deref(), Some("undefined_variable"));
        assert!(result.errors[0].contains("nope"));
    }

    #[test]
    fn test_flash_result_counts() {
        let mut result = FlashResult::new();
        result.add_device_success("/dev/sda", Some("GLV80-1".to_string()));
        result.add_device_failure("/dev/sdb", "mount failed");
        assert_eq!(result.devices_flashed, 1);
        assert_eq!(result.devices_failed, 1);
        assert!(!ResultRecord::success(&result));
        assert_eq!(result.device_details.len(), 2);
    }

    #[test]
    fn test_build_result_json_shape() {
        let result = BuildResult::new();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"outcome\":\"success\""));
        assert!(!json.contains("output_files"));
    }
}
