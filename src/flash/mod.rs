//! Firmware flashing: device matching and the UF2-copy loop.
//!
//! Keyboards in bootloader mode enumerate as USB mass storage. Devices are
//! matched against the profile's query string, e.g.
//! `vendor=Adafruit and serial~=GLV80-.* and removable=1`, then the UF2 is
//! copied onto each matching mount. The OS probe is a trait so the loop is
//! testable without hardware.

use crate::error::{Error, Result};
use crate::models::results::FlashResult;
use crate::profile::KeyboardProfile;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Comparison operator in a device query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    /// `field=value`
    Eq,
    /// `field!=value`
    Ne,
    /// `field~=regex`
    Matches,
}

/// One `field OP value` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCondition {
    pub field: String,
    pub op: QueryOp,
    pub value: String,
}

/// Parses a query of ` and `-joined conditions.
pub fn parse_query(query: &str) -> Result<Vec<QueryCondition>> {
    let mut conditions = Vec::new();
    for part in query.split(" and ") {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (field, op, value) = if let Some((f, v)) = part.split_once("!=") {
            (f, QueryOp::Ne, v)
        } else if let Some((f, v)) = part.split_once("~=") {
            (f, QueryOp::Matches, v)
        } else if let Some((f, v)) = part.split_once('=') {
            (f, QueryOp::Eq, v)
        } else {
            return Err(Error::FlashFailed(format!(
                "invalid device query condition: '{part}'"
            )));
        };
        conditions.push(QueryCondition {
            field: field.trim().to_lowercase(),
            op,
            value: value.trim().to_string(),
        });
    }
    Ok(conditions)
}

/// A block device as reported by the OS probe. Field names are lowercase
/// lsblk column names (`name`, `label`, `vendor`, `serial`, `rm`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDevice {
    pub fields: BTreeMap<String, String>,
}

impl BlockDevice {
    #[must_use]
    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map_or("", String::as_str)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.get("name")
    }

    #[must_use]
    pub fn serial(&self) -> &str {
        self.get("serial")
    }
}

/// Evaluates one condition, case-insensitively.
fn evaluate_condition(device: &BlockDevice, condition: &QueryCondition) -> Result<bool> {
    let device_value = device.get(&condition.field).to_lowercase();
    let value = condition.value.to_lowercase();
    match condition.op {
        QueryOp::Eq => Ok(device_value == value),
        QueryOp::Ne => Ok(device_value != value),
        QueryOp::Matches => {
            let re = Regex::new(&value).map_err(|e| {
                Error::FlashFailed(format!("invalid regex in device query: {e}"))
            })?;
            Ok(re.is_match(&device_value))
        }
    }
}

/// True when a device satisfies every condition.
pub fn matches_query(device: &BlockDevice, conditions: &[QueryCondition]) -> Result<bool> {
    for condition in conditions {
        if !evaluate_condition(device, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// OS boundary for device enumeration and mounting. Implemented externally;
/// tests use a scripted probe.
pub trait DeviceProbe: Send + Sync {
    fn list_block_devices(&self) -> Result<Vec<BlockDevice>>;
    /// Mounts a device and returns the mountpoint.
    fn mount(&self, device: &BlockDevice) -> Result<PathBuf>;
    /// Best-effort unmount; bootloaders disconnect abruptly after flashing.
    fn unmount(&self, device: &BlockDevice) -> Result<()>;
}

/// `lsblk`-backed probe using `udisksctl` for mounting.
pub struct LsblkProbe;

impl DeviceProbe for LsblkProbe {
    fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        let output = std::process::Command::new("lsblk")
            .args(["--json", "-O", "--paths"])
            .output()
            .map_err(|e| Error::io("failed to run lsblk", e))?;
        if !output.status.success() {
            return Err(Error::FlashFailed("lsblk exited non-zero".to_string()));
        }
        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::FlashFailed(format!("lsblk output decode failed: {e}")))?;

        let mut devices = Vec::new();
        if let Some(list) = parsed.get("blockdevices").and_then(|v| v.as_array()) {
            for entry in list {
                let Some(map) = entry.as_object() else {
                    continue;
                };
                let mut device = BlockDevice::default();
                for (key, value) in map {
                    let text = match value {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                        serde_json::Value::Number(n) => n.to_string(),
                        _ => continue,
                    };
                    device.fields.insert(key.to_lowercase(), text);
                }
                devices.push(device);
            }
        }
        Ok(devices)
    }

    fn mount(&self, device: &BlockDevice) -> Result<PathBuf> {
        if let Some(existing) = device.fields.get("mountpoint") {
            if !existing.is_empty() {
                return Ok(PathBuf::from(existing));
            }
        }
        let output = std::process::Command::new("udisksctl")
            .args(["mount", "-b", device.name()])
            .output()
            .map_err(|e| Error::io("failed to run udisksctl", e))?;
        if !output.status.success() {
            return Err(Error::FlashFailed(format!(
                "mount failed for {}",
                device.name()
            )));
        }
        // "Mounted /dev/sda at /run/media/user/GLV80RHBOOT"
        let text = String::from_utf8_lossy(&output.stdout);
        text.split(" at ")
            .nth(1)
            .map(|p| PathBuf::from(p.trim().trim_end_matches('.')))
            .ok_or_else(|| {
                Error::FlashFailed(format!("could not parse mountpoint for {}", device.name()))
            })
    }

    fn unmount(&self, device: &BlockDevice) -> Result<()> {
        let _ = std::process::Command::new("udisksctl")
            .args(["unmount", "-b", device.name()])
            .output();
        Ok(())
    }
}

/// Flash loop parameters.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    pub timeout: Duration,
    /// Stop after this many devices flashed (2 for split keyboards).
    pub count: usize,
    /// Skip devices that were already attached when the loop started.
    pub skip_existing: bool,
    /// Keep polling for devices until the count is reached or time runs out.
    pub wait: bool,
    pub poll_interval: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            count: 2,
            skip_existing: false,
            wait: true,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Matching devices currently attached.
pub fn list_devices(probe: &dyn DeviceProbe, profile: &KeyboardProfile) -> Result<Vec<BlockDevice>> {
    let conditions = parse_query(&profile.keyboard_config.flash.device_query)?;
    let mut matching = Vec::new();
    for device in probe.list_block_devices()? {
        if matches_query(&device, &conditions)? {
            matching.push(device);
        }
    }
    Ok(matching)
}

/// Copies the firmware onto matching devices until `count` devices have been
/// flashed or the timeout expires.
pub fn flash_firmware(
    probe: &dyn DeviceProbe,
    firmware: &Path,
    profile: &KeyboardProfile,
    options: &FlashOptions,
) -> Result<FlashResult> {
    if !firmware.is_file() {
        return Err(Error::FlashFailed(format!(
            "firmware file not found: {}",
            firmware.display()
        )));
    }
    let conditions = parse_query(&profile.keyboard_config.flash.device_query)?;

    let mut result = FlashResult::new();
    result.firmware_path = Some(firmware.to_path_buf());

    let mut skipped: HashSet<String> = HashSet::new();
    if options.skip_existing {
        for device in probe.list_block_devices()? {
            if matches_query(&device, &conditions)? {
                skipped.insert(device.name().to_string());
            }
        }
    }

    let started = Instant::now();
    let mut flashed: HashSet<String> = HashSet::new();

    loop {
        for device in probe.list_block_devices()? {
            if result.devices_flashed >= options.count {
                break;
            }
            let name = device.name().to_string();
            if flashed.contains(&name) || skipped.contains(&name) {
                continue;
            }
            if !matches_query(&device, &conditions)? {
                continue;
            }

            match flash_one(probe, firmware, &device) {
                Ok(()) => {
                    let serial = device.serial();
                    result.add_device_success(
                        &name,
                        (!serial.is_empty()).then(|| serial.to_string()),
                    );
                }
                Err(e) => result.add_device_failure(&name, e.to_string()),
            }
            flashed.insert(name);
        }

        if result.devices_flashed >= options.count {
            break;
        }
        if !options.wait || started.elapsed() >= options.timeout {
            break;
        }
        std::thread::sleep(options.poll_interval);
    }

    if result.devices_flashed < options.count {
        result.errors.push(format!(
            "flashed {} of {} devices before timeout",
            result.devices_flashed, options.count
        ));
        result.success = false;
        result.error_kind = Some("flash_failed".to_string());
    }
    Ok(result)
}

fn flash_one(probe: &dyn DeviceProbe, firmware: &Path, device: &BlockDevice) -> Result<()> {
    let mountpoint = probe.mount(device)?;
    let file_name = firmware
        .file_name()
        .ok_or_else(|| Error::FlashFailed("firmware path has no file name".to_string()))?;
    let destination = mountpoint.join(file_name);
    std::fs::copy(firmware, &destination)
        .map_err(|e| Error::FlashFailed(format!("copy to {} failed: {e}", mountpoint.display())))?;
    // The bootloader reboots as soon as the image lands; unmount may fail.
    let _ = probe.unmount(device);
    Ok(())
}
