//! Application-wide constants.
//!
//! This module defines constants used throughout the application,
//! including the application name, environment variables, and cache defaults.

/// The display name of the application (human-readable).
pub const APP_NAME: &str = "Glovebox";

/// The binary name of the application (used in command examples).
pub const APP_BINARY_NAME: &str = "glovebox";

/// Environment variable holding colon-separated extra keyboard descriptor directories.
pub const KEYBOARD_PATH_ENV: &str = "GLOVEBOX_KEYBOARD_PATH";

/// Environment variable naming an implicit layout input for `firmware compile`.
pub const JSON_FILE_ENV: &str = "GLOVEBOX_JSON_FILE";

/// Directory names every complete west workspace contains.
pub const WORKSPACE_COMPONENTS: [&str; 4] = ["zmk", "zephyr", "modules", ".west"];

/// Default cache TTLs in days, by cache level.
pub const TTL_BASE_DAYS: u64 = 30;
pub const TTL_BRANCH_DAYS: u64 = 14;
pub const TTL_FULL_DAYS: u64 = 7;
pub const TTL_BUILD_DAYS: u64 = 3;

/// Grace period between container terminate and kill, in seconds.
pub const CONTAINER_TERM_GRACE_SECS: u64 = 5;

/// Number of trailing container log lines carried in a failure report.
pub const CONTAINER_LOG_TAIL: usize = 200;

/// Maximum nesting depth accepted for binding parameters during validation.
pub const MAX_BINDING_DEPTH: usize = 8;
