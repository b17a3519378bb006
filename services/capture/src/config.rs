//! Configuration management for the capture service.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use chrono::Weekday;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Upper bound on frames held by one camera's ring buffer or post-event clip.
pub const MAX_CAPTURE_FRAMES: u64 = 36_000;

/// Main configuration for the capture service.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureServiceConfig {
    /// Deployment identity stamped into records
    #[serde(default)]
    pub site: SiteConfig,

    /// Source index to camera identity table
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraEntry>,

    /// Rolling buffer, clip and snapshot configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Alert decision configuration
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Access schedule configuration
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Structured alert log destination
    #[serde(default)]
    pub log: AlertLogConfig,

    /// Perception pipeline hand-off
    #[serde(default)]
    pub input: InputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Health reporting configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Deployment identity.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Customer identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Physical location identifier
    #[serde(default = "default_site_id")]
    pub site_id: String,

    /// Device identifier (defaults to the host name)
    #[serde(default)]
    pub device_id: Option<String>,
}

/// One row of the camera table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CameraEntry {
    /// Upstream source index
    pub index: u32,

    /// Camera identity
    pub name: String,
}

/// Rolling buffer and artifact configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Root directory for clips and snapshots
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Seconds of pre-event video kept in memory
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: u32,

    /// Seconds recorded after the last trigger
    #[serde(default = "default_post_event_seconds")]
    pub post_event_seconds: u32,

    /// Frames per second delivered upstream
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Expected frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Expected frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Minimum seconds between two snapshot bursts per camera
    #[serde(default = "default_snapshot_cooldown_seconds")]
    pub snapshot_cooldown_seconds: f64,

    /// JPEG quality for stills and clip frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// A visual trigger tag and the detection labels that raise it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerGroup {
    /// Tag emitted when any label is present (e.g. "FIRE_SMOKE_DETECTED")
    pub tag: String,

    /// Labels that raise the tag
    pub labels: Vec<String>,
}

/// Alert decision configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Minimum seconds between two EVENT records per camera
    #[serde(default = "default_event_cooldown_seconds")]
    pub event_cooldown_seconds: f64,

    /// Minimum seconds between two METRIC records per camera
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: f64,

    /// Labels that make a batch worth reporting at all
    #[serde(default = "default_countable_classes")]
    pub countable_class_allowlist: Vec<String>,

    /// Label counted into `people_count`
    #[serde(default = "default_person_label")]
    pub person_label: String,

    /// Visual trigger groups
    #[serde(default = "default_trigger_groups")]
    pub visual_trigger_label_groups: Vec<TriggerGroup>,
}

/// Access schedule configuration. Times are local wall-clock, 24-hour.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_office_open_hour")]
    pub office_open_hour: u32,
    #[serde(default = "default_office_open_minute")]
    pub office_open_minute: u32,
    #[serde(default = "default_office_close_hour")]
    pub office_close_hour: u32,
    #[serde(default = "default_office_close_minute")]
    pub office_close_minute: u32,

    /// Cameras governed by the restricted-hours window instead of office hours
    #[serde(default = "default_restricted_cameras")]
    pub restricted_cameras: Vec<String>,

    #[serde(default = "default_restricted_open_hour")]
    pub restricted_open_hour: u32,
    #[serde(default)]
    pub restricted_open_minute: u32,
    #[serde(default = "default_restricted_close_hour")]
    pub restricted_close_hour: u32,
    #[serde(default)]
    pub restricted_close_minute: u32,

    /// Weekday on which every default-class camera is restricted
    #[serde(default = "default_restricted_weekday")]
    pub restricted_weekday: String,

    /// IANA timezone for the schedule (host local time when unset)
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Layout of the alert log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// A single JSON array document kept valid after every write
    JsonArray,
    /// One JSON object per line
    Ndjson,
}

/// Alert log destination.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertLogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    #[serde(default = "default_log_format_kind")]
    pub format: LogFormat,
}

/// Perception pipeline hand-off configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// NDJSON message source (stdin when unset)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Per-camera queue size between the router and the camera worker
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Health reporting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Interval between statistics reports in seconds
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

// Default value functions
fn default_client_id() -> String {
    "default_client".to_string()
}
fn default_site_id() -> String {
    "HEAD_OFFICE".to_string()
}
fn default_cameras() -> Vec<CameraEntry> {
    ["RECEPTION_AREA", "EMPLOYEE_AREA", "BOSS_CABIN", "CAFETERIA"]
        .iter()
        .enumerate()
        .map(|(index, name)| CameraEntry {
            index: index as u32,
            name: name.to_string(),
        })
        .collect()
}
fn default_output_root() -> PathBuf {
    PathBuf::from("alerts")
}
fn default_buffer_seconds() -> u32 {
    3
}
fn default_post_event_seconds() -> u32 {
    5
}
fn default_fps() -> u32 {
    15
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    384
}
fn default_snapshot_cooldown_seconds() -> f64 {
    3.0
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_event_cooldown_seconds() -> f64 {
    5.0
}
fn default_heartbeat_interval_seconds() -> f64 {
    60.0
}
fn default_countable_classes() -> Vec<String> {
    vec!["person".to_string(), "tv".to_string()]
}
fn default_person_label() -> String {
    "person".to_string()
}
fn default_trigger_groups() -> Vec<TriggerGroup> {
    vec![
        TriggerGroup {
            tag: "FIRE_SMOKE_DETECTED".to_string(),
            labels: vec!["fire".to_string(), "smoke".to_string()],
        },
        TriggerGroup {
            tag: "VIOLENCE_DETECTED".to_string(),
            labels: vec!["violence".to_string(), "fight".to_string()],
        },
    ]
}
fn default_office_open_hour() -> u32 {
    9
}
fn default_office_open_minute() -> u32 {
    30
}
fn default_office_close_hour() -> u32 {
    18
}
fn default_office_close_minute() -> u32 {
    15
}
fn default_restricted_cameras() -> Vec<String> {
    vec!["BOSS_CABIN".to_string()]
}
fn default_restricted_open_hour() -> u32 {
    11
}
fn default_restricted_close_hour() -> u32 {
    16
}
fn default_restricted_weekday() -> String {
    "Sunday".to_string()
}
fn default_log_path() -> PathBuf {
    PathBuf::from("detection_log.json")
}
fn default_log_format_kind() -> LogFormat {
    LogFormat::JsonArray
}
fn default_queue_size() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_health_interval() -> u64 {
    30
}

impl Default for CaptureServiceConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            cameras: default_cameras(),
            capture: CaptureConfig::default(),
            alerts: AlertConfig::default(),
            policy: PolicyConfig::default(),
            log: AlertLogConfig::default(),
            input: InputConfig::default(),
            logging: LoggingConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            site_id: default_site_id(),
            device_id: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            buffer_seconds: default_buffer_seconds(),
            post_event_seconds: default_post_event_seconds(),
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            snapshot_cooldown_seconds: default_snapshot_cooldown_seconds(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            event_cooldown_seconds: default_event_cooldown_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            countable_class_allowlist: default_countable_classes(),
            person_label: default_person_label(),
            visual_trigger_label_groups: default_trigger_groups(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            office_open_hour: default_office_open_hour(),
            office_open_minute: default_office_open_minute(),
            office_close_hour: default_office_close_hour(),
            office_close_minute: default_office_close_minute(),
            restricted_cameras: default_restricted_cameras(),
            restricted_open_hour: default_restricted_open_hour(),
            restricted_open_minute: 0,
            restricted_close_hour: default_restricted_close_hour(),
            restricted_close_minute: 0,
            restricted_weekday: default_restricted_weekday(),
            timezone: None,
        }
    }
}

impl Default for AlertLogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            format: default_log_format_kind(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: None,
            queue_size: default_queue_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
        }
    }
}

impl CaptureServiceConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with VIGIL_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. VIGIL_CAPTURE__POST_EVENT_SECONDS=10
            .add_source(env_source())
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(env_source()).build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let capture = &self.capture;
        if capture.fps == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.fps".to_string(),
                message: "FPS must be greater than 0".to_string(),
            });
        }
        if capture.buffer_seconds == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.buffer_seconds".to_string(),
                message: "Pre-event buffer must hold at least one second".to_string(),
            });
        }
        if capture.post_event_seconds == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.post_event_seconds".to_string(),
                message: "Post-event duration must be greater than 0".to_string(),
            });
        }
        check_frames(
            "capture.buffer_seconds",
            capture.buffer_seconds,
            capture.fps,
        )?;
        check_frames(
            "capture.post_event_seconds",
            capture.post_event_seconds,
            capture.fps,
        )?;
        if capture.width == 0 || capture.height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }
        if !(1..=100).contains(&capture.jpeg_quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.jpeg_quality".to_string(),
                message: "Quality must be within 1..=100".to_string(),
            });
        }
        check_seconds("capture.snapshot_cooldown_seconds", capture.snapshot_cooldown_seconds)?;
        check_seconds("alerts.event_cooldown_seconds", self.alerts.event_cooldown_seconds)?;
        check_seconds(
            "alerts.heartbeat_interval_seconds",
            self.alerts.heartbeat_interval_seconds,
        )?;

        if self.alerts.countable_class_allowlist.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "alerts.countable_class_allowlist".to_string(),
            ));
        }
        for group in &self.alerts.visual_trigger_label_groups {
            if group.tag.is_empty() || group.labels.is_empty() {
                return Err(ConfigValidationError::InvalidValue {
                    field: "alerts.visual_trigger_label_groups".to_string(),
                    message: format!("Group '{}' needs a tag and at least one label", group.tag),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if camera.name.is_empty() {
                return Err(ConfigValidationError::MissingField(format!(
                    "cameras[{}].name",
                    camera.index
                )));
            }
            if !seen.insert(camera.index) {
                return Err(ConfigValidationError::InvalidValue {
                    field: "cameras".to_string(),
                    message: format!("Duplicate source index {}", camera.index),
                });
            }
        }

        let policy = &self.policy;
        check_window(
            "policy.office",
            (policy.office_open_hour, policy.office_open_minute),
            (policy.office_close_hour, policy.office_close_minute),
        )?;
        check_window(
            "policy.restricted",
            (policy.restricted_open_hour, policy.restricted_open_minute),
            (policy.restricted_close_hour, policy.restricted_close_minute),
        )?;
        policy.weekday()?;
        policy.tz()?;

        if self.input.queue_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "input.queue_size".to_string(),
                message: "Queue size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Create the output root and alert log directory and check they accept
    /// new files.
    pub fn prepare_output_paths(&self) -> Result<(), ConfigValidationError> {
        ensure_writable_dir(&self.capture.output_root)?;

        if let Some(parent) = self.log.path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_writable_dir(parent)?;
            }
        }

        Ok(())
    }

    /// Device identity, falling back to the host name.
    pub fn device_id(&self) -> String {
        self.site.device_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }
}

impl CaptureConfig {
    /// Ring buffer capacity in frames.
    pub fn buffer_capacity(&self) -> usize {
        (self.buffer_seconds as usize).saturating_mul(self.fps as usize)
    }

    /// Frames recorded after the last trigger.
    pub fn post_event_frames(&self) -> u32 {
        self.post_event_seconds.saturating_mul(self.fps)
    }

    /// Get snapshot cooldown as a chrono Duration.
    pub fn snapshot_cooldown(&self) -> chrono::Duration {
        seconds_to_duration(self.snapshot_cooldown_seconds)
    }
}

impl AlertConfig {
    /// Get event cooldown as a chrono Duration.
    pub fn event_cooldown(&self) -> chrono::Duration {
        seconds_to_duration(self.event_cooldown_seconds)
    }

    /// Get heartbeat interval as a chrono Duration.
    pub fn heartbeat_interval(&self) -> chrono::Duration {
        seconds_to_duration(self.heartbeat_interval_seconds)
    }
}

/// Millisecond precision; values are validated non-negative and finite.
fn seconds_to_duration(seconds: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((seconds * 1000.0).round() as i64)
}

impl PolicyConfig {
    /// Parse the restricted weekday ("Sunday", "sun", ...).
    pub fn weekday(&self) -> Result<Weekday, ConfigValidationError> {
        Weekday::from_str(&self.restricted_weekday).map_err(|_| {
            ConfigValidationError::InvalidValue {
                field: "policy.restricted_weekday".to_string(),
                message: format!("Unknown weekday '{}'", self.restricted_weekday),
            }
        })
    }

    /// Parse the configured timezone, if any.
    pub fn tz(&self) -> Result<Option<chrono_tz::Tz>, ConfigValidationError> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<chrono_tz::Tz>()
                    .map_err(|_| ConfigValidationError::InvalidValue {
                        field: "policy.timezone".to_string(),
                        message: format!("Unknown timezone '{}'", name),
                    })
            })
            .transpose()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("VIGIL")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("alerts.countable_class_allowlist")
        .with_list_parse_key("policy.restricted_cameras")
}

fn check_frames(field: &str, seconds: u32, fps: u32) -> Result<(), ConfigValidationError> {
    if seconds as u64 * fps as u64 > MAX_CAPTURE_FRAMES {
        return Err(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            message: format!(
                "{}s at {} fps exceeds {} frames",
                seconds, fps, MAX_CAPTURE_FRAMES
            ),
        });
    }
    Ok(())
}

fn check_seconds(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            message: "Must be a non-negative number of seconds".to_string(),
        });
    }
    Ok(())
}

fn check_window(
    field: &str,
    (open_hour, open_minute): (u32, u32),
    (close_hour, close_minute): (u32, u32),
) -> Result<(), ConfigValidationError> {
    if open_hour > 23 || close_hour > 23 || open_minute > 59 || close_minute > 59 {
        return Err(ConfigValidationError::InvalidSchedule {
            field: field.to_string(),
            message: "Hours must be 0-23 and minutes 0-59".to_string(),
        });
    }
    if open_hour * 60 + open_minute >= close_hour * 60 + close_minute {
        return Err(ConfigValidationError::InvalidSchedule {
            field: field.to_string(),
            message: format!(
                "Opening {:02}:{:02} must precede closing {:02}:{:02}",
                open_hour, open_minute, close_hour, close_minute
            ),
        });
    }
    Ok(())
}

fn ensure_writable_dir(dir: &Path) -> Result<(), ConfigValidationError> {
    let unwritable = |e: std::io::Error| ConfigValidationError::UnwritablePath {
        path: dir.to_path_buf(),
        message: e.to_string(),
    };

    fs::create_dir_all(dir).map_err(unwritable)?;

    let probe = dir.join(".vigil-write-probe");
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map_err(unwritable)?;
    let _ = fs::remove_file(&probe);

    Ok(())
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid schedule for {field}: {message}")]
    InvalidSchedule { field: String, message: String },

    #[error("Output path {path:?} is not writable: {message}")]
    UnwritablePath { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CaptureServiceConfig {
        CaptureServiceConfig::default()
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_fps() {
        let mut config = create_test_config();
        config.capture.fps = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_inverted_office_hours() {
        let mut config = create_test_config();
        config.policy.office_open_hour = 19;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_out_of_range_minute() {
        let mut config = create_test_config();
        config.policy.restricted_close_minute = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_unknown_weekday() {
        let mut config = create_test_config();
        config.policy.restricted_weekday = "Caturday".to_string();
        assert!(config.validate().is_err());

        config.policy.restricted_weekday = "sat".to_string();
        assert_eq!(config.policy.weekday().unwrap(), Weekday::Sat);
    }

    #[test]
    fn test_timezone_parsing() {
        let mut config = create_test_config();
        config.policy.timezone = Some("Asia/Kolkata".to_string());
        assert!(config.policy.tz().unwrap().is_some());

        config.policy.timezone = Some("Mars/Olympus".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_camera_index() {
        let mut config = create_test_config();
        config.cameras.push(CameraEntry {
            index: 0,
            name: "DUPLICATE".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_derived_frame_counts() {
        let config = create_test_config();
        assert_eq!(config.capture.buffer_capacity(), 45);
        assert_eq!(config.capture.post_event_frames(), 75);
    }

    #[test]
    fn test_cooldown_durations() {
        let mut config = create_test_config();
        config.capture.snapshot_cooldown_seconds = 2.5;
        config.alerts.event_cooldown_seconds = 30.0;
        config.alerts.heartbeat_interval_seconds = 0.0;

        assert_eq!(config.capture.snapshot_cooldown(), chrono::Duration::milliseconds(2500));
        assert_eq!(config.alerts.event_cooldown(), chrono::Duration::seconds(30));
        assert_eq!(config.alerts.heartbeat_interval(), chrono::Duration::zero());
    }

    #[test]
    fn test_oversized_capture_window() {
        let mut config = create_test_config();
        config.capture.fps = 1_000;
        config.capture.buffer_seconds = 3_600;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { ref field, .. }) if field == "capture.buffer_seconds"
        ));

        config.capture.buffer_seconds = 3;
        config.capture.post_event_seconds = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { ref field, .. }) if field == "capture.post_event_seconds"
        ));
        assert_eq!(config.capture.post_event_frames(), u32::MAX);
    }

    #[test]
    fn test_prepare_output_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.capture.output_root = dir.path().join("alerts");
        config.log.path = dir.path().join("logs").join("detection_log.json");

        config.prepare_output_paths().unwrap();
        assert!(config.capture.output_root.is_dir());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_fps(), 15);
        assert_eq!(default_event_cooldown_seconds(), 5.0);
        assert_eq!(default_heartbeat_interval_seconds(), 60.0);
        assert_eq!(default_cameras()[2].name, "BOSS_CABIN");
    }
}
