//! Structured alert records written to the alert log.

use crate::types::{CameraId, Detection};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Schema version stamped into camera health records.
pub const RECORD_VERSION: &str = "1.0";

/// Deployment identity shared by every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteIdentity {
    pub client: String,
    pub site: String,
    pub device: String,
}

/// Overall status of a detection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Critical,
    Safe,
}

/// Metadata of EVENT and METRIC records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub ts: String,
    pub cam_id: CameraId,
    pub site: String,
    pub status: Status,
}

/// Metadata of camera health records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMeta {
    pub ver: String,
    pub ts: String,
    pub client: String,
    pub site: String,
    pub device: String,
    pub cam_id: CameraId,
    pub src_id: u32,
}

/// A detection as written to the log: confidence rounded to four decimals,
/// box components to whole pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedDetection {
    pub class_id: i32,
    pub label: String,
    pub confidence: f64,
    pub bbox: LoggedBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedBox {
    pub top: i64,
    pub left: i64,
    pub width: i64,
    pub height: i64,
}

impl From<&Detection> for LoggedDetection {
    fn from(det: &Detection) -> Self {
        Self {
            class_id: det.class_id,
            label: det.label.clone(),
            confidence: (det.confidence as f64 * 10_000.0).round() / 10_000.0,
            bbox: LoggedBox {
                top: det.bbox.top.round() as i64,
                left: det.bbox.left.round() as i64,
                width: det.bbox.width.round() as i64,
                height: det.bbox.height.round() as i64,
            },
        }
    }
}

/// Body of an EVENT record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub triggers: Vec<String>,
    pub people_count: usize,
    pub detections: Vec<LoggedDetection>,
    /// Whether evidence capture started; absent when the camera has no buffer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_triggered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_error: Option<String>,
}

/// Body of a METRIC record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBody {
    /// Triggers still active while the event limiter was cooling down
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
    pub people_count: usize,
    pub detections: Vec<LoggedDetection>,
}

/// One line of the alert log. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertRecord {
    Event {
        meta: RecordMeta,
        event: EventBody,
    },
    Metric {
        meta: RecordMeta,
        data: MetricBody,
    },
    CameraWarning {
        meta: CameraMeta,
        alerts: Vec<String>,
        error_msg: String,
    },
    CameraOffline {
        meta: CameraMeta,
        alerts: Vec<String>,
        error_msg: String,
    },
}

/// Severity of an upstream disconnect report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectSeverity {
    Warning,
    Error,
}

impl AlertRecord {
    pub fn event(
        ts: DateTime<Utc>,
        camera: &CameraId,
        site: &SiteIdentity,
        event: EventBody,
    ) -> Self {
        AlertRecord::Event {
            meta: RecordMeta {
                ts: format_ts(ts),
                cam_id: camera.clone(),
                site: site.site.clone(),
                status: Status::Critical,
            },
            event,
        }
    }

    pub fn metric(
        ts: DateTime<Utc>,
        camera: &CameraId,
        site: &SiteIdentity,
        data: MetricBody,
    ) -> Self {
        AlertRecord::Metric {
            meta: RecordMeta {
                ts: format_ts(ts),
                cam_id: camera.clone(),
                site: site.site.clone(),
                status: Status::Safe,
            },
            data,
        }
    }

    /// Camera health record for an upstream disconnect.
    pub fn camera_health(
        ts: DateTime<Utc>,
        camera: &CameraId,
        source_index: u32,
        site: &SiteIdentity,
        severity: DisconnectSeverity,
        error_msg: impl Into<String>,
    ) -> Self {
        let meta = CameraMeta {
            ver: RECORD_VERSION.to_string(),
            ts: format_ts(ts),
            client: site.client.clone(),
            site: site.site.clone(),
            device: site.device.clone(),
            cam_id: camera.clone(),
            src_id: source_index,
        };
        let error_msg = error_msg.into();

        match severity {
            DisconnectSeverity::Warning => AlertRecord::CameraWarning {
                meta,
                alerts: vec!["CAMERA_WARNING".to_string()],
                error_msg,
            },
            DisconnectSeverity::Error => AlertRecord::CameraOffline {
                meta,
                alerts: vec!["CAMERA_OFFLINE".to_string()],
                error_msg,
            },
        }
    }

    /// Record kind as written in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AlertRecord::Event { .. } => "EVENT",
            AlertRecord::Metric { .. } => "METRIC",
            AlertRecord::CameraWarning { .. } => "CAMERA_WARNING",
            AlertRecord::CameraOffline { .. } => "CAMERA_OFFLINE",
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        match self {
            AlertRecord::Event { meta, .. } | AlertRecord::Metric { meta, .. } => &meta.cam_id,
            AlertRecord::CameraWarning { meta, .. } | AlertRecord::CameraOffline { meta, .. } => {
                &meta.cam_id
            }
        }
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
