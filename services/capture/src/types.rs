//! Core data types handed over by the perception pipeline.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a camera (e.g. "RECEPTION_AREA").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Bounding box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

/// A single object detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detector class index
    #[serde(default)]
    pub class_id: i32,

    /// Class label (e.g. "person", "fire")
    pub label: String,

    /// Confidence in [-1, 1]; negative means a tracker re-emission
    pub confidence: f32,

    /// Bounding box in pixels
    pub bbox: BoundingBox,
}

impl Detection {
    /// Whether this detection is a fresh observation rather than a tracker
    /// re-emission.
    pub fn is_fresh(&self) -> bool {
        self.confidence >= 0.0
    }

    /// Label compared case-insensitively against `other`.
    pub fn label_is(&self, other: &str) -> bool {
        self.label.eq_ignore_ascii_case(other)
    }
}

/// All detections for one camera at one sampled instant.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    /// Resolved camera identity
    pub camera_id: CameraId,

    /// Upstream source index the batch came from
    pub source_index: u32,

    /// Frame sequence number within the camera stream
    pub frame_sequence: u64,

    /// Capture timestamp reported upstream
    pub timestamp: DateTime<Utc>,

    /// Detections, including stale tracker re-emissions
    pub detections: Vec<Detection>,
}

/// An RGB24 frame tied to one camera and sequence number.
///
/// Pixel data is held in [`Bytes`], so buffering a frame is a refcount bump
/// rather than a copy of the upstream buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    /// Copy an upstream RGB24 buffer into an owned frame.
    pub fn from_rgb(camera_id: CameraId, sequence: u64, width: u32, height: u32, data: &[u8]) -> Self {
        Self {
            camera_id,
            sequence,
            width,
            height,
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Number of bytes an RGB24 buffer of this size must hold.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Whether the buffer matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}
