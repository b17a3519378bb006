//! Per-camera processing contexts.
//!
//! A [`CameraContext`] owns everything one camera's processing mutates: its
//! rate limiters and a handle to its capture buffer. The [`ContextRegistry`]
//! creates contexts and keeps the capture handles so shutdown can close every
//! running clip.

use crate::capture_buffer::{CaptureError, CaptureSettings, CaptureStats, RollingCaptureBuffer};
use crate::codec::FrameEncoder;
use crate::decision::{AlertDecisionEngine, RateLimiters};
use crate::record::{AlertRecord, DisconnectSeverity};
use crate::registry::CameraRegistry;
use crate::types::{CameraId, DetectionBatch, Frame};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Processing state for one camera.
pub struct CameraContext {
    camera_id: CameraId,
    source_index: u32,
    capture: Option<Arc<Mutex<RollingCaptureBuffer>>>,
    limiters: RateLimiters,
}

impl CameraContext {
    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn source_index(&self) -> u32 {
        self.source_index
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    /// Buffer the frame (if any), then decide on the batch.
    pub fn handle_sample(
        &mut self,
        engine: &AlertDecisionEngine,
        frame: Option<Frame>,
        batch: &DetectionBatch,
        now: DateTime<Utc>,
    ) -> Option<AlertRecord> {
        if let (Some(frame), Some(capture)) = (frame, &self.capture) {
            if let Err(e) = capture.lock().add_frame(frame, now) {
                match e {
                    CaptureError::InvalidFrame(_) => debug!(
                        camera_id = %self.camera_id,
                        error = %e,
                        "Frame dropped"
                    ),
                    _ => warn!(camera_id = %self.camera_id, error = %e, "Failed to buffer frame"),
                }
            }
        }

        engine.observe(&mut self.limiters, batch, self.capture.as_deref(), now)
    }

    pub fn report_disconnect(
        &self,
        engine: &AlertDecisionEngine,
        severity: DisconnectSeverity,
        message: &str,
        now: DateTime<Utc>,
    ) -> AlertRecord {
        engine.report_disconnect(&self.camera_id, self.source_index, severity, message, now)
    }

    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.capture.as_ref().map(|c| c.lock().stats())
    }
}

/// Creates camera contexts and tracks their capture buffers.
pub struct ContextRegistry {
    cameras: CameraRegistry,
    captures: BTreeMap<u32, Arc<Mutex<RollingCaptureBuffer>>>,
}

impl ContextRegistry {
    /// Create a capture buffer for every configured camera. Unknown sources
    /// get contexts without one.
    pub fn new(cameras: CameraRegistry, settings: &CaptureSettings, encoder: Arc<dyn FrameEncoder>) -> Self {
        let captures = cameras
            .iter()
            .map(|(index, camera_id)| {
                let buffer = RollingCaptureBuffer::new(camera_id.clone(), settings.clone(), encoder.clone());
                (index, Arc::new(Mutex::new(buffer)))
            })
            .collect();

        info!(
            cameras = cameras.len(),
            buffer_frames = settings.capacity,
            post_event_frames = settings.post_event_frames,
            "Camera contexts ready"
        );

        Self { cameras, captures }
    }

    pub fn cameras(&self) -> &CameraRegistry {
        &self.cameras
    }

    /// A fresh context for `source_index`.
    pub fn context_for(&self, source_index: u32) -> CameraContext {
        CameraContext {
            camera_id: self.cameras.resolve(source_index),
            source_index,
            capture: self.captures.get(&source_index).cloned(),
            limiters: RateLimiters::default(),
        }
    }

    /// Stop triggers and close every running clip.
    pub fn shutdown_all(&self) {
        for capture in self.captures.values() {
            let mut buffer = capture.lock();
            if buffer.is_recording() {
                info!(camera_id = %buffer.camera_id(), "Closing active clip for shutdown");
            }
            buffer.shutdown();
        }
    }

    pub fn capture_stats(&self) -> Vec<(CameraId, CaptureStats)> {
        self.captures
            .values()
            .map(|c| {
                let buffer = c.lock();
                (buffer.camera_id().clone(), buffer.stats())
            })
            .collect()
    }

    pub fn recording_count(&self) -> usize {
        self.captures.values().filter(|c| c.lock().is_recording()).count()
    }
}
