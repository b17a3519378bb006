//! Per-camera rolling buffer with event-triggered clip and snapshot capture.
//!
//! The buffer keeps the last `buffer_seconds * fps` frames. A trigger either
//! starts a clip (pre-event frames first, then live frames until the
//! post-event budget runs out) or, if a clip is already running, resets its
//! budget to the full post-event length. Snapshot bursts persist the two
//! most recent frames and the next two delivered ones.
//!
//! All state lives in one struct that the owning camera context guards with a
//! single lock, so draining the buffer into a new clip can never interleave
//! with eviction or a budget decrement.

use crate::codec::{ClipWriter, CodecError, FrameEncoder};
use crate::config::CaptureConfig;
use crate::types::{CameraId, Frame};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Frames persisted after the trigger instant in a snapshot burst.
const BURST_FOLLOW_UP_FRAMES: u8 = 2;

/// Attempts at a free artifact name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Errors that can occur while capturing evidence.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to allocate output {path:?}: {source}")]
    Allocation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open clip writer for {path:?}: {source}")]
    Encoder {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Frame rejected: {0}")]
    InvalidFrame(String),

    #[error("Capture is shutting down")]
    ShuttingDown,
}

/// Capture parameters derived from configuration.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_root: PathBuf,
    /// Ring buffer capacity in frames
    pub capacity: usize,
    /// Frames recorded after the last trigger
    pub post_event_frames: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub snapshot_cooldown: chrono::Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            output_root: config.output_root.clone(),
            capacity: config.buffer_capacity(),
            post_event_frames: config.post_event_frames(),
            fps: config.fps,
            width: config.width,
            height: config.height,
            snapshot_cooldown: config.snapshot_cooldown(),
        }
    }
}

/// Statistics for one camera's capture buffer.
#[derive(Debug, Default, Clone)]
pub struct CaptureStats {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_buffered: usize,
    pub clips_started: u64,
    pub clips_extended: u64,
    pub clips_completed: u64,
    pub clip_frames_written: u64,
    pub bursts_started: u64,
    pub snapshots_written: u64,
    pub write_failures: u64,
    pub allocation_failures: u64,
}

/// What a trigger did to the recording facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingAction {
    /// A new clip was opened and pre-filled from the buffer
    Started { path: PathBuf, prefilled: usize },
    /// The running clip's budget was reset to the full post-event length
    Extended,
}

/// Result of a successful trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub snapshot_burst: bool,
    pub recording: RecordingAction,
}

enum Recording {
    Idle,
    Active {
        writer: Box<dyn ClipWriter>,
        remaining: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotBurst {
    Idle,
    Pending(u8),
}

/// Rolling capture state for one camera.
pub struct RollingCaptureBuffer {
    camera_id: CameraId,
    settings: CaptureSettings,
    encoder: Arc<dyn FrameEncoder>,
    frames: VecDeque<Frame>,
    recording: Recording,
    burst: SnapshotBurst,
    last_snapshot_at: Option<DateTime<Utc>>,
    active_tags: Vec<String>,
    accepting: bool,
    stats: CaptureStats,
}

impl RollingCaptureBuffer {
    pub fn new(camera_id: CameraId, settings: CaptureSettings, encoder: Arc<dyn FrameEncoder>) -> Self {
        let capacity = settings.capacity;
        Self {
            camera_id,
            settings,
            encoder,
            frames: VecDeque::with_capacity(capacity),
            recording: Recording::Idle,
            burst: SnapshotBurst::Idle,
            last_snapshot_at: None,
            active_tags: Vec::new(),
            accepting: true,
            stats: CaptureStats::default(),
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sequence numbers of the buffered frames, oldest first.
    pub fn buffered_sequences(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.sequence).collect()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.recording, Recording::Active { .. })
    }

    /// Frames still to be written to the running clip.
    pub fn remaining_frames(&self) -> Option<u32> {
        match &self.recording {
            Recording::Active { remaining, .. } => Some(*remaining),
            Recording::Idle => None,
        }
    }


    /// Follow-up frames still owed to the current snapshot burst.
    pub fn pending_snapshots(&self) -> u8 {
        match self.burst {
            SnapshotBurst::Pending(n) => n,
            SnapshotBurst::Idle => 0,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        let mut stats = self.stats.clone();
        stats.frames_buffered = self.frames.len();
        stats
    }

    /// Buffer a frame and feed any running clip or snapshot burst.
    pub fn add_frame(&mut self, frame: Frame, now: DateTime<Utc>) -> Result<(), CaptureError> {
        self.stats.frames_received += 1;

        if frame.width != self.settings.width
            || frame.height != self.settings.height
            || !frame.is_well_formed()
        {
            self.stats.frames_rejected += 1;
            return Err(CaptureError::InvalidFrame(format!(
                "frame {} is {}x{} with {} bytes, expected {}x{} RGB",
                frame.sequence,
                frame.width,
                frame.height,
                frame.data.len(),
                self.settings.width,
                self.settings.height
            )));
        }

        if self.frames.len() >= self.settings.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.clone());

        let mut finished = false;
        if let Recording::Active { writer, remaining } = &mut self.recording {
            match writer.write_frame(&frame) {
                Ok(()) => self.stats.clip_frames_written += 1,
                Err(e) => {
                    self.stats.write_failures += 1;
                    warn!(
                        camera_id = %self.camera_id,
                        sequence = frame.sequence,
                        error = %e,
                        "Failed to write frame to clip"
                    );
                }
            }
            *remaining = remaining.saturating_sub(1);
            finished = *remaining == 0;
        }
        if finished {
            self.finish_clip();
        }

        if let SnapshotBurst::Pending(n) = self.burst {
            self.save_snapshot(&frame, "seq", now);
            self.burst = if n > 1 {
                SnapshotBurst::Pending(n - 1)
            } else {
                SnapshotBurst::Idle
            };
        }

        Ok(())
    }

    /// Start or extend evidence capture for `tags`.
    ///
    /// Snapshot failures are logged and do not fail the trigger; failing to
    /// allocate a new clip leaves the recording idle and is returned.
    pub fn trigger(
        &mut self,
        tags: &[String],
        want_snapshots: bool,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome, CaptureError> {
        if !self.accepting {
            return Err(CaptureError::ShuttingDown);
        }

        self.active_tags = tags.to_vec();

        let snapshot_burst = want_snapshots && self.snapshot_cooldown_elapsed(now);
        if snapshot_burst {
            self.start_burst(now);
        }

        let post_event_frames = self.settings.post_event_frames;
        if let Recording::Active { remaining, .. } = &mut self.recording {
            *remaining = post_event_frames;
            self.stats.clips_extended += 1;
            debug!(
                camera_id = %self.camera_id,
                remaining = post_event_frames,
                "Clip extended"
            );
            return Ok(TriggerOutcome {
                snapshot_burst,
                recording: RecordingAction::Extended,
            });
        }

        match self.start_clip(now) {
            Ok((path, prefilled)) => Ok(TriggerOutcome {
                snapshot_burst,
                recording: RecordingAction::Started { path, prefilled },
            }),
            Err(e) => {
                self.stats.allocation_failures += 1;
                error!(
                    camera_id = %self.camera_id,
                    error = %e,
                    "Failed to start clip, recording stays idle"
                );
                Err(e)
            }
        }
    }

    /// Stop accepting triggers and close any running clip.
    pub fn shutdown(&mut self) {
        self.accepting = false;
        self.burst = SnapshotBurst::Idle;
        if self.is_recording() {
            self.finish_clip();
        }
    }

    fn snapshot_cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_snapshot_at {
            Some(last) => now - last > self.settings.snapshot_cooldown,
            None => true,
        }
    }

    fn start_burst(&mut self, now: DateTime<Utc>) {
        self.last_snapshot_at = Some(now);
        self.stats.bursts_started += 1;

        // Degrades with a short buffer: "prev" needs two frames, "curr" one.
        let n = self.frames.len();
        if n >= 2 {
            let prev = self.frames[n - 2].clone();
            self.save_snapshot(&prev, "prev", now);
        }
        if n >= 1 {
            let curr = self.frames[n - 1].clone();
            self.save_snapshot(&curr, "curr", now);
        }

        self.burst = SnapshotBurst::Pending(BURST_FOLLOW_UP_FRAMES);
    }

    fn save_snapshot(&mut self, frame: &Frame, label: &str, now: DateTime<Utc>) {
        let path = artifact_path(
            &self.settings.output_root,
            &self.camera_id,
            now,
            label,
            frame.sequence,
            &self.active_tags,
            self.encoder.image_extension(),
        );

        let result = create_artifact(&path)
            .map_err(|e| e.to_string())
            .and_then(|(file, path)| {
                self.encoder
                    .write_image(file, frame)
                    .map(|()| path)
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(path) => {
                self.stats.snapshots_written += 1;
                debug!(
                    camera_id = %self.camera_id,
                    label = label,
                    path = %path.display(),
                    "Snapshot saved"
                );
            }
            Err(e) => {
                self.stats.write_failures += 1;
                warn!(
                    camera_id = %self.camera_id,
                    label = label,
                    error = %e,
                    "Failed to save snapshot"
                );
            }
        }
    }

    fn start_clip(&mut self, now: DateTime<Utc>) -> Result<(PathBuf, usize), CaptureError> {
        let sequence = self.frames.back().map(|f| f.sequence).unwrap_or(0);
        let path = artifact_path(
            &self.settings.output_root,
            &self.camera_id,
            now,
            "clip",
            sequence,
            &self.active_tags,
            self.encoder.clip_extension(),
        );

        let (file, path) =
            create_artifact(&path).map_err(|source| CaptureError::Allocation { path, source })?;
        let mut writer = self
            .encoder
            .open_clip(file, path.clone(), self.settings.fps)
            .map_err(|source| CaptureError::Encoder {
                path: path.clone(),
                source,
            })?;

        for frame in &self.frames {
            match writer.write_frame(frame) {
                Ok(()) => self.stats.clip_frames_written += 1,
                Err(e) => {
                    self.stats.write_failures += 1;
                    warn!(
                        camera_id = %self.camera_id,
                        sequence = frame.sequence,
                        error = %e,
                        "Failed to write buffered frame to clip"
                    );
                }
            }
        }

        let prefilled = self.frames.len();
        self.recording = Recording::Active {
            writer,
            remaining: self.settings.post_event_frames,
        };
        self.stats.clips_started += 1;

        info!(
            camera_id = %self.camera_id,
            path = %path.display(),
            prefilled = prefilled,
            post_event_frames = self.settings.post_event_frames,
            "Clip started"
        );

        Ok((path, prefilled))
    }

    fn finish_clip(&mut self) {
        let Recording::Active { writer, .. } =
            std::mem::replace(&mut self.recording, Recording::Idle)
        else {
            return;
        };

        let path = writer.path().to_path_buf();
        let frames = writer.frames_written();
        match writer.finish() {
            Ok(()) => {
                self.stats.clips_completed += 1;
                info!(
                    camera_id = %self.camera_id,
                    path = %path.display(),
                    frames = frames,
                    "Clip finished"
                );
            }
            Err(e) => {
                self.stats.write_failures += 1;
                error!(
                    camera_id = %self.camera_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to finalize clip"
                );
            }
        }
    }
}

impl Drop for RollingCaptureBuffer {
    fn drop(&mut self) {
        if self.is_recording() {
            self.finish_clip();
        }
    }
}

/// Tags joined with `_`, every non-alphanumeric character replaced by `_`.
pub fn sanitize_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        return "ALERT".to_string();
    }

    tags.join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `<root>/<camera>/<YYYYmmdd_HHMMSS_mmm>_<label>-<seq>_<tags>.<ext>`
pub fn artifact_path(
    root: &Path,
    camera: &CameraId,
    now: DateTime<Utc>,
    label: &str,
    sequence: u64,
    tags: &[String],
    extension: &str,
) -> PathBuf {
    let file_name = format!(
        "{}_{}-{:06}_{}.{}",
        now.format("%Y%m%d_%H%M%S_%3f"),
        label,
        sequence,
        sanitize_tags(tags),
        extension
    );
    root.join(camera.as_str()).join(file_name)
}

/// Create `path` exclusively, adding `-N` before the extension on collision.
fn create_artifact(path: &Path) -> io::Result<(File, PathBuf)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut candidate = path.to_path_buf();
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = path.with_file_name(format!("{}-{}.{}", stem, attempt, extension));
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free artifact name for {}", path.display()),
    ))
}
