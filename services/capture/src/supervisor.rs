//! Message routing, per-camera workers and shutdown.
//!
//! ```text
//! PerceptionSource -> router -> mpsc per camera -> CameraContext -> AlertLog
//!                                                        \-> RollingCaptureBuffer
//! ```
//!
//! Each camera gets its own task the first time one of its messages arrives,
//! so per-camera ordering is the order of the input and no camera waits on
//! another camera's capture lock.

use crate::alert_log::{AlertLog, AlertLogStats, LogWriteError};
use crate::capture_buffer::{CaptureSettings, CaptureStats};
use crate::codec::FrameEncoder;
use crate::config::{CaptureServiceConfig, ConfigValidationError};
use crate::context::{CameraContext, ContextRegistry};
use crate::decision::{AlertDecisionEngine, DecisionStats};
use crate::ingest::{PerceptionSource, PipelineMessage};
use crate::record::DisconnectSeverity;
use crate::registry::CameraRegistry;
use crate::types::{CameraId, DetectionBatch, Frame};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors building the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Alert log unavailable: {0}")]
    AlertLog(#[from] LogWriteError),
}

/// Why the run loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown signal received
    Signal,
    /// Upstream sent `end_of_stream`
    EndOfStream,
    /// Input reached EOF without `end_of_stream`
    InputClosed,
    /// Upstream reported an error not tied to any camera
    PipelineFailed(String),
    /// The input could not be read
    InputFailed(String),
}

/// Router statistics.
#[derive(Debug, Default, Clone)]
pub struct SupervisorStats {
    pub messages_received: u64,
    pub samples_routed: u64,
    pub disconnects_routed: u64,
    pub parse_errors: u64,
    pub workers_spawned: u64,
    pub worker_send_failures: u64,
}

/// Everything worth reporting after a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reason: StopReason,
    pub router: SupervisorStats,
    pub decision: DecisionStats,
    pub log: AlertLogStats,
    pub captures: Vec<(CameraId, CaptureStats)>,
}

enum WorkerCommand {
    Sample {
        frame: Option<Frame>,
        batch: DetectionBatch,
    },
    Disconnect {
        severity: DisconnectSeverity,
        message: String,
    },
}

struct Worker {
    tx: mpsc::Sender<WorkerCommand>,
    handle: JoinHandle<()>,
}

/// Owns the shared services and drives one run over a message source.
pub struct Supervisor {
    queue_size: usize,
    health_interval: Duration,
    log: Arc<AlertLog>,
    engine: Arc<AlertDecisionEngine>,
    contexts: Arc<ContextRegistry>,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<SupervisorStats>>,
}

impl Supervisor {
    pub fn new(config: &CaptureServiceConfig, encoder: Arc<dyn FrameEncoder>) -> Result<Self, SupervisorError> {
        let log = Arc::new(AlertLog::open(&config.log)?);
        let engine = Arc::new(AlertDecisionEngine::new(config, log.clone())?);
        let contexts = Arc::new(ContextRegistry::new(
            CameraRegistry::from_entries(&config.cameras),
            &CaptureSettings::from_config(&config.capture),
            encoder,
        ));

        Ok(Self {
            queue_size: config.input.queue_size.max(1),
            health_interval: Duration::from_secs(config.health.interval_secs.max(1)),
            log,
            engine,
            contexts,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(SupervisorStats::default())),
        })
    }

    pub fn cameras(&self) -> &CameraRegistry {
        self.contexts.cameras()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Route messages until the input ends, the pipeline fails or
    /// `shutdown` resolves. Every running clip is closed before returning.
    pub async fn run<F>(&self, mut source: Box<dyn PerceptionSource>, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()> + Send,
    {
        self.running.store(true, Ordering::SeqCst);

        let health_handle = tokio::spawn(run_health_monitor(
            self.running.clone(),
            self.engine.clone(),
            self.contexts.clone(),
            self.log.clone(),
            self.stats.clone(),
            self.health_interval,
        ));

        let mut workers: HashMap<u32, Worker> = HashMap::new();
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break StopReason::Signal;
                }
                next = source.next_message() => match next {
                    Ok(Some(message)) => {
                        self.stats.lock().messages_received += 1;
                        if let Some(reason) = self.route(message, &mut workers).await {
                            break reason;
                        }
                    }
                    Ok(None) => {
                        info!("Input closed");
                        break StopReason::InputClosed;
                    }
                    Err(e) if e.is_recoverable() => {
                        self.stats.lock().parse_errors += 1;
                        warn!(error = %e, "Skipping malformed message");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        break StopReason::InputFailed(e.to_string());
                    }
                }
            }
        };

        info!(reason = ?reason, "Initiating graceful shutdown...");

        // A signal stops triggers before queued samples are drained.
        if reason == StopReason::Signal {
            self.contexts.shutdown_all();
        }

        let handles: Vec<JoinHandle<()>> = workers
            .into_values()
            .map(|worker| {
                drop(worker.tx);
                worker.handle
            })
            .collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Camera worker panicked");
            }
        }

        self.contexts.shutdown_all();
        self.running.store(false, Ordering::SeqCst);
        health_handle.abort();

        let summary = RunSummary {
            reason,
            router: self.stats.lock().clone(),
            decision: self.engine.stats(),
            log: self.log.stats(),
            captures: self.contexts.capture_stats(),
        };
        log_final_stats(&summary);

        info!("Shutdown complete");
        summary
    }

    async fn route(&self, message: PipelineMessage, workers: &mut HashMap<u32, Worker>) -> Option<StopReason> {
        match message {
            PipelineMessage::Sample { frame, batch } => {
                self.stats.lock().samples_routed += 1;
                let source_index = batch.source_index;
                self.dispatch(source_index, WorkerCommand::Sample { frame, batch }, workers)
                    .await;
                None
            }
            PipelineMessage::Disconnect {
                source_index: Some(source_index),
                severity,
                message,
            } => {
                self.stats.lock().disconnects_routed += 1;
                self.dispatch(source_index, WorkerCommand::Disconnect { severity, message }, workers)
                    .await;
                None
            }
            PipelineMessage::Disconnect {
                source_index: None,
                severity: DisconnectSeverity::Warning,
                message,
            } => {
                warn!(message = %message, "Pipeline warning");
                None
            }
            PipelineMessage::Disconnect {
                source_index: None,
                severity: DisconnectSeverity::Error,
                message,
            } => {
                error!(message = %message, "Pipeline error");
                Some(StopReason::PipelineFailed(message))
            }
            PipelineMessage::EndOfStream => {
                info!("End of stream");
                Some(StopReason::EndOfStream)
            }
        }
    }

    async fn dispatch(&self, source_index: u32, command: WorkerCommand, workers: &mut HashMap<u32, Worker>) {
        let worker = workers
            .entry(source_index)
            .or_insert_with(|| self.spawn_worker(source_index));

        if worker.tx.send(command).await.is_err() {
            self.stats.lock().worker_send_failures += 1;
            warn!(source_index = source_index, "Camera worker gone, dropping message");
            workers.remove(&source_index);
        }
    }

    fn spawn_worker(&self, source_index: u32) -> Worker {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let context = self.contexts.context_for(source_index);
        self.stats.lock().workers_spawned += 1;

        info!(
            camera_id = %context.camera_id(),
            source_index = source_index,
            capture = context.has_capture(),
            "Starting camera worker"
        );

        let handle = tokio::spawn(run_camera_worker(context, self.engine.clone(), rx));
        Worker { tx, handle }
    }
}

async fn run_camera_worker(
    mut context: CameraContext,
    engine: Arc<AlertDecisionEngine>,
    mut rx: mpsc::Receiver<WorkerCommand>,
) {
    let source_index = context.source_index();
    let mut samples: u64 = 0;

    while let Some(command) = rx.recv().await {
        match command {
            WorkerCommand::Sample { frame, batch } => {
                samples += 1;
                // Opening a clip encodes the whole ring; keep it off the runtime threads.
                let engine = engine.clone();
                let task = tokio::task::spawn_blocking(move || {
                    context.handle_sample(&engine, frame, &batch, Utc::now());
                    context
                });
                context = match task.await {
                    Ok(context) => context,
                    Err(e) => {
                        error!(source_index = source_index, error = %e, "Sample handling panicked");
                        return;
                    }
                };
            }
            WorkerCommand::Disconnect { severity, message } => {
                context.report_disconnect(&engine, severity, &message, Utc::now());
            }
        }
    }

    debug!(
        camera_id = %context.camera_id(),
        samples = samples,
        "Camera worker finished"
    );
}

/// Run the health monitoring loop.
async fn run_health_monitor(
    running: Arc<AtomicBool>,
    engine: Arc<AlertDecisionEngine>,
    contexts: Arc<ContextRegistry>,
    log: Arc<AlertLog>,
    stats: Arc<Mutex<SupervisorStats>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    while running.load(Ordering::SeqCst) {
        ticker.tick().await;

        let router = stats.lock().clone();
        info!(
            messages = router.messages_received,
            samples = router.samples_routed,
            parse_errors = router.parse_errors,
            workers = router.workers_spawned,
            "Router stats"
        );

        let decision = engine.stats();
        info!(
            batches = decision.batches_seen,
            events = decision.events_emitted,
            heartbeats = decision.heartbeats_emitted,
            suppressed = decision.suppressed,
            capture_failures = decision.capture_failures,
            log_failures = decision.log_failures,
            "Decision stats"
        );

        let log_stats = log.stats();
        if log_stats.write_failures > 0 {
            warn!(
                path = %log.path().display(),
                write_failures = log_stats.write_failures,
                "Alert log has failed writes"
            );
        }

        info!(recording = contexts.recording_count(), "Capture stats");
    }
}

/// Log final statistics on shutdown.
fn log_final_stats(summary: &RunSummary) {
    info!("=== Final Statistics ===");

    info!(
        messages = summary.router.messages_received,
        samples = summary.router.samples_routed,
        disconnects = summary.router.disconnects_routed,
        parse_errors = summary.router.parse_errors,
        "Router final stats"
    );

    info!(
        batches = summary.decision.batches_seen,
        stale_dropped = summary.decision.stale_detections_dropped,
        events = summary.decision.events_emitted,
        heartbeats = summary.decision.heartbeats_emitted,
        captures = summary.decision.captures_triggered,
        capture_failures = summary.decision.capture_failures,
        "Decision final stats"
    );

    info!(
        records_written = summary.log.records_written,
        write_failures = summary.log.write_failures,
        recoveries = summary.log.recoveries,
        "Alert log final stats"
    );

    for (camera_id, stats) in &summary.captures {
        info!(
            camera_id = %camera_id,
            frames = stats.frames_received,
            rejected = stats.frames_rejected,
            clips_started = stats.clips_started,
            clips_completed = stats.clips_completed,
            snapshots = stats.snapshots_written,
            write_failures = stats.write_failures,
            "Capture final stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_buffer::test_support::RecordingEncoder;
    use crate::codec::{ClipWriter, CodecError, FrameEncoder};
    use crate::ingest::{IngestError, JsonLinesSource};
    use crate::types::{BoundingBox, Detection};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};

    fn create_test_config(dir: &Path) -> CaptureServiceConfig {
        let mut config = CaptureServiceConfig::default();
        config.capture.output_root = dir.join("alerts");
        config.capture.width = 2;
        config.capture.height = 2;
        config.capture.fps = 1;
        config.capture.buffer_seconds = 2;
        config.capture.post_event_seconds = 2;
        config.log.path = dir.join("detection_log.json");
        config.site.device_id = Some("edge-01".to_string());
        config
    }

    fn sample_line(camera_index: u32, sequence: u64, labels: &[&str]) -> String {
        let detections: Vec<String> = labels
            .iter()
            .map(|l| {
                format!(
                    r#"{{"label":"{}","confidence":0.9,"bbox":{{"top":0,"left":0,"width":1,"height":1}}}}"#,
                    l
                )
            })
            .collect();
        // 2x2 RGB24, twelve zero bytes
        format!(
            r#"{{"kind":"sample","camera_index":{},"frame_sequence":{},"frame":{{"width":2,"height":2,"data":"AAAAAAAAAAAAAAAA"}},"detections":[{}]}}"#,
            camera_index,
            sequence,
            detections.join(",")
        )
    }

    fn logged_types(dir: &Path) -> Vec<String> {
        let text = fs::read_to_string(dir.join("detection_log.json")).unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        entries
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }

    /// Plays back messages, then never yields again.
    struct ScriptedSource {
        messages: VecDeque<PipelineMessage>,
    }

    #[async_trait]
    impl PerceptionSource for ScriptedSource {
        async fn next_message(&mut self) -> Result<Option<PipelineMessage>, IngestError> {
            match self.messages.pop_front() {
                Some(message) => Ok(Some(message)),
                None => futures::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_event_then_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config(dir.path());
        let encoder = Arc::new(RecordingEncoder::default());
        let supervisor = Supervisor::new(&config, encoder.clone()).unwrap();

        let mut input = String::new();
        for seq in 0..4 {
            input.push_str(&sample_line(0, seq, &["person", "fire"]));
            input.push('\n');
        }
        input.push_str("{\"kind\":\"end_of_stream\"}\n");
        input.push_str(&sample_line(0, 99, &["person", "fire"]));

        let source = Box::new(JsonLinesSource::new(
            std::io::Cursor::new(input.into_bytes()),
            supervisor.cameras().clone(),
        ));
        let summary = supervisor.run(source, std::future::pending()).await;

        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert_eq!(summary.router.samples_routed, 4);
        assert_eq!(summary.decision.events_emitted, 1);
        assert_eq!(logged_types(dir.path()), vec!["EVENT", "METRIC"]);
        assert!(!supervisor.is_running());

        // Pre-event frame 0, then 1 and 2 fill the post-event budget.
        assert_eq!(encoder.clip(0).frames, vec![0, 1, 2]);
        assert!(encoder.clip(0).finished);
    }

    #[tokio::test]
    async fn test_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config(dir.path());
        let supervisor = Supervisor::new(&config, Arc::new(RecordingEncoder::default())).unwrap();

        let input = concat!(
            r#"{"kind":"disconnect","severity":"error","context":"/GstPipeline:pipeline0/GstURIDecodeBin:uri-decode-bin-2/GstRTSPSrc:source","message":"Could not open resource for reading"}"#,
            "\n",
            r#"{"kind":"disconnect","severity":"warning","source_index":1,"message":"Retrying"}"#,
            "\n",
            "garbage\n",
            r#"{"kind":"disconnect","severity":"error","context":"pipeline0","message":"Internal data stream error"}"#,
            "\n",
            r#"{"kind":"disconnect","severity":"error","source_index":3,"message":"never routed"}"#,
            "\n",
        );
        let source = Box::new(JsonLinesSource::new(input.as_bytes(), supervisor.cameras().clone()));
        let summary = supervisor.run(source, std::future::pending()).await;

        assert_eq!(
            summary.reason,
            StopReason::PipelineFailed("Internal data stream error".to_string())
        );
        assert_eq!(summary.router.parse_errors, 1);
        assert_eq!(summary.router.disconnects_routed, 2);

        let text = fs::read_to_string(dir.path().join("detection_log.json")).unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(entries.len(), 2);
        // Workers for different cameras write in any order.
        let by_type = |kind: &str| {
            entries
                .iter()
                .find(|e| e["type"] == kind)
                .map(|e| e["meta"]["cam_id"].as_str().unwrap().to_string())
        };
        assert_eq!(by_type("CAMERA_OFFLINE").as_deref(), Some("BOSS_CABIN"));
        assert_eq!(by_type("CAMERA_WARNING").as_deref(), Some("EMPLOYEE_AREA"));
    }

    /// Blocks in `open_clip` until the async side releases it.
    struct GatedEncoder {
        inner: RecordingEncoder,
        entered: Arc<AtomicBool>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl FrameEncoder for GatedEncoder {
        fn clip_extension(&self) -> &'static str {
            self.inner.clip_extension()
        }

        fn image_extension(&self) -> &'static str {
            self.inner.image_extension()
        }

        fn open_clip(
            &self,
            file: File,
            path: PathBuf,
            fps: u32,
        ) -> Result<Box<dyn ClipWriter>, CodecError> {
            self.entered.store(true, Ordering::SeqCst);
            self.release
                .lock()
                .recv_timeout(Duration::from_secs(2))
                .map_err(|e| CodecError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, e)))?;
            self.inner.open_clip(file, path, fps)
        }

        fn write_image(&self, file: File, frame: &Frame) -> Result<(), CodecError> {
            self.inner.write_image(file, frame)
        }
    }

    #[tokio::test]
    async fn test_clip_encoding_leaves_runtime_free() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config(dir.path());
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let entered = Arc::new(AtomicBool::new(false));
        let encoder = Arc::new(GatedEncoder {
            inner: RecordingEncoder::default(),
            entered: entered.clone(),
            release: Mutex::new(release_rx),
        });
        let supervisor = Supervisor::new(&config, encoder.clone()).unwrap();

        // Only runs if the worker yields the runtime thread while encoding.
        let releaser = tokio::spawn(async move {
            while !entered.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            release_tx.send(()).unwrap();
        });

        let input = sample_line(0, 0, &["person", "fire"]) + "\n";
        let source = Box::new(JsonLinesSource::new(
            std::io::Cursor::new(input.into_bytes()),
            supervisor.cameras().clone(),
        ));
        let summary = supervisor.run(source, std::future::pending()).await;
        releaser.await.unwrap();

        assert_eq!(summary.reason, StopReason::InputClosed);
        assert_eq!(summary.decision.captures_triggered, 1);
        assert_eq!(summary.decision.capture_failures, 0);
        assert_eq!(encoder.inner.clip_count(), 1);
    }

    #[tokio::test]
    async fn test_signal_closes_active_clips() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config(dir.path());
        let encoder = Arc::new(RecordingEncoder::default());
        let supervisor = Supervisor::new(&config, encoder.clone()).unwrap();

        let det = |label: &str| Detection {
            class_id: 0,
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox {
                top: 0.0,
                left: 0.0,
                width: 1.0,
                height: 1.0,
            },
        };
        let camera = supervisor.cameras().resolve(1);
        let messages = (0..2)
            .map(|seq| PipelineMessage::Sample {
                frame: Some(Frame::from_rgb(camera.clone(), seq, 2, 2, &[0u8; 12])),
                batch: DetectionBatch {
                    camera_id: camera.clone(),
                    source_index: 1,
                    frame_sequence: seq,
                    timestamp: Utc::now(),
                    detections: vec![det("person"), det("smoke")],
                },
            })
            .collect();
        let source = Box::new(ScriptedSource { messages });

        let summary = supervisor
            .run(source, tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_eq!(summary.reason, StopReason::Signal);
        assert_eq!(encoder.clip_count(), 1);
        assert!(encoder.clip(0).finished);
        assert_eq!(encoder.clip(0).frames, vec![0, 1]);

        let camera_stats = summary
            .captures
            .iter()
            .find(|(id, _)| id.as_str() == "EMPLOYEE_AREA")
            .map(|(_, stats)| stats.clone())
            .unwrap();
        assert_eq!(camera_stats.clips_completed, 1);
    }
}
