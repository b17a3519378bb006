//! Alert decisions for detection batches.
//!
//! Each batch is filtered, checked against the countable-class gate, tagged by
//! the access policy and the visual trigger table, and finally run through two
//! per-camera rate limiters: one for EVENT records and one for METRIC
//! heartbeats. At most one record is produced per batch.

use crate::alert_log::AlertLog;
use crate::capture_buffer::RollingCaptureBuffer;
use crate::config::{CaptureServiceConfig, ConfigValidationError, TriggerGroup};
use crate::policy::{PolicyClock, PolicyEngine};
use crate::record::{
    AlertRecord, DisconnectSeverity, EventBody, LoggedDetection, MetricBody, SiteIdentity,
};
use crate::types::{CameraId, Detection, DetectionBatch};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Label to trigger-tag lookup, resolved once from configuration.
#[derive(Debug, Clone, Default)]
pub struct TriggerTable {
    by_label: HashMap<String, usize>,
    tags: Vec<String>,
}

impl TriggerTable {
    pub fn from_groups(groups: &[TriggerGroup]) -> Self {
        let mut table = Self::default();
        for group in groups {
            let slot = match table.tags.iter().position(|t| t == &group.tag) {
                Some(slot) => slot,
                None => {
                    table.tags.push(group.tag.clone());
                    table.tags.len() - 1
                }
            };
            for label in &group.labels {
                table.by_label.entry(label.to_lowercase()).or_insert(slot);
            }
        }
        table
    }

    /// Tags raised by `detections`, in configuration order, without repeats.
    pub fn tags_for<'a>(&self, detections: impl IntoIterator<Item = &'a Detection>) -> Vec<String> {
        let mut raised = vec![false; self.tags.len()];
        for det in detections {
            if let Some(&slot) = self.by_label.get(&det.label.to_lowercase()) {
                raised[slot] = true;
            }
        }
        self.tags
            .iter()
            .zip(raised)
            .filter_map(|(tag, hit)| hit.then(|| tag.clone()))
            .collect()
    }
}

/// Per-camera limiter state. Owned by the camera's context.
#[derive(Debug, Clone, Default)]
pub struct RateLimiters {
    pub last_event: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Outcome of evaluating one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Emit an EVENT record and trigger capture
    Event { triggers: Vec<String> },
    /// Emit a METRIC record; `triggers` is non-empty when an event was cooling down
    Heartbeat { triggers: Vec<String> },
    /// Reportable batch, but both limiters are cooling down
    Suppressed,
    /// Nothing countable in the batch
    Ignored,
}

/// Decision engine statistics.
#[derive(Debug, Default, Clone)]
pub struct DecisionStats {
    pub batches_seen: u64,
    pub batches_ignored: u64,
    pub stale_detections_dropped: u64,
    pub events_emitted: u64,
    pub heartbeats_emitted: u64,
    pub suppressed: u64,
    pub captures_triggered: u64,
    pub capture_failures: u64,
    pub disconnects_reported: u64,
    pub log_failures: u64,
}

/// Shared decision logic. Per-camera state is passed in by the caller.
pub struct AlertDecisionEngine {
    policy: PolicyEngine,
    clock: PolicyClock,
    triggers: TriggerTable,
    countable: HashSet<String>,
    person_label: String,
    event_cooldown: chrono::Duration,
    heartbeat_interval: chrono::Duration,
    site: SiteIdentity,
    log: Arc<AlertLog>,
    stats: Mutex<DecisionStats>,
}

impl AlertDecisionEngine {
    pub fn new(config: &CaptureServiceConfig, log: Arc<AlertLog>) -> Result<Self, ConfigValidationError> {
        let alerts = &config.alerts;

        Ok(Self {
            policy: PolicyEngine::from_config(&config.policy)?,
            clock: PolicyClock::from_config(&config.policy)?,
            triggers: TriggerTable::from_groups(&alerts.visual_trigger_label_groups),
            countable: alerts
                .countable_class_allowlist
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
            person_label: alerts.person_label.clone(),
            event_cooldown: alerts.event_cooldown(),
            heartbeat_interval: alerts.heartbeat_interval(),
            site: SiteIdentity {
                client: config.site.client_id.clone(),
                site: config.site.site_id.clone(),
                device: config.device_id(),
            },
            log,
            stats: Mutex::new(DecisionStats::default()),
        })
    }

    pub fn stats(&self) -> DecisionStats {
        self.stats.lock().clone()
    }

    /// Classify a batch and advance the limiters. Performs no I/O.
    pub fn evaluate(
        &self,
        limiters: &mut RateLimiters,
        camera: &CameraId,
        fresh: &[&Detection],
        now: DateTime<Utc>,
    ) -> Decision {
        if !fresh.iter().any(|d| self.countable.contains(&d.label.to_lowercase())) {
            return Decision::Ignored;
        }

        let mut triggers = self.policy.evaluate(camera, self.clock.wall_clock(now));
        for tag in self.triggers.tags_for(fresh.iter().copied()) {
            if !triggers.contains(&tag) {
                triggers.push(tag);
            }
        }
        let is_event = !triggers.is_empty();

        let event_due = is_event && elapsed(limiters.last_event, now, self.event_cooldown);
        let heartbeat_due = elapsed(limiters.last_heartbeat, now, self.heartbeat_interval);

        if event_due {
            // The heartbeat timer is left alone so it stays eligible.
            limiters.last_event = Some(now);
            Decision::Event { triggers }
        } else if heartbeat_due {
            limiters.last_heartbeat = Some(now);
            Decision::Heartbeat { triggers }
        } else {
            Decision::Suppressed
        }
    }

    /// Run one batch end to end: decide, trigger capture, append the record.
    pub fn observe(
        &self,
        limiters: &mut RateLimiters,
        batch: &DetectionBatch,
        capture: Option<&Mutex<RollingCaptureBuffer>>,
        now: DateTime<Utc>,
    ) -> Option<AlertRecord> {
        let fresh: Vec<&Detection> = batch.detections.iter().filter(|d| d.is_fresh()).collect();
        let stale = (batch.detections.len() - fresh.len()) as u64;

        let decision = self.evaluate(limiters, &batch.camera_id, &fresh, now);
        {
            let mut stats = self.stats.lock();
            stats.batches_seen += 1;
            stats.stale_detections_dropped += stale;
            match &decision {
                Decision::Event { .. } => stats.events_emitted += 1,
                Decision::Heartbeat { .. } => stats.heartbeats_emitted += 1,
                Decision::Suppressed => stats.suppressed += 1,
                Decision::Ignored => stats.batches_ignored += 1,
            }
        }

        let people_count = fresh.iter().filter(|d| d.label_is(&self.person_label)).count();
        let detections: Vec<LoggedDetection> =
            fresh.iter().map(|d| LoggedDetection::from(*d)).collect();

        let record = match decision {
            Decision::Event { triggers } => {
                info!(
                    camera_id = %batch.camera_id,
                    frame_sequence = batch.frame_sequence,
                    triggers = ?triggers,
                    people_count = people_count,
                    "Alert event"
                );

                let (capture_triggered, capture_error) = match capture {
                    Some(buffer) => self.trigger_capture(buffer, &batch.camera_id, &triggers, now),
                    None => (None, None),
                };

                AlertRecord::event(
                    now,
                    &batch.camera_id,
                    &self.site,
                    EventBody {
                        triggers,
                        people_count,
                        detections,
                        capture_triggered,
                        capture_error,
                    },
                )
            }
            Decision::Heartbeat { triggers } => {
                debug!(
                    camera_id = %batch.camera_id,
                    people_count = people_count,
                    "Heartbeat"
                );
                AlertRecord::metric(
                    now,
                    &batch.camera_id,
                    &self.site,
                    MetricBody {
                        triggers,
                        people_count,
                        detections,
                    },
                )
            }
            Decision::Suppressed | Decision::Ignored => {
                trace!(
                    camera_id = %batch.camera_id,
                    frame_sequence = batch.frame_sequence,
                    "No record for batch"
                );
                return None;
            }
        };

        self.write(&record);
        Some(record)
    }

    /// Record an upstream disconnect for one camera.
    pub fn report_disconnect(
        &self,
        camera: &CameraId,
        source_index: u32,
        severity: DisconnectSeverity,
        message: &str,
        now: DateTime<Utc>,
    ) -> AlertRecord {
        match severity {
            DisconnectSeverity::Warning => warn!(
                camera_id = %camera,
                source_index = source_index,
                message = message,
                "Camera warning from upstream"
            ),
            DisconnectSeverity::Error => error!(
                camera_id = %camera,
                source_index = source_index,
                message = message,
                "Camera offline"
            ),
        }

        let record = AlertRecord::camera_health(now, camera, source_index, &self.site, severity, message);
        self.stats.lock().disconnects_reported += 1;
        self.write(&record);
        record
    }

    fn trigger_capture(
        &self,
        buffer: &Mutex<RollingCaptureBuffer>,
        camera: &CameraId,
        triggers: &[String],
        now: DateTime<Utc>,
    ) -> (Option<bool>, Option<String>) {
        let result = buffer.lock().trigger(triggers, true, now);
        match result {
            Ok(outcome) => {
                self.stats.lock().captures_triggered += 1;
                debug!(
                    camera_id = %camera,
                    snapshot_burst = outcome.snapshot_burst,
                    recording = ?outcome.recording,
                    "Capture triggered"
                );
                (Some(true), None)
            }
            Err(e) => {
                self.stats.lock().capture_failures += 1;
                warn!(camera_id = %camera, error = %e, "Capture trigger failed");
                (Some(false), Some(e.to_string()))
            }
        }
    }

    fn write(&self, record: &AlertRecord) {
        if let Err(e) = self.log.append(record) {
            self.stats.lock().log_failures += 1;
            error!(
                camera_id = %record.camera_id(),
                kind = record.kind(),
                error = %e,
                "Failed to append alert record, dropping it"
            );
        }
    }
}

fn elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
    match last {
        Some(at) => now - at >= interval,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_buffer::test_support::{settings, RecordingEncoder};
    use crate::config::{AlertLogConfig, LogFormat};
    use crate::types::BoundingBox;
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;

    fn create_test_config(dir: &Path) -> CaptureServiceConfig {
        let mut config = CaptureServiceConfig::default();
        config.policy.timezone = Some("UTC".to_string());
        config.site.device_id = Some("edge-01".to_string());
        config.log = AlertLogConfig {
            path: dir.join("detection_log.json"),
            format: LogFormat::JsonArray,
        };
        config
    }

    fn create_engine(dir: &Path) -> AlertDecisionEngine {
        let config = create_test_config(dir);
        let log = Arc::new(AlertLog::open(&config.log).unwrap());
        AlertDecisionEngine::new(&config, log).unwrap()
    }

    // 2024-01-03 is a Wednesday; noon is inside office hours.
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
    }

    fn evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 20, 0, 0).unwrap()
    }

    fn secs(s: i64) -> chrono::Duration {
        chrono::Duration::seconds(s)
    }

    fn det(label: &str, confidence: f32) -> Detection {
        Detection {
            class_id: 0,
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                top: 1.0,
                left: 2.0,
                width: 3.0,
                height: 4.0,
            },
        }
    }

    fn batch(camera: &str, detections: Vec<Detection>) -> DetectionBatch {
        DetectionBatch {
            camera_id: CameraId::from(camera),
            source_index: 3,
            frame_sequence: 42,
            timestamp: noon(),
            detections,
        }
    }

    fn logged(dir: &Path) -> Vec<serde_json::Value> {
        let text = fs::read_to_string(dir.join("detection_log.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn kind(record: &Option<AlertRecord>) -> Option<&'static str> {
        record.as_ref().map(|r| r.kind())
    }

    #[test]
    fn test_trigger_table_order_and_dedup() {
        let table = TriggerTable::from_groups(&[
            TriggerGroup {
                tag: "FIRE_SMOKE_DETECTED".to_string(),
                labels: vec!["fire".to_string(), "Smoke".to_string()],
            },
            TriggerGroup {
                tag: "VIOLENCE_DETECTED".to_string(),
                labels: vec!["fight".to_string()],
            },
        ]);
        let dets = [det("FIGHT", 0.9), det("smoke", 0.9), det("fire", 0.8)];

        assert_eq!(
            table.tags_for(dets.iter()),
            vec!["FIRE_SMOKE_DETECTED".to_string(), "VIOLENCE_DETECTED".to_string()]
        );
        assert!(table.tags_for([det("person", 0.9)].iter()).is_empty());
    }

    #[test]
    fn test_stale_detections_never_count() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut limiters = RateLimiters::default();

        let stale = batch("CAFETERIA", vec![det("person", -1.0), det("fire", -1.0)]);
        assert!(engine.observe(&mut limiters, &stale, None, noon()).is_none());

        let mixed = batch("CAFETERIA", vec![det("person", 0.9), det("person", -1.0), det("fire", -1.0)]);
        let record = engine.observe(&mut limiters, &mixed, None, noon()).unwrap();
        match record {
            AlertRecord::Metric { data, .. } => {
                assert_eq!(data.people_count, 1);
                assert_eq!(data.detections.len(), 1);
                assert!(data.triggers.is_empty());
            }
            other => panic!("expected metric, got {:?}", other),
        }
        assert_eq!(engine.stats().stale_detections_dropped, 4);
    }

    #[test]
    fn test_batch_without_countable_class_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut limiters = RateLimiters::default();

        let record = engine.observe(&mut limiters, &batch("CAFETERIA", vec![det("fire", 0.9)]), None, noon());

        assert!(record.is_none());
        assert!(limiters.last_event.is_none());
        assert!(limiters.last_heartbeat.is_none());
        assert!(logged(dir.path()).is_empty());
    }

    #[test]
    fn test_visual_event_with_capture() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let buffer = Mutex::new(RollingCaptureBuffer::new(
            CameraId::from("CAFETERIA"),
            settings(&dir.path().join("alerts")),
            Arc::new(RecordingEncoder::default()),
        ));
        let mut limiters = RateLimiters::default();

        let b = batch("CAFETERIA", vec![det("Person", 0.9), det("SMOKE", 0.7)]);
        let record = engine.observe(&mut limiters, &b, Some(&buffer), noon()).unwrap();

        match &record {
            AlertRecord::Event { meta, event } => {
                assert_eq!(meta.cam_id.as_str(), "CAFETERIA");
                assert_eq!(event.triggers, vec!["FIRE_SMOKE_DETECTED".to_string()]);
                assert_eq!(event.people_count, 1);
                assert_eq!(event.capture_triggered, Some(true));
                assert!(event.capture_error.is_none());
            }
            other => panic!("expected event, got {:?}", other),
        }
        assert!(buffer.lock().is_recording());

        let entries = logged(dir.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["type"], "EVENT");
        assert_eq!(entries[0]["meta"]["status"], "CRITICAL");
    }

    #[test]
    fn test_policy_event_without_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut limiters = RateLimiters::default();

        let record = engine
            .observe(&mut limiters, &batch("CAFETERIA", vec![det("person", 0.9)]), None, evening())
            .unwrap();

        match record {
            AlertRecord::Event { event, .. } => {
                assert_eq!(event.triggers, vec!["RESTRICTED_ACCESS_AFTER_HOURS".to_string()]);
                assert!(event.capture_triggered.is_none());
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_capture_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let buffer = Mutex::new(RollingCaptureBuffer::new(
            CameraId::from("CAFETERIA"),
            settings(&blocker),
            Arc::new(RecordingEncoder::default()),
        ));
        let mut limiters = RateLimiters::default();

        let b = batch("CAFETERIA", vec![det("person", 0.9), det("fire", 0.9)]);
        let record = engine.observe(&mut limiters, &b, Some(&buffer), noon()).unwrap();

        match record {
            AlertRecord::Event { event, .. } => {
                assert_eq!(event.capture_triggered, Some(false));
                assert!(event.capture_error.is_some());
            }
            other => panic!("expected event, got {:?}", other),
        }
        assert!(!buffer.lock().is_recording());
        assert_eq!(engine.stats().capture_failures, 1);
    }

    #[test]
    fn test_event_cooldown_and_heartbeat_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut limiters = RateLimiters::default();
        let b = batch("CAFETERIA", vec![det("person", 0.9), det("fire", 0.9)]);

        let first = engine.observe(&mut limiters, &b, None, noon());
        assert_eq!(kind(&first), Some("EVENT"));

        // Event cooling down; the never-fired heartbeat takes the batch and
        // carries the active triggers.
        let second = engine.observe(&mut limiters, &b, None, noon() + secs(2));
        match second {
            Some(AlertRecord::Metric { data, .. }) => {
                assert_eq!(data.triggers, vec!["FIRE_SMOKE_DETECTED".to_string()]);
            }
            other => panic!("expected metric, got {:?}", other),
        }

        assert!(engine.observe(&mut limiters, &b, None, noon() + secs(3)).is_none());
        assert_eq!(kind(&engine.observe(&mut limiters, &b, None, noon() + secs(5))), Some("EVENT"));

        let stats = engine.stats();
        assert_eq!(stats.events_emitted, 2);
        assert_eq!(stats.heartbeats_emitted, 1);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(logged(dir.path()).len(), 3);
    }

    #[test]
    fn test_heartbeat_interval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut limiters = RateLimiters::default();
        let b = batch("CAFETERIA", vec![det("person", 0.9)]);

        assert_eq!(kind(&engine.observe(&mut limiters, &b, None, noon())), Some("METRIC"));
        assert!(engine.observe(&mut limiters, &b, None, noon() + secs(30)).is_none());
        assert!(engine.observe(&mut limiters, &b, None, noon() + secs(59)).is_none());
        assert_eq!(kind(&engine.observe(&mut limiters, &b, None, noon() + secs(60))), Some("METRIC"));
    }

    #[test]
    fn test_event_priority_keeps_heartbeat_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut limiters = RateLimiters::default();
        let quiet = batch("CAFETERIA", vec![det("person", 0.9)]);
        let alarming = batch("CAFETERIA", vec![det("person", 0.9), det("fight", 0.9)]);

        assert_eq!(kind(&engine.observe(&mut limiters, &quiet, None, noon())), Some("METRIC"));

        // Both limiters due: the event wins and the heartbeat timer stays put.
        let at = noon() + secs(60);
        assert_eq!(kind(&engine.observe(&mut limiters, &alarming, None, at)), Some("EVENT"));
        assert_eq!(limiters.last_heartbeat, Some(noon()));

        assert_eq!(
            kind(&engine.observe(&mut limiters, &quiet, None, at + secs(1))),
            Some("METRIC")
        );
        assert_eq!(limiters.last_heartbeat, Some(at + secs(1)));
    }

    #[test]
    fn test_limiters_are_per_camera() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());
        let mut a = RateLimiters::default();
        let mut b = RateLimiters::default();

        let fire_a = batch("CAFETERIA", vec![det("person", 0.9), det("fire", 0.9)]);
        let fire_b = batch("RECEPTION_AREA", vec![det("person", 0.9), det("fire", 0.9)]);

        assert_eq!(kind(&engine.observe(&mut a, &fire_a, None, noon())), Some("EVENT"));
        assert_eq!(kind(&engine.observe(&mut b, &fire_b, None, noon())), Some("EVENT"));
    }

    #[test]
    fn test_report_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(dir.path());

        let record = engine.report_disconnect(
            &CameraId::from("BOSS_CABIN"),
            2,
            DisconnectSeverity::Error,
            "Could not open resource for reading",
            noon(),
        );

        assert_eq!(record.kind(), "CAMERA_OFFLINE");
        let entries = logged(dir.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["meta"]["src_id"], 2);
        assert_eq!(entries[0]["meta"]["device"], "edge-01");
        assert_eq!(engine.stats().disconnects_reported, 1);
    }
}
