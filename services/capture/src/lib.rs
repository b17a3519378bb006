//! Vigil Capture Service
//!
//! Event-triggered evidence capture and alert logging for multi-camera site
//! monitoring. An upstream perception pipeline hands this service per-camera
//! detection batches and frames; the service decides what is noteworthy,
//! rate-limits what it reports, and persists both structured alert records
//! and the audiovisual evidence around each trigger.
//!
//! ## Features
//!
//! - **Access Policy**: Office-hours, restricted-room and weekday rules mapped
//!   to violation tags
//! - **Visual Triggers**: Configurable label groups (fire/smoke, violence)
//! - **Rate Limiting**: Independent per-camera event cooldown and heartbeat
//!   interval
//! - **Evidence Capture**: Rolling pre-event buffer, extendable post-event
//!   clips and four-image snapshot bursts
//! - **Crash-Safe Alert Log**: A JSON array kept valid after every append, or
//!   newline-delimited records
//!
//! ## Architecture
//!
//! ```text
//! NDJSON input           Camera workers                    Outputs
//! ┌──────────────┐      ┌──────────────────┐            ┌──────────────┐
//! │ Perception   │─────▶│ CameraContext    │───────────▶│ Alert log    │
//! │ Source       │      │  RateLimiters    │            └──────────────┘
//! └──────────────┘      │        │         │
//!                       │        ▼         │            ┌──────────────┐
//!                       │ AlertDecision    │───────────▶│ <root>/<cam>/│
//!                       │ Engine + Policy  │            │ clips, stills│
//!                       │        │         │            └──────────────┘
//!                       │        ▼         │
//!                       │ RollingCapture   │
//!                       │ Buffer           │
//!                       └──────────────────┘
//! ```

pub mod alert_log;
pub mod capture_buffer;
pub mod codec;
pub mod config;
pub mod context;
pub mod decision;
pub mod ingest;
pub mod policy;
pub mod record;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use alert_log::{AlertLog, AlertLogStats, LogWriteError};
pub use capture_buffer::{
    CaptureError, CaptureSettings, CaptureStats, RecordingAction, RollingCaptureBuffer,
    TriggerOutcome,
};
pub use codec::{ClipWriter, CodecError, FrameEncoder, JpegEncoderFactory};
pub use config::{CaptureServiceConfig, ConfigValidationError};
pub use context::{CameraContext, ContextRegistry};
pub use decision::{AlertDecisionEngine, Decision, DecisionStats, RateLimiters, TriggerTable};
pub use ingest::{IngestError, JsonLinesSource, PerceptionSource, PipelineMessage, WireMessage};
pub use policy::{PolicyClock, PolicyEngine};
pub use record::{AlertRecord, DisconnectSeverity, SiteIdentity};
pub use registry::CameraRegistry;
pub use supervisor::{RunSummary, StopReason, Supervisor, SupervisorError};
pub use types::{BoundingBox, CameraId, Detection, DetectionBatch, Frame};
