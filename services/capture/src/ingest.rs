//! Perception pipeline hand-off.
//!
//! The upstream pipeline delivers one JSON object per line. Each line is a
//! `sample` (detections plus an optional RGB24 frame), a `disconnect` report
//! for one source, or `end_of_stream`.

use crate::config::InputConfig;
use crate::record::DisconnectSeverity;
use crate::registry::{parse_source_index, CameraRegistry};
use crate::types::{Detection, DetectionBatch, Frame};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Errors reading the upstream message stream.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message on line {line}: {source}")]
    Parse {
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

impl IngestError {
    /// Whether the stream can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IngestError::Parse { .. })
    }
}

/// Frame payload as sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub width: u32,
    pub height: u32,
    /// RGB24 pixels, base64 encoded
    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,
}

/// One line of the upstream stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireMessage {
    Sample {
        camera_index: u32,
        frame_sequence: u64,
        /// Capture time; the receive time is used when absent
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(default)]
        frame: Option<WireFrame>,
        #[serde(default)]
        detections: Vec<Detection>,
    },
    Disconnect {
        severity: DisconnectSeverity,
        /// Upstream element path, e.g. `.../uri-decode-bin-2/...`
        #[serde(default)]
        context: String,
        /// Explicit source index; parsed from `context` when absent
        #[serde(default)]
        source_index: Option<u32>,
        message: String,
    },
    EndOfStream,
}

mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// A message with camera identities resolved.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    Sample {
        frame: Option<Frame>,
        batch: DetectionBatch,
    },
    /// Upstream disconnect. A `None` source means the whole pipeline failed.
    Disconnect {
        source_index: Option<u32>,
        severity: DisconnectSeverity,
        message: String,
    },
    EndOfStream,
}

impl PipelineMessage {
    /// Source the message belongs to, if any.
    pub fn source_index(&self) -> Option<u32> {
        match self {
            PipelineMessage::Sample { batch, .. } => Some(batch.source_index),
            PipelineMessage::Disconnect { source_index, .. } => *source_index,
            PipelineMessage::EndOfStream => None,
        }
    }
}

impl WireMessage {
    /// Resolve camera identities and take ownership of the pixel data.
    pub fn resolve(self, cameras: &CameraRegistry, received_at: DateTime<Utc>) -> PipelineMessage {
        match self {
            WireMessage::Sample {
                camera_index,
                frame_sequence,
                timestamp,
                frame,
                detections,
            } => {
                let camera_id = cameras.resolve(camera_index);
                let frame = frame.map(|f| Frame {
                    camera_id: camera_id.clone(),
                    sequence: frame_sequence,
                    width: f.width,
                    height: f.height,
                    data: Bytes::from(f.data),
                });

                PipelineMessage::Sample {
                    frame,
                    batch: DetectionBatch {
                        camera_id,
                        source_index: camera_index,
                        frame_sequence,
                        timestamp: timestamp.unwrap_or(received_at),
                        detections,
                    },
                }
            }
            WireMessage::Disconnect {
                severity,
                context,
                source_index,
                message,
            } => PipelineMessage::Disconnect {
                source_index: source_index.or_else(|| parse_source_index(&context)),
                severity,
                message,
            },
            WireMessage::EndOfStream => PipelineMessage::EndOfStream,
        }
    }
}

/// Source of pipeline messages.
#[async_trait]
pub trait PerceptionSource: Send {
    /// Next message, or `None` once the stream is exhausted.
    async fn next_message(&mut self) -> Result<Option<PipelineMessage>, IngestError>;
}

/// Newline-delimited JSON reader.
pub struct JsonLinesSource<R> {
    reader: R,
    buf: Vec<u8>,
    cameras: CameraRegistry,
    line: u64,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, cameras: CameraRegistry) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            cameras,
            line: 0,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.line
    }
}

#[async_trait]
impl<R> PerceptionSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_message(&mut self) -> Result<Option<PipelineMessage>, IngestError> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                debug!(lines = self.line, "Input exhausted");
                return Ok(None);
            }
            self.line += 1;

            // Bytes are handed to serde as-is so invalid UTF-8 is a parse error.
            let text = self.buf.trim_ascii();
            if text.is_empty() {
                continue;
            }

            let wire: WireMessage = serde_json::from_slice(text).map_err(|source| IngestError::Parse {
                line: self.line,
                source,
            })?;
            return Ok(Some(wire.resolve(&self.cameras, Utc::now())));
        }
    }
}

/// Open the configured input: a file when `input.path` is set, stdin otherwise.
pub async fn open_source(
    config: &InputConfig,
    cameras: CameraRegistry,
) -> Result<Box<dyn PerceptionSource>, IngestError> {
    match &config.path {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            info!(path = %path.display(), "Reading pipeline messages from file");
            Ok(Box::new(JsonLinesSource::new(BufReader::new(file), cameras)))
        }
        None => {
            info!("Reading pipeline messages from stdin");
            Ok(Box::new(JsonLinesSource::new(
                BufReader::new(tokio::io::stdin()),
                cameras,
            )))
        }
    }
}
