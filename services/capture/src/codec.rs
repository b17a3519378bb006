//! Codec seam between the capture state machine and the pixel encoder.
//!
//! The capture buffer decides which frames become artifacts; an
//! [`FrameEncoder`] turns them into bytes. The default encoder writes JPEG
//! stills and Motion-JPEG clips (concatenated JPEG frames).

use crate::types::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by an encoder.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame {sequence} is {len} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        sequence: u64,
        width: u32,
        height: u32,
        len: usize,
        expected: usize,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open video output. Exclusively owned by one camera while recording.
pub trait ClipWriter: Send {
    /// Append one frame.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CodecError>;

    /// Flush and release the output.
    fn finish(self: Box<Self>) -> Result<(), CodecError>;

    fn path(&self) -> &Path;

    fn frames_written(&self) -> u64;
}

/// Encoder for clips and stills.
pub trait FrameEncoder: Send + Sync {
    /// File extension for clips, without the dot.
    fn clip_extension(&self) -> &'static str;

    /// File extension for stills, without the dot.
    fn image_extension(&self) -> &'static str;

    /// Start a clip in an already created, empty file.
    fn open_clip(&self, file: File, path: PathBuf, fps: u32)
        -> Result<Box<dyn ClipWriter>, CodecError>;

    /// Encode one still into an already created, empty file.
    fn write_image(&self, file: File, frame: &Frame) -> Result<(), CodecError>;
}

/// JPEG stills and Motion-JPEG clips.
#[derive(Debug, Clone)]
pub struct JpegEncoderFactory {
    quality: u8,
}

impl JpegEncoderFactory {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameEncoder for JpegEncoderFactory {
    fn clip_extension(&self) -> &'static str {
        "mjpeg"
    }

    fn image_extension(&self) -> &'static str {
        "jpg"
    }

    fn open_clip(
        &self,
        file: File,
        path: PathBuf,
        _fps: u32,
    ) -> Result<Box<dyn ClipWriter>, CodecError> {
        Ok(Box::new(MjpegClipWriter {
            writer: BufWriter::new(file),
            path,
            quality: self.quality,
            frames_written: 0,
        }))
    }

    fn write_image(&self, file: File, frame: &Frame) -> Result<(), CodecError> {
        let mut writer = BufWriter::new(file);
        encode_jpeg(&mut writer, frame, self.quality)?;
        writer.flush()?;
        Ok(())
    }
}

/// Motion-JPEG clip: every frame is a complete JPEG image, back to back.
struct MjpegClipWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    quality: u8,
    frames_written: u64,
}

impl ClipWriter for MjpegClipWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        encode_jpeg(&mut self.writer, frame, self.quality)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

fn encode_jpeg<W: Write>(writer: &mut W, frame: &Frame, quality: u8) -> Result<(), CodecError> {
    if !frame.is_well_formed() {
        return Err(CodecError::InvalidFrame {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            len: frame.data.len(),
            expected: frame.expected_len(),
        });
    }

    let mut encoder = JpegEncoder::new_with_quality(writer, quality);
    encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
    Ok(())
}
