//! Encoder types, configuration, and the pipeline stages shared between
//! codecs.
//!
//! This module provides:
//! - Core encoder types and configuration (`EncoderConfig`, `EncodedPacket`, etc.)
//! - Keyframe scheduling (`gop` module), reusable by any I/P codec.
//! - Picture reordering (`reorder` module), the seam where bidirectional
//!   codecs would buffer frames.
//! - Reference slot management (`refs` module).

pub mod gop;
pub mod refs;
pub mod reorder;
pub mod vp9;

use std::sync::Arc;

use crate::backend::Backend;
pub use crate::backend::RateControlMode;
use crate::error::{Result, VaForgeError};

// Default encoder configuration constants.

/// Default distance between keyframes.
pub const DEFAULT_KEYFRAME_PERIOD: u32 = 30;

/// Default frame rate (frames per second).
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Default number of reconstructed surfaces to preallocate. Covers the
/// populated reference slots plus scratch for in-flight pictures.
pub const DEFAULT_SURFACE_POOL_SIZE: usize = 7;

/// Default number of coded buffers to preallocate.
pub const DEFAULT_CODED_BUFFER_COUNT: usize = 5;

/// Video codec types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// VP9 codec.
    Vp9,
    /// VP8 codec.
    Vp8,
}

/// Picture types an encode pipeline can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    /// Intra-coded picture, decodable on its own.
    Intra,
    /// Forward-predicted picture.
    Predicted,
    /// Bi-directionally predicted picture.
    Bidirectional,
}

impl PictureType {
    /// Whether this picture codes without reading any reference.
    pub fn is_intra(self) -> bool {
        self == PictureType::Intra
    }

    /// Whether this picture reads from the reference table.
    pub fn uses_references(self) -> bool {
        !self.is_intra()
    }
}

/// Encode pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No session; nothing negotiated yet or a renegotiation failed.
    Idle,
    /// A profile has been negotiated but the session is not built.
    ProfileNegotiated,
    /// A session exists and the pipeline accepts frames.
    Ready,
    /// A picture is being encoded.
    Encoding,
}

/// Tuning options a codec may specialize for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TuneOption {
    /// No tuning, the codec's fixed defaults.
    #[default]
    None,
    /// Favor compression ratio over speed.
    HighCompression,
    /// Favor latency over compression.
    LowLatency,
    /// Favor power usage.
    LowPower,
}

/// Encoder configuration.
#[derive(Debug, Clone)]
#[must_use]
pub struct EncoderConfig {
    /// Video codec to use.
    pub codec: Codec,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Distance between keyframes.
    pub keyframe_period: u32,
    /// Rate control mode.
    pub rate_control: RateControlMode,
    /// Tuning option.
    pub tune: TuneOption,
    /// Frame rate numerator.
    pub frame_rate_numerator: u32,
    /// Frame rate denominator.
    pub frame_rate_denominator: u32,
    /// Reconstructed surfaces to preallocate.
    pub surface_pool_size: usize,
    /// Coded buffers to preallocate.
    pub coded_buffer_count: usize,
}

impl EncoderConfig {
    /// Create a new VP9 encoder configuration with default settings.
    pub fn vp9(width: u32, height: u32) -> Self {
        assert!(width > 0, "width must be non-zero");
        assert!(height > 0, "height must be non-zero");

        Self {
            codec: Codec::Vp9,
            width,
            height,
            keyframe_period: DEFAULT_KEYFRAME_PERIOD,
            rate_control: RateControlMode::Cqp,
            tune: TuneOption::None,
            frame_rate_numerator: DEFAULT_FRAME_RATE,
            frame_rate_denominator: 1,
            surface_pool_size: DEFAULT_SURFACE_POOL_SIZE,
            coded_buffer_count: DEFAULT_CODED_BUFFER_COUNT,
        }
    }

    /// Set the keyframe period.
    pub fn with_keyframe_period(mut self, period: u32) -> Self {
        self.keyframe_period = period;
        self
    }

    /// Set the rate control mode.
    pub fn with_rate_control(mut self, mode: RateControlMode) -> Self {
        self.rate_control = mode;
        self
    }

    /// Set the tuning option.
    pub fn with_tune(mut self, tune: TuneOption) -> Self {
        self.tune = tune;
        self
    }

    /// Set the frame rate.
    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_rate_numerator = numerator;
        self.frame_rate_denominator = denominator;
        self
    }

    /// Set the number of reconstructed surfaces to preallocate.
    pub fn with_surface_pool_size(mut self, count: usize) -> Self {
        self.surface_pool_size = count;
        self
    }

    /// Set the number of coded buffers to preallocate.
    pub fn with_coded_buffer_count(mut self, count: usize) -> Self {
        self.coded_buffer_count = count;
        self
    }
}

/// One raw input frame handed to the encoder.
///
/// The pixel payload lives in backend memory; the pipeline only tracks the
/// frame's timing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrame {
    /// Presentation timestamp.
    pub pts: u64,
    /// Decode timestamp.
    pub dts: u64,
}

impl VideoFrame {
    /// Create a frame with the given timestamps.
    pub fn new(pts: u64, dts: u64) -> Self {
        Self { pts, dts }
    }
}

/// Encoded video packet.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Encoded bitstream data.
    pub data: Vec<u8>,
    /// Picture type.
    pub picture_type: PictureType,
    /// Whether decoding can start at this packet.
    pub sync_point: bool,
    /// Presentation timestamp.
    pub pts: u64,
    /// Decode timestamp.
    pub dts: u64,
    /// Position in display order.
    pub display_order: u64,
}

/// Video encoder supporting multiple codecs.
///
/// The encoder is implemented as an enum to dispatch to codec-specific
/// pipelines.
pub enum Encoder {
    /// VP9 encoder.
    Vp9(self::vp9::Vp9Encoder),
}

impl Encoder {
    /// Create a new encoder over `backend`.
    pub fn new(backend: Arc<dyn Backend>, config: &EncoderConfig) -> Result<Self> {
        match config.codec {
            Codec::Vp9 => Ok(Encoder::Vp9(self::vp9::Vp9Encoder::new(backend, config)?)),
            Codec::Vp8 => Err(VaForgeError::CodecNotSupported(
                "VP8 encoding not yet implemented".to_string(),
            )),
        }
    }

    /// Encode one input frame.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use vaforge::{Encoder, EncoderConfig, MockBackend, VideoFrame};
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let backend = Arc::new(MockBackend::new());
    /// let mut encoder = Encoder::new(backend, &EncoderConfig::vp9(1920, 1080))?;
    ///
    /// for n in 0..30 {
    ///     for packet in encoder.encode(VideoFrame::new(n * 33, n * 33))? {
    ///         // Write packet.data to the container.
    ///     }
    /// }
    /// for packet in encoder.flush()? {
    ///     // Drain whatever the codec buffered.
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn encode(&mut self, frame: VideoFrame) -> Result<Vec<EncodedPacket>> {
        match self {
            Encoder::Vp9(encoder) => encoder.encode(frame),
        }
    }

    /// Flush the encoder and get remaining packets.
    pub fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        match self {
            Encoder::Vp9(encoder) => encoder.flush(),
        }
    }

    /// Request that the next frame be a keyframe.
    pub fn request_keyframe(&mut self) {
        match self {
            Encoder::Vp9(encoder) => encoder.request_keyframe(),
        }
    }

    /// Change the keyframe period without restarting the session.
    pub fn set_keyframe_period(&mut self, period: u32) {
        match self {
            Encoder::Vp9(encoder) => encoder.set_keyframe_period(period),
        }
    }

    /// Apply a codec-specific tunable.
    pub fn set_tunable(&mut self, tunable: self::vp9::Vp9Tunable) -> Result<()> {
        match self {
            Encoder::Vp9(encoder) => encoder.set_tunable(tunable),
        }
    }

    /// Renegotiate the session for a changed configuration.
    pub fn reconfigure(&mut self, config: &EncoderConfig) -> Result<()> {
        match self {
            Encoder::Vp9(encoder) => encoder.reconfigure(config),
        }
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        match self {
            Encoder::Vp9(encoder) => encoder.state(),
        }
    }
}
