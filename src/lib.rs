//! Hardware-accelerated video encoding pipelines over an abstract
//! acceleration backend.
//!
//! `vaforge` owns the orchestration half of a hardware encoder: picture-type
//! scheduling, reference-frame slot management, parameter-buffer
//! construction, and surface/coded-buffer pooling. The device half lives
//! behind the [`Backend`] trait, so the same pipeline drives real
//! acceleration APIs and the in-process [`MockBackend`] alike.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaforge::{Encoder, EncoderConfig, MockBackend, VideoFrame};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MockBackend::new());
//! let config = EncoderConfig::vp9(1920, 1080).with_keyframe_period(30);
//! let mut encoder = Encoder::new(backend, &config)?;
//!
//! for n in 0..300u64 {
//!     for packet in encoder.encode(VideoFrame::new(n * 33, n * 33))? {
//!         // Hand packet.data to the container muxer.
//!     }
//! }
//! for _packet in encoder.flush()? {}
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod encoder;
pub mod error;
pub mod surface;

pub use backend::{
    packed_headers, Backend, BufferId, ContextId, ContextInfo, Entrypoint, MockBackend,
    ParameterBuffer, Profile, RateControlMode, SubmitRequest, SurfaceId, INVALID_SURFACE_ID,
};
pub use buffer::{CodedBufferPool, CodedBufferProxy};
pub use encoder::vp9::{coded_buffer_size, Vp9Encoder, Vp9Tunable};
pub use encoder::{
    Codec, EncodedPacket, Encoder, EncoderConfig, PictureType, PipelineState, TuneOption,
    VideoFrame, DEFAULT_CODED_BUFFER_COUNT, DEFAULT_FRAME_RATE, DEFAULT_KEYFRAME_PERIOD,
    DEFAULT_SURFACE_POOL_SIZE,
};
pub use error::{Result, VaForgeError};
pub use surface::{SurfacePool, SurfaceProxy};
