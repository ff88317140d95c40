//! Pipeline construction and session negotiation.

use std::sync::Arc;

use tracing::{debug, info};

use super::params::{MAX_FRAME_DIMENSION, NUM_REF_FRAMES, REFS_PER_FRAME};
use super::{Vp9Encoder, CANDIDATE_PROFILES};
use crate::backend::{packed_headers, Backend, ContextId, ContextInfo, Entrypoint, Profile, RateControlMode};
use crate::buffer::CodedBufferPool;
use crate::encoder::refs::ReferenceFrameTable;
use crate::encoder::reorder::PictureReorder;
use crate::encoder::{Codec, EncoderConfig, PipelineState, TuneOption};
use crate::error::{Result, VaForgeError};
use crate::surface::SurfacePool;

fn round_up_16(value: u32) -> u64 {
    (u64::from(value) + 15) & !15
}

/// Worst-case compressed frame size for 4:2:0 content at the given
/// dimensions, used to size the coded buffers.
///
/// Dimensions are rounded up to whole 16-pixel blocks in 64-bit math. The
/// pipeline validates dimensions against [`MAX_FRAME_DIMENSION`] before
/// sizing any buffer.
pub fn coded_buffer_size(width: u32, height: u32) -> usize {
    (round_up_16(width) * round_up_16(height) * 3 / 2) as usize
}

/// Checks the configuration against what the VP9 pipeline supports.
fn validate_config(config: &EncoderConfig) -> Result<()> {
    if config.codec != Codec::Vp9 {
        return Err(VaForgeError::InvalidParameter(format!(
            "VP9 pipeline cannot encode {:?}",
            config.codec
        )));
    }
    if config.width == 0
        || config.height == 0
        || config.width > MAX_FRAME_DIMENSION
        || config.height > MAX_FRAME_DIMENSION
    {
        return Err(VaForgeError::InvalidInput(format!(
            "unsupported frame dimensions {}x{}",
            config.width, config.height
        )));
    }
    if config.surface_pool_size == 0 || config.coded_buffer_count == 0 {
        return Err(VaForgeError::InvalidInput(
            "surface and coded-buffer pools need nonzero capacities".into(),
        ));
    }
    if config.rate_control != RateControlMode::Cqp {
        return Err(VaForgeError::InvalidParameter(format!(
            "unsupported rate control {:?}, only constant-QP is available",
            config.rate_control
        )));
    }
    if config.tune != TuneOption::None {
        return Err(VaForgeError::InvalidParameter(format!(
            "unsupported tuning option {:?}",
            config.tune
        )));
    }
    Ok(())
}

/// Probes the candidate profiles and picks the first one the backend
/// exposes an encoder for.
fn derive_profile(backend: &Arc<dyn Backend>, entrypoint: Entrypoint) -> Result<Profile> {
    for &candidate in CANDIDATE_PROFILES {
        if backend.has_encoder(candidate, entrypoint) {
            debug!("Negotiated {candidate:?} at {entrypoint:?}");
            return Ok(candidate);
        }
    }
    Err(VaForgeError::UnsupportedProfile(
        "backend exposes no VP9 encoder".into(),
    ))
}

/// Backend resources of one negotiated encode session.
struct Session {
    context: ContextId,
    surfaces: SurfacePool,
    coded_buffers: CodedBufferPool,
}

fn create_pools(
    backend: &Arc<dyn Backend>,
    config: &EncoderConfig,
    buffer_size: usize,
) -> Result<(SurfacePool, CodedBufferPool)> {
    let surfaces = SurfacePool::new(
        backend.clone(),
        config.width,
        config.height,
        config.surface_pool_size,
    )?;
    let coded_buffers =
        CodedBufferPool::new(backend.clone(), buffer_size, config.coded_buffer_count)?;
    Ok((surfaces, coded_buffers))
}

fn create_session(
    backend: &Arc<dyn Backend>,
    config: &EncoderConfig,
    profile: Profile,
    entrypoint: Entrypoint,
) -> Result<Session> {
    let info = ContextInfo {
        profile,
        entrypoint,
        width: config.width,
        height: config.height,
        ref_frames: REFS_PER_FRAME,
        rate_control: config.rate_control,
        packed_headers: packed_headers::NONE,
    };
    let context = backend.create_context(&info)?;

    let buffer_size = coded_buffer_size(config.width, config.height);
    let (surfaces, coded_buffers) = match create_pools(backend, config, buffer_size) {
        Ok(pools) => pools,
        Err(err) => {
            // The fresh context must not outlive a failed session setup.
            backend.destroy_context(context);
            return Err(err);
        }
    };

    info!(
        "VP9 session: {:?} {}x{}, {} surfaces, {} coded buffers of {} bytes",
        profile,
        config.width,
        config.height,
        config.surface_pool_size,
        config.coded_buffer_count,
        buffer_size
    );

    Ok(Session {
        context,
        surfaces,
        coded_buffers,
    })
}

impl Vp9Encoder {
    /// Creates a pipeline over `backend` from `config`.
    ///
    /// Negotiates the profile, creates the encode context, and preallocates
    /// the surface and coded-buffer pools. The returned pipeline is in
    /// [`PipelineState::Ready`].
    pub fn new(backend: Arc<dyn Backend>, config: &EncoderConfig) -> Result<Self> {
        validate_config(config)?;

        let span = tracing::info_span!("vp9_encode", width = config.width, height = config.height);
        let guard = span.enter();

        let entrypoint = Entrypoint::SliceEncode;
        let profile = derive_profile(&backend, entrypoint)?;
        let session = create_session(&backend, config, profile, entrypoint)?;
        info!("VP9 pipeline ready, keyframe period {}", config.keyframe_period.max(1));
        drop(guard);

        Ok(Self {
            // Backend session.
            backend,
            context: Some(session.context),
            profile,
            entrypoint,
            // Stream configuration.
            width: config.width,
            height: config.height,
            keyframe_period: config.keyframe_period.max(1),
            // Pipeline stages.
            reorder: PictureReorder::new(config.keyframe_period),
            refs: ReferenceFrameTable::new(NUM_REF_FRAMES),
            // Resources.
            surfaces: session.surfaces,
            coded_buffers: session.coded_buffers,
            // State.
            state: PipelineState::Ready,
            span,
        })
    }

    /// Renegotiates the session for a changed configuration.
    ///
    /// Invalid knobs are rejected before any teardown and leave the running
    /// session untouched. Otherwise the context, pools, reference table, and
    /// keyframe schedule are torn down and rebuilt from `config`; if the
    /// renegotiation fails partway, no backend session remains and the
    /// pipeline rejects frames until a later call succeeds.
    pub fn reconfigure(&mut self, config: &EncoderConfig) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        validate_config(config)?;

        self.refs.clear();
        if let Some(context) = self.context.take() {
            self.backend.destroy_context(context);
        }
        self.state = PipelineState::Idle;
        info!(
            "Reconfiguring: {}x{}, keyframe period {}",
            config.width, config.height, config.keyframe_period
        );

        let profile = derive_profile(&self.backend, self.entrypoint)?;
        self.profile = profile;
        self.state = PipelineState::ProfileNegotiated;

        let session = create_session(&self.backend, config, profile, self.entrypoint)?;

        // Swapping in the new pools drops the old ones, which releases
        // their backend surfaces now that the table no longer holds any.
        self.context = Some(session.context);
        self.surfaces = session.surfaces;
        self.coded_buffers = session.coded_buffers;
        self.width = config.width;
        self.height = config.height;
        self.keyframe_period = config.keyframe_period.max(1);
        self.reorder = PictureReorder::new(config.keyframe_period);
        self.span = tracing::info_span!("vp9_encode", width = config.width, height = config.height);
        self.state = PipelineState::Ready;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coded_buffer_size_rounds_dimensions_up() {
        // 320x240 is already aligned: 320 * 240 * 3 / 2.
        assert_eq!(coded_buffer_size(320, 240), 115_200);
        // 1918x1078 rounds to 1920x1088.
        assert_eq!(coded_buffer_size(1918, 1078), 1920 * 1088 * 3 / 2);
        assert_eq!(coded_buffer_size(1, 1), 16 * 16 * 3 / 2);
    }

    #[test]
    fn test_coded_buffer_size_survives_extreme_dimensions() {
        // u32::MAX rounds up to 2^32, which needs the 64-bit intermediate.
        assert_eq!(coded_buffer_size(u32::MAX, 1), 0x18_0000_0000);
    }

    #[test]
    fn test_validate_rejects_wrong_codec() {
        let config = EncoderConfig {
            codec: Codec::Vp8,
            ..EncoderConfig::vp9(320, 240)
        };
        assert!(matches!(
            validate_config(&config),
            Err(VaForgeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_pool_capacities() {
        let no_surfaces = EncoderConfig::vp9(320, 240).with_surface_pool_size(0);
        assert!(matches!(
            validate_config(&no_surfaces),
            Err(VaForgeError::InvalidInput(_))
        ));

        let no_buffers = EncoderConfig::vp9(320, 240).with_coded_buffer_count(0);
        assert!(matches!(
            validate_config(&no_buffers),
            Err(VaForgeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_accepts_cqp_defaults() {
        assert!(validate_config(&EncoderConfig::vp9(320, 240)).is_ok());
        assert!(validate_config(&EncoderConfig::vp9(8192, 8192)).is_ok());
    }
}
