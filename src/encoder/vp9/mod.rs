//! VP9 encode pipeline.
//!
//! Drives one encode session end to end: profile negotiation against the
//! backend, surface and coded-buffer pools, the keyframe schedule,
//! parameter-buffer construction, submission, and reference table updates.
//!
//! The pipeline is strictly causal: intra and forward-predicted pictures
//! only, encoded in arrival order. Predicted pictures read all three named
//! reference slots (last, golden, altref) and refresh "last" only.

mod encode;
mod init;
pub mod params;

pub use init::coded_buffer_size;

use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, ContextId, Entrypoint, Profile, SurfaceId};
use crate::buffer::CodedBufferPool;
use crate::encoder::refs::ReferenceFrameTable;
use crate::encoder::reorder::PictureReorder;
use crate::encoder::PipelineState;
use crate::error::{Result, VaForgeError};
use crate::surface::SurfacePool;

/// Profiles the pipeline can negotiate, in preference order.
pub const CANDIDATE_PROFILES: &[Profile] = &[Profile::Vp9Profile0];

/// VP9 encode pipeline over an acceleration backend.
pub struct Vp9Encoder {
    // Backend session.
    backend: Arc<dyn Backend>,
    context: Option<ContextId>,
    profile: Profile,
    entrypoint: Entrypoint,

    // Stream configuration.
    width: u32,
    height: u32,
    keyframe_period: u32,

    // Pipeline stages. Declared before the pools so their surface proxies
    // return to the pools first on drop.
    reorder: PictureReorder,
    refs: ReferenceFrameTable,

    // Resources.
    surfaces: SurfacePool,
    coded_buffers: CodedBufferPool,

    // State.
    state: PipelineState,
    span: tracing::Span,
}

impl Vp9Encoder {
    /// Negotiated profile.
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Entry point the profile was negotiated against.
    pub fn entrypoint(&self) -> Entrypoint {
        self.entrypoint
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Configured frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Configured frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frames between consecutive intra pictures.
    pub fn keyframe_period(&self) -> u32 {
        self.keyframe_period
    }

    /// Per-slot ids of the reference table. Empty slots carry the
    /// "no reference" sentinel.
    pub fn reference_slot_ids(&self) -> Vec<SurfaceId> {
        self.refs.slot_ids()
    }

    /// Changes the keyframe period for subsequent pictures without
    /// restarting the session.
    pub fn set_keyframe_period(&mut self, keyframe_period: u32) {
        let span = self.span.clone();
        let _guard = span.enter();
        self.keyframe_period = keyframe_period.max(1);
        self.reorder.set_keyframe_period(keyframe_period);
        debug!("Keyframe period set to {}", self.keyframe_period);
    }

    /// Requests that the next encoded picture be a keyframe.
    pub fn request_keyframe(&mut self) {
        let span = self.span.clone();
        let _guard = span.enter();
        self.reorder.request_keyframe();
        debug!("Keyframe requested");
    }

    /// Applies a codec-specific tunable.
    ///
    /// The ids are recognized but none is currently supported; the fixed
    /// defaults in [`params`] apply to every picture and each call is
    /// rejected with [`VaForgeError::InvalidParameter`].
    pub fn set_tunable(&mut self, tunable: Vp9Tunable) -> Result<()> {
        Err(VaForgeError::InvalidParameter(format!(
            "unsupported tunable {tunable:?}"
        )))
    }
}

/// Codec-specific tunables recognized by the VP9 pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vp9Tunable {
    /// Luma AC quantizer index.
    YacQindex(u8),
    /// In-loop filter level.
    LoopFilterLevel(u8),
    /// In-loop filter sharpness.
    SharpnessLevel(u8),
}

impl std::fmt::Debug for Vp9Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vp9Encoder")
            .field("profile", &self.profile)
            .field("state", &self.state)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("keyframe_period", &self.keyframe_period)
            .finish_non_exhaustive()
    }
}

impl Drop for Vp9Encoder {
    fn drop(&mut self) {
        // Release the table's proxies before the pools tear down.
        self.refs.clear();
        if let Some(context) = self.context.take() {
            self.backend.destroy_context(context);
        }
        debug!("VP9 pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, ParameterBuffer, INVALID_SURFACE_ID};
    use crate::encoder::{EncodedPacket, EncoderConfig, PictureType, RateControlMode, TuneOption, VideoFrame};

    fn test_config() -> EncoderConfig {
        EncoderConfig::vp9(320, 240).with_keyframe_period(3)
    }

    fn new_encoder() -> (Arc<MockBackend>, Vp9Encoder) {
        let backend = Arc::new(MockBackend::new());
        let encoder = Vp9Encoder::new(backend.clone(), &test_config()).unwrap();
        (backend, encoder)
    }

    fn frame(n: u64) -> VideoFrame {
        VideoFrame::new(n * 33, n * 33)
    }

    fn encode_one(encoder: &mut Vp9Encoder, n: u64) -> EncodedPacket {
        let mut packets = encoder.encode(frame(n)).unwrap();
        assert_eq!(packets.len(), 1);
        packets.remove(0)
    }

    /// Picture parameters of the `n`th recorded submission.
    fn picture_params(backend: &MockBackend, n: usize) -> super::params::PictureParameterBufferVp9 {
        let submissions = backend.submissions();
        submissions[n]
            .buffers
            .iter()
            .find_map(|buffer| match buffer {
                ParameterBuffer::Picture(pic) => Some(pic.clone()),
                _ => None,
            })
            .unwrap()
    }

    mod negotiation_tests {
        use super::*;

        #[test]
        fn test_new_pipeline_is_ready() {
            let (backend, encoder) = new_encoder();
            assert_eq!(encoder.state(), PipelineState::Ready);
            assert_eq!(encoder.profile(), Profile::Vp9Profile0);
            assert_eq!(encoder.entrypoint(), Entrypoint::SliceEncode);
            assert_eq!(encoder.width(), 320);
            assert_eq!(encoder.height(), 240);
            assert_eq!(backend.live_contexts(), 1);
            // Pools are preallocated at session creation.
            assert_eq!(backend.live_surfaces(), 7);
            assert_eq!(backend.live_coded_buffers(), 5);
        }

        #[test]
        fn test_backend_without_vp9_is_rejected() {
            let backend = Arc::new(MockBackend::without_encoders());
            let err = Vp9Encoder::new(backend.clone(), &test_config()).unwrap_err();
            assert!(matches!(err, VaForgeError::UnsupportedProfile(_)));
            assert_eq!(backend.live_contexts(), 0);
        }

        #[test]
        fn test_non_cqp_rate_control_is_rejected() {
            let backend = Arc::new(MockBackend::new());
            let config = test_config().with_rate_control(RateControlMode::Cbr);
            let err = Vp9Encoder::new(backend.clone(), &config).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidParameter(_)));
            assert_eq!(backend.live_contexts(), 0);
        }

        #[test]
        fn test_tune_option_is_rejected() {
            let backend = Arc::new(MockBackend::new());
            let config = test_config().with_tune(TuneOption::LowLatency);
            let err = Vp9Encoder::new(backend, &config).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidParameter(_)));
        }

        #[test]
        fn test_oversized_dimensions_are_rejected() {
            let backend = Arc::new(MockBackend::new());
            let config = EncoderConfig::vp9(8193, 240);
            let err = Vp9Encoder::new(backend, &config).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidInput(_)));
        }

        #[test]
        fn test_zero_pool_capacities_are_rejected() {
            let backend = Arc::new(MockBackend::new());

            let config = test_config().with_surface_pool_size(0);
            let err = Vp9Encoder::new(backend.clone(), &config).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidInput(_)));

            let config = test_config().with_coded_buffer_count(0);
            let err = Vp9Encoder::new(backend.clone(), &config).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidInput(_)));

            // Rejected at validation, before any backend object exists.
            assert_eq!(backend.live_contexts(), 0);
            assert_eq!(backend.live_surfaces(), 0);
        }

        #[test]
        fn test_failed_surface_allocation_destroys_context() {
            let backend = Arc::new(MockBackend::new());
            backend.fail_surface_creation_after(2);

            let err = Vp9Encoder::new(backend.clone(), &test_config()).unwrap_err();
            assert!(matches!(err, VaForgeError::AllocationFailed(_)));

            // Context and partially created surfaces are all rolled back.
            assert_eq!(backend.live_contexts(), 0);
            assert_eq!(backend.live_surfaces(), 0);
            assert_eq!(backend.live_coded_buffers(), 0);
        }

        #[test]
        fn test_drop_releases_backend_resources() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);
            encode_one(&mut encoder, 1);

            drop(encoder);
            assert_eq!(backend.live_contexts(), 0);
            assert_eq!(backend.live_surfaces(), 0);
            assert_eq!(backend.live_coded_buffers(), 0);
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_first_packet_is_intra_sync_point() {
            let (_backend, mut encoder) = new_encoder();
            let packet = encode_one(&mut encoder, 0);
            assert_eq!(packet.picture_type, PictureType::Intra);
            assert!(packet.sync_point);
            assert_eq!(packet.display_order, 0);
            assert!(!packet.data.is_empty());
        }

        #[test]
        fn test_keyframe_period_three_sequence() {
            let (_backend, mut encoder) = new_encoder();

            let packets: Vec<EncodedPacket> =
                (0..7).map(|n| encode_one(&mut encoder, n)).collect();

            let types: Vec<PictureType> = packets.iter().map(|p| p.picture_type).collect();
            assert_eq!(
                types,
                vec![
                    PictureType::Intra,
                    PictureType::Predicted,
                    PictureType::Predicted,
                    PictureType::Intra,
                    PictureType::Predicted,
                    PictureType::Predicted,
                    PictureType::Intra,
                ]
            );

            let sync: Vec<bool> = packets.iter().map(|p| p.sync_point).collect();
            assert_eq!(sync, vec![true, false, false, true, false, false, true]);
        }

        #[test]
        fn test_packets_carry_frame_timestamps() {
            let (_backend, mut encoder) = new_encoder();
            for n in 0..3 {
                let packet = encode_one(&mut encoder, n);
                assert_eq!(packet.pts, n * 33);
                assert_eq!(packet.dts, n * 33);
                assert_eq!(packet.display_order, n);
            }
        }

        #[test]
        fn test_sequence_parameters_attached_to_intra_only() {
            let (backend, mut encoder) = new_encoder();
            for n in 0..4 {
                encode_one(&mut encoder, n);
            }

            let submissions = backend.submissions();
            for (n, submission) in submissions.iter().enumerate() {
                let sequences = submission
                    .buffers
                    .iter()
                    .filter(|buffer| matches!(buffer, ParameterBuffer::Sequence(_)))
                    .count();
                let pictures = submission
                    .buffers
                    .iter()
                    .filter(|buffer| matches!(buffer, ParameterBuffer::Picture(_)))
                    .count();
                // Keyframe period 3: pictures 0 and 3 start a group.
                let expect_sequence = n % 3 == 0;
                assert_eq!(sequences, usize::from(expect_sequence), "submission {n}");
                assert_eq!(pictures, 1, "submission {n}");
            }

            let ParameterBuffer::Sequence(seq) = &submissions[0].buffers[0] else {
                panic!("first buffer of an intra submission must be the sequence");
            };
            assert_eq!(seq.max_frame_width, 8192);
            assert_eq!(seq.max_frame_height, 8192);
            assert_eq!(seq.kf_min_dist, 1);
            assert_eq!(seq.kf_max_dist, 3);
            assert_eq!(seq.intra_period, 3);
        }

        #[test]
        fn test_intra_references_nothing() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);

            let pic = picture_params(&backend, 0);
            assert_eq!(pic.pic_flags_frame_type, params::FRAME_TYPE_KEY);
            assert!(pic
                .reference_frames
                .iter()
                .all(|&id| id == INVALID_SURFACE_ID));
            assert_eq!(pic.refresh_frame_flags, 0);
        }

        #[test]
        fn test_predicted_mirrors_reference_table() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);
            encode_one(&mut encoder, 1);
            encode_one(&mut encoder, 2);

            let submissions = backend.submissions();
            let intra_target = submissions[0].target;
            let first_p_target = submissions[1].target;

            let first_p = picture_params(&backend, 1);
            assert_eq!(first_p.pic_flags_frame_type, params::FRAME_TYPE_INTER);
            assert!(first_p.reference_frames.iter().all(|&id| id == intra_target));
            assert_eq!(first_p.ref_flags_ref_frame_ctrl_l0, 0x7);
            assert_eq!(first_p.ref_flags_ref_last_idx, 0);
            assert_eq!(first_p.ref_flags_ref_gf_idx, 1);
            assert_eq!(first_p.ref_flags_ref_arf_idx, 2);
            assert_eq!(first_p.refresh_frame_flags, 0x01);

            // The second predicted picture sees the refreshed "last" slot.
            let second_p = picture_params(&backend, 2);
            assert_eq!(second_p.reference_frames[0], first_p_target);
            assert!(second_p.reference_frames[1..]
                .iter()
                .all(|&id| id == intra_target));
        }

        #[test]
        fn test_picture_dimensions_match_configuration() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);

            let pic = picture_params(&backend, 0);
            assert_eq!(pic.frame_width_src, 320);
            assert_eq!(pic.frame_height_src, 240);
            assert_eq!(pic.frame_width_dst, 320);
            assert_eq!(pic.frame_height_dst, 240);
            assert_eq!(pic.pic_flags_show_frame, 1);
        }

        #[test]
        fn test_flush_drains_nothing() {
            let (_backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);
            assert!(encoder.flush().unwrap().is_empty());
        }

        #[test]
        fn test_long_run_does_not_exhaust_pools() {
            let (_backend, mut encoder) = new_encoder();
            let bound = coded_buffer_size(320, 240);
            for n in 0..40 {
                let packet = encode_one(&mut encoder, n);
                assert!(packet.data.len() <= bound);
            }
        }
    }

    mod reference_tests {
        use super::*;

        #[test]
        fn test_intra_rebinds_every_slot_to_its_target() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);

            let intra_target = backend.submissions()[0].target;
            let ids = encoder.reference_slot_ids();
            assert_eq!(ids.len(), params::NUM_REF_FRAMES);
            assert!(ids.iter().all(|&id| id == intra_target));
        }

        #[test]
        fn test_predicted_refreshes_last_slot_only() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);
            encode_one(&mut encoder, 1);

            let submissions = backend.submissions();
            let ids = encoder.reference_slot_ids();
            assert_eq!(ids[0], submissions[1].target);
            assert!(ids[1..].iter().all(|&id| id == submissions[0].target));
        }

        #[test]
        fn test_replaced_reference_returns_to_pool() {
            let (_backend, mut encoder) = new_encoder();

            encode_one(&mut encoder, 0);
            assert_eq!(encoder.surfaces.free_count(), 6);

            encode_one(&mut encoder, 1);
            assert_eq!(encoder.surfaces.free_count(), 5);

            // Refreshing "last" releases the previous predicted surface, so
            // steady state holds two surfaces: the current "last" and the
            // group's intra reconstruction.
            encode_one(&mut encoder, 2);
            assert_eq!(encoder.surfaces.free_count(), 5);
        }

        #[test]
        fn test_exhausted_pool_leaves_frame_unconsumed() {
            let backend = Arc::new(MockBackend::new());
            let config = EncoderConfig::vp9(320, 240)
                .with_keyframe_period(30)
                .with_surface_pool_size(2);
            let mut encoder = Vp9Encoder::new(backend.clone(), &config).unwrap();

            encode_one(&mut encoder, 0);
            encode_one(&mut encoder, 1);
            let ids_before = encoder.reference_slot_ids();

            let err = encoder.encode(frame(2)).unwrap_err();
            assert!(matches!(err, VaForgeError::AllocationFailed(_)));

            // The frame was not consumed and the table is untouched.
            assert_eq!(encoder.reorder.emitted(), 2);
            assert_eq!(encoder.reference_slot_ids(), ids_before);
            assert_eq!(encoder.state(), PipelineState::Ready);
            assert_eq!(backend.submission_count(), 2);
        }

        #[test]
        fn test_failed_submission_releases_surface_and_keeps_table() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);
            let ids_before = encoder.reference_slot_ids();
            let free_before = encoder.surfaces.free_count();

            backend.fail_next_submit();
            let err = encoder.encode(frame(1)).unwrap_err();
            assert!(matches!(err, VaForgeError::BackendSubmissionFailed(_)));

            assert_eq!(encoder.reference_slot_ids(), ids_before);
            assert_eq!(encoder.surfaces.free_count(), free_before);
            assert_eq!(encoder.state(), PipelineState::Ready);

            // The session stays usable for the next picture.
            let packet = encode_one(&mut encoder, 2);
            assert_eq!(packet.picture_type, PictureType::Predicted);
        }

        #[test]
        fn test_failed_first_intra_recovers_with_keyframe_request() {
            let (backend, mut encoder) = new_encoder();

            backend.fail_next_submit();
            assert!(encoder.encode(frame(0)).is_err());
            assert!(encoder
                .reference_slot_ids()
                .iter()
                .all(|&id| id == INVALID_SURFACE_ID));

            encoder.request_keyframe();
            let packet = encode_one(&mut encoder, 1);
            assert_eq!(packet.picture_type, PictureType::Intra);
            assert!(packet.sync_point);
            assert!(encoder
                .reference_slot_ids()
                .iter()
                .all(|&id| id != INVALID_SURFACE_ID));
        }
    }

    mod reconfigure_tests {
        use super::*;

        #[test]
        fn test_reconfigure_restarts_session() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);
            encode_one(&mut encoder, 1);

            let config = EncoderConfig::vp9(640, 480).with_keyframe_period(5);
            encoder.reconfigure(&config).unwrap();

            assert_eq!(encoder.state(), PipelineState::Ready);
            assert_eq!(encoder.width(), 640);
            assert_eq!(encoder.keyframe_period(), 5);
            assert_eq!(backend.live_contexts(), 1);
            // Old pools are gone, only the new session's surfaces remain.
            assert_eq!(backend.live_surfaces(), 7);
            assert!(!encoder.refs.is_populated());

            // The schedule restarts: the next picture opens a new group.
            let packet = encode_one(&mut encoder, 0);
            assert_eq!(packet.picture_type, PictureType::Intra);
            assert!(packet.sync_point);
            assert_eq!(packet.display_order, 0);

            let pic = picture_params(&backend, 2);
            assert_eq!(pic.frame_width_src, 640);
            assert_eq!(pic.frame_height_src, 480);
        }

        #[test]
        fn test_invalid_knobs_keep_running_session() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);

            let bad = EncoderConfig::vp9(320, 240).with_rate_control(RateControlMode::Vbr);
            let err = encoder.reconfigure(&bad).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidParameter(_)));

            let bad = EncoderConfig::vp9(320, 240).with_coded_buffer_count(0);
            let err = encoder.reconfigure(&bad).unwrap_err();
            assert!(matches!(err, VaForgeError::InvalidInput(_)));

            // The running session is untouched.
            assert_eq!(backend.live_contexts(), 1);
            assert_eq!(encoder.state(), PipelineState::Ready);
            let packet = encode_one(&mut encoder, 1);
            assert_eq!(packet.picture_type, PictureType::Predicted);
        }

        #[test]
        fn test_failed_session_rebuild_destroys_new_context() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);

            backend.fail_coded_buffer_creation_after(1);
            let err = encoder
                .reconfigure(&EncoderConfig::vp9(640, 480))
                .unwrap_err();
            assert!(matches!(err, VaForgeError::AllocationFailed(_)));

            // Neither the torn-down session nor the half-built one leaves
            // a context behind.
            assert_eq!(backend.live_contexts(), 0);
            assert_eq!(encoder.state(), PipelineState::ProfileNegotiated);
            let err = encoder.encode(frame(1)).unwrap_err();
            assert!(matches!(err, VaForgeError::UnsupportedProfile(_)));

            // A later renegotiation recovers.
            encoder.reconfigure(&EncoderConfig::vp9(640, 480)).unwrap();
            assert_eq!(encoder.state(), PipelineState::Ready);
            assert_eq!(backend.live_contexts(), 1);
            let packet = encode_one(&mut encoder, 1);
            assert_eq!(packet.picture_type, PictureType::Intra);
        }

        #[test]
        fn test_lost_capability_blocks_until_renegotiated() {
            let (backend, mut encoder) = new_encoder();
            encode_one(&mut encoder, 0);

            backend.set_encoders(Vec::new());
            let err = encoder.reconfigure(&test_config()).unwrap_err();
            assert!(matches!(err, VaForgeError::UnsupportedProfile(_)));
            assert_eq!(encoder.state(), PipelineState::Idle);

            let err = encoder.encode(frame(1)).unwrap_err();
            assert!(matches!(err, VaForgeError::UnsupportedProfile(_)));

            backend.set_encoders(vec![(Profile::Vp9Profile0, Entrypoint::SliceEncode)]);
            encoder.reconfigure(&test_config()).unwrap();
            assert_eq!(encoder.state(), PipelineState::Ready);

            let packet = encode_one(&mut encoder, 2);
            assert_eq!(packet.picture_type, PictureType::Intra);
        }
    }

    mod tunable_tests {
        use super::*;

        #[test]
        fn test_codec_tunables_are_rejected() {
            let (_backend, mut encoder) = new_encoder();
            for tunable in [
                Vp9Tunable::YacQindex(40),
                Vp9Tunable::LoopFilterLevel(10),
                Vp9Tunable::SharpnessLevel(2),
            ] {
                let err = encoder.set_tunable(tunable).unwrap_err();
                assert!(matches!(err, VaForgeError::InvalidParameter(_)));
            }

            // Rejection leaves the session untouched.
            assert_eq!(encoder.state(), PipelineState::Ready);
            encode_one(&mut encoder, 0);
        }

        #[test]
        fn test_keyframe_period_applies_mid_stream() {
            let backend = Arc::new(MockBackend::new());
            let config = EncoderConfig::vp9(320, 240).with_keyframe_period(30);
            let mut encoder = Vp9Encoder::new(backend, &config).unwrap();

            encode_one(&mut encoder, 0); // I
            encode_one(&mut encoder, 1); // P

            encoder.set_keyframe_period(2);
            assert_eq!(encoder.keyframe_period(), 2);

            // Two frames into the group, the shorter period wraps now.
            let packet = encode_one(&mut encoder, 2);
            assert_eq!(packet.picture_type, PictureType::Intra);
            let packet = encode_one(&mut encoder, 3);
            assert_eq!(packet.picture_type, PictureType::Predicted);
            let packet = encode_one(&mut encoder, 4);
            assert_eq!(packet.picture_type, PictureType::Intra);
        }
    }
}
