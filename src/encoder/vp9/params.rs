//! VP9 parameter buffer layouts and builders.
//!
//! The structs mirror the acceleration API's wire layout: `#[repr(C)]`,
//! field order fixed, bit-field unions flattened into individually named
//! fields. A zeroed struct (`Default`) is a valid starting point; the fill
//! functions only write the fields the exemplified encoder drives.

use crate::backend::{BufferId, SurfaceId, INVALID_SURFACE_ID};
use crate::encoder::PictureType;

/// Slots in the wire-format reference list.
pub const NUM_REF_FRAMES: usize = 8;

/// References a predicted picture reads concurrently (last, golden, altref).
pub const REFS_PER_FRAME: u32 = 3;

/// Slot index used for "last"-frame prediction.
pub const LAST_FRAME_SLOT: u8 = 0;

/// Slot index used for "golden"-frame prediction.
pub const GOLDEN_FRAME_SLOT: u8 = 1;

/// Slot index used for "altref"-frame prediction.
pub const ALTREF_FRAME_SLOT: u8 = 2;

/// Forward prediction reads all three named slots.
pub const REF_FRAME_CTRL_ALL: u8 = 0x7;

/// Predicted pictures refresh the "last" slot only.
pub const REFRESH_LAST_ONLY: u8 = 0x01;

/// `pic_flags_frame_type` value for keyframes.
pub const FRAME_TYPE_KEY: u8 = 0;

/// `pic_flags_frame_type` value for inter frames.
pub const FRAME_TYPE_INTER: u8 = 1;

/// Sequence-level upper bound on frame dimensions. Fixed above any real
/// stream so later resolution changes need no sequence restart.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// Fixed luma AC quantizer index under constant-quantizer rate control.
pub const DEFAULT_LUMA_AC_QINDEX: u8 = 60;
/// Fixed luma DC quantizer delta.
pub const DEFAULT_LUMA_DC_QINDEX_DELTA: i8 = 1;
/// Fixed chroma AC quantizer delta.
pub const DEFAULT_CHROMA_AC_QINDEX_DELTA: i8 = 1;
/// Fixed chroma DC quantizer delta.
pub const DEFAULT_CHROMA_DC_QINDEX_DELTA: i8 = 1;
/// Fixed in-loop filter level.
pub const DEFAULT_FILTER_LEVEL: u8 = 0;
/// Fixed in-loop filter sharpness.
pub const DEFAULT_SHARPNESS_LEVEL: u8 = 0;

/// Sequence-level parameter buffer for a VP9 encode session.
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct SequenceParameterBufferVp9 {
    /// Maximum frame width the session may reach.
    pub max_frame_width: u32,
    /// Maximum frame height the session may reach.
    pub max_frame_height: u32,
    /// Automatic keyframe placement. Unused, the schedule is explicit.
    pub kf_auto: u32,
    /// Minimum distance between keyframes.
    pub kf_min_dist: u32,
    /// Maximum distance between keyframes.
    pub kf_max_dist: u32,
    /// Target bitrate in bits per second. Zero under constant-quantizer.
    pub bits_per_second: u32,
    /// Intra refresh interval in frames.
    pub intra_period: u32,
}

/// Picture-level parameter buffer for one VP9 submission.
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct PictureParameterBufferVp9 {
    /// Source frame width in pixels.
    pub frame_width_src: u32,
    /// Source frame height in pixels.
    pub frame_height_src: u32,
    /// Reconstruction width. Equal to the source width here.
    pub frame_width_dst: u32,
    /// Reconstruction height. Equal to the source height here.
    pub frame_height_dst: u32,
    /// Surface receiving the reconstructed picture.
    pub reconstructed_frame: SurfaceId,
    /// Reference surface per slot; [`INVALID_SURFACE_ID`] marks an unused
    /// slot.
    pub reference_frames: [SurfaceId; NUM_REF_FRAMES],
    /// Coded buffer receiving the compressed bitstream.
    pub coded_buf: BufferId,

    // pic_flags bit-field union, flattened.
    /// [`FRAME_TYPE_KEY`] or [`FRAME_TYPE_INTER`].
    pub pic_flags_frame_type: u8,
    /// Whether the frame is output for display.
    pub pic_flags_show_frame: u8,
    /// Error-resilient coding mode.
    pub pic_flags_error_resilient_mode: u8,
    /// Intra-only non-keyframe.
    pub pic_flags_intra_only: u8,
    /// Eighth-pel motion vectors.
    pub pic_flags_allow_high_precision_mv: u8,
    /// Motion compensation interpolation filter.
    pub pic_flags_mcomp_filter_type: u8,
    /// Frame-parallel decoding hint.
    pub pic_flags_frame_parallel_decoding_mode: u8,
    /// Frame context reset policy.
    pub pic_flags_reset_frame_context: u8,
    /// Whether entropy counts update the frame context.
    pub pic_flags_refresh_frame_context: u8,
    /// Frame context slot in use.
    pub pic_flags_frame_context_idx: u8,
    /// Segmentation map in use.
    pub pic_flags_segmentation_enabled: u8,
    /// Segmentation map updated from the previous frame.
    pub pic_flags_segmentation_temporal_update: u8,
    /// Segmentation map transmitted this frame.
    pub pic_flags_segmentation_update_map: u8,
    /// Lossless coding mode.
    pub pic_flags_lossless_mode: u8,
    /// Compound prediction mode.
    pub pic_flags_comp_prediction_mode: u8,
    /// Driver-managed segmentation.
    pub pic_flags_auto_segmentation: u8,
    /// Superframe syntax in use.
    pub pic_flags_super_frame: u8,

    // ref_flags bit-field union, flattened.
    /// Force-keyframe request bit.
    pub ref_flags_force_kf: u8,
    /// Bitmask of slots participating in forward prediction.
    pub ref_flags_ref_frame_ctrl_l0: u8,
    /// Bitmask of slots participating in backward prediction. Unused in
    /// strictly causal streams.
    pub ref_flags_ref_frame_ctrl_l1: u8,
    /// Slot index for "last"-frame prediction.
    pub ref_flags_ref_last_idx: u8,
    /// Sign bias for "last" prediction.
    pub ref_flags_ref_last_sign_bias: u8,
    /// Slot index for "golden"-frame prediction.
    pub ref_flags_ref_gf_idx: u8,
    /// Sign bias for "golden" prediction.
    pub ref_flags_ref_gf_sign_bias: u8,
    /// Slot index for "altref"-frame prediction.
    pub ref_flags_ref_arf_idx: u8,
    /// Sign bias for "altref" prediction.
    pub ref_flags_ref_arf_sign_bias: u8,
    /// Temporal layer id.
    pub ref_flags_temporal_id: u8,

    /// Bitmask of slots rebound to this frame's reconstruction.
    pub refresh_frame_flags: u8,
    /// Luma AC quantizer index.
    pub luma_ac_qindex: u8,
    /// Luma DC quantizer delta.
    pub luma_dc_qindex_delta: i8,
    /// Chroma AC quantizer delta.
    pub chroma_ac_qindex_delta: i8,
    /// Chroma DC quantizer delta.
    pub chroma_dc_qindex_delta: i8,
    /// In-loop filter level.
    pub filter_level: u8,
    /// In-loop filter sharpness.
    pub sharpness_level: u8,
    /// Per-reference loop filter deltas.
    pub ref_lf_delta: [i8; 4],
    /// Per-mode loop filter deltas.
    pub mode_lf_delta: [i8; 2],
    /// Coded bit depth minus eight.
    pub bit_depth: u8,
}

/// Builds the sequence parameters attached to the first picture of a
/// keyframe group.
pub fn fill_sequence_parameters(keyframe_period: u32) -> SequenceParameterBufferVp9 {
    SequenceParameterBufferVp9 {
        max_frame_width: MAX_FRAME_DIMENSION,
        max_frame_height: MAX_FRAME_DIMENSION,
        kf_auto: 0,
        kf_min_dist: 1,
        kf_max_dist: keyframe_period,
        bits_per_second: 0,
        intra_period: keyframe_period,
    }
}

/// Builds the picture parameters for one submission.
///
/// Intra pictures carry the "no reference" sentinel in every slot and
/// leave the refresh mask empty; the table rebind happens wholesale after
/// submission instead. Predicted pictures mirror `reference_ids`
/// slot-for-slot, read all three named slots, and refresh "last" only.
pub fn fill_picture_parameters(
    width: u32,
    height: u32,
    picture_type: PictureType,
    target: SurfaceId,
    coded_buf: BufferId,
    reference_ids: &[SurfaceId],
) -> PictureParameterBufferVp9 {
    let mut pic = PictureParameterBufferVp9 {
        frame_width_src: width,
        frame_height_src: height,
        frame_width_dst: width,
        frame_height_dst: height,
        reconstructed_frame: target,
        coded_buf,
        pic_flags_show_frame: 1,
        luma_ac_qindex: DEFAULT_LUMA_AC_QINDEX,
        luma_dc_qindex_delta: DEFAULT_LUMA_DC_QINDEX_DELTA,
        chroma_ac_qindex_delta: DEFAULT_CHROMA_AC_QINDEX_DELTA,
        chroma_dc_qindex_delta: DEFAULT_CHROMA_DC_QINDEX_DELTA,
        filter_level: DEFAULT_FILTER_LEVEL,
        sharpness_level: DEFAULT_SHARPNESS_LEVEL,
        ..PictureParameterBufferVp9::default()
    };

    let mut reference_frames = [INVALID_SURFACE_ID; NUM_REF_FRAMES];
    if picture_type != PictureType::Intra {
        for (slot, id) in reference_frames.iter_mut().zip(reference_ids) {
            *slot = *id;
        }
        pic.pic_flags_frame_type = FRAME_TYPE_INTER;
        pic.ref_flags_ref_frame_ctrl_l0 = REF_FRAME_CTRL_ALL;
        pic.ref_flags_ref_last_idx = LAST_FRAME_SLOT;
        pic.ref_flags_ref_gf_idx = GOLDEN_FRAME_SLOT;
        pic.ref_flags_ref_arf_idx = ALTREF_FRAME_SLOT;
        pic.refresh_frame_flags = REFRESH_LAST_ONLY;
    }
    pic.reference_frames = reference_frames;

    pic
}
