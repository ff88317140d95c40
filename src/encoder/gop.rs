//! Keyframe schedule and picture type decision.
//!
//! Tracks the position within the current keyframe group and assigns each
//! accepted frame a coding type. The exemplified codec runs a strictly
//! causal I/P schedule: one intra picture every keyframe period, predicted
//! pictures in between.

use super::PictureType;

/// Outcome of the type decision for one accepted frame.
#[derive(Debug, Clone, Copy)]
pub struct TypeDecision {
    /// Assigned coding type.
    pub picture_type: PictureType,
    /// Whether this frame starts a new independently decodable group.
    pub sync_point: bool,
    /// Position within the current keyframe group (0 for the keyframe).
    pub group_position: u32,
    /// Overall index of the frame in the stream.
    pub display_order: u64,
}

/// Keyframe schedule manager.
///
/// Holds the frames-since-keyframe counter and hands out one
/// [`TypeDecision`] per accepted frame. Codec-agnostic: pipelines that
/// support bidirectional prediction would layer their reordering on top of
/// this schedule.
pub struct KeyframeSchedule {
    /// Frames between consecutive intra pictures.
    keyframe_period: u32,
    /// Frames accepted since the last intra picture.
    frame_num: u32,
    /// Total frames accepted since creation or reset.
    total_frames: u64,
    /// Flag to force the next frame to be a keyframe.
    force_keyframe: bool,
}

impl KeyframeSchedule {
    /// Creates a schedule emitting an intra picture every `keyframe_period`
    /// frames. A period of 0 is clamped to 1 (all-intra).
    pub fn new(keyframe_period: u32) -> Self {
        Self {
            keyframe_period: keyframe_period.max(1),
            frame_num: 0,
            total_frames: 0,
            force_keyframe: false,
        }
    }

    /// Decides the coding type of the next accepted frame.
    pub fn next_decision(&mut self) -> TypeDecision {
        if self.force_keyframe || self.frame_num >= self.keyframe_period {
            self.frame_num = 0;
        }
        self.force_keyframe = false;

        let (picture_type, sync_point) = if self.frame_num == 0 {
            (PictureType::Intra, true)
        } else {
            (PictureType::Predicted, false)
        };

        let decision = TypeDecision {
            picture_type,
            sync_point,
            group_position: self.frame_num,
            display_order: self.total_frames,
        };

        self.frame_num += 1;
        self.total_frames += 1;
        decision
    }

    /// Changes the keyframe period. Takes effect at the next period wrap,
    /// without restarting the current group.
    pub fn set_period(&mut self, keyframe_period: u32) {
        self.keyframe_period = keyframe_period.max(1);
    }

    /// Frames accepted since the last intra picture.
    pub fn current_frame_num(&self) -> u32 {
        self.frame_num
    }

    /// Total frames accepted.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Resets the schedule so the next frame starts a new group.
    pub fn reset(&mut self) {
        self.frame_num = 0;
        self.total_frames = 0;
        self.force_keyframe = false;
    }

    /// Requests that the next frame be a keyframe. The periodic schedule
    /// restarts from it.
    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }
}
