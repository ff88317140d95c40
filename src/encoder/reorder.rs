//! Picture reordering and emission.
//!
//! Turns accepted input frames into pipeline pictures in coding order.
//! Codecs with bidirectional prediction buffer frames here and emit them
//! out of arrival order; the exemplified codec predicts strictly forward,
//! so every frame becomes a picture immediately and coding order equals
//! display order.

use tracing::debug;

use super::gop::KeyframeSchedule;
use super::{PictureType, VideoFrame};
use crate::backend::ParameterBuffer;
use crate::error::{Result, VaForgeError};

/// One logical frame moving through the pipeline.
///
/// Created by the reorder stage, annotated with parameter buffers by the
/// codec pipeline, consumed by backend submission.
#[derive(Debug)]
pub struct Picture {
    /// Assigned coding type.
    pub picture_type: PictureType,
    /// Whether this picture starts a new independently decodable group.
    pub sync_point: bool,
    /// Index of the picture in display order.
    pub display_order: u64,
    /// Presentation timestamp, inherited from the input frame.
    pub pts: u64,
    /// Decode timestamp, inherited from the input frame.
    pub dts: u64,
    /// Attached parameter buffers in submission order.
    pub param_buffers: Vec<ParameterBuffer>,
}

/// Reordering and type-decision stage.
///
/// Owns the keyframe schedule. `next_picture(None)` is the drain path and
/// yields [`VaForgeError::NoFrameAvailable`], which is the expected
/// steady-state signal during flush rather than a fault.
pub struct PictureReorder {
    schedule: KeyframeSchedule,
}

impl PictureReorder {
    /// Creates the stage with an intra picture every `keyframe_period`
    /// frames.
    pub fn new(keyframe_period: u32) -> Self {
        Self {
            schedule: KeyframeSchedule::new(keyframe_period),
        }
    }

    /// Accepts the next input frame and emits the picture to encode.
    ///
    /// The schedule advances only when a picture is actually emitted, so a
    /// caller that failed to secure resources beforehand can retry the same
    /// frame and get the same decision.
    pub fn next_picture(&mut self, frame: Option<VideoFrame>) -> Result<Picture> {
        let Some(frame) = frame else {
            return Err(VaForgeError::NoFrameAvailable);
        };

        let decision = self.schedule.next_decision();
        debug!(
            "Picture {}: {:?}{}",
            decision.display_order,
            decision.picture_type,
            if decision.sync_point { " [sync]" } else { "" }
        );

        Ok(Picture {
            picture_type: decision.picture_type,
            sync_point: decision.sync_point,
            display_order: decision.display_order,
            pts: frame.pts,
            dts: frame.dts,
            param_buffers: Vec::new(),
        })
    }

    /// Requests that the next emitted picture be a keyframe.
    pub fn request_keyframe(&mut self) {
        self.schedule.request_keyframe();
    }

    /// Changes the keyframe period for subsequent pictures.
    pub fn set_keyframe_period(&mut self, keyframe_period: u32) {
        self.schedule.set_period(keyframe_period);
    }

    /// Pictures emitted so far.
    pub fn emitted(&self) -> u64 {
        self.schedule.total_frames()
    }

    /// Resets the stage for a reconfigured session.
    pub fn reset(&mut self) {
        self.schedule.reset();
    }
}
