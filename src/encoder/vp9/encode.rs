//! Per-picture encode flow.

use tracing::{debug, warn};

use super::{params, Vp9Encoder};
use crate::backend::{ContextId, ParameterBuffer, SubmitRequest};
use crate::buffer::CodedBufferProxy;
use crate::encoder::reorder::Picture;
use crate::encoder::{EncodedPacket, PictureType, PipelineState, VideoFrame};
use crate::error::{Result, VaForgeError};
use crate::surface::SurfaceProxy;

impl Vp9Encoder {
    /// Encodes one input frame and returns the resulting packets.
    ///
    /// This pipeline is strictly causal, so every call emits exactly one
    /// packet; the `Vec` return leaves room for codecs whose reordering
    /// emits zero or more pictures per input frame.
    pub fn encode(&mut self, frame: VideoFrame) -> Result<Vec<EncodedPacket>> {
        let span = self.span.clone();
        let _guard = span.enter();

        let context = match (self.state, self.context) {
            (PipelineState::Ready, Some(context)) => context,
            _ => {
                return Err(VaForgeError::UnsupportedProfile(
                    "no encode session negotiated".into(),
                ))
            }
        };

        self.state = PipelineState::Encoding;
        let result = self.encode_picture(context, frame);
        self.state = PipelineState::Ready;
        result.map(|packet| vec![packet])
    }

    fn encode_picture(&mut self, context: ContextId, frame: VideoFrame) -> Result<EncodedPacket> {
        // Secure resources before consuming a schedule position, so an
        // exhausted pool leaves the input frame retryable.
        let target = self.surfaces.acquire()?;
        let coded = self.coded_buffers.acquire()?;

        let mut picture = self.reorder.next_picture(Some(frame))?;
        if picture.picture_type == PictureType::Bidirectional {
            return Err(VaForgeError::InvalidParameter(
                "bidirectional pictures are not supported".into(),
            ));
        }

        self.ensure_sequence(&mut picture);
        self.ensure_picture(&mut picture, &target, &coded);

        let request = SubmitRequest {
            context,
            target: target.id(),
            coded_buffer: coded.id(),
            buffers: std::mem::take(&mut picture.param_buffers),
        };
        if let Err(err) = self.backend.submit(&request) {
            // The surface and coded buffer return to their pools on drop;
            // the reference table is untouched.
            warn!("Submission for picture {} failed: {err}", picture.display_order);
            return Err(err);
        }

        self.update_references(&picture, target);

        let data = coded.map()?;
        debug!(
            "Encoded picture {}: {:?}, {} bytes{}",
            picture.display_order,
            picture.picture_type,
            data.len(),
            if picture.sync_point { " [sync]" } else { "" }
        );

        Ok(EncodedPacket {
            data,
            picture_type: picture.picture_type,
            sync_point: picture.sync_point,
            pts: picture.pts,
            dts: picture.dts,
            display_order: picture.display_order,
        })
    }

    /// Attaches sequence parameters to pictures that open a keyframe group.
    fn ensure_sequence(&self, picture: &mut Picture) {
        if picture.picture_type != PictureType::Intra {
            return;
        }
        let sequence = params::fill_sequence_parameters(self.keyframe_period);
        picture
            .param_buffers
            .push(ParameterBuffer::Sequence(sequence));
    }

    /// Attaches the picture parameters for this submission.
    fn ensure_picture(&self, picture: &mut Picture, target: &SurfaceProxy, coded: &CodedBufferProxy) {
        let pic = params::fill_picture_parameters(
            self.width,
            self.height,
            picture.picture_type,
            target.id(),
            coded.id(),
            &self.refs.slot_ids(),
        );
        picture.param_buffers.push(ParameterBuffer::Picture(pic));
    }

    /// Folds a successful reconstruction into the reference table.
    ///
    /// Intra pictures rebind every slot; predicted pictures refresh the
    /// "last" slot only, matching the refresh mask written into their
    /// picture parameters.
    fn update_references(&mut self, picture: &Picture, reconstruction: SurfaceProxy) {
        if picture.picture_type == PictureType::Intra {
            self.refs.rebind_all(reconstruction);
        } else {
            self.refs
                .refresh(u32::from(params::REFRESH_LAST_ONLY), reconstruction);
        }
    }

    /// Drains buffered pictures at end of stream.
    ///
    /// The pipeline predicts strictly forward and buffers nothing, so the
    /// drain is always empty.
    pub fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }
}
