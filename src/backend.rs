//! Hardware acceleration backend interface.
//!
//! The pipeline never touches driver state directly: capability probing,
//! context/surface/buffer creation, and picture submission all go through
//! the [`Backend`] trait. Real deployments implement it over their
//! acceleration API; [`MockBackend`] is a deterministic in-memory
//! implementation used by the tests and demos.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::encoder::vp9::params::{PictureParameterBufferVp9, SequenceParameterBufferVp9};
use crate::error::{Result, VaForgeError};

/// Backend-assigned picture surface handle.
pub type SurfaceId = u32;

/// Backend-assigned coded buffer handle.
pub type BufferId = u32;

/// Backend-assigned encode context handle.
pub type ContextId = u32;

/// Sentinel marking a reference slot as "no reference" (all bits set).
pub const INVALID_SURFACE_ID: SurfaceId = 0xFFFF_FFFF;

/// Codec profile probed against the backend during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// VP9 profile 0: 8-bit 4:2:0.
    Vp9Profile0,
    /// VP9 profile 1: 8-bit 4:2:2/4:4:4.
    Vp9Profile1,
    /// VP9 profile 2: 10/12-bit 4:2:0.
    Vp9Profile2,
    /// VP9 profile 3: 10/12-bit 4:2:2/4:4:4.
    Vp9Profile3,
}

/// Backend operation class paired with a profile during capability probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    /// Slice-level encode.
    SliceEncode,
    /// Low-power slice-level encode.
    SliceEncodeLp,
}

/// Rate-control mode requested for an encode context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateControlMode {
    /// Constant quantizer, no bitrate targeting.
    #[default]
    Cqp,
    /// Constant bitrate.
    Cbr,
    /// Variable bitrate.
    Vbr,
}

/// Packed-header production flags for [`ContextInfo::packed_headers`].
pub mod packed_headers {
    /// No headers are produced CPU-side.
    pub const NONE: u32 = 0;
    /// Sequence-level headers.
    pub const SEQUENCE: u32 = 1 << 0;
    /// Picture-level headers.
    pub const PICTURE: u32 = 1 << 1;
    /// Slice-level headers.
    pub const SLICE: u32 = 1 << 2;
}

/// Everything the backend needs to create an encode context.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub profile: Profile,
    pub entrypoint: Entrypoint,
    pub width: u32,
    pub height: u32,
    /// Reference surfaces the context must track concurrently.
    pub ref_frames: u32,
    pub rate_control: RateControlMode,
    /// Bitmask of [`packed_headers`] flags.
    pub packed_headers: u32,
}

/// One element of the ordered parameter list submitted with a picture.
#[derive(Debug, Clone)]
pub enum ParameterBuffer {
    /// Sequence-level parameters. Attached to the first picture of a group.
    Sequence(SequenceParameterBufferVp9),
    /// Picture-level parameters. Attached to every picture.
    Picture(PictureParameterBufferVp9),
    /// Pre-encoded bitstream passed through untouched.
    Raw(Vec<u8>),
}

/// A single-picture encode submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub context: ContextId,
    /// Surface receiving the reconstructed picture.
    pub target: SurfaceId,
    /// Coded buffer receiving the compressed bitstream.
    pub coded_buffer: BufferId,
    /// Parameter buffers in submission order.
    pub buffers: Vec<ParameterBuffer>,
}

/// Interface to the hardware acceleration backend.
///
/// Calls are synchronous: `submit` returns once the hardware has consumed
/// the request and the coded buffer is readable. Implementations must be
/// shareable across the pools and the pipeline, so all methods take `&self`.
pub trait Backend: Send + Sync {
    /// Returns whether `profile` can be encoded through `entrypoint`.
    fn has_encoder(&self, profile: Profile, entrypoint: Entrypoint) -> bool;

    /// Creates an encode context sized for `info`.
    fn create_context(&self, info: &ContextInfo) -> Result<ContextId>;

    /// Destroys a context created by [`Backend::create_context`].
    fn destroy_context(&self, context: ContextId);

    /// Allocates a picture surface.
    fn create_surface(&self, width: u32, height: u32) -> Result<SurfaceId>;

    /// Releases a surface back to the driver.
    fn destroy_surface(&self, surface: SurfaceId);

    /// Allocates a coded buffer holding at least `size` bytes.
    fn create_coded_buffer(&self, size: usize) -> Result<BufferId>;

    /// Releases a coded buffer back to the driver.
    fn destroy_coded_buffer(&self, buffer: BufferId);

    /// Submits one picture for encoding against `request.context`.
    fn submit(&self, request: &SubmitRequest) -> Result<()>;

    /// Reads the compressed bytes out of a coded buffer after a successful
    /// submission.
    fn map_coded_buffer(&self, buffer: BufferId) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// Deterministic in-memory backend for tests and demos.
///
/// Ids are assigned sequentially from 1. Every submission is recorded and
/// can be inspected afterwards. Submissions fill the bound coded buffer
/// with a synthetic payload sized off the picture type, so callers see
/// keyframes come out larger than inter frames.
pub struct MockBackend {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    encoders: Vec<(Profile, Entrypoint)>,
    next_id: u32,
    contexts: Vec<ContextId>,
    surfaces: HashMap<SurfaceId, (u32, u32)>,
    coded_buffers: HashMap<BufferId, usize>,
    payloads: HashMap<BufferId, Vec<u8>>,
    submissions: Vec<SubmitRequest>,
    fail_next_submit: bool,
    fail_surface_creation: Option<u32>,
    fail_coded_buffer_creation: Option<u32>,
}

impl MockBackend {
    /// Mock advertising VP9 profile 0 at the slice-encode entry point.
    pub fn new() -> Self {
        Self::with_encoders(vec![(Profile::Vp9Profile0, Entrypoint::SliceEncode)])
    }

    /// Mock advertising exactly the given (profile, entry point) pairs.
    pub fn with_encoders(encoders: Vec<(Profile, Entrypoint)>) -> Self {
        Self {
            state: Mutex::new(MockState {
                encoders,
                next_id: 1,
                ..MockState::default()
            }),
        }
    }

    /// Mock with no encode support at all.
    pub fn without_encoders() -> Self {
        Self::with_encoders(Vec::new())
    }

    /// Arms the mock so the next `submit` call fails once.
    pub fn fail_next_submit(&self) {
        self.lock().fail_next_submit = true;
    }

    /// Arms the mock so surface creation fails once, after `successes` more
    /// surfaces have been created.
    pub fn fail_surface_creation_after(&self, successes: u32) {
        self.lock().fail_surface_creation = Some(successes);
    }

    /// Arms the mock so coded-buffer creation fails once, after `successes`
    /// more buffers have been created.
    pub fn fail_coded_buffer_creation_after(&self, successes: u32) {
        self.lock().fail_coded_buffer_creation = Some(successes);
    }

    /// Replaces the advertised (profile, entry point) pairs. Lets tests
    /// drive renegotiation against changing hardware capabilities.
    pub fn set_encoders(&self, encoders: Vec<(Profile, Entrypoint)>) {
        self.lock().encoders = encoders;
    }

    /// All submissions recorded so far, in order.
    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.lock().submissions.clone()
    }

    /// Number of submissions recorded so far.
    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    /// Surfaces currently created and not destroyed.
    pub fn live_surfaces(&self) -> usize {
        self.lock().surfaces.len()
    }

    /// Coded buffers currently created and not destroyed.
    pub fn live_coded_buffers(&self) -> usize {
        self.lock().coded_buffers.len()
    }

    /// Contexts currently created and not destroyed.
    pub fn live_contexts(&self) -> usize {
        self.lock().contexts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    fn has_encoder(&self, profile: Profile, entrypoint: Entrypoint) -> bool {
        self.lock().encoders.contains(&(profile, entrypoint))
    }

    fn create_context(&self, info: &ContextInfo) -> Result<ContextId> {
        let mut state = self.lock();
        if !state.encoders.contains(&(info.profile, info.entrypoint)) {
            return Err(VaForgeError::UnsupportedProfile(format!(
                "{:?} via {:?}",
                info.profile, info.entrypoint
            )));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.contexts.push(id);
        debug!(
            "Mock context {id} created: {:?} {}x{} refs={} rc={:?}",
            info.profile, info.width, info.height, info.ref_frames, info.rate_control
        );
        Ok(id)
    }

    fn destroy_context(&self, context: ContextId) {
        self.lock().contexts.retain(|&id| id != context);
    }

    fn create_surface(&self, width: u32, height: u32) -> Result<SurfaceId> {
        let mut state = self.lock();
        match state.fail_surface_creation {
            Some(0) => {
                state.fail_surface_creation = None;
                return Err(VaForgeError::AllocationFailed(
                    "mock armed to fail surface creation".into(),
                ));
            }
            Some(remaining) => state.fail_surface_creation = Some(remaining - 1),
            None => {}
        }
        let id = state.next_id;
        state.next_id += 1;
        state.surfaces.insert(id, (width, height));
        debug!("Mock surface {id} created ({width}x{height})");
        Ok(id)
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        self.lock().surfaces.remove(&surface);
    }

    fn create_coded_buffer(&self, size: usize) -> Result<BufferId> {
        let mut state = self.lock();
        match state.fail_coded_buffer_creation {
            Some(0) => {
                state.fail_coded_buffer_creation = None;
                return Err(VaForgeError::AllocationFailed(
                    "mock armed to fail coded buffer creation".into(),
                ));
            }
            Some(remaining) => state.fail_coded_buffer_creation = Some(remaining - 1),
            None => {}
        }
        let id = state.next_id;
        state.next_id += 1;
        state.coded_buffers.insert(id, size);
        debug!("Mock coded buffer {id} created ({size} bytes)");
        Ok(id)
    }

    fn destroy_coded_buffer(&self, buffer: BufferId) {
        let mut state = self.lock();
        state.coded_buffers.remove(&buffer);
        state.payloads.remove(&buffer);
    }

    fn submit(&self, request: &SubmitRequest) -> Result<()> {
        let mut state = self.lock();
        if state.fail_next_submit {
            state.fail_next_submit = false;
            return Err(VaForgeError::BackendSubmissionFailed(
                "mock armed to fail".into(),
            ));
        }
        if !state.contexts.contains(&request.context) {
            return Err(VaForgeError::InvalidParameter(format!(
                "unknown context {}",
                request.context
            )));
        }
        if !state.surfaces.contains_key(&request.target) {
            return Err(VaForgeError::InvalidParameter(format!(
                "unknown target surface {}",
                request.target
            )));
        }
        let Some(&size) = state.coded_buffers.get(&request.coded_buffer) else {
            return Err(VaForgeError::InvalidParameter(format!(
                "unknown coded buffer {}",
                request.coded_buffer
            )));
        };

        // Inter frames compress harder than keyframes.
        let is_key = request.buffers.iter().any(|buf| {
            matches!(buf, ParameterBuffer::Picture(pic) if pic.pic_flags_frame_type == 0)
        });
        let len = if is_key { size / 8 } else { size / 32 }.max(4);
        let fill = (request.coded_buffer & 0xFF) as u8;
        state.payloads.insert(request.coded_buffer, vec![fill; len]);
        state.submissions.push(request.clone());
        debug!(
            "Mock submission {}: target={} coded_buf={} ({} param buffers)",
            state.submissions.len(),
            request.target,
            request.coded_buffer,
            request.buffers.len()
        );
        Ok(())
    }

    fn map_coded_buffer(&self, buffer: BufferId) -> Result<Vec<u8>> {
        let state = self.lock();
        match state.payloads.get(&buffer) {
            Some(bytes) => Ok(bytes.clone()),
            None => Err(VaForgeError::InvalidParameter(format!(
                "coded buffer {buffer} has no mapped data"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_info() -> ContextInfo {
        ContextInfo {
            profile: Profile::Vp9Profile0,
            entrypoint: Entrypoint::SliceEncode,
            width: 320,
            height: 240,
            ref_frames: 3,
            rate_control: RateControlMode::Cqp,
            packed_headers: packed_headers::NONE,
        }
    }

    #[test]
    fn test_has_encoder_matches_advertised_pairs() {
        let backend = MockBackend::new();
        assert!(backend.has_encoder(Profile::Vp9Profile0, Entrypoint::SliceEncode));
        assert!(!backend.has_encoder(Profile::Vp9Profile0, Entrypoint::SliceEncodeLp));
        assert!(!backend.has_encoder(Profile::Vp9Profile2, Entrypoint::SliceEncode));

        let empty = MockBackend::without_encoders();
        assert!(!empty.has_encoder(Profile::Vp9Profile0, Entrypoint::SliceEncode));
    }

    #[test]
    fn test_ids_are_sequential_and_tracked() {
        let backend = MockBackend::new();
        let ctx = backend.create_context(&context_info()).unwrap();
        let s0 = backend.create_surface(320, 240).unwrap();
        let s1 = backend.create_surface(320, 240).unwrap();
        let buf = backend.create_coded_buffer(1024).unwrap();

        assert_eq!(s1, s0 + 1);
        assert_eq!(buf, s1 + 1);
        assert_eq!(backend.live_contexts(), 1);
        assert_eq!(backend.live_surfaces(), 2);
        assert_eq!(backend.live_coded_buffers(), 1);

        backend.destroy_surface(s0);
        backend.destroy_coded_buffer(buf);
        backend.destroy_context(ctx);
        assert_eq!(backend.live_surfaces(), 1);
        assert_eq!(backend.live_coded_buffers(), 0);
        assert_eq!(backend.live_contexts(), 0);
    }

    #[test]
    fn test_context_creation_requires_support() {
        let backend = MockBackend::without_encoders();
        let err = backend.create_context(&context_info()).unwrap_err();
        assert!(matches!(err, VaForgeError::UnsupportedProfile(_)));
    }

    #[test]
    fn test_submit_records_and_fills_coded_buffer() {
        let backend = MockBackend::new();
        let ctx = backend.create_context(&context_info()).unwrap();
        let target = backend.create_surface(320, 240).unwrap();
        let coded = backend.create_coded_buffer(4096).unwrap();

        let request = SubmitRequest {
            context: ctx,
            target,
            coded_buffer: coded,
            buffers: vec![ParameterBuffer::Picture(
                PictureParameterBufferVp9::default(),
            )],
        };
        backend.submit(&request).unwrap();

        assert_eq!(backend.submission_count(), 1);
        let bytes = backend.map_coded_buffer(coded).unwrap();
        assert!(!bytes.is_empty());
        assert!(bytes.len() <= 4096);
    }

    #[test]
    fn test_keyframe_payload_larger_than_inter() {
        let backend = MockBackend::new();
        let ctx = backend.create_context(&context_info()).unwrap();
        let target = backend.create_surface(320, 240).unwrap();
        let key_buf = backend.create_coded_buffer(4096).unwrap();
        let inter_buf = backend.create_coded_buffer(4096).unwrap();

        let key_pic = PictureParameterBufferVp9::default();
        let inter_pic = PictureParameterBufferVp9 {
            pic_flags_frame_type: 1,
            ..PictureParameterBufferVp9::default()
        };

        backend
            .submit(&SubmitRequest {
                context: ctx,
                target,
                coded_buffer: key_buf,
                buffers: vec![ParameterBuffer::Picture(key_pic)],
            })
            .unwrap();
        backend
            .submit(&SubmitRequest {
                context: ctx,
                target,
                coded_buffer: inter_buf,
                buffers: vec![ParameterBuffer::Picture(inter_pic)],
            })
            .unwrap();

        let key_bytes = backend.map_coded_buffer(key_buf).unwrap();
        let inter_bytes = backend.map_coded_buffer(inter_buf).unwrap();
        assert!(key_bytes.len() > inter_bytes.len());
    }

    #[test]
    fn test_fail_next_submit_is_single_shot() {
        let backend = MockBackend::new();
        let ctx = backend.create_context(&context_info()).unwrap();
        let target = backend.create_surface(320, 240).unwrap();
        let coded = backend.create_coded_buffer(4096).unwrap();
        let request = SubmitRequest {
            context: ctx,
            target,
            coded_buffer: coded,
            buffers: Vec::new(),
        };

        backend.fail_next_submit();
        let err = backend.submit(&request).unwrap_err();
        assert!(matches!(err, VaForgeError::BackendSubmissionFailed(_)));
        assert_eq!(backend.submission_count(), 0);

        backend.submit(&request).unwrap();
        assert_eq!(backend.submission_count(), 1);
    }

    #[test]
    fn test_armed_creation_failure_counts_down_once() {
        let backend = MockBackend::new();
        backend.fail_surface_creation_after(1);

        backend.create_surface(320, 240).unwrap();
        let err = backend.create_surface(320, 240).unwrap_err();
        assert!(matches!(err, VaForgeError::AllocationFailed(_)));

        // Disarmed after firing.
        backend.create_surface(320, 240).unwrap();
        assert_eq!(backend.live_surfaces(), 2);
    }

    #[test]
    fn test_map_unfilled_buffer_fails() {
        let backend = MockBackend::new();
        let coded = backend.create_coded_buffer(4096).unwrap();
        let err = backend.map_coded_buffer(coded).unwrap_err();
        assert!(matches!(err, VaForgeError::InvalidParameter(_)));
    }
}
