//! The contract between the session orchestrator and the external media
//! pipeline.  The pipeline itself lives behind a channel pair: requests flow
//! in as fire-and-forget signals, and everything the pipeline has to say
//! comes back later as a notification on the same loop that drives the
//! orchestrator's timers.

use crate::native_context::{NativePointer, SessionContext};

/// Geometry of a negotiated video stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: i32,
    pub height: i32,
}

/// Requests the orchestrator can issue to the media pipeline.
#[derive(Debug)]
pub enum PipelineRequest {
    /// Begin extracting a recording window around the current instant.  The
    /// pipeline keeps reading both buffers until the recording completes, so
    /// the buffers must stay live until the completion (or fallback)
    /// notification has fired.
    StartRecording {
        /// Buffer the pipeline fills with its own identifier for the new
        /// recording.
        session_slot: NativePointer,

        /// The caller-owned context record stored alongside the recording
        /// and echoed back on completion.
        context: NativePointer,

        /// Seconds of already-cached stream data to include before the
        /// trigger instant.
        pre_roll_seconds: u32,

        /// Seconds of stream data to capture after the trigger instant.
        post_roll_seconds: u32,
    },

    /// Finalize the in-flight recording.
    StopRecording {
        /// Reason code forwarded to the pipeline's stop trigger.
        reason: u32,
    },

    /// Halt the media flow entirely.  Used by every terminal path.
    StopFlow,
}

/// Notifications raised asynchronously by the media pipeline.
#[derive(Debug)]
pub enum PipelineNotification {
    /// The live stream's output was discovered and linked into the
    /// aggregation stage with the given geometry.
    StreamBound { geometry: StreamGeometry },

    /// The pipeline raised an asynchronous error.
    PipelineError {
        source_name: String,
        description: String,
        debug_info: Option<String>,
    },

    /// The stream reached its end.
    EndOfStream,

    /// The recording artifact was finalized.
    RecordingComplete(RecordingCompleteInfo),
}

/// The completion payload, decoded into owned data at the native boundary.
/// Every field is best-effort: a decode failure leaves `None` rather than
/// failing the session.
#[derive(Clone, Debug)]
pub struct RecordingCompleteInfo {
    /// Directory the artifact was written into.
    pub dir_path: Option<String>,

    /// File name of the finished artifact.
    pub file_name: Option<String>,

    /// Width of the recorded video.
    pub width: Option<u32>,

    /// Height of the recorded video.
    pub height: Option<u32>,

    /// The session context echoed back from the start trigger.
    pub context: Option<SessionContext>,
}
