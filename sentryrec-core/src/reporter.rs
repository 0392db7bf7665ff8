//! Renders the completion payload into a human readable session summary.
//! Decode failures upstream leave fields empty, so every field falls back to
//! placeholder text here instead of failing the report.

use crate::pipeline::RecordingCompleteInfo;
use tracing::info;

const UNKNOWN: &str = "<unknown>";

/// Formats the completion summary.  Split out from the log emission so the
/// exact output can be asserted on.
pub fn summarize(info: &RecordingCompleteInfo) -> String {
    let dir = info.dir_path.as_deref().unwrap_or(UNKNOWN);
    let file = info.file_name.as_deref().unwrap_or(UNKNOWN);
    let width = info
        .width
        .map(|value| value.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let height = info
        .height
        .map(|value| value.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    match &info.context {
        Some(context) => format!(
            "Recording complete: dir={} file={} size={}x{} session_id={} session_name='{}'",
            dir, file, width, height, context.session_id, context.name
        ),

        None => format!(
            "Recording complete: dir={} file={} size={}x{} (no session context echoed)",
            dir, file, width, height
        ),
    }
}

/// Emits the completion summary.  Does not mutate any session state.
pub fn report(info: &RecordingCompleteInfo) {
    info!("{}", summarize(info));
}
