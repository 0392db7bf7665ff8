//! Best-effort decoding of the smart-record completion payload.  The source
//! element hands back a native recording-info record plus the user context
//! pointer that was attached to the start trigger; both are decoded into
//! owned data here, on the signal thread, so nothing unsafe crosses into the
//! orchestrator.  Any field that cannot be read degrades to `None` — a
//! malformed payload must never take the session down.

use sentryrec_core::native_context::{SessionContext, SESSION_NAME_LEN};
use sentryrec_core::pipeline::RecordingCompleteInfo;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

/// Native layout of the recording-info record attached to the completion
/// signal.  Field order and widths match the record emitted by the
/// smart-record source.
#[repr(C)]
#[allow(dead_code)]
struct RawRecordingInfo {
    ctx: *mut c_void,
    session_id: u32,
    file_name: *const c_char,
    dir_path: *const c_char,
    duration_ms: u64,
    container_type: u32,
    width: u32,
    height: u32,
}

/// Native layout of the caller-supplied user context record: the session
/// identifier followed by the fixed-width name field.
#[repr(C)]
struct RawSessionContext {
    session_id: i32,
    name: [u8; SESSION_NAME_LEN],
}

/// Decodes the completion payload into an owned record.
///
/// # Safety
///
/// `info`, when non-null, must point to a live recording-info record for the
/// duration of the call, and `context`, when non-null, must point to the
/// context buffer that was handed to the start trigger and is still owned by
/// the arena.
pub unsafe fn decode_completion(
    info: *const c_void,
    context: *const c_void,
) -> RecordingCompleteInfo {
    let mut decoded = RecordingCompleteInfo {
        dir_path: None,
        file_name: None,
        width: None,
        height: None,
        context: None,
    };

    if !info.is_null() {
        let info = &*(info as *const RawRecordingInfo);
        decoded.file_name = text_from_c_string(info.file_name);
        decoded.dir_path = text_from_c_string(info.dir_path);
        decoded.width = Some(info.width);
        decoded.height = Some(info.height);
    }

    if !context.is_null() {
        let context = &*(context as *const RawSessionContext);
        decoded.context = Some(SessionContext {
            session_id: context.session_id,
            name: text_from_fixed(&context.name),
        });
    }

    decoded
}

unsafe fn text_from_c_string(value: *const c_char) -> Option<String> {
    if value.is_null() {
        return None;
    }

    Some(CStr::from_ptr(value).to_string_lossy().into_owned())
}

/// Reads a zero-padded fixed-width text field, stopping at the first NUL.
pub fn text_from_fixed(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());

    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_text_stops_at_the_first_nul() {
        let mut field = [0u8; SESSION_NAME_LEN];
        field[..7].copy_from_slice(b"sr-demo");

        assert_eq!(text_from_fixed(&field), "sr-demo", "Unexpected text");
    }

    #[test]
    fn unterminated_fixed_text_uses_the_whole_field() {
        let field = [b'x'; SESSION_NAME_LEN];

        assert_eq!(
            text_from_fixed(&field).len(),
            SESSION_NAME_LEN,
            "Unexpected text length"
        );
    }

    #[test]
    fn null_payloads_decode_to_empty_fields() {
        let decoded = unsafe { decode_completion(std::ptr::null(), std::ptr::null()) };

        assert_eq!(decoded.dir_path, None, "Expected no directory");
        assert_eq!(decoded.file_name, None, "Expected no file name");
        assert_eq!(decoded.width, None, "Expected no width");
        assert_eq!(decoded.context, None, "Expected no context");
    }

    #[test]
    fn echoed_context_decodes_to_the_written_values() {
        let raw = RawSessionContext {
            session_id: 1234,
            name: {
                let mut name = [0u8; SESSION_NAME_LEN];
                name[..7].copy_from_slice(b"sr-demo");
                name
            },
        };

        let decoded = unsafe {
            decode_completion(
                std::ptr::null(),
                &raw as *const RawSessionContext as *const c_void,
            )
        };

        let context = decoded.context.expect("Expected a decoded context");
        assert_eq!(context.session_id, 1234, "Unexpected session id");
        assert_eq!(context.name, "sr-demo", "Unexpected session name");
    }
}
