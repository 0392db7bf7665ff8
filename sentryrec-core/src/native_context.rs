//! The native context arena owns the fixed-layout byte buffers that get
//! handed to the media pipeline as opaque handles when a recording starts.
//! The pipeline holds those addresses until the completion notification
//! fires, so the arena is the sole owner of the allocations: nothing is
//! freed until the session's terminal cleanup runs, and every buffer is
//! freed exactly once there, no matter which terminal path ran.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Width of the fixed name field inside the session context record.
pub const SESSION_NAME_LEN: usize = 32;

/// Byte size of the session context record: a 4-byte identifier followed by
/// the fixed name field.
pub const SESSION_CONTEXT_SIZE: usize = 4 + SESSION_NAME_LEN;

/// Byte size of the identifier slot the pipeline fills in when a recording
/// starts.
pub const SESSION_SLOT_SIZE: usize = 4;

/// Opaque handle to one buffer owned by the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextHandle(usize);

/// The raw address of an arena buffer, in a form that can cross thread and
/// channel boundaries on its way to the pipeline.  Only the arena creates
/// these, and only the pipeline glue should turn one back into a pointer.
#[derive(Clone, Copy, Debug)]
pub struct NativePointer(usize);

impl NativePointer {
    pub fn as_raw(&self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

/// Decoded contents of a session context record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: i32,
    pub name: String,
}

#[derive(Error, Debug)]
pub enum NativeContextError {
    #[error("A zero sized native buffer was requested")]
    ZeroSizedAllocation,

    #[error("Native buffer {0:?} is not allocated")]
    UnknownHandle(ContextHandle),

    #[error("Native buffer {handle:?} holds {actual} bytes but {required} bytes are required")]
    BufferTooSmall {
        handle: ContextHandle,
        required: usize,
        actual: usize,
    },
}

/// Allocation counters shared out of the arena so tests (and diagnostics)
/// can verify that every buffer allocated during a run was released.
#[derive(Debug, Default)]
pub struct ArenaStats {
    allocations: AtomicUsize,
    releases: AtomicUsize,
}

impl ArenaStats {
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_balanced(&self) -> bool {
        self.allocation_count() == self.release_count()
    }
}

/// Owner of the native buffers shared with the pipeline.  Buffers are
/// zero-initialized on allocation and their addresses stay stable for the
/// whole time the handle is live, so a pointer handed out before the start
/// trigger remains valid until the handle is released.
pub struct NativeContextArena {
    buffers: Vec<Option<Box<[u8]>>>,
    stats: Arc<ArenaStats>,
}

impl NativeContextArena {
    pub fn new() -> Self {
        NativeContextArena {
            buffers: Vec::new(),
            stats: Arc::new(ArenaStats::default()),
        }
    }

    /// Returns the shared allocation counters for this arena.
    pub fn stats(&self) -> Arc<ArenaStats> {
        self.stats.clone()
    }

    /// Allocates a zero-initialized buffer of the given size and returns the
    /// handle that owns it.
    pub fn allocate(&mut self, size: usize) -> Result<ContextHandle, NativeContextError> {
        if size == 0 {
            return Err(NativeContextError::ZeroSizedAllocation);
        }

        let buffer = vec![0u8; size].into_boxed_slice();
        self.buffers.push(Some(buffer));
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);

        Ok(ContextHandle(self.buffers.len() - 1))
    }

    /// Frees the buffer behind the handle.  Releasing a handle twice is
    /// logged and swallowed, since release runs during terminal cleanup and
    /// must never fail the shutdown path.
    pub fn release(&mut self, handle: ContextHandle) {
        match self.buffers.get_mut(handle.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.stats.releases.fetch_add(1, Ordering::SeqCst);
            }

            _ => warn!("Native buffer {:?} was already released", handle),
        }
    }

    /// Releases every live buffer.  All terminal paths converge on this.
    pub fn release_all(&mut self) {
        for index in 0..self.buffers.len() {
            if self.buffers[index].is_some() {
                self.release(ContextHandle(index));
            }
        }
    }

    /// Returns the stable raw address of the buffer for signal emission.
    pub fn native_ptr(&self, handle: ContextHandle) -> Result<NativePointer, NativeContextError> {
        let buffer = self.buffer(handle)?;

        Ok(NativePointer(buffer.as_ptr() as usize))
    }

    /// Writes the fixed session context layout into the buffer: the
    /// identifier followed by the name, zero padded to the fixed field width
    /// and truncated if oversized.
    pub fn write_session_context(
        &mut self,
        handle: ContextHandle,
        session_id: i32,
        name: &str,
    ) -> Result<(), NativeContextError> {
        let buffer = self.buffer_mut(handle)?;
        if buffer.len() < SESSION_CONTEXT_SIZE {
            let actual = buffer.len();
            return Err(NativeContextError::BufferTooSmall {
                handle,
                required: SESSION_CONTEXT_SIZE,
                actual,
            });
        }

        buffer[..4].copy_from_slice(&session_id.to_ne_bytes());

        let name_field = &mut buffer[4..SESSION_CONTEXT_SIZE];
        name_field.fill(0);
        let name_bytes = name.as_bytes();
        let length = name_bytes.len().min(SESSION_NAME_LEN);
        name_field[..length].copy_from_slice(&name_bytes[..length]);

        Ok(())
    }

    /// Reads the session context layout back out of the buffer.
    pub fn read_session_context(
        &self,
        handle: ContextHandle,
    ) -> Result<SessionContext, NativeContextError> {
        let buffer = self.buffer(handle)?;
        if buffer.len() < SESSION_CONTEXT_SIZE {
            return Err(NativeContextError::BufferTooSmall {
                handle,
                required: SESSION_CONTEXT_SIZE,
                actual: buffer.len(),
            });
        }

        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&buffer[..4]);

        let name_field = &buffer[4..SESSION_CONTEXT_SIZE];
        let end = name_field
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(SESSION_NAME_LEN);

        Ok(SessionContext {
            session_id: i32::from_ne_bytes(id_bytes),
            name: String::from_utf8_lossy(&name_field[..end]).into_owned(),
        })
    }

    /// Reads the identifier slot the pipeline filled in on start.
    pub fn read_session_slot(&self, handle: ContextHandle) -> Result<i32, NativeContextError> {
        let buffer = self.buffer(handle)?;
        if buffer.len() < SESSION_SLOT_SIZE {
            return Err(NativeContextError::BufferTooSmall {
                handle,
                required: SESSION_SLOT_SIZE,
                actual: buffer.len(),
            });
        }

        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buffer[..4]);

        Ok(i32::from_ne_bytes(bytes))
    }

    fn buffer(&self, handle: ContextHandle) -> Result<&[u8], NativeContextError> {
        match self.buffers.get(handle.0) {
            Some(Some(buffer)) => Ok(buffer),
            _ => Err(NativeContextError::UnknownHandle(handle)),
        }
    }

    fn buffer_mut(&mut self, handle: ContextHandle) -> Result<&mut [u8], NativeContextError> {
        match self.buffers.get_mut(handle.0) {
            Some(Some(buffer)) => Ok(buffer),
            _ => Err(NativeContextError::UnknownHandle(handle)),
        }
    }
}

impl Default for NativeContextArena {
    fn default() -> Self {
        Self::new()
    }
}
