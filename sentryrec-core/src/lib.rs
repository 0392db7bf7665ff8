//! Core components for running one triggered smart-recording session against
//! a live media stream.  The heavy lifting of stream acquisition, caching,
//! and artifact writing happens inside an external media pipeline; this crate
//! owns the session lifecycle around it: the native context buffers handed
//! across the pipeline boundary, the trigger timing, the watchdog fallback,
//! and the completion reporting.

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod actor_utils;
pub mod config;
pub mod native_context;
pub mod pipeline;
pub mod reporter;
pub mod session;
pub mod test_utils;
