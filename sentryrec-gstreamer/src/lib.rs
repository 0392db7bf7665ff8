//! Everything sentryrec needs to talk to gstreamer: building the
//! smart-record pipeline, negotiating the dynamically discovered stream into
//! the aggregation stage, decoding completion payloads, and the endpoint
//! actor that carries the trigger surface.

#[macro_use]
extern crate lazy_static;

pub mod completion;
pub mod endpoints;
pub mod negotiator;
pub mod pipeline;

use gstreamer::glib;
use gstreamer::DebugLevel;
use tracing::{error, info, warn};

lazy_static! {
    /// Result of initializing gstreamer.  The first read performs the
    /// initialization and reroutes gstreamer's debug output through the
    /// normal `tracing` handlers at the WARN threshold, so pipeline problems
    /// land in the same logs as everything else.  Always read this value
    /// instead of calling `gstreamer::init()` directly.
    pub static ref GSTREAMER_INIT_RESULT: Result<(), glib::Error> = {
        if let Err(error) = gstreamer::init() {
            error!("Failed to initialize gstreamer: {:?}", error);
            return Err(error);
        }

        gstreamer::debug_remove_default_log_function();

        gstreamer::debug_add_log_function(|category, level, file, function, _line, object, message| {
            let message = message.get().map(|m| m.to_string()).unwrap_or_else(|| "".to_string());
            let object_name = object.map(|o| o.to_string()).unwrap_or_else(|| "<NO OBJECT>".to_string());

            match &level {
                DebugLevel::Error => error!(
                    category = %category.name(),
                    file = %file,
                    function = %function,
                    object = %object_name,
                    "Gstreamer error ({}): {}", category.name(), message
                ),

                DebugLevel::Warning => warn!(
                    category = %category.name(),
                    file = %file,
                    function = %function,
                    object = %object_name,
                    "Gstreamer warning ({}): {}", category.name(), message
                ),

                _ => info!(
                    category = %category.name(),
                    file = %file,
                    function = %function,
                    object = %object_name,
                    "Gstreamer {} ({}): {}", level.name(), category.name(), message
                ),
            }
        });

        gstreamer::debug_set_default_threshold(DebugLevel::Warning);

        info!("Gstreamer successfully initialized");

        Ok(())
    };
}
