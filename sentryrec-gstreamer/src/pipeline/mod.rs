//! Assembles the smart-record pipeline.  The source bin owns stream
//! acquisition, decoding, and the look-back cache; the rest of the chain is
//! an aggregation mux feeding a convert/sink tail that keeps data flowing.
//! The source's dynamically discovered output is linked in later by the
//! stream negotiator, and its completion signal is decoded here and
//! forwarded as a notification.

use crate::completion::decode_completion;
use crate::negotiator::StreamNegotiator;
use anyhow::{Context, Result};
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer::{Element, ElementFactory, Pipeline};
use sentryrec_core::config::RecordingConfig;
use sentryrec_core::pipeline::PipelineNotification;
use std::ffi::c_void;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

/// The assembled pipeline plus the source element carrying the smart-record
/// trigger surface.
pub struct SmartRecordPipeline {
    pub pipeline: Pipeline,
    pub source: Element,
}

/// Builds the pipeline from the validated configuration and wires its
/// asynchronous surfaces: `pad-added` drives the stream negotiator and
/// `sr-done` is decoded into a completion notification.  The recording
/// directory is created (with parents) before the pipeline can start.
pub fn build_smart_record_pipeline(
    config: &RecordingConfig,
    notifications: UnboundedSender<PipelineNotification>,
) -> Result<SmartRecordPipeline> {
    std::fs::create_dir_all(&config.record_dir).with_context(|| {
        format!(
            "Failed to create the recording directory '{}'",
            config.record_dir
        )
    })?;

    let pipeline = Pipeline::new(Some("smart-record"));

    let source = create_element("nvurisrcbin")?;
    let queue = create_element("queue")?;
    let aggregator = create_element("nvstreammux")?;
    let convert = create_element("nvvideoconvert")?;
    let sink = create_element("fakesink")?;

    source.set_property("uri", &config.source_uri);
    source.set_property("file-loop", true);
    source.set_property_from_str("smart-record", "2");
    source.set_property("smart-rec-dir-path", &config.record_dir);
    source.set_property("smart-rec-cache", config.cache_seconds);

    if let Some(prefix) = &config.file_prefix {
        // Older source elements do not expose the prefix property.
        if let Err(e) = source.try_set_property("smart-rec-file-prefix", prefix) {
            warn!("Recording file prefix was not applied: {}", e);
        }
    }

    aggregator.set_property("batch-size", 1u32);
    aggregator.set_property("live-source", false);
    aggregator.set_property("width", config.default_geometry.width as u32);
    aggregator.set_property("height", config.default_geometry.height as u32);
    aggregator.set_property("batched-push-timeout", config.batch_timeout_us);

    pipeline
        .add_many(&[&source, &queue, &aggregator, &convert, &sink])
        .with_context(|| "Failed to add elements to the pipeline")?;

    Element::link_many(&[&aggregator, &convert, &sink])
        .with_context(|| "Failed to link the aggregation stage to the sink chain")?;

    let negotiator = Mutex::new(StreamNegotiator::new(
        aggregator,
        queue,
        config.default_geometry,
        notifications.clone(),
    ));

    source.connect_pad_added(move |_source, pad| match negotiator.lock() {
        Ok(mut negotiator) => negotiator.handle_output_discovered(pad),
        Err(_) => error!("Stream negotiator state was poisoned"),
    });

    source.connect("sr-done", false, move |values| {
        let info = values
            .get(1)
            .and_then(|value| value.get::<glib::Pointer>().ok())
            .unwrap_or(std::ptr::null_mut());

        let context = values
            .get(2)
            .and_then(|value| value.get::<glib::Pointer>().ok())
            .unwrap_or(std::ptr::null_mut());

        let decoded = unsafe { decode_completion(info as *const c_void, context as *const c_void) };
        let _ = notifications.send(PipelineNotification::RecordingComplete(decoded));

        None
    });

    Ok(SmartRecordPipeline { pipeline, source })
}

/// Creates an un-named gstreamer element, with a consumable error when the
/// element factory is not available.
fn create_element(name: &str) -> Result<Element> {
    ElementFactory::make(name, None).with_context(|| format!("Failed to create element '{}'", name))
}
