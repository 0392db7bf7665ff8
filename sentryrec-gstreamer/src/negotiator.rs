//! The stream negotiator links the smart-record source's dynamically
//! discovered output into the aggregation stage.  The stream's real geometry
//! is only known once the first data has been decoded, so the aggregation
//! stage runs with a static default until the discovery event fires, at
//! which point the negotiator reconfigures it to match and links the new
//! output into its first sink slot.

use gstreamer::prelude::*;
use gstreamer::{Caps, Element, Pad};
use sentryrec_core::pipeline::{PipelineNotification, StreamGeometry};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Where the negotiator is in the one-time binding handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    /// No output has been discovered yet.
    Unbound,

    /// An output was discovered but has not been linked.  A failed
    /// configure or link attempt stays here; a later discovery event is
    /// handled independently.
    Negotiating,

    /// The output is linked into the aggregation stage.
    Bound,
}

pub struct StreamNegotiator {
    state: NegotiationState,
    aggregator: Element,
    queue: Element,
    default_geometry: StreamGeometry,
    notifications: UnboundedSender<PipelineNotification>,
}

impl StreamNegotiator {
    pub fn new(
        aggregator: Element,
        queue: Element,
        default_geometry: StreamGeometry,
        notifications: UnboundedSender<PipelineNotification>,
    ) -> StreamNegotiator {
        StreamNegotiator {
            state: NegotiationState::Unbound,
            aggregator,
            queue,
            default_geometry,
            notifications,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Handles one output-discovery event from the source.  Reconfigures the
    /// aggregation stage to the discovered geometry and links the new pad
    /// through the queue into the stage's sink slot.  Failures are logged
    /// and leave the negotiator ready for the next discovery event.
    pub fn handle_output_discovered(&mut self, source_pad: &Pad) {
        if self.state == NegotiationState::Bound {
            warn!(
                pad = %source_pad.name(),
                "Ignoring output discovered after the stream was already bound"
            );

            return;
        }

        self.state = NegotiationState::Negotiating;

        let caps = source_pad
            .current_caps()
            .unwrap_or_else(|| source_pad.query_caps(None));

        let geometry = geometry_from_caps(&caps, self.default_geometry);

        if let Err(e) = self.aggregator.try_set_property("width", geometry.width as u32) {
            error!("Failed to configure the aggregation stage width: {}", e);
            return;
        }

        if let Err(e) = self.aggregator.try_set_property("height", geometry.height as u32) {
            error!("Failed to configure the aggregation stage height: {}", e);
            return;
        }

        let aggregator_sink = match self.aggregator.request_pad_simple("sink_0") {
            Some(pad) => pad,
            None => {
                error!("The aggregation stage has no free sink_0 pad");
                return;
            }
        };

        let queue_sink = match self.queue.static_pad("sink") {
            Some(pad) => pad,
            None => {
                error!("The source queue has no sink pad");
                return;
            }
        };

        if let Err(e) = source_pad.link(&queue_sink) {
            error!("Failed to link the discovered output to the queue: {:?}", e);
            return;
        }

        let queue_src = match self.queue.static_pad("src") {
            Some(pad) => pad,
            None => {
                error!("The source queue has no src pad");
                return;
            }
        };

        if let Err(e) = queue_src.link(&aggregator_sink) {
            error!(
                "Failed to link the queue into the aggregation stage: {:?}",
                e
            );

            return;
        }

        self.state = NegotiationState::Bound;

        info!(
            width = geometry.width,
            height = geometry.height,
            "Discovered output linked into the aggregation stage"
        );

        let _ = self
            .notifications
            .send(PipelineNotification::StreamBound { geometry });
    }
}

fn geometry_from_caps(caps: &Caps, default: StreamGeometry) -> StreamGeometry {
    let structure = match caps.structure(0) {
        Some(structure) => structure,
        None => return default,
    };

    resolve_geometry(
        structure.get::<i32>("width").ok(),
        structure.get::<i32>("height").ok(),
        default,
    )
}

/// Resolves the discovered geometry fields against the configured default.
/// A field that is absent or unparsable falls back to the default on its
/// own; discovery never fails outright over missing caps.
pub fn resolve_geometry(
    width: Option<i32>,
    height: Option<i32>,
    default: StreamGeometry,
) -> StreamGeometry {
    StreamGeometry {
        width: width.unwrap_or(default.width),
        height: height.unwrap_or(default.height),
    }
}
