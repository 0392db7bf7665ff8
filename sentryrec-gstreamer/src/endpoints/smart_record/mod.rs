//! Endpoint actor that owns the running pipeline and carries its trigger
//! surface.  Requests arrive over an unbounded channel and are translated
//! into signal emissions on the source element; bus messages are watched on
//! a separate task and fed back into the actor, which converts errors and
//! end-of-stream into pipeline notifications for the orchestrator.

use crate::pipeline::SmartRecordPipeline;
use futures::StreamExt;
use gstreamer::bus::BusStream;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer::{MessageView, State};
use sentryrec_core::actor_utils::notify_on_unbounded_recv;
use sentryrec_core::pipeline::{PipelineNotification, PipelineRequest};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, instrument, warn};

/// Error starting the smart record endpoint.
#[derive(Error, Debug)]
pub enum SmartRecordStartError {
    #[error("The pipeline has no message bus")]
    NoBus,

    #[error("The pipeline refused to start playing: {0}")]
    PlayFailed(String),
}

/// Starts the pipeline and the endpoint actor, returning the channel the
/// orchestrator issues its triggers on.
pub fn start_smart_record_endpoint(
    pipeline: SmartRecordPipeline,
    notifications: UnboundedSender<PipelineNotification>,
) -> Result<UnboundedSender<PipelineRequest>, SmartRecordStartError> {
    let bus = pipeline.pipeline.bus().ok_or(SmartRecordStartError::NoBus)?;

    pipeline
        .pipeline
        .set_state(State::Playing)
        .map_err(|e| SmartRecordStartError::PlayFailed(e.to_string()))?;

    let (sender, receiver) = unbounded_channel();
    let (actor_sender, actor_receiver) = unbounded_channel();

    notify_on_unbounded_recv(
        receiver,
        actor_sender.clone(),
        FutureResult::RequestReceived,
        || FutureResult::AllRequestersGone,
    );

    notify_bus_message(bus.stream(), actor_sender);

    let actor = Actor {
        pipeline,
        notifications,
    };

    tokio::spawn(actor.run(actor_receiver));

    Ok(sender)
}

enum FutureResult {
    AllRequestersGone,
    RequestReceived(PipelineRequest),
    BusClosed,
    EosReceived,
    ErrorReceived(BusError),
}

struct BusError {
    source_name: String,
    description: String,
    debug_info: Option<String>,
}

struct Actor {
    pipeline: SmartRecordPipeline,
    notifications: UnboundedSender<PipelineNotification>,
}

impl Actor {
    #[instrument(name = "Smart Record Endpoint", skip_all)]
    async fn run(self, mut actor_receiver: UnboundedReceiver<FutureResult>) {
        info!("Smart record endpoint started");

        while let Some(result) = actor_receiver.recv().await {
            match result {
                FutureResult::AllRequestersGone => {
                    info!("All requesters gone");
                    break;
                }

                FutureResult::BusClosed => {
                    info!("Pipeline bus closed");
                    break;
                }

                FutureResult::EosReceived => {
                    let _ = self.notifications.send(PipelineNotification::EndOfStream);
                }

                FutureResult::ErrorReceived(error) => {
                    let _ = self
                        .notifications
                        .send(PipelineNotification::PipelineError {
                            source_name: error.source_name,
                            description: error.description,
                            debug_info: error.debug_info,
                        });
                }

                FutureResult::RequestReceived(request) => {
                    if self.handle_request(request) {
                        break;
                    }
                }
            }
        }

        let _ = self.pipeline.pipeline.set_state(State::Null);

        info!("Smart record endpoint stopped");
    }

    fn handle_request(&self, request: PipelineRequest) -> bool {
        match request {
            PipelineRequest::StartRecording {
                session_slot,
                context,
                pre_roll_seconds,
                post_roll_seconds,
            } => {
                info!(
                    pre_roll_seconds,
                    post_roll_seconds, "Issuing the start trigger to the source"
                );

                let session_slot: glib::Pointer = session_slot.as_raw();
                let context: glib::Pointer = context.as_raw();
                self.pipeline.source.emit_by_name::<()>(
                    "start-sr",
                    &[
                        &session_slot,
                        &pre_roll_seconds,
                        &post_roll_seconds,
                        &context,
                    ],
                );

                false
            }

            PipelineRequest::StopRecording { reason } => {
                info!(reason, "Issuing the stop trigger to the source");
                self.pipeline.source.emit_by_name::<()>("stop-sr", &[&reason]);

                false
            }

            PipelineRequest::StopFlow => {
                info!("Stopping the media flow");
                if let Err(e) = self.pipeline.pipeline.set_state(State::Null) {
                    warn!("Failed to stop the pipeline: {}", e);
                }

                true
            }
        }
    }
}

fn notify_bus_message(mut bus: BusStream, actor_sender: UnboundedSender<FutureResult>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = bus.next() => {
                    match message {
                        Some(message) => match message.view() {
                            MessageView::Eos(..) => {
                                let _ = actor_sender.send(FutureResult::EosReceived);
                            }

                            MessageView::Error(error) => {
                                let result = FutureResult::ErrorReceived(BusError {
                                    source_name: error
                                        .src()
                                        .map(|s| s.path_string().to_string())
                                        .unwrap_or_else(|| "<none>".to_string()),

                                    description: error.error().to_string(),
                                    debug_info: error.debug(),
                                });

                                let _ = actor_sender.send(result);
                            }

                            _ => (),
                        },

                        None => {
                            let _ = actor_sender.send(FutureResult::BusClosed);
                            break;
                        }
                    }
                }

                _ = actor_sender.closed() => {
                    break;
                }
            }
        }
    });
}
