//! The session orchestrator drives one triggered recording from start to
//! finish.  A start timer arms the native context buffers and issues the
//! start trigger, a stop timer issues the stop trigger and arms a watchdog,
//! and the pipeline's notifications decide which of the three terminal paths
//! runs: normal completion, asynchronous abort (pipeline error or end of
//! stream), or watchdog expiry when the completion notification never
//! arrives.  All three paths converge on the same cleanup, which runs at
//! most once: stop the media flow, release every native buffer, resolve the
//! session outcome.
//!
//! The actor multiplexes its timers and the pipeline's notifications through
//! a single `FuturesUnordered`, so no two handlers ever run concurrently and
//! every handler sees a consistent session state.

#[cfg(test)]
mod tests;

use crate::config::RecordingConfig;
use crate::native_context::{
    NativeContextArena, NativeContextError, NativePointer, SESSION_CONTEXT_SIZE, SESSION_SLOT_SIZE,
};
use crate::pipeline::{PipelineNotification, PipelineRequest};
use crate::reporter;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::cmp::min;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// How a session run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The pipeline reported the recording artifact as finalized.
    Completed,

    /// A pipeline error or end of stream took the session down before the
    /// recording could complete.
    Aborted,

    /// The completion notification never arrived and the watchdog forced
    /// termination.
    TimedOut,
}

/// Everything the orchestrator needs to run a session.
pub struct SessionOrchestratorParams {
    pub config: RecordingConfig,
    pub arena: NativeContextArena,
    pub pipeline: UnboundedSender<PipelineRequest>,
    pub notifications: UnboundedReceiver<PipelineNotification>,
}

/// Starts the orchestrator actor.  The returned channel resolves exactly
/// once with the session outcome, after terminal cleanup has run.
pub fn start_session_orchestrator(
    params: SessionOrchestratorParams,
) -> oneshot::Receiver<SessionOutcome> {
    let (sender, receiver) = oneshot::channel();
    let actor = Actor::new(params, sender);

    tokio::spawn(actor.run());

    receiver
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Idle,
    Armed,
    Capturing,
    StoppingOrCompleted,
    Terminated,
}

enum FutureResult {
    StartTriggerDue,
    StopTriggerDue,
    WatchdogExpired,
    ExitDelayElapsed,
    NotificationReceived(
        PipelineNotification,
        UnboundedReceiver<PipelineNotification>,
    ),
    NotificationChannelClosed,
}

struct Actor {
    config: RecordingConfig,
    arena: NativeContextArena,
    pipeline: UnboundedSender<PipelineRequest>,
    state: SessionState,
    completion_seen: bool,
    outcome: Option<oneshot::Sender<SessionOutcome>>,
    futures: FuturesUnordered<BoxFuture<'static, FutureResult>>,
}

impl Actor {
    fn new(
        params: SessionOrchestratorParams,
        outcome: oneshot::Sender<SessionOutcome>,
    ) -> Actor {
        let futures = FuturesUnordered::new();
        futures.push(wait_for_notification(params.notifications).boxed());

        Actor {
            config: params.config,
            arena: params.arena,
            pipeline: params.pipeline,
            state: SessionState::Idle,
            completion_seen: false,
            outcome: Some(outcome),
            futures,
        }
    }

    #[instrument(
        name = "Session Orchestrator",
        skip(self),
        fields(source_uri = %self.config.source_uri),
    )]
    async fn run(mut self) {
        info!("Session orchestrator started");

        // Both trigger timers run from the same origin: the stop trigger is
        // due at start_delay + post_roll + 1 seconds from now.
        let start_delay = Duration::from_secs(self.config.start_delay_seconds as u64);
        let stop_delay = start_delay
            + Duration::from_secs(self.config.post_roll_seconds as u64)
            + Duration::from_secs(1);

        self.futures
            .push(wait_for_timer(start_delay, FutureResult::StartTriggerDue).boxed());
        self.futures
            .push(wait_for_timer(stop_delay, FutureResult::StopTriggerDue).boxed());

        while let Some(result) = self.futures.next().await {
            let exit = match result {
                FutureResult::StartTriggerDue => self.handle_start_trigger(),
                FutureResult::StopTriggerDue => self.handle_stop_trigger(),
                FutureResult::WatchdogExpired => self.handle_watchdog(),
                FutureResult::ExitDelayElapsed => true,
                FutureResult::NotificationReceived(notification, receiver) => {
                    self.futures.push(wait_for_notification(receiver).boxed());
                    self.handle_notification(notification)
                }

                FutureResult::NotificationChannelClosed => {
                    warn!("Pipeline notification channel closed");
                    self.terminate(SessionOutcome::Aborted);
                    true
                }
            };

            if exit {
                break;
            }
        }

        info!("Session orchestrator stopped");
    }

    fn handle_start_trigger(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }

        self.state = SessionState::Armed;

        // Never request more look-back than the cache holds.
        let effective_pre_roll = min(self.config.pre_roll_seconds, self.config.cache_seconds);
        if effective_pre_roll < self.config.pre_roll_seconds {
            info!(
                "Pre-roll of {}s clamped to the {}s cache capacity",
                self.config.pre_roll_seconds, self.config.cache_seconds
            );
        }

        let (session_slot, context) = match self.arm_context_buffers() {
            Ok(pointers) => pointers,
            Err(e) => {
                // Recording cannot start without the native context.
                error!("Failed to arm native context buffers: {}", e);
                self.terminate(SessionOutcome::Aborted);
                return true;
            }
        };

        let request = PipelineRequest::StartRecording {
            session_slot,
            context,
            pre_roll_seconds: effective_pre_roll,
            post_roll_seconds: self.config.post_roll_seconds,
        };

        if self.pipeline.send(request).is_err() {
            warn!("Start trigger could not be issued, continuing degraded");
        } else {
            info!(
                pre_roll_seconds = effective_pre_roll,
                post_roll_seconds = self.config.post_roll_seconds,
                "Start trigger issued"
            );
        }

        self.state = SessionState::Capturing;

        false
    }

    fn handle_stop_trigger(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }

        let request = PipelineRequest::StopRecording {
            reason: self.config.stop_reason,
        };

        if self.pipeline.send(request).is_err() {
            warn!("Stop trigger could not be issued");
        } else {
            info!("Stop trigger issued");
        }

        self.state = SessionState::StoppingOrCompleted;

        let watchdog = Duration::from_secs(self.config.watchdog_seconds as u64);
        self.futures
            .push(wait_for_timer(watchdog, FutureResult::WatchdogExpired).boxed());

        false
    }

    fn handle_watchdog(&mut self) -> bool {
        if self.state == SessionState::Terminated || self.completion_seen {
            return false;
        }

        warn!(
            "No completion notification within {}s of the stop trigger, forcing termination",
            self.config.watchdog_seconds
        );

        self.terminate(SessionOutcome::TimedOut);

        true
    }

    fn handle_notification(&mut self, notification: PipelineNotification) -> bool {
        match notification {
            PipelineNotification::StreamBound { geometry } => {
                info!(
                    width = geometry.width,
                    height = geometry.height,
                    "Live stream bound to the aggregation stage"
                );

                false
            }

            PipelineNotification::PipelineError {
                source_name,
                description,
                debug_info,
            } => {
                if self.state == SessionState::Terminated {
                    return false;
                }

                error!(
                    source = %source_name,
                    debug = ?debug_info,
                    "Pipeline error: {}", description,
                );

                self.terminate(SessionOutcome::Aborted);

                true
            }

            PipelineNotification::EndOfStream => {
                if self.state == SessionState::Terminated {
                    return false;
                }

                info!("End of stream reached");
                self.terminate(SessionOutcome::Aborted);

                true
            }

            PipelineNotification::RecordingComplete(info) => {
                if self.state == SessionState::Terminated {
                    return false;
                }

                self.completion_seen = true;
                reporter::report(&info);
                self.terminate(SessionOutcome::Completed);

                // Keep the loop alive briefly so trailing log output from
                // the pipeline teardown still gets flushed.
                let exit_delay = Duration::from_secs(self.config.exit_delay_seconds as u64);
                self.futures
                    .push(wait_for_timer(exit_delay, FutureResult::ExitDelayElapsed).boxed());

                false
            }
        }
    }

    fn arm_context_buffers(&mut self) -> Result<(NativePointer, NativePointer), NativeContextError> {
        let session_slot = self.arena.allocate(SESSION_SLOT_SIZE)?;
        let context = self.arena.allocate(SESSION_CONTEXT_SIZE)?;

        self.arena.write_session_context(
            context,
            self.config.session_id,
            &self.config.session_name,
        )?;

        Ok((
            self.arena.native_ptr(session_slot)?,
            self.arena.native_ptr(context)?,
        ))
    }

    /// The single terminal cleanup.  Every terminal path lands here, and the
    /// state guard makes any later terminal event a no-op: the media flow is
    /// stopped once, the native buffers are released once, and the outcome
    /// is resolved once.
    fn terminate(&mut self, outcome: SessionOutcome) {
        if self.state == SessionState::Terminated {
            return;
        }

        self.state = SessionState::Terminated;

        let _ = self.pipeline.send(PipelineRequest::StopFlow);
        self.arena.release_all();

        if let Some(sender) = self.outcome.take() {
            let _ = sender.send(outcome);
        }

        info!(outcome = ?outcome, "Session terminated");
    }
}

async fn wait_for_timer(delay: Duration, result: FutureResult) -> FutureResult {
    sleep(delay).await;

    result
}

async fn wait_for_notification(
    mut receiver: UnboundedReceiver<PipelineNotification>,
) -> FutureResult {
    match receiver.recv().await {
        Some(notification) => FutureResult::NotificationReceived(notification, receiver),
        None => FutureResult::NotificationChannelClosed,
    }
}
