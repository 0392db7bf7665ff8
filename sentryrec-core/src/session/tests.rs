use super::*;
use crate::config::RecordingConfig;
use crate::native_context::{ArenaStats, NativeContextArena, SessionContext};
use crate::pipeline::{
    PipelineNotification, PipelineRequest, RecordingCompleteInfo, StreamGeometry,
};
use crate::test_utils;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::advance;

struct TestContext {
    requests: tokio::sync::mpsc::UnboundedReceiver<PipelineRequest>,
    notifications: UnboundedSender<PipelineNotification>,
    outcome: oneshot::Receiver<SessionOutcome>,
    stats: Arc<ArenaStats>,
}

impl TestContext {
    async fn new(config: RecordingConfig) -> TestContext {
        let arena = NativeContextArena::new();
        let stats = arena.stats();

        let (request_sender, requests) = unbounded_channel();
        let (notifications, notification_receiver) = unbounded_channel();

        let outcome = start_session_orchestrator(SessionOrchestratorParams {
            config,
            arena,
            pipeline: request_sender,
            notifications: notification_receiver,
        });

        // Let the actor task run far enough to register its trigger timers
        // before the paused clock is advanced.
        tokio::task::yield_now().await;

        TestContext {
            requests,
            notifications,
            outcome,
            stats,
        }
    }

    /// Advances the paused clock through the start trigger and returns the
    /// issued start request.
    async fn advance_to_start(&mut self) -> PipelineRequest {
        advance(Duration::from_secs(5)).await;
        test_utils::expect_mpsc_response(&mut self.requests).await
    }

    /// Advances the paused clock from the start trigger to the stop trigger
    /// and returns the issued stop request.
    async fn advance_to_stop(&mut self) -> PipelineRequest {
        advance(Duration::from_secs(6)).await;
        test_utils::expect_mpsc_response(&mut self.requests).await
    }
}

fn test_config() -> RecordingConfig {
    RecordingConfig {
        source_uri: "rtsp://camera.local/stream".to_string(),
        record_dir: "/out".to_string(),
        file_prefix: Some("test_".to_string()),
        pre_roll_seconds: 3,
        post_roll_seconds: 5,
        cache_seconds: 30,
        start_delay_seconds: 5,
        watchdog_seconds: 6,
        exit_delay_seconds: 1,
        default_geometry: StreamGeometry {
            width: 1920,
            height: 1080,
        },
        batch_timeout_us: 40000,
        session_id: 1234,
        session_name: "sr-demo".to_string(),
        stop_reason: 0,
    }
}

fn completion_info() -> RecordingCompleteInfo {
    RecordingCompleteInfo {
        dir_path: Some("/out".to_string()),
        file_name: Some("test_0.mp4".to_string()),
        width: Some(1920),
        height: Some(1080),
        context: Some(SessionContext {
            session_id: 1234,
            name: "sr-demo".to_string(),
        }),
    }
}

#[tokio::test(start_paused = true)]
async fn start_trigger_fires_after_configured_delay() {
    let mut context = TestContext::new(test_config()).await;

    test_utils::expect_mpsc_timeout(&mut context.requests).await;

    advance(Duration::from_secs(5)).await;
    let request = test_utils::expect_mpsc_response(&mut context.requests).await;
    match request {
        PipelineRequest::StartRecording {
            pre_roll_seconds,
            post_roll_seconds,
            ..
        } => {
            assert_eq!(pre_roll_seconds, 3, "Unexpected pre-roll");
            assert_eq!(post_roll_seconds, 5, "Unexpected post-roll");
        }

        request => panic!("Expected a start request, instead got: {:?}", request),
    }
}

#[tokio::test(start_paused = true)]
async fn pre_roll_is_clamped_to_cache_capacity() {
    let mut config = test_config();
    config.pre_roll_seconds = 45;
    config.cache_seconds = 30;

    let mut context = TestContext::new(config).await;
    match context.advance_to_start().await {
        PipelineRequest::StartRecording {
            pre_roll_seconds, ..
        } => assert_eq!(pre_roll_seconds, 30, "Pre-roll was not clamped to the cache"),
        request => panic!("Expected a start request, instead got: {:?}", request),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_trigger_fires_at_start_delay_plus_post_roll_plus_one() {
    let mut context = TestContext::new(test_config()).await;
    context.advance_to_start().await;

    // Nothing further is due until t = 5 + 5 + 1 = 11 seconds.
    advance(Duration::from_secs(5)).await;
    test_utils::expect_mpsc_timeout(&mut context.requests).await;

    advance(Duration::from_secs(1)).await;
    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopRecording { reason } => {
            assert_eq!(reason, 0, "Unexpected stop reason")
        }

        request => panic!("Expected a stop request, instead got: {:?}", request),
    }
}

#[tokio::test(start_paused = true)]
async fn completion_terminates_cleanly_with_buffers_released() {
    let mut context = TestContext::new(test_config()).await;
    context.advance_to_start().await;
    context.advance_to_stop().await;

    context
        .notifications
        .send(PipelineNotification::RecordingComplete(completion_info()))
        .expect("Failed to send the completion notification");

    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopFlow => (),
        request => panic!("Expected a stop flow request, instead got: {:?}", request),
    }

    let outcome = test_utils::expect_oneshot_response(context.outcome).await;
    assert_eq!(outcome, SessionOutcome::Completed, "Unexpected outcome");

    assert_eq!(context.stats.allocation_count(), 2, "Unexpected allocation count");
    assert!(context.stats.is_balanced(), "Buffers were not all released");
}

#[tokio::test(start_paused = true)]
async fn watchdog_forces_termination_when_completion_never_arrives() {
    let mut context = TestContext::new(test_config()).await;
    context.advance_to_start().await;
    context.advance_to_stop().await;

    // The watchdog is armed with the stop trigger and expires 6 seconds
    // later with no completion in sight.
    advance(Duration::from_secs(6)).await;

    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopFlow => (),
        request => panic!("Expected a stop flow request, instead got: {:?}", request),
    }

    let outcome = test_utils::expect_oneshot_response(context.outcome).await;
    assert_eq!(outcome, SessionOutcome::TimedOut, "Unexpected outcome");
    assert!(context.stats.is_balanced(), "Buffers were not all released");
}

#[tokio::test(start_paused = true)]
async fn pipeline_error_aborts_the_session() {
    let mut context = TestContext::new(test_config()).await;
    context.advance_to_start().await;

    context
        .notifications
        .send(PipelineNotification::PipelineError {
            source_name: "source".to_string(),
            description: "could not read from resource".to_string(),
            debug_info: None,
        })
        .expect("Failed to send the error notification");

    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopFlow => (),
        request => panic!("Expected a stop flow request, instead got: {:?}", request),
    }

    let outcome = test_utils::expect_oneshot_response(context.outcome).await;
    assert_eq!(outcome, SessionOutcome::Aborted, "Unexpected outcome");
    assert!(context.stats.is_balanced(), "Buffers were not all released");
}

#[tokio::test(start_paused = true)]
async fn end_of_stream_aborts_the_session() {
    let mut context = TestContext::new(test_config()).await;
    context.advance_to_start().await;

    context
        .notifications
        .send(PipelineNotification::EndOfStream)
        .expect("Failed to send the end of stream notification");

    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopFlow => (),
        request => panic!("Expected a stop flow request, instead got: {:?}", request),
    }

    let outcome = test_utils::expect_oneshot_response(context.outcome).await;
    assert_eq!(outcome, SessionOutcome::Aborted, "Unexpected outcome");
}

#[tokio::test(start_paused = true)]
async fn abort_before_start_trigger_releases_nothing() {
    let mut context = TestContext::new(test_config()).await;

    context
        .notifications
        .send(PipelineNotification::EndOfStream)
        .expect("Failed to send the end of stream notification");

    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopFlow => (),
        request => panic!("Expected a stop flow request, instead got: {:?}", request),
    }

    let outcome = test_utils::expect_oneshot_response(context.outcome).await;
    assert_eq!(outcome, SessionOutcome::Aborted, "Unexpected outcome");
    assert_eq!(context.stats.allocation_count(), 0, "Unexpected allocations");
    assert_eq!(context.stats.release_count(), 0, "Unexpected releases");
}

#[tokio::test(start_paused = true)]
async fn terminal_events_after_termination_are_no_ops() {
    let mut context = TestContext::new(test_config()).await;
    context.advance_to_start().await;
    context.advance_to_stop().await;

    context
        .notifications
        .send(PipelineNotification::RecordingComplete(completion_info()))
        .expect("Failed to send the completion notification");

    match test_utils::expect_mpsc_response(&mut context.requests).await {
        PipelineRequest::StopFlow => (),
        request => panic!("Expected a stop flow request, instead got: {:?}", request),
    }

    // Late terminal events while the exit delay is pending must not trigger
    // a second cleanup.
    context
        .notifications
        .send(PipelineNotification::PipelineError {
            source_name: "source".to_string(),
            description: "late error".to_string(),
            debug_info: None,
        })
        .expect("Failed to send the late error notification");

    context
        .notifications
        .send(PipelineNotification::EndOfStream)
        .expect("Failed to send the late end of stream notification");

    test_utils::expect_mpsc_timeout(&mut context.requests).await;

    let outcome = test_utils::expect_oneshot_response(context.outcome).await;
    assert_eq!(outcome, SessionOutcome::Completed, "Unexpected outcome");

    assert_eq!(context.stats.allocation_count(), 2, "Unexpected allocation count");
    assert_eq!(context.stats.release_count(), 2, "Buffers released more than once");
}

#[tokio::test(start_paused = true)]
async fn stream_bound_notification_is_informational_only() {
    let mut context = TestContext::new(test_config()).await;

    context
        .notifications
        .send(PipelineNotification::StreamBound {
            geometry: StreamGeometry {
                width: 1280,
                height: 720,
            },
        })
        .expect("Failed to send the stream bound notification");

    test_utils::expect_mpsc_timeout(&mut context.requests).await;

    // The session still arms and captures normally afterwards.
    match context.advance_to_start().await {
        PipelineRequest::StartRecording { .. } => (),
        request => panic!("Expected a start request, instead got: {:?}", request),
    }
}

#[tokio::test(start_paused = true)]
async fn start_trigger_send_failure_degrades_without_aborting() {
    let arena = NativeContextArena::new();
    let stats = arena.stats();

    let (request_sender, requests) = unbounded_channel();
    let (_notifications, notification_receiver) = unbounded_channel();

    // The pipeline endpoint is gone before the start trigger fires.
    drop(requests);

    let outcome = start_session_orchestrator(SessionOrchestratorParams {
        config: test_config(),
        arena,
        pipeline: request_sender,
        notifications: notification_receiver,
    });

    tokio::task::yield_now().await;
    advance(Duration::from_secs(5)).await;

    // The session proceeds degraded: no outcome yet, buffers still armed.
    let mut outcome = outcome;
    match tokio::time::timeout(Duration::from_millis(10), &mut outcome).await {
        Err(_) => (),
        Ok(result) => panic!("Expected no outcome yet, instead got: {:?}", result),
    }

    assert_eq!(stats.allocation_count(), 2, "Unexpected allocation count");
    assert_eq!(stats.release_count(), 0, "Buffers released prematurely");

    // The stop trigger and watchdog still run the session to termination.
    advance(Duration::from_secs(6)).await;
    advance(Duration::from_secs(6)).await;

    let outcome = test_utils::expect_oneshot_response(outcome).await;
    assert_eq!(outcome, SessionOutcome::TimedOut, "Unexpected outcome");
    assert!(stats.is_balanced(), "Buffers were not all released");
}
