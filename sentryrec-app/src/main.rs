use sentryrec_core::config::{parse as parse_config_file, RecordingConfig};
use sentryrec_core::native_context::NativeContextArena;
use sentryrec_core::session::{
    start_session_orchestrator, SessionOrchestratorParams, SessionOutcome,
};
use sentryrec_gstreamer::endpoints::smart_record::start_smart_record_endpoint;
use sentryrec_gstreamer::pipeline::build_smart_record_pipeline;
use sentryrec_gstreamer::GSTREAMER_INIT_RESULT;
use std::env;
use std::path::PathBuf;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, layer::SubscriberExt};

#[tokio::main]
pub async fn main() {
    // Start logging
    let log_dir = get_log_directory();
    let mut app_log_path = PathBuf::from(log_dir);
    app_log_path.push("application");

    let log_level = match env::var("sentryrec_log") {
        Ok(level) => match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        },

        Err(_) => Level::INFO,
    };

    let appender = tracing_appender::rolling::hourly(app_log_path.clone(), "application.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let stdout_writer = std::io::stdout.with_max_level(log_level);
    let json_writer = non_blocking.with_max_level(log_level);

    let subscriber = tracing_subscriber::registry()
        .with(fmt::Layer::new().with_writer(stdout_writer).pretty())
        .with(fmt::Layer::new().with_writer(json_writer).json());

    tracing::subscriber::set_global_default(subscriber).expect("Unable to set a global collector");

    info!("sentryrec {} started", env!("CARGO_PKG_VERSION"));
    info!("Logging to {}", app_log_path.display().to_string());

    let config = read_config();

    if let Err(e) = GSTREAMER_INIT_RESULT.as_ref() {
        panic!("Gstreamer could not be initialized: {}", e);
    }

    let (notification_sender, notification_receiver) = unbounded_channel();

    let pipeline = build_smart_record_pipeline(&config, notification_sender.clone())
        .expect("Failed to build the smart record pipeline");

    let pipeline_requests = start_smart_record_endpoint(pipeline, notification_sender)
        .expect("Failed to start the smart record endpoint");

    let outcome = start_session_orchestrator(SessionOrchestratorParams {
        config,
        arena: NativeContextArena::new(),
        pipeline: pipeline_requests,
        notifications: notification_receiver,
    });

    let outcome = outcome.await.unwrap_or(SessionOutcome::Aborted);

    info!(outcome = ?outcome, "Session run finished");

    let code = match outcome {
        SessionOutcome::Completed | SessionOutcome::TimedOut => 0,
        SessionOutcome::Aborted => 1,
    };

    // Flush the file appender before exiting.
    drop(guard);
    std::process::exit(code);
}

fn read_config() -> RecordingConfig {
    let contents =
        std::fs::read_to_string("sentryrec.config").expect("Failed to read 'sentryrec.config'");

    let raw = parse_config_file(contents.as_str()).expect("Failed to parse config file");

    RecordingConfig::from_settings(&raw.settings).expect("Invalid configuration")
}

fn get_log_directory() -> String {
    let log_dir = "logs";
    let mut log_path = PathBuf::from(log_dir);
    if log_path.is_relative() {
        log_path = std::env::current_dir().expect("Failed to get current directory");
        log_path.push(log_dir);
    }

    log_path.to_str().unwrap().to_string()
}
