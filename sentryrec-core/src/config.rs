//! Parsing and validation of the sentryrec config file.  The raw file format
//! is a `settings { name value }` block; `RecordingConfig` is the typed
//! contract the rest of the system consumes, with every optional setting
//! defaulted and the post-roll bound applied.

use crate::pipeline::StreamGeometry;
use pest::iterators::Pair;
use pest::Parser;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub const SOURCE_URI: &str = "source_uri";
pub const RECORD_DIR: &str = "record_dir";
pub const FILE_PREFIX: &str = "file_prefix";
pub const PRE_ROLL_SECONDS: &str = "pre_roll_seconds";
pub const POST_ROLL_SECONDS: &str = "post_roll_seconds";
pub const MAX_POST_ROLL_SECONDS: &str = "max_post_roll_seconds";
pub const CACHE_SECONDS: &str = "cache_seconds";
pub const START_DELAY_SECONDS: &str = "start_delay_seconds";
pub const WATCHDOG_SECONDS: &str = "watchdog_seconds";
pub const EXIT_DELAY_SECONDS: &str = "exit_delay_seconds";
pub const DEFAULT_WIDTH: &str = "default_width";
pub const DEFAULT_HEIGHT: &str = "default_height";
pub const BATCH_TIMEOUT_US: &str = "batch_timeout_us";
pub const SESSION_ID: &str = "session_id";
pub const SESSION_NAME: &str = "session_name";
pub const STOP_REASON: &str = "stop_reason";

/// Raw name/value pairs read from a config file.  A setting without a value
/// (a flag) is represented with a `None` value.
pub struct RawConfig {
    pub settings: HashMap<String, Option<String>>,
}

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("The config provided could not be parsed")]
    InvalidConfig(#[from] pest::error::Error<Rule>),

    #[error("Found unexpected rule '{rule:?}' in the {section} section")]
    UnexpectedRule { rule: Rule, section: String },
}

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("No {} setting was specified", SOURCE_URI)]
    MissingSourceUri,

    #[error("Setting '{name}' requires a value")]
    MissingValue { name: String },

    #[error("Setting '{name}' has a non-numeric value of '{value}'")]
    InvalidNumber { name: String, value: String },
}

#[derive(Parser)]
#[grammar = "config.pest"]
struct RawConfigParser;

/// Parses the contents of a config file into its raw settings.
pub fn parse(content: &str) -> Result<RawConfig, ConfigParseError> {
    let mut config = RawConfig {
        settings: HashMap::new(),
    };

    let pairs = RawConfigParser::parse(Rule::content, content)?;
    for pair in pairs {
        match pair.as_rule() {
            Rule::setting_block => handle_setting_block(&mut config, pair)?,
            Rule::EOI => (),
            rule => {
                return Err(ConfigParseError::UnexpectedRule {
                    rule,
                    section: "content".to_string(),
                })
            }
        }
    }

    Ok(config)
}

fn handle_setting_block(config: &mut RawConfig, pair: Pair<Rule>) -> Result<(), ConfigParseError> {
    for pair in pair.into_inner() {
        match pair.as_rule() {
            Rule::setting => handle_setting(config, pair)?,
            rule => {
                return Err(ConfigParseError::UnexpectedRule {
                    rule,
                    section: "setting_block".to_string(),
                })
            }
        }
    }

    Ok(())
}

fn handle_setting(config: &mut RawConfig, pair: Pair<Rule>) -> Result<(), ConfigParseError> {
    let mut name = None;
    let mut value = None;
    for pair in pair.into_inner() {
        match pair.as_rule() {
            Rule::setting_name => name = Some(pair.as_str().to_string()),
            Rule::setting_value => {
                let raw_value = pair.as_str().to_string();
                let mut quoted_value = None;
                for pair in pair.into_inner() {
                    if pair.as_rule() == Rule::quoted_string_value {
                        quoted_value = Some(pair.as_str().to_string());
                    }
                }

                value = Some(quoted_value.unwrap_or(raw_value));
            }

            rule => {
                return Err(ConfigParseError::UnexpectedRule {
                    rule,
                    section: "setting".to_string(),
                })
            }
        }
    }

    if let Some(name) = name {
        config.settings.insert(name, value);
    }

    Ok(())
}

/// The validated configuration for one recording session run.
#[derive(Clone, Debug)]
pub struct RecordingConfig {
    /// Locator of the live stream the pipeline should consume.
    pub source_uri: String,

    /// Directory the pipeline writes finished artifacts into.  Created
    /// (with parents) before the pipeline starts.
    pub record_dir: String,

    /// Optional prefix for artifact file names.
    pub file_prefix: Option<String>,

    /// Seconds of cached data to include before the trigger instant.  The
    /// orchestrator clamps this to the cache capacity when the trigger
    /// fires.
    pub pre_roll_seconds: u32,

    /// Seconds to keep capturing after the trigger instant.
    pub post_roll_seconds: u32,

    /// Seconds the look-back cache retains.
    pub cache_seconds: u32,

    /// Delay from orchestrator start to the start trigger.
    pub start_delay_seconds: u32,

    /// How long to wait for the completion notification after the stop
    /// trigger before forcing termination.
    pub watchdog_seconds: u32,

    /// How long to keep the run loop alive after completion so trailing log
    /// output flushes.
    pub exit_delay_seconds: u32,

    /// Geometry the aggregation stage is configured with until the live
    /// stream's real geometry is discovered, and the fallback when caps
    /// fields are absent.
    pub default_geometry: StreamGeometry,

    /// Microseconds the aggregation stage waits before pushing an
    /// incomplete batch.
    pub batch_timeout_us: i32,

    /// Identifier written into the native user context record.
    pub session_id: i32,

    /// Name written into the native user context record.  Truncated to the
    /// record's fixed name field if oversized.
    pub session_name: String,

    /// Reason code passed with the stop trigger.
    pub stop_reason: u32,
}

impl RecordingConfig {
    /// Builds the typed configuration from raw settings.  Every setting
    /// except the source URI has a default.  A post-roll above the
    /// configured maximum is clamped with a warning rather than rejected.
    pub fn from_settings(
        settings: &HashMap<String, Option<String>>,
    ) -> Result<RecordingConfig, ConfigValidationError> {
        let source_uri = match settings.get(SOURCE_URI) {
            Some(Some(value)) => value.clone(),
            _ => return Err(ConfigValidationError::MissingSourceUri),
        };

        let record_dir = get_string(settings, RECORD_DIR, "recordings")?;
        let session_name = get_string(settings, SESSION_NAME, "sr-demo")?;
        let file_prefix = match settings.get(FILE_PREFIX) {
            Some(Some(value)) => Some(value.clone()),
            Some(None) => {
                return Err(ConfigValidationError::MissingValue {
                    name: FILE_PREFIX.to_string(),
                })
            }
            None => None,
        };

        let mut post_roll_seconds = get_number(settings, POST_ROLL_SECONDS, 5u32)?;
        let max_post_roll_seconds = get_number(settings, MAX_POST_ROLL_SECONDS, 300u32)?;
        if post_roll_seconds > max_post_roll_seconds {
            warn!(
                "Configured post-roll of {}s exceeds the {}s maximum, clamping",
                post_roll_seconds, max_post_roll_seconds
            );

            post_roll_seconds = max_post_roll_seconds;
        }

        Ok(RecordingConfig {
            source_uri,
            record_dir,
            file_prefix,
            pre_roll_seconds: get_number(settings, PRE_ROLL_SECONDS, 3u32)?,
            post_roll_seconds,
            cache_seconds: get_number(settings, CACHE_SECONDS, 30u32)?,
            start_delay_seconds: get_number(settings, START_DELAY_SECONDS, 5u32)?,
            watchdog_seconds: get_number(settings, WATCHDOG_SECONDS, 6u32)?,
            exit_delay_seconds: get_number(settings, EXIT_DELAY_SECONDS, 1u32)?,
            default_geometry: StreamGeometry {
                width: get_number(settings, DEFAULT_WIDTH, 1920i32)?,
                height: get_number(settings, DEFAULT_HEIGHT, 1080i32)?,
            },
            batch_timeout_us: get_number(settings, BATCH_TIMEOUT_US, 40000i32)?,
            session_id: get_number(settings, SESSION_ID, 1234i32)?,
            session_name,
            stop_reason: get_number(settings, STOP_REASON, 0u32)?,
        })
    }
}

fn get_string(
    settings: &HashMap<String, Option<String>>,
    name: &str,
    default: &str,
) -> Result<String, ConfigValidationError> {
    match settings.get(name) {
        Some(Some(value)) => Ok(value.clone()),
        Some(None) => Err(ConfigValidationError::MissingValue {
            name: name.to_string(),
        }),
        None => Ok(default.to_string()),
    }
}

fn get_number<T: FromStr>(
    settings: &HashMap<String, Option<String>>,
    name: &str,
    default: T,
) -> Result<T, ConfigValidationError> {
    match settings.get(name) {
        Some(Some(value)) => value.parse().map_err(|_| ConfigValidationError::InvalidNumber {
            name: name.to_string(),
            value: value.clone(),
        }),

        Some(None) => Err(ConfigValidationError::MissingValue {
            name: name.to_string(),
        }),

        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_settings() {
        let content = "
settings {
    source_uri rtsp://camera.local/stream
    record_dir \"/var/lib/sentryrec/out dir\"
    flag

}
";

        let config = parse(content).unwrap();
        assert_eq!(config.settings.len(), 3, "Unexpected number of settings");
        assert_eq!(
            config.settings.get("source_uri"),
            Some(&Some("rtsp://camera.local/stream".to_string())),
            "Unexpected source_uri value"
        );
        assert_eq!(
            config.settings.get("record_dir"),
            Some(&Some("/var/lib/sentryrec/out dir".to_string())),
            "Unexpected record_dir value"
        );
        assert_eq!(config.settings.get("flag"), Some(&None), "Unexpected flag value");
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let content = "
# leading comment
settings { # block comment
    source_uri rtsp://camera.local/stream # trailing comment

    pre_roll_seconds 3
}
";

        let config = parse(content).unwrap();
        assert_eq!(config.settings.len(), 2, "Unexpected number of settings");
        assert_eq!(
            config.settings.get("pre_roll_seconds"),
            Some(&Some("3".to_string())),
            "Unexpected pre_roll_seconds value"
        );
    }

    #[test]
    fn typed_config_applies_defaults() {
        let mut settings = HashMap::new();
        settings.insert(SOURCE_URI.to_string(), Some("rtsp://cam/1".to_string()));

        let config = RecordingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.source_uri, "rtsp://cam/1", "Unexpected source uri");
        assert_eq!(config.record_dir, "recordings", "Unexpected record dir");
        assert_eq!(config.file_prefix, None, "Unexpected file prefix");
        assert_eq!(config.pre_roll_seconds, 3, "Unexpected pre-roll");
        assert_eq!(config.post_roll_seconds, 5, "Unexpected post-roll");
        assert_eq!(config.cache_seconds, 30, "Unexpected cache seconds");
        assert_eq!(config.start_delay_seconds, 5, "Unexpected start delay");
        assert_eq!(config.watchdog_seconds, 6, "Unexpected watchdog interval");
        assert_eq!(config.default_geometry.width, 1920, "Unexpected default width");
        assert_eq!(config.default_geometry.height, 1080, "Unexpected default height");
        assert_eq!(config.session_id, 1234, "Unexpected session id");
        assert_eq!(config.session_name, "sr-demo", "Unexpected session name");
    }

    #[test]
    fn missing_source_uri_is_rejected() {
        let settings = HashMap::new();
        match RecordingConfig::from_settings(&settings) {
            Err(ConfigValidationError::MissingSourceUri) => (),
            Err(e) => panic!("Expected missing source uri error, instead got: {:?}", e),
            Ok(_) => panic!("Received successful validation, but an error was expected"),
        }
    }

    #[test]
    fn non_numeric_setting_is_rejected() {
        let mut settings = HashMap::new();
        settings.insert(SOURCE_URI.to_string(), Some("rtsp://cam/1".to_string()));
        settings.insert(PRE_ROLL_SECONDS.to_string(), Some("abc".to_string()));

        match RecordingConfig::from_settings(&settings) {
            Err(ConfigValidationError::InvalidNumber { name, value }) => {
                assert_eq!(name, PRE_ROLL_SECONDS, "Unexpected setting name");
                assert_eq!(value, "abc", "Unexpected setting value");
            }
            Err(e) => panic!("Expected invalid number error, instead got: {:?}", e),
            Ok(_) => panic!("Received successful validation, but an error was expected"),
        }
    }

    #[test]
    fn post_roll_is_clamped_to_configured_maximum() {
        let mut settings = HashMap::new();
        settings.insert(SOURCE_URI.to_string(), Some("rtsp://cam/1".to_string()));
        settings.insert(POST_ROLL_SECONDS.to_string(), Some("900".to_string()));
        settings.insert(MAX_POST_ROLL_SECONDS.to_string(), Some("600".to_string()));

        let config = RecordingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.post_roll_seconds, 600, "Post-roll was not clamped");
    }

    #[test]
    fn full_config_can_be_parsed_and_validated() {
        let content = "
settings {
    source_uri rtsp://camera.local/stream
    record_dir recordings
    file_prefix test_
    pre_roll_seconds 3
    post_roll_seconds 5
    cache_seconds 30
    start_delay_seconds 5
    session_id 1234
    session_name sr-demo
}
";

        let raw = parse(content).unwrap();
        let config = RecordingConfig::from_settings(&raw.settings).unwrap();
        assert_eq!(config.file_prefix, Some("test_".to_string()), "Unexpected prefix");
        assert_eq!(config.session_id, 1234, "Unexpected session id");
    }
}
