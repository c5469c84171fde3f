use crate::error::LoadBalancerError;
use log::{info, LevelFilter};
use log4rs::{
  append::{
    console::ConsoleAppender,
    rolling_file::{
      policy::compound::{roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy},
      RollingFileAppender,
    },
  },
  config::{Appender, Root},
  encode::pattern::PatternEncoder,
  Config,
};

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {M} - {l} - {m}{n}";
const MAX_LOG_FILE_SIZE: u64 = 1024 * 1024;
const LOG_FILE_BACKUPS: u32 = 5;

/// Logs to the console and, if a path is given, to a size-rotated file. The level comes from
/// `LOG_LEVEL` and defaults to INFO.
pub fn initialize(log_file: Option<&str>) -> Result<log4rs::Handle, LoadBalancerError> {
  let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".into());
  let level_filter = parse_level_filter(&log_level)
    .ok_or_else(|| LoadBalancerError::Logging(format!("Invalid log level: {}", log_level)))?;

  let stdout = ConsoleAppender::builder()
    .encoder(Box::new(PatternEncoder::new(PATTERN)))
    .build();
  let mut builder = Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
  let mut root = Root::builder().appender("stdout");

  if let Some(path) = log_file {
    let roller = FixedWindowRoller::builder()
      .build(&format!("{}.{{}}", path), LOG_FILE_BACKUPS)
      .map_err(|e| LoadBalancerError::Logging(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(MAX_LOG_FILE_SIZE)), Box::new(roller));
    let file = RollingFileAppender::builder()
      .encoder(Box::new(PatternEncoder::new(PATTERN)))
      .build(path, Box::new(policy))
      .map_err(|e| LoadBalancerError::Logging(format!("Failed to open log file {}: {}", path, e)))?;
    builder = builder.appender(Appender::builder().build("file", Box::new(file)));
    root = root.appender("file");
  }

  let config = builder
    .build(root.build(level_filter))
    .map_err(|e| LoadBalancerError::Logging(e.to_string()))?;
  let handle = log4rs::init_config(config).map_err(|e| LoadBalancerError::Logging(e.to_string()))?;
  info!("Logging Level: {}", &level_filter);
  Ok(handle)
}

fn parse_level_filter(str: &str) -> Option<LevelFilter> {
  match str.to_lowercase().as_str() {
    "off" => Some(LevelFilter::Off),
    "error" => Some(LevelFilter::Error),
    "warn" | "warning" => Some(LevelFilter::Warn),
    "info" => Some(LevelFilter::Info),
    "debug" => Some(LevelFilter::Debug),
    "trace" => Some(LevelFilter::Trace),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  pub fn parses_level_names_case_insensitively() {
    assert_eq!(parse_level_filter("DEBUG"), Some(LevelFilter::Debug));
    assert_eq!(parse_level_filter("Warning"), Some(LevelFilter::Warn));
    assert_eq!(parse_level_filter("off"), Some(LevelFilter::Off));
  }

  #[test]
  pub fn rejects_unknown_level() {
    assert_eq!(parse_level_filter("verbose"), None);
  }
}
