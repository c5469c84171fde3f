use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadBalancerError {
  #[error("no servers available to select")]
  EmptyPool,

  #[error("unsupported protocol: {0}")]
  UnsupportedProtocol(String),

  #[error("unknown load balancing algorithm '{0}', valid options are: round_robin, weighted_round_robin, least_connections")]
  UnknownAlgorithm(String),

  #[error("failed to bind {address}: {source}")]
  Bind { address: String, source: io::Error },

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("failed to read configuration file {path}: {source}")]
  ConfigRead { path: String, source: io::Error },

  #[error("failed to parse configuration: {0}")]
  ConfigParse(#[from] toml::de::Error),

  #[error("failed to initialize logging: {0}")]
  Logging(String),

  #[error(transparent)]
  Io(#[from] io::Error),
}
