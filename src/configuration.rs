use crate::{dispatch::Protocol, error::LoadBalancerError, load_balancing::Algorithm};
use log::{info, warn};
use serde::Deserialize;
use std::{fs, net::ToSocketAddrs, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub listen: ListenConfig,
  pub load_balance: LoadBalanceConfig,
  pub health_check: HealthCheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
  #[serde(default = "default_listen_host")]
  pub host: String,
  pub port: u16,
  pub protocol: String,
  /// Seconds allowed for connecting to, reading from and writing to a backend.
  #[serde(default = "default_backend_timeout")]
  pub backend_timeout: u64,
}

impl ListenConfig {
  pub fn address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  pub fn backend_timeout(&self) -> Duration {
    Duration::from_secs(self.backend_timeout)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalanceConfig {
  #[serde(alias = "algorithms")]
  pub algorithm: String,
  #[serde(default)]
  pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
  #[serde(default = "default_weight")]
  pub weight: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
  /// Seconds between two probe cycles.
  pub interval: u64,
  /// Seconds a single probe may take.
  pub timeout: u64,
  #[serde(default = "default_health_path")]
  pub path: String,
  #[serde(default = "default_retries")]
  pub retries: u32,
  /// Base of the exponential backoff between failed attempts, in seconds.
  #[serde(default = "default_retry_delay")]
  pub retry_delay: u64,
}

impl HealthCheckConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay)
  }
}

fn default_listen_host() -> String {
  std::env::var("LB_LISTEN_HOST").unwrap_or_else(|_| "0.0.0.0".into())
}

fn default_backend_timeout() -> u64 {
  30
}

fn default_weight() -> u32 {
  1
}

fn default_health_path() -> String {
  "/health".into()
}

fn default_retries() -> u32 {
  3
}

fn default_retry_delay() -> u64 {
  2
}

impl Config {
  pub fn load(toml_path: &str) -> Result<Config, LoadBalancerError> {
    let toml_str = fs::read_to_string(toml_path).map_err(|source| LoadBalancerError::ConfigRead {
      path: toml_path.to_string(),
      source,
    })?;
    let config = Config::parse(&toml_str)?;
    info!("Successfully parsed configuration {}", toml_path);
    Ok(config)
  }

  pub fn parse(toml_str: &str) -> Result<Config, LoadBalancerError> {
    let config: Config = toml::from_str(toml_str)?;
    config.validate()?;
    config.print_warnings();
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), LoadBalancerError> {
    if self.listen.port == 0 {
      return Err(invalid("listen.port must be between 1 and 65535"));
    }
    if !resolvable(&self.listen.host, self.listen.port) {
      return Err(invalid(format!("listen.host '{}' is not a valid address", self.listen.host)));
    }
    if self.listen.backend_timeout == 0 {
      return Err(invalid("listen.backend_timeout must be a positive integer"));
    }
    self.listen.protocol.parse::<Protocol>()?;
    self.load_balance.algorithm.parse::<Algorithm>()?;

    for (index, server) in self.load_balance.servers.iter().enumerate() {
      if server.port == 0 {
        return Err(invalid(format!(
          "load_balance.servers[{}].port must be between 1 and 65535",
          index
        )));
      }
      if server.weight == 0 {
        return Err(invalid(format!("load_balance.servers[{}].weight must be at least 1", index)));
      }
      if !resolvable(&server.host, server.port) {
        return Err(invalid(format!(
          "load_balance.servers[{}].host '{}' is not a valid address",
          index, server.host
        )));
      }
    }

    let health = &self.health_check;
    if health.interval == 0 {
      return Err(invalid("health_check.interval must be a positive integer"));
    }
    if health.timeout == 0 {
      return Err(invalid("health_check.timeout must be a positive integer"));
    }
    if health.retries == 0 {
      return Err(invalid("health_check.retries must be a positive integer"));
    }
    if !health.path.starts_with('/') {
      return Err(invalid("health_check.path must start with '/'"));
    }
    Ok(())
  }

  fn print_warnings(&self) {
    if self.load_balance.servers.is_empty() {
      warn!("load_balance.servers is empty. Every request will be answered with service unavailable.");
    }
  }
}

fn resolvable(host: &str, port: u16) -> bool {
  (host, port)
    .to_socket_addrs()
    .map(|mut addresses| addresses.next().is_some())
    .unwrap_or(false)
}

fn invalid(message: impl Into<String>) -> LoadBalancerError {
  LoadBalancerError::InvalidConfig(message.into())
}
