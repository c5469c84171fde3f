use crate::{
  error::LoadBalancerError,
  load_balancing::AlgorithmContext,
  server_pool::{Server, ServerPool},
};
use std::{fmt, ops::Deref, str::FromStr, sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
  Http,
  Tcp,
}

impl FromStr for Protocol {
  type Err = LoadBalancerError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "http" => Ok(Protocol::Http),
      "tcp" => Ok(Protocol::Tcp),
      _ => Err(LoadBalancerError::UnsupportedProtocol(s.to_string())),
    }
  }
}

impl fmt::Display for Protocol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Protocol::Http => write!(f, "http"),
      Protocol::Tcp => write!(f, "tcp"),
    }
  }
}

/// Shared by the HTTP and TCP front ends: picks a backend among the currently healthy ones.
#[derive(Debug)]
pub struct Dispatcher {
  pool: Arc<ServerPool>,
  algorithm: Arc<AlgorithmContext>,
  backend_timeout: Duration,
}

impl Dispatcher {
  pub fn new(pool: Arc<ServerPool>, algorithm: Arc<AlgorithmContext>, backend_timeout: Duration) -> Dispatcher {
    Dispatcher {
      pool,
      algorithm,
      backend_timeout,
    }
  }

  pub fn backend_timeout(&self) -> Duration {
    self.backend_timeout
  }

  pub fn select(&self) -> Result<ConnectionLease, LoadBalancerError> {
    let healthy_servers = self.pool.healthy_servers();
    let server = self.algorithm.execute(&healthy_servers)?;
    Ok(ConnectionLease::new(server, self.algorithm.clone()))
  }
}

/// A backend handed out by the dispatcher. Dropping the lease gives the connection back to the
/// server's counter and to the selection algorithm, exactly once.
#[derive(Debug)]
pub struct ConnectionLease {
  server: Arc<Server>,
  algorithm: Arc<AlgorithmContext>,
}

impl ConnectionLease {
  fn new(server: Arc<Server>, algorithm: Arc<AlgorithmContext>) -> ConnectionLease {
    server.connection_opened();
    ConnectionLease { server, algorithm }
  }
}

impl Deref for ConnectionLease {
  type Target = Server;

  fn deref(&self) -> &Server {
    &self.server
  }
}

impl Drop for ConnectionLease {
  fn drop(&mut self) {
    self.server.connection_closed();
    self.algorithm.release(&self.server);
  }
}
