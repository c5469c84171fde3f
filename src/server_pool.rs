use crate::{configuration::ServerConfig, utils::lock};
use std::{fmt, sync::Arc, sync::Mutex};

/// Identity of a backend. Two servers with the same host and port are the same backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId {
  pub host: String,
  pub port: u16,
}

impl ServerId {
  /// `host:port` usable as a URI authority, IPv6 literals get their brackets.
  pub fn authority(&self) -> String {
    if self.host.contains(':') && !self.host.starts_with('[') {
      format!("[{}]:{}", self.host, self.port)
    } else {
      format!("{}:{}", self.host, self.port)
    }
  }
}

impl fmt::Display for ServerId {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

#[derive(Debug)]
struct ServerState {
  healthy: bool,
  active_connections: usize,
}

/// One backend. `healthy` and `active_connections` are guarded by the server's own lock,
/// which is never held across an await point.
#[derive(Debug)]
pub struct Server {
  id: ServerId,
  weight: u32,
  state: Mutex<ServerState>,
}

impl Server {
  pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Server {
    Server {
      id: ServerId {
        host: host.into(),
        port,
      },
      weight,
      // servers count as healthy until the first probe cycle says otherwise
      state: Mutex::new(ServerState {
        healthy: true,
        active_connections: 0,
      }),
    }
  }

  pub fn id(&self) -> &ServerId {
    &self.id
  }

  pub fn host(&self) -> &str {
    &self.id.host
  }

  pub fn port(&self) -> u16 {
    self.id.port
  }

  pub fn weight(&self) -> u32 {
    self.weight
  }

  pub fn is_healthy(&self) -> bool {
    lock(&self.state).healthy
  }

  pub fn active_connections(&self) -> usize {
    lock(&self.state).active_connections
  }

  /// Sets the health flag and reports whether it actually changed.
  fn set_healthy(&self, healthy: bool) -> bool {
    let mut state = lock(&self.state);
    if state.healthy == healthy {
      false
    } else {
      state.healthy = healthy;
      true
    }
  }

  pub fn connection_opened(&self) {
    lock(&self.state).active_connections += 1;
  }

  pub fn connection_closed(&self) {
    let mut state = lock(&self.state);
    state.active_connections = state.active_connections.saturating_sub(1);
  }
}

impl fmt::Display for Server {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    self.id.fmt(f)
  }
}

impl From<&ServerConfig> for Server {
  fn from(other: &ServerConfig) -> Self {
    Server::new(other.host.clone(), other.port, other.weight)
  }
}

#[derive(Debug)]
pub struct ServerPool {
  servers: Vec<Arc<Server>>,
}

impl ServerPool {
  pub fn new(servers: Vec<Server>) -> ServerPool {
    ServerPool {
      servers: servers.into_iter().map(Arc::new).collect(),
    }
  }

  /// Every configured server in configuration order.
  pub fn all_servers(&self) -> &[Arc<Server>] {
    &self.servers
  }

  /// Servers currently eligible for selection, in configuration order.
  pub fn healthy_servers(&self) -> Vec<Arc<Server>> {
    self.servers.iter().filter(|server| server.is_healthy()).cloned().collect()
  }

  pub fn mark_healthy(&self, server: &Server) -> bool {
    server.set_healthy(true)
  }

  pub fn mark_unhealthy(&self, server: &Server) -> bool {
    server.set_healthy(false)
  }
}

impl From<&[ServerConfig]> for ServerPool {
  fn from(other: &[ServerConfig]) -> Self {
    ServerPool::new(other.iter().map(Server::from).collect())
  }
}
