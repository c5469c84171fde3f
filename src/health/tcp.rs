use super::HealthProbe;
use crate::server_pool::Server;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::{io, time::Duration};
use tokio::{net::TcpStream, time::timeout};

/// Healthy iff a TCP connection can be established in time. Nothing is sent.
#[derive(Debug)]
pub struct TcpProbe {
  timeout: Duration,
}

impl TcpProbe {
  pub fn new(timeout: Duration) -> TcpProbe {
    TcpProbe { timeout }
  }
}

#[async_trait]
impl HealthProbe for TcpProbe {
  async fn check_health(&self, server: &Server) -> bool {
    match timeout(self.timeout, TcpStream::connect((server.host(), server.port()))).await {
      Ok(Ok(stream)) => {
        drop(stream);
        debug!("TCP health check passed for {}.", server);
        true
      }
      Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
        warn!("TCP health check failed for {}: {}.", server, e);
        false
      }
      Ok(Err(e)) => {
        error!("Unexpected error during TCP health check for {}: {}.", server, e);
        false
      }
      Err(_) => {
        warn!("TCP health check timed out for {}.", server);
        false
      }
    }
  }
}
