use crate::{
  configuration::HealthCheckConfig,
  dispatch::Protocol,
  error::LoadBalancerError,
  http_client::{self, TimeoutClient},
  server_pool::{Server, ServerPool},
  utils::lock,
};
use async_trait::async_trait;
use futures::{future::join_all, FutureExt};
use log::{error, info, warn};
use std::{fmt, panic::AssertUnwindSafe, sync::Arc, sync::Mutex, time::Duration};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

pub mod http;
pub mod tcp;

use self::{http::HttpProbe, tcp::TcpProbe};

/// A single liveness check of one server. Retrying is the engine's job, not the probe's.
#[async_trait]
pub trait HealthProbe: fmt::Debug + Send + Sync {
  async fn check_health(&self, server: &Server) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
  Stopped,
  Starting,
  Running,
  Stopping,
}

impl fmt::Display for EngineState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      EngineState::Stopped => write!(f, "stopped"),
      EngineState::Starting => write!(f, "starting"),
      EngineState::Running => write!(f, "running"),
      EngineState::Stopping => write!(f, "stopping"),
    }
  }
}

struct Worker {
  shutdown: CancellationToken,
  handle: JoinHandle<()>,
}

struct Lifecycle {
  state: EngineState,
  worker: Option<Worker>,
  session: Option<TimeoutClient>,
}

/// Periodically probes every server of the pool and flips their health flags.
pub struct HealthCheck {
  pool: Arc<ServerPool>,
  config: HealthCheckConfig,
  protocol: String,
  lifecycle: Mutex<Lifecycle>,
}

impl HealthCheck {
  pub fn new(pool: Arc<ServerPool>, config: HealthCheckConfig, protocol: String) -> HealthCheck {
    HealthCheck {
      pool,
      config,
      protocol,
      lifecycle: Mutex::new(Lifecycle {
        state: EngineState::Stopped,
        worker: None,
        session: None,
      }),
    }
  }

  pub fn state(&self) -> EngineState {
    lock(&self.lifecycle).state
  }

  /// Launches the probe loop in the background and returns immediately.
  pub fn start(&self) -> Result<(), LoadBalancerError> {
    let protocol = self.protocol.parse::<Protocol>().map_err(|e| {
      error!("Unsupported protocol: {}", self.protocol);
      e
    })?;

    let mut lifecycle = lock(&self.lifecycle);
    if lifecycle.state != EngineState::Stopped {
      warn!("Health checker is already {}.", lifecycle.state);
      return Ok(());
    }
    lifecycle.state = EngineState::Starting;

    let timeout = self.config.timeout();
    let probe: Arc<dyn HealthProbe> = match protocol {
      Protocol::Http => {
        let session = http_client::build(timeout, 1);
        lifecycle.session = Some(session.clone());
        Arc::new(HttpProbe::new(session, timeout, self.config.path.clone()))
      }
      Protocol::Tcp => Arc::new(TcpProbe::new(timeout)),
    };

    self.launch(&mut lifecycle, probe);
    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn start_with_probe(&self, probe: Arc<dyn HealthProbe>) {
    let mut lifecycle = lock(&self.lifecycle);
    lifecycle.state = EngineState::Starting;
    self.launch(&mut lifecycle, probe);
  }

  fn launch(&self, lifecycle: &mut Lifecycle, probe: Arc<dyn HealthProbe>) {
    let checker = Arc::new(Checker {
      pool: self.pool.clone(),
      probe,
      retries: self.config.retries,
      retry_delay: self.config.retry_delay(),
      interval: self.config.interval(),
    });
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(checker.run(shutdown.clone()));

    lifecycle.worker = Some(Worker { shutdown, handle });
    lifecycle.state = EngineState::Running;
    info!("Health checker has begun.");
  }

  /// Stops the loop after the current cycle and releases the HTTP session.
  /// Safe to call repeatedly and before `start`.
  pub async fn close(&self) {
    let worker = {
      let mut lifecycle = lock(&self.lifecycle);
      if lifecycle.state == EngineState::Running {
        lifecycle.state = EngineState::Stopping;
        info!("Shutting down health checker.");
      }
      lifecycle.worker.take()
    };

    if let Some(worker) = worker {
      worker.shutdown.cancel();
      match worker.handle.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => info!("Health check task cancelled."),
        Err(e) => error!("Health check task failed: {}", e),
      }
    }

    let mut lifecycle = lock(&self.lifecycle);
    if lifecycle.session.take().is_some() {
      info!("HTTP session closed.");
    }
    if lifecycle.state == EngineState::Stopping {
      lifecycle.state = EngineState::Stopped;
    }
  }
}

#[derive(Debug)]
struct Checker {
  pool: Arc<ServerPool>,
  probe: Arc<dyn HealthProbe>,
  retries: u32,
  retry_delay: Duration,
  interval: Duration,
}

impl Checker {
  async fn run(self: Arc<Self>, shutdown: CancellationToken) {
    while !shutdown.is_cancelled() {
      self.clone().check_all(&shutdown).await;

      tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = sleep(self.interval) => {}
      }
    }
    info!("Health check loop stopped.");
  }

  /// One cycle: every server of a snapshot is checked concurrently and the cycle ends when the
  /// slowest check does.
  async fn check_all(self: Arc<Self>, shutdown: &CancellationToken) {
    let servers = self.pool.all_servers().to_vec();
    if servers.is_empty() {
      warn!("No servers available for health checks.");
      return;
    }

    let checks = servers.into_iter().map(|server| {
      let checker = self.clone();
      let shutdown = shutdown.clone();
      tokio::spawn(async move { checker.check_server(&server, &shutdown).await })
    });
    for result in join_all(checks).await {
      if let Err(e) = result {
        error!("Health check of a server failed: {}", e);
      }
    }
  }

  /// A probe that panics counts as a failed attempt.
  async fn attempt(&self, server: &Server) -> bool {
    match AssertUnwindSafe(self.probe.check_health(server)).catch_unwind().await {
      Ok(healthy) => healthy,
      Err(_) => {
        error!("Health probe for server {} panicked.", server);
        false
      }
    }
  }

  /// Up to `retries` sequential attempts with exponential backoff in between. A stop request
  /// during a backoff abandons the remaining attempts and leaves the health flag untouched.
  async fn check_server(&self, server: &Server, shutdown: &CancellationToken) {
    for attempt in 1..=self.retries {
      if self.attempt(server).await {
        if self.pool.mark_healthy(server) {
          info!("Server {} marked as healthy.", server);
        }
        return;
      }

      error!(
        "Health check failed for server {} (attempt {}/{})",
        server, attempt, self.retries
      );
      if attempt < self.retries {
        let delay = backoff(self.retry_delay, attempt);
        info!("Retrying {} in {:?}...", server, delay);
        tokio::select! {
          _ = shutdown.cancelled() => return,
          _ = sleep(delay) => {}
        }
      }
    }

    if self.pool.mark_unhealthy(server) {
      info!("Server {} marked as unhealthy.", server);
    }
  }
}

/// Delay after the `attempt`-th failure: `base * 2^(attempt - 1)`.
fn backoff(base: Duration, attempt: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
