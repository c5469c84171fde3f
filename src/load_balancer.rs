use crate::{
  configuration::Config,
  dispatch::{Dispatcher, Protocol},
  error::LoadBalancerError,
  health::HealthCheck,
  listeners,
  load_balancing::{Algorithm, AlgorithmContext},
  server,
  server_pool::ServerPool,
  tcp_proxy,
  utils::lock,
};
use log::{error, info, warn};
use std::{net::SocketAddr, sync::Arc, sync::Mutex};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct ListenerTask {
  local_addr: SocketAddr,
  shutdown: CancellationToken,
  handle: JoinHandle<()>,
}

/// Ties the pool, the health checker and the configured front end together.
pub struct LoadBalancer {
  config: Config,
  pool: Arc<ServerPool>,
  algorithm: Arc<AlgorithmContext>,
  health_check: HealthCheck,
  listener: Mutex<Option<ListenerTask>>,
}

impl LoadBalancer {
  pub fn new(config: Config) -> Result<LoadBalancer, LoadBalancerError> {
    let algorithm: Algorithm = config.load_balance.algorithm.parse()?;
    let pool = Arc::new(ServerPool::from(config.load_balance.servers.as_slice()));
    let health_check = HealthCheck::new(
      pool.clone(),
      config.health_check.clone(),
      config.listen.protocol.clone(),
    );

    Ok(LoadBalancer {
      config,
      pool,
      algorithm: Arc::new(algorithm.into()),
      health_check,
      listener: Mutex::new(None),
    })
  }

  pub fn pool(&self) -> &Arc<ServerPool> {
    &self.pool
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    lock(&self.listener).as_ref().map(|task| task.local_addr)
  }

  /// Starts health checking and the listener, then returns the bound address. The front end
  /// keeps running in the background until `shutdown`.
  pub async fn start(&self) -> Result<SocketAddr, LoadBalancerError> {
    if let Some(local_addr) = self.local_addr() {
      warn!("LoadBalancer is already listening on {}.", local_addr);
      return Ok(local_addr);
    }

    let protocol = self.config.listen.protocol.parse::<Protocol>().map_err(|e| {
      error!("Unsupported protocol: {}", self.config.listen.protocol);
      e
    })?;

    self.health_check.start()?;

    let address = self.config.listen.address();
    let listener = match bind(&address).await {
      Ok(listener) => listener,
      Err(e) => {
        error!("Failed to start {} server: {}", protocol.to_string().to_uppercase(), e);
        self.shutdown().await;
        return Err(e);
      }
    };
    let local_addr = listener.local_addr()?;

    let dispatcher = Arc::new(Dispatcher::new(
      self.pool.clone(),
      self.algorithm.clone(),
      self.config.listen.backend_timeout(),
    ));
    let shutdown = CancellationToken::new();
    let handle = match protocol {
      Protocol::Http => {
        let acceptor = listeners::incoming(listener);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
          if let Err(e) = server::create(acceptor, dispatcher, shutdown).await {
            error!("{}", e);
          }
        })
      }
      Protocol::Tcp => tokio::spawn(tcp_proxy::serve(listener, dispatcher, shutdown.clone())),
    };
    info!(
      "{} server listening on {}",
      protocol.to_string().to_uppercase(),
      local_addr
    );

    *lock(&self.listener) = Some(ListenerTask {
      local_addr,
      shutdown,
      handle,
    });
    info!("LoadBalancer started.");
    Ok(local_addr)
  }

  /// Stops health checking and the listener. Safe to call more than once.
  pub async fn shutdown(&self) {
    info!("Initiating LoadBalancer shutdown...");
    self.health_check.close().await;

    let listener = lock(&self.listener).take();
    if let Some(task) = listener {
      task.shutdown.cancel();
      if let Err(e) = task.handle.await {
        error!("Listener task failed: {}", e);
      }
    }
    info!("LoadBalancer shutdown completed.");
  }
}

async fn bind(address: &str) -> Result<TcpListener, LoadBalancerError> {
  TcpListener::bind(address)
    .await
    .map_err(|source| LoadBalancerError::Bind {
      address: address.to_string(),
      source,
    })
}
