use crate::{dispatch::Dispatcher, listeners::ACCEPT_ERROR_DELAY};
use log::{debug, error, info, warn};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
  io::{copy_bidirectional, AsyncWriteExt},
  net::{TcpListener, TcpStream},
  time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Accepts connections until `shutdown` fires. Relays already running are left alone.
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      accepted = listener.accept() => match accepted {
        Ok((client, client_address)) => {
          let dispatcher = dispatcher.clone();
          tokio::spawn(async move { relay(client, client_address, &dispatcher).await });
        }
        Err(e) => {
          error!("Failed to accept TCP connection: {}", e);
          if !back_off(&shutdown).await {
            break;
          }
        }
      },
    }
  }
  info!("TCP listener stopped.");
}

/// Waits `ACCEPT_ERROR_DELAY` before the next accept. Returns false if `shutdown` fired meanwhile.
async fn back_off(shutdown: &CancellationToken) -> bool {
  tokio::select! {
    _ = shutdown.cancelled() => false,
    _ = sleep(ACCEPT_ERROR_DELAY) => true,
  }
}

async fn relay(mut client: TcpStream, client_address: SocketAddr, dispatcher: &Dispatcher) {
  let lease = match dispatcher.select() {
    Ok(lease) => lease,
    Err(e) => {
      error!(
        "No healthy servers available to handle the TCP connection from {}: {}",
        client_address, e
      );
      close(client).await;
      return;
    }
  };
  info!("Forwarding TCP connection from {} to: {}", client_address, lease.id());

  let connect = TcpStream::connect((lease.host(), lease.port()));
  let mut backend = match timeout(dispatcher.backend_timeout(), connect).await {
    Ok(Ok(backend)) => backend,
    Ok(Err(e)) => {
      error!("Error forwarding TCP connection to {}: {}", lease.id(), e);
      close(client).await;
      return;
    }
    Err(_) => {
      error!("Timed out connecting to {}", lease.id());
      close(client).await;
      return;
    }
  };

  // EOF on one leg shuts down the write half of the other, an error drops both sockets
  match copy_bidirectional(&mut client, &mut backend).await {
    Ok((to_backend, to_client)) => debug!(
      "Relay {} <-> {} finished, {} bytes sent, {} bytes received",
      client_address,
      lease.id(),
      to_backend,
      to_client
    ),
    Err(e) => warn!("Relay {} <-> {} aborted: {}", client_address, lease.id(), e),
  }
}

async fn close(mut client: TcpStream) {
  if let Err(e) = client.shutdown().await {
    debug!("Failed to shut down client connection: {}", e);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    load_balancing::Algorithm,
    server_pool::{Server, ServerPool},
    test_support::{closed_port, spawn_echo_backend},
  };
  use std::time::Duration;
  use tokio::io::AsyncReadExt;

  async fn balancer(ports: &[u16]) -> (SocketAddr, Arc<ServerPool>, CancellationToken) {
    let pool = Arc::new(ServerPool::new(
      ports.iter().map(|port| Server::new("127.0.0.1", *port, 1)).collect(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
      pool.clone(),
      Arc::new(Algorithm::LeastConnections.into()),
      Duration::from_secs(2),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, dispatcher, shutdown.clone()));
    (address, pool, shutdown)
  }

  async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await;
    received
  }

  #[tokio::test]
  pub async fn relays_both_directions_and_propagates_half_close() {
    let backend = spawn_echo_backend().await;
    let (address, pool, shutdown) = balancer(&[backend.port()]).await;

    let mut client = TcpStream::connect(address).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(read_all(&mut client).await, b"ping");

    // the relay task drops its lease right after both legs are closed
    for _ in 0..100 {
      if pool.all_servers()[0].active_connections() == 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.all_servers()[0].active_connections(), 0);
    shutdown.cancel();
  }

  #[tokio::test]
  pub async fn closes_client_without_healthy_servers() {
    let backend = spawn_echo_backend().await;
    let (address, pool, shutdown) = balancer(&[backend.port()]).await;
    pool.mark_unhealthy(&pool.all_servers()[0]);

    let mut client = TcpStream::connect(address).await.unwrap();

    assert!(read_all(&mut client).await.is_empty());
    shutdown.cancel();
  }

  #[tokio::test]
  pub async fn closes_client_when_backend_refuses() {
    let (address, pool, shutdown) = balancer(&[closed_port().await]).await;

    let mut client = TcpStream::connect(address).await.unwrap();

    assert!(read_all(&mut client).await.is_empty());
    assert!(pool.all_servers()[0].is_healthy());
    shutdown.cancel();
  }

  #[tokio::test(start_paused = true)]
  pub async fn accept_errors_are_throttled() {
    let shutdown = CancellationToken::new();

    let started = tokio::time::Instant::now();
    assert!(back_off(&shutdown).await);
    assert_eq!(started.elapsed(), ACCEPT_ERROR_DELAY);
  }

  #[tokio::test]
  pub async fn shutdown_interrupts_accept_error_pause() {
    tokio::time::pause();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let started = tokio::time::Instant::now();
    assert!(!back_off(&shutdown).await);
    assert_eq!(started.elapsed(), Duration::ZERO);
  }

  #[tokio::test]
  pub async fn stops_accepting_after_shutdown() {
    let backend = spawn_echo_backend().await;
    let (address, _, shutdown) = balancer(&[backend.port()]).await;

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(TcpStream::connect(address).await.is_err());
  }
}
