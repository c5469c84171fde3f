use async_stream::stream;
use futures::Stream;
use log::error;
use std::{
  io,
  net::SocketAddr,
  pin::Pin,
  task::{Context, Poll},
  time::Duration,
};
use tokio::net::{TcpListener, TcpStream};

/// Pause after a failed accept, typically the process ran out of file descriptors.
pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

pub struct HyperAcceptor<'a, T> {
  acceptor: Pin<Box<dyn Stream<Item = Result<T, io::Error>> + Send + 'a>>,
}

impl hyper::server::accept::Accept for HyperAcceptor<'_, TcpStream> {
  type Conn = TcpStream;
  type Error = io::Error;

  fn poll_accept(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Result<Self::Conn, Self::Error>>> {
    Pin::new(&mut self.acceptor).poll_next(cx)
  }
}

/// Feeds the connections of an already bound listener to hyper. Accept failures are logged
/// and skipped, they never end the server.
pub fn incoming(listener: TcpListener) -> HyperAcceptor<'static, TcpStream> {
  let incoming_stream = stream! {
    loop {
      match listener.accept().await {
        Ok((socket, _)) => yield Ok::<_, io::Error>(socket),
        Err(e) => {
          error!("Failed to accept HTTP connection: {}", e);
          // give in-flight requests a moment to finish and free descriptors
          tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
        }
      }
    }
  };

  HyperAcceptor {
    acceptor: Box::pin(incoming_stream),
  }
}

pub trait RemoteAddress {
  fn remote_addr(&self) -> io::Result<SocketAddr>;
}

impl RemoteAddress for TcpStream {
  fn remote_addr(&self) -> io::Result<SocketAddr> {
    self.peer_addr()
  }
}
