//! Loopback backends for tests.

use crate::listeners;
use hyper::{
  service::{make_service_fn, service_fn},
  Body, Request, Response, Server, StatusCode,
};
use std::{convert::Infallible, net::SocketAddr};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpListener,
};

/// Answers every request with `status` and a body of `"{method} {uri} {payload}"`.
/// The `x-test` request header is mirrored back as `x-echo`.
pub async fn spawn_http_backend(status: StatusCode) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();

  let service = make_service_fn(move |_| async move {
    Ok::<_, Infallible>(service_fn(move |request: Request<Body>| async move {
      let mut response = Response::builder().status(status);
      if let Some(value) = request.headers().get("x-test") {
        response = response.header("x-echo", value.clone());
      }
      let (parts, body) = request.into_parts();
      let payload = hyper::body::to_bytes(body).await.unwrap_or_default();
      let text = format!("{} {} {}", parts.method, parts.uri, String::from_utf8_lossy(&payload));
      Ok::<_, Infallible>(response.body(Body::from(text.trim_end().to_string())).unwrap())
    }))
  });

  tokio::spawn(Server::builder(listeners::incoming(listener)).serve(service));
  address
}

/// Accepts connections and never answers.
pub async fn spawn_silent_backend() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let mut open = Vec::new();
    while let Ok((socket, _)) = listener.accept().await {
      open.push(socket);
    }
  });
  address
}

/// Echoes every byte back and closes its write side once the peer has finished writing.
pub async fn spawn_echo_backend() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  tokio::spawn(async move {
    while let Ok((mut socket, _)) = listener.accept().await {
      tokio::spawn(async move {
        let mut buffer = [0u8; 1024];
        loop {
          match socket.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
              if socket.write_all(&buffer[..n]).await.is_err() {
                break;
              }
            }
          }
        }
        let _ = socket.shutdown().await;
      });
    }
  });
  address
}

/// A loopback port nothing listens on.
pub async fn closed_port() -> u16 {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  listener.local_addr().unwrap().port()
}
