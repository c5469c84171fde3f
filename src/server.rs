use crate::{
  dispatch::{ConnectionLease, Dispatcher},
  error_response::{bad_gateway, handle_bad_gateway, service_unavailable},
  http_client::{self, TimeoutClient},
  listeners::RemoteAddress,
};
use async_stream::stream;
use futures::{Future, TryFutureExt};
use hyper::{
  body::HttpBody,
  http::uri,
  server::accept::Accept,
  service::{make_service_fn, Service},
  Body, Request, Response, Server,
};
use log::{debug, error, info};
use std::{
  convert::Infallible,
  error::Error,
  io,
  net::SocketAddr,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Serves HTTP on the given acceptor until `shutdown` fires, then drains in-flight requests.
pub async fn create<I, IE, IO>(
  acceptor: I,
  dispatcher: Arc<Dispatcher>,
  shutdown: CancellationToken,
) -> Result<(), io::Error>
where
  I: Accept<Conn = IO, Error = IE>,
  IE: Into<Box<dyn Error + Send + Sync>>,
  IO: AsyncRead + AsyncWrite + Unpin + Send + RemoteAddress + 'static,
{
  // no idle connections are kept, every forwarded request opens its own
  let client = http_client::build(dispatcher.backend_timeout(), 0);

  let service = make_service_fn(move |stream: &IO| {
    let client_address = stream.remote_addr();
    let dispatcher = dispatcher.clone();
    let client = client.clone();

    async move {
      Ok::<_, io::Error>(MainService {
        client_address: client_address?,
        dispatcher,
        client,
      })
    }
  });

  Server::builder(acceptor)
    .serve(service)
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .map_err(|e| {
      let msg = format!("Failed to listen server: {}", e);
      io::Error::new(io::ErrorKind::Other, msg)
    })
    .await
}

pub struct MainService {
  client_address: SocketAddr,
  dispatcher: Arc<Dispatcher>,
  client: TimeoutClient,
}

impl Service<Request<Body>> for MainService {
  type Response = Response<Body>;
  type Error = Infallible;

  // let's allow this complex type. A refactor would make it more complicated due to the used trait types
  #[allow(clippy::type_complexity)]
  type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

  fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
    Poll::Ready(Ok(()))
  }

  fn call(&mut self, request: Request<Body>) -> Self::Future {
    debug!(
      "{:?} {} {} from {}",
      request.version(),
      request.method(),
      request.uri(),
      self.client_address
    );

    let dispatcher = self.dispatcher.clone();
    let client = self.client.clone();
    Box::pin(async move { Ok(forward(&dispatcher, &client, request).await) })
  }
}

/// Sends the request to one healthy backend. Never retried against another backend.
pub async fn forward(dispatcher: &Dispatcher, client: &TimeoutClient, request: Request<Body>) -> Response<Body> {
  let lease = match dispatcher.select() {
    Ok(lease) => lease,
    Err(e) => {
      error!("No healthy servers available to handle the request: {}", e);
      return service_unavailable();
    }
  };
  info!("Forwarding HTTP request to: {}", lease.id());

  let backend_request = match backend_request(request, &lease) {
    Ok(backend_request) => backend_request,
    Err(e) => return handle_bad_gateway(e),
  };

  match client.request(backend_request).await {
    Ok(response) => release_after_body(response, lease),
    Err(e) => {
      error!("Error forwarding HTTP request to {}: {}", lease.id(), e);
      bad_gateway()
    }
  }
}

fn backend_request(request: Request<Body>, lease: &ConnectionLease) -> Result<Request<Body>, hyper::http::Error> {
  let (parts, body) = request.into_parts();
  let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
  let backend_uri = uri::Uri::builder()
    .scheme("http")
    .authority(lease.id().authority().as_str())
    .path_and_query(path_and_query)
    .build()?;

  let mut builder = Request::builder().method(parts.method).uri(backend_uri);
  if let Some(headers) = builder.headers_mut() {
    headers.extend(parts.headers);
  }
  builder.body(body)
}

/// The lease travels with the response body, so the backend counts as busy until the last
/// byte has been handed to the client or the client went away.
fn release_after_body(response: Response<Body>, lease: ConnectionLease) -> Response<Body> {
  let (parts, mut body) = response.into_parts();
  let body = Body::wrap_stream(stream! {
    let _lease = lease;
    while let Some(chunk) = body.data().await {
      yield chunk;
    }
  });
  Response::from_parts(parts, body)
}
