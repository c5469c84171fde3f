use hyper::{Body, Response, StatusCode};
use log::error;
use std::error::Error;

pub fn service_unavailable() -> Response<Body> {
  empty(StatusCode::SERVICE_UNAVAILABLE)
}

pub fn handle_bad_gateway<E: Error>(error: E) -> Response<Body> {
  log_error(error);
  bad_gateway()
}

pub fn bad_gateway() -> Response<Body> {
  empty(StatusCode::BAD_GATEWAY)
}

pub fn log_error<E: Error>(error: E) {
  error!("{}", error);
}

fn empty(status: StatusCode) -> Response<Body> {
  let mut response = Response::new(Body::empty());
  *response.status_mut() = status;
  response
}
