use hyper::{client::HttpConnector, Body, Client};
use hyper_timeout::TimeoutConnector;
use std::time::Duration;

pub type TimeoutClient = Client<TimeoutConnector<HttpConnector>, Body>;

/// Builds a client whose connect, read and write operations each give up after `timeout`.
///
/// `max_idle_per_host` of zero disables keep-alive pooling toward backends.
pub fn build(timeout: Duration, max_idle_per_host: usize) -> TimeoutClient {
  let mut connector = TimeoutConnector::new(HttpConnector::new());
  connector.set_connect_timeout(Some(timeout));
  connector.set_read_timeout(Some(timeout));
  connector.set_write_timeout(Some(timeout));

  Client::builder()
    .pool_max_idle_per_host(max_idle_per_host)
    .build::<_, Body>(connector)
}
