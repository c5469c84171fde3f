use super::HealthProbe;
use crate::{http_client::TimeoutClient, server_pool::Server};
use async_trait::async_trait;
use hyper::{http::uri, StatusCode, Uri};
use log::{debug, warn};
use std::time::Duration;
use tokio::time::timeout;

/// Healthy iff `GET http://{host}:{port}{path}` answers with exactly 200 in time.
#[derive(Debug)]
pub struct HttpProbe {
  session: TimeoutClient,
  timeout: Duration,
  path: String,
}

impl HttpProbe {
  pub fn new(session: TimeoutClient, timeout: Duration, path: String) -> HttpProbe {
    HttpProbe { session, timeout, path }
  }

  fn health_uri(&self, server: &Server) -> Result<Uri, hyper::http::Error> {
    uri::Uri::builder()
      .scheme("http")
      .authority(server.id().authority().as_str())
      .path_and_query(self.path.as_str())
      .build()
  }
}

#[async_trait]
impl HealthProbe for HttpProbe {
  async fn check_health(&self, server: &Server) -> bool {
    let uri = match self.health_uri(server) {
      Ok(uri) => uri,
      Err(e) => {
        warn!("Cannot build health check URI for {}: {}.", server, e);
        return false;
      }
    };

    match timeout(self.timeout, self.session.get(uri)).await {
      Ok(Ok(response)) if response.status() == StatusCode::OK => {
        debug!("HTTP health check passed for {}.", server);
        true
      }
      Ok(Ok(response)) => {
        warn!("HTTP health check failed for {}: status {}.", server, response.status());
        false
      }
      Ok(Err(e)) => {
        warn!("HTTP health check client error for {}: {}.", server, e);
        false
      }
      Err(_) => {
        warn!("HTTP health check timed out for {}.", server);
        false
      }
    }
  }
}
