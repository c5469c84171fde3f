pub mod configuration;
pub mod dispatch;
pub mod error;
pub mod error_response;
pub mod health;
pub mod http_client;
pub mod listeners;
pub mod load_balancer;
pub mod load_balancing;
pub mod logging;
pub mod server;
pub mod server_pool;
pub mod tcp_proxy;
pub mod utils;

#[cfg(test)]
mod test_support;
