use super::LoadBalancingStrategy;
use crate::{error::LoadBalancerError, server_pool::Server, utils::lock};
use std::sync::{Arc, Mutex};

/// Plain round robin. The index is taken modulo the length of whatever list the current call
/// receives, so fairness is only approximate while the healthy subset changes.
#[derive(Debug)]
pub struct RoundRobin {
  next: Mutex<usize>,
}

impl RoundRobin {
  pub fn new() -> RoundRobin {
    RoundRobin { next: Mutex::new(0) }
  }
}

impl LoadBalancingStrategy for RoundRobin {
  fn select_server(&self, servers: &[Arc<Server>]) -> Result<Arc<Server>, LoadBalancerError> {
    if servers.is_empty() {
      return Err(LoadBalancerError::EmptyPool);
    }

    let mut next = lock(&self.next);
    let index = *next % servers.len();
    *next = (index + 1) % servers.len();
    Ok(servers[index].clone())
  }
}
