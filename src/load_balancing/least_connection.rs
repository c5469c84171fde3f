use super::LoadBalancingStrategy;
use crate::{
  error::LoadBalancerError,
  server_pool::{Server, ServerId},
  utils::lock,
};
use log::warn;
use rand::{seq::SliceRandom, thread_rng};
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
};

#[derive(Debug)]
pub struct LeastConnection {
  connections: Mutex<HashMap<ServerId, usize>>,
}

impl LeastConnection {
  pub fn new() -> LeastConnection {
    LeastConnection {
      connections: Mutex::new(HashMap::new()),
    }
  }

  #[cfg(test)]
  fn connections_of(&self, id: &ServerId) -> Option<usize> {
    lock(&self.connections).get(id).copied()
  }
}

impl LoadBalancingStrategy for LeastConnection {
  fn select_server(&self, servers: &[Arc<Server>]) -> Result<Arc<Server>, LoadBalancerError> {
    if servers.is_empty() {
      return Err(LoadBalancerError::EmptyPool);
    }

    let mut connections = lock(&self.connections);

    for server in servers {
      connections.entry(server.id().clone()).or_insert(0);
    }

    // forget servers that left the pool, otherwise the map grows with every membership change
    let present: HashSet<&ServerId> = servers.iter().map(|server| server.id()).collect();
    connections.retain(|id, _| present.contains(id));

    // shuffling first spreads ties instead of always favouring the first server
    let mut candidates: Vec<&Arc<Server>> = servers.iter().collect();
    candidates.shuffle(&mut thread_rng());

    let chosen = candidates
      .into_iter()
      .min_by_key(|server| connections.get(server.id()).copied().unwrap_or(0))
      .ok_or(LoadBalancerError::EmptyPool)?
      .clone();

    *connections.entry(chosen.id().clone()).or_insert(0) += 1;
    Ok(chosen)
  }

  fn release_server(&self, server: &Server) {
    let mut connections = lock(&self.connections);
    match connections.get_mut(server.id()) {
      Some(count) if *count > 0 => *count -= 1,
      Some(_) => warn!("Ignoring release of {}, it has no open connections", server),
      None => warn!("Ignoring release of {}, it is not tracked", server),
    }
  }
}
