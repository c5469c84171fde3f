use super::LoadBalancingStrategy;
use crate::{
  error::LoadBalancerError,
  server_pool::{Server, ServerId},
  utils::lock,
};
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
};

/// Smooth weighted round robin.
///
/// On every selection each candidate's score grows by its weight, the candidate with the
/// highest score wins (earliest in list order on ties) and the winner's score drops by the
/// total weight of the list. Over `total weight` selections every server is picked exactly
/// `weight` times and picks of the heavy servers are interleaved with the light ones, e.g.
/// weights 5/1/1 give `a a b a c a a`.
#[derive(Debug)]
pub struct WeightedRoundRobin {
  scores: Mutex<HashMap<ServerId, i64>>,
}

impl WeightedRoundRobin {
  pub fn new() -> WeightedRoundRobin {
    WeightedRoundRobin {
      scores: Mutex::new(HashMap::new()),
    }
  }
}

impl LoadBalancingStrategy for WeightedRoundRobin {
  fn select_server(&self, servers: &[Arc<Server>]) -> Result<Arc<Server>, LoadBalancerError> {
    if servers.is_empty() {
      return Err(LoadBalancerError::EmptyPool);
    }

    let mut scores = lock(&self.scores);

    let present: HashSet<&ServerId> = servers.iter().map(|server| server.id()).collect();
    scores.retain(|id, _| present.contains(id));

    let mut total_weight = 0i64;
    let mut best: Option<(&Arc<Server>, i64)> = None;
    for server in servers {
      // weight 0 is rejected by configuration validation; treat it as 1 anyway
      let weight = i64::from(server.weight().max(1));
      total_weight += weight;

      let score = scores.entry(server.id().clone()).or_insert(0);
      *score += weight;

      if best.map_or(true, |(_, best_score)| *score > best_score) {
        best = Some((server, *score));
      }
    }

    let (chosen, _) = best.ok_or(LoadBalancerError::EmptyPool)?;
    if let Some(score) = scores.get_mut(chosen.id()) {
      *score -= total_weight;
    }
    Ok(chosen.clone())
  }
}
