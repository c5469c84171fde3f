use crate::{error::LoadBalancerError, server_pool::Server};
use arc_swap::ArcSwap;
use std::{fmt, str::FromStr, sync::Arc};

pub mod least_connection;
pub mod round_robin;
pub mod weighted_round_robin;

use least_connection::LeastConnection;
use round_robin::RoundRobin;
use weighted_round_robin::WeightedRoundRobin;

/// A selection policy. Implementations serialize their own state mutation, so a single
/// instance may be shared by every dispatch path.
pub trait LoadBalancingStrategy: fmt::Debug + Send + Sync {
  fn select_server(&self, servers: &[Arc<Server>]) -> Result<Arc<Server>, LoadBalancerError>;

  /// Called once the work assigned by `select_server` is done. Most strategies don't care.
  fn release_server(&self, _server: &Server) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
  RoundRobin,
  WeightedRoundRobin,
  LeastConnections,
}

impl FromStr for Algorithm {
  type Err = LoadBalancerError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "round_robin" => Ok(Algorithm::RoundRobin),
      "weighted_round_robin" => Ok(Algorithm::WeightedRoundRobin),
      "least_connections" => Ok(Algorithm::LeastConnections),
      _ => Err(LoadBalancerError::UnknownAlgorithm(s.to_string())),
    }
  }
}

impl fmt::Display for Algorithm {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Algorithm::RoundRobin => write!(f, "round_robin"),
      Algorithm::WeightedRoundRobin => write!(f, "weighted_round_robin"),
      Algorithm::LeastConnections => write!(f, "least_connections"),
    }
  }
}

impl From<Algorithm> for Box<dyn LoadBalancingStrategy> {
  fn from(other: Algorithm) -> Self {
    match other {
      Algorithm::RoundRobin => Box::new(RoundRobin::new()),
      Algorithm::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
      Algorithm::LeastConnections => Box::new(LeastConnection::new()),
    }
  }
}

/// Holds the active strategy. Swapping only affects selections that start afterwards.
#[derive(Debug)]
pub struct AlgorithmContext {
  strategy: ArcSwap<Box<dyn LoadBalancingStrategy>>,
}

impl AlgorithmContext {
  pub fn new(strategy: Box<dyn LoadBalancingStrategy>) -> AlgorithmContext {
    AlgorithmContext {
      strategy: ArcSwap::from_pointee(strategy),
    }
  }

  pub fn set_algorithm(&self, strategy: Box<dyn LoadBalancingStrategy>) {
    self.strategy.store(Arc::new(strategy));
  }

  pub fn execute(&self, servers: &[Arc<Server>]) -> Result<Arc<Server>, LoadBalancerError> {
    self.strategy.load().select_server(servers)
  }

  pub fn release(&self, server: &Server) {
    self.strategy.load().release_server(server)
  }
}

impl From<Algorithm> for AlgorithmContext {
  fn from(other: Algorithm) -> Self {
    AlgorithmContext::new(other.into())
  }
}

#[cfg(test)]
pub(crate) fn servers(ports: &[u16]) -> Vec<Arc<Server>> {
  ports
    .iter()
    .map(|port| Arc::new(Server::new("127.0.0.1", *port, 1)))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  pub fn algorithm_tags_parse_case_insensitive() {
    assert_eq!("round_robin".parse::<Algorithm>().unwrap(), Algorithm::RoundRobin);
    assert_eq!(
      "Weighted_Round_Robin".parse::<Algorithm>().unwrap(),
      Algorithm::WeightedRoundRobin
    );
    assert_eq!(
      "LEAST_CONNECTIONS".parse::<Algorithm>().unwrap(),
      Algorithm::LeastConnections
    );
    assert!(matches!(
      "random".parse::<Algorithm>(),
      Err(LoadBalancerError::UnknownAlgorithm(name)) if name == "random"
    ));
  }

  #[test]
  pub fn round_robin_scenario_visits_configured_order() {
    let context = AlgorithmContext::from(Algorithm::RoundRobin);
    let servers = servers(&[1, 2, 3]);

    let ports: Vec<u16> = (0..4).map(|_| context.execute(&servers).unwrap().port()).collect();
    assert_eq!(ports, vec![1, 2, 3, 1]);
  }

  #[test]
  pub fn least_connections_scenario_prefers_released_server() {
    let context = AlgorithmContext::from(Algorithm::LeastConnections);
    let servers = servers(&[1, 2]);

    let first = context.execute(&servers).unwrap();
    let second = context.execute(&servers).unwrap();
    assert_ne!(first.id(), second.id());

    context.release(&second);
    assert_eq!(context.execute(&servers).unwrap().id(), second.id());
  }

  #[test]
  pub fn release_is_ignored_by_round_robin() {
    let context = AlgorithmContext::from(Algorithm::RoundRobin);
    let servers = servers(&[1, 2]);

    let first = context.execute(&servers).unwrap();
    context.release(&first);
    assert_eq!(context.execute(&servers).unwrap().port(), 2);
  }

  #[test]
  pub fn swapped_algorithm_is_used_for_next_selection() {
    let context = AlgorithmContext::from(Algorithm::RoundRobin);
    let servers = servers(&[1, 2]);
    assert_eq!(context.execute(&servers).unwrap().port(), 1);

    context.set_algorithm(Algorithm::LeastConnections.into());
    let first = context.execute(&servers).unwrap();
    let second = context.execute(&servers).unwrap();
    assert_ne!(first.port(), second.port());
  }

  #[test]
  pub fn every_algorithm_rejects_empty_list() {
    for algorithm in [
      Algorithm::RoundRobin,
      Algorithm::WeightedRoundRobin,
      Algorithm::LeastConnections,
    ] {
      let context = AlgorithmContext::from(algorithm);
      assert!(matches!(context.execute(&[]), Err(LoadBalancerError::EmptyPool)));
    }
  }
}
