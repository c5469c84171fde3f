use clap::{Arg, Command};
use flow_balancer::{configuration::Config, error::LoadBalancerError, load_balancer::LoadBalancer, logging};
use log::{error, info};
use std::process;

#[tokio::main]
pub async fn main() {
  let matches = Command::new("flow-balancer")
    .version(env!("CARGO_PKG_VERSION"))
    .about("Layer 4 and layer 7 load balancer")
    .arg(
      Arg::new("config")
        .short('c')
        .long("config")
        .takes_value(true)
        .default_value("config.toml")
        .help("Path to the TOML configuration file"),
    )
    .arg(
      Arg::new("log-file")
        .long("log-file")
        .takes_value(true)
        .help("Additionally write logs to this file, rotated at 1 MiB"),
    )
    .get_matches();

  if let Err(e) = logging::initialize(matches.value_of("log-file")) {
    eprintln!("{}", e);
    process::exit(1);
  }

  let config_path = matches.value_of("config").unwrap_or("config.toml");
  if let Err(e) = run(config_path).await {
    error!("{}", e);
    process::exit(1);
  }
}

async fn run(config_path: &str) -> Result<(), LoadBalancerError> {
  let config = Config::load(config_path)?;
  let load_balancer = LoadBalancer::new(config)?;
  load_balancer.start().await?;

  let signal = tokio::signal::ctrl_c().await;
  info!("LoadBalancer shutdown initiated by user.");
  load_balancer.shutdown().await;
  signal?;
  Ok(())
}
