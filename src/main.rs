//! WiseNode - Software-Defined Wireless Sensor Network Node
//!
//! Runs one node process: a mote, or a sink when a controller address is
//! configured. The bootstrap validates the startup options, builds the
//! matching worker and blocks until it terminates.

mod config;
mod discovery;
mod network;
mod protocol;

use std::net::SocketAddrV4;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{ConfigError, FileConfig, NodeConfig, Role, ValidatedConfig};
use network::{LinkConfig, Mote, Node, Sink};

/// WiseNode - software-defined wireless sensor network node
#[derive(Parser)]
#[command(name = "wisenode")]
#[command(author = "WiseNode Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run a sensor network node as a mote or a sink", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Network id of the node (0-255)
    #[arg(short = 'n', long, value_name = "ID")]
    net_id: Option<u16>,

    /// Address of the node, `high.low` or 0-65535
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listening UDP port
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Topology file used for neighbor discovery
    #[arg(short = 't', long, value_name = "FILE")]
    topology: Option<PathBuf>,

    /// Listening IP address; defaults to the host's resolvable address
    #[arg(short = 'i', long, value_name = "IP")]
    ip: Option<String>,

    /// Log level: error, warn, info, debug or trace
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// IP address and TCP port of the controller (sink only)
    #[arg(short = 'c', long, value_name = "HOST:PORT")]
    controller: Option<String>,

    /// Datapath id of the switch (sink only)
    #[arg(long, value_name = "DPID")]
    switch_dpid: Option<String>,

    /// MAC address of the switch, e.g. 00:00:00:00:00:00 (sink only)
    #[arg(long, value_name = "MAC")]
    switch_mac: Option<String>,

    /// Port number of the switch (sink only)
    #[arg(long, value_name = "PORT")]
    switch_port: Option<u64>,
}

impl From<&Cli> for NodeConfig {
    fn from(cli: &Cli) -> Self {
        NodeConfig {
            net_id: cli.net_id,
            address: cli.address.clone(),
            port: cli.port,
            ip: cli.ip.clone(),
            topology: cli.topology.clone(),
            log_level: cli.log_level.clone(),
            controller: cli.controller.clone(),
            switch_dpid: cli.switch_dpid.clone(),
            switch_mac: cli.switch_mac.clone(),
            switch_port: cli.switch_port,
        }
    }
}

fn load_config(cli: &Cli) -> Result<ValidatedConfig, ConfigError> {
    let fallback = match &cli.config {
        Some(path) => FileConfig::load(path)?.into(),
        None => NodeConfig::default(),
    };
    NodeConfig::from(cli).merged_with(fallback).validate()
}

/// The socket the controller can reach this sink on.
async fn registration_endpoint(config: &ValidatedConfig) -> anyhow::Result<SocketAddrV4> {
    match &config.ip {
        Some(ip) => Ok(config::registration_socket(ip, config.port)?),
        None => Ok(network::local_ipv4_socket(config.port).await?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration problems end the process before any worker starts.
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    // Initialize logging; default is highest severity only
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|_| anyhow::anyhow!("invalid log level {:?}", config.log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let node: Box<dyn Node> = match config.role.clone() {
        Role::Mote => {
            tracing::info!("starting mote {} on network {}", config.address, config.net_id);
            Box::new(Mote::new(&config)?)
        }
        Role::Sink { controller, switch } => {
            let reachable = registration_endpoint(&config).await?;
            tracing::info!(
                "starting sink {} on network {}, controller {}",
                config.address,
                config.net_id,
                controller
            );
            Box::new(Sink::new(
                &config,
                controller,
                switch,
                reachable,
                LinkConfig::default(),
            )?)
        }
    };

    // Cooperative shutdown: ctrl-c nudges the worker between iterations.
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    // The bootstrap owns exactly one worker and waits for it.
    let worker = tokio::spawn(node.run(shutdown_rx));
    worker.await??;

    tracing::info!("node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_mote() {
        let cli = Cli::try_parse_from([
            "wisenode",
            "-n",
            "1",
            "-a",
            "0.1",
            "-p",
            "7001",
            "-t",
            "topology.txt",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert!(matches!(config.role, Role::Mote));
    }

    #[test]
    fn test_cli_sink_missing_switch_identity_fails() {
        let cli = Cli::try_parse_from([
            "wisenode",
            "-n",
            "1",
            "-a",
            "0.1",
            "-p",
            "7001",
            "-t",
            "topology.txt",
            "-c",
            "127.0.0.1:6653",
            "--switch-dpid",
            "sw1",
            "--switch-port",
            "9",
        ])
        .unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("--switch-mac")));
    }

    #[test]
    fn test_cli_full_sink() {
        let cli = Cli::try_parse_from([
            "wisenode",
            "-n",
            "1",
            "-a",
            "0.1",
            "-p",
            "7001",
            "-t",
            "topology.txt",
            "-c",
            "127.0.0.1:6653",
            "--switch-dpid",
            "sw1",
            "--switch-mac",
            "aa:bb:cc:dd:ee:ff",
            "--switch-port",
            "9",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert!(matches!(config.role, Role::Sink { .. }));
    }
}
