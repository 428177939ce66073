//! beacond - multicast DNS responder daemon.
//!
//! Claims this machine's host name and the static hosts file on the local
//! link, probing for conflicts and announcing the records once they are ours.

mod config;
mod publisher;
mod runner;
mod static_hosts;
mod transport;

use anyhow::Context;
use beacon_util::LogConfig;
use clap::Parser;
use config::DaemonConfig;
use runner::Daemon;
use std::path::PathBuf;
use tracing::info;
use transport::LoggingTransport;

#[derive(Parser)]
#[command(name = "beacond")]
#[command(author, version, about = "Multicast DNS responder daemon", long_about = None)]
struct Cli {
    /// Config file (defaults to <config_dir>/beacon/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Static hosts file, overriding the config
    #[arg(long)]
    hosts: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration and hosts file, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = DaemonConfig::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;
    if let Some(hosts) = cli.hosts {
        config.hosts_file = Some(hosts);
    }

    beacon_util::log::init(if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig {
            level: config.log_level,
            ..LogConfig::default()
        }
    });

    if cli.check {
        return check(&config, source);
    }

    match &source {
        Some(path) => info!(path = %path.display(), "using config file"),
        None => info!("no config file, using defaults"),
    }

    let daemon = Daemon::new(&config, LoggingTransport::new())?;
    let responder = daemon
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let stats = responder.transport().stats();
    info!(
        probes = stats.probes,
        responses = stats.responses,
        goodbyes = stats.goodbyes,
        "responder stopped"
    );
    Ok(())
}

/// Print what the daemon would publish.
fn check(config: &DaemonConfig, source: Option<PathBuf>) -> anyhow::Result<()> {
    let hosts = match config.hosts_path() {
        Some(path) => static_hosts::StaticHosts::load(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => static_hosts::StaticHosts::new(),
    };

    println!(
        "config: {}",
        source
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string())
    );
    println!("log level: {}", config.log_level.as_str());
    println!("interfaces: {}", config.interfaces.len());
    if config.addresses.is_empty() {
        println!("host name: not published (no addresses)");
    } else {
        println!(
            "host name: {} ({} addresses)",
            config.resolved_host_name()?,
            config.addresses.len()
        );
    }
    println!("static hosts: {}", hosts.len());
    for host in hosts.hosts() {
        println!("  {} {}", host.host, host.ip);
    }
    println!("configuration ok");
    Ok(())
}
