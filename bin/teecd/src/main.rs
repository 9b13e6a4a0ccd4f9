//! Composition root for the TEE client-side daemon: probes the driver,
//! brings up the authentication broker, registers the host agents, and
//! stands up the POSIX proxy, then blocks until the broker stops.

#![deny(unused_must_use, rust_2018_idioms)]

mod config;
mod error;
mod runtime;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::TeecdError;
use runtime::Runtime;

#[derive(Parser)]
#[command(name = "teecd", about = "TEE client-side daemon: broker, agents, and POSIX proxy")]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used for any
    /// field it omits, and entirely if no path is given.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(TeecdError::Config(e).exit_code());
        }
    };

    if let Some(addr) = config.metrics_listen_addr.as_deref() {
        if let Err(e) = spawn_metrics_exporter(addr) {
            tracing::warn!(error = %e, addr, "metrics exporter did not start, continuing without it");
        }
    }

    let runtime = match Runtime::start(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "startup self-check failed");
            std::process::exit(e.exit_code());
        }
    };

    tracing::info!("teecd up: broker, agents, and posix proxy are all serving");
    runtime.wait();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

/// Install a Prometheus recorder and serve it over HTTP on its own
/// dedicated runtime thread, since the rest of this daemon is
/// thread-per-component rather than async.
fn spawn_metrics_exporter(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async { PrometheusBuilder::new().with_http_listener(addr).install() })?;
    std::thread::Builder::new().name("teecd-metrics".into()).spawn(move || {
        rt.block_on(std::future::pending::<()>());
    })?;
    Ok(())
}
