//! Entry point for `heartbeat`.
//!
//! Parses CLI arguments and dispatches into **server**, **client** or
//! **launch** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, and spawning
//! the actor processes in launch mode).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::process::Command;

use heartbeat::config::{ClientConfig, ServerConfig, DEFAULT_CLIENTS, DEFAULT_HOST, DEFAULT_PORT};
use heartbeat::simulator::SimulatorConfig;
use heartbeat::{client, logging, server};

/// Heartbeat protocol over a simulated unreliable link.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

/// Settings shared by every actor.
#[derive(Args, Clone)]
struct Common {
    /// Server host.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds the actor runs before cancelling its work.
    #[arg(short, long, value_parser = parse_seconds, default_value = "300")]
    alive_time: Duration,
    /// Write `<actor>.log` files here instead of logging to stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Common {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn push_args(&self, cmd: &mut Command) {
        cmd.arg("--host")
            .arg(&self.host)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--alive-time")
            .arg(self.alive_time.as_secs_f64().to_string());
        if let Some(dir) = &self.log_dir {
            cmd.arg("--log-dir").arg(dir);
        }
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Accept clients and answer their requests, with drops and delays.
    Server {
        #[command(flatten)]
        common: Common,
        /// Seconds between keepalives on each connection.
        #[arg(long, value_parser = parse_seconds, default_value = "5")]
        keepalive_interval: Duration,
        /// Probability that a request is silently dropped.
        #[arg(long, value_parser = parse_probability, default_value = "0.1")]
        drop_rate: f64,
        /// Seed for reproducible drop/delay decisions.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Connect to the server and probe it periodically.
    Client {
        #[command(flatten)]
        common: Common,
        /// Actor name, also the log file stem.
        #[arg(short, long, default_value = "client")]
        name: String,
        /// Seed for reproducible request intervals.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run one server process and several client processes.
    Launch {
        #[command(flatten)]
        common: Common,
        /// Number of client processes.
        #[arg(short, long, default_value_t = DEFAULT_CLIENTS)]
        clients: usize,
    },
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{s:?} is not a valid duration: {e}"))
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{s:?} is not a probability in [0, 1]"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            common,
            keepalive_interval,
            drop_rate,
            seed,
        } => {
            logging::init("server", common.log_dir.as_deref())?;
            let config = ServerConfig {
                addr: common.addr(),
                alive_time: common.alive_time,
                keepalive_interval,
                simulator: SimulatorConfig {
                    drop_rate,
                    seed,
                    ..SimulatorConfig::default()
                },
            };
            server::run(config).await.context("server failed")?;
        }
        Mode::Client { common, name, seed } => {
            logging::init(&name, common.log_dir.as_deref())?;
            let config = ClientConfig {
                addr: common.addr(),
                name,
                alive_time: common.alive_time,
                seed,
                ..ClientConfig::default()
            };
            client::run(config).await.context("client failed")?;
        }
        Mode::Launch { common, clients } => {
            logging::init("launcher", common.log_dir.as_deref())?;
            launch(&common, clients).await?;
        }
    }
    Ok(())
}

/// Re-execute this binary as one server and `clients` client processes.
async fn launch(common: &Common, clients: usize) -> Result<()> {
    let exe = std::env::current_exe().context("locating the heartbeat binary")?;
    log::info!(
        "[launch] server + {clients} clients on {} for {:?}",
        common.addr(),
        common.alive_time
    );

    let mut children = Vec::with_capacity(clients + 1);
    let mut server = Command::new(&exe);
    server.arg("server").kill_on_drop(true);
    common.push_args(&mut server);
    children.push((
        "server".to_string(),
        server.spawn().context("spawning the server process")?,
    ));

    for index in 1..=clients {
        let name = format!("client_{index}");
        let mut client = Command::new(&exe);
        client.arg("client").arg("--name").arg(&name).kill_on_drop(true);
        common.push_args(&mut client);
        let child = client
            .spawn()
            .with_context(|| format!("spawning {name}"))?;
        children.push((name, child));
    }

    for (name, mut child) in children {
        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for {name}"))?;
        if status.success() {
            log::info!("[launch] {name} exited");
        } else {
            log::warn!("[launch] {name} exited with {status}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heartbeat::config::DEFAULT_ALIVE_TIME;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn launch_defaults_to_two_local_clients() {
        let cli = Cli::try_parse_from(["heartbeat", "launch"]).unwrap();
        let Mode::Launch { common, clients } = cli.mode else {
            panic!("expected launch mode");
        };
        assert_eq!(clients, 2);
        assert_eq!(common.addr(), "localhost:32465");
        assert_eq!(common.alive_time, DEFAULT_ALIVE_TIME);
    }

    #[test]
    fn fractional_seconds_are_accepted() {
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn drop_rate_must_be_a_probability() {
        assert_eq!(parse_probability("0.25"), Ok(0.25));
        assert_eq!(parse_probability("1"), Ok(1.0));
        for bad in ["NaN", "inf", "-0.1", "1.5"] {
            assert!(parse_probability(bad).is_err(), "{bad} accepted");
        }
        assert!(Cli::try_parse_from(["heartbeat", "server", "--drop-rate", "NaN"]).is_err());
    }
}
