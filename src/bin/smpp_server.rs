// ABOUTME: Command-line entry point that runs the SMPP server until interrupted
// ABOUTME: Maps flags onto ServerConfig/AuditConfig and prints the final counters

//! # SMPP server
//!
//! ```bash
//! # Listen on the default port (2776), audit logs under ./logs
//! cargo run --bin smpp-server
//!
//! # Custom port, log directory and a stats line every 10 seconds
//! cargo run --bin smpp-server -- --port 2775 --log-dir /var/log/smpp --stats-interval 10
//! ```
//!
//! Log verbosity follows `RUST_LOG` (e.g. `RUST_LOG=smpp_server=debug`).

use argh::FromArgs;
use smpp_server::config::DEFAULT_PORT;
use smpp_server::{AuditConfig, Server, ServerConfig, StaticCredentials};
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SMPP v3.4 server
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the address to listen on (default: 0.0.0.0)
    #[argh(option)]
    address: Option<IpAddr>,

    /// the port to listen on (default: 2776)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// directory for received.log and sent.log (default: logs)
    #[argh(option)]
    log_dir: Option<String>,

    /// maximum concurrent sessions (default: 50000)
    #[argh(option)]
    max_sessions: Option<usize>,

    /// idle timeout in seconds (default: 60)
    #[argh(option)]
    idle_timeout: Option<u64>,

    /// seconds a response may wait on a client that is not reading (default: 10)
    #[argh(option)]
    write_timeout: Option<u64>,

    /// protocol violations tolerated per session (default: 3)
    #[argh(option)]
    violation_budget: Option<u32>,

    /// system_id returned in bind responses (default: smpp-server)
    #[argh(option)]
    system_id: Option<String>,

    /// accepted credentials as system_id:password, repeatable; binds are
    /// unauthenticated when omitted
    #[argh(option)]
    credential: Vec<String>,

    /// close the connection after a rejected bind
    #[argh(switch)]
    close_on_bind_failure: bool,

    /// seconds between counter reports (default: off)
    #[argh(option)]
    stats_interval: Option<u64>,

    /// audit queue capacity in records (default: 65536)
    #[argh(option)]
    audit_queue: Option<usize>,

    /// runtime worker threads (default: available parallelism)
    #[argh(option)]
    workers: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let default_level = if cli_args.debugging { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(workers) = cli_args.workers {
        runtime.worker_threads(workers.max(1));
    }
    runtime.build()?.block_on(run(cli_args))
}

async fn run(cli_args: CliArgs) -> Result<(), Box<dyn Error>> {
    let address = cli_args.address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let port = cli_args.port.unwrap_or(DEFAULT_PORT);

    let mut config = ServerConfig::default()
        .with_bind_address(SocketAddr::new(address, port))
        .with_close_on_bind_failure(cli_args.close_on_bind_failure);
    if let Some(max_sessions) = cli_args.max_sessions {
        config = config.with_max_sessions(max_sessions);
    }
    if let Some(idle_timeout) = cli_args.idle_timeout {
        config = config.with_idle_timeout(Duration::from_secs(idle_timeout));
    }
    if let Some(write_timeout) = cli_args.write_timeout {
        config = config.with_write_timeout(Duration::from_secs(write_timeout));
    }
    if let Some(budget) = cli_args.violation_budget {
        config = config.with_violation_budget(budget);
    }
    if let Some(system_id) = cli_args.system_id {
        config = config.with_system_id(system_id);
    }
    if let Some(stats_interval) = cli_args.stats_interval {
        config = config.with_stats_interval(Duration::from_secs(stats_interval));
    }

    let mut audit = AuditConfig::new(cli_args.log_dir.unwrap_or_else(|| "logs".to_owned()));
    if let Some(capacity) = cli_args.audit_queue {
        audit = audit.with_queue_capacity(capacity);
    }

    let server = if cli_args.credential.is_empty() {
        Server::start(config, audit).await?
    } else {
        let mut credentials = StaticCredentials::new();
        for entry in &cli_args.credential {
            let (system_id, password) = entry
                .split_once(':')
                .ok_or_else(|| format!("credential '{entry}' is not system_id:password"))?;
            credentials = credentials.with(system_id, password);
        }
        Server::start_with_authorizer(config, audit, Arc::new(credentials)).await?
    };

    info!(address = %server.local_addr(), "accepting connections, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    let counters = server.shutdown().await?;
    println!("{counters}");
    Ok(())
}
