// ABOUTME: Load generator that holds many bound sessions open against an SMPP server
// ABOUTME: Each session sends periodic enquire_link and reports latency at the end

//! # SMPP load generator
//!
//! ```bash
//! # 10,000 transceiver sessions, one enquire_link every 5 seconds each, for a minute
//! cargo run --release --bin smpp-load -- --sessions 10000 --interval 5 --duration 60
//! ```

use argh::FromArgs;
use smpp_server::config::DEFAULT_PORT;
use smpp_server::datatypes::{BindRequest, CommandId, CommandStatus};
use smpp_server::{Connection, Encodable, Pdu};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// SMPP load generator
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the hostname or IP address of the server (default: 127.0.0.1)
    #[argh(option)]
    host: Option<String>,

    /// the port of the server (default: 2776)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// number of concurrent sessions (default: 1000)
    #[argh(option, short = 'n')]
    sessions: Option<usize>,

    /// seconds between enquire_link on each session (default: 5)
    #[argh(option)]
    interval: Option<u64>,

    /// seconds to keep the sessions open (default: 30)
    #[argh(option)]
    duration: Option<u64>,

    /// the system id
    #[argh(option)]
    system_id: Option<String>,

    /// the password
    #[argh(option)]
    password: Option<String>,
}

#[derive(Default)]
struct Stats {
    bound: AtomicU64,
    failed: AtomicU64,
    enquire_links: AtomicU64,
    latency_micros: AtomicU64,
    max_latency_micros: AtomicU64,
}

impl Stats {
    fn record_latency(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.enquire_links.fetch_add(1, Ordering::Relaxed);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_latency_micros.fetch_max(micros, Ordering::Relaxed);
    }
}

struct Settings {
    target: String,
    system_id: String,
    password: String,
    interval: Duration,
    duration: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let host = cli_args.host.unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = cli_args.port.unwrap_or(DEFAULT_PORT);
    let sessions = cli_args.sessions.unwrap_or(1000);

    let settings = Arc::new(Settings {
        target: format!("{host}:{port}"),
        system_id: cli_args.system_id.unwrap_or_else(|| "load".to_owned()),
        password: cli_args.password.unwrap_or_default(),
        interval: Duration::from_secs(cli_args.interval.unwrap_or(5).max(1)),
        duration: Duration::from_secs(cli_args.duration.unwrap_or(30)),
    });
    let stats = Arc::new(Stats::default());

    info!("Opening {sessions} sessions to {}", settings.target);
    let started = Instant::now();

    let mut clients = JoinSet::new();
    for id in 0..sessions {
        let settings = settings.clone();
        let stats = stats.clone();
        clients.spawn(async move {
            if let Err(e) = run_session(id, &settings, &stats).await {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = id, error = %e, "session failed");
            }
        });
    }

    while clients.join_next().await.is_some() {}

    let enquire_links = stats.enquire_links.load(Ordering::Relaxed);
    let mean = stats
        .latency_micros
        .load(Ordering::Relaxed)
        .checked_div(enquire_links)
        .unwrap_or(0);

    println!("elapsed:        {:?}", started.elapsed());
    println!("sessions bound: {}", stats.bound.load(Ordering::Relaxed));
    println!("sessions failed: {}", stats.failed.load(Ordering::Relaxed));
    println!("enquire_links:  {enquire_links}");
    println!("mean latency:   {mean}us");
    println!("max latency:    {}us", stats.max_latency_micros.load(Ordering::Relaxed));

    Ok(())
}

async fn run_session(id: usize, settings: &Settings, stats: &Stats) -> Result<(), Box<dyn Error + Send + Sync>> {
    let stream = TcpStream::connect(&settings.target).await?;
    stream.set_nodelay(true)?;
    let mut conn = Connection::new(stream);
    let mut sequence = 1u32;

    let bind = BindRequest::new(&settings.system_id, &settings.password);
    let response = request(&mut conn, Pdu::new(CommandId::BindTransceiver, sequence, bind.to_bytes()?)).await?;
    if response.command_status != CommandStatus::Ok {
        return Err(format!("bind rejected: {}", response.command_status).into());
    }
    stats.bound.fetch_add(1, Ordering::Relaxed);
    debug!(session = id, "bound");

    // Spread the first enquire_link of every session over one interval.
    let offset = settings.interval.mul_f64((id % 1000) as f64 / 1000.0);
    sleep(offset).await;

    let deadline = Instant::now() + settings.duration;
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while Instant::now() < deadline {
        ticker.tick().await;
        sequence = sequence.wrapping_add(1);

        let sent = Instant::now();
        let response = request(&mut conn, Pdu::request(CommandId::EnquireLink, sequence)).await?;
        if response.sequence_number != sequence {
            return Err(format!("expected sequence {sequence}, got {}", response.sequence_number).into());
        }
        stats.record_latency(sent.elapsed());
    }

    sequence = sequence.wrapping_add(1);
    request(&mut conn, Pdu::request(CommandId::Unbind, sequence)).await?;
    Ok(())
}

async fn request(conn: &mut Connection, pdu: Pdu) -> Result<Pdu, Box<dyn Error + Send + Sync>> {
    conn.write_pdu(&pdu).await?;
    conn.flush().await?;

    match timeout(RESPONSE_TIMEOUT, conn.read_frame()).await {
        Err(_) => Err("timed out waiting for response".into()),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(None)) => Err("server closed the connection".into()),
        Ok(Ok(Some((_, response)))) => Ok(response),
    }
}
