// ABOUTME: TCP acceptor and per-connection session tasks for the SMPP server
// ABOUTME: Owns startup, the session limit, idle timeouts and graceful shutdown

use crate::audit::{AuditConfig, AuditLogger, AuditWriterHandle, Direction};
use crate::authorizer::{AllowAll, BindAuthorizer};
use crate::codec::PduCodec;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::counters::{Counters, CountersSnapshot};
use crate::error::{ServerError, SessionError};
use crate::session::{Session, SessionId, SessionPolicy};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Pause after a failed `accept` (usually fd exhaustion) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Upper bound on the final flush of a session closed by server shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Entry point for running the server.
///
/// ```rust,no_run
/// use smpp_server::{AuditConfig, Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::start(ServerConfig::default(), AuditConfig::default()).await?;
///     println!("listening on {}", server.local_addr());
///
///     tokio::signal::ctrl_c().await?;
///     let counters = server.shutdown().await?;
///     println!("{counters}");
///     Ok(())
/// }
/// ```
pub struct Server;

impl Server {
    /// Bind the listener, start the audit writer and begin accepting
    /// connections. Every bind is accepted.
    pub async fn start(config: ServerConfig, audit: AuditConfig) -> Result<ServerHandle, ServerError> {
        Self::start_with_authorizer(config, audit, Arc::new(AllowAll)).await
    }

    pub async fn start_with_authorizer(
        config: ServerConfig,
        audit: AuditConfig,
        authorizer: Arc<dyn BindAuthorizer>,
    ) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_address,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: config.bind_address,
            source,
        })?;

        let counters = Arc::new(Counters::new());
        let (audit_logger, audit_writer) = AuditLogger::start(&audit, counters.clone()).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            policy: Arc::new(SessionPolicy::from_config(&config, authorizer)),
            counters: counters.clone(),
            audit: audit_logger,
            idle_timeout: config.idle_timeout,
            write_timeout: config.write_timeout,
            codec: PduCodec::new(config.max_frame_size),
        });

        let acceptor = Acceptor {
            listener,
            limit: Arc::new(Semaphore::new(config.max_sessions)),
            shared,
            shutdown: shutdown_rx.clone(),
        };

        info!(
            address = %local_addr,
            max_sessions = config.max_sessions,
            idle_timeout = ?config.idle_timeout,
            write_timeout = ?config.write_timeout,
            "server started"
        );

        let acceptor = tokio::spawn(acceptor.run());
        let stats = config
            .stats_interval
            .map(|every| tokio::spawn(report_stats(counters.clone(), every, shutdown_rx)));

        Ok(ServerHandle {
            local_addr,
            counters,
            shutdown: shutdown_tx,
            acceptor,
            stats,
            audit: audit_writer,
        })
    }
}

/// A running server.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) stops
/// the acceptor and every session, but does not wait for the audit files to
/// be flushed.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
    stats: Option<JoinHandle<()>>,
    audit: AuditWriterHandle,
}

impl ServerHandle {
    /// Address the listener is bound to. Useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Stop accepting, close every session, drain the audit queue to disk
    /// and return the final counters.
    pub async fn shutdown(self) -> Result<CountersSnapshot, ServerError> {
        info!(active_sessions = self.counters.active_sessions(), "server stopping");

        // Receivers are owned by the tasks we are about to join, so a send
        // error only means they are already gone.
        let _ = self.shutdown.send(true);

        self.acceptor.await?;
        if let Some(stats) = self.stats {
            stats.await?;
        }
        self.audit.finish().await?;

        let snapshot = self.counters.snapshot();
        info!(counters = %snapshot, "server stopped");
        Ok(snapshot)
    }
}

/// State shared by the acceptor and all session tasks.
struct Shared {
    policy: Arc<SessionPolicy>,
    counters: Arc<Counters>,
    audit: AuditLogger,
    idle_timeout: Duration,
    write_timeout: Duration,
    codec: PduCodec,
}

struct Acceptor {
    listener: TcpListener,
    limit: Arc<Semaphore>,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
}

impl Acceptor {
    async fn run(mut self) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    debug!("acceptor shutting down");
                    break;
                }

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "session task failed");
                    }
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                    Err(e) => {
                        error!(error = %e, "accept error");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        // Close the listener before waiting on sessions so late clients are
        // refused instead of left in the backlog.
        drop(self.listener);

        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "session task failed");
            }
        }
        debug!("all sessions closed");
    }

    fn spawn_session(&self, sessions: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let Ok(permit) = self.limit.clone().try_acquire_owned() else {
            self.shared.counters.session_rejected();
            warn!(%peer, "session limit reached, rejecting");
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, error = %e, "cannot set TCP_NODELAY");
        }

        let id = SessionId::next();
        let span = info_span!("session", id = %id, %peer);
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();

        sessions.spawn(
            async move {
                run_session(id, stream, peer, shared, shutdown).await;
                drop(permit);
            }
            .instrument(span),
        );
    }
}

async fn run_session(
    id: SessionId,
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    shared.counters.session_created();
    info!("session created");

    let mut session = Session::new(id, peer, shared.policy.clone(), shared.counters.clone());
    let mut connection = Connection::with_codec(stream, shared.codec);

    match serve(&mut session, &mut connection, &shared, &mut shutdown).await {
        Ok(()) => info!(system_id = ?session.system_id(), "client gone"),
        Err(e) if e.is_disconnect() => info!(system_id = ?session.system_id(), reason = %e, "client gone"),
        Err(e @ SessionError::IdleTimeout(_)) => info!(reason = %e, "session idle, closing"),
        Err(e @ SessionError::WriteTimeout(_)) => info!(reason = %e, "client not reading, closing"),
        Err(e) => warn!(error = %e, "session terminated"),
    }

    session.close();
    shared.counters.session_destroyed();
    info!("session destroyed");
}

/// Read, dispatch and answer PDUs until the session ends.
///
/// Responses are written into the connection's buffer and flushed once no
/// further request is already buffered, so pipelined requests are answered
/// in one write while a lone request is answered immediately. Every write
/// races server shutdown and is bounded by the write timeout, so a peer that
/// stops reading cannot hold its session slot.
async fn serve(
    session: &mut Session,
    connection: &mut Connection,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SessionError> {
    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            read = timeout(shared.idle_timeout, connection.read_frame()) => Some(read),
        };

        let Some(read) = read else {
            debug!("server shutdown, closing session");
            let grace = shared.write_timeout.min(SHUTDOWN_GRACE);
            return match timeout(grace, connection.shutdown()).await {
                Ok(closed) => closed,
                Err(_elapsed) => Ok(()),
            };
        };

        let (frame, request) = match read {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => {
                if matches!(e, SessionError::Malformed(_)) {
                    shared.counters.malformed_frame();
                }
                return Err(e);
            }
            Err(_elapsed) => {
                shared.counters.idle_timeout();
                return Err(SessionError::IdleTimeout(shared.idle_timeout));
            }
        };

        shared.audit.record(Direction::Received, session.id(), frame).await;

        let reply = session.handle(&request);

        if let Some(response) = reply.pdu() {
            let Some(encoded) = write_or_stop(connection.write_pdu(response), shared, shutdown).await? else {
                return Ok(());
            };
            shared.counters.pdu_sent();
            shared.audit.record(Direction::Sent, session.id(), encoded).await;
        }

        if reply.closes() {
            return write_or_stop(connection.shutdown(), shared, shutdown).await.map(drop);
        }

        if !connection.has_buffered_frame() && write_or_stop(connection.flush(), shared, shutdown).await?.is_none() {
            return Ok(());
        }
    }
}

/// Run one write under the write timeout, abandoning it if the server stops.
///
/// `Ok(None)` means shutdown won the race; the caller drops the connection
/// without flushing whatever is still buffered.
async fn write_or_stop<T>(
    write: impl Future<Output = Result<T, SessionError>>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<T>, SessionError> {
    tokio::select! {
        biased;
        _ = shutdown.changed() => {
            debug!("server shutdown during write, dropping session");
            Ok(None)
        }
        written = timeout(shared.write_timeout, write) => match written {
            Ok(result) => result.map(Some),
            Err(_elapsed) => {
                shared.counters.write_timeout();
                Err(SessionError::WriteTimeout(shared.write_timeout))
            }
        },
    }
}

async fn report_stats(counters: Arc<Counters>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => info!(counters = %counters.snapshot(), "stats"),
        }
    }
}
