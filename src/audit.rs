// ABOUTME: Ordered, asynchronous persistence of raw PDU frames to received/sent log files
// ABOUTME: Sessions enqueue without blocking; a single writer task owns both files

use crate::counters::Counters;
use crate::session::SessionId;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Upper bound on records written between two flushes.
const WRITE_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

/// One raw frame on its way to disk.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub direction: Direction,
    pub session_id: SessionId,
    pub encoded: Bytes,
    pub timestamp: SystemTime,
}

/// Audit pipeline configuration.
///
/// # Example
///
/// ```rust
/// use smpp_server::audit::AuditConfig;
/// use std::time::Duration;
///
/// let config = AuditConfig::new("/var/log/smpp")
///     .with_queue_capacity(1024)
///     .with_enqueue_timeout(Duration::from_millis(5));
/// assert_eq!(config.received_path().file_name().unwrap(), "received.log");
/// ```
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Directory holding both log files, created on start
    pub directory: PathBuf,
    pub received_file: String,
    pub sent_file: String,
    /// Records that may wait for the writer before producers start dropping
    pub queue_capacity: usize,
    /// How long a producer may wait on a full queue; zero drops at once
    pub enqueue_timeout: Duration,
    /// fsync after every flushed batch
    pub sync_on_flush: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            received_file: "received.log".to_string(),
            sent_file: "sent.log".to_string(),
            queue_capacity: 65_536,
            enqueue_timeout: Duration::ZERO,
            sync_on_flush: false,
        }
    }
}

impl AuditConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    pub fn received_path(&self) -> PathBuf {
        self.directory.join(&self.received_file)
    }

    pub fn sent_path(&self) -> PathBuf {
        self.directory.join(&self.sent_file)
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot open audit log {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("audit writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// Producer side of the audit queue. Cheap to clone; every session holds one.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<LogRecord>,
    enqueue_timeout: Duration,
    counters: Arc<Counters>,
}

impl AuditLogger {
    /// Open both log files and spawn the writer task.
    pub async fn start(
        config: &AuditConfig,
        counters: Arc<Counters>,
    ) -> Result<(AuditLogger, AuditWriterHandle), AuditError> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(|source| AuditError::Open {
                path: config.directory.clone(),
                source,
            })?;

        let received = open_append(&config.received_path()).await?;
        let sent = open_append(&config.sent_path()).await?;

        let (logger, rx) = Self::channel(config.queue_capacity, config.enqueue_timeout, counters.clone());

        let writer = AuditWriter {
            rx,
            received: BufWriter::new(received),
            sent: BufWriter::new(sent),
            sync_on_flush: config.sync_on_flush,
            counters,
        };

        info!(
            received = %config.received_path().display(),
            sent = %config.sent_path().display(),
            capacity = config.queue_capacity,
            "audit writer started"
        );

        let handle = tokio::spawn(writer.run());
        Ok((logger, AuditWriterHandle { handle }))
    }

    /// Bare queue without a writer attached.
    pub(crate) fn channel(
        capacity: usize,
        enqueue_timeout: Duration,
        counters: Arc<Counters>,
    ) -> (AuditLogger, mpsc::Receiver<LogRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let logger = AuditLogger {
            tx,
            enqueue_timeout,
            counters,
        };
        (logger, rx)
    }

    /// Queue a frame for persistence.
    ///
    /// Never fails from the caller's point of view: a saturated or closed
    /// queue drops the record and bumps the overrun counter.
    pub async fn record(&self, direction: Direction, session_id: SessionId, encoded: Bytes) {
        let record = LogRecord {
            direction,
            session_id,
            encoded,
            timestamp: SystemTime::now(),
        };

        let dropped = if self.enqueue_timeout.is_zero() {
            match self.tx.try_send(record) {
                Ok(()) => false,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => true,
            }
        } else {
            match self.tx.send_timeout(record, self.enqueue_timeout).await {
                Ok(()) => false,
                Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Closed(_)) => true,
            }
        };

        if dropped {
            self.counters.audit_overrun();
            debug!(session = %session_id, ?direction, "audit queue overrun, record dropped");
        }
    }
}

async fn open_append(path: &Path) -> Result<File, AuditError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| AuditError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Join handle of the writer task. The writer finishes once every
/// `AuditLogger` clone has been dropped and the queue is drained.
#[derive(Debug)]
pub struct AuditWriterHandle {
    handle: JoinHandle<()>,
}

impl AuditWriterHandle {
    pub async fn finish(self) -> Result<(), AuditError> {
        self.handle.await?;
        Ok(())
    }
}

struct AuditWriter {
    rx: mpsc::Receiver<LogRecord>,
    received: BufWriter<File>,
    sent: BufWriter<File>,
    sync_on_flush: bool,
    counters: Arc<Counters>,
}

impl AuditWriter {
    async fn run(mut self) {
        let mut batch = Vec::with_capacity(WRITE_BATCH);

        while self.rx.recv_many(&mut batch, WRITE_BATCH).await > 0 {
            let mut written = 0;
            for record in batch.drain(..) {
                let out = match record.direction {
                    Direction::Received => &mut self.received,
                    Direction::Sent => &mut self.sent,
                };
                match out.write_all(&record.encoded).await {
                    Ok(()) => written += 1,
                    Err(e) => {
                        self.counters.audit_write_failed();
                        error!(
                            session = %record.session_id,
                            direction = ?record.direction,
                            error = %e,
                            "failed to append audit record"
                        );
                    }
                }
            }
            self.flush().await;
            self.counters.audit_written(written);
            trace!(records = written, "audit batch flushed");
        }

        self.flush().await;
        if let Err(e) = self.sync().await {
            self.counters.audit_write_failed();
            error!(error = %e, "failed to sync audit logs");
        }
        debug!("audit writer stopped");
    }

    async fn flush(&mut self) {
        for out in [&mut self.received, &mut self.sent] {
            if let Err(e) = out.flush().await {
                self.counters.audit_write_failed();
                error!(error = %e, "failed to flush audit log");
            }
        }
        if self.sync_on_flush {
            if let Err(e) = self.sync().await {
                self.counters.audit_write_failed();
                error!(error = %e, "failed to sync audit logs");
            }
        }
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.received.get_ref().sync_data().await?;
        self.sent.get_ref().sync_data().await
    }
}
