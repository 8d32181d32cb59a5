//! SMPP v3.4 server.
//!
//! Accepts ESME connections, runs the bind / enquire_link / submit_sm /
//! unbind state machine for each of them on its own task and persists every
//! inbound and outbound frame, byte for byte, to an append-only audit log.
//!
//! ```rust,no_run
//! use smpp_server::{AuditConfig, Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default()
//!         .with_idle_timeout(Duration::from_secs(30))
//!         .with_stats_interval(Duration::from_secs(10));
//!     let server = Server::start(config, AuditConfig::new("logs")).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod authorizer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod counters;
pub mod datatypes;
pub mod error;
pub mod server;
pub mod session;


pub use audit::{AuditConfig, AuditLogger, Direction};
pub use authorizer::{AllowAll, BindAuthorizer, StaticCredentials};
pub use codec::{CodecError, Encodable, Pdu, PduCodec, PduHeader};
pub use config::ServerConfig;
pub use connection::Connection;
pub use counters::{CommandKind, Counters, CountersSnapshot};
pub use error::{ServerError, SessionError};
pub use server::{Server, ServerHandle};
pub use session::{BindState, Reply, Session, SessionId, SessionPolicy};
