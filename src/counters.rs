// ABOUTME: Process-wide atomic counters for sessions, PDUs and the audit pipeline
// ABOUTME: Sessions and the audit writer increment; operators only read snapshots

use crate::datatypes::CommandId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Command categories tracked individually. Everything else lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    BindTransmitter,
    BindReceiver,
    BindTransceiver,
    EnquireLink,
    SubmitSm,
    Unbind,
    GenericNack,
    Other,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::BindTransmitter,
        CommandKind::BindReceiver,
        CommandKind::BindTransceiver,
        CommandKind::EnquireLink,
        CommandKind::SubmitSm,
        CommandKind::Unbind,
        CommandKind::GenericNack,
        CommandKind::Other,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::BindTransmitter => "bind_transmitter",
            CommandKind::BindReceiver => "bind_receiver",
            CommandKind::BindTransceiver => "bind_transceiver",
            CommandKind::EnquireLink => "enquire_link",
            CommandKind::SubmitSm => "submit_sm",
            CommandKind::Unbind => "unbind",
            CommandKind::GenericNack => "generic_nack",
            CommandKind::Other => "other",
        }
    }
}

impl From<CommandId> for CommandKind {
    fn from(command_id: CommandId) -> Self {
        match command_id.normalized() {
            CommandId::BindTransmitter => CommandKind::BindTransmitter,
            CommandId::BindReceiver => CommandKind::BindReceiver,
            CommandId::BindTransceiver => CommandKind::BindTransceiver,
            CommandId::EnquireLink => CommandKind::EnquireLink,
            CommandId::SubmitSm => CommandKind::SubmitSm,
            CommandId::Unbind => CommandKind::Unbind,
            CommandId::GenericNack => CommandKind::GenericNack,
            _ => CommandKind::Other,
        }
    }
}

/// Aggregate server state. One instance lives for the server's lifetime and
/// is shared behind an `Arc`; there is no per-session copy.
#[derive(Debug, Default)]
pub struct Counters {
    active_sessions: AtomicU64,
    sessions_created: AtomicU64,
    sessions_destroyed: AtomicU64,
    sessions_rejected: AtomicU64,
    pdus_received: AtomicU64,
    pdus_sent: AtomicU64,
    pdus_by_command: [AtomicU64; CommandKind::ALL.len()],
    binds_succeeded: AtomicU64,
    bind_failures: AtomicU64,
    protocol_violations: AtomicU64,
    malformed_frames: AtomicU64,
    idle_timeouts: AtomicU64,
    write_timeouts: AtomicU64,
    audit_records_written: AtomicU64,
    audit_overruns: AtomicU64,
    audit_write_failures: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_destroyed(&self) {
        self.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// An inbound request was decoded and dispatched.
    pub fn pdu_received(&self, command_id: CommandId) {
        self.pdus_received.fetch_add(1, Ordering::Relaxed);
        self.pdus_by_command[CommandKind::from(command_id).index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn pdu_sent(&self) {
        self.pdus_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bind_succeeded(&self) {
        self.binds_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bind_failed(&self) {
        self.bind_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A peer stopped reading and a response could not be written in time.
    pub fn write_timeout(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn audit_written(&self, records: u64) {
        self.audit_records_written.fetch_add(records, Ordering::Relaxed);
    }

    pub fn audit_overrun(&self) {
        self.audit_overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn audit_write_failed(&self) {
        self.audit_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Point-in-time copy. Fields are read independently, so a snapshot
    /// taken under load is not a single atomic cut.
    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        CountersSnapshot {
            active_sessions: load(&self.active_sessions),
            sessions_created: load(&self.sessions_created),
            sessions_destroyed: load(&self.sessions_destroyed),
            sessions_rejected: load(&self.sessions_rejected),
            pdus_received: load(&self.pdus_received),
            pdus_sent: load(&self.pdus_sent),
            pdus_by_command: CommandKind::ALL.map(|kind| (kind, load(&self.pdus_by_command[kind.index()]))),
            binds_succeeded: load(&self.binds_succeeded),
            bind_failures: load(&self.bind_failures),
            protocol_violations: load(&self.protocol_violations),
            malformed_frames: load(&self.malformed_frames),
            idle_timeouts: load(&self.idle_timeouts),
            write_timeouts: load(&self.write_timeouts),
            audit_records_written: load(&self.audit_records_written),
            audit_overruns: load(&self.audit_overruns),
            audit_write_failures: load(&self.audit_write_failures),
        }
    }
}

/// Read-only view handed to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub active_sessions: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub sessions_rejected: u64,
    pub pdus_received: u64,
    pub pdus_sent: u64,
    pub pdus_by_command: [(CommandKind, u64); CommandKind::ALL.len()],
    pub binds_succeeded: u64,
    pub bind_failures: u64,
    pub protocol_violations: u64,
    pub malformed_frames: u64,
    pub idle_timeouts: u64,
    pub write_timeouts: u64,
    pub audit_records_written: u64,
    pub audit_overruns: u64,
    pub audit_write_failures: u64,
}

impl CountersSnapshot {
    pub fn pdus_for(&self, kind: CommandKind) -> u64 {
        self.pdus_by_command
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, count)| *count)
    }
}

impl fmt::Display for CountersSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sessions[active={} created={} destroyed={} rejected={}] \
             pdus[received={} sent={}",
            self.active_sessions,
            self.sessions_created,
            self.sessions_destroyed,
            self.sessions_rejected,
            self.pdus_received,
            self.pdus_sent,
        )?;
        for (kind, count) in &self.pdus_by_command {
            if *count > 0 {
                write!(f, " {}={}", kind.name(), count)?;
            }
        }
        write!(
            f,
            "] binds[ok={} failed={}] errors[violations={} malformed={} idle_timeouts={} write_timeouts={}] \
             audit[written={} overruns={} write_failures={}]",
            self.binds_succeeded,
            self.bind_failures,
            self.protocol_violations,
            self.malformed_frames,
            self.idle_timeouts,
            self.write_timeouts,
            self.audit_records_written,
            self.audit_overruns,
            self.audit_write_failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle_counts() {
        let counters = Counters::new();
        counters.session_created();
        counters.session_created();
        counters.session_destroyed();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.sessions_created, 2);
        assert_eq!(snapshot.sessions_destroyed, 1);
    }

    #[test]
    fn pdus_are_counted_per_command() {
        let counters = Counters::new();
        counters.pdu_received(CommandId::EnquireLink);
        counters.pdu_received(CommandId::EnquireLink);
        counters.pdu_received(CommandId::SubmitSm);
        counters.pdu_received(CommandId::Other(0x0001_0200));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.pdus_received, 4);
        assert_eq!(snapshot.pdus_for(CommandKind::EnquireLink), 2);
        assert_eq!(snapshot.pdus_for(CommandKind::SubmitSm), 1);
        assert_eq!(snapshot.pdus_for(CommandKind::Other), 1);
        assert_eq!(snapshot.pdus_for(CommandKind::Unbind), 0);
    }

    #[test]
    fn display_lists_only_seen_commands() {
        let counters = Counters::new();
        counters.pdu_received(CommandId::Unbind);
        counters.audit_overrun();
        counters.write_timeout();

        let text = counters.snapshot().to_string();
        assert!(text.contains("unbind=1"));
        assert!(!text.contains("submit_sm="));
        assert!(text.contains("overruns=1"));
        assert!(text.contains("write_timeouts=1"));
    }
}
