// ABOUTME: Per-connection SMPP protocol state machine (bind, enquire_link, submit_sm, unbind)
// ABOUTME: Pure request-in/response-out logic; socket I/O lives in the server's session task

use crate::authorizer::BindAuthorizer;
use crate::codec::{Encodable, Pdu};
use crate::config::ServerConfig;
use crate::counters::Counters;
use crate::datatypes::{
    BindRequest, BindResponse, BindType, CommandId, CommandStatus, SubmitSmResponse,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SMPP session states (Section 2.3).
///
/// ```text
/// Connected --bind--> Bound(type) --unbind--> Unbinding --flushed--> Closed
///     \________________________\_____ error / timeout ______________/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// TCP connection open, no successful bind yet
    Connected,
    Bound(BindType),
    /// unbind_resp queued, connection closes once it is flushed
    Unbinding,
    Closed,
}

impl BindState {
    pub fn is_bound(self) -> bool {
        matches!(self, BindState::Bound(_))
    }
}

impl fmt::Display for BindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindState::Connected => write!(f, "OPEN"),
            BindState::Bound(BindType::Transmitter) => write!(f, "BOUND_TX"),
            BindState::Bound(BindType::Receiver) => write!(f, "BOUND_RX"),
            BindState::Bound(BindType::Transceiver) => write!(f, "BOUND_TRX"),
            BindState::Unbinding => write!(f, "UNBINDING"),
            BindState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// What the transport should do after a request was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Respond(Pdu),
    /// Send the response, flush, then close the connection
    RespondAndClose(Pdu),
    /// Nothing to send (e.g. a response PDU arrived from the client)
    Ignore,
}

impl Reply {
    pub fn pdu(&self) -> Option<&Pdu> {
        match self {
            Reply::Respond(pdu) | Reply::RespondAndClose(pdu) => Some(pdu),
            Reply::Ignore => None,
        }
    }

    pub fn closes(&self) -> bool {
        matches!(self, Reply::RespondAndClose(_))
    }
}

/// Settings and collaborators shared by every session of a server.
pub struct SessionPolicy {
    pub system_id: String,
    pub violation_budget: u32,
    pub close_on_bind_failure: bool,
    pub authorizer: Arc<dyn BindAuthorizer>,
}

impl SessionPolicy {
    pub fn from_config(config: &ServerConfig, authorizer: Arc<dyn BindAuthorizer>) -> Self {
        Self {
            system_id: config.system_id.clone(),
            violation_budget: config.violation_budget,
            close_on_bind_failure: config.close_on_bind_failure,
            authorizer,
        }
    }
}

impl fmt::Debug for SessionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPolicy")
            .field("system_id", &self.system_id)
            .field("violation_budget", &self.violation_budget)
            .field("close_on_bind_failure", &self.close_on_bind_failure)
            .finish_non_exhaustive()
    }
}

type Handler = fn(&mut Session, &Pdu) -> Reply;

/// Command id to handler mapping for the requests this server answers.
struct CommandTable {
    handlers: HashMap<CommandId, Handler>,
}

impl CommandTable {
    fn new() -> Self {
        let mut table = Self {
            handlers: HashMap::new(),
        };
        table.register(CommandId::BindTransmitter, Session::on_bind);
        table.register(CommandId::BindReceiver, Session::on_bind);
        table.register(CommandId::BindTransceiver, Session::on_bind);
        table.register(CommandId::EnquireLink, Session::on_enquire_link);
        table.register(CommandId::SubmitSm, Session::on_submit_sm);
        table.register(CommandId::Unbind, Session::on_unbind);
        table
    }

    fn register(&mut self, command_id: CommandId, handler: Handler) {
        self.handlers.insert(command_id, handler);
    }

    fn get(&self, command_id: CommandId) -> Option<Handler> {
        self.handlers.get(&command_id).copied()
    }
}

static COMMANDS: LazyLock<CommandTable> = LazyLock::new(CommandTable::new);

/// One client's protocol state. Owned by exactly one task for the lifetime
/// of its connection, so nothing in here is synchronised.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    state: BindState,
    system_id: Option<String>,
    last_activity: Instant,
    violations: u32,
    policy: Arc<SessionPolicy>,
    counters: Arc<Counters>,
}

impl Session {
    pub fn new(
        id: SessionId,
        remote_addr: SocketAddr,
        policy: Arc<SessionPolicy>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            state: BindState::Connected,
            system_id: None,
            last_activity: Instant::now(),
            violations: 0,
            policy,
            counters,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    /// Identity furnished by the client at bind time.
    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn close(&mut self) {
        self.set_state(BindState::Closed);
    }

    /// Process one inbound PDU and decide the reply. The response always
    /// carries the request's sequence number.
    pub fn handle(&mut self, request: &Pdu) -> Reply {
        self.last_activity = Instant::now();

        if matches!(self.state, BindState::Unbinding | BindState::Closed) {
            debug!(command = %request.command_id, state = %self.state, "PDU after unbind ignored");
            return Reply::Ignore;
        }

        self.counters.pdu_received(request.command_id);

        if request.is_response() {
            debug!(
                command = %request.command_id,
                sequence = request.sequence_number,
                status = %request.command_status,
                "unsolicited response dropped"
            );
            return Reply::Ignore;
        }

        trace!(command = %request.command_id, sequence = request.sequence_number, "request");

        match COMMANDS.get(request.command_id) {
            Some(handler) => handler(self, request),
            None => {
                debug!(command = %request.command_id, "unsupported command");
                Reply::Respond(Pdu::generic_nack(
                    request.sequence_number,
                    CommandStatus::InvalidCommandId,
                ))
            }
        }
    }

    fn on_bind(&mut self, request: &Pdu) -> Reply {
        let Some(bind_type) = BindType::from_command_id(request.command_id) else {
            return Reply::Respond(Pdu::generic_nack(
                request.sequence_number,
                CommandStatus::InvalidCommandId,
            ));
        };

        if self.state != BindState::Connected {
            return self.violation(request, CommandStatus::AlreadyBoundState);
        }

        let bind = match BindRequest::decode(&request.body) {
            Ok(bind) => bind,
            Err(e) => {
                warn!(error = %e, "malformed bind body");
                return self.bind_failed(request, e.to_command_status());
            }
        };

        if let Err(status) = self.policy.authorizer.authorize(bind_type, &bind) {
            warn!(system_id = %bind.system_id, %status, "bind rejected");
            return self.bind_failed(request, status);
        }

        let body = match BindResponse::for_request(&self.policy.system_id, &bind).to_bytes() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "cannot encode bind response");
                return self.bind_failed(request, CommandStatus::SystemError);
            }
        };

        info!(
            system_id = %bind.system_id,
            peer = %self.remote_addr,
            %bind_type,
            "client bound"
        );
        self.system_id = Some(bind.system_id);
        self.set_state(BindState::Bound(bind_type));
        self.counters.bind_succeeded();

        Reply::Respond(Pdu::response_to(request, CommandStatus::Ok, body))
    }

    fn on_enquire_link(&mut self, request: &Pdu) -> Reply {
        if !self.state.is_bound() {
            return self.violation(request, CommandStatus::IncorrectBindStatus);
        }
        Reply::Respond(Pdu::response_to(request, CommandStatus::Ok, Bytes::new()))
    }

    fn on_submit_sm(&mut self, request: &Pdu) -> Reply {
        if !self.state.is_bound() {
            return self.violation(request, CommandStatus::IncorrectBindStatus);
        }
        match SubmitSmResponse::default().to_bytes() {
            Ok(body) => Reply::Respond(Pdu::response_to(request, CommandStatus::Ok, body)),
            Err(_) => Reply::Respond(Pdu::response_to(request, CommandStatus::SystemError, Bytes::new())),
        }
    }

    fn on_unbind(&mut self, request: &Pdu) -> Reply {
        if !self.state.is_bound() {
            return self.violation(request, CommandStatus::IncorrectBindStatus);
        }
        info!(system_id = ?self.system_id, "client unbinding");
        self.set_state(BindState::Unbinding);
        Reply::RespondAndClose(Pdu::response_to(request, CommandStatus::Ok, Bytes::new()))
    }

    /// Request not allowed in the current state. Answered with an error
    /// status; the session survives until the budget is exhausted.
    fn violation(&mut self, request: &Pdu, status: CommandStatus) -> Reply {
        self.violations += 1;
        self.counters.protocol_violation();

        let response = Pdu::response_to(request, status, Bytes::new());
        if self.violations > self.policy.violation_budget {
            warn!(
                command = %request.command_id,
                state = %self.state,
                violations = self.violations,
                "violation budget exhausted, closing"
            );
            self.set_state(BindState::Closed);
            return Reply::RespondAndClose(response);
        }

        warn!(
            command = %request.command_id,
            state = %self.state,
            violations = self.violations,
            %status,
            "protocol violation"
        );
        Reply::Respond(response)
    }

    fn bind_failed(&mut self, request: &Pdu, status: CommandStatus) -> Reply {
        self.counters.bind_failed();
        let response = Pdu::response_to(request, status, Bytes::new());
        if self.policy.close_on_bind_failure {
            self.set_state(BindState::Closed);
            Reply::RespondAndClose(response)
        } else {
            Reply::Respond(response)
        }
    }

    fn set_state(&mut self, state: BindState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state transition");
            self.state = state;
        }
    }
}
