use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use std::hash::{Hash, Hasher};

/// SMPP v3.4 command identifiers (Section 5.1.2.1).
///
/// Values the server has no name for decode into `Other` so that opaque
/// PDUs survive a decode/encode cycle untouched. Equality and hashing go by
/// wire value, so a hand-built `Other(0x15)` is the same id as `EnquireLink`.
#[derive(FromPrimitive, IntoPrimitive)]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub enum CommandId {
    GenericNack = 0x8000_0000,
    BindReceiver = 0x0000_0001,
    BindReceiverResp = 0x8000_0001,
    BindTransmitter = 0x0000_0002,
    BindTransmitterResp = 0x8000_0002,
    QuerySm = 0x0000_0003,
    QuerySmResp = 0x8000_0003,
    SubmitSm = 0x0000_0004,
    SubmitSmResp = 0x8000_0004,
    DeliverSm = 0x0000_0005,
    DeliverSmResp = 0x8000_0005,
    Unbind = 0x0000_0006,
    UnbindResp = 0x8000_0006,
    ReplaceSm = 0x0000_0007,
    ReplaceSmResp = 0x8000_0007,
    CancelSm = 0x0000_0008,
    CancelSmResp = 0x8000_0008,
    BindTransceiver = 0x0000_0009,
    BindTransceiverResp = 0x8000_0009,
    Outbind = 0x0000_000B,
    EnquireLink = 0x0000_0015,
    EnquireLinkResp = 0x8000_0015,
    SubmitMulti = 0x0000_0021,
    SubmitMultiResp = 0x8000_0021,
    AlertNotification = 0x0000_0102,
    DataSm = 0x0000_0103,
    DataSmResp = 0x8000_0103,
    #[num_enum(catch_all)]
    Other(u32),
}

impl CommandId {
    const RESPONSE_BIT: u32 = 0x8000_0000;

    /// Raw 32-bit wire value.
    pub fn value(self) -> u32 {
        u32::from(self)
    }

    /// Named variant for the wire value; `Other` only keeps unnamed ids.
    pub fn normalized(self) -> CommandId {
        CommandId::from(self.value())
    }

    /// Check if this command_id represents a response PDU
    pub fn is_response(self) -> bool {
        self.value() & Self::RESPONSE_BIT != 0
    }

    /// The `_resp` counterpart of a request id. Responses map to themselves.
    pub fn response(self) -> CommandId {
        CommandId::from(self.value() | Self::RESPONSE_BIT)
    }

    pub fn is_bind(self) -> bool {
        matches!(
            self.normalized(),
            CommandId::BindReceiver | CommandId::BindTransmitter | CommandId::BindTransceiver
        )
    }
}

impl PartialEq for CommandId {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for CommandId {}

impl Hash for CommandId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalized() {
            CommandId::Other(raw) => write!(f, "{raw:#010x}"),
            known => write!(f, "{known:?}"),
        }
    }
}
