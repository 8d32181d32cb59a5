use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The command_status field of an SMPP response (Section 5.1.3).
///
/// Requests always carry `Ok`. Only the codes this server emits or is
/// likely to observe from clients are named; anything else is `Other`.
/// Compared and hashed by wire value, like [`CommandId`](super::CommandId).
#[derive(FromPrimitive, IntoPrimitive)]
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub enum CommandStatus {
    /// ESME_ROK
    Ok = 0x0000_0000,
    InvalidMsgLength = 0x0000_0001,
    InvalidCommandLength = 0x0000_0002,
    InvalidCommandId = 0x0000_0003,
    /// Incorrect BIND status for given command
    IncorrectBindStatus = 0x0000_0004,
    AlreadyBoundState = 0x0000_0005,
    SystemError = 0x0000_0008,
    BindFailed = 0x0000_000D,
    InvalidPassword = 0x0000_000E,
    InvalidSystemId = 0x0000_000F,
    MessageQueueFull = 0x0000_0014,
    ThrottlingError = 0x0000_0058,
    UnknownError = 0x0000_00FF,
    #[num_enum(catch_all)]
    Other(u32),
}

impl CommandStatus {
    pub fn value(self) -> u32 {
        u32::from(self)
    }

    pub fn normalized(self) -> CommandStatus {
        CommandStatus::from(self.value())
    }

    pub fn is_ok(self) -> bool {
        self == CommandStatus::Ok
    }
}

impl Default for CommandStatus {
    fn default() -> Self {
        CommandStatus::Ok
    }
}

impl PartialEq for CommandStatus {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for CommandStatus {}

impl Hash for CommandStatus {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalized() {
            CommandStatus::Other(raw) => write!(f, "{raw:#010x}"),
            known => write!(f, "{known:?}"),
        }
    }
}
