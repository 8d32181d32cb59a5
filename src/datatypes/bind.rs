use crate::codec::{CodecError, Encodable, decode_cstring, decode_u8, encode_cstring};
use crate::datatypes::{CommandId, Tlv};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;

/// SMPP v3.4 interface version announced by this server.
pub const SMPP_V34: u8 = 0x34;

// Field limits in bytes, terminator included (Section 4.1.1).
const SYSTEM_ID_MAX: usize = 16;
const PASSWORD_MAX: usize = 9;
const SYSTEM_TYPE_MAX: usize = 13;
const ADDRESS_RANGE_MAX: usize = 41;

/// Role an ESME declares when binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindType {
    Transmitter,
    Receiver,
    Transceiver,
}

impl BindType {
    pub fn from_command_id(command_id: CommandId) -> Option<Self> {
        match command_id.normalized() {
            CommandId::BindTransmitter => Some(BindType::Transmitter),
            CommandId::BindReceiver => Some(BindType::Receiver),
            CommandId::BindTransceiver => Some(BindType::Transceiver),
            _ => None,
        }
    }

    pub fn command_id(self) -> CommandId {
        match self {
            BindType::Transmitter => CommandId::BindTransmitter,
            BindType::Receiver => CommandId::BindReceiver,
            BindType::Transceiver => CommandId::BindTransceiver,
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindType::Transmitter => write!(f, "transmitter"),
            BindType::Receiver => write!(f, "receiver"),
            BindType::Transceiver => write!(f, "transceiver"),
        }
    }
}

/// Body of bind_transmitter, bind_receiver and bind_transceiver; the three
/// share one layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindRequest {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

impl BindRequest {
    pub fn new(system_id: &str, password: &str) -> Self {
        Self {
            system_id: system_id.to_string(),
            password: password.to_string(),
            system_type: String::new(),
            interface_version: SMPP_V34,
            addr_ton: 0,
            addr_npi: 0,
            address_range: String::new(),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut buf = Cursor::new(body);

        let request = BindRequest {
            system_id: decode_cstring(&mut buf, SYSTEM_ID_MAX, "system_id")?,
            password: decode_cstring(&mut buf, PASSWORD_MAX, "password")?,
            system_type: decode_cstring(&mut buf, SYSTEM_TYPE_MAX, "system_type")?,
            interface_version: decode_u8(&mut buf, "interface_version")?,
            addr_ton: decode_u8(&mut buf, "addr_ton")?,
            addr_npi: decode_u8(&mut buf, "addr_npi")?,
            address_range: decode_cstring(&mut buf, ADDRESS_RANGE_MAX, "address_range")?,
        };

        if buf.has_remaining() {
            return Err(CodecError::FieldValidation {
                field: "bind_body",
                reason: format!("{} unexpected trailing bytes", buf.remaining()),
            });
        }

        Ok(request)
    }
}

impl Encodable for BindRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_cstring(buf, &self.system_id, SYSTEM_ID_MAX);
        encode_cstring(buf, &self.password, PASSWORD_MAX);
        encode_cstring(buf, &self.system_type, SYSTEM_TYPE_MAX);
        buf.put_u8(self.interface_version);
        buf.put_u8(self.addr_ton);
        buf.put_u8(self.addr_npi);
        encode_cstring(buf, &self.address_range, ADDRESS_RANGE_MAX);
        Ok(())
    }
}

/// Body of a successful bind_*_resp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindResponse {
    pub system_id: String,
    pub sc_interface_version: Option<Tlv>,
}

impl BindResponse {
    /// The sc_interface_version TLV is only returned to ESMEs that announced
    /// v3.4 or later themselves.
    pub fn for_request(server_system_id: &str, request: &BindRequest) -> Self {
        let sc_interface_version = (request.interface_version >= SMPP_V34)
            .then(|| Tlv::new(Tlv::SC_INTERFACE_VERSION, Bytes::from_static(&[SMPP_V34])));

        Self {
            system_id: server_system_id.to_string(),
            sc_interface_version,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut buf = Cursor::new(body);
        let system_id = decode_cstring(&mut buf, SYSTEM_ID_MAX, "system_id")?;

        let mut sc_interface_version = None;
        while buf.has_remaining() {
            let tlv = Tlv::decode(&mut buf)?;
            if tlv.tag == Tlv::SC_INTERFACE_VERSION {
                sc_interface_version = Some(tlv);
            }
        }

        Ok(Self {
            system_id,
            sc_interface_version,
        })
    }
}

impl Encodable for BindResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_cstring(buf, &self.system_id, SYSTEM_ID_MAX);
        if let Some(tlv) = &self.sc_interface_version {
            tlv.encode(buf)?;
        }
        Ok(())
    }
}
