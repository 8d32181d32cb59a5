// SMPP v3.4 Codec - framing and encoding of PDUs
//
// The codec is stateless: it never performs I/O and keeps nothing between
// calls, so one instance is shared by every session. Callers own the byte
// buffers and retry after `CodecError::Incomplete` once more data arrived.

use crate::datatypes::{CommandId, CommandStatus};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error;

/// Default upper bound for `command_length`, guards against memory
/// exhaustion through forged length fields.
pub const MAX_PDU_SIZE: u32 = 65536; // 64KB

/// SMPP v3.4 PDU Header (16 bytes, common to all PDUs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub command_length: u32,
    pub command_id: CommandId,
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

impl PduHeader {
    pub const SIZE: usize = 16;

    /// Reads the four header fields. Length bounds are the codec's concern,
    /// see [`PduCodec::check`].
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < Self::SIZE {
            return Err(CodecError::Incomplete);
        }

        Ok(PduHeader {
            command_length: buf.get_u32(),
            command_id: CommandId::from(buf.get_u32()),
            command_status: CommandStatus::from(buf.get_u32()),
            sequence_number: buf.get_u32(),
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.command_length);
        buf.put_u32(self.command_id.value());
        buf.put_u32(self.command_status.value());
        buf.put_u32(self.sequence_number);
    }
}

/// Trait for types that can be encoded to bytes
pub trait Encodable {
    /// Append the encoded form to `buf`.
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError>;

    /// Calculate the encoded size without actually encoding
    fn encoded_size(&self) -> usize {
        let mut buf = BytesMut::new();
        self.encode(&mut buf).map(|_| buf.len()).unwrap_or(0)
    }

    /// Encode into a fresh buffer and freeze it.
    fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Codec errors with detailed context for debugging
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not an error as such: the caller has to buffer more bytes and retry.
    #[error("Incomplete PDU: need more data")]
    Incomplete,

    #[error("Invalid PDU length: {length}, must be {min}-{max}")]
    InvalidPduLength { length: u32, min: u32, max: u32 },

    #[error("Field '{field}' validation failed: {reason}")]
    FieldValidation { field: &'static str, reason: String },

    #[error("TLV parsing error: {0}")]
    TlvError(String),

    #[error("UTF-8 decoding error in field '{field}': {source}")]
    Utf8Error {
        field: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl CodecError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete)
    }

    /// Framing errors leave the byte stream unsynchronised; nothing after
    /// them can be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::InvalidPduLength { .. })
    }

    /// Convert body-level decode errors to SMPP command_status codes
    pub fn to_command_status(&self) -> CommandStatus {
        match self {
            CodecError::InvalidPduLength { .. } => CommandStatus::InvalidCommandLength,
            CodecError::Incomplete => CommandStatus::InvalidCommandLength,
            CodecError::FieldValidation { field, .. } | CodecError::Utf8Error { field, .. } => {
                match *field {
                    "system_id" => CommandStatus::InvalidSystemId,
                    "password" => CommandStatus::InvalidPassword,
                    _ => CommandStatus::BindFailed,
                }
            }
            CodecError::TlvError(_) => CommandStatus::SystemError,
        }
    }
}

/// A single SMPP PDU: the fixed header plus an opaque body.
///
/// `command_length` is not stored; it is always derived from the body so an
/// encoded PDU can never carry an inconsistent length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub command_id: CommandId,
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub body: Bytes,
}

impl Pdu {
    pub fn new(command_id: CommandId, sequence_number: u32, body: impl Into<Bytes>) -> Self {
        Pdu {
            command_id: command_id.normalized(),
            command_status: CommandStatus::Ok,
            sequence_number,
            body: body.into(),
        }
    }

    /// Header-only request, e.g. `enquire_link` or `unbind`.
    pub fn request(command_id: CommandId, sequence_number: u32) -> Self {
        Pdu::new(command_id, sequence_number, Bytes::new())
    }

    /// Response to `request`: `_resp` command id, same sequence number.
    pub fn response_to(request: &Pdu, command_status: CommandStatus, body: impl Into<Bytes>) -> Self {
        Pdu {
            command_id: request.command_id.response(),
            command_status: command_status.normalized(),
            sequence_number: request.sequence_number,
            body: body.into(),
        }
    }

    pub fn generic_nack(sequence_number: u32, command_status: CommandStatus) -> Self {
        Pdu {
            command_id: CommandId::GenericNack,
            command_status: command_status.normalized(),
            sequence_number,
            body: Bytes::new(),
        }
    }

    pub fn command_length(&self) -> u32 {
        (PduHeader::SIZE + self.body.len()) as u32
    }

    pub fn header(&self) -> PduHeader {
        PduHeader {
            command_length: self.command_length(),
            command_id: self.command_id,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
    }

    pub fn is_response(&self) -> bool {
        self.command_id.is_response()
    }
}

impl Encodable for Pdu {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.reserve(self.command_length() as usize);
        self.header().encode(buf);
        buf.put_slice(&self.body);
        Ok(())
    }

    fn encoded_size(&self) -> usize {
        self.command_length() as usize
    }
}

/// Stateless frame codec shared by all sessions.
#[derive(Debug, Clone, Copy)]
pub struct PduCodec {
    max_frame_size: u32,
}

impl Default for PduCodec {
    fn default() -> Self {
        Self::new(MAX_PDU_SIZE)
    }
}

impl PduCodec {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            max_frame_size: max_frame_size.max(PduHeader::SIZE as u32),
        }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Checks whether a complete frame is buffered and returns its length.
    ///
    /// Only the length prefix is inspected, so a bogus length is rejected as
    /// soon as four bytes arrived, without waiting for (or allocating) the
    /// declared amount. The cursor position is left untouched.
    pub fn check(&self, buf: &Cursor<&[u8]>) -> Result<usize, CodecError> {
        let available = &buf.get_ref()[buf.position() as usize..];
        if available.len() < 4 {
            return Err(CodecError::Incomplete);
        }

        let command_length =
            u32::from_be_bytes([available[0], available[1], available[2], available[3]]);

        if command_length < PduHeader::SIZE as u32 || command_length > self.max_frame_size {
            return Err(CodecError::InvalidPduLength {
                length: command_length,
                min: PduHeader::SIZE as u32,
                max: self.max_frame_size,
            });
        }

        if available.len() < command_length as usize {
            return Err(CodecError::Incomplete);
        }

        Ok(command_length as usize)
    }

    /// Decode one PDU, advancing the cursor past it on success.
    pub fn decode(&self, buf: &mut Cursor<&[u8]>) -> Result<Pdu, CodecError> {
        let len = self.check(buf)?;
        let header = PduHeader::decode(buf)?;
        let body = buf.copy_to_bytes(len - PduHeader::SIZE);

        Ok(Pdu {
            command_id: header.command_id,
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            body,
        })
    }

    /// Decode a buffer holding exactly one frame. The body shares the
    /// frame's allocation.
    pub fn decode_frame(&self, frame: &Bytes) -> Result<Pdu, CodecError> {
        let len = self.check(&Cursor::new(frame.as_ref()))?;
        if len != frame.len() {
            return Err(CodecError::FieldValidation {
                field: "command_length",
                reason: format!("declared {len} bytes, frame holds {}", frame.len()),
            });
        }

        let mut cursor = Cursor::new(frame.as_ref());
        let header = PduHeader::decode(&mut cursor)?;

        Ok(Pdu {
            command_id: header.command_id,
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            body: frame.slice(PduHeader::SIZE..),
        })
    }

    /// Encode `pdu`, recomputing `command_length` from the body.
    pub fn encode(&self, pdu: &Pdu, buf: &mut BytesMut) -> Result<(), CodecError> {
        let length = pdu.command_length();
        if length > self.max_frame_size {
            return Err(CodecError::InvalidPduLength {
                length,
                min: PduHeader::SIZE as u32,
                max: self.max_frame_size,
            });
        }
        pdu.encode(buf)
    }

    pub fn encode_to_bytes(&self, pdu: &Pdu) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(pdu.encoded_size());
        self.encode(pdu, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Decode a NUL-terminated C-octet string of at most `max_len` bytes
/// (terminator included).
pub fn decode_cstring(
    buf: &mut Cursor<&[u8]>,
    max_len: usize,
    field_name: &'static str,
) -> Result<String, CodecError> {
    let available = &buf.get_ref()[buf.position() as usize..];
    let window = &available[..available.len().min(max_len)];

    let end = window
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| CodecError::FieldValidation {
            field: field_name,
            reason: format!("missing NUL terminator within {max_len} bytes"),
        })?;

    let value = String::from_utf8(window[..end].to_vec()).map_err(|e| CodecError::Utf8Error {
        field: field_name,
        source: e,
    })?;
    buf.advance(end + 1);
    Ok(value)
}

/// Decode a single byte
pub fn decode_u8(buf: &mut Cursor<&[u8]>, field_name: &'static str) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::FieldValidation {
            field: field_name,
            reason: "truncated body".to_string(),
        });
    }
    Ok(buf.get_u8())
}

/// Encode a C-octet string, truncating to `max_len - 1` bytes of content.
pub fn encode_cstring(buf: &mut BytesMut, value: &str, max_len: usize) {
    let bytes = value.as_bytes();
    let actual_len = bytes.len().min(max_len.saturating_sub(1));
    buf.put_slice(&bytes[..actual_len]);
    buf.put_u8(0);
}
