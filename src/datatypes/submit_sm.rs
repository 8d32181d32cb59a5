use crate::codec::{CodecError, Encodable, decode_cstring, encode_cstring};
use bytes::BytesMut;
use std::io::Cursor;

const MESSAGE_ID_MAX: usize = 65;

/// Body of submit_sm_resp. The server acknowledges receipt only, so the
/// message_id is normally empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmitSmResponse {
    pub message_id: String,
}

impl SubmitSmResponse {
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut buf = Cursor::new(body);
        Ok(Self {
            message_id: decode_cstring(&mut buf, MESSAGE_ID_MAX, "message_id")?,
        })
    }
}

impl Encodable for SubmitSmResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_cstring(buf, &self.message_id, MESSAGE_ID_MAX);
        Ok(())
    }

    fn encoded_size(&self) -> usize {
        self.message_id.len().min(MESSAGE_ID_MAX - 1) + 1
    }
}
