// ABOUTME: Buffered frame I/O over a byte stream for SMPP v3.4 sessions
// ABOUTME: Splits the inbound stream into PDUs and batches outbound responses

use crate::codec::{CodecError, Pdu, PduCodec};
use crate::error::SessionError;
use bytes::{Bytes, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Initial read buffer per connection. Sized for the common case of small
/// PDUs so that tens of thousands of idle sessions stay cheap; `BytesMut`
/// grows on demand for larger frames.
const READ_BUFFER_SIZE: usize = 1024;
const WRITE_BUFFER_SIZE: usize = 1024;

/// Send and receive PDUs on a stream.
///
/// Frames are read into `buffer` and split off once `PduCodec::check`
/// reports a complete frame. Writes go to a `BufWriter` and only reach the
/// socket on `flush`, so a burst of pipelined requests can be answered with
/// a single syscall.
///
/// The connection knows nothing about bind state; that lives in
/// [`Session`](crate::session::Session).
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    // The stream, decorated with a `BufWriter` for write level buffering.
    stream: BufWriter<S>,

    // The buffer for reading frames.
    buffer: BytesMut,

    codec: PduCodec,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(socket: S) -> Connection<S> {
        Self::with_codec(socket, PduCodec::default())
    }

    pub fn with_codec(socket: S, codec: PduCodec) -> Connection<S> {
        Connection {
            stream: BufWriter::with_capacity(WRITE_BUFFER_SIZE, socket),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            codec,
        }
    }

    /// Read a single PDU from the underlying stream.
    ///
    /// Waits until a complete frame is buffered. Bytes beyond the frame stay
    /// in the buffer for the next call. Returns the raw frame alongside the
    /// decoded PDU; the body of the PDU shares the frame's allocation.
    ///
    /// `None` means the peer closed the stream cleanly between frames. A
    /// close in the middle of a frame is `ConnectionReset`, and a frame whose
    /// length prefix is out of range is `Malformed`: the stream cannot be
    /// resynchronised after that.
    pub async fn read_frame(&mut self) -> Result<Option<(Bytes, Pdu)>, SessionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            // `0` indicates "end of stream".
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(SessionError::ConnectionReset)
                };
            }
        }
    }

    /// Split one complete frame off the read buffer, if there is one.
    fn parse_frame(&mut self) -> Result<Option<(Bytes, Pdu)>, SessionError> {
        let buf = Cursor::new(&self.buffer[..]);

        match self.codec.check(&buf) {
            Ok(len) => {
                let frame = self.buffer.split_to(len).freeze();
                let pdu = self
                    .codec
                    .decode_frame(&frame)
                    .map_err(SessionError::Malformed)?;
                Ok(Some((frame, pdu)))
            }
            // Not an error, just wait for more bytes.
            Err(CodecError::Incomplete) => Ok(None),
            Err(e) => Err(SessionError::Malformed(e)),
        }
    }

    /// True when another complete frame is already buffered, i.e. the peer
    /// pipelined requests and the next read will not touch the socket.
    pub fn has_buffered_frame(&self) -> bool {
        self.codec.check(&Cursor::new(&self.buffer[..])).is_ok()
    }

    /// Encode `pdu` into the write buffer and return the encoded bytes.
    ///
    /// Nothing reaches the socket until [`flush`](Self::flush) is called or
    /// the write buffer fills up.
    pub async fn write_pdu(&mut self, pdu: &Pdu) -> Result<Bytes, SessionError> {
        let encoded = self
            .codec
            .encode_to_bytes(pdu)
            .map_err(SessionError::Encode)?;
        self.stream.write_all(&encoded).await?;
        Ok(encoded)
    }

    pub async fn flush(&mut self) -> Result<(), SessionError> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush pending writes and shut the write half down.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }
}
