use std::{
    fmt,
    io::{self, Read, Write},
};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    de::{Decoder, read::Reader},
    decode_from_std_read,
    enc::{Encoder, write::Writer},
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use log::trace;
use thiserror::Error;

use crate::message::{MediaType, Message};

/// Sentinel closing every frame.
pub const END_MARKER: u8 = 0xCE;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),
    #[error("content is {0} bytes long, at most {max} bytes can be framed", max = u32::MAX)]
    ContentTooLong(usize),
    #[error("connection is closed")]
    Closed,
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Length of a content as written in the frame header.
pub fn content_length(len: usize) -> Result<u32, TransportError> {
    u32::try_from(len).map_err(|_| TransportError::ContentTooLong(len))
}

/// Binary framing of [`Message`]s.
///
/// ```text
/// u16 media type length | media type | u32 content length | content | u8 0xCE
/// ```
///
/// Integers are big-endian.
#[derive(Clone, Copy)]
pub struct Codec {
    config: Configuration<BigEndian, Fixint>,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub fn new() -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self { config }
    }

    /// Encode a whole frame, nothing is produced when the content can't be framed.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, TransportError> {
        content_length(message.content().len())?;
        Ok(encode_to_vec(message, self.config)?)
    }

    pub fn write<W: Write>(&self, dst: &mut W, message: &Message) -> Result<(), TransportError> {
        let frame = self.encode(message)?;
        dst.write_all(&frame)?;
        dst.flush()?;
        Ok(())
    }

    /// Decode one frame.
    ///
    /// A stream at its end, a truncated frame or a malformed one all yield
    /// `Ok(None)`; only I/O failures other than reaching the end of the stream
    /// are reported. Bytes following the frame are left unread.
    pub fn decode<R: Read>(&self, src: &mut R) -> Result<Option<Message>, TransportError> {
        match decode_from_std_read(src, self.config) {
            Ok(message) => Ok(Some(message)),
            Err(DecodeError::Io { inner, .. }) if inner.kind() != io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Io(inner))
            }
            Err(e) => {
                trace!("no message decoded: {e}");
                Ok(None)
            }
        }
    }
}

impl Encode for Message {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let media_type = self.media_type().to_string();
        let media_type_len = u16::try_from(media_type.len())
            .map_err(|_| EncodeError::Other("media type is too long to be framed"))?;
        let content_len = u32::try_from(self.content().len())
            .map_err(|_| EncodeError::Other("content is too long to be framed"))?;

        media_type_len.encode(encoder)?;
        encoder.writer().write(media_type.as_bytes())?;
        content_len.encode(encoder)?;
        encoder.writer().write(self.content())?;
        END_MARKER.encode(encoder)
    }
}

impl<Context> Decode<Context> for Message {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let media_type_len: u16 = Decode::decode(decoder)?;
        let media_type = read_bytes(decoder, media_type_len as usize)?;
        let media_type: MediaType = std::str::from_utf8(&media_type)
            .map_err(|_| DecodeError::Other("media type is not valid UTF-8"))?
            .parse()
            .map_err(|_| DecodeError::Other("invalid media type"))?;

        let content_len: u32 = Decode::decode(decoder)?;
        let content = read_bytes(decoder, content_len as usize)?;
        if content.len() != content_len as usize {
            return Err(DecodeError::Other("content length mismatch"));
        }

        let end: u8 = Decode::decode(decoder)?;
        if end != END_MARKER {
            return Err(DecodeError::Other("missing end marker"));
        }

        Ok(Message::new(media_type, content))
    }
}

/// Read `len` bytes without trusting `len` for the initial allocation.
fn read_bytes<D: Decoder>(decoder: &mut D, len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut bytes = Vec::with_capacity(len.min(CHUNK_SIZE));
    let mut chunk = [0u8; CHUNK_SIZE];

    while bytes.len() < len {
        let n = (len - bytes.len()).min(CHUNK_SIZE);
        decoder.reader().read(&mut chunk[..n])?;
        bytes.extend_from_slice(&chunk[..n]);
    }
    Ok(bytes)
}
