// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Binary encoding traits and little-endian scalar helpers shared by every wire type in
//! the stack.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
    io::{Cursor, Read, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{constants, status_code::StatusCode};

/// Result of an encoding or decoding operation.
pub type EncodingResult<T> = std::result::Result<T, Error>;

/// The request a failure belongs to, as far as it could be established when the failure
/// happened. Both halves are optional: framing failures know neither, a failure after the
/// sequence header knows the request id, and one past the request header knows both.
#[derive(Debug, Default, Clone, Copy)]
struct RequestContext {
    id: Option<u32>,
    handle: Option<u32>,
}

/// A failure inside the stack: a typed status code, the underlying cause, and whatever
/// request context was known at the point of failure.
#[derive(Debug)]
pub struct Error {
    status: StatusCode,
    request: RequestContext,
    cause: Box<dyn StdError + Send + Sync>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.cause)?;
        if let Some(id) = self.request.id {
            write!(f, " (request id {})", id)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl Error {
    /// An error carrying `status`, caused by `cause`.
    pub fn new(status: StatusCode, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            status,
            request: RequestContext::default(),
            cause: cause.into(),
        }
    }

    /// A `BadDecodingError` caused by `cause`.
    pub fn decoding(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(StatusCode::BadDecodingError, cause)
    }

    /// A `BadEncodingError` caused by `cause`.
    pub fn encoding(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(StatusCode::BadEncodingError, cause)
    }

    /// Attach the request id and handle this failure belongs to.
    pub fn with_context(mut self, request_id: Option<u32>, request_handle: Option<u32>) -> Self {
        self.request = RequestContext {
            id: request_id,
            handle: request_handle,
        };
        self
    }

    /// Attach the request id this failure belongs to.
    pub fn with_request_id(mut self, id: u32) -> Self {
        self.request.id = Some(id);
        self
    }

    /// Attach the request handle this failure belongs to.
    pub fn with_request_handle(mut self, handle: u32) -> Self {
        self.request.handle = Some(handle);
        self
    }

    /// The status code of this failure.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The request id this failure belongs to, if it was known.
    pub fn request_id(&self) -> Option<u32> {
        self.request.id
    }

    /// Request id and handle together, present only when both were known.
    pub fn full_context(&self) -> Option<(u32, u32)> {
        self.request.id.zip(self.request.handle)
    }
}

impl From<Error> for StatusCode {
    fn from(value: Error) -> Self {
        log::error!("{}", value);
        value.status()
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        value.status().into()
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::decoding(value)
    }
}

#[derive(Clone, Debug)]
/// Limits applied while decoding, derived from the negotiated transport parameters.
/// A limit of 0 means no limit for the message level fields, and a hard 0 for the
/// string and array fields.
pub struct DecodingOptions {
    /// Maximum size of a message in bytes.
    pub max_message_size: usize,
    /// Maximum number of chunks in a message.
    pub max_chunk_count: usize,
    /// Maximum length in bytes of a decoded string.
    pub max_string_length: usize,
    /// Maximum length in bytes of a decoded byte string.
    pub max_byte_string_length: usize,
    /// Maximum number of elements in a decoded array.
    pub max_array_length: usize,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        DecodingOptions {
            max_message_size: constants::MAX_MESSAGE_SIZE,
            max_chunk_count: constants::MAX_CHUNK_COUNT,
            max_string_length: constants::MAX_STRING_LENGTH,
            max_byte_string_length: constants::MAX_BYTE_STRING_LENGTH,
            max_array_length: constants::MAX_ARRAY_LENGTH,
        }
    }
}

impl DecodingOptions {
    /// Tight limits for decoding small embedded values.
    pub fn minimal() -> Self {
        DecodingOptions {
            max_string_length: 8192,
            max_byte_string_length: 8192,
            max_array_length: 8192,
            ..Default::default()
        }
    }

    /// For test only. Having a separate function makes it easier to control calls to
    /// DecodingOptions::default().
    pub fn test() -> Self {
        Self::default()
    }
}

/// Implemented by every type with an OPC UA binary representation.
///
/// `byte_len` must agree exactly with what `encode` writes; buffers are sized from it
/// before encoding starts.
pub trait SimpleBinaryEncodable {
    /// The exact number of bytes `encode` will produce.
    fn byte_len(&self) -> usize;

    /// Write the binary form to `stream`.
    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()>;

    /// Encode into a fresh byte vector. Handy for tests and one-off values; streaming
    /// into an existing buffer is preferred everywhere else.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::with_capacity(self.byte_len()));
        let _ = self.encode(&mut buffer);
        buffer.into_inner()
    }
}

/// The decoding half of [SimpleBinaryEncodable]. Implementations must honor the limits
/// in the decoding options and fail rather than allocate past them.
pub trait SimpleBinaryDecodable: Sized {
    /// Read one value from `stream`.
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self>;
}

/// Writes an unsigned byte to the stream.
pub fn write_u8<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
where
    T: Into<u8>,
{
    stream.write_u8(value.into()).map_err(Error::encoding)
}

/// Writes an unsigned 16-bit value to the stream.
pub fn write_u16<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
where
    T: Into<u16>,
{
    stream
        .write_u16::<LittleEndian>(value.into())
        .map_err(Error::encoding)
}

/// Writes a signed 32-bit value to the stream.
pub fn write_i32<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
where
    T: Into<i32>,
{
    stream
        .write_i32::<LittleEndian>(value.into())
        .map_err(Error::encoding)
}

/// Writes an unsigned 32-bit value to the stream.
pub fn write_u32<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
where
    T: Into<u32>,
{
    stream
        .write_u32::<LittleEndian>(value.into())
        .map_err(Error::encoding)
}

/// Writes a signed 64-bit value to the stream.
pub fn write_i64<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
where
    T: Into<i64>,
{
    stream
        .write_i64::<LittleEndian>(value.into())
        .map_err(Error::encoding)
}

/// Reads an unsigned byte from the stream.
pub fn read_u8<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<u8> {
    stream.read_u8().map_err(Error::decoding)
}

/// Reads an unsigned 16-bit value from the stream.
pub fn read_u16<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<u16> {
    stream.read_u16::<LittleEndian>().map_err(Error::decoding)
}

/// Reads a signed 32-bit value from the stream.
pub fn read_i32<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<i32> {
    stream.read_i32::<LittleEndian>().map_err(Error::decoding)
}

/// Reads an unsigned 32-bit value from the stream.
pub fn read_u32<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<u32> {
    stream.read_u32::<LittleEndian>().map_err(Error::decoding)
}

/// Reads a signed 64-bit value from the stream.
pub fn read_i64<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<i64> {
    stream.read_i64::<LittleEndian>().map_err(Error::decoding)
}

/// Reads the length prefix and payload of a string or byte string. `None` is the null
/// value, encoded as a length of -1.
pub(crate) fn read_length_prefixed<R: Read + ?Sized>(
    stream: &mut R,
    max_length: usize,
    what: &str,
) -> EncodingResult<Option<Vec<u8>>> {
    let length = read_i32(stream)?;
    match length {
        -1 => Ok(None),
        len if len < -1 => Err(Error::decoding(format!(
            "{what} has negative length {len}"
        ))),
        len if len as usize > max_length => Err(Error::decoding(format!(
            "{what} of length {len} exceeds the limit of {max_length} bytes"
        ))),
        len => {
            let mut payload = vec![0u8; len as usize];
            stream.read_exact(&mut payload).map_err(Error::decoding)?;
            Ok(Some(payload))
        }
    }
}

/// Writes a string or byte string as its length prefix and payload. `None` is the null
/// value, encoded as a length of -1.
pub(crate) fn write_length_prefixed<W: Write + ?Sized>(
    stream: &mut W,
    value: Option<&[u8]>,
) -> EncodingResult<()> {
    match value {
        None => write_i32(stream, -1),
        Some(payload) => {
            write_i32(stream, payload.len() as i32)?;
            stream.write_all(payload).map_err(Error::encoding)
        }
    }
}

macro_rules! scalar_codec {
    ($t:ty, $size:literal, $write:ident, $read:ident) => {
        impl SimpleBinaryEncodable for $t {
            fn byte_len(&self) -> usize {
                $size
            }

            fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
                $write(stream, *self)
            }
        }

        impl SimpleBinaryDecodable for $t {
            fn decode<S: Read + ?Sized>(
                stream: &mut S,
                _: &DecodingOptions,
            ) -> EncodingResult<Self> {
                $read(stream)
            }
        }
    };
}

scalar_codec!(u8, 1, write_u8, read_u8);
scalar_codec!(u16, 2, write_u16, read_u16);
scalar_codec!(i32, 4, write_i32, read_i32);
scalar_codec!(u32, 4, write_u32, read_u32);
scalar_codec!(i64, 8, write_i64, read_i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_request_context() {
        let e = Error::new(StatusCode::BadSecurityChecksFailed, "broken");
        assert!(e.full_context().is_none());
        assert!(e.request_id().is_none());

        let e = e.with_request_id(3).with_request_handle(9);
        assert_eq!(e.request_id(), Some(3));
        assert_eq!(e.full_context(), Some((3, 9)));
        assert_eq!(e.status(), StatusCode::BadSecurityChecksFailed);
        assert!(e.to_string().contains("request id 3"));
    }

    #[test]
    fn length_prefixed_round_trip() {
        let mut buf = Vec::new();
        write_length_prefixed(&mut buf, Some(&[1, 2, 3])).unwrap();
        write_length_prefixed(&mut buf, None).unwrap();

        let mut stream = Cursor::new(buf);
        assert_eq!(
            read_length_prefixed(&mut stream, 16, "value").unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(read_length_prefixed(&mut stream, 16, "value").unwrap(), None);
    }

    #[test]
    fn length_prefixed_respects_limit() {
        let mut buf = Vec::new();
        write_length_prefixed(&mut buf, Some(&[0u8; 32])).unwrap();
        assert!(read_length_prefixed(&mut Cursor::new(buf), 16, "value").is_err());
    }
}
