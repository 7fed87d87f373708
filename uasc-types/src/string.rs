// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! Contains the implementation of `UAString`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::encoding::{
    read_length_prefixed, write_length_prefixed, DecodingOptions, EncodingResult, Error,
    SimpleBinaryDecodable, SimpleBinaryEncodable,
};

/// The OPC UA String type, named `UAString` so it does not collide with the Rust
/// `String`. Like `ByteString`, the null string carries no value and is distinct from
/// the empty string.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct UAString {
    /// The string value, `None` when null.
    pub value: Option<String>,
}

impl fmt::Display for UAString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "[null]"),
        }
    }
}

impl AsRef<str> for UAString {
    fn as_ref(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}

impl SimpleBinaryEncodable for UAString {
    fn byte_len(&self) -> usize {
        // Int32 length prefix plus the UTF-8 payload
        4 + self.value.as_ref().map_or(0, String::len)
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_length_prefixed(stream, self.value.as_deref().map(str::as_bytes))
    }
}

impl SimpleBinaryDecodable for UAString {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let value =
            read_length_prefixed(stream, decoding_options.max_string_length, "String")?
                .map(String::from_utf8)
                .transpose()
                .map_err(|e| Error::decoding(format!("String is not valid UTF-8: {e}")))?;
        Ok(UAString { value })
    }
}

impl From<&str> for UAString {
    fn from(value: &str) -> Self {
        UAString {
            value: Some(value.to_string()),
        }
    }
}

impl From<String> for UAString {
    fn from(value: String) -> Self {
        UAString { value: Some(value) }
    }
}

impl UAString {
    /// The null string.
    pub fn null() -> UAString {
        UAString::default()
    }

    /// Test if the string is null.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Test if the string is null or holds no characters.
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().map_or(true, |v| v.is_empty())
    }
}

#[test]
fn string_null() {
    let s = UAString::null();
    assert!(s.is_null());
    assert!(s.is_empty());
}

#[test]
fn string_value() {
    let s = UAString::from("abc");
    assert!(!s.is_null());
    assert!(!s.is_empty());
    assert_eq!(s.as_ref(), "abc");
}
