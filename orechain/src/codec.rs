//! Canonical value encoding shared by hashing, mining, and the wire format.
//!
//! Every value has exactly one encoding, which makes the encoded bytes safe
//! to hash: two peers that agree on a value agree on its digest. The value
//! language is small:
//!
//! - byte strings: ASCII-decimal length, `:`, then the raw bytes (`4:spam`),
//! - integers: `i<decimal>e` with no leading zeros and no `-0` (`i42e`),
//! - lists: `l…e`,
//! - dictionaries: `d…e` with byte-string keys in strictly ascending
//!   raw-byte order.
//!
//! The decoder accepts only the canonical form. Anything else - redundant
//! zeros, unsorted or duplicate keys, trailing garbage - is a
//! [`DecodeError`], because a peer that emits it is either broken or probing
//! for consensus splits.

use std::collections::BTreeMap;
use std::fmt;

/// A value in the canonical encoding language.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// Raw byte string, length-prefixed on the wire.
    Bytes(Vec<u8>),
    /// Signed decimal integer.
    Integer(i128),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Dictionary keyed by byte strings; iteration order is the wire order.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Convenience constructor for a byte-string value.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(bytes.into())
    }

    /// Convenience constructor for an integer value.
    pub fn integer(value: impl Into<i128>) -> Self {
        Value::Integer(value.into())
    }

    /// Borrows the byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrows the list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrows the dictionary entries, if this is a dictionary.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

/// Error type returned when a byte stream is not a canonical encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    UnexpectedEnd,
    /// The byte at `offset` does not begin any known value form.
    UnknownTag { offset: usize, byte: u8 },
    /// Byte-string length prefix is missing, has leading zeros, or overflows.
    InvalidLength { offset: usize },
    /// Integer body is empty, has leading zeros, is `-0`, or overflows.
    InvalidInteger { offset: usize },
    /// Dictionary keys are not strictly ascending in raw-byte order.
    UnsortedKeys { offset: usize },
    /// Bytes remain after the top-level value.
    TrailingBytes { offset: usize },
    /// The decoded value is not shaped like the expected structure.
    Shape(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEnd => write!(f, "decoding error: unexpected end of input"),
            DecodeError::UnknownTag { offset, byte } => {
                write!(f, "decoding error: unknown tag 0x{byte:02x} at offset {offset}")
            }
            DecodeError::InvalidLength { offset } => {
                write!(f, "decoding error: malformed length prefix at offset {offset}")
            }
            DecodeError::InvalidInteger { offset } => {
                write!(f, "decoding error: malformed integer at offset {offset}")
            }
            DecodeError::UnsortedKeys { offset } => {
                write!(
                    f,
                    "decoding error: dictionary keys not strictly ascending at offset {offset}"
                )
            }
            DecodeError::TrailingBytes { offset } => {
                write!(f, "decoding error: trailing bytes at offset {offset}")
            }
            DecodeError::Shape(msg) => write!(f, "decoding error: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encodes `value` into its unique canonical byte form.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bytes(bytes) => write_bytes(bytes, out),
        Value::Integer(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                write_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            // BTreeMap iterates in ascending raw-byte key order, which is
            // exactly the canonical order.
            for (key, item) in entries {
                write_bytes(key, out);
                write_value(item, out);
            }
            out.push(b'e');
        }
    }
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

/// Decodes a canonical byte stream into a [`Value`].
///
/// Fails on anything that is not the unique canonical form, including bytes
/// left over after the top-level value.
pub fn decode(input: &[u8]) -> Result<Value, DecodeError> {
    let mut pos = 0usize;
    let value = read_value(input, &mut pos)?;
    if pos != input.len() {
        return Err(DecodeError::TrailingBytes { offset: pos });
    }
    Ok(value)
}

fn read_value(input: &[u8], pos: &mut usize) -> Result<Value, DecodeError> {
    match input.get(*pos) {
        None => Err(DecodeError::UnexpectedEnd),
        Some(b'i') => read_integer(input, pos),
        Some(b'l') => {
            *pos += 1;
            let mut items = Vec::new();
            loop {
                match input.get(*pos) {
                    None => return Err(DecodeError::UnexpectedEnd),
                    Some(b'e') => {
                        *pos += 1;
                        return Ok(Value::List(items));
                    }
                    Some(_) => items.push(read_value(input, pos)?),
                }
            }
        }
        Some(b'd') => read_dict(input, pos),
        Some(b'0'..=b'9') => Ok(Value::Bytes(read_byte_string(input, pos)?)),
        Some(&byte) => Err(DecodeError::UnknownTag { offset: *pos, byte }),
    }
}

fn read_integer(input: &[u8], pos: &mut usize) -> Result<Value, DecodeError> {
    let start = *pos;
    *pos += 1; // consume 'i'
    let body_start = *pos;
    loop {
        match input.get(*pos) {
            None => return Err(DecodeError::UnexpectedEnd),
            Some(b'e') => break,
            Some(b'-') if *pos == body_start => *pos += 1,
            Some(b) if b.is_ascii_digit() => *pos += 1,
            Some(_) => return Err(DecodeError::InvalidInteger { offset: start }),
        }
    }
    let body = &input[body_start..*pos];
    *pos += 1; // consume 'e'

    let digits = match body {
        [] | [b'-'] => return Err(DecodeError::InvalidInteger { offset: start }),
        [b'-', rest @ ..] => rest,
        _ => body,
    };
    // No leading zeros; "-0" and "0…" are non-canonical.
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(DecodeError::InvalidInteger { offset: start });
    }
    if body[0] == b'-' && digits == b"0" {
        return Err(DecodeError::InvalidInteger { offset: start });
    }

    let text = std::str::from_utf8(body).expect("integer body is ASCII by construction");
    text.parse::<i128>()
        .map(Value::Integer)
        .map_err(|_| DecodeError::InvalidInteger { offset: start })
}

fn read_byte_string(input: &[u8], pos: &mut usize) -> Result<Vec<u8>, DecodeError> {
    let start = *pos;
    let mut end = *pos;
    while let Some(&b) = input.get(end) {
        if b == b':' {
            break;
        }
        if !b.is_ascii_digit() {
            return Err(DecodeError::InvalidLength { offset: start });
        }
        end += 1;
    }
    if input.get(end).is_none() {
        return Err(DecodeError::UnexpectedEnd);
    }
    let digits = &input[start..end];
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
        return Err(DecodeError::InvalidLength { offset: start });
    }

    let mut length: usize = 0;
    for &d in digits {
        length = length
            .checked_mul(10)
            .and_then(|l| l.checked_add((d - b'0') as usize))
            .ok_or(DecodeError::InvalidLength { offset: start })?;
    }

    *pos = end + 1; // past ':'
    if input.len() - *pos < length {
        return Err(DecodeError::UnexpectedEnd);
    }
    let bytes = input[*pos..*pos + length].to_vec();
    *pos += length;
    Ok(bytes)
}

fn read_dict(input: &[u8], pos: &mut usize) -> Result<Value, DecodeError> {
    *pos += 1; // consume 'd'
    let mut entries = BTreeMap::new();
    let mut previous_key: Option<Vec<u8>> = None;
    loop {
        match input.get(*pos) {
            None => return Err(DecodeError::UnexpectedEnd),
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::Dict(entries));
            }
            Some(_) => {
                let key_offset = *pos;
                let key = read_byte_string(input, pos)?;
                if let Some(previous) = &previous_key {
                    // Strictly ascending: equal keys (duplicates) are also
                    // non-canonical.
                    if key <= *previous {
                        return Err(DecodeError::UnsortedKeys { offset: key_offset });
                    }
                }
                let value = read_value(input, pos)?;
                previous_key = Some(key.clone());
                entries.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: Vec<(&[u8], Value)>) -> Value {
        Value::Dict(entries.into_iter().map(|(k, v)| (k.to_vec(), v)).collect())
    }

    #[test]
    fn encodes_integers_canonically() {
        assert_eq!(encode(&Value::integer(0)), b"i0e");
        assert_eq!(encode(&Value::integer(42)), b"i42e");
        assert_eq!(encode(&Value::integer(-7)), b"i-7e");
        assert_eq!(
            encode(&Value::Integer(i128::MAX)),
            format!("i{}e", i128::MAX).into_bytes()
        );
    }

    #[test]
    fn encodes_byte_strings_with_decimal_length() {
        assert_eq!(encode(&Value::bytes(*b"spam")), b"4:spam");
        assert_eq!(encode(&Value::bytes(Vec::new())), b"0:");
        assert_eq!(encode(&Value::bytes(vec![0u8; 12])), {
            let mut expected = b"12:".to_vec();
            expected.extend_from_slice(&[0u8; 12]);
            expected
        });
    }

    #[test]
    fn encodes_dict_keys_in_raw_byte_order() {
        // Insertion order must not leak into the wire form.
        let value = dict(vec![
            (b"nonce", Value::bytes(Vec::new())),
            (b"difficulty", Value::integer(3)),
            (b"index", Value::integer(1)),
        ]);
        assert_eq!(encode(&value), b"d10:difficultyi3e5:indexi1e5:nonce0:e");
    }

    #[test]
    fn round_trips_nested_values() {
        let value = Value::List(vec![
            Value::integer(-99),
            Value::bytes(*b"abc"),
            dict(vec![
                (b"k", Value::List(vec![Value::integer(0)])),
                (b"z", Value::bytes(vec![0xff, 0x00])),
            ]),
        ]);
        let decoded = decode(&encode(&value)).expect("canonical bytes should decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn rejects_non_canonical_integers() {
        assert_eq!(decode(b"ie"), Err(DecodeError::InvalidInteger { offset: 0 }));
        assert_eq!(decode(b"i-e"), Err(DecodeError::InvalidInteger { offset: 0 }));
        assert_eq!(decode(b"i-0e"), Err(DecodeError::InvalidInteger { offset: 0 }));
        assert_eq!(decode(b"i01e"), Err(DecodeError::InvalidInteger { offset: 0 }));
        assert_eq!(decode(b"i1-2e"), Err(DecodeError::InvalidInteger { offset: 0 }));
        // Magnitude past i128 is refused rather than wrapped.
        let huge = format!("i{}0e", i128::MAX);
        assert_eq!(
            decode(huge.as_bytes()),
            Err(DecodeError::InvalidInteger { offset: 0 })
        );
    }

    #[test]
    fn rejects_malformed_lengths() {
        assert_eq!(decode(b"01:a"), Err(DecodeError::InvalidLength { offset: 0 }));
        assert_eq!(decode(b":a"), Err(DecodeError::InvalidLength { offset: 0 }));
        assert_eq!(decode(b"4:spa"), Err(DecodeError::UnexpectedEnd));
        assert_eq!(decode(b"4"), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn rejects_unknown_tags_and_trailing_bytes() {
        assert_eq!(
            decode(b"x"),
            Err(DecodeError::UnknownTag { offset: 0, byte: b'x' })
        );
        assert_eq!(decode(b"i1ei2e"), Err(DecodeError::TrailingBytes { offset: 3 }));
        assert_eq!(decode(b"0:!"), Err(DecodeError::TrailingBytes { offset: 2 }));
    }

    #[test]
    fn rejects_unsorted_and_duplicate_dict_keys() {
        assert_eq!(
            decode(b"d1:b0:1:a0:e"),
            Err(DecodeError::UnsortedKeys { offset: 6 })
        );
        assert_eq!(
            decode(b"d1:a0:1:a0:e"),
            Err(DecodeError::UnsortedKeys { offset: 6 })
        );
        // Sorted keys are fine.
        assert!(decode(b"d1:a0:1:b0:e").is_ok());
    }

    #[test]
    fn rejects_truncated_containers() {
        assert_eq!(decode(b"l"), Err(DecodeError::UnexpectedEnd));
        assert_eq!(decode(b"li1e"), Err(DecodeError::UnexpectedEnd));
        assert_eq!(decode(b"d1:a0:"), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn dict_keys_must_be_byte_strings() {
        // An integer in key position fails the length-prefix scan.
        assert_eq!(
            decode(b"di1e0:e"),
            Err(DecodeError::InvalidLength { offset: 1 })
        );
    }

    #[test]
    fn display_messages_name_the_offset() {
        let err = DecodeError::UnsortedKeys { offset: 6 };
        assert_eq!(
            err.to_string(),
            "decoding error: dictionary keys not strictly ascending at offset 6"
        );
        let err = DecodeError::Shape("\"transactions\" is not a list".to_string());
        assert_eq!(
            err.to_string(),
            "decoding error: \"transactions\" is not a list"
        );
    }
}
