// ABOUTME: Decoding of self-describing sample payloads returned by the agent
// ABOUTME: UBJSON to JSON, UTF-8 text to string, idx/N mime alias expansion

//! Sample payload codec.
//!
//! Points store samples as raw bytes plus a content type. Two content types
//! are self-describing and decoded before samples are handed back:
//!
//! | mime                        | alias   | decoded to       |
//! |-----------------------------|---------|------------------|
//! | `application/ubjson`        | `idx/1` | JSON value       |
//! | `text/plain; charset=utf8`  | `idx/2` | JSON string      |
//!
//! Anything else (or a payload that fails to decode) comes back as bytes.
//!
//! The UBJSON reader covers draft 12: scalars, strings, high-precision
//! numbers and both plain and optimized (`$` type / `#` count) containers.

use serde_json::{Map, Number, Value};
use thiserror::Error;

pub const UBJSON_MIME: &str = "application/ubjson";
pub const TEXT_MIME: &str = "text/plain; charset=utf8";

/// Nesting limit for containers
const MAX_DEPTH: usize = 128;

/// Elements of payload-free types (`Z`, `T`, `F`) one sample may declare.
/// These take no input bytes, so the input length does not bound them.
const MAX_ZERO_WIDTH_ELEMENTS: usize = 65_536;

/// Expand an `idx/N` alias into its full mime type
pub fn expand_mime(mime: &str) -> &str {
    match mime {
        "idx/1" => UBJSON_MIME,
        "idx/2" => TEXT_MIME,
        other => other,
    }
}

/// Result of decoding one sample payload
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Text(String),
    /// Undecodable; original bytes with the declared mime (if any)
    Bytes { data: Vec<u8>, mime: Option<String> },
}

/// Decode a sample according to its declared mime type
pub fn decode_sample(data: &[u8], mime: Option<&str>) -> Decoded {
    let Some(declared) = mime else {
        return Decoded::Bytes {
            data: data.to_vec(),
            mime: None,
        };
    };

    let expanded = expand_mime(declared).to_ascii_lowercase();
    let decoded = match expanded.as_str() {
        UBJSON_MIME => decode_ubjson(data).map(Decoded::Json),
        TEXT_MIME => std::str::from_utf8(data)
            .map(|s| Decoded::Text(s.to_string()))
            .map_err(|_| CodecError::InvalidUtf8),
        _ => {
            return Decoded::Bytes {
                data: data.to_vec(),
                mime: Some(expanded),
            }
        }
    };

    decoded.unwrap_or_else(|e| {
        tracing::warn!(mime = %expanded, error = %e, "Sample auto-decode failed, returning bytes");
        Decoded::Bytes {
            data: data.to_vec(),
            mime: Some(expanded),
        }
    })
}

// === UBJSON ===

/// Errors raised while reading UBJSON
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("Unknown marker {marker:?} at byte {offset}")]
    UnknownMarker { marker: char, offset: usize },

    #[error("Invalid length {0}")]
    InvalidLength(i64),

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Invalid high-precision number '{0}'")]
    InvalidNumber(String),

    #[error("Containers nested deeper than {MAX_DEPTH}")]
    TooDeep,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Decode a single UBJSON value occupying all of `bytes`
pub fn decode_ubjson(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader {
        buf: bytes,
        pos: 0,
        zero_width_budget: MAX_ZERO_WIDTH_ELEMENTS,
    };
    let marker = reader.next_marker()?;
    let value = reader.value(marker, 0)?;

    // Trailing no-ops are permitted
    while reader.peek() == Some(b'N') {
        reader.pos += 1;
    }
    match bytes.len() - reader.pos {
        0 => Ok(value),
        n => Err(CodecError::TrailingBytes(n)),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    zero_width_budget: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let b = self.peek().ok_or(CodecError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::UnexpectedEof(self.buf.len()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Next marker, skipping no-ops
    fn next_marker(&mut self) -> Result<u8, CodecError> {
        loop {
            let marker = self.byte()?;
            if marker != b'N' {
                return Ok(marker);
            }
        }
    }

    fn unknown(&self, marker: u8) -> CodecError {
        CodecError::UnknownMarker {
            marker: char::from(marker),
            offset: self.pos.saturating_sub(1),
        }
    }

    fn integer(&mut self, marker: u8) -> Result<i64, CodecError> {
        Ok(match marker {
            b'i' => i64::from(i8::from_be_bytes(self.array()?)),
            b'U' => i64::from(self.byte()?),
            b'I' => i64::from(i16::from_be_bytes(self.array()?)),
            b'l' => i64::from(i32::from_be_bytes(self.array()?)),
            b'L' => i64::from_be_bytes(self.array()?),
            other => return Err(self.unknown(other)),
        })
    }

    fn length(&mut self) -> Result<usize, CodecError> {
        let marker = self.next_marker()?;
        let n = self.integer(marker)?;
        usize::try_from(n).map_err(|_| CodecError::InvalidLength(n))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.length()?;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn value(&mut self, marker: u8, depth: usize) -> Result<Value, CodecError> {
        match marker {
            b'Z' => Ok(Value::Null),
            b'T' => Ok(Value::Bool(true)),
            b'F' => Ok(Value::Bool(false)),
            b'i' | b'U' | b'I' | b'l' | b'L' => Ok(Value::from(self.integer(marker)?)),
            b'd' => Ok(float(f64::from(f32::from_be_bytes(self.array()?)))),
            b'D' => Ok(float(f64::from_be_bytes(self.array()?))),
            b'H' => {
                let text = self.string()?;
                text.parse::<Number>()
                    .map(Value::Number)
                    .map_err(|_| CodecError::InvalidNumber(text))
            }
            b'C' => Ok(Value::String(char::from(self.byte()?).to_string())),
            b'S' => Ok(Value::String(self.string()?)),
            b'[' => self.list(depth + 1),
            b'{' => self.object(depth + 1),
            other => Err(self.unknown(other)),
        }
    }

    /// Optional `$type` and `#count` header of a container
    fn container_header(&mut self) -> Result<(Option<u8>, Option<usize>), CodecError> {
        let mut element_type = None;
        if self.peek() == Some(b'$') {
            self.pos += 1;
            element_type = Some(self.byte()?);
            if self.peek() != Some(b'#') {
                return Err(CodecError::UnexpectedEof(self.pos));
            }
        }
        let count = if self.peek() == Some(b'#') {
            self.pos += 1;
            Some(self.length()?)
        } else {
            None
        };
        Ok((element_type, count))
    }

    fn typed_or_marked(&mut self, element_type: Option<u8>, depth: usize) -> Result<Value, CodecError> {
        let marker = match element_type {
            Some(t) => t,
            None => self.next_marker()?,
        };
        self.value(marker, depth)
    }

    fn list(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep);
        }
        let (element_type, count) = self.container_header()?;
        let mut items = Vec::new();

        if let Some(count) = count {
            if matches!(element_type, Some(b'Z' | b'T' | b'F')) {
                self.zero_width_budget = self
                    .zero_width_budget
                    .checked_sub(count)
                    .ok_or_else(|| CodecError::InvalidLength(i64::try_from(count).unwrap_or(i64::MAX)))?;
            }
            // Bound the pre-allocation by what the input could actually hold
            items.reserve(count.min(self.buf.len() - self.pos));
            for _ in 0..count {
                items.push(self.typed_or_marked(element_type, depth)?);
            }
        } else {
            loop {
                let marker = self.next_marker()?;
                if marker == b']' {
                    break;
                }
                items.push(self.value(marker, depth)?);
            }
        }
        Ok(Value::Array(items))
    }

    fn object(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep);
        }
        let (element_type, count) = self.container_header()?;
        let mut map = Map::new();

        if let Some(count) = count {
            for _ in 0..count {
                let key = self.string()?;
                let value = self.typed_or_marked(element_type, depth)?;
                map.insert(key, value);
            }
        } else {
            loop {
                while self.peek() == Some(b'N') {
                    self.pos += 1;
                }
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    break;
                }
                let key = self.string()?;
                let marker = self.next_marker()?;
                map.insert(key, self.value(marker, depth)?);
            }
        }
        Ok(Value::Object(map))
    }
}

fn float(n: f64) -> Value {
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}
