//! Canonical wire encoding of a [`FixRecord`].
//!
//! A payload is UTF-8 text of `;`-separated fields in a fixed order:
//!
//! ```text
//! v1;la=<lat>;lo=<lon>[;sp=<speed>][;tr=<track>];ts=<timestamp>
//! ```
//!
//! Numbers are written in the shortest decimal form that parses back to the
//! same `f64`, so decoding reproduces the record bit for bit. Values whose
//! plain form would run past [`MAX_NUMBER_LEN`] characters (tiny or huge
//! magnitudes) switch to exponent form, which keeps every payload within
//! [`MAX_PAYLOAD_LEN`] bytes.

use crate::prelude::{CodecError, CodecResult, FixRecord};
use std::iter::Peekable;
use std::str::Split;

pub const WIRE_VERSION: &str = "v1";

const SEPARATOR: char = ';';

/// Longest number text: the shortest exponent form of any finite `f64`.
pub const MAX_NUMBER_LEN: usize = 24;

/// Upper bound on an encoded payload: version plus five `;xx=<number>` fields.
pub const MAX_PAYLOAD_LEN: usize = WIRE_VERSION.len() + 5 * (4 + MAX_NUMBER_LEN);

/// Encodes a record. Fails only for records outside the valid ranges.
pub fn encode(record: &FixRecord) -> CodecResult<Vec<u8>> {
    record.validate()?;

    let mut out = String::with_capacity(64);
    out.push_str(WIRE_VERSION);
    push_field(&mut out, "la", record.latitude);
    push_field(&mut out, "lo", record.longitude);
    if let Some(speed) = record.speed {
        push_field(&mut out, "sp", speed);
    }
    if let Some(track) = record.track {
        push_field(&mut out, "tr", track);
    }
    push_field(&mut out, "ts", record.timestamp);
    Ok(out.into_bytes())
}

/// Strict inverse of [`encode`].
pub fn decode(payload: &[u8]) -> CodecResult<FixRecord> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::NotUtf8)?;
    let mut fields = FieldReader::new(text);

    let version = fields.parts.next().unwrap_or_default();
    if version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(version.to_string()));
    }

    let latitude = fields.required("la")?;
    let longitude = fields.required("lo")?;
    let speed = fields.optional("sp")?;
    let track = fields.optional("tr")?;
    let timestamp = fields.required("ts")?;
    fields.finish()?;

    let record = FixRecord {
        latitude,
        longitude,
        speed,
        track,
        timestamp,
    };
    record.validate()?;
    Ok(record)
}

fn push_field(out: &mut String, key: &str, value: f64) {
    out.push(SEPARATOR);
    out.push_str(key);
    out.push('=');
    let plain = value.to_string();
    if plain.len() <= MAX_NUMBER_LEN {
        out.push_str(&plain);
    } else {
        out.push_str(&format!("{:e}", value));
    }
}

struct FieldReader<'a> {
    parts: Peekable<Split<'a, char>>,
}

impl<'a> FieldReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            parts: text.split(SEPARATOR).peekable(),
        }
    }

    fn required(&mut self, key: &'static str) -> CodecResult<f64> {
        let part = self.parts.next().ok_or(CodecError::MissingField(key))?;
        match part.split_once('=') {
            Some((found, value)) if found == key => parse_number(key, value),
            _ => Err(CodecError::UnexpectedField {
                expected: key,
                found: part.to_string(),
            }),
        }
    }

    fn optional(&mut self, key: &'static str) -> CodecResult<Option<f64>> {
        let value = match self.parts.peek().copied().and_then(|part| part.split_once('=')) {
            Some((found, value)) if found == key => value,
            _ => return Ok(None),
        };
        let parsed = parse_number(key, value)?;
        self.parts.next();
        Ok(Some(parsed))
    }

    fn finish(mut self) -> CodecResult<()> {
        match self.parts.next() {
            Some(extra) => Err(CodecError::TrailingField(extra.to_string())),
            None => Ok(()),
        }
    }
}

fn parse_number(field: &'static str, value: &str) -> CodecResult<f64> {
    let invalid = || CodecError::InvalidNumber {
        field,
        value: value.to_string(),
    };
    // `f64::from_str` also accepts "inf" and "NaN"; the wire only carries
    // digits, a sign and an optional exponent.
    if value.is_empty()
        || value.len() > MAX_NUMBER_LEN
        || !value
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'e'))
    {
        return Err(invalid());
    }
    value.parse::<f64>().map_err(|_| invalid())
}
