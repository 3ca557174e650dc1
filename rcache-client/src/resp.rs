//! # RESP Encoding and Parsing
//!
//! Purpose: Encode client commands as arrays of bulk strings and decode one
//! server reply at a time, pulling bytes from a retrying reply source.
//!
//! ## Design Principles
//! 1. **Binary-Safe**: Arguments and bulk payloads are raw bytes; the length
//!    prefix is the only framing.
//! 2. **Source-Driven Parsing**: The decoder asks its source for a header
//!    line or an exact byte count and never buffers ahead on its own.
//! 3. **Ordered Recursion**: Array elements are decoded depth-first in the
//!    order the server sent them, bounded by `MAX_DEPTH`.
//! 4. **Report, Then Return**: Error replies and unknown type bytes are sent
//!    to the diagnostics target before being handed back to the caller.

use bytes::{BufMut, BytesMut};

use rcache_common::{CacheError, CacheResult};

/// `tracing` target that acts as the process-wide diagnostics channel.
pub const DIAGNOSTICS: &str = "rcache::diagnostics";

/// Deepest array nesting accepted from the server.
pub const MAX_DEPTH: usize = 64;

/// Largest bulk payload accepted from the server (512 MiB, the server's own
/// default `proto-max-bulk-len`).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK` style replies. See `status_code` for the numeric reading.
    Status(Vec<u8>),
    /// `-ERR ...` replies.
    Error(Vec<u8>),
    /// `:123` replies.
    Integer(i64),
    /// `$...` bulk strings, with `None` for the `$-1` null.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays; may nest and may be empty.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Numeric status carried by a `Status` reply.
    ///
    /// Status text is read as a leading signed integer, so `+OK` yields 0 and
    /// `+3 done` yields 3. Other variants return `None`.
    pub fn status_code(&self) -> Option<i64> {
        match self {
            RespValue::Status(text) => Some(leading_i64(text)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Bulk(None))
    }

    /// Error text of an `Error` reply, lossily decoded.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Converts an `Error` reply into `CacheError::Remote`, passing anything
    /// else through.
    pub fn into_result(self) -> CacheResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(CacheError::Remote(
                String::from_utf8_lossy(&message).into_owned(),
            )),
            other => Ok(other),
        }
    }
}

/// Byte source the decoder pulls from.
///
/// Implementations own the retry policy; a failed read surfaces as
/// `CacheError::ProtocolRead`.
pub trait ReplySource {
    /// Reads one line into `buf` with the trailing CRLF removed.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> CacheResult<()>;

    /// Reads exactly `len` bytes.
    fn read_exact(&mut self, len: usize) -> CacheResult<Vec<u8>>;

    /// Reads and drops `len` bytes.
    fn discard(&mut self, len: usize) -> CacheResult<()> {
        self.read_exact(len).map(|_| ())
    }
}

/// Encodes a command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut BytesMut) {
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    out.reserve(payload + 16);

    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Reads one complete reply from the source.
pub fn read_response<R: ReplySource + ?Sized>(
    source: &mut R,
    line_buf: &mut Vec<u8>,
) -> CacheResult<RespValue> {
    read_value(source, line_buf, 0)
}

fn read_value<R: ReplySource + ?Sized>(
    source: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> CacheResult<RespValue> {
    if depth > MAX_DEPTH {
        return Err(CacheError::ProtocolDecode(format!(
            "reply nesting deeper than {} levels",
            MAX_DEPTH
        )));
    }

    source.read_line(line_buf)?;
    let Some((&kind, rest)) = line_buf.split_first() else {
        return Err(CacheError::ProtocolDecode("empty reply line".to_string()));
    };

    match kind {
        b'-' => {
            let message = rest.to_vec();
            tracing::warn!(
                target: DIAGNOSTICS,
                reply = %String::from_utf8_lossy(&message),
                "server returned an error reply"
            );
            Ok(RespValue::Error(message))
        }
        b'+' => Ok(RespValue::Status(rest.to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            read_bulk(source, len)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            read_array(source, len, line_buf, depth)
        }
        other => {
            tracing::error!(
                target: DIAGNOSTICS,
                type_byte = other,
                line = %String::from_utf8_lossy(line_buf),
                "unrecognized reply type"
            );
            Err(CacheError::ProtocolDecode(format!(
                "unrecognized reply type byte 0x{:02x}",
                other
            )))
        }
    }
}

fn read_bulk<R: ReplySource + ?Sized>(source: &mut R, len: i64) -> CacheResult<RespValue> {
    if len == -1 {
        return Ok(RespValue::Bulk(None));
    }
    if len < 0 {
        return Err(CacheError::ProtocolDecode(format!("invalid bulk length {}", len)));
    }
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_BULK_LEN)
        .ok_or_else(|| CacheError::ProtocolDecode(format!("bulk length {} too large", len)))?;

    let data = if len == 0 {
        Vec::new()
    } else {
        source.read_exact(len)?
    };
    // Terminator after the payload is consumed without inspection.
    source.discard(2)?;
    Ok(RespValue::Bulk(Some(data)))
}

fn read_array<R: ReplySource + ?Sized>(
    source: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> CacheResult<RespValue> {
    if len <= 0 {
        return Ok(RespValue::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity(len.min(1024) as usize);
    for _ in 0..len {
        items.push(read_value(source, line_buf, depth + 1)?);
    }
    Ok(RespValue::Array(items))
}

fn parse_i64(data: &[u8]) -> CacheResult<i64> {
    let invalid = || {
        CacheError::ProtocolDecode(format!(
            "invalid integer in reply header: {:?}",
            String::from_utf8_lossy(data)
        ))
    };

    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(invalid()),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    // Negative values accumulate downwards so that i64::MIN fits.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or_else(invalid)?;
    }

    Ok(value)
}

/// Leading-integer reading of free text; no digits yields 0.
fn leading_i64(data: &[u8]) -> i64 {
    let text = String::from_utf8_lossy(data);
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for b in rest.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    if negative {
        -value
    } else {
        value
    }
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Digits go into a stack buffer first, then reversed into the output.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}
