//! RPC wire header, spec §6.3 / §4.5, byte-for-byte from `websocket.c`'s
//! `mx_header_t` and `mx_websocket_header_build`/`_format_int`/
//! `_format_string`:
//!
//! ```text
//! #VV.LLLLLLLL.OOOOOOOO.MMMMMMMM.attr="val" attr2="val2"\n<body>
//! ```
//!
//! `VV` is the 2-digit wire version, `LLLLLLLL` the 8-digit zero-padded
//! total message length (header, attrs, the trailing `\n`, and body),
//! `OOOOOOOO` the 8-byte space-padded operation name, `MMMMMMMM` the
//! 8-digit zero-padded muxid, followed by zero or more `name="value"`
//! attribute pairs and a `\n` trailer.

use std::fmt;

use crate::error::{Error, Result};

pub const WIRE_VERSION: &str = "01";
const OP_FIELD_WIDTH: usize = 8;
const LEN_FIELD_WIDTH: usize = 8;
const MUXID_FIELD_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Rpc,
    Reply,
    Complete,
    Hostkey,
    Psphrase,
    Psword,
    Error,
    Htmlrpc,
    Authinit,
    Data,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Reply => "reply",
            Self::Complete => "complete",
            Self::Hostkey => "hostkey",
            Self::Psphrase => "psphrase",
            Self::Psword => "psword",
            Self::Error => "error",
            Self::Htmlrpc => "htmlrpc",
            Self::Authinit => "authinit",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim_end() {
            "rpc" => Self::Rpc,
            "reply" => Self::Reply,
            "complete" => Self::Complete,
            "hostkey" => Self::Hostkey,
            "psphrase" => Self::Psphrase,
            "psword" => Self::Psword,
            "error" => Self::Error,
            "htmlrpc" => Self::Htmlrpc,
            "authinit" => Self::Authinit,
            "data" => Self::Data,
            other => return Err(Error::UnknownOperation(other.to_string())),
        })
    }
}

/// A parsed wire header, attrs preserved in arrival order.
#[derive(Debug, Clone)]
pub struct Header {
    pub operation: Operation,
    pub muxid: u32,
    pub attrs: Vec<(String, String)>,
}

impl Header {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Builds a complete wire message: header line plus `body`. `attrs` are
/// rendered `name="value"` separated by single spaces, in the order given.
pub fn build_message(operation: Operation, muxid: u32, attrs: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let op_field = pad_op(operation.as_str());
    let muxid_field = format!("{muxid:0width$}", width = MUXID_FIELD_WIDTH);
    let attrs_field = render_attrs(attrs);

    // `\n` trailer is counted in the length; the length field itself,
    // being fixed-width, does not change the total once chosen.
    let prefix_len = 1 + 2 + 1 + LEN_FIELD_WIDTH + 1 + OP_FIELD_WIDTH + 1 + MUXID_FIELD_WIDTH + 1;
    let total_len = prefix_len + attrs_field.len() + 1 + body.len();

    let mut out = Vec::with_capacity(total_len);
    out.push(b'#');
    out.extend_from_slice(WIRE_VERSION.as_bytes());
    out.push(b'.');
    out.extend_from_slice(format!("{total_len:0width$}", width = LEN_FIELD_WIDTH).as_bytes());
    out.push(b'.');
    out.extend_from_slice(op_field.as_bytes());
    out.push(b'.');
    out.extend_from_slice(muxid_field.as_bytes());
    out.push(b'.');
    out.extend_from_slice(attrs_field.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(body);
    out
}

fn pad_op(op: &str) -> String {
    format!("{op:<width$}", width = OP_FIELD_WIDTH)
}

fn render_attrs(attrs: &[(&str, &str)]) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses one wire message out of `buf`, returning the header, the body
/// bytes, and the number of bytes of `buf` consumed. Returns `Ok(None)` if
/// `buf` does not yet hold a complete length-prefixed message.
pub fn parse_message(buf: &[u8]) -> Result<Option<(Header, Vec<u8>, usize)>> {
    let prefix_len = 1 + 2 + 1 + LEN_FIELD_WIDTH + 1 + OP_FIELD_WIDTH + 1 + MUXID_FIELD_WIDTH + 1;
    if buf.len() < prefix_len {
        return Ok(None);
    }
    if buf[0] != b'#' {
        return Err(Error::BadHeader("missing leading '#'".into()));
    }

    let mut cursor = 1;
    let version = field(buf, &mut cursor, 2)?;
    if version != WIRE_VERSION {
        return Err(Error::BadHeader(format!("unsupported wire version {version}")));
    }
    expect_dot(buf, &mut cursor)?;

    let len_field = field(buf, &mut cursor, LEN_FIELD_WIDTH)?;
    let total_len: usize = len_field
        .parse()
        .map_err(|_| Error::BadHeader(format!("bad length field {len_field}")))?;
    expect_dot(buf, &mut cursor)?;

    if buf.len() < total_len {
        return Ok(None);
    }

    let op_field = field(buf, &mut cursor, OP_FIELD_WIDTH)?;
    let operation: Operation = op_field.trim_end().parse()?;
    expect_dot(buf, &mut cursor)?;

    let muxid_field = field(buf, &mut cursor, MUXID_FIELD_WIDTH)?;
    let muxid: u32 = muxid_field
        .parse()
        .map_err(|_| Error::BadHeader(format!("bad muxid field {muxid_field}")))?;
    expect_dot(buf, &mut cursor)?;

    let newline_pos = buf[cursor..total_len]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| Error::BadHeader("missing '\\n' trailer".into()))?
        + cursor;
    let attrs_str = std::str::from_utf8(&buf[cursor..newline_pos])
        .map_err(|_| Error::BadHeader("attrs not valid utf-8".into()))?;
    let attrs = parse_attrs(attrs_str)?;

    let body = buf[newline_pos + 1..total_len].to_vec();
    Ok(Some((Header { operation, muxid, attrs }, body, total_len)))
}

fn field<'a>(buf: &'a [u8], cursor: &mut usize, width: usize) -> Result<&'a str> {
    if *cursor + width > buf.len() {
        return Err(Error::BadHeader("truncated header field".into()));
    }
    let s = std::str::from_utf8(&buf[*cursor..*cursor + width])
        .map_err(|_| Error::BadHeader("header field not valid utf-8".into()))?;
    *cursor += width;
    Ok(s)
}

fn expect_dot(buf: &[u8], cursor: &mut usize) -> Result<()> {
    if buf.get(*cursor) != Some(&b'.') {
        return Err(Error::BadHeader("expected '.' separator".into()));
    }
    *cursor += 1;
    Ok(())
}

fn parse_attrs(s: &str) -> Result<Vec<(String, String)>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let mut attrs = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| Error::BadHeader("attr missing '='".into()))?;
        let key = rest[..eq].to_string();
        let after_eq = &rest[eq + 1..];
        if !after_eq.starts_with('"') {
            return Err(Error::BadHeader("attr value not quoted".into()));
        }
        let close = after_eq[1..]
            .find('"')
            .ok_or_else(|| Error::BadHeader("attr value missing closing quote".into()))?
            + 1;
        let value = after_eq[1..close].to_string();
        attrs.push((key, value));
        rest = after_eq[close + 1..].trim_start();
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_parses_a_round_trip() {
        let msg = build_message(Operation::Rpc, 7, &[("target", "r1"), ("user", "admin")], b"<rpc/>");
        let (header, body, consumed) = parse_message(&msg).unwrap().unwrap();
        assert_eq!(consumed, msg.len());
        assert_eq!(header.operation, Operation::Rpc);
        assert_eq!(header.muxid, 7);
        assert_eq!(header.attr("target"), Some("r1"));
        assert_eq!(header.attr("user"), Some("admin"));
        assert_eq!(body, b"<rpc/>");
    }

    #[test]
    fn incomplete_buffer_returns_none() {
        let msg = build_message(Operation::Reply, 1, &[], b"0123456789");
        assert!(parse_message(&msg[..msg.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn operation_field_is_space_padded_to_eight_bytes() {
        let msg = build_message(Operation::Rpc, 0, &[], b"");
        let op_field = &msg[1 + 2 + 1 + LEN_FIELD_WIDTH + 1..][..OP_FIELD_WIDTH];
        assert_eq!(op_field, b"rpc     ");
    }

    #[test]
    fn rejects_bad_magic_byte() {
        let mut msg = build_message(Operation::Rpc, 0, &[], b"");
        msg[0] = b'!';
        assert!(parse_message(&msg).is_err());
    }
}
