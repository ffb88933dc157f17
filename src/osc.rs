//! OSC 1.0 packet encoder and decoder
//!
//! A packet is either a message or a bundle. Every field is aligned to 4 bytes.
//!
//! ```text
//! message: <address string> <type tag string> <arguments...>
//! bundle:  "#bundle" <u64 time tag> (<i32 size> <packet>)*
//! ```
//!
//! Type tags:
//! ```text
//! i - int32 (big-endian)
//! h - int64 (big-endian)
//! f - float32
//! d - float64
//! s - string (NUL terminated, padded)
//! b - blob (int32 length + bytes, padded)
//! T / F - true / false (no payload)
//! N - nil (no payload)
//! I - impulse (no payload)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const BUNDLE_TAG: &str = "#bundle";

/// Nested bundles beyond this depth are rejected.
const MAX_BUNDLE_DEPTH: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum OscError {
    #[error("packet truncated")]
    Truncated,
    #[error("string is not valid UTF-8")]
    InvalidString,
    #[error("address must start with '/': {0}")]
    InvalidAddress(String),
    #[error("type tag string must start with ','")]
    InvalidTypeTags,
    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),
    #[error("bundle element has invalid size {0}")]
    InvalidElementSize(i32),
    #[error("bundles nested too deeply")]
    NestingTooDeep,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Blob(Bytes),
    Bool(bool),
    Nil,
    Impulse,
}

impl OscArg {
    fn tag(&self) -> char {
        match self {
            Self::Int(_) => 'i',
            Self::Long(_) => 'h',
            Self::Float(_) => 'f',
            Self::Double(_) => 'd',
            Self::Str(_) => 's',
            Self::Blob(_) => 'b',
            Self::Bool(true) => 'T',
            Self::Bool(false) => 'F',
            Self::Nil => 'N',
            Self::Impulse => 'I',
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: OscArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.address.len() + 8 + self.args.len() * 8);
        write_string(&mut out, &self.address);

        let tags: String = std::iter::once(',')
            .chain(self.args.iter().map(OscArg::tag))
            .collect();
        write_string(&mut out, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => out.put_i32(*v),
                OscArg::Long(v) => out.put_i64(*v),
                OscArg::Float(v) => out.put_f32(*v),
                OscArg::Double(v) => out.put_f64(*v),
                OscArg::Str(s) => write_string(&mut out, s),
                OscArg::Blob(data) => {
                    out.put_i32(data.len() as i32);
                    out.put_slice(data);
                    out.put_bytes(0, padded_len(data.len()) - data.len());
                }
                OscArg::Bool(_) | OscArg::Nil | OscArg::Impulse => {}
            }
        }

        out.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle { time_tag: u64, packets: Vec<OscPacket> },
}

impl OscPacket {
    /// Flatten bundles into their messages, in order.
    pub fn into_messages(self) -> Vec<OscMessage> {
        match self {
            Self::Message(message) => vec![message],
            Self::Bundle { packets, .. } => packets
                .into_iter()
                .flat_map(OscPacket::into_messages)
                .collect(),
        }
    }
}

/// Decode one datagram
pub fn decode(datagram: &[u8]) -> Result<OscPacket, OscError> {
    let mut buf = Bytes::copy_from_slice(datagram);
    decode_packet(&mut buf, 0)
}

fn decode_packet(buf: &mut Bytes, depth: usize) -> Result<OscPacket, OscError> {
    if depth > MAX_BUNDLE_DEPTH {
        return Err(OscError::NestingTooDeep);
    }

    let head = read_string(buf)?;
    if head == BUNDLE_TAG {
        return decode_bundle(buf, depth);
    }
    if !head.starts_with('/') {
        return Err(OscError::InvalidAddress(head));
    }

    Ok(OscPacket::Message(OscMessage {
        args: decode_args(buf)?,
        address: head,
    }))
}

fn decode_bundle(buf: &mut Bytes, depth: usize) -> Result<OscPacket, OscError> {
    if buf.remaining() < 8 {
        return Err(OscError::Truncated);
    }
    let time_tag = buf.get_u64();

    let mut packets = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(OscError::Truncated);
        }
        let size = buf.get_i32();
        if size < 0 || size % 4 != 0 {
            return Err(OscError::InvalidElementSize(size));
        }
        let size = size as usize;
        if buf.remaining() < size {
            return Err(OscError::Truncated);
        }
        let mut element = buf.split_to(size);
        packets.push(decode_packet(&mut element, depth + 1)?);
    }

    Ok(OscPacket::Bundle { time_tag, packets })
}

fn decode_args(buf: &mut Bytes) -> Result<Vec<OscArg>, OscError> {
    // Older senders omit the type tag string for argument-less messages
    if !buf.has_remaining() {
        return Ok(Vec::new());
    }

    let tags = read_string(buf)?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::InvalidTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(read_fixed(buf, 4, Buf::get_i32)?),
            'h' => OscArg::Long(read_fixed(buf, 8, Buf::get_i64)?),
            'f' => OscArg::Float(read_fixed(buf, 4, Buf::get_f32)?),
            'd' => OscArg::Double(read_fixed(buf, 8, Buf::get_f64)?),
            's' => OscArg::Str(read_string(buf)?),
            'b' => OscArg::Blob(read_blob(buf)?),
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            other => return Err(OscError::UnsupportedTag(other)),
        };
        args.push(arg);
    }

    Ok(args)
}

fn read_fixed<T>(buf: &mut Bytes, width: usize, read: fn(&mut Bytes) -> T) -> Result<T, OscError> {
    if buf.remaining() < width {
        return Err(OscError::Truncated);
    }
    Ok(read(buf))
}

fn read_string(buf: &mut Bytes) -> Result<String, OscError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::Truncated)?;
    let text = std::str::from_utf8(&buf[..end])
        .map_err(|_| OscError::InvalidString)?
        .to_owned();

    let padded = padded_len(end + 1);
    if buf.remaining() < padded {
        return Err(OscError::Truncated);
    }
    buf.advance(padded);
    Ok(text)
}

fn read_blob(buf: &mut Bytes) -> Result<Bytes, OscError> {
    let len = read_fixed(buf, 4, Buf::get_i32)?;
    if len < 0 {
        return Err(OscError::Truncated);
    }
    let len = len as usize;
    let padded = padded_len(len);
    if buf.remaining() < padded {
        return Err(OscError::Truncated);
    }
    let data = buf.split_to(len);
    buf.advance(padded - len);
    Ok(data)
}

fn write_string(out: &mut BytesMut, s: &str) {
    out.put_slice(s.as_bytes());
    out.put_bytes(0, padded_len(s.len() + 1) - s.len());
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}
