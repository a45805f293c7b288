use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use foldhash::fast::RandomState;

use crate::error::{Error, ErrorKind, Result};

pub type ValueMap = HashMap<String, Value, RandomState>;

/// A generic Avro datum, the in-memory form of anything the engine
/// encodes to or decodes from the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Bytes),
    String(String),
    Fixed(Bytes),
    /// Enum symbol index plus the symbol itself.
    Enum(u32, String),
    Array(Vec<Value>),
    Map(ValueMap),
    /// Record fields in schema order.
    Record(Vec<(String, Value)>),
    /// Union branch index plus the branch value.
    Union(u32, Box<Value>),
}

impl Value {
    /// Field lookup for record values.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Unwraps a union value, returning the inner branch.
    #[must_use]
    pub fn unwrap_union(&self) -> &Value {
        match self {
            Value::Union(_, inner) => inner,
            other => other,
        }
    }
}

fn eof(what: &str) -> Error {
    Error::new(
        ErrorKind::DeserializeFailed,
        format!("truncated input reading {what}"),
    )
}

pub(crate) fn write_long(buf: &mut BytesMut, n: i64) {
    // zigzag + varint
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    loop {
        let b = (z & 0x7f) as u8;
        z >>= 7;
        if z == 0 {
            buf.put_u8(b);
            return;
        }
        buf.put_u8(b | 0x80);
    }
}

pub(crate) fn read_long(buf: &mut Bytes) -> Result<i64> {
    let mut z: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(eof("long"));
        }
        let b = buf.get_u8();
        z |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::new(
                ErrorKind::DeserializeFailed,
                "varint overflow".to_string(),
            ));
        }
    }
    Ok(((z >> 1) as i64) ^ -((z & 1) as i64))
}

pub(crate) fn read_int(buf: &mut Bytes) -> Result<i32> {
    let n = read_long(buf)?;
    i32::try_from(n)
        .map_err(|_| Error::new(ErrorKind::DeserializeFailed, format!("int out of range: {n}")))
}

pub(crate) fn write_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(u8::from(v));
}

pub(crate) fn read_bool(buf: &mut Bytes) -> Result<bool> {
    if !buf.has_remaining() {
        return Err(eof("boolean"));
    }
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(Error::new(
            ErrorKind::DeserializeFailed,
            format!("invalid boolean byte: {b}"),
        )),
    }
}

pub(crate) fn write_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let n = i64::try_from(len)
        .map_err(|_| Error::new(ErrorKind::SerializeFailed, format!("length too large: {len}")))?;
    write_long(buf, n);
    Ok(())
}

pub(crate) fn read_len(buf: &mut Bytes, what: &str) -> Result<usize> {
    let n = read_long(buf)?;
    let len = usize::try_from(n).map_err(|_| {
        Error::new(
            ErrorKind::DeserializeFailed,
            format!("negative {what} length: {n}"),
        )
    })?;
    if len > buf.remaining() {
        return Err(eof(what));
    }
    Ok(len)
}

pub(crate) fn write_bytes(buf: &mut BytesMut, v: &[u8]) -> Result<()> {
    write_len(buf, v.len())?;
    buf.put_slice(v);
    Ok(())
}

pub(crate) fn read_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let len = read_len(buf, "bytes")?;
    Ok(buf.split_to(len))
}

pub(crate) fn write_string(buf: &mut BytesMut, v: &str) -> Result<()> {
    write_bytes(buf, v.as_bytes())
}

pub(crate) fn read_string(buf: &mut Bytes) -> Result<String> {
    let raw = read_bytes(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| Error::new(ErrorKind::DeserializeFailed, e.to_string()))
}

pub(crate) fn read_fixed(buf: &mut Bytes, size: usize) -> Result<Bytes> {
    if buf.remaining() < size {
        return Err(eof("fixed"));
    }
    Ok(buf.split_to(size))
}

pub type BytesMap = HashMap<String, Bytes, RandomState>;

/// Encodes a `map<bytes>` as a single block followed by the terminator,
/// the layout used by call headers and handshake metadata.
pub(crate) fn write_bytes_map(buf: &mut BytesMut, map: &BytesMap) -> Result<()> {
    if !map.is_empty() {
        write_len(buf, map.len())?;
        for (k, v) in map {
            write_string(buf, k)?;
            write_bytes(buf, v)?;
        }
    }
    write_long(buf, 0);
    Ok(())
}

pub(crate) fn read_bytes_map(buf: &mut Bytes) -> Result<BytesMap> {
    let mut map = BytesMap::default();
    loop {
        let mut n = read_long(buf)?;
        if n == 0 {
            return Ok(map);
        }
        if n < 0 {
            // negative block count is followed by the block size in bytes
            n = -n;
            read_long(buf)?;
        }
        for _ in 0..n {
            let key = read_string(buf)?;
            let value = read_bytes(buf)?;
            map.insert(key, value);
        }
    }
}
