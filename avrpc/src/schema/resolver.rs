use std::sync::Arc;

use bytes::Bytes;
use foldhash::fast::RandomState;

use super::{Schema, Value, ValueMap, read_bytes, read_long, read_string};
use crate::error::{Error, ErrorKind, Result};

/// Compiled translation from a writer schema's bytes to a reader schema's
/// values. Construction verifies compatibility up front; a resolver whose
/// reader and writer are structurally equal short-circuits to a plain decode.
#[derive(Debug, Clone)]
pub struct Resolver {
    writer: Arc<Schema>,
    reader: Arc<Schema>,
    identical: bool,
}

fn incompatible(writer: &Schema, reader: &Schema) -> Error {
    Error::new(
        ErrorKind::IncompatibleProtocol,
        format!("cannot read {writer:?} as {reader:?}"),
    )
}

impl Resolver {
    pub fn new(writer: Arc<Schema>, reader: Arc<Schema>) -> Result<Self> {
        check(&writer, &reader)?;
        let identical = writer.canonical_eq(&reader);
        Ok(Self {
            writer,
            reader,
            identical,
        })
    }

    pub fn read(&self, buf: &mut Bytes) -> Result<Value> {
        if self.identical {
            self.reader.decode(buf)
        } else {
            resolve_read(&self.writer, &self.reader, buf)
        }
    }
}

/// Verifies that data written with `writer` can be read as `reader`.
fn check(writer: &Schema, reader: &Schema) -> Result<()> {
    if writer.canonical_eq(reader) {
        return Ok(());
    }
    match (writer, reader) {
        (Schema::Int, Schema::Long | Schema::Float | Schema::Double)
        | (Schema::Long, Schema::Float | Schema::Double)
        | (Schema::Float, Schema::Double)
        | (Schema::String, Schema::Bytes)
        | (Schema::Bytes, Schema::String) => Ok(()),
        (Schema::Fixed { size: ws, .. }, Schema::Fixed { size: rs, .. }) if ws == rs => Ok(()),
        (Schema::Enum { symbols: ws, .. }, Schema::Enum { symbols: rs, .. }) => {
            for sym in ws {
                if !rs.contains(sym) {
                    return Err(incompatible(writer, reader));
                }
            }
            Ok(())
        }
        (Schema::Array(wi), Schema::Array(ri)) => check(wi, ri),
        (Schema::Map(wv), Schema::Map(rv)) => check(wv, rv),
        (Schema::Record { fields: wf, .. }, Schema::Record { fields: rf, .. }) => {
            for field in rf {
                match wf.iter().find(|f| f.name == field.name) {
                    Some(wfield) => check(&wfield.schema, &field.schema)?,
                    None if field.default.is_some() => {}
                    None => return Err(incompatible(writer, reader)),
                }
            }
            Ok(())
        }
        // a writer union is readable if at least one branch is; a branch
        // mismatch on actual data surfaces at read time
        (Schema::Union(wb), _) => {
            if wb.iter().any(|b| check(b, reader).is_ok()) {
                Ok(())
            } else {
                Err(incompatible(writer, reader))
            }
        }
        (_, Schema::Union(rb)) => {
            if rb.iter().any(|b| check(writer, b).is_ok()) {
                Ok(())
            } else {
                Err(incompatible(writer, reader))
            }
        }
        _ => Err(incompatible(writer, reader)),
    }
}

fn resolve_read(writer: &Schema, reader: &Schema, buf: &mut Bytes) -> Result<Value> {
    if writer.canonical_eq(reader) {
        return reader.decode(buf);
    }
    match (writer, reader) {
        (Schema::Int, Schema::Long) => Ok(Value::Long(i64::from(int_of(writer, buf)?))),
        (Schema::Int, Schema::Float) => Ok(Value::Float(int_of(writer, buf)? as f32)),
        (Schema::Int, Schema::Double) => Ok(Value::Double(f64::from(int_of(writer, buf)?))),
        (Schema::Long, Schema::Float) => Ok(Value::Float(read_long(buf)? as f32)),
        (Schema::Long, Schema::Double) => Ok(Value::Double(read_long(buf)? as f64)),
        (Schema::Float, Schema::Double) => match writer.decode(buf)? {
            Value::Float(v) => Ok(Value::Double(f64::from(v))),
            _ => unreachable!(),
        },
        (Schema::String, Schema::Bytes) => Ok(Value::Bytes(read_bytes(buf)?)),
        (Schema::Bytes, Schema::String) => Ok(Value::String(read_string(buf)?)),
        (Schema::Fixed { size: ws, .. }, Schema::Fixed { size: rs, .. }) if ws == rs => {
            reader.decode(buf)
        }
        (Schema::Enum { symbols: ws, name }, Schema::Enum { symbols: rs, .. }) => {
            let index = read_long(buf)?;
            let symbol = usize::try_from(index)
                .ok()
                .and_then(|i| ws.get(i))
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::DeserializeFailed,
                        format!("invalid index {index} for enum {name}"),
                    )
                })?;
            let reader_index = rs
                .iter()
                .position(|s| s == symbol)
                .ok_or_else(|| incompatible(writer, reader))?;
            Ok(Value::Enum(reader_index as u32, symbol.clone()))
        }
        (Schema::Array(wi), Schema::Array(ri)) => {
            let mut values = Vec::new();
            loop {
                let mut n = read_long(buf)?;
                if n == 0 {
                    return Ok(Value::Array(values));
                }
                if n < 0 {
                    n = -n;
                    read_long(buf)?;
                }
                for _ in 0..n {
                    values.push(resolve_read(wi, ri, buf)?);
                }
            }
        }
        (Schema::Map(wv), Schema::Map(rv)) => {
            let mut map = ValueMap::default();
            loop {
                let mut n = read_long(buf)?;
                if n == 0 {
                    return Ok(Value::Map(map));
                }
                if n < 0 {
                    n = -n;
                    read_long(buf)?;
                }
                for _ in 0..n {
                    let key = read_string(buf)?;
                    map.insert(key, resolve_read(wv, rv, buf)?);
                }
            }
        }
        (Schema::Record { fields: wf, .. }, Schema::Record { fields: rf, .. }) => {
            let mut decoded: std::collections::HashMap<&str, Value, RandomState> =
                std::collections::HashMap::default();
            for field in wf {
                match rf.iter().find(|f| f.name == field.name) {
                    Some(rfield) => {
                        let v = resolve_read(&field.schema, &rfield.schema, buf)?;
                        decoded.insert(field.name.as_str(), v);
                    }
                    None => {
                        // writer-only field, decode and discard
                        field.schema.decode(buf)?;
                    }
                }
            }
            let mut values = Vec::with_capacity(rf.len());
            for field in rf {
                let v = match decoded.remove(field.name.as_str()) {
                    Some(v) => v,
                    None => {
                        let default = field
                            .default
                            .as_ref()
                            .ok_or_else(|| incompatible(writer, reader))?;
                        field.schema.value_from_json(default)?
                    }
                };
                values.push((field.name.clone(), v));
            }
            Ok(Value::Record(values))
        }
        (Schema::Union(wb), _) => {
            let index = read_long(buf)?;
            let branch = usize::try_from(index)
                .ok()
                .and_then(|i| wb.get(i))
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::DeserializeFailed,
                        format!("invalid union index: {index}"),
                    )
                })?;
            match reader {
                Schema::Union(rb) => {
                    let reader_index = rb
                        .iter()
                        .position(|b| check(branch, b).is_ok())
                        .ok_or_else(|| incompatible(branch, reader))?;
                    let value = resolve_read(branch, &rb[reader_index], buf)?;
                    Ok(Value::Union(reader_index as u32, Box::new(value)))
                }
                _ => {
                    check(branch, reader)?;
                    resolve_read(branch, reader, buf)
                }
            }
        }
        (_, Schema::Union(rb)) => {
            let index = rb
                .iter()
                .position(|b| check(writer, b).is_ok())
                .ok_or_else(|| incompatible(writer, reader))?;
            let value = resolve_read(writer, &rb[index], buf)?;
            Ok(Value::Union(index as u32, Box::new(value)))
        }
        _ => Err(incompatible(writer, reader)),
    }
}

fn int_of(schema: &Schema, buf: &mut Bytes) -> Result<i32> {
    match schema.decode(buf)? {
        Value::Int(v) => Ok(v),
        _ => unreachable!(),
    }
}
