//! The narrow Avro type layer consumed by the RPC engine: schema parsing,
//! canonical forms and fingerprints, binary encoding, and writer-to-reader
//! resolution.

mod resolver;
mod value;

pub use resolver::Resolver;
pub use value::{BytesMap, Value, ValueMap};
pub(crate) use value::{
    read_bool, read_bytes, read_bytes_map, read_fixed, read_int, read_len, read_long, read_string,
    write_bool, write_bytes, write_bytes_map, write_len, write_long, write_string,
};

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use foldhash::fast::RandomState;

use crate::error::{Error, ErrorKind, Result};

pub(crate) type NameRegistry = HashMap<String, Arc<Schema>, RandomState>;

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Arc<Schema>,
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Fixed { name: String, size: usize },
    Enum { name: String, symbols: Vec<String> },
    Array(Arc<Schema>),
    Map(Arc<Schema>),
    Record { name: String, fields: Vec<Field> },
    Union(Vec<Arc<Schema>>),
}

fn invalid(msg: String) -> Error {
    Error::new(ErrorKind::InvalidSchema, msg)
}

fn fullname(name: &str, namespace: Option<&str>, enclosing: Option<&str>) -> String {
    if name.contains('.') {
        name.to_string()
    } else if let Some(ns) = namespace.or(enclosing)
        && !ns.is_empty()
    {
        format!("{ns}.{name}")
    } else {
        name.to_string()
    }
}

impl Schema {
    /// Parses a schema from its JSON representation.
    pub fn parse(json: &serde_json::Value) -> Result<Arc<Schema>> {
        let mut names = NameRegistry::default();
        Self::parse_with(json, &mut names, None)
    }

    /// Parses a schema, resolving named-type references through `names` and
    /// registering any new named types there.
    pub(crate) fn parse_with(
        json: &serde_json::Value,
        names: &mut NameRegistry,
        enclosing_ns: Option<&str>,
    ) -> Result<Arc<Schema>> {
        match json {
            serde_json::Value::String(s) => Self::parse_name(s, names, enclosing_ns),
            serde_json::Value::Array(branches) => {
                let mut schemas = Vec::with_capacity(branches.len());
                for branch in branches {
                    schemas.push(Self::parse_with(branch, names, enclosing_ns)?);
                }
                if schemas.is_empty() {
                    return Err(invalid("empty union".to_string()));
                }
                Ok(Arc::new(Schema::Union(schemas)))
            }
            serde_json::Value::Object(obj) => Self::parse_object(obj, names, enclosing_ns),
            other => Err(invalid(format!("invalid schema: {other}"))),
        }
    }

    fn parse_name(
        s: &str,
        names: &NameRegistry,
        enclosing_ns: Option<&str>,
    ) -> Result<Arc<Schema>> {
        let schema = match s {
            "null" => Schema::Null,
            "boolean" => Schema::Boolean,
            "int" => Schema::Int,
            "long" => Schema::Long,
            "float" => Schema::Float,
            "double" => Schema::Double,
            "bytes" => Schema::Bytes,
            "string" => Schema::String,
            _ => {
                let full = fullname(s, None, enclosing_ns);
                return names
                    .get(&full)
                    .or_else(|| names.get(s))
                    .cloned()
                    .ok_or_else(|| invalid(format!("undefined type: {s}")));
            }
        };
        Ok(Arc::new(schema))
    }

    fn parse_object(
        obj: &serde_json::Map<String, serde_json::Value>,
        names: &mut NameRegistry,
        enclosing_ns: Option<&str>,
    ) -> Result<Arc<Schema>> {
        let type_name = obj
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| invalid("schema object without type".to_string()))?;

        let name_of = |obj: &serde_json::Map<String, serde_json::Value>| -> Result<String> {
            let name = obj
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| invalid(format!("unnamed {type_name}")))?;
            let namespace = obj.get("namespace").and_then(|n| n.as_str());
            Ok(fullname(name, namespace, enclosing_ns))
        };

        match type_name {
            "record" | "error" => {
                let full = name_of(obj)?;
                let ns = full.rsplit_once('.').map(|(ns, _)| ns.to_string());
                let raw_fields = obj
                    .get("fields")
                    .and_then(|f| f.as_array())
                    .ok_or_else(|| invalid(format!("record {full} without fields")))?;
                let mut fields = Vec::with_capacity(raw_fields.len());
                for raw in raw_fields {
                    let fobj = raw
                        .as_object()
                        .ok_or_else(|| invalid(format!("invalid field in {full}")))?;
                    let fname = fobj
                        .get("name")
                        .and_then(|n| n.as_str())
                        .ok_or_else(|| invalid(format!("unnamed field in {full}")))?;
                    let ftype = fobj
                        .get("type")
                        .ok_or_else(|| invalid(format!("field {fname} without type")))?;
                    fields.push(Field {
                        name: fname.to_string(),
                        schema: Self::parse_with(ftype, names, ns.as_deref())?,
                        default: fobj.get("default").cloned(),
                    });
                }
                let schema = Arc::new(Schema::Record { name: full.clone(), fields });
                names.insert(full, schema.clone());
                Ok(schema)
            }
            "enum" => {
                let full = name_of(obj)?;
                let symbols = obj
                    .get("symbols")
                    .and_then(|s| s.as_array())
                    .ok_or_else(|| invalid(format!("enum {full} without symbols")))?
                    .iter()
                    .map(|s| {
                        s.as_str()
                            .map(ToString::to_string)
                            .ok_or_else(|| invalid(format!("invalid symbol in {full}")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let schema = Arc::new(Schema::Enum { name: full.clone(), symbols });
                names.insert(full, schema.clone());
                Ok(schema)
            }
            "fixed" => {
                let full = name_of(obj)?;
                let size = obj
                    .get("size")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| invalid(format!("fixed {full} without size")))?;
                let schema = Arc::new(Schema::Fixed {
                    name: full.clone(),
                    size: usize::try_from(size)
                        .map_err(|_| invalid(format!("fixed {full} size too large")))?,
                });
                names.insert(full, schema.clone());
                Ok(schema)
            }
            "array" => {
                let items = obj
                    .get("items")
                    .ok_or_else(|| invalid("array without items".to_string()))?;
                Ok(Arc::new(Schema::Array(Self::parse_with(
                    items,
                    names,
                    enclosing_ns,
                )?)))
            }
            "map" => {
                let values = obj
                    .get("values")
                    .ok_or_else(|| invalid("map without values".to_string()))?;
                Ok(Arc::new(Schema::Map(Self::parse_with(
                    values,
                    names,
                    enclosing_ns,
                )?)))
            }
            other => Self::parse_name(other, names, enclosing_ns),
        }
    }

    /// Writes the canonical form of the schema, the stable text hashed into
    /// fingerprints and compared for structural equality.
    pub(crate) fn write_canonical(&self, out: &mut String) {
        match self {
            Schema::Null => out.push_str("\"null\""),
            Schema::Boolean => out.push_str("\"boolean\""),
            Schema::Int => out.push_str("\"int\""),
            Schema::Long => out.push_str("\"long\""),
            Schema::Float => out.push_str("\"float\""),
            Schema::Double => out.push_str("\"double\""),
            Schema::Bytes => out.push_str("\"bytes\""),
            Schema::String => out.push_str("\"string\""),
            Schema::Fixed { name, size } => {
                out.push_str("{\"name\":");
                write_json_str(out, name);
                out.push_str(&format!(",\"type\":\"fixed\",\"size\":{size}}}"));
            }
            Schema::Enum { name, symbols } => {
                out.push_str("{\"name\":");
                write_json_str(out, name);
                out.push_str(",\"type\":\"enum\",\"symbols\":[");
                for (i, sym) in symbols.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_json_str(out, sym);
                }
                out.push_str("]}");
            }
            Schema::Array(items) => {
                out.push_str("{\"type\":\"array\",\"items\":");
                items.write_canonical(out);
                out.push('}');
            }
            Schema::Map(values) => {
                out.push_str("{\"type\":\"map\",\"values\":");
                values.write_canonical(out);
                out.push('}');
            }
            Schema::Record { name, fields } => {
                out.push_str("{\"name\":");
                write_json_str(out, name);
                out.push_str(",\"type\":\"record\",\"fields\":[");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str("{\"name\":");
                    write_json_str(out, &field.name);
                    out.push_str(",\"type\":");
                    field.schema.write_canonical(out);
                    out.push('}');
                }
                out.push_str("]}");
            }
            Schema::Union(branches) => {
                out.push('[');
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    branch.write_canonical(out);
                }
                out.push(']');
            }
        }
    }

    #[must_use]
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    /// Structural equality via canonical forms.
    #[must_use]
    pub fn canonical_eq(&self, other: &Schema) -> bool {
        self == other || self.canonical_form() == other.canonical_form()
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Schema::Null)
    }

    /// Picks the union branch matching a bare (unwrapped) value.
    pub(crate) fn union_index_for(branches: &[Arc<Schema>], value: &Value) -> Option<usize> {
        branches.iter().position(|branch| {
            matches!(
                (branch.as_ref(), value),
                (Schema::Null, Value::Null)
                    | (Schema::Boolean, Value::Boolean(_))
                    | (Schema::Int, Value::Int(_))
                    | (Schema::Long, Value::Long(_) | Value::Int(_))
                    | (Schema::Float, Value::Float(_))
                    | (Schema::Double, Value::Double(_))
                    | (Schema::Bytes, Value::Bytes(_))
                    | (Schema::String, Value::String(_))
                    | (Schema::Fixed { .. }, Value::Fixed(_))
                    | (Schema::Enum { .. }, Value::Enum(..))
                    | (Schema::Array(_), Value::Array(_))
                    | (Schema::Map(_), Value::Map(_))
                    | (Schema::Record { .. }, Value::Record(_))
            )
        })
    }

    /// Encodes `value` in Avro binary form.
    pub fn encode(&self, value: &Value, buf: &mut BytesMut) -> Result<()> {
        let mismatch = || {
            Error::new(
                ErrorKind::SerializeFailed,
                format!("value {value:?} does not match schema {self:?}"),
            )
        };
        match (self, value) {
            (Schema::Null, Value::Null) => Ok(()),
            (Schema::Boolean, Value::Boolean(v)) => {
                write_bool(buf, *v);
                Ok(())
            }
            (Schema::Int, Value::Int(v)) => {
                write_long(buf, i64::from(*v));
                Ok(())
            }
            (Schema::Long, Value::Long(v)) => {
                write_long(buf, *v);
                Ok(())
            }
            (Schema::Long, Value::Int(v)) => {
                write_long(buf, i64::from(*v));
                Ok(())
            }
            (Schema::Float, Value::Float(v)) => {
                buf.put_f32_le(*v);
                Ok(())
            }
            (Schema::Double, Value::Double(v)) => {
                buf.put_f64_le(*v);
                Ok(())
            }
            (Schema::Bytes, Value::Bytes(v)) => write_bytes(buf, v),
            (Schema::String, Value::String(v)) => write_string(buf, v),
            (Schema::Fixed { size, .. }, Value::Fixed(v)) => {
                if v.len() != *size {
                    return Err(mismatch());
                }
                buf.put_slice(v);
                Ok(())
            }
            (Schema::Enum { symbols, .. }, Value::Enum(index, _)) => {
                if *index as usize >= symbols.len() {
                    return Err(mismatch());
                }
                write_long(buf, i64::from(*index));
                Ok(())
            }
            (Schema::Enum { symbols, .. }, Value::String(sym)) => {
                let index = symbols
                    .iter()
                    .position(|s| s == sym)
                    .ok_or_else(mismatch)?;
                write_long(buf, index as i64);
                Ok(())
            }
            (Schema::Array(items), Value::Array(values)) => {
                if !values.is_empty() {
                    write_len(buf, values.len())?;
                    for v in values {
                        items.encode(v, buf)?;
                    }
                }
                write_long(buf, 0);
                Ok(())
            }
            (Schema::Map(value_schema), Value::Map(map)) => {
                if !map.is_empty() {
                    write_len(buf, map.len())?;
                    for (k, v) in map {
                        write_string(buf, k)?;
                        value_schema.encode(v, buf)?;
                    }
                }
                write_long(buf, 0);
                Ok(())
            }
            (Schema::Record { name, fields }, Value::Record(values)) => {
                for field in fields {
                    let value = values.iter().find(|(n, _)| n == &field.name).map(|(_, v)| v);
                    match value {
                        Some(v) => field.schema.encode(v, buf)?,
                        None => {
                            let default = field.default.as_ref().ok_or_else(|| {
                                Error::new(
                                    ErrorKind::SerializeFailed,
                                    format!("missing field {}.{}", name, field.name),
                                )
                            })?;
                            let v = field.schema.value_from_json(default)?;
                            field.schema.encode(&v, buf)?;
                        }
                    }
                }
                Ok(())
            }
            (Schema::Union(branches), Value::Union(index, inner)) => {
                let branch = branches.get(*index as usize).ok_or_else(mismatch)?;
                write_long(buf, i64::from(*index));
                branch.encode(inner, buf)
            }
            (Schema::Union(branches), bare) => {
                let index = Self::union_index_for(branches, bare).ok_or_else(mismatch)?;
                write_long(buf, index as i64);
                branches[index].encode(bare, buf)
            }
            _ => Err(mismatch()),
        }
    }

    /// Decodes an Avro binary value of this schema.
    pub fn decode(&self, buf: &mut Bytes) -> Result<Value> {
        match self {
            Schema::Null => Ok(Value::Null),
            Schema::Boolean => Ok(Value::Boolean(read_bool(buf)?)),
            Schema::Int => Ok(Value::Int(read_int(buf)?)),
            Schema::Long => Ok(Value::Long(read_long(buf)?)),
            Schema::Float => {
                if buf.remaining() < 4 {
                    return Err(Error::new(
                        ErrorKind::DeserializeFailed,
                        "truncated input reading float".to_string(),
                    ));
                }
                Ok(Value::Float(buf.get_f32_le()))
            }
            Schema::Double => {
                if buf.remaining() < 8 {
                    return Err(Error::new(
                        ErrorKind::DeserializeFailed,
                        "truncated input reading double".to_string(),
                    ));
                }
                Ok(Value::Double(buf.get_f64_le()))
            }
            Schema::Bytes => Ok(Value::Bytes(read_bytes(buf)?)),
            Schema::String => Ok(Value::String(read_string(buf)?)),
            Schema::Fixed { size, .. } => Ok(Value::Fixed(read_fixed(buf, *size)?)),
            Schema::Enum { name, symbols } => {
                let index = read_int(buf)?;
                let symbol = usize::try_from(index)
                    .ok()
                    .and_then(|i| symbols.get(i))
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::DeserializeFailed,
                            format!("invalid index {index} for enum {name}"),
                        )
                    })?;
                Ok(Value::Enum(index as u32, symbol.clone()))
            }
            Schema::Array(items) => {
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
                        values.push(items.decode(buf)?);
                    }
                }
            }
            Schema::Map(value_schema) => {
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
                        map.insert(key, value_schema.decode(buf)?);
                    }
                }
            }
            Schema::Record { fields, .. } => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push((field.name.clone(), field.schema.decode(buf)?));
                }
                Ok(Value::Record(values))
            }
            Schema::Union(branches) => {
                let index = read_long(buf)?;
                let branch = usize::try_from(index)
                    .ok()
                    .and_then(|i| branches.get(i))
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::DeserializeFailed,
                            format!("invalid union index: {index}"),
                        )
                    })?;
                Ok(Value::Union(index as u32, Box::new(branch.decode(buf)?)))
            }
        }
    }

    /// Converts a JSON value (a field default) into a datum of this schema.
    pub(crate) fn value_from_json(&self, json: &serde_json::Value) -> Result<Value> {
        let mismatch = || {
            Error::new(
                ErrorKind::InvalidSchema,
                format!("default {json} does not match schema {self:?}"),
            )
        };
        match (self, json) {
            (Schema::Null, serde_json::Value::Null) => Ok(Value::Null),
            (Schema::Boolean, serde_json::Value::Bool(b)) => Ok(Value::Boolean(*b)),
            (Schema::Int, serde_json::Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int)
                .ok_or_else(mismatch),
            (Schema::Long, serde_json::Value::Number(n)) => {
                n.as_i64().map(Value::Long).ok_or_else(mismatch)
            }
            (Schema::Float, serde_json::Value::Number(n)) => n
                .as_f64()
                .map(|v| Value::Float(v as f32))
                .ok_or_else(mismatch),
            (Schema::Double, serde_json::Value::Number(n)) => {
                n.as_f64().map(Value::Double).ok_or_else(mismatch)
            }
            (Schema::String, serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
            (Schema::Bytes, serde_json::Value::String(s)) => {
                Ok(Value::Bytes(Bytes::from(s.clone().into_bytes())))
            }
            (Schema::Enum { symbols, .. }, serde_json::Value::String(s)) => symbols
                .iter()
                .position(|sym| sym == s)
                .map(|i| Value::Enum(i as u32, s.clone()))
                .ok_or_else(mismatch),
            (Schema::Array(items), serde_json::Value::Array(values)) => Ok(Value::Array(
                values
                    .iter()
                    .map(|v| items.value_from_json(v))
                    .collect::<Result<_>>()?,
            )),
            (Schema::Map(value_schema), serde_json::Value::Object(obj)) => {
                let mut map = ValueMap::default();
                for (k, v) in obj {
                    map.insert(k.clone(), value_schema.value_from_json(v)?);
                }
                Ok(Value::Map(map))
            }
            (Schema::Record { fields, .. }, serde_json::Value::Object(obj)) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    let v = match obj.get(&field.name).or(field.default.as_ref()) {
                        Some(j) => field.schema.value_from_json(j)?,
                        None => return Err(mismatch()),
                    };
                    values.push((field.name.clone(), v));
                }
                Ok(Value::Record(values))
            }
            // a union default matches its first branch
            (Schema::Union(branches), j) => Ok(Value::Union(
                0,
                Box::new(branches[0].value_from_json(j)?),
            )),
            _ => Err(mismatch()),
        }
    }
}

fn write_json_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Arc<Schema> {
        Schema::parse(&serde_json::from_str(json).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_primitives() {
        assert_eq!(*parse("\"int\""), Schema::Int);
        assert_eq!(*parse("\"string\""), Schema::String);
        assert_eq!(*parse("{\"type\":\"long\"}"), Schema::Long);
    }

    #[test]
    fn test_parse_record() {
        let schema = parse(
            r#"{"type":"record","name":"Point","namespace":"geo",
                "fields":[{"name":"x","type":"int"},{"name":"y","type":"int"}]}"#,
        );
        match schema.as_ref() {
            Schema::Record { name, fields } => {
                assert_eq!(name, "geo.Point");
                assert_eq!(fields.len(), 2);
            }
            other => panic!("not a record: {other:?}"),
        }
    }

    #[test]
    fn test_named_reference() {
        let mut names = NameRegistry::default();
        Schema::parse_with(
            &serde_json::from_str(
                r#"{"type":"enum","name":"Suit","symbols":["SPADES","HEARTS"]}"#,
            )
            .unwrap(),
            &mut names,
            None,
        )
        .unwrap();
        let schema = Schema::parse_with(
            &serde_json::from_str("\"Suit\"").unwrap(),
            &mut names,
            None,
        )
        .unwrap();
        assert!(matches!(schema.as_ref(), Schema::Enum { .. }));
    }

    #[test]
    fn test_undefined_reference() {
        let err = Schema::parse(&serde_json::from_str("\"Missing\"").unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSchema);
    }

    #[test]
    fn test_canonical_form() {
        let a = parse(
            r#"{"type":"record","name":"R","doc":"ignored",
                "fields":[{"name":"f","type":"string","default":"x"}]}"#,
        );
        let b = parse(
            r#"{"fields":[{"type":"string","name":"f"}],"type":"record","name":"R"}"#,
        );
        assert!(a.canonical_eq(&b));
        assert_eq!(
            a.canonical_form(),
            r#"{"name":"R","type":"record","fields":[{"name":"f","type":"string"}]}"#
        );
    }

    #[test]
    fn test_encode_decode_record() {
        let schema = parse(
            r#"{"type":"record","name":"Pair",
                "fields":[{"name":"left","type":"string"},{"name":"right","type":"int"}]}"#,
        );
        let value = Value::Record(vec![
            ("left".into(), Value::String("hi".into())),
            ("right".into(), Value::Int(-7)),
        ]);
        let mut buf = BytesMut::new();
        schema.encode(&value, &mut buf).unwrap();
        let mut bytes: Bytes = buf.into();
        assert_eq!(schema.decode(&mut bytes).unwrap(), value);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_encode_union_bare_value() {
        let schema = parse(r#"["null","string"]"#);
        let mut buf = BytesMut::new();
        schema
            .encode(&Value::String("x".into()), &mut buf)
            .unwrap();
        let mut bytes: Bytes = buf.into();
        assert_eq!(
            schema.decode(&mut bytes).unwrap(),
            Value::Union(1, Box::new(Value::String("x".into())))
        );
    }

    #[test]
    fn test_decode_truncated_record() {
        let schema = parse(
            r#"{"type":"record","name":"Pair",
                "fields":[{"name":"left","type":"string"},{"name":"right","type":"int"}]}"#,
        );
        let mut bytes = Bytes::from_static(&[0x04, b'h']);
        assert!(schema.decode(&mut bytes).is_err());
    }

    #[test]
    fn test_record_default_field() {
        let schema = parse(
            r#"{"type":"record","name":"R",
                "fields":[{"name":"f","type":"int","default":42}]}"#,
        );
        let mut buf = BytesMut::new();
        schema.encode(&Value::Record(vec![]), &mut buf).unwrap();
        let mut bytes: Bytes = buf.into();
        assert_eq!(
            schema.decode(&mut bytes).unwrap(),
            Value::Record(vec![("f".into(), Value::Int(42))])
        );
    }

    #[test]
    fn test_map_codec() {
        let schema = parse(r#"{"type":"map","values":"long"}"#);
        let mut map = ValueMap::default();
        map.insert("a".into(), Value::Long(1));
        map.insert("b".into(), Value::Long(2));
        let value = Value::Map(map);
        let mut buf = BytesMut::new();
        schema.encode(&value, &mut buf).unwrap();
        let mut bytes: Bytes = buf.into();
        assert_eq!(schema.decode(&mut bytes).unwrap(), value);
    }
}
