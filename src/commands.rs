//! Command verbs
//!
//! Thin glue between a host key-value store and the engine. Every verb works
//! on one key slot: `None` when the key does not exist, the stored message
//! otherwise. Writes that fail leave the slot as it was.

use std::fmt;
use std::str::FromStr;

use prost_reflect::{DynamicMessage, MapKey, ReflectMessage, Value};

use crate::codec;
use crate::coerce::compare_keys;
use crate::error::{PbError, Result};
use crate::field_ref::{resolve, resolve_mut};
use crate::path::Path;
use crate::registry::SchemaRegistry;

/// A command reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Reply>),
    Status(String),
}

impl Reply {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "(nil)"),
            Reply::Int(v) => write!(f, "(integer) {}", v),
            Reply::Float(v) => write!(f, "\"{}\"", v),
            Reply::Str(s) => write!(f, "\"{}\"", s),
            Reply::Bytes(b) => write!(f, "\"{}\"", b.escape_ascii()),
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Array(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "\n{}", "   ".repeat(depth))?;
                    }
                    write!(f, "{}) ", idx + 1)?;
                    item.write_indented(f, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Encoding of message values in `get` replies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Json,
    Binary,
}

impl FromStr for Format {
    type Err = PbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "binary" => Ok(Format::Binary),
            _ => Err(PbError::InvalidOperation(format!("unknown format: {}", s))),
        }
    }
}

fn int_reply<T: TryInto<i64> + ToString + Copy>(v: T) -> Reply {
    match v.try_into() {
        Ok(v) => Reply::Int(v),
        Err(_) => Reply::Str(v.to_string()),
    }
}

fn key_reply(key: &MapKey) -> Reply {
    match key {
        MapKey::Bool(v) => Reply::Int(i64::from(*v)),
        MapKey::I32(v) => Reply::Int(i64::from(*v)),
        MapKey::I64(v) => Reply::Int(*v),
        MapKey::U32(v) => Reply::Int(i64::from(*v)),
        MapKey::U64(v) => int_reply(*v),
        MapKey::String(v) => Reply::Str(v.clone()),
    }
}

fn value_reply(value: &Value, format: Format) -> Result<Reply> {
    let reply = match value {
        Value::Bool(v) => Reply::Int(i64::from(*v)),
        Value::I32(v) | Value::EnumNumber(v) => Reply::Int(i64::from(*v)),
        Value::I64(v) => Reply::Int(*v),
        Value::U32(v) => Reply::Int(i64::from(*v)),
        Value::U64(v) => int_reply(*v),
        Value::F32(v) => Reply::Float(f64::from(*v)),
        Value::F64(v) => Reply::Float(*v),
        Value::String(s) => Reply::Str(s.clone()),
        Value::Bytes(b) => Reply::Bytes(b.to_vec()),
        Value::Message(msg) => match format {
            Format::Json => Reply::Str(codec::to_json(msg)?),
            Format::Binary => Reply::Bytes(codec::to_binary(msg)),
        },
        Value::List(items) => Reply::Array(
            items
                .iter()
                .map(|item| value_reply(item, format))
                .collect::<Result<_>>()?,
        ),
        Value::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| compare_keys(a.0, b.0));
            Reply::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok(Reply::Array(vec![key_reply(k), value_reply(v, format)?])))
                    .collect::<Result<_>>()?,
            )
        }
    };
    Ok(reply)
}

fn check_type(msg: &DynamicMessage, path: &Path) -> Result<()> {
    if msg.descriptor().full_name() != path.root_type() {
        return Err(PbError::TypeMismatch {
            expected: path.root_type().to_string(),
            actual: msg.descriptor().full_name().to_string(),
        });
    }
    Ok(())
}

/// Apply `(path, value)` assignments to the stored message, creating it when
/// the key is absent. Each value overwrites its target; a bare type path
/// replaces the whole message with a JSON or binary payload. The key is only
/// updated once every assignment has succeeded.
pub fn set(
    registry: &SchemaRegistry,
    slot: &mut Option<DynamicMessage>,
    assignments: &[(&str, &[u8])],
) -> Result<Reply> {
    let paths = assignments
        .iter()
        .map(|(raw, _)| Path::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    let Some(first) = paths.first() else {
        return Err(PbError::InvalidOperation("nothing to set".to_string()));
    };
    if paths.iter().any(|p| p.root_type() != first.root_type()) {
        return Err(PbError::InvalidOperation(
            "fields have different types".to_string(),
        ));
    }

    let type_name = first.root_type();
    let mut msg = match slot.as_ref() {
        Some(current) => {
            check_type(current, first)?;
            current.clone()
        }
        None => registry.create(type_name)?,
    };

    for (path, (_, value)) in paths.iter().zip(assignments) {
        if path.is_empty() {
            let whole = registry.create_from(type_name, value)?;
            resolve_mut(&mut msg, path)?.set_message(whole)?;
        } else {
            resolve_mut(&mut msg, path)?.set_raw(value)?;
        }
    }

    *slot = Some(msg);
    Ok(Reply::Int(1))
}

/// Read the value at `path`; `Nil` when the key is absent
pub fn get(slot: Option<&DynamicMessage>, path: &str, format: Format) -> Result<Reply> {
    let path = Path::parse(path)?;
    let Some(msg) = slot else {
        return Ok(Reply::Nil);
    };

    let value = resolve(msg, &path)?.value();
    value_reply(&value, format)
}

/// Append to an array or string field, creating the message when the key is
/// absent. Replies with the new element count or byte length.
pub fn append<V: AsRef<[u8]>>(
    registry: &SchemaRegistry,
    slot: &mut Option<DynamicMessage>,
    path: &str,
    values: &[V],
) -> Result<Reply> {
    let path = Path::parse(path)?;
    if path.is_empty() {
        return Err(PbError::InvalidOperation(
            "can only call append on array".to_string(),
        ));
    }

    let len = match slot {
        Some(msg) => resolve_mut(msg, &path)?.append(values)?,
        None => {
            let mut msg = registry.create(path.root_type())?;
            let len = resolve_mut(&mut msg, &path)?.append(values)?;
            *slot = Some(msg);
            len
        }
    };
    Ok(int_reply(len))
}

/// Delete the key (type-only path) or one array element
pub fn del(slot: &mut Option<DynamicMessage>, path: &str) -> Result<Reply> {
    let path = Path::parse(path)?;
    let Some(msg) = slot.as_mut() else {
        return Ok(Reply::Int(0));
    };

    check_type(msg, &path)?;
    if path.is_empty() {
        *slot = None;
    } else {
        resolve_mut(msg, &path)?.del()?;
    }
    Ok(Reply::Int(1))
}

/// Reset the message or one field to its default
pub fn clear(slot: &mut Option<DynamicMessage>, path: &str) -> Result<Reply> {
    let path = Path::parse(path)?;
    let Some(msg) = slot.as_mut() else {
        return Ok(Reply::Int(0));
    };

    resolve_mut(msg, &path)?.clear()?;
    Ok(Reply::Int(1))
}

/// Merge a payload into the message or a message field; behaves like `set`
/// when the key is absent.
pub fn merge(
    registry: &SchemaRegistry,
    slot: &mut Option<DynamicMessage>,
    path: &str,
    value: &[u8],
) -> Result<Reply> {
    let Some(msg) = slot.as_mut() else {
        return set(registry, slot, &[(path, value)]);
    };

    let path = Path::parse(path)?;
    resolve_mut(msg, &path)?.merge_raw(value)?;
    Ok(Reply::Int(0))
}

/// Size of the addressed value; 0 when the key is absent
pub fn len(slot: Option<&DynamicMessage>, path: &str) -> Result<Reply> {
    let path = Path::parse(path)?;
    let Some(msg) = slot else {
        return Ok(Reply::Int(0));
    };

    Ok(int_reply(resolve(msg, &path)?.len()?))
}

/// Type of the stored message, with `::` namespace separators
pub fn type_of(slot: Option<&DynamicMessage>) -> Reply {
    match slot {
        Some(msg) => Reply::Status(msg.descriptor().full_name().replace('.', "::")),
        None => Reply::Nil,
    }
}

pub fn schema(registry: &SchemaRegistry, type_name: &str) -> Reply {
    match registry.schema_text(type_name) {
        Some(text) => Reply::Str(text),
        None => Reply::Nil,
    }
}

/// Queue a schema import; the outcome shows up in [`last_import`]
pub fn import(registry: &SchemaRegistry, filename: &str, text: &str) -> Result<Reply> {
    registry.import(filename, text)?;
    Ok(Reply::Status("OK".to_string()))
}

/// Drain import outcomes as a flat `filename, status, ...` array
pub fn last_import(registry: &SchemaRegistry) -> Reply {
    Reply::Array(
        registry
            .drain_import_status()
            .into_iter()
            .flat_map(|(filename, status)| [Reply::Str(filename), Reply::Str(status.to_string())])
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROTO: &str = r#"syntax = "proto3";
package ns;

message Sub {
  string s = 1;
}

message Msg {
  int32 i = 1;
  string s = 2;
  Sub sub = 3;
  repeated int32 arr = 4;
  map<string, int32> m = 5;
  double d = 6;
}
"#;

    fn registry() -> (TempDir, SchemaRegistry) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ns.proto"), PROTO).unwrap();
        let registry = SchemaRegistry::load_directory(dir.path()).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_set_then_get() {
        let (_dir, registry) = registry();
        let mut slot = None;

        let reply = set(&registry, &mut slot, &[("ns.Msg", br#"{"i": 1}"#)]).unwrap();
        assert_eq!(reply, Reply::Int(1));

        set(&registry, &mut slot, &[("ns.Msg/s", b"x"), ("ns.Msg/d", b"2.5")]).unwrap();

        let msg = slot.as_ref();
        assert_eq!(get(msg, "ns.Msg/i", Format::Json).unwrap(), Reply::Int(1));
        assert_eq!(get(msg, "ns.Msg/s", Format::Json).unwrap(), Reply::Str("x".to_string()));
        assert_eq!(get(msg, "ns::Msg/d", Format::Json).unwrap(), Reply::Float(2.5));
        assert_eq!(get(None, "ns.Msg/i", Format::Json).unwrap(), Reply::Nil);
    }

    #[test]
    fn test_set_overwrites_existing_values() {
        let (_dir, registry) = registry();
        let mut slot = None;
        set(&registry, &mut slot, &[("ns.Msg", br#"{"i": 5, "arr": [1, 2]}"#)]).unwrap();

        set(&registry, &mut slot, &[("ns.Msg/i", b"0")]).unwrap();
        set(&registry, &mut slot, &[("ns.Msg", br#"{"arr": [4]}"#)]).unwrap();

        assert_eq!(get(slot.as_ref(), "ns.Msg/i", Format::Json).unwrap(), Reply::Int(0));
        assert_eq!(
            get(slot.as_ref(), "ns.Msg/arr", Format::Json).unwrap(),
            Reply::Array(vec![Reply::Int(4)])
        );
    }

    #[test]
    fn test_set_rejects_mixed_types() {
        let (_dir, registry) = registry();
        let mut slot = None;
        let err = set(&registry, &mut slot, &[("ns.Msg/i", b"1"), ("ns.Sub/s", b"x")]).unwrap_err();
        assert!(err.to_string().contains("different types"));
        assert!(slot.is_none());
    }

    #[test]
    fn test_set_type_mismatch_with_existing_key() {
        let (_dir, registry) = registry();
        let mut slot = Some(registry.create("ns.Sub").unwrap());
        assert!(matches!(
            set(&registry, &mut slot, &[("ns.Msg/i", b"1")]),
            Err(PbError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_get_message_formats() {
        let (_dir, registry) = registry();
        let mut slot = None;
        set(&registry, &mut slot, &[("ns.Msg/sub/s", b"v")]).unwrap();

        let json = get(slot.as_ref(), "ns.Msg/sub", Format::Json).unwrap();
        assert_eq!(json, Reply::Str(r#"{"s":"v"}"#.to_string()));

        let binary = get(slot.as_ref(), "ns.Msg/sub", Format::Binary).unwrap();
        assert_eq!(binary, Reply::Bytes(vec![0x0a, 0x01, b'v']));
    }

    #[test]
    fn test_get_map_sorted_by_key() {
        let (_dir, registry) = registry();
        let mut slot = None;
        set(&registry, &mut slot, &[("ns.Msg", br#"{"m": {"b": 2, "a": 1}}"#)]).unwrap();

        let reply = get(slot.as_ref(), "ns.Msg/m", Format::Json).unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Array(vec![Reply::Str("a".to_string()), Reply::Int(1)]),
                Reply::Array(vec![Reply::Str("b".to_string()), Reply::Int(2)]),
            ])
        );
    }

    #[test]
    fn test_append_creates_key() {
        let (_dir, registry) = registry();
        let mut slot = None;
        assert_eq!(
            append(&registry, &mut slot, "ns.Msg/arr", &["1", "2"]).unwrap(),
            Reply::Int(2)
        );
        assert!(slot.is_some());

        let mut empty = None;
        assert!(append(&registry, &mut empty, "ns.Msg/i", &["1"]).is_err());
        assert!(empty.is_none());
        assert!(append(&registry, &mut empty, "ns.Msg", &["1"]).is_err());
    }

    #[test]
    fn test_del_key_and_element() {
        let (_dir, registry) = registry();
        let mut slot = None;
        assert_eq!(del(&mut slot, "ns.Msg").unwrap(), Reply::Int(0));

        set(&registry, &mut slot, &[("ns.Msg", br#"{"arr": [1, 2, 3]}"#)]).unwrap();
        assert_eq!(del(&mut slot, "ns.Msg/arr/0").unwrap(), Reply::Int(1));
        assert_eq!(len(slot.as_ref(), "ns.Msg/arr").unwrap(), Reply::Int(2));

        assert!(matches!(del(&mut slot, "ns.Sub"), Err(PbError::TypeMismatch { .. })));
        del(&mut slot, "ns.Msg").unwrap();
        assert!(slot.is_none());
    }

    #[test]
    fn test_merge_acts_like_set_when_absent() {
        let (_dir, registry) = registry();
        let mut slot = None;
        assert_eq!(
            merge(&registry, &mut slot, "ns.Msg", br#"{"arr": [1]}"#).unwrap(),
            Reply::Int(1)
        );
        assert_eq!(
            merge(&registry, &mut slot, "ns.Msg", br#"{"arr": [2]}"#).unwrap(),
            Reply::Int(0)
        );
        assert_eq!(len(slot.as_ref(), "ns.Msg/arr").unwrap(), Reply::Int(2));
    }

    #[test]
    fn test_clear_len_type_schema() {
        let (_dir, registry) = registry();
        let mut slot = None;
        assert_eq!(clear(&mut slot, "ns.Msg").unwrap(), Reply::Int(0));
        assert_eq!(len(None, "ns.Msg").unwrap(), Reply::Int(0));
        assert_eq!(type_of(None), Reply::Nil);

        set(&registry, &mut slot, &[("ns.Msg/s", b"abc")]).unwrap();
        assert_eq!(len(slot.as_ref(), "ns.Msg/s").unwrap(), Reply::Int(3));
        assert_eq!(type_of(slot.as_ref()), Reply::Status("ns::Msg".to_string()));

        clear(&mut slot, "ns.Msg").unwrap();
        assert_eq!(len(slot.as_ref(), "ns.Msg").unwrap(), Reply::Int(0));

        assert!(matches!(schema(&registry, "ns::Sub"), Reply::Str(text) if text.contains("string s = 1;")));
        assert_eq!(schema(&registry, "ns.Missing"), Reply::Nil);
    }

    #[test]
    fn test_reply_rendering() {
        let reply = Reply::Array(vec![Reply::Int(1), Reply::Str("a".to_string())]);
        assert_eq!(reply.to_string(), "1) (integer) 1\n2) \"a\"");
        assert_eq!(Reply::Array(vec![]).to_string(), "(empty array)");
        assert_eq!("BINARY".parse::<Format>().unwrap(), Format::Binary);
        assert!("xml".parse::<Format>().is_err());
    }
}
