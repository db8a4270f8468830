//! Request value coercion
//!
//! Turns raw request bytes into typed field values and map keys. Every
//! numeric parse is strict: surrounding junk or out-of-range input fails with
//! the kind-specific `not <kind>` error.

use std::cmp::Ordering;
use std::str::FromStr;

use prost::bytes::Bytes;
use prost_reflect::{Kind, MapKey, Value};

use crate::error::{PbError, Result};
use crate::schema::ScalarKind;

fn parse_number<T: FromStr>(raw: &[u8], kind: ScalarKind) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| PbError::not_kind(kind.name()))
}

pub fn to_i32(raw: &[u8]) -> Result<i32> {
    parse_number(raw, ScalarKind::Int32)
}

pub fn to_i64(raw: &[u8]) -> Result<i64> {
    parse_number(raw, ScalarKind::Int64)
}

pub fn to_u32(raw: &[u8]) -> Result<u32> {
    parse_number(raw, ScalarKind::Uint32)
}

pub fn to_u64(raw: &[u8]) -> Result<u64> {
    parse_number(raw, ScalarKind::Uint64)
}

pub fn to_f32(raw: &[u8]) -> Result<f32> {
    parse_number(raw, ScalarKind::Float)
}

pub fn to_f64(raw: &[u8]) -> Result<f64> {
    parse_number(raw, ScalarKind::Double)
}

/// `true` / `false` (case-sensitive), otherwise an integer where 0 is false
pub fn to_bool(raw: &[u8]) -> Result<bool> {
    match raw {
        b"true" => Ok(true),
        b"false" => Ok(false),
        _ => parse_number::<i64>(raw, ScalarKind::Bool).map(|v| v != 0),
    }
}

pub fn to_enum(raw: &[u8]) -> Result<i32> {
    parse_number(raw, ScalarKind::Enum)
}

pub fn to_string(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|_| PbError::not_kind(ScalarKind::String.name()))
}

/// Coerce raw bytes into a value of the given non-message kind.
///
/// Message kinds go through [`crate::codec`], which needs the descriptor.
pub fn to_value(kind: &Kind, raw: &[u8]) -> Result<Value> {
    let value = match ScalarKind::of(kind) {
        ScalarKind::Int32 => Value::I32(to_i32(raw)?),
        ScalarKind::Int64 => Value::I64(to_i64(raw)?),
        ScalarKind::Uint32 => Value::U32(to_u32(raw)?),
        ScalarKind::Uint64 => Value::U64(to_u64(raw)?),
        ScalarKind::Float => Value::F32(to_f32(raw)?),
        ScalarKind::Double => Value::F64(to_f64(raw)?),
        ScalarKind::Bool => Value::Bool(to_bool(raw)?),
        ScalarKind::Enum => Value::EnumNumber(to_enum(raw)?),
        ScalarKind::String => Value::String(to_string(raw)?),
        ScalarKind::Bytes => Value::Bytes(Bytes::copy_from_slice(raw)),
        ScalarKind::Message => {
            return Err(PbError::InvalidOperation(
                "message values must be decoded with their descriptor".to_string(),
            ))
        }
    };
    Ok(value)
}

/// Parse a map key literal according to the map's declared key kind
pub fn to_map_key(kind: &Kind, raw: &str) -> Result<MapKey> {
    let bytes = raw.as_bytes();
    let key = match ScalarKind::of(kind) {
        ScalarKind::Int32 => MapKey::I32(to_i32(bytes)?),
        ScalarKind::Int64 => MapKey::I64(to_i64(bytes)?),
        ScalarKind::Uint32 => MapKey::U32(to_u32(bytes)?),
        ScalarKind::Uint64 => MapKey::U64(to_u64(bytes)?),
        ScalarKind::Bool => MapKey::Bool(to_bool(bytes)?),
        ScalarKind::String => MapKey::String(raw.to_string()),
        other => {
            return Err(PbError::InvalidPath(format!(
                "{} is not a valid map key kind",
                other
            )))
        }
    };
    Ok(key)
}

/// Total order over map keys of one map (all keys share a variant)
pub fn compare_keys(a: &MapKey, b: &MapKey) -> Ordering {
    match (a, b) {
        (MapKey::Bool(x), MapKey::Bool(y)) => x.cmp(y),
        (MapKey::I32(x), MapKey::I32(y)) => x.cmp(y),
        (MapKey::I64(x), MapKey::I64(y)) => x.cmp(y),
        (MapKey::U32(x), MapKey::U32(y)) => x.cmp(y),
        (MapKey::U64(x), MapKey::U64(y)) => x.cmp(y),
        (MapKey::String(x), MapKey::String(y)) => x.cmp(y),
        _ => key_rank(a).cmp(&key_rank(b)),
    }
}

fn key_rank(key: &MapKey) -> u8 {
    match key {
        MapKey::Bool(_) => 0,
        MapKey::I32(_) => 1,
        MapKey::I64(_) => 2,
        MapKey::U32(_) => 3,
        MapKey::U64(_) => 4,
        MapKey::String(_) => 5,
    }
}
