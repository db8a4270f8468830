//! Snapshot and log-rewrite boundary
//!
//! A stored message persists as its type name plus its binary encoding.

use prost_reflect::{DynamicMessage, ReflectMessage};

use crate::codec;
use crate::error::Result;
use crate::registry::SchemaRegistry;

/// Verb used when a log rewrite re-creates a key
pub const REWRITE_VERB: &str = "SET";

/// `(type name, binary payload)` for a snapshot
pub fn save(msg: &DynamicMessage) -> (String, Vec<u8>) {
    (
        msg.descriptor().full_name().to_string(),
        codec::to_binary(msg),
    )
}

/// Rebuild a message from a snapshot entry. Fails when the type is no longer
/// registered or the payload does not decode.
pub fn load(registry: &SchemaRegistry, type_name: &str, payload: &[u8]) -> Result<DynamicMessage> {
    let desc = registry.resolve(type_name)?;
    codec::decode_binary(&desc, payload)
}

/// Argument vector that re-creates `key` when replayed: `SET <key> <type> <payload>`
pub fn rewrite_command(key: &[u8], msg: &DynamicMessage) -> Vec<Vec<u8>> {
    let (type_name, payload) = save(msg);
    vec![
        REWRITE_VERB.as_bytes().to_vec(),
        key.to_vec(),
        type_name.into_bytes(),
        payload,
    ]
}
