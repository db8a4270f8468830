//! Value encoding bridge
//!
//! Messages travel in two forms: canonical protobuf JSON for humans and the
//! compact binary wire format. Incoming payloads are sniffed: anything that
//! starts with `{` and ends with `}` is JSON, everything else is binary.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};

use crate::error::{PbError, Result};

/// True when the payload should be decoded as JSON
pub fn looks_like_json(payload: &[u8]) -> bool {
    payload.len() >= 2 && payload.first() == Some(&b'{') && payload.last() == Some(&b'}')
}

/// Decode a JSON or binary payload into a new message of `desc`
pub fn decode(desc: &MessageDescriptor, payload: &[u8]) -> Result<DynamicMessage> {
    if looks_like_json(payload) {
        let text = std::str::from_utf8(payload).map_err(|e| PbError::Decode {
            type_name: desc.full_name().to_string(),
            reason: e.to_string(),
        })?;
        decode_json(desc, text)
    } else {
        decode_binary(desc, payload)
    }
}

pub fn decode_json(desc: &MessageDescriptor, text: &str) -> Result<DynamicMessage> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let msg = DynamicMessage::deserialize(desc.clone(), &mut deserializer)
        .and_then(|msg| deserializer.end().map(|_| msg))
        .map_err(|e| PbError::Decode {
            type_name: desc.full_name().to_string(),
            reason: e.to_string(),
        })?;
    Ok(msg)
}

pub fn decode_binary(desc: &MessageDescriptor, payload: &[u8]) -> Result<DynamicMessage> {
    DynamicMessage::decode(desc.clone(), payload).map_err(|e| PbError::Decode {
        type_name: desc.full_name().to_string(),
        reason: e.to_string(),
    })
}

/// Canonical protobuf JSON for read replies
pub fn to_json(msg: &DynamicMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

pub fn to_binary(msg: &DynamicMessage) -> Vec<u8> {
    msg.encode_to_vec()
}

/// Serialized byte length, as reported by `len`
pub fn encoded_len(msg: &DynamicMessage) -> usize {
    msg.encoded_len()
}

/// Merge `src` into `dst`: last write wins per leaf, repeated fields are
/// concatenated, maps are merged per key, sub-messages merge recursively.
pub fn merge_into(dst: &mut DynamicMessage, src: &DynamicMessage) -> Result<()> {
    let (expected, actual) = (dst.descriptor(), src.descriptor());
    if expected.full_name() != actual.full_name() {
        return Err(PbError::TypeMismatch {
            expected: expected.full_name().to_string(),
            actual: actual.full_name().to_string(),
        });
    }

    let encoded = src.encode_to_vec();
    dst.merge(encoded.as_slice()).map_err(|e| PbError::Decode {
        type_name: expected.full_name().to_string(),
        reason: e.to_string(),
    })
}
