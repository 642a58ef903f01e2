use serde_json::Value;

use super::RecordId;
use crate::error::{SyncError, SyncResult};

const INT_TAG: u8 = 0x03;
const STR_TAG: u8 = 0x04;

/// Encode an id into a binary-comparable key.
/// Integers sort numerically (sign bit flipped) and before all strings.
pub fn encode_key(id: &RecordId) -> Vec<u8> {
    match id {
        RecordId::Int(n) => {
            let mut key = Vec::with_capacity(9);
            key.push(INT_TAG);
            key.extend_from_slice(&((*n as u64) ^ (1 << 63)).to_be_bytes());
            key
        }
        RecordId::Str(s) => {
            let mut key = Vec::with_capacity(s.len() + 1);
            key.push(STR_TAG);
            key.extend_from_slice(s.as_bytes());
            key
        }
    }
}

pub fn decode_key(bytes: &[u8]) -> Option<RecordId> {
    match bytes.split_first()? {
        (&INT_TAG, rest) => {
            let arr: [u8; 8] = rest.try_into().ok()?;
            Some(RecordId::Int((u64::from_be_bytes(arr) ^ (1 << 63)) as i64))
        }
        (&STR_TAG, rest) => String::from_utf8(rest.to_vec()).ok().map(RecordId::Str),
        _ => None,
    }
}

/// Read the inline `id` of a record. Non-objects and objects without an id
/// (or with `id: null`) have none.
pub fn inline_id(record: &Value) -> SyncResult<Option<RecordId>> {
    match record.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(RecordId::Int(n)))
            .ok_or_else(|| SyncError::InvalidRecord(format!("id {} is not an integer", n))),
        Some(Value::String(s)) => Ok(Some(RecordId::Str(s.clone()))),
        Some(other) => Err(SyncError::InvalidRecord(format!(
            "id must be a string or integer, got {}",
            other
        ))),
    }
}

/// Resolve the key for `record`, drawing from the collection's auto-increment
/// sequence when it has no id. Objects get the generated id written back;
/// other values are keyed out-of-line. An explicit integer id ahead of the
/// sequence advances it so generated ids never collide.
pub fn assign_id(record: &mut Value, seq: &mut u64) -> SyncResult<RecordId> {
    if let Some(id) = inline_id(record)? {
        if let RecordId::Int(n) = id {
            if n > 0 && n as u64 > *seq {
                *seq = n as u64;
            }
        }
        return Ok(id);
    }

    *seq += 1;
    let id = RecordId::Int(*seq as i64);
    if let Value::Object(map) = record {
        map.insert("id".to_string(), Value::from(*seq));
    }
    Ok(id)
}

pub fn encode_u64(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

pub fn decode_u64(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .unwrap_or_default()
}
