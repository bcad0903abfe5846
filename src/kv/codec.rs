//! Key layout for table data.
//!
//! Rows live under `t{table_id}_r{handle}` and index entries under
//! `t{table_id}_i{index_id}{values}[handle]`. Integers are stored big-endian
//! with the sign bit flipped so byte order matches numeric order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{MetaError, Result};
use crate::kv::Key;
use crate::model::Datum;

const SIGN_MASK: u64 = 1 << 63;
const RECORD_SEP: &[u8] = b"_r";
const INDEX_SEP: &[u8] = b"_i";

const NIL_FLAG: u8 = 0x00;
const STRING_FLAG: u8 = 0x01;
const BYTES_FLAG: u8 = 0x02;
const INT_FLAG: u8 = 0x03;
const UINT_FLAG: u8 = 0x04;
const FLOAT_FLAG: u8 = 0x05;

/// Row identity inside a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Handle {
    Int(i64),
    /// Encoded clustered primary key values.
    Common(Vec<u8>),
}

impl Handle {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Handle::Int(h) => Some(*h),
            Handle::Common(_) => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Handle::Int(h) => {
                let mut buf = vec![INT_FLAG];
                buf.extend_from_slice(&encode_i64(*h));
                buf
            }
            Handle::Common(bytes) => {
                let mut buf = vec![STRING_FLAG];
                buf.extend_from_slice(bytes);
                buf
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Handle> {
        match bytes.split_first() {
            Some((&INT_FLAG, rest)) if rest.len() == 8 => decode_i64(rest).map(Handle::Int),
            Some((&STRING_FLAG, rest)) => Some(Handle::Common(rest.to_vec())),
            _ => None,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Int(h) => write!(f, "{}", h),
            Handle::Common(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

pub fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ SIGN_MASK).to_be_bytes()
}

pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(arr) ^ SIGN_MASK) as i64)
}

pub fn table_prefix(table_id: i64) -> Key {
    let mut key = vec![b't'];
    key.extend_from_slice(&encode_i64(table_id));
    key
}

pub fn record_prefix(table_id: i64) -> Key {
    let mut key = table_prefix(table_id);
    key.extend_from_slice(RECORD_SEP);
    key
}

pub fn record_key(table_id: i64, handle: &Handle) -> Key {
    let mut key = record_prefix(table_id);
    key.extend_from_slice(&handle.encode());
    key
}

pub fn decode_record_key(table_id: i64, key: &[u8]) -> Result<Handle> {
    let prefix = record_prefix(table_id);
    key.strip_prefix(prefix.as_slice())
        .and_then(Handle::decode)
        .ok_or_else(|| {
            MetaError::Corrupt {
                key: String::from_utf8_lossy(key).into_owned(),
                reason: "not a record key".to_string(),
            }
            .into()
        })
}

pub fn index_prefix(table_id: i64, index_id: i64) -> Key {
    let mut key = table_prefix(table_id);
    key.extend_from_slice(INDEX_SEP);
    key.extend_from_slice(&encode_i64(index_id));
    key
}

/// Unique indexes map values to the handle stored as the value; non-unique
/// indexes append the handle to the key so entries never collide.
pub fn index_key(table_id: i64, index_id: i64, values: &[Datum], handle: Option<&Handle>) -> Key {
    let mut key = index_prefix(table_id, index_id);
    key.extend_from_slice(&encode_datums(values));
    if let Some(handle) = handle {
        key.extend_from_slice(&handle.encode());
    }
    key
}

pub fn encode_datums(values: &[Datum]) -> Vec<u8> {
    let mut buf = Vec::new();
    for value in values {
        encode_datum(&mut buf, value);
    }
    buf
}

fn encode_datum(buf: &mut Vec<u8>, value: &Datum) {
    match value {
        Datum::Null => buf.push(NIL_FLAG),
        Datum::Int(v) => {
            buf.push(INT_FLAG);
            buf.extend_from_slice(&encode_i64(*v));
        }
        Datum::Uint(v) => {
            buf.push(UINT_FLAG);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Datum::Float(v) => {
            buf.push(FLOAT_FLAG);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Datum::String(s) => encode_bytes(buf, STRING_FLAG, s.as_bytes()),
        Datum::Bytes(b) => encode_bytes(buf, BYTES_FLAG, b),
    }
}

fn encode_bytes(buf: &mut Vec<u8>, flag: u8, bytes: &[u8]) {
    buf.push(flag);
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_order_is_preserved() {
        let keys: Vec<Key> = [-5i64, -1, 0, 1, 300]
            .iter()
            .map(|h| record_key(7, &Handle::Int(*h)))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_record_key_decodes_back() {
        let key = record_key(42, &Handle::Int(-9));
        assert_eq!(decode_record_key(42, &key).unwrap(), Handle::Int(-9));
        assert!(decode_record_key(43, &key).is_err());
    }

    #[test]
    fn test_index_keys_do_not_collide_across_tables() {
        let a = index_key(1, 1, &[Datum::Int(1)], None);
        let b = index_key(2, 1, &[Datum::Int(1)], None);
        assert_ne!(a, b);
        assert!(a.starts_with(&index_prefix(1, 1)));
        assert!(!a.starts_with(&record_prefix(1)));
    }
}
