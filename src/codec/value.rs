// src/codec/value.rs

//! The closed value sum and its canonical encoding
//!
//! A `Value` is one field of a row tuple. The set of kinds is closed;
//! every match over it is exhaustive so adding a kind is a deliberate
//! format change. NULL is its own kind, not an option wrapper, because
//! the wire encoding needs a distinct tag for it.

use super::{Reader, Writer};
use crate::hash::Addr;
use crate::{Error, Result};
use std::cmp::Ordering;

/// One-byte kind tags. Values are part of the storage format; never
/// renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Null = 0,
    Bool = 1,
    Int = 2,
    Uint = 3,
    Float = 4,
    Decimal = 5,
    Text = 6,
    Bytes = 7,
    Timestamp = 8,
    Json = 9,
    Blob = 10,
    Tuple = 11,
}

impl ValueKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Uint,
            4 => Self::Float,
            5 => Self::Decimal,
            6 => Self::Text,
            7 => Self::Bytes,
            8 => Self::Timestamp,
            9 => Self::Json,
            10 => Self::Blob,
            11 => Self::Tuple,
            _ => return Err(Error::Decode(format!("unknown value kind: {}", v))),
        })
    }
}

/// String comparison rule for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collation {
    #[default]
    Binary,
    CaseInsensitive,
}

impl Collation {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            Collation::Binary => a.cmp(b),
            Collation::CaseInsensitive => {
                let mut ai = a.chars().flat_map(char::to_lowercase);
                let mut bi = b.chars().flat_map(char::to_lowercase);
                loop {
                    match (ai.next(), bi.next()) {
                        (None, None) => return Ordering::Equal,
                        (None, Some(_)) => return Ordering::Less,
                        (Some(_), None) => return Ordering::Greater,
                        (Some(x), Some(y)) => match x.cmp(&y) {
                            Ordering::Equal => continue,
                            other => return other,
                        },
                    }
                }
            }
        }
    }
}

/// A reference to an out-of-line chunked byte sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    /// Ordered chunk addresses
    pub chunks: Vec<Addr>,
    /// Total byte length across chunks
    pub len: u64,
}

/// One field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Normalized decimal text, e.g. "-12.50"
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Microseconds since the Unix epoch
    Timestamp(i64),
    Json(String),
    Blob(BlobRef),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Uint(_) => ValueKind::Uint,
            Value::Float(_) => ValueKind::Float,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Json(_) => ValueKind::Json,
            Value::Blob(_) => ValueKind::Blob,
            Value::Tuple(_) => ValueKind::Tuple,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical encoding. Fails on NaN floats, which have no canonical
    /// form.
    pub fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_u8(self.kind() as u8);
        match self {
            Value::Null => {}
            Value::Bool(v) => w.put_bool(*v),
            Value::Int(v) => w.put_i64(*v),
            Value::Uint(v) => w.put_u64(*v),
            Value::Float(v) => {
                if v.is_nan() {
                    return Err(Error::Encode("NaN has no canonical encoding".to_string()));
                }
                // -0.0 and 0.0 are equal; encode them identically
                let v = if *v == 0.0 { 0.0 } else { *v };
                w.put_u64(v.to_bits());
            }
            Value::Decimal(v) => w.put_str(v),
            Value::Text(v) => w.put_str(v),
            Value::Bytes(v) => w.put_bytes(v),
            Value::Timestamp(v) => w.put_i64(*v),
            Value::Json(v) => w.put_str(v),
            Value::Blob(b) => {
                w.put_u32(b.chunks.len() as u32);
                for addr in &b.chunks {
                    w.put_addr(addr);
                }
                w.put_u64(b.len);
            }
            Value::Tuple(fields) => {
                w.put_u16(fields.len() as u16);
                for field in fields {
                    field.encode(w)?;
                }
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader) -> Result<Value> {
        let kind = ValueKind::from_u8(r.get_u8()?)?;
        Ok(match kind {
            ValueKind::Null => Value::Null,
            ValueKind::Bool => Value::Bool(r.get_bool()?),
            ValueKind::Int => Value::Int(r.get_i64()?),
            ValueKind::Uint => Value::Uint(r.get_u64()?),
            ValueKind::Float => Value::Float(f64::from_bits(r.get_u64()?)),
            ValueKind::Decimal => Value::Decimal(r.get_str()?.to_string()),
            ValueKind::Text => Value::Text(r.get_str()?.to_string()),
            ValueKind::Bytes => Value::Bytes(r.get_bytes()?.to_vec()),
            ValueKind::Timestamp => Value::Timestamp(r.get_i64()?),
            ValueKind::Json => Value::Json(r.get_str()?.to_string()),
            ValueKind::Blob => {
                let count = r.get_u32()? as usize;
                let mut chunks = Vec::with_capacity(count);
                for _ in 0..count {
                    chunks.push(r.get_addr()?);
                }
                let len = r.get_u64()?;
                Value::Blob(BlobRef { chunks, len })
            }
            ValueKind::Tuple => {
                let count = r.get_u16()? as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(Value::decode(r)?);
                }
                Value::Tuple(fields)
            }
        })
    }

    /// Encode a standalone value to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        self.encode(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Decode a standalone value, consuming all input
    pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
        let mut r = Reader::new(bytes);
        let value = Value::decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }

    /// Total order used for key comparison. NULL sorts first; values of
    /// different kinds order by kind tag (schemas keep kinds aligned, so
    /// this only decides degenerate cases).
    pub fn compare(&self, other: &Value, collation: Collation) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Uint(a), Uint(b)) => a.cmp(b),
            (Int(a), Uint(b)) => {
                if *a < 0 {
                    Ordering::Less
                } else {
                    (*a as u64).cmp(b)
                }
            }
            (Uint(a), Int(b)) => {
                if *b < 0 {
                    Ordering::Greater
                } else {
                    a.cmp(&(*b as u64))
                }
            }
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Decimal(a), Decimal(b)) => compare_decimal(a, b),
            (Text(a), Text(b)) => collation.compare(a, b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Json(a), Json(b)) => a.cmp(b),
            (Blob(a), Blob(b)) => a.chunks.cmp(&b.chunks),
            (Tuple(a), Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y, collation) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => (a.kind() as u8).cmp(&(b.kind() as u8)),
        }
    }
}

/// Compare normalized decimal strings numerically
fn compare_decimal(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = v.to_bytes().unwrap();
        assert_eq!(Value::from_bytes(&bytes).unwrap(), v);
        // Canonical: re-encoding is byte identical
        assert_eq!(Value::from_bytes(&bytes).unwrap().to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-7));
        roundtrip(Value::Uint(u64::MAX));
        roundtrip(Value::Float(2.5));
        roundtrip(Value::Decimal("-12.50".to_string()));
        roundtrip(Value::Text("héllo".to_string()));
        roundtrip(Value::Bytes(vec![0, 255, 1]));
        roundtrip(Value::Timestamp(1_700_000_000_000_000));
        roundtrip(Value::Json(r#"{"a":1}"#.to_string()));
        roundtrip(Value::Blob(BlobRef {
            chunks: vec![Addr::of(b"c1"), Addr::of(b"c2")],
            len: 99,
        }));
        roundtrip(Value::Tuple(vec![Value::Int(1), Value::Null, Value::Text("x".into())]));
    }

    #[test]
    fn test_nan_rejected() {
        assert!(Value::Float(f64::NAN).to_bytes().is_err());
    }

    #[test]
    fn test_negative_zero_canonical() {
        let pos = Value::Float(0.0).to_bytes().unwrap();
        let neg = Value::Float(-0.0).to_bytes().unwrap();
        assert_eq!(pos, neg);
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            Value::Null.compare(&Value::Int(i64::MIN), Collation::Binary),
            Ordering::Less
        );
    }

    #[test]
    fn test_mixed_sign_int_compare() {
        assert_eq!(
            Value::Int(-1).compare(&Value::Uint(0), Collation::Binary),
            Ordering::Less
        );
        assert_eq!(
            Value::Uint(u64::MAX).compare(&Value::Int(5), Collation::Binary),
            Ordering::Greater
        );
    }

    #[test]
    fn test_collation_compare() {
        let a = Value::Text("ABC".to_string());
        let b = Value::Text("abc".to_string());
        assert_ne!(a.compare(&b, Collation::Binary), Ordering::Equal);
        assert_eq!(a.compare(&b, Collation::CaseInsensitive), Ordering::Equal);
    }

    #[test]
    fn test_tuple_prefix_compare() {
        let short = Value::Tuple(vec![Value::Int(1)]);
        let long = Value::Tuple(vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(short.compare(&long, Collation::Binary), Ordering::Less);
    }

    #[test]
    fn test_decimal_numeric_compare() {
        let a = Value::Decimal("10.5".to_string());
        let b = Value::Decimal("9.75".to_string());
        assert_eq!(a.compare(&b, Collation::Binary), Ordering::Greater);
    }
}
