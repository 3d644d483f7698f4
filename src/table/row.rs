// src/table/row.rs

//! Row tuple encoding
//!
//! A row is stored as two tuples: the key tuple holds the primary-key
//! values in key order, the value tuple the remaining columns in schema
//! order. Full rows in memory are plain `Vec<Value>` aligned with the
//! schema's column order. Absent trailing fields decode as NULL, which
//! is what lets old rows survive column additions without a rewrite.

use crate::codec::{Value, Writer};
use crate::hash::Addr;
use crate::schema::{Schema, SqlType, TypeKind};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Encode the primary-key tuple of a full row
pub fn encode_key(schema: &Schema, row: &[Value]) -> Result<Vec<u8>> {
    let mut fields = Vec::with_capacity(schema.pk_tags().len());
    for tag in schema.pk_tags() {
        let pos = schema
            .column_position(*tag)
            .ok_or_else(|| Error::Schema(format!("pk tag {} missing from schema", tag)))?;
        fields.push(row[pos].clone());
    }
    Value::Tuple(fields).to_bytes()
}

/// Encode the non-key tuple of a full row, dropping trailing NULLs so
/// equal logical rows encode identically across column additions.
pub fn encode_value(schema: &Schema, row: &[Value]) -> Result<Vec<u8>> {
    let mut fields: Vec<Value> = Vec::new();
    for (pos, col) in schema.columns().iter().enumerate() {
        if !schema.is_pk_tag(col.tag) {
            fields.push(row[pos].clone());
        }
    }
    while matches!(fields.last(), Some(Value::Null)) {
        fields.pop();
    }
    Value::Tuple(fields).to_bytes()
}

/// Rebuild a full row (schema column order) from its two tuples
pub fn decode_row(schema: &Schema, key: &[u8], value: &[u8]) -> Result<Vec<Value>> {
    let key_fields = decode_tuple(key)?;
    let value_fields = decode_tuple(value)?;

    let mut row = vec![Value::Null; schema.columns().len()];
    for (i, tag) in schema.pk_tags().iter().enumerate() {
        let pos = schema
            .column_position(*tag)
            .ok_or_else(|| Error::Schema(format!("pk tag {} missing from schema", tag)))?;
        row[pos] = key_fields
            .get(i)
            .cloned()
            .ok_or_else(|| Error::Decode("key tuple shorter than pk".to_string()))?;
    }
    let value_positions: Vec<usize> = schema
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !schema.is_pk_tag(c.tag))
        .map(|(pos, _)| pos)
        .collect();
    for (i, pos) in value_positions.iter().enumerate() {
        // Absent trailing fields stay NULL
        if let Some(v) = value_fields.get(i) {
            row[*pos] = v.clone();
        }
    }
    Ok(row)
}

pub fn decode_tuple(bytes: &[u8]) -> Result<Vec<Value>> {
    match Value::from_bytes(bytes)? {
        Value::Tuple(fields) => Ok(fields),
        other => Err(Error::Decode(format!(
            "expected tuple, found {:?}",
            other.kind()
        ))),
    }
}

/// View a full row as tag → value, the shape schema merge works in
pub fn row_by_tag(schema: &Schema, row: &[Value]) -> BTreeMap<u16, Value> {
    schema
        .columns()
        .iter()
        .enumerate()
        .map(|(pos, col)| (col.tag, row[pos].clone()))
        .collect()
}

/// Re-shape a row from one schema into another, matching columns by
/// tag. Columns the target adds read NULL; columns it dropped vanish.
pub fn project_row(from: &Schema, to: &Schema, row: &[Value]) -> Vec<Value> {
    let tagged = row_by_tag(from, row);
    to.columns()
        .iter()
        .map(|col| tagged.get(&col.tag).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Synthetic key for a keyless table: the hash of the row's value
/// tuple, so identical rows land on the same entry and the table hash
/// stays a pure function of its contents.
pub fn keyless_key(value_tuple: &[u8]) -> Result<Vec<u8>> {
    let addr = Addr::of(value_tuple);
    Value::Tuple(vec![Value::Bytes(addr.as_bytes().to_vec())]).to_bytes()
}

/// Convert a field value across a column kind change; identity within
/// a kind.
pub fn convert_value(value: &Value, from: &SqlType, to: &SqlType) -> Result<Value> {
    if value.is_null() || from.kind() == to.kind() {
        return Ok(value.clone());
    }
    let fail = || {
        Error::TypeDomain {
            column: String::new(),
            detail: format!("cannot convert {:?} from {:?} to {:?}", value, from, to),
        }
    };
    Ok(match (value, to.kind()) {
        (Value::Int(v), TypeKind::String) => Value::Text(v.to_string()),
        (Value::Uint(v), TypeKind::String) => Value::Text(v.to_string()),
        (Value::Float(v), TypeKind::String) => Value::Text(v.to_string()),
        (Value::Decimal(v), TypeKind::String) => Value::Text(v.clone()),
        (Value::Text(v), TypeKind::Int) => Value::Int(v.trim().parse().map_err(|_| fail())?),
        (Value::Text(v), TypeKind::Uint) => Value::Uint(v.trim().parse().map_err(|_| fail())?),
        (Value::Text(v), TypeKind::Float) => Value::Float(v.trim().parse().map_err(|_| fail())?),
        (Value::Text(v), TypeKind::Decimal) => {
            v.trim().parse::<f64>().map_err(|_| fail())?;
            Value::Decimal(v.trim().to_string())
        }
        (Value::Int(v), TypeKind::Uint) => {
            if *v < 0 {
                return Err(fail());
            }
            Value::Uint(*v as u64)
        }
        (Value::Uint(v), TypeKind::Int) => {
            if *v > i64::MAX as u64 {
                return Err(fail());
            }
            Value::Int(*v as i64)
        }
        (Value::Int(v), TypeKind::Float) => Value::Float(*v as f64),
        (Value::Uint(v), TypeKind::Float) => Value::Float(*v as f64),
        (Value::Bool(v), TypeKind::Int) => Value::Int(*v as i64),
        (Value::Int(v), TypeKind::Bool) => Value::Bool(*v != 0),
        _ => return Err(fail()),
    })
}

/// Render a key tuple for error messages, e.g. `(1,2)`
pub fn render_key(key: &[u8]) -> String {
    match decode_tuple(key) {
        Ok(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|v| match v {
                    Value::Null => "NULL".to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(i) => i.to_string(),
                    Value::Uint(u) => u.to_string(),
                    Value::Float(f) => f.to_string(),
                    Value::Decimal(d) => d.clone(),
                    Value::Text(s) => format!("'{}'", s),
                    Value::Timestamp(t) => t.to_string(),
                    other => format!("{:?}", other.kind()),
                })
                .collect();
            format!("({})", parts.join(","))
        }
        Err(_) => "(?)".to_string(),
    }
}

/// Write an optional tuple: presence flag then bytes
pub fn encode_opt_tuple(w: &mut Writer, tuple: &Option<Vec<u8>>) {
    match tuple {
        Some(bytes) => {
            w.put_bool(true);
            w.put_bytes(bytes);
        }
        None => w.put_bool(false),
    }
}
