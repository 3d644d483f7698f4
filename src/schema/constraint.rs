// src/schema/constraint.rs

//! Check constraints, secondary index definitions, and foreign keys
//!
//! Constraints reference columns by tag, never by name, so they survive
//! renames. Check expressions are stored as text; this module evaluates
//! the simple comparison forms itself and leaves anything richer to the
//! SQL engine that owns expression semantics.

use super::column::Column;
use super::Schema;
use crate::codec::{Reader, Value, Writer};
use crate::Result;
use std::cmp::Ordering;
use tracing::debug;

/// A CHECK constraint
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConstraint {
    pub name: String,
    /// Textual expression, e.g. "age >= 0"
    pub expression: String,
    /// Tags of the columns the expression mentions
    pub referenced_tags: Vec<u16>,
}

impl CheckConstraint {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_str(&self.name);
        w.put_str(&self.expression);
        w.put_u16(self.referenced_tags.len() as u16);
        for tag in &self.referenced_tags {
            w.put_u16(*tag);
        }
    }

    pub(crate) fn decode(r: &mut Reader) -> Result<CheckConstraint> {
        let name = r.get_str()?.to_string();
        let expression = r.get_str()?.to_string();
        let count = r.get_u16()? as usize;
        let mut referenced_tags = Vec::with_capacity(count);
        for _ in 0..count {
            referenced_tags.push(r.get_u16()?);
        }
        Ok(CheckConstraint {
            name,
            expression,
            referenced_tags,
        })
    }

    /// Evaluate against a full row (values aligned with the schema's
    /// column order). Supports `col OP literal`, `col IS [NOT] NULL`;
    /// expressions beyond that are accepted and logged, since full
    /// evaluation belongs to the SQL engine.
    pub fn evaluate(&self, schema: &Schema, row: &[Value]) -> bool {
        match eval_simple(&self.expression, schema, row) {
            Some(ok) => ok,
            None => {
                debug!(
                    check = %self.name,
                    expr = %self.expression,
                    "check expression not evaluable here; deferring to the engine"
                );
                true
            }
        }
    }
}

fn eval_simple(expr: &str, schema: &Schema, row: &[Value]) -> Option<bool> {
    let expr = expr.trim();

    // col IS [NOT] NULL
    if let Some(rest) = strip_suffix_ci(expr, "is not null") {
        let value = column_value(rest.trim(), schema, row)?;
        return Some(!value.is_null());
    }
    if let Some(rest) = strip_suffix_ci(expr, "is null") {
        let value = column_value(rest.trim(), schema, row)?;
        return Some(value.is_null());
    }

    // col OP literal, longest operators first
    for op in ["<=", ">=", "<>", "!=", "=", "<", ">"] {
        if let Some(idx) = expr.find(op) {
            let (lhs, rhs) = expr.split_at(idx);
            let rhs = &rhs[op.len()..];
            let value = column_value(lhs.trim(), schema, row)?;
            let literal = parse_literal(rhs.trim())?;
            if value.is_null() {
                // SQL three-valued logic: NULL comparisons don't fail a check
                return Some(true);
            }
            let ord = value.compare(&literal, Default::default());
            return Some(match op {
                "=" => ord == Ordering::Equal,
                "!=" | "<>" => ord != Ordering::Equal,
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                ">=" => ord != Ordering::Less,
                _ => return None,
            });
        }
    }
    None
}

fn strip_suffix_ci<'a>(expr: &'a str, suffix: &str) -> Option<&'a str> {
    let split = expr.len().checked_sub(suffix.len())?;
    let (head, tail) = expr.split_at_checked(split)?;
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

fn column_value<'a>(name: &str, schema: &Schema, row: &'a [Value]) -> Option<&'a Value> {
    let name = name.trim_matches('`');
    let idx = schema
        .columns()
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(name))?;
    row.get(idx)
}

fn parse_literal(text: &str) -> Option<Value> {
    if let Some(stripped) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Some(Value::Text(stripped.to_string()));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(Value::Int(v));
    }
    if let Ok(v) = text.parse::<f64>() {
        return Some(Value::Float(v));
    }
    None
}

/// A secondary index definition
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    /// Indexed column tags in index order
    pub tags: Vec<u16>,
    pub unique: bool,
}

impl IndexDef {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_str(&self.name);
        w.put_u16(self.tags.len() as u16);
        for tag in &self.tags {
            w.put_u16(*tag);
        }
        w.put_bool(self.unique);
    }

    pub(crate) fn decode(r: &mut Reader) -> Result<IndexDef> {
        let name = r.get_str()?.to_string();
        let count = r.get_u16()? as usize;
        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            tags.push(r.get_u16()?);
        }
        let unique = r.get_bool()?;
        Ok(IndexDef { name, tags, unique })
    }
}

/// A foreign key, stored at the root so both ends can be resolved by
/// name and tag without pointer cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub child_table: String,
    pub child_tags: Vec<u16>,
    pub parent_table: String,
    pub parent_tags: Vec<u16>,
}

impl ForeignKey {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_str(&self.name);
        w.put_str(&self.child_table);
        w.put_u16(self.child_tags.len() as u16);
        for tag in &self.child_tags {
            w.put_u16(*tag);
        }
        w.put_str(&self.parent_table);
        w.put_u16(self.parent_tags.len() as u16);
        for tag in &self.parent_tags {
            w.put_u16(*tag);
        }
    }

    pub(crate) fn decode(r: &mut Reader) -> Result<ForeignKey> {
        let name = r.get_str()?.to_string();
        let child_table = r.get_str()?.to_string();
        let child_count = r.get_u16()? as usize;
        let mut child_tags = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            child_tags.push(r.get_u16()?);
        }
        let parent_table = r.get_str()?.to_string();
        let parent_count = r.get_u16()? as usize;
        let mut parent_tags = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            parent_tags.push(r.get_u16()?);
        }
        Ok(ForeignKey {
            name,
            child_table,
            child_tags,
            parent_table,
            parent_tags,
        })
    }
}

/// Build the referenced-tag list for a check expression by scanning for
/// column names.
pub fn referenced_tags(expression: &str, columns: &[Column]) -> Vec<u16> {
    let lowered = expression.to_lowercase();
    columns
        .iter()
        .filter(|c| lowered.contains(&c.name.to_lowercase()))
        .map(|c| c.tag)
        .collect()
}
