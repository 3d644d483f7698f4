// src/merge/schema_merge.rs

//! Three-way schema merge
//!
//! Columns are matched by tag, never by name or position. Each column
//! field (name, type, nullability, default) merges by the usual
//! three-way rule: a side that differs from base wins; two sides that
//! differ from base and from each other are a fatal schema conflict.
//! Diverging primary-key sets cannot be reconciled at all.

use crate::schema::{CheckConstraint, Column, IndexDef, Schema};
use crate::{Error, Result};

fn conflict(table: &str, detail: String) -> Error {
    Error::SchemaConflict {
        table: table.to_string(),
        detail,
    }
}

/// Pick one of three versions of a field; `None` means the column was
/// absent on that side.
fn merge_field<T: Clone + PartialEq>(
    base: Option<&T>,
    ours: &T,
    theirs: &T,
) -> std::result::Result<T, ()> {
    if ours == theirs {
        return Ok(ours.clone());
    }
    match base {
        Some(b) if b == ours => Ok(theirs.clone()),
        Some(b) if b == theirs => Ok(ours.clone()),
        _ => Err(()),
    }
}

fn merge_column(
    table: &str,
    base: Option<&Column>,
    ours: &Column,
    theirs: &Column,
) -> Result<Column> {
    if ours == theirs {
        return Ok(ours.clone());
    }

    let name = merge_field(base.map(|c| &c.name), &ours.name, &theirs.name).map_err(|_| {
        conflict(
            table,
            format!(
                "column renamed to '{}' and '{}' on the two branches",
                ours.name, theirs.name
            ),
        )
    })?;

    let ty = match merge_field(base.map(|c| &c.ty), &ours.ty, &theirs.ty) {
        Ok(ty) => ty,
        Err(()) => {
            // Both changed: allow when one strictly widens the other
            if ours.ty.is_widening_of(&theirs.ty) {
                ours.ty.clone()
            } else if theirs.ty.is_widening_of(&ours.ty) {
                theirs.ty.clone()
            } else {
                return Err(conflict(
                    table,
                    format!(
                        "column '{}' changed to incompatible types {:?} and {:?}",
                        name, ours.ty, theirs.ty
                    ),
                ));
            }
        }
    };

    let nullable =
        merge_field(base.map(|c| &c.nullable), &ours.nullable, &theirs.nullable).map_err(|_| {
            conflict(
                table,
                format!("column '{}' nullability diverged", name),
            )
        })?;

    let default = merge_field(base.map(|c| &c.default), &ours.default, &theirs.default)
        .map_err(|_| conflict(table, format!("column '{}' default diverged", name)))?;

    let auto_increment = merge_field(
        base.map(|c| &c.auto_increment),
        &ours.auto_increment,
        &theirs.auto_increment,
    )
    .map_err(|_| conflict(table, format!("column '{}' auto_increment diverged", name)))?;

    // Carry the tag history from whichever side holds the merged type
    let prior_tags = if ty == ours.ty {
        ours.prior_tags.clone()
    } else {
        theirs.prior_tags.clone()
    };

    Ok(Column {
        tag: ours.tag,
        name,
        ty,
        nullable,
        default,
        auto_increment,
        prior_tags,
    })
}

fn merge_checks(
    table: &str,
    base: Option<&Schema>,
    ours: &Schema,
    theirs: &Schema,
) -> Result<Vec<CheckConstraint>> {
    let mut names: Vec<String> = ours.checks().iter().map(|c| c.name.clone()).collect();
    for check in theirs.checks() {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&check.name)) {
            names.push(check.name.clone());
        }
    }

    let find = |schema: &Schema, name: &str| -> Option<CheckConstraint> {
        schema
            .checks()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
    };

    let mut out = Vec::new();
    for name in names {
        let b = base.map(|s| find(s, &name));
        let o = find(ours, &name);
        let t = find(theirs, &name);
        match merge_field(b.as_ref(), &o, &t) {
            Ok(Some(check)) => out.push(check),
            Ok(None) => {}
            Err(()) => {
                return Err(conflict(
                    table,
                    format!("check constraint '{}' diverged", name),
                ))
            }
        }
    }
    Ok(out)
}

fn merge_indexes(
    table: &str,
    base: Option<&Schema>,
    ours: &Schema,
    theirs: &Schema,
) -> Result<Vec<IndexDef>> {
    let mut names: Vec<String> = ours.indexes().iter().map(|i| i.name.clone()).collect();
    for index in theirs.indexes() {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&index.name)) {
            names.push(index.name.clone());
        }
    }

    let find = |schema: &Schema, name: &str| -> Option<IndexDef> {
        schema
            .indexes()
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .cloned()
    };

    let mut out = Vec::new();
    for name in names {
        let b = base.map(|s| find(s, &name));
        let o = find(ours, &name);
        let t = find(theirs, &name);
        match merge_field(b.as_ref(), &o, &t) {
            Ok(Some(index)) => out.push(index),
            Ok(None) => {}
            Err(()) => {
                return Err(conflict(table, format!("index '{}' diverged", name)))
            }
        }
    }
    Ok(out)
}

/// Merge two schema versions over an optional common base
pub fn merge_schemas(
    table: &str,
    base: Option<&Schema>,
    ours: &Schema,
    theirs: &Schema,
) -> Result<Schema> {
    if ours.pk_tags() != theirs.pk_tags() {
        return Err(Error::DivergentPrimaryKeys);
    }

    // Two columns with one name but different tags cannot be matched
    for our_col in ours.columns() {
        if let Some(their_col) = theirs.column_by_name(&our_col.name) {
            if their_col.tag != our_col.tag {
                return Err(conflict(
                    table,
                    format!(
                        "column '{}' exists with different identities on the two branches; \
                         rename one side before merging",
                        our_col.name
                    ),
                ));
            }
        }
    }

    let mut columns: Vec<Column> = Vec::new();
    for our_col in ours.columns() {
        let base_col = base.and_then(|s| s.column_by_tag(our_col.tag));
        match theirs.column_by_tag(our_col.tag) {
            Some(their_col) => {
                columns.push(merge_column(table, base_col, our_col, their_col)?);
            }
            None => {
                match base_col {
                    // Theirs dropped an unmodified column: drop it
                    Some(b) if b == our_col => {}
                    // Theirs dropped a column ours modified
                    Some(_) => {
                        return Err(conflict(
                            table,
                            format!(
                                "column '{}' modified here but dropped on the other branch",
                                our_col.name
                            ),
                        ))
                    }
                    // Ours added it
                    None => columns.push(our_col.clone()),
                }
            }
        }
    }
    for their_col in theirs.columns() {
        if ours.column_by_tag(their_col.tag).is_some() {
            continue;
        }
        match base.and_then(|s| s.column_by_tag(their_col.tag)) {
            Some(b) if b == their_col => {}
            Some(_) => {
                return Err(conflict(
                    table,
                    format!(
                        "column '{}' modified there but dropped on this branch",
                        their_col.name
                    ),
                ))
            }
            None => columns.push(their_col.clone()),
        }
    }

    let checks = merge_checks(table, base, ours, theirs)?;
    let indexes = merge_indexes(table, base, ours, theirs)?;

    // Assemble through the decoder path to reuse its invariants
    let mut w = crate::codec::Writer::new();
    w.put_u16(columns.len() as u16);
    for col in &columns {
        col.encode(&mut w);
    }
    w.put_u16(ours.pk_tags().len() as u16);
    for tag in ours.pk_tags() {
        w.put_u16(*tag);
    }
    w.put_u16(checks.len() as u16);
    for check in &checks {
        check.encode(&mut w);
    }
    w.put_u16(indexes.len() as u16);
    for index in &indexes {
        index.encode(&mut w);
    }
    let bytes = w.into_bytes();
    let mut r = crate::codec::Reader::new(&bytes);
    let schema = Schema::decode(&mut r)?;
    r.finish()?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;

    fn base_schema() -> Schema {
        Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("v", SqlType::Int, true)
            .primary_key(&["pk"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_identical_additions_share_column() {
        let base = base_schema();
        let ours = base.add_column("t", "c2", SqlType::Int, true, None).unwrap();
        let theirs = base.add_column("t", "c2", SqlType::Int, true, None).unwrap();

        let merged = merge_schemas("t", Some(&base), &ours, &theirs).unwrap();
        let c2: Vec<_> = merged
            .columns()
            .iter()
            .filter(|c| c.name == "c2")
            .collect();
        assert_eq!(c2.len(), 1);
        assert_eq!(c2[0].tag, ours.column_by_name("c2").unwrap().tag);
    }

    #[test]
    fn test_rename_one_side() {
        let base = base_schema();
        let ours = base.rename_column("v", "value").unwrap();
        let merged = merge_schemas("t", Some(&base), &ours, &base).unwrap();
        assert!(merged.column_by_name("value").is_some());
        assert!(merged.column_by_name("v").is_none());
    }

    #[test]
    fn test_rename_both_sides_divergent() {
        let base = base_schema();
        let ours = base.rename_column("v", "left").unwrap();
        let theirs = base.rename_column("v", "right").unwrap();
        let err = merge_schemas("t", Some(&base), &ours, &theirs).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_widening_one_side() {
        let varchar = |n| SqlType::Varchar {
            max_len: n,
            collation: Default::default(),
        };
        let base = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("s", varchar(50), true)
            .primary_key(&["pk"])
            .build()
            .unwrap();
        let ours = base.modify_column_type("t", "s", varchar(100)).unwrap();
        let merged = merge_schemas("t", Some(&base), &ours, &base).unwrap();
        assert_eq!(merged.column_by_name("s").unwrap().ty, varchar(100));

        // Both widened to different lengths: the wider wins
        let theirs = base.modify_column_type("t", "s", varchar(80)).unwrap();
        let merged = merge_schemas("t", Some(&base), &ours, &theirs).unwrap();
        assert_eq!(merged.column_by_name("s").unwrap().ty, varchar(100));
    }

    #[test]
    fn test_incompatible_type_changes() {
        let base = base_schema();
        let ours = base
            .modify_column_type(
                "t",
                "v",
                SqlType::Varchar {
                    max_len: 10,
                    collation: Default::default(),
                },
            )
            .unwrap();
        let theirs = base.modify_column_type("t", "v", SqlType::Float).unwrap();
        let err = merge_schemas("t", Some(&base), &ours, &theirs).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_divergent_pk_sets_fatal() {
        let ours = base_schema();
        let theirs = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("v", SqlType::Int, false)
            .primary_key(&["pk", "v"])
            .build()
            .unwrap();
        let err = merge_schemas("t", None, &ours, &theirs).unwrap_err();
        assert!(matches!(err, Error::DivergentPrimaryKeys));
    }

    #[test]
    fn test_same_name_different_tags() {
        let base = base_schema();
        // The two sides add a column with one name but different kinds,
        // so the deterministic tags differ.
        let ours = base.add_column("t", "extra", SqlType::Int, true, None).unwrap();
        let theirs = base
            .add_column(
                "t",
                "extra",
                SqlType::Text {
                    collation: Default::default(),
                },
                true,
                None,
            )
            .unwrap();
        let err = merge_schemas("t", Some(&base), &ours, &theirs).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_drop_unmodified_column() {
        let base = base_schema();
        let ours = base.clone();
        // theirs drops v (no index references it in this schema)
        let theirs = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .primary_key(&["pk"])
            .build()
            .unwrap();
        let merged = merge_schemas("t", Some(&base), &ours, &theirs).unwrap();
        assert!(merged.column_by_name("v").is_none());
    }
}
