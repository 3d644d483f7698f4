// src/merge/violations.rs

//! Post-merge constraint re-validation
//!
//! A clean row merge can still assemble a state no single branch ever
//! held: a parent row deleted on one side while the other added a
//! child, two sides inserting distinct rows that collide on a unique
//! index, a NOT NULL column added beside rows that predate it. This
//! pass re-checks the merged tables and records offenders in the
//! violations sidecar instead of failing the merge; commits stay
//! blocked until the sidecars are cleared.

use crate::codec::Value;
use crate::commit::RootValue;
use crate::prolly::{KeyOrder, ProllyMap};
use crate::schema::ForeignKey;
use crate::store::ChunkStore;
use crate::table::{row, Table, Violation, ViolationType};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Re-validate `changed_tables` in `root`, attaching violation
/// sidecars where needed. Returns the updated root.
pub fn check_violations(
    store: &Arc<dyn ChunkStore>,
    root: &RootValue,
    changed_tables: &[String],
) -> Result<RootValue> {
    let mut out = root.clone();

    for name in changed_tables {
        let Some(table) = out.get_table(store, name)? else {
            continue;
        };
        let mut violations: Vec<Violation> = Vec::new();

        check_row_constraints(&table, &mut violations)?;
        check_unique_indexes(&table, &mut violations)?;

        for fk in root.foreign_keys() {
            let involved = fk.child_table.eq_ignore_ascii_case(name)
                || fk.parent_table.eq_ignore_ascii_case(name);
            if !involved {
                continue;
            }
            check_foreign_key(store, &out, fk, &mut violations)?;
        }

        if violations.is_empty() {
            if table.has_violations() {
                out = out.put_table(name, &table.clear_violations())?;
            }
            continue;
        }

        debug!(table = %name, count = violations.len(), "recording constraint violations");
        let mut editor = ProllyMap::empty(store.clone(), KeyOrder::Bytes).edit();
        for violation in &violations {
            editor.put(violation.map_key(), violation.encode());
        }
        let sidecar = editor.flush()?;
        out = out.put_table(name, &table.with_violations(sidecar))?;
    }
    Ok(out)
}

/// NOT NULL and CHECK over every row of the merged table
fn check_row_constraints(table: &Table, violations: &mut Vec<Violation>) -> Result<()> {
    let schema = table.schema();
    let needs_null_check = schema.columns().iter().any(|c| !c.nullable);
    if !needs_null_check && schema.checks().is_empty() {
        return Ok(());
    }
    for item in table.primary().iter()? {
        let (key, value) = item?;
        let full = row::decode_row(schema, &key, &value)?;
        for (pos, col) in schema.columns().iter().enumerate() {
            if !col.nullable && full[pos].is_null() {
                violations.push(Violation {
                    vtype: ViolationType::NotNull,
                    info: format!(r#"{{"column":"{}"}}"#, col.name),
                    row_key: key.clone(),
                    row_value: value.clone(),
                });
                break;
            }
        }
        for check in schema.checks() {
            if !check.evaluate(schema, &full) {
                violations.push(Violation {
                    vtype: ViolationType::Check,
                    info: format!(r#"{{"check":"{}","expression":"{}"}}"#, check.name, check.expression),
                    row_key: key.clone(),
                    row_value: value.clone(),
                });
                break;
            }
        }
    }
    Ok(())
}

/// Unique secondary indexes over the merged rows
fn check_unique_indexes(table: &Table, violations: &mut Vec<Violation>) -> Result<()> {
    let schema = table.schema();
    for def in schema.indexes().iter().filter(|d| d.unique) {
        let mut seen: HashMap<Vec<u8>, (Vec<u8>, Vec<u8>)> = HashMap::new();
        for item in table.primary().iter()? {
            let (key, value) = item?;
            let full = row::decode_row(schema, &key, &value)?;
            let mut fields = Vec::with_capacity(def.tags.len());
            let mut has_null = false;
            for tag in &def.tags {
                let pos = schema.column_position(*tag).unwrap_or_default();
                let v = full[pos].clone();
                has_null |= v.is_null();
                fields.push(v);
            }
            if has_null {
                continue;
            }
            let unique_key = Value::Tuple(fields).to_bytes()?;
            match seen.get(&unique_key) {
                Some((first_key, first_value)) => {
                    // Record both participants once
                    let info = format!(r#"{{"unique_index":"{}"}}"#, def.name);
                    if !violations
                        .iter()
                        .any(|v| v.vtype == ViolationType::Unique && v.row_key == *first_key)
                    {
                        violations.push(Violation {
                            vtype: ViolationType::Unique,
                            info: info.clone(),
                            row_key: first_key.clone(),
                            row_value: first_value.clone(),
                        });
                    }
                    violations.push(Violation {
                        vtype: ViolationType::Unique,
                        info,
                        row_key: key.clone(),
                        row_value: value.clone(),
                    });
                }
                None => {
                    seen.insert(unique_key, (key.clone(), value.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Every child row's referenced parent must exist
fn check_foreign_key(
    store: &Arc<dyn ChunkStore>,
    root: &RootValue,
    fk: &ForeignKey,
    violations: &mut Vec<Violation>,
) -> Result<()> {
    let Some(child) = root.get_table(store, &fk.child_table)? else {
        return Ok(());
    };
    let Some(parent) = root.get_table(store, &fk.parent_table)? else {
        return Ok(());
    };
    let child_schema = child.schema();
    let parent_schema = parent.schema();

    // Parent side must be covered by the parent's primary key for the
    // point probe below; unique-index parents resolve the same way
    // through their index map.
    let parent_is_pk = parent_schema.pk_tags() == fk.parent_tags.as_slice();
    let parent_unique_index = parent_schema
        .indexes()
        .iter()
        .find(|d| d.unique && d.tags == fk.parent_tags)
        .map(|d| d.name.clone());

    for item in child.primary().iter()? {
        let (key, value) = item?;
        let full = row::decode_row(child_schema, &key, &value)?;
        let mut parent_key_fields = Vec::with_capacity(fk.child_tags.len());
        let mut has_null = false;
        for tag in &fk.child_tags {
            let pos = child_schema.column_position(*tag).unwrap_or_default();
            let v = full[pos].clone();
            has_null |= v.is_null();
            parent_key_fields.push(v);
        }
        if has_null {
            // SQL FK semantics: NULL references are not checked
            continue;
        }
        let probe = Value::Tuple(parent_key_fields).to_bytes()?;
        let found = if parent_is_pk {
            parent.primary().contains(&probe)?
        } else if let Some(index_name) = &parent_unique_index {
            parent
                .index(index_name)
                .map(|m| m.contains(&probe))
                .transpose()?
                .unwrap_or(false)
        } else {
            // No covering index; skip rather than claim a violation
            continue;
        };
        if !found {
            violations.push(Violation {
                vtype: ViolationType::ForeignKey,
                info: format!(
                    r#"{{"foreign_key":"{}","referenced_table":"{}"}}"#,
                    fk.name, fk.parent_table
                ),
                row_key: key,
                row_value: value,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, SqlType};
    use crate::store::MemoryChunkStore;

    fn store() -> Arc<dyn ChunkStore> {
        Arc::new(MemoryChunkStore::new())
    }

    fn parent_child_root(store: &Arc<dyn ChunkStore>, child_rows: &[(i64, i64)]) -> RootValue {
        let parent_schema = Schema::builder("parent")
            .column("id", SqlType::Int, false)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let parent = Table::new(store.clone(), parent_schema.clone());
        let mut editor = parent.editor();
        editor.insert_row(vec![Value::Int(1)]).unwrap();
        let parent = editor.flush().unwrap();

        let child_schema = Schema::builder("child")
            .column("id", SqlType::Int, false)
            .column("parent_id", SqlType::Int, true)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let child = Table::new(store.clone(), child_schema.clone());
        let mut editor = child.editor();
        for (id, pid) in child_rows {
            editor
                .insert_row(vec![Value::Int(*id), Value::Int(*pid)])
                .unwrap();
        }
        let child = editor.flush().unwrap();

        let fk = ForeignKey {
            name: "fk_child_parent".to_string(),
            child_table: "child".to_string(),
            child_tags: vec![child_schema.column_by_name("parent_id").unwrap().tag],
            parent_table: "parent".to_string(),
            parent_tags: parent_schema.pk_tags().to_vec(),
        };

        RootValue::new()
            .put_table("parent", &parent)
            .unwrap()
            .put_table("child", &child)
            .unwrap()
            .add_foreign_key(fk)
            .unwrap()
    }

    #[test]
    fn test_fk_violation_detected() {
        let store = store();
        let root = parent_child_root(&store, &[(1, 1), (2, 99)]);
        let checked = check_violations(&store, &root, &["child".to_string()]).unwrap();

        let child = checked.get_table(&store, "child").unwrap().unwrap();
        assert!(child.has_violations());
        let sidecar = child.violations().unwrap();
        assert_eq!(sidecar.count(), 1);
        let (map_key, bytes) = sidecar.iter().unwrap().next().unwrap().unwrap();
        let violation = Violation::decode(&map_key, &bytes).unwrap();
        assert_eq!(violation.vtype, ViolationType::ForeignKey);
        assert_eq!(row::render_key(&violation.row_key), "(2)");
    }

    #[test]
    fn test_fk_satisfied_clean() {
        let store = store();
        let root = parent_child_root(&store, &[(1, 1)]);
        let checked = check_violations(&store, &root, &["child".to_string()]).unwrap();
        let child = checked.get_table(&store, "child").unwrap().unwrap();
        assert!(!child.has_violations());
    }

    #[test]
    fn test_unique_violation_records_both_rows() {
        let store = store();
        let schema = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("email", SqlType::Int, true)
            .primary_key(&["pk"])
            .index("uniq_email", &["email"], true)
            .build()
            .unwrap();
        // Assemble a duplicate state directly, as a merge would
        let table = Table::new(store.clone(), schema.clone());
        let mut primary = table.primary().edit();
        for pk in [1i64, 2] {
            let key = Value::Tuple(vec![Value::Int(pk)]).to_bytes().unwrap();
            let value = Value::Tuple(vec![Value::Int(7)]).to_bytes().unwrap();
            primary.put(key, value);
        }
        let mut table = table.with_primary_map(primary.flush().unwrap());
        table.rebuild_indexes().unwrap();
        let root = RootValue::new().put_table("t", &table).unwrap();

        let checked = check_violations(&store, &root, &["t".to_string()]).unwrap();
        let table = checked.get_table(&store, "t").unwrap().unwrap();
        assert!(table.has_violations());
        assert_eq!(table.violations().unwrap().count(), 2);
    }

    #[test]
    fn test_null_fk_reference_unchecked() {
        let store = store();
        let parent_schema = Schema::builder("parent")
            .column("id", SqlType::Int, false)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let parent = Table::new(store.clone(), parent_schema.clone());

        let child_schema = Schema::builder("child")
            .column("id", SqlType::Int, false)
            .column("parent_id", SqlType::Int, true)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let child = Table::new(store.clone(), child_schema.clone());
        let mut editor = child.editor();
        editor.insert_row(vec![Value::Int(1), Value::Null]).unwrap();
        let child = editor.flush().unwrap();

        let root = RootValue::new()
            .put_table("parent", &parent)
            .unwrap()
            .put_table("child", &child)
            .unwrap()
            .add_foreign_key(ForeignKey {
                name: "fk".to_string(),
                child_table: "child".to_string(),
                child_tags: vec![child_schema.column_by_name("parent_id").unwrap().tag],
                parent_table: "parent".to_string(),
                parent_tags: parent_schema.pk_tags().to_vec(),
            })
            .unwrap();

        let checked = check_violations(&store, &root, &["child".to_string()]).unwrap();
        let child = checked.get_table(&store, "child").unwrap().unwrap();
        assert!(!child.has_violations());
    }
}
