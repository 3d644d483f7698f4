// src/merge/row_merge.rs

//! Three-way row merge for one table
//!
//! Runs a three-way prolly diff over the reprojected primary maps and
//! applies the standard resolution table. Rows both sides changed are
//! reconciled cell by cell, matched by column tag; a cell that diverged
//! on both sides sends the whole row to the conflicts sidecar, with
//! *ours* left in the merged table so reads keep working.

use crate::codec::Value;
use crate::prolly::{three_way_diff, ProllyMap};
use crate::schema::Schema;
use crate::table::{row, ConflictRow, Conflicts, Table};
use crate::Result;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct RowMergeStats {
    pub adds: u64,
    pub modifications: u64,
    pub deletes: u64,
    pub conflicts: u64,
}

pub struct RowMergeResult {
    pub table: Table,
    pub stats: RowMergeStats,
}

/// Merge rows of one table whose schema has already been resolved to
/// `merged_schema`.
pub fn merge_rows(
    base: Option<&Table>,
    ours: &Table,
    theirs: &Table,
    merged_schema: &Schema,
) -> Result<RowMergeResult> {
    let store = ours.store();

    // Align all three sides with the merged schema so value tuples
    // compare field for field.
    let ours_aligned = ours.reproject(merged_schema.clone())?;
    let theirs_aligned = theirs.reproject(merged_schema.clone())?;
    let base_aligned = match base {
        Some(table) => table.reproject(merged_schema.clone())?,
        None => Table::new(store.clone(), merged_schema.clone()),
    };

    if merged_schema.is_keyless() {
        return merge_keyless(&store, &base_aligned, &ours_aligned, &theirs_aligned, merged_schema);
    }

    let entries = three_way_diff(
        base_aligned.primary(),
        ours_aligned.primary(),
        theirs_aligned.primary(),
    )?;

    let mut stats = RowMergeStats::default();
    let mut primary = ours_aligned.primary().edit();
    // Conflict tuples are recorded in the merged layout, so all three
    // schema slots carry the merged schema.
    let mut conflicts = Conflicts::new(
        store.clone(),
        ours_aligned.primary().order().clone(),
        merged_schema.clone(),
        merged_schema.clone(),
        merged_schema.clone(),
    );
    let mut conflict_edits = conflicts.rows.edit();
    let mut max_their_ai: u64 = 0;

    for entry in entries {
        let ours_changed = entry.ours_changed();
        let theirs_changed = entry.theirs_changed();

        if !theirs_changed {
            // Ours wins by staying put
            continue;
        }
        if !ours_changed {
            // Take theirs
            match &entry.theirs {
                Some(value) => {
                    observe_auto_increment(merged_schema, &entry.key, &mut max_their_ai);
                    if entry.base.is_some() {
                        stats.modifications += 1;
                    } else {
                        stats.adds += 1;
                    }
                    primary.put(entry.key.clone(), value.clone());
                }
                None => {
                    stats.deletes += 1;
                    primary.delete(entry.key.clone());
                }
            }
            continue;
        }

        // Both sides changed
        if entry.ours == entry.theirs {
            continue;
        }

        match (&entry.ours, &entry.theirs) {
            (Some(our_value), Some(their_value)) => {
                match reconcile_cells(
                    merged_schema,
                    &entry.key,
                    entry.base.as_deref(),
                    our_value,
                    their_value,
                )? {
                    Some(merged_value) => {
                        observe_auto_increment(merged_schema, &entry.key, &mut max_their_ai);
                        stats.modifications += 1;
                        primary.put(entry.key.clone(), merged_value);
                    }
                    None => {
                        stats.conflicts += 1;
                        let conflict = ConflictRow {
                            base: entry.base.clone(),
                            ours: entry.ours.clone(),
                            theirs: entry.theirs.clone(),
                        };
                        conflict_edits.put(entry.key.clone(), conflict.encode());
                        // ours stays materialized in the merged table
                    }
                }
            }
            // Modify/delete in either direction
            _ => {
                stats.conflicts += 1;
                let conflict = ConflictRow {
                    base: entry.base.clone(),
                    ours: entry.ours.clone(),
                    theirs: entry.theirs.clone(),
                };
                conflict_edits.put(entry.key.clone(), conflict.encode());
            }
        }
    }

    let primary = primary.flush()?;
    conflicts.rows = conflict_edits.flush()?;

    let mut table = rebuild_from_primary(&ours_aligned, primary, merged_schema)?;
    let counter_floor = ours
        .auto_increment()
        .max(theirs.auto_increment())
        .max(if max_their_ai > 0 { max_their_ai + 1 } else { 0 });
    table = table.with_auto_increment_floor(counter_floor);
    if !conflicts.is_empty() {
        table = table.with_conflicts(conflicts);
    }
    Ok(RowMergeResult { table, stats })
}

/// Keyless tables merge by count arithmetic: merged = ours + theirs - base
fn merge_keyless(
    store: &Arc<dyn crate::store::ChunkStore>,
    base: &Table,
    ours: &Table,
    theirs: &Table,
    merged_schema: &Schema,
) -> Result<RowMergeResult> {
    let entries = three_way_diff(base.primary(), ours.primary(), theirs.primary())?;
    let mut stats = RowMergeStats::default();
    let mut primary = ours.primary().edit();

    let count_of = |bytes: Option<&[u8]>| -> Result<i64> {
        match bytes {
            None => Ok(0),
            Some(b) => {
                let fields = row::decode_tuple(b)?;
                match fields.first() {
                    Some(Value::Uint(n)) => Ok(*n as i64),
                    _ => Ok(0),
                }
            }
        }
    };

    for entry in entries {
        if !entry.theirs_changed() {
            continue;
        }
        let b = count_of(entry.base.as_deref())?;
        let o = count_of(entry.ours.as_deref())?;
        let t = count_of(entry.theirs.as_deref())?;
        let merged = (o + t - b).max(0) as u64;

        let sample = entry
            .ours
            .as_ref()
            .or(entry.theirs.as_ref())
            .or(entry.base.as_ref());
        match (merged, sample) {
            (0, _) | (_, None) => {
                if o > 0 {
                    stats.deletes += 1;
                }
                primary.delete(entry.key.clone());
            }
            (count, Some(sample)) => {
                let mut fields = row::decode_tuple(sample)?;
                if fields.is_empty() {
                    continue;
                }
                fields[0] = Value::Uint(count);
                if o == 0 {
                    stats.adds += 1;
                } else {
                    stats.modifications += 1;
                }
                primary.put(entry.key.clone(), Value::Tuple(fields).to_bytes()?);
            }
        }
    }

    let primary = primary.flush()?;
    let base_table = Table::new(store.clone(), merged_schema.clone());
    let table = rebuild_from_primary(&base_table, primary, merged_schema)?;
    Ok(RowMergeResult { table, stats })
}

/// Per-column three-way reconcile; `None` means an unresolvable row
fn reconcile_cells(
    schema: &Schema,
    key: &[u8],
    base: Option<&[u8]>,
    ours: &[u8],
    theirs: &[u8],
) -> Result<Option<Vec<u8>>> {
    let our_row = row::decode_row(schema, key, ours)?;
    let their_row = row::decode_row(schema, key, theirs)?;
    let base_row = match base {
        Some(bytes) => Some(row::decode_row(schema, key, bytes)?),
        // No base: any differing cell is a conflict, which the caller
        // already knows is present
        None => return Ok(None),
    };

    let mut merged = Vec::with_capacity(our_row.len());
    for (pos, _col) in schema.columns().iter().enumerate() {
        let b = base_row.as_ref().map(|r| &r[pos]);
        let o = &our_row[pos];
        let t = &their_row[pos];
        if o == t {
            merged.push(o.clone());
        } else if b == Some(o) {
            merged.push(t.clone());
        } else if b == Some(t) {
            merged.push(o.clone());
        } else {
            return Ok(None);
        }
    }
    Ok(Some(row::encode_value(schema, &merged)?))
}

/// Track the largest AUTO_INCREMENT key taken from the other side
fn observe_auto_increment(schema: &Schema, key: &[u8], max_seen: &mut u64) {
    let Some(ai_col) = schema.auto_increment_column() else {
        return;
    };
    let Some(pk_pos) = schema.pk_tags().iter().position(|t| *t == ai_col.tag) else {
        return;
    };
    let Ok(fields) = row::decode_tuple(key) else {
        return;
    };
    let observed = match fields.get(pk_pos) {
        Some(Value::Int(v)) if *v > 0 => *v as u64,
        Some(Value::Uint(v)) => *v,
        _ => return,
    };
    *max_seen = (*max_seen).max(observed);
}

/// Swap in a merged primary map and recompute the indexes
fn rebuild_from_primary(
    template: &Table,
    primary: ProllyMap,
    merged_schema: &Schema,
) -> Result<Table> {
    let mut table = Table::new(template.store(), merged_schema.clone())
        .with_primary_map(primary)
        .with_auto_increment_floor(template.auto_increment());
    table.rebuild_indexes()?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;
    use crate::store::MemoryChunkStore;

    fn store() -> Arc<dyn crate::store::ChunkStore> {
        Arc::new(MemoryChunkStore::new())
    }

    fn table_with(store: &Arc<dyn crate::store::ChunkStore>, rows: &[(i64, i64)]) -> Table {
        let schema = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("v", SqlType::Int, true)
            .primary_key(&["pk"])
            .build()
            .unwrap();
        let table = Table::new(store.clone(), schema);
        let mut editor = table.editor();
        for (pk, v) in rows {
            editor
                .insert_row(vec![Value::Int(*pk), Value::Int(*v)])
                .unwrap();
        }
        editor.flush().unwrap()
    }

    #[test]
    fn test_disjoint_edits_merge_clean() {
        let store = store();
        let base = table_with(&store, &[(0, 0)]);
        let ours = table_with(&store, &[(0, 0), (1, 1)]);
        let theirs = table_with(&store, &[(0, 0), (2, 2)]);

        let result =
            merge_rows(Some(&base), &ours, &theirs, &base.schema().clone()).unwrap();
        assert_eq!(result.stats.conflicts, 0);
        assert_eq!(result.stats.adds, 1);
        assert_eq!(result.table.entry_count(), 3);
        assert!(!result.table.has_conflicts());
    }

    #[test]
    fn test_add_add_conflict_keeps_ours() {
        let store = store();
        let base = table_with(&store, &[(0, 0)]);
        let ours = table_with(&store, &[(0, 0), (1, 1)]);
        let theirs = table_with(&store, &[(0, 0), (1, 2)]);

        let result =
            merge_rows(Some(&base), &ours, &theirs, &base.schema().clone()).unwrap();
        assert_eq!(result.stats.conflicts, 1);
        assert!(result.table.has_conflicts());

        // ours is visible in the merged table
        let visible = result.table.get_row(&[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(visible[1], Value::Int(1));

        // and the sidecar records base absent, both sides present
        let conflicts = result.table.conflicts().unwrap();
        assert_eq!(conflicts.count(), 1);
        let (key, value) = conflicts.rows.iter().unwrap().next().unwrap().unwrap();
        let conflict = ConflictRow::decode(&value).unwrap();
        assert!(conflict.base.is_none());
        assert!(conflict.ours.is_some());
        assert!(conflict.theirs.is_some());
        assert_eq!(row::render_key(&key), "(1)");
    }

    #[test]
    fn test_cell_level_reconcile() {
        let store = store();
        let schema = Schema::builder("t")
            .column("pk", SqlType::Int, false)
            .column("a", SqlType::Int, true)
            .column("b", SqlType::Int, true)
            .primary_key(&["pk"])
            .build()
            .unwrap();
        let mk = |rows: &[(i64, i64, i64)]| {
            let table = Table::new(store.clone(), schema.clone());
            let mut editor = table.editor();
            for (pk, a, b) in rows {
                editor
                    .insert_row(vec![Value::Int(*pk), Value::Int(*a), Value::Int(*b)])
                    .unwrap();
            }
            editor.flush().unwrap()
        };
        let base = mk(&[(1, 10, 20)]);
        let ours = mk(&[(1, 11, 20)]); // changed a
        let theirs = mk(&[(1, 10, 22)]); // changed b

        let result = merge_rows(Some(&base), &ours, &theirs, &schema).unwrap();
        assert_eq!(result.stats.conflicts, 0);
        let merged = result.table.get_row(&[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(merged, vec![Value::Int(1), Value::Int(11), Value::Int(22)]);
    }

    #[test]
    fn test_modify_delete_conflict() {
        let store = store();
        let base = table_with(&store, &[(1, 10)]);
        let ours = table_with(&store, &[]); // deleted
        let theirs = table_with(&store, &[(1, 11)]); // modified

        let result =
            merge_rows(Some(&base), &ours, &theirs, &base.schema().clone()).unwrap();
        assert_eq!(result.stats.conflicts, 1);
        // ours (the deletion) is materialized
        assert!(result.table.get_row(&[Value::Int(1)]).unwrap().is_none());
    }

    #[test]
    fn test_delete_unmodified_takes_delete() {
        let store = store();
        let base = table_with(&store, &[(1, 10), (2, 20)]);
        let ours = table_with(&store, &[(1, 10), (2, 20)]);
        let theirs = table_with(&store, &[(2, 20)]);

        let result =
            merge_rows(Some(&base), &ours, &theirs, &base.schema().clone()).unwrap();
        assert_eq!(result.stats.deletes, 1);
        assert!(result.table.get_row(&[Value::Int(1)]).unwrap().is_none());
    }

    #[test]
    fn test_auto_increment_reconciliation() {
        let store = store();
        let schema = Schema::builder("t")
            .auto_increment_column("pk", SqlType::Int)
            .column("v", SqlType::Int, true)
            .primary_key(&["pk"])
            .build()
            .unwrap();
        let mk = |rows: &[(i64, i64)]| {
            let table = Table::new(store.clone(), schema.clone());
            let mut editor = table.editor();
            for (pk, v) in rows {
                editor
                    .insert_row(vec![Value::Int(*pk), Value::Int(*v)])
                    .unwrap();
            }
            editor.flush().unwrap()
        };
        let base = mk(&[(1, 1), (2, 2)]); // counter 3
        let ours = mk(&[(1, 1), (2, 2), (3, 3), (4, 4)]); // counter 5
        let theirs = mk(&[(1, 1), (2, 2), (10, 10)]); // counter 11

        let result = merge_rows(Some(&base), &ours, &theirs, &schema).unwrap();
        assert_eq!(result.table.entry_count(), 5);
        assert_eq!(result.table.next_auto_increment(), 11);
    }
}
