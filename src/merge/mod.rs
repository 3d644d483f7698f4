// src/merge/mod.rs

//! The merge engine
//!
//! Drives a three-way merge of two commits: fast-forward detection,
//! per-table schema merge (by tag), row merge (by three-way prolly
//! diff with cell-level reconcile), foreign-key list reconciliation,
//! post-merge constraint re-validation, and AUTO_INCREMENT counter
//! reconciliation. A merge that hits row conflicts still *succeeds*,
//! leaving conflict sidecars behind; fatal outcomes are limited to
//! schema-level divergence.

mod row_merge;
mod schema_merge;
mod violations;

pub use row_merge::{merge_rows, RowMergeResult, RowMergeStats};
pub use schema_merge::merge_schemas;
pub use violations::check_violations;

use crate::commit::{merge_base, Commit, RootValue};
use crate::hash::Addr;
use crate::schema::ForeignKey;
use crate::store::ChunkStore;
use crate::table::{ConflictRow, Table};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What a merge produced
#[derive(Debug)]
pub struct MergeOutcome {
    pub root: RootValue,
    pub fast_forward: bool,
    pub up_to_date: bool,
    pub conflict_tables: Vec<String>,
    pub violation_tables: Vec<String>,
    pub stats: BTreeMap<String, RowMergeStats>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflict_tables.is_empty() && self.violation_tables.is_empty()
    }
}

/// Merge `theirs` into `ours`, both commit addresses
pub fn merge_commits(
    store: &Arc<dyn ChunkStore>,
    ours: Addr,
    theirs: Addr,
) -> Result<MergeOutcome> {
    let our_commit = Commit::load(store, &ours)?;
    let their_commit = Commit::load(store, &theirs)?;
    let base = merge_base(store, ours, theirs)?;

    if base == Some(theirs) {
        debug!(%theirs, "merge is a no-op; already up to date");
        return Ok(MergeOutcome {
            root: our_commit.load_root(store)?,
            fast_forward: false,
            up_to_date: true,
            conflict_tables: Vec::new(),
            violation_tables: Vec::new(),
            stats: BTreeMap::new(),
        });
    }
    if base == Some(ours) {
        info!(from = %ours, to = %theirs, "fast-forward");
        return Ok(MergeOutcome {
            root: their_commit.load_root(store)?,
            fast_forward: true,
            up_to_date: false,
            conflict_tables: Vec::new(),
            violation_tables: Vec::new(),
            stats: BTreeMap::new(),
        });
    }

    let base_root = match base {
        Some(addr) => Some(Commit::load(store, &addr)?.load_root(store)?),
        None => None,
    };
    merge_roots(
        store,
        base_root.as_ref(),
        &our_commit.load_root(store)?,
        &their_commit.load_root(store)?,
    )
}

/// Merge two root values over an optional base root
pub fn merge_roots(
    store: &Arc<dyn ChunkStore>,
    base: Option<&RootValue>,
    ours: &RootValue,
    theirs: &RootValue,
) -> Result<MergeOutcome> {
    let mut names: Vec<String> = ours.table_names();
    for name in theirs.table_names() {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    }
    if let Some(base) = base {
        for name in base.table_names() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
    }

    let mut merged = ours.clone();
    let mut conflict_tables = Vec::new();
    let mut stats = BTreeMap::new();
    let mut changed_tables = Vec::new();

    for name in &names {
        let b = base.and_then(|r| r.table_addr(name));
        let o = ours.table_addr(name);
        let t = theirs.table_addr(name);

        if o == t || t == b {
            // Identical, or theirs left it alone: ours already stands
            continue;
        }
        if o == b {
            // Only theirs moved: take it wholesale
            match t {
                Some(_) => {
                    let table = theirs
                        .get_table(store, name)?
                        .ok_or_else(|| Error::Argument(format!("table not found: {}", name)))?;
                    merged = merged.put_table(name, &table)?;
                }
                None => {
                    merged = merged.remove_table(name)?;
                }
            }
            changed_tables.push(name.clone());
            continue;
        }

        // Both sides moved
        let (Some(_), Some(_)) = (o, t) else {
            let side = if o.is_none() { "this branch" } else { "the other branch" };
            return Err(Error::SchemaConflict {
                table: name.clone(),
                detail: format!("table was dropped on {} and modified on the other", side),
            });
        };

        let base_table = match b {
            Some(_) => base.and_then(|r| r.get_table(store, name).transpose()).transpose()?,
            None => None,
        };
        let our_table = ours
            .get_table(store, name)?
            .ok_or_else(|| Error::Argument(format!("table not found: {}", name)))?;
        let their_table = theirs
            .get_table(store, name)?
            .ok_or_else(|| Error::Argument(format!("table not found: {}", name)))?;

        let merged_schema = merge_schemas(
            name,
            base_table.as_ref().map(Table::schema),
            our_table.schema(),
            their_table.schema(),
        )?;

        let result = merge_rows(base_table.as_ref(), &our_table, &their_table, &merged_schema)?;
        if result.table.has_conflicts() {
            conflict_tables.push(name.clone());
        }
        debug!(
            table = %name,
            adds = result.stats.adds,
            modifications = result.stats.modifications,
            deletes = result.stats.deletes,
            conflicts = result.stats.conflicts,
            "merged table"
        );
        stats.insert(name.clone(), result.stats.clone());
        merged = merged.put_table(name, &result.table)?;
        changed_tables.push(name.clone());
    }

    merged = merge_foreign_keys(base, ours, theirs, merged)?;

    // Re-validate anything the merge touched, plus FK children of
    // touched parents.
    let mut to_check = changed_tables.clone();
    for fk in merged.foreign_keys() {
        let parent_changed = changed_tables
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&fk.parent_table));
        if parent_changed && !to_check.iter().any(|n| n.eq_ignore_ascii_case(&fk.child_table)) {
            to_check.push(fk.child_table.clone());
        }
    }
    let merged = check_violations(store, &merged, &to_check)?;

    let violation_tables: Vec<String> = to_check
        .iter()
        .filter(|name| {
            merged
                .get_table(store, name)
                .ok()
                .flatten()
                .is_some_and(|t| t.has_violations())
        })
        .cloned()
        .collect();

    Ok(MergeOutcome {
        root: merged,
        fast_forward: false,
        up_to_date: false,
        conflict_tables,
        violation_tables,
        stats,
    })
}

/// Three-way merge of the foreign key lists, by constraint name
fn merge_foreign_keys(
    base: Option<&RootValue>,
    ours: &RootValue,
    theirs: &RootValue,
    mut merged: RootValue,
) -> Result<RootValue> {
    let find = |root: &RootValue, name: &str| -> Option<ForeignKey> {
        root.foreign_keys()
            .iter()
            .find(|fk| fk.name.eq_ignore_ascii_case(name))
            .cloned()
    };

    let mut names: Vec<String> = ours.foreign_keys().iter().map(|f| f.name.clone()).collect();
    for fk in theirs.foreign_keys() {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&fk.name)) {
            names.push(fk.name.clone());
        }
    }

    for name in names {
        let b = base.and_then(|r| find(r, &name));
        let o = find(ours, &name);
        let t = find(theirs, &name);

        let winner = if o == t {
            o
        } else if b == o {
            t
        } else if b == t {
            o
        } else {
            return Err(Error::SchemaConflict {
                table: name.clone(),
                detail: format!("foreign key '{}' diverged on the two branches", name),
            });
        };

        let currently = find(&merged, &name);
        if currently == winner {
            continue;
        }
        if currently.is_some() {
            merged = merged.drop_foreign_key(&name)?;
        }
        if let Some(fk) = winner {
            merged = merged.add_foreign_key(fk)?;
        }
    }
    Ok(merged)
}

/// Resolve a table's conflicts by choosing one side wholesale
pub fn resolve_conflicts(
    store: &Arc<dyn ChunkStore>,
    root: &RootValue,
    table_name: &str,
    take_ours: bool,
) -> Result<RootValue> {
    let table = root
        .get_table(store, table_name)?
        .ok_or_else(|| Error::Argument(format!("table not found: {}", table_name)))?;
    let Some(conflicts) = table.conflicts() else {
        return Err(Error::Argument(format!(
            "table '{}' has no conflicts to resolve",
            table_name
        )));
    };

    let resolved = if take_ours {
        // Ours is already materialized; drop the sidecar
        table.clear_conflicts()
    } else {
        let mut primary = table.primary().edit();
        for item in conflicts.rows.iter()? {
            let (key, bytes) = item?;
            let conflict = ConflictRow::decode(&bytes)?;
            match conflict.theirs {
                Some(value) => primary.put(key, value),
                None => primary.delete(key),
            }
        }
        let primary = primary.flush()?;
        let mut rebuilt = table.with_primary_map(primary).clear_conflicts();
        rebuilt.rebuild_indexes()?;
        rebuilt
    };
    info!(table = %table_name, ours = take_ours, "resolved conflicts");
    root.put_table(table_name, &resolved)
}

/// Build the root that undoes `target` on top of `head`: a three-way
/// merge with the reverted commit as base and its first parent as the
/// other side.
pub fn revert_root(
    store: &Arc<dyn ChunkStore>,
    head: Addr,
    target: Addr,
) -> Result<(RootValue, String)> {
    let head_commit = Commit::load(store, &head)?;
    let target_commit = Commit::load(store, &target)?;
    let undo_to = match target_commit.parents.first() {
        Some(parent) => Commit::load(store, parent)?.load_root(store)?,
        None => RootValue::new(),
    };
    let target_root = target_commit.load_root(store)?;
    let head_root = head_commit.load_root(store)?;

    let outcome = merge_roots(store, Some(&target_root), &head_root, &undo_to)?;
    if !outcome.is_clean() {
        return Err(Error::SchemaConflict {
            table: outcome
                .conflict_tables
                .first()
                .or(outcome.violation_tables.first())
                .cloned()
                .unwrap_or_default(),
            detail: "revert produced conflicts; revert manually".to_string(),
        });
    }
    let message = format!("Revert \"{}\"", target_commit.meta.message);
    Ok((outcome.root, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::commit::CommitMeta;
    use crate::schema::{Schema, SqlType};
    use crate::store::MemoryChunkStore;

    fn store() -> Arc<dyn ChunkStore> {
        Arc::new(MemoryChunkStore::new())
    }

    fn commit_root(store: &Arc<dyn ChunkStore>, parents: Vec<Addr>, root: &RootValue, ts: i64) -> Addr {
        let root_addr = root.save(store).unwrap();
        Commit {
            parents,
            root: root_addr,
            meta: CommitMeta::new("a", "a@x", ts, "commit"),
        }
        .save(store)
        .unwrap()
    }

    fn table_with(store: &Arc<dyn ChunkStore>, rows: &[(i64, i64)]) -> Table {
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
    fn test_fast_forward_and_noop() {
        let store = store();
        let root_a = RootValue::new().put_table("t", &table_with(&store, &[(0, 0)])).unwrap();
        let root_b = root_a
            .put_table("t", &table_with(&store, &[(0, 0), (1, 1)]))
            .unwrap();

        let c0 = commit_root(&store, vec![], &root_a, 100);
        let c1 = commit_root(&store, vec![c0], &root_b, 200);

        // base == ours: fast-forward to theirs
        let outcome = merge_commits(&store, c0, c1).unwrap();
        assert!(outcome.fast_forward);
        assert_eq!(outcome.root.hash(), root_b.hash());

        // base == theirs: no-op
        let outcome = merge_commits(&store, c1, c0).unwrap();
        assert!(outcome.up_to_date);
        assert_eq!(outcome.root.hash(), root_b.hash());
    }

    #[test]
    fn test_disjoint_tables_merge_order_independent() {
        let store = store();
        let base_root = RootValue::new();
        let left = base_root.put_table("left", &table_with(&store, &[(1, 1)])).unwrap();
        let right = base_root.put_table("right", &table_with(&store, &[(2, 2)])).unwrap();

        let ab = merge_roots(&store, Some(&base_root), &left, &right).unwrap();
        let ba = merge_roots(&store, Some(&base_root), &right, &left).unwrap();
        assert!(ab.is_clean());
        assert_eq!(ab.root.hash(), ba.root.hash());
        assert!(ab.root.has_table("left"));
        assert!(ab.root.has_table("right"));
    }

    #[test]
    fn test_conflict_then_resolve_theirs() {
        let store = store();
        let base = RootValue::new().put_table("t", &table_with(&store, &[(0, 0)])).unwrap();
        let ours = base.put_table("t", &table_with(&store, &[(0, 0), (1, 1)])).unwrap();
        let theirs = base.put_table("t", &table_with(&store, &[(0, 0), (1, 2)])).unwrap();

        let outcome = merge_roots(&store, Some(&base), &ours, &theirs).unwrap();
        assert_eq!(outcome.conflict_tables, vec!["t".to_string()]);

        // ours visible before resolution
        let table = outcome.root.get_table(&store, "t").unwrap().unwrap();
        assert_eq!(
            table.get_row(&[Value::Int(1)]).unwrap().unwrap()[1],
            Value::Int(1)
        );

        let resolved = resolve_conflicts(&store, &outcome.root, "t", false).unwrap();
        let table = resolved.get_table(&store, "t").unwrap().unwrap();
        assert!(!table.has_conflicts());
        assert_eq!(
            table.get_row(&[Value::Int(1)]).unwrap().unwrap()[1],
            Value::Int(2)
        );
    }

    #[test]
    fn test_resolve_ours_clears_sidecar() {
        let store = store();
        let base = RootValue::new().put_table("t", &table_with(&store, &[(0, 0)])).unwrap();
        let ours = base.put_table("t", &table_with(&store, &[(0, 0), (1, 1)])).unwrap();
        let theirs = base.put_table("t", &table_with(&store, &[(0, 0), (1, 2)])).unwrap();

        let outcome = merge_roots(&store, Some(&base), &ours, &theirs).unwrap();
        let resolved = resolve_conflicts(&store, &outcome.root, "t", true).unwrap();
        let table = resolved.get_table(&store, "t").unwrap().unwrap();
        assert!(!table.has_conflicts());
        assert_eq!(
            table.get_row(&[Value::Int(1)]).unwrap().unwrap()[1],
            Value::Int(1)
        );
    }

    #[test]
    fn test_table_drop_vs_modify_fatal() {
        let store = store();
        let base = RootValue::new().put_table("t", &table_with(&store, &[(0, 0)])).unwrap();
        let ours = base.remove_table("t").unwrap();
        let theirs = base.put_table("t", &table_with(&store, &[(0, 0), (1, 1)])).unwrap();

        let err = merge_roots(&store, Some(&base), &ours, &theirs).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_revert_root() {
        let store = store();
        let root0 = RootValue::new().put_table("t", &table_with(&store, &[(0, 0)])).unwrap();
        let root1 = root0.put_table("t", &table_with(&store, &[(0, 0), (1, 1)])).unwrap();

        let c0 = commit_root(&store, vec![], &root0, 100);
        let c1 = commit_root(&store, vec![c0], &root1, 200);

        let (reverted, message) = revert_root(&store, c1, c1).unwrap();
        assert!(message.starts_with("Revert"));
        let table = reverted.get_table(&store, "t").unwrap().unwrap();
        assert!(table.get_row(&[Value::Int(1)]).unwrap().is_none());
    }
}
