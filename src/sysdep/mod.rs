// src/sysdep/mod.rs

//! Relation-shaped read surface for the SQL engine
//!
//! The engine consumes version-control state through system tables:
//! `dolt_status`, `dolt_log`, `dolt_branches`, per-table views like
//! `dolt_diff_<t>` and `dolt_conflicts_<t>`, and so on. Each resolves
//! here to a [`Relation`] — column names plus value rows. Name matching
//! is case-insensitive throughout.

use crate::codec::Value;
use crate::commit::{history, Commit, TagValue};
use crate::hash::Addr;
use crate::prolly::diff_entries;
use crate::repo::Repository;
use crate::table::{row, ConflictRow, Table, Violation};
use crate::workingset::TableChange;
use crate::{Error, Result};
use chrono::{TimeZone, Utc};

/// A column-named result set
#[derive(Debug, Clone, Default)]
pub struct Relation {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Relation {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }
}

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

fn hash_text(addr: &Addr) -> Value {
    text(addr.to_hex())
}

fn date_text(timestamp: i64) -> Value {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        _ => text(timestamp.to_string()),
    }
}

/// Resolve a system table by (case-insensitive) name
pub fn system_table(repo: &Repository, name: &str) -> Result<Relation> {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "dolt_status" => status(repo),
        "dolt_log" | "dolt_commits" => log(repo, None),
        "dolt_commit_ancestors" => commit_ancestors(repo),
        "dolt_branches" => branches(repo),
        "dolt_remotes" => remotes(repo),
        "dolt_remote_branches" => remote_branches(repo),
        "dolt_tags" => tags(repo),
        "dolt_conflicts" => conflicts_summary(repo),
        "dolt_constraint_violations" => violations_summary(repo),
        _ => {
            if let Some(table) = lower.strip_prefix("dolt_commit_diff_") {
                return Err(Error::Argument(format!(
                    "dolt_commit_diff_{} requires from_commit and to_commit filters",
                    table
                )));
            }
            if let Some(table) = lower.strip_prefix("dolt_diff_") {
                return working_diff(repo, table);
            }
            if let Some(table) = lower.strip_prefix("dolt_conflicts_") {
                return table_conflicts(repo, table);
            }
            if let Some(table) = lower.strip_prefix("dolt_constraint_violations_") {
                return table_violations(repo, table);
            }
            if let Some(table) = lower.strip_prefix("dolt_workspace_") {
                return workspace(repo, table);
            }
            if let Some(table) = lower.strip_prefix("dolt_history_") {
                return table_history(repo, table);
            }
            if let Some(table) = lower.strip_prefix("dolt_blame_") {
                return blame(repo, table);
            }
            Err(Error::Argument(format!("unknown system table: {}", name)))
        }
    }
}

pub fn status(repo: &Repository) -> Result<Relation> {
    let status = repo.ops().status(repo.current_branch())?;
    let mut out = Relation::new(&["table_name", "staged", "status"]);
    for (table, change) in &status.staged {
        out.push(vec![text(table), Value::Bool(true), text(change.label())]);
    }
    for (table, change) in &status.unstaged {
        out.push(vec![text(table), Value::Bool(false), text(change.label())]);
    }
    for table in &status.conflicted {
        out.push(vec![text(table), Value::Bool(false), text("conflict")]);
    }
    Ok(out)
}

pub fn log(repo: &Repository, limit: Option<usize>) -> Result<Relation> {
    let head = repo.ops().branch_head(repo.current_branch())?;
    let mut out = Relation::new(&["commit_hash", "committer", "email", "date", "message"]);
    for (addr, commit) in history(repo.store(), head, limit)? {
        out.push(vec![
            hash_text(&addr),
            text(&commit.meta.name),
            text(&commit.meta.email),
            date_text(commit.meta.timestamp),
            text(&commit.meta.message),
        ]);
    }
    Ok(out)
}

fn commit_ancestors(repo: &Repository) -> Result<Relation> {
    let head = repo.ops().branch_head(repo.current_branch())?;
    let mut out = Relation::new(&["commit_hash", "parent_hash", "parent_index"]);
    for (addr, commit) in history(repo.store(), head, None)? {
        for (index, parent) in commit.parents.iter().enumerate() {
            out.push(vec![
                hash_text(&addr),
                hash_text(parent),
                Value::Int(index as i64),
            ]);
        }
    }
    Ok(out)
}

pub fn branches(repo: &Repository) -> Result<Relation> {
    let mut out = Relation::new(&[
        "name",
        "hash",
        "latest_committer",
        "latest_commit_date",
        "latest_commit_message",
    ]);
    for (name, addr) in repo.ops().branches()? {
        let commit = Commit::load(repo.store(), &addr)?;
        out.push(vec![
            text(&name),
            hash_text(&addr),
            text(&commit.meta.name),
            date_text(commit.meta.timestamp),
            text(&commit.meta.message),
        ]);
    }
    Ok(out)
}

fn remotes(repo: &Repository) -> Result<Relation> {
    let mut out = Relation::new(&["name", "url"]);
    for (name, url) in repo.config().remotes() {
        out.push(vec![text(name), text(url)]);
    }
    Ok(out)
}

fn remote_branches(repo: &Repository) -> Result<Relation> {
    let mut out = Relation::new(&["name", "hash"]);
    for (name, addr) in repo.refs().list("refs/remotes/")? {
        out.push(vec![text(name), hash_text(&addr)]);
    }
    Ok(out)
}

pub fn tags(repo: &Repository) -> Result<Relation> {
    let mut out = Relation::new(&["tag_name", "tag_hash", "tagger", "date", "message"]);
    for (name, capsule_addr) in repo.refs().list("refs/tags/")? {
        let capsule = TagValue::load(repo.store(), &capsule_addr)?;
        out.push(vec![
            text(&name),
            hash_text(&capsule.commit),
            text(&capsule.meta.name),
            date_text(capsule.meta.timestamp),
            text(&capsule.meta.message),
        ]);
    }
    Ok(out)
}

fn conflicts_summary(repo: &Repository) -> Result<Relation> {
    let root = repo.working_root()?;
    let mut out = Relation::new(&["table", "num_conflicts"]);
    for name in root.table_names() {
        if let Some(table) = root.get_table(repo.store(), &name)? {
            if let Some(conflicts) = table.conflicts() {
                if !conflicts.is_empty() {
                    out.push(vec![text(&name), Value::Uint(conflicts.count())]);
                }
            }
        }
    }
    Ok(out)
}

fn violations_summary(repo: &Repository) -> Result<Relation> {
    let root = repo.working_root()?;
    let mut out = Relation::new(&["table", "num_violations"]);
    for name in root.table_names() {
        if let Some(table) = root.get_table(repo.store(), &name)? {
            if let Some(violations) = table.violations() {
                if !violations.is_empty() {
                    out.push(vec![text(&name), Value::Uint(violations.count())]);
                }
            }
        }
    }
    Ok(out)
}

fn require_table(repo: &Repository, root: &crate::commit::RootValue, name: &str) -> Result<Table> {
    root.get_table(repo.store(), name)?
        .ok_or_else(|| Error::Argument(format!("table not found: {}", name)))
}

fn table_conflicts(repo: &Repository, table_name: &str) -> Result<Relation> {
    let root = repo.working_root()?;
    let table = require_table(repo, &root, table_name)?;
    let Some(conflicts) = table.conflicts() else {
        return Ok(conflict_relation_for(&table));
    };

    let mut out = conflict_relation_for(&table);
    let schema = &conflicts.our_schema;
    for item in conflicts.rows.iter()? {
        let (key, bytes) = item?;
        let conflict = ConflictRow::decode(&bytes)?;
        let mut out_row = Vec::new();
        for side in [&conflict.base, &conflict.ours, &conflict.theirs] {
            match side {
                Some(value) => out_row.extend(row::decode_row(schema, &key, value)?),
                None => out_row.extend(vec![Value::Null; schema.columns().len()]),
            }
        }
        out.push(out_row);
    }
    Ok(out)
}

fn conflict_relation_for(table: &Table) -> Relation {
    let schema = table
        .conflicts()
        .map(|c| c.our_schema.clone())
        .unwrap_or_else(|| table.schema().clone());
    let mut columns = Vec::new();
    for prefix in ["base_", "our_", "their_"] {
        for col in schema.columns() {
            columns.push(format!("{}{}", prefix, col.name));
        }
    }
    Relation {
        columns,
        rows: Vec::new(),
    }
}

fn table_violations(repo: &Repository, table_name: &str) -> Result<Relation> {
    let root = repo.working_root()?;
    let table = require_table(repo, &root, table_name)?;
    let schema = table.schema();

    let mut columns = vec!["violation_type".to_string()];
    columns.extend(schema.columns().iter().map(|c| c.name.clone()));
    columns.push("violation_info".to_string());
    let mut out = Relation {
        columns,
        rows: Vec::new(),
    };

    let Some(violations) = table.violations() else {
        return Ok(out);
    };
    for item in violations.iter()? {
        let (map_key, bytes) = item?;
        let violation = Violation::decode(&map_key, &bytes)?;
        let mut out_row = vec![text(violation.vtype.name())];
        out_row.extend(row::decode_row(schema, &violation.row_key, &violation.row_value)?);
        out_row.push(Value::Json(violation.info.clone()));
        out.push(out_row);
    }
    Ok(out)
}

/// Rows of `dolt_diff_<t>`: WORKING against HEAD
fn working_diff(repo: &Repository, table_name: &str) -> Result<Relation> {
    let head_root = repo.ops().head_root(repo.current_branch())?;
    let working_root = repo.working_root()?;
    diff_relation(repo, &head_root, &working_root, table_name)
}

/// Rows of `dolt_commit_diff_<t>` for an explicit commit pair
pub fn commit_diff(
    repo: &Repository,
    table_name: &str,
    from_rev: &str,
    to_rev: &str,
) -> Result<Relation> {
    let store = repo.store();
    let from = Commit::load(store, &repo.resolve_commit(from_rev)?)?.load_root(store)?;
    let to = Commit::load(store, &repo.resolve_commit(to_rev)?)?.load_root(store)?;
    diff_relation(repo, &from, &to, table_name)
}

fn diff_relation(
    repo: &Repository,
    from_root: &crate::commit::RootValue,
    to_root: &crate::commit::RootValue,
    table_name: &str,
) -> Result<Relation> {
    let from_table = from_root.get_table(repo.store(), table_name)?;
    let to_table = to_root.get_table(repo.store(), table_name)?;
    let schema = match (&to_table, &from_table) {
        (Some(t), _) | (None, Some(t)) => t.schema().clone(),
        (None, None) => {
            return Err(Error::Argument(format!("table not found: {}", table_name)))
        }
    };

    let mut columns = Vec::new();
    for col in schema.columns() {
        columns.push(format!("to_{}", col.name));
    }
    for col in schema.columns() {
        columns.push(format!("from_{}", col.name));
    }
    columns.push("diff_type".to_string());
    let mut out = Relation {
        columns,
        rows: Vec::new(),
    };

    let store = repo.store().clone();
    let empty = Table::new(store, schema.clone());
    let from_aligned = match &from_table {
        Some(t) => t.reproject(schema.clone())?,
        None => empty.clone(),
    };
    let to_aligned = match &to_table {
        Some(t) => t.reproject(schema.clone())?,
        None => empty,
    };

    for entry in diff_entries(from_aligned.primary(), to_aligned.primary())? {
        let mut out_row = Vec::new();
        match &entry.to {
            Some(value) => out_row.extend(row::decode_row(&schema, &entry.key, value)?),
            None => out_row.extend(vec![Value::Null; schema.columns().len()]),
        }
        match &entry.from {
            Some(value) => out_row.extend(row::decode_row(&schema, &entry.key, value)?),
            None => out_row.extend(vec![Value::Null; schema.columns().len()]),
        }
        let diff_type = match (&entry.from, &entry.to) {
            (None, Some(_)) => "added",
            (Some(_), None) => "removed",
            _ => "modified",
        };
        out_row.push(text(diff_type));
        out.push(out_row);
    }
    Ok(out)
}

/// Rows of `dolt_workspace_<t>`: working changes with a staged marker
fn workspace(repo: &Repository, table_name: &str) -> Result<Relation> {
    let branch = repo.current_branch();
    let staged_changes = repo.ops().status(branch)?.staged;
    let staged = staged_changes
        .iter()
        .any(|(name, change)| name.eq_ignore_ascii_case(table_name) && *change != TableChange::Dropped);

    let mut diff = working_diff(repo, table_name)?;
    let mut columns = vec!["id".to_string(), "staged".to_string()];
    columns.append(&mut diff.columns);
    let mut out = Relation {
        columns,
        rows: Vec::new(),
    };
    for (id, mut diff_row) in diff.rows.into_iter().enumerate() {
        let mut out_row = vec![Value::Int(id as i64), Value::Bool(staged)];
        out_row.append(&mut diff_row);
        out.push(out_row);
    }
    Ok(out)
}

/// Rows of `dolt_history_<t>`: the table's rows at every commit
fn table_history(repo: &Repository, table_name: &str) -> Result<Relation> {
    let head = repo.ops().branch_head(repo.current_branch())?;
    let commits = history(repo.store(), head, None)?;

    let mut out: Option<Relation> = None;
    for (addr, commit) in commits {
        let root = commit.load_root(repo.store())?;
        let Some(table) = root.get_table(repo.store(), table_name)? else {
            continue;
        };
        let schema = table.schema().clone();
        let relation = out.get_or_insert_with(|| {
            let mut columns: Vec<String> =
                schema.columns().iter().map(|c| c.name.clone()).collect();
            columns.extend(
                ["commit_hash", "committer", "commit_date"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            Relation {
                columns,
                rows: Vec::new(),
            }
        });
        let width = relation.columns.len() - 3;
        for full_row in table.scan()? {
            let mut out_row: Vec<Value> = full_row.into_iter().take(width).collect();
            out_row.resize(width, Value::Null);
            out_row.push(hash_text(&addr));
            out_row.push(text(&commit.meta.name));
            out_row.push(date_text(commit.meta.timestamp));
            relation.push(out_row);
        }
    }
    out.ok_or_else(|| Error::Argument(format!("table not found: {}", table_name)))
}

/// Rows of `dolt_blame_<t>`: the newest commit touching each live row
fn blame(repo: &Repository, table_name: &str) -> Result<Relation> {
    let head = repo.ops().branch_head(repo.current_branch())?;
    let store = repo.store();
    let head_commit = Commit::load(store, &head)?;
    let head_root = head_commit.load_root(store)?;
    let table = require_table(repo, &head_root, table_name)?;
    if table.schema().is_keyless() {
        return Err(Error::Unsupported(format!(
            "dolt_blame_{} requires a primary key",
            table_name
        )));
    }
    let schema = table.schema().clone();

    let mut columns: Vec<String> = schema
        .pk_tags()
        .iter()
        .filter_map(|tag| schema.column_by_tag(*tag))
        .map(|c| c.name.clone())
        .collect();
    columns.extend(
        ["commit_hash", "committer", "message", "commit_date"]
            .iter()
            .map(|s| s.to_string()),
    );
    let mut out = Relation {
        columns,
        rows: Vec::new(),
    };

    // Newest-first: the first commit whose diff against its first
    // parent touches a key is that key's blame.
    let mut unattributed: std::collections::HashSet<Vec<u8>> = table
        .primary()
        .iter()?
        .map(|item| item.map(|(k, _)| k))
        .collect::<Result<_>>()?;

    for (addr, commit) in history(store, head, None)? {
        if unattributed.is_empty() {
            break;
        }
        let this_root = commit.load_root(store)?;
        let Some(this_table) = this_root.get_table(store, table_name)? else {
            continue;
        };
        let parent_table = match commit.parents.first() {
            Some(parent) => Commit::load(store, parent)?
                .load_root(store)?
                .get_table(store, table_name)?,
            None => None,
        };
        let this_aligned = this_table.reproject(schema.clone())?;
        let parent_aligned = match parent_table {
            Some(t) => t.reproject(schema.clone())?,
            None => Table::new(store.clone(), schema.clone()),
        };
        for entry in diff_entries(parent_aligned.primary(), this_aligned.primary())? {
            if !unattributed.remove(&entry.key) {
                continue;
            }
            let key_fields = row::decode_tuple(&entry.key)?;
            let mut out_row: Vec<Value> = key_fields;
            out_row.push(hash_text(&addr));
            out_row.push(text(&commit.meta.name));
            out_row.push(text(&commit.meta.message));
            out_row.push(date_text(commit.meta.timestamp));
            out.push(out_row);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_shape() {
        let mut rel = Relation::new(&["a", "b"]);
        rel.push(vec![Value::Int(1), text("x")]);
        assert_eq!(rel.columns, vec!["a", "b"]);
        assert_eq!(rel.rows.len(), 1);
    }

    #[test]
    fn test_date_text() {
        assert_eq!(
            date_text(0),
            Value::Text("1970-01-01 00:00:00".to_string())
        );
    }
}
