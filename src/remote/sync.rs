// src/remote/sync.rs

//! Push, fetch, and pull
//!
//! Push walks the local commit graph from the tip, probes the remote
//! for what it already holds, uploads only the absent closure, then
//! CASes the remote ref — so the receiver's ancestor-closure invariant
//! holds at every step. Fetch is the mirror image, feeding a typed
//! frontier of (address, kind) pairs so each downloaded chunk can be
//! parsed just enough to discover its children. Both directions are
//! idempotent: re-running after an interruption transfers only what is
//! still missing.

use super::walker::collect_commit_closure;
use super::{ChunkTransport, TRANSFER_BATCH};
use crate::codec::Value;
use crate::commit::{branch_ref, is_ancestor, remote_ref, tag_ref, Commit, RefStore, TagValue};
use crate::hash::Addr;
use crate::prolly::Node;
use crate::store::ChunkStore;
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct PushReport {
    pub chunks_uploaded: usize,
    pub remote_head: Addr,
    pub tags_pushed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub chunks_downloaded: usize,
    pub remote_head: Option<Addr>,
}

#[derive(Debug)]
pub struct PullReport {
    pub fetch: FetchReport,
    pub fast_forward: bool,
    pub up_to_date: bool,
    pub merge_commit: Option<Addr>,
    pub conflict_tables: Vec<String>,
}

fn check_cancel(cancel: Option<&AtomicBool>, what: &str) -> Result<()> {
    if let Some(flag) = cancel {
        if flag.load(Ordering::Relaxed) {
            return Err(Error::Cancelled(what.to_string()));
        }
    }
    Ok(())
}

/// Push `branch`'s local head to the remote
pub fn push(
    local: &RefStore,
    remote: &dyn ChunkTransport,
    remote_name: &str,
    branch: &str,
    force: bool,
    cancel: Option<&AtomicBool>,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<PushReport> {
    let store = local.store().clone();
    let tip = local.require(&branch_ref(branch))?;
    let remote_branch = branch_ref(branch);
    let remote_current = remote.get_ref(&remote_branch)?;

    if let Some(current) = remote_current {
        if current == tip {
            debug!(branch, "remote already at tip");
            return Ok(PushReport {
                chunks_uploaded: 0,
                remote_head: tip,
                tags_pushed: Vec::new(),
            });
        }
        if !force {
            // The remote's head must be an ancestor of what we publish
            let known_locally = store.has_many(&[current])?.absent.is_empty();
            if !known_locally || !is_ancestor(&store, current, tip)? {
                return Err(Error::AncestryRequired);
            }
        }
    }

    // Find which commits the remote lacks, stopping descent at ones it
    // holds (their closures are complete by the receiver invariant).
    let mut boundary = HashSet::new();
    let mut frontier = VecDeque::from([tip]);
    let mut visited = HashSet::from([tip]);
    while let Some(addr) = frontier.pop_front() {
        check_cancel(cancel, "push")?;
        if !remote.has(&[addr])?.absent.is_empty() {
            let commit = Commit::load(&store, &addr)?;
            for parent in commit.parents {
                if visited.insert(parent) {
                    frontier.push_back(parent);
                }
            }
        } else {
            boundary.insert(addr);
        }
    }

    let mut closure = HashSet::new();
    collect_commit_closure(&store, tip, &boundary, &mut closure)?;

    // Ship tag capsules whose commits ride along
    let mut tags_pushed = Vec::new();
    let mut tag_refs = Vec::new();
    for (tag_name, capsule_addr) in local.list("refs/tags/")? {
        let capsule = TagValue::load(&store, &capsule_addr)?;
        if is_ancestor(&store, capsule.commit, tip)? {
            closure.insert(capsule_addr);
            tag_refs.push((tag_name.clone(), capsule_addr));
            tags_pushed.push(tag_name);
        }
    }

    // Probe in batches, upload only the absent set
    let all: Vec<Addr> = closure.into_iter().collect();
    let mut absent = Vec::new();
    for batch in all.chunks(TRANSFER_BATCH) {
        check_cancel(cancel, "push")?;
        absent.extend(remote.has(batch)?.absent);
    }

    let total = absent.len();
    let mut uploaded = 0;
    for batch in absent.chunks(TRANSFER_BATCH) {
        check_cancel(cancel, "push")?;
        let mut payload = Vec::with_capacity(batch.len());
        for addr in batch {
            payload.push((*addr, store.get_required(addr)?));
        }
        remote.put_chunks(&payload)?;
        uploaded += batch.len();
        on_progress(uploaded, total);
    }

    remote.set_ref(&remote_branch, tip, remote_current, force)?;
    for (tag_name, capsule_addr) in tag_refs {
        // Tags replace freely; they are not ancestry-checked
        remote.set_ref(&tag_ref(&tag_name), capsule_addr, None, true)?;
    }

    // Record where we believe the remote now is
    local.set(&remote_ref(remote_name, branch), tip)?;
    info!(branch, uploaded, "pushed");
    Ok(PushReport {
        chunks_uploaded: uploaded,
        remote_head: tip,
        tags_pushed,
    })
}

/// What kind of chunk a frontier entry is, so it can be parsed for
/// children after download.
#[derive(Clone, Copy)]
enum ChunkKind {
    Commit,
    Root,
    Table,
    TreeNode,
    Capsule,
    Raw,
}

/// Download the closure of a remote chunk that the local store lacks,
/// starting from a typed root (a commit tip or a tag capsule).
fn download_closure(
    store: &Arc<dyn ChunkStore>,
    remote: &dyn ChunkTransport,
    start: (Addr, ChunkKind),
    cancel: Option<&AtomicBool>,
    on_progress: &mut impl FnMut(usize),
) -> Result<usize> {
    let mut downloaded = 0usize;
    let mut queued: HashSet<Addr> = HashSet::new();
    let mut frontier: VecDeque<(Addr, ChunkKind)> = VecDeque::new();
    frontier.push_back(start);
    queued.insert(start.0);

    while !frontier.is_empty() {
        check_cancel(cancel, "fetch")?;

        // Split the frontier into locally-present and absent
        let batch: Vec<(Addr, ChunkKind)> = frontier
            .drain(..frontier.len().min(TRANSFER_BATCH))
            .collect();
        let addrs: Vec<Addr> = batch.iter().map(|(a, _)| *a).collect();
        let probe = store.has_many(&addrs)?;
        let absent: HashSet<Addr> = probe.absent.iter().copied().collect();

        let fetched = if absent.is_empty() {
            Vec::new()
        } else {
            let wanted: Vec<Addr> = absent.iter().copied().collect();
            let chunks = remote.get_chunks(&wanted)?;
            if chunks.len() != wanted.len() {
                return Err(Error::Transport(format!(
                    "remote is missing {} chunks of the requested closure",
                    wanted.len() - chunks.len()
                )));
            }
            chunks
        };
        for (addr, bytes) in &fetched {
            if Addr::of(bytes) != *addr {
                return Err(Error::Integrity(format!(
                    "downloaded chunk does not hash to {}",
                    addr
                )));
            }
            store.put(bytes)?;
        }
        downloaded += fetched.len();
        on_progress(downloaded);

        // Parse each batch entry for children. Locally-present commits
        // still descend into parents so a divergent remote history is
        // fully connected; everything else local is already closed.
        for (addr, kind) in batch {
            let is_local = !absent.contains(&addr);
            match kind {
                ChunkKind::Commit => {
                    let commit = Commit::load(store, &addr)?;
                    if !is_local {
                        enqueue(&mut queued, &mut frontier, commit.root, ChunkKind::Root);
                    }
                    for parent in commit.parents {
                        enqueue(&mut queued, &mut frontier, parent, ChunkKind::Commit);
                    }
                }
                ChunkKind::Root if !is_local => {
                    let root = crate::commit::RootValue::load(store, &addr)?;
                    for name in root.table_names() {
                        if let Some(table_addr) = root.table_addr(&name) {
                            enqueue(&mut queued, &mut frontier, table_addr, ChunkKind::Table);
                        }
                    }
                }
                ChunkKind::Table if !is_local => {
                    let table = crate::table::Table::load(store.clone(), &addr)?;
                    enqueue(
                        &mut queued,
                        &mut frontier,
                        table.primary().root_addr(),
                        ChunkKind::TreeNode,
                    );
                    for def in table.schema().indexes() {
                        if let Some(index) = table.index(&def.name) {
                            enqueue(&mut queued, &mut frontier, index.root_addr(), ChunkKind::TreeNode);
                        }
                    }
                    if let Some(conflicts) = table.conflicts() {
                        enqueue(
                            &mut queued,
                            &mut frontier,
                            conflicts.rows.root_addr(),
                            ChunkKind::TreeNode,
                        );
                    }
                    if let Some(violations) = table.violations() {
                        enqueue(&mut queued, &mut frontier, violations.root_addr(), ChunkKind::TreeNode);
                    }
                }
                ChunkKind::TreeNode if !is_local => {
                    let node = Node::load(store.as_ref(), &addr)?;
                    if node.is_leaf() {
                        for value in &node.values {
                            if let Ok(Value::Tuple(fields)) = Value::from_bytes(value) {
                                let mut blobs = Vec::new();
                                collect_blob_addrs(&fields, &mut blobs);
                                for child in blobs {
                                    enqueue(&mut queued, &mut frontier, child, ChunkKind::Raw);
                                }
                            }
                        }
                    } else {
                        for idx in 0..node.len() {
                            let (child, _) = node.child_ref(idx)?;
                            enqueue(&mut queued, &mut frontier, child, ChunkKind::TreeNode);
                        }
                    }
                }
                ChunkKind::Capsule if !is_local => {
                    let capsule = TagValue::load(store, &addr)?;
                    enqueue(&mut queued, &mut frontier, capsule.commit, ChunkKind::Commit);
                }
                _ => {}
            }
        }
    }
    store.flush()?;
    Ok(downloaded)
}

fn enqueue(
    queued: &mut HashSet<Addr>,
    frontier: &mut VecDeque<(Addr, ChunkKind)>,
    child: Addr,
    kind: ChunkKind,
) {
    if !child.is_empty() && queued.insert(child) {
        frontier.push_back((child, kind));
    }
}

fn collect_blob_addrs(fields: &[Value], out: &mut Vec<Addr>) {
    for field in fields {
        match field {
            Value::Blob(blob) => out.extend(blob.chunks.iter().copied()),
            Value::Tuple(inner) => collect_blob_addrs(inner, out),
            _ => {}
        }
    }
}

/// Fetch `branch` from the remote, updating the remote-tracking ref
pub fn fetch(
    local: &RefStore,
    remote: &dyn ChunkTransport,
    remote_name: &str,
    branch: &str,
    cancel: Option<&AtomicBool>,
    mut on_progress: impl FnMut(usize),
) -> Result<FetchReport> {
    let store = local.store().clone();
    let Some(remote_tip) = remote.get_ref(&branch_ref(branch))? else {
        return Err(Error::RemoteNotFound(format!(
            "{}/{}",
            remote_name, branch
        )));
    };

    let downloaded = download_closure(
        &store,
        remote,
        (remote_tip, ChunkKind::Commit),
        cancel,
        &mut on_progress,
    )?;
    local.set(&remote_ref(remote_name, branch), remote_tip)?;
    info!(remote = remote_name, branch, downloaded, "fetched");
    Ok(FetchReport {
        chunks_downloaded: downloaded,
        remote_head: Some(remote_tip),
    })
}

/// Fetch every branch and tag the remote advertises
pub fn fetch_all(
    local: &RefStore,
    remote: &dyn ChunkTransport,
    remote_name: &str,
    cancel: Option<&AtomicBool>,
    mut on_progress: impl FnMut(usize),
) -> Result<FetchReport> {
    let store = local.store().clone();
    let mut report = FetchReport::default();
    for (full_name, addr) in remote.list_refs()? {
        if let Some(branch) = full_name.strip_prefix("refs/heads/") {
            report.chunks_downloaded += download_closure(
                &store,
                remote,
                (addr, ChunkKind::Commit),
                cancel,
                &mut on_progress,
            )?;
            local.set(&remote_ref(remote_name, branch), addr)?;
            report.remote_head = Some(addr);
        } else if full_name.starts_with("refs/tags/") {
            report.chunks_downloaded += download_closure(
                &store,
                remote,
                (addr, ChunkKind::Capsule),
                cancel,
                &mut on_progress,
            )?;
            local.set(&full_name, addr)?;
        }
    }
    store.flush()?;
    Ok(report)
}

/// Fetch then fast-forward-or-merge into the local branch
#[allow(clippy::too_many_arguments)]
pub fn pull(
    ops: &crate::workingset::BranchOps,
    remote: &dyn ChunkTransport,
    remote_name: &str,
    branch: &str,
    meta: crate::commit::CommitMeta,
    no_commit: bool,
    cancel: Option<&AtomicBool>,
    on_progress: impl FnMut(usize),
) -> Result<PullReport> {
    let fetch_report = fetch(ops.refs(), remote, remote_name, branch, cancel, on_progress)?;
    let remote_tip = fetch_report
        .remote_head
        .ok_or_else(|| Error::RemoteNotFound(format!("{}/{}", remote_name, branch)))?;

    let message = format!("Merge branch '{}' of {} into {}", branch, remote_name, branch);
    let (outcome, committed) = ops.merge(branch, remote_tip, &message, meta, no_commit)?;
    Ok(PullReport {
        fetch: fetch_report,
        fast_forward: outcome.fast_forward,
        up_to_date: outcome.up_to_date,
        merge_commit: committed,
        conflict_tables: outcome.conflict_tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::commit::CommitMeta;
    use crate::remote::FileRemote;
    use crate::schema::{Schema, SqlType};
    use crate::table::Table;
    use crate::workingset::tests_support::setup_ops;
    use crate::workingset::BranchOps;
    use tempfile::TempDir;

    fn add_commit(ops: &BranchOps, pk: i64, msg: &str) -> Addr {
        let store = ops.refs().store().clone();
        let working = ops.working_root("main").unwrap();
        let table = match working.get_table(&store, "t").unwrap() {
            Some(table) => table,
            None => {
                let schema = Schema::builder("t")
                    .column("pk", SqlType::Int, false)
                    .column("v", SqlType::Int, true)
                    .primary_key(&["pk"])
                    .build()
                    .unwrap();
                Table::new(store.clone(), schema)
            }
        };
        let mut editor = table.editor();
        editor
            .insert_row(vec![Value::Int(pk), Value::Int(pk)])
            .unwrap();
        let working = working.put_table("t", &editor.flush().unwrap()).unwrap();
        ops.set_working_root("main", &working).unwrap();
        ops.stage("main", None).unwrap();
        ops.commit(
            "main",
            CommitMeta::new("alice", "alice@example.com", 1_700_000_000 + pk, msg),
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_push_then_fetch_roundtrip() {
        let ops = setup_ops();
        let tip = add_commit(&ops, 1, "one");

        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();
        let report = push(ops.refs(), &remote, "origin", "main", false, None, |_, _| {}).unwrap();
        assert!(report.chunks_uploaded > 0);
        assert_eq!(report.remote_head, tip);
        assert_eq!(
            remote.get_ref("refs/heads/main").unwrap().unwrap(),
            tip
        );

        // A second push is a no-op
        let report = push(ops.refs(), &remote, "origin", "main", false, None, |_, _| {}).unwrap();
        assert_eq!(report.chunks_uploaded, 0);

        // A fresh database can fetch the whole closure
        let other = setup_ops();
        let report = fetch(other.refs(), &remote, "origin", "main", None, |_| {}).unwrap();
        assert!(report.chunks_downloaded > 0);
        assert_eq!(
            other
                .refs()
                .get(&remote_ref("origin", "main"))
                .unwrap()
                .unwrap(),
            tip
        );
        // And the fetched commit resolves completely
        let store = other.refs().store().clone();
        let commit = Commit::load(&store, &tip).unwrap();
        let root = commit.load_root(&store).unwrap();
        let table = root.get_table(&store, "t").unwrap().unwrap();
        assert_eq!(table.entry_count(), 1);
    }

    #[test]
    fn test_push_rejected_for_non_ancestor() {
        let ops_a = setup_ops();
        let ops_b = setup_ops();
        add_commit(&ops_a, 1, "a1");
        add_commit(&ops_b, 2, "b1");

        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();
        push(ops_a.refs(), &remote, "origin", "main", false, None, |_, _| {}).unwrap();

        // B's history does not contain the remote head
        let err = push(ops_b.refs(), &remote, "origin", "main", false, None, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::AncestryRequired));
        assert_eq!(
            err.to_string(),
            "Updates were rejected because the tip of your current branch is behind"
        );

        // Force wins and the remote ref advances
        let tip_b = ops_b.refs().require(&branch_ref("main")).unwrap();
        push(ops_b.refs(), &remote, "origin", "main", true, None, |_, _| {}).unwrap();
        assert_eq!(remote.get_ref("refs/heads/main").unwrap().unwrap(), tip_b);
    }

    #[test]
    fn test_pull_fast_forward() {
        let ops_a = setup_ops();
        add_commit(&ops_a, 1, "one");
        let tip = add_commit(&ops_a, 2, "two");

        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();
        push(ops_a.refs(), &remote, "origin", "main", false, None, |_, _| {}).unwrap();

        // ops_b shares the initial commit because setup is deterministic
        let ops_b = setup_ops();
        let report = pull(
            &ops_b,
            &remote,
            "origin",
            "main",
            CommitMeta::new("bob", "bob@example.com", 1_800_000_000, "pull"),
            false,
            None,
            |_| {},
        )
        .unwrap();
        assert!(report.fast_forward);
        assert_eq!(ops_b.branch_head("main").unwrap(), tip);
    }

    #[test]
    fn test_push_cancellation() {
        let ops = setup_ops();
        add_commit(&ops, 1, "one");
        let dir = TempDir::new().unwrap();
        let remote = FileRemote::open(dir.path()).unwrap();
        let cancel = AtomicBool::new(true);
        let err = push(ops.refs(), &remote, "origin", "main", false, Some(&cancel), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
