// tests/remote_sync.rs

//! Push, fetch, and pull between repositories over a file remote

mod common;

use common::*;
use dolt::codec::Value;
use dolt::procedures::call_procedure;
use dolt::remote::ChunkTransport;
use dolt::sysdep::system_table;
use dolt::Error;
use tempfile::TempDir;

fn call(repo: &mut dolt::Repository, name: &str, args: &[&str]) -> dolt::Result<dolt::Relation> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    call_procedure(repo, name, &args)
}

fn remote_path(dir: &TempDir) -> String {
    dir.path().join("bare-remote").to_string_lossy().to_string()
}

/// Seed scenario: a push whose remote ref is not an ancestor is
/// rejected with the ancestry message; --force succeeds and advances
/// the remote ref.
#[test]
fn test_push_rejection_and_force() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    let url = remote_path(&remote_dir);

    // Repo A publishes first
    let mut repo_a = init_repo(&dir_a);
    create_table_t(&repo_a);
    insert_t(&repo_a, 1, 1);
    commit_all(&mut repo_a, "a1");
    call(&mut repo_a, "dolt_push", &["--set-upstream", "origin"]).unwrap_err();
    // The remote must exist in config first
    repo_a.config_mut().set_remote("origin", &url).unwrap();
    call(&mut repo_a, "dolt_push", &["--set-upstream", "origin"]).unwrap();

    // Repo B has an unrelated history targeting the same remote
    let mut repo_b = init_repo(&dir_b);
    create_table_t(&repo_b);
    insert_t(&repo_b, 9, 9);
    commit_all(&mut repo_b, "b1");
    repo_b.config_mut().set_remote("origin", &url).unwrap();

    let err = call(&mut repo_b, "dolt_push", &["origin"]).unwrap_err();
    assert!(matches!(err, Error::AncestryRequired));
    assert_eq!(
        err.to_string(),
        "Updates were rejected because the tip of your current branch is behind"
    );

    // Forced push replaces the remote head
    call(&mut repo_b, "dolt_push", &["--force", "origin"]).unwrap();
    let b_head = repo_b.ops().branch_head("main").unwrap();
    let remote = dolt::remote::open_remote(&url).unwrap();
    assert_eq!(
        remote.get_ref("refs/heads/main").unwrap().unwrap(),
        b_head
    );
}

/// Copy a repository directory, the moral equivalent of a clone
fn copy_dir(from: &std::path::Path, to: &std::path::Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// A cloned repository fetches new history, sees the remote branch,
/// and pulls it into its own main as a fast-forward.
#[test]
fn test_fetch_and_pull_fast_forward() {
    let dir_a = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    let url = remote_path(&remote_dir);

    let mut repo_a = init_repo(&dir_a);
    create_table_t(&repo_a);
    insert_t(&repo_a, 1, 10);
    commit_all(&mut repo_a, "first");
    repo_a.config_mut().set_remote("origin", &url).unwrap();
    call(&mut repo_a, "dolt_push", &["origin", "main"]).unwrap();

    // Clone A by copying its directory, then advance A past the clone
    let dir_b = TempDir::new().unwrap();
    copy_dir(dir_a.path(), dir_b.path());
    insert_t(&repo_a, 2, 20);
    let tip = commit_all(&mut repo_a, "second");
    call(&mut repo_a, "dolt_push", &["origin", "main"]).unwrap();

    let mut repo_b = reopen_repo(&dir_b);
    call(&mut repo_b, "dolt_fetch", &["origin"]).unwrap();
    // The remote-tracking ref is queryable without touching main
    let remote_branches = system_table(&repo_b, "dolt_remote_branches").unwrap();
    assert_eq!(remote_branches.rows.len(), 1);
    assert_eq!(
        remote_branches.rows[0][0],
        Value::Text("origin/main".to_string())
    );
    assert_eq!(remote_branches.rows[0][1], Value::Text(tip.to_hex()));

    let result = call(&mut repo_b, "dolt_pull", &["origin", "main"]).unwrap();
    assert_eq!(result.rows[0][0], Value::Bool(true), "fast-forward");
    assert_eq!(repo_b.ops().branch_head("main").unwrap(), tip);
    assert_eq!(select_t(&repo_b), vec![(1, 10), (2, 20)]);
}

/// Tags reachable from the pushed commit ship with it
#[test]
fn test_push_ships_reachable_tags() {
    let dir = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    let url = remote_path(&remote_dir);

    let mut repo = init_repo(&dir);
    create_table_t(&repo);
    insert_t(&repo, 1, 1);
    commit_all(&mut repo, "tagged work");
    call(&mut repo, "dolt_tag", &["-m", "first release", "v1"]).unwrap();

    repo.config_mut().set_remote("origin", &url).unwrap();
    call(&mut repo, "dolt_push", &["origin", "main"]).unwrap();

    let remote = dolt::remote::open_remote(&url).unwrap();
    let refs = remote.list_refs().unwrap();
    assert!(refs.iter().any(|(name, _)| name == "refs/tags/v1"));
}

/// Interrupted-then-retried pushes are cheap: the second round uploads
/// nothing that already arrived.
#[test]
fn test_push_resumes_without_duplicate_cost() {
    let dir = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    let url = remote_path(&remote_dir);

    let mut repo = init_repo(&dir);
    create_table_t(&repo);
    for pk in 0..50 {
        insert_t(&repo, pk, pk);
    }
    commit_all(&mut repo, "bulk");
    repo.config_mut().set_remote("origin", &url).unwrap();

    let first = call(&mut repo, "dolt_push", &["origin", "main"]).unwrap();
    let message = match &first.rows[0][1] {
        Value::Text(s) => s.clone(),
        _ => String::new(),
    };
    assert!(message.contains("chunks"));

    // New commit on top: only the delta travels
    insert_t(&repo, 100, 100);
    commit_all(&mut repo, "delta");
    call(&mut repo, "dolt_push", &["origin", "main"]).unwrap();

    let remote = dolt::remote::open_remote(&url).unwrap();
    let tip = repo.ops().branch_head("main").unwrap();
    assert_eq!(remote.get_ref("refs/heads/main").unwrap().unwrap(), tip);
}

/// Pulling into a branch with conflicting uncommitted changes is
/// refused before any merge happens.
#[test]
fn test_pull_refused_on_dirty_working_set() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    let url = remote_path(&remote_dir);

    let mut repo_a = init_repo(&dir_a);
    create_table_t(&repo_a);
    insert_t(&repo_a, 1, 1);
    commit_all(&mut repo_a, "remote work");
    repo_a.config_mut().set_remote("origin", &url).unwrap();
    call(&mut repo_a, "dolt_push", &["origin", "main"]).unwrap();

    let mut repo_b = init_repo(&dir_b);
    repo_b.config_mut().set_remote("origin", &url).unwrap();
    create_table_t(&repo_b);
    insert_t(&repo_b, 5, 5);
    // Working set dirty; pull must refuse
    let err = call(&mut repo_b, "dolt_pull", &["origin", "main"]).unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
}
