// tests/workflow.rs

//! End-to-end branch, merge, and conflict workflows
//!
//! These walk the same sequences a user would run through the CLI:
//! create tables, branch, edit both sides, merge, and inspect or
//! resolve the result.

mod common;

use common::*;
use dolt::codec::Value;
use dolt::procedures::call_procedure;
use dolt::schema::SqlType;
use dolt::sysdep::system_table;
use dolt::Error;
use tempfile::TempDir;

fn call(repo: &mut dolt::Repository, name: &str, args: &[&str]) -> dolt::Result<dolt::Relation> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    call_procedure(repo, name, &args)
}

/// Seed scenario: the same primary key inserted with different values
/// on two branches.
#[test]
fn test_duplicate_pk_across_branches() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    insert_t(&repo, 0, 0);
    commit_all(&mut repo, "base");

    call(&mut repo, "dolt_branch", &["other"]).unwrap();

    // ours: INSERT INTO t VALUES (1,1)
    insert_t(&repo, 1, 1);
    commit_all(&mut repo, "ours");

    // theirs: INSERT INTO t VALUES (1,2)
    call(&mut repo, "dolt_checkout", &["other"]).unwrap();
    insert_t(&repo, 1, 2);
    commit_all(&mut repo, "theirs");

    call(&mut repo, "dolt_checkout", &["main"]).unwrap();
    let result = call(&mut repo, "dolt_merge", &["other"]).unwrap();
    assert_eq!(result.rows[0][2], Value::Int(1), "one conflicted table");

    // ours is visible in SELECT * FROM t
    assert_eq!(select_t(&repo), vec![(0, 0), (1, 1)]);

    // dolt_conflicts_t holds base absent, ours=(1,1), theirs=(1,2)
    let conflicts = system_table(&repo, "dolt_conflicts_t").unwrap();
    assert_eq!(conflicts.rows.len(), 1);
    let row = &conflicts.rows[0];
    let col = |name: &str| -> &Value {
        let idx = conflicts
            .columns
            .iter()
            .position(|c| c == name)
            .unwrap_or_else(|| panic!("missing column {}", name));
        &row[idx]
    };
    assert_eq!(*col("base_pk"), Value::Null);
    assert_eq!(*col("our_pk"), Value::Int(1));
    assert_eq!(*col("our_v"), Value::Int(1));
    assert_eq!(*col("their_pk"), Value::Int(1));
    assert_eq!(*col("their_v"), Value::Int(2));

    // The commit is blocked while the conflict stands
    let err = call(&mut repo, "dolt_commit", &["-m", "should fail"]).unwrap_err();
    assert!(matches!(err, Error::Unmerged));

    // Resolving --theirs takes (1,2) and unblocks
    call(&mut repo, "dolt_conflicts_resolve", &["--theirs", "t"]).unwrap();
    assert_eq!(select_t(&repo), vec![(0, 0), (1, 2)]);
    call(&mut repo, "dolt_commit", &["-m", "merge resolved"]).unwrap();
}

/// Seed scenario: the AUTO_INCREMENT counter jumps past both sides
/// after a merge.
#[test]
fn test_auto_increment_after_merge() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_auto_increment_table_t(&repo);
    assert_eq!(insert_t_auto(&repo, 1), 1);
    assert_eq!(insert_t_auto(&repo, 2), 2);
    commit_all(&mut repo, "base");

    call(&mut repo, "dolt_branch", &["other"]).unwrap();

    // ours: two auto-allocated inserts take keys 3 and 4
    assert_eq!(insert_t_auto(&repo, 3), 3);
    assert_eq!(insert_t_auto(&repo, 4), 4);
    commit_all(&mut repo, "ours");

    // theirs: an explicit insert at 10 pushes its counter to 11
    call(&mut repo, "dolt_checkout", &["other"]).unwrap();
    insert_t(&repo, 10, 10);
    commit_all(&mut repo, "theirs");

    call(&mut repo, "dolt_checkout", &["main"]).unwrap();
    let result = call(&mut repo, "dolt_merge", &["other"]).unwrap();
    assert_eq!(result.rows[0][2], Value::Int(0), "merge is clean");

    // All six rows present
    assert_eq!(
        select_t(&repo),
        vec![(1, 1), (2, 2), (3, 3), (4, 4), (10, 10)]
    );

    // The next auto-allocated key must be 11
    assert_eq!(insert_t_auto(&repo, 99), 11);
}

/// Seed scenario: -d refuses an unmerged branch, -D removes it and its
/// working set.
#[test]
fn test_branch_delete_safety() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    commit_all(&mut repo, "base");

    call(&mut repo, "dolt_branch", &["b"]).unwrap();
    call(&mut repo, "dolt_checkout", &["b"]).unwrap();
    insert_t(&repo, 1, 1);
    commit_all(&mut repo, "advance b");
    call(&mut repo, "dolt_checkout", &["main"]).unwrap();

    let err = call(&mut repo, "dolt_branch", &["-d", "b"]).unwrap_err();
    assert_eq!(err.to_string(), "branch 'b' is not fully merged");

    call(&mut repo, "dolt_branch", &["-D", "b"]).unwrap();
    assert!(!repo.ops().branch_exists("b").unwrap());
    assert!(repo
        .refs()
        .get("workingSets/heads/b")
        .unwrap()
        .is_none());
}

/// Seed scenario: both branches add an identical column; the merge
/// keeps a single column with the shared deterministic tag.
#[test]
fn test_identical_column_addition_merges() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    insert_t(&repo, 0, 0);
    commit_all(&mut repo, "base");

    call(&mut repo, "dolt_branch", &["other"]).unwrap();

    let add_c2 = |repo: &dolt::Repository| {
        let root = repo.working_root().unwrap();
        let table = root.get_table(repo.store(), "t").unwrap().unwrap();
        let altered = table
            .add_column("t", "c2", SqlType::Int, true, None)
            .unwrap();
        let root = root.put_table("t", &altered).unwrap();
        repo.set_working_root(&root).unwrap();
    };

    add_c2(&repo);
    commit_all(&mut repo, "ours add c2");

    call(&mut repo, "dolt_checkout", &["other"]).unwrap();
    add_c2(&repo);
    commit_all(&mut repo, "theirs add c2");

    call(&mut repo, "dolt_checkout", &["main"]).unwrap();
    let result = call(&mut repo, "dolt_merge", &["other"]).unwrap();
    assert_eq!(result.rows[0][2], Value::Int(0));

    let table = repo
        .working_root()
        .unwrap()
        .get_table(repo.store(), "t")
        .unwrap()
        .unwrap();
    let c2: Vec<_> = table
        .schema()
        .columns()
        .iter()
        .filter(|c| c.name == "c2")
        .collect();
    assert_eq!(c2.len(), 1, "exactly one c2 column after merge");
}

/// Setting AUTO_INCREMENT to 0 or 1 on an untouched table is
/// indistinguishable from never setting it: no diff, nothing to
/// commit.
#[test]
fn test_auto_increment_reset_produces_no_diff() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_auto_increment_table_t(&repo);
    commit_all(&mut repo, "create");

    for n in [0u64, 1] {
        let root = repo.working_root().unwrap();
        let table = root.get_table(repo.store(), "t").unwrap().unwrap();
        let altered = table.set_auto_increment(n);
        let root = root.put_table("t", &altered).unwrap();
        repo.set_working_root(&root).unwrap();

        let branch = repo.current_branch().to_string();
        let status = repo.ops().status(&branch).unwrap();
        assert!(status.is_clean(), "AUTO_INCREMENT={} must not dirty the table", n);

        let err = call(&mut repo, "dolt_commit", &["-a", "-m", "noop"]).unwrap_err();
        assert!(matches!(err, Error::Argument(_)), "nothing to commit");
    }
}

/// Stash round trip through the procedure surface
#[test]
fn test_stash_save_and_pop() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    commit_all(&mut repo, "base");

    insert_t(&repo, 7, 70);
    call(&mut repo, "dolt_stash", &["push"]).unwrap();
    assert!(select_t(&repo).is_empty());

    call(&mut repo, "dolt_stash", &["pop"]).unwrap();
    assert_eq!(select_t(&repo), vec![(7, 70)]);
}

/// Revert creates a commit that undoes an earlier one
#[test]
fn test_revert_commit() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    insert_t(&repo, 1, 1);
    commit_all(&mut repo, "keep this");
    insert_t(&repo, 2, 2);
    let bad = commit_all(&mut repo, "revert this");

    call(&mut repo, "dolt_revert", &[&bad.to_hex()]).unwrap();
    assert_eq!(select_t(&repo), vec![(1, 1)]);

    let log = system_table(&repo, "dolt_log").unwrap();
    let newest = &log.rows[0][4];
    assert_eq!(*newest, Value::Text("Revert \"revert this\"".to_string()));
}

/// dolt_status and dolt_branches reflect the working state
#[test]
fn test_system_tables_reflect_state() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    let status = system_table(&repo, "DOLT_STATUS").unwrap();
    assert_eq!(status.rows.len(), 1);
    assert_eq!(status.rows[0][0], Value::Text("t".to_string()));
    assert_eq!(status.rows[0][1], Value::Bool(false));

    commit_all(&mut repo, "create t");
    assert!(system_table(&repo, "dolt_status").unwrap().rows.is_empty());

    call(&mut repo, "dolt_branch", &["feature"]).unwrap();
    let branches = system_table(&repo, "dolt_branches").unwrap();
    let names: Vec<String> = branches
        .rows
        .iter()
        .map(|r| match &r[0] {
            Value::Text(s) => s.clone(),
            _ => String::new(),
        })
        .collect();
    assert_eq!(names, vec!["feature", "main"]);

    let log = system_table(&repo, "dolt_log").unwrap();
    assert_eq!(log.rows.len(), 2);
    assert_eq!(
        log.rows[1][4],
        Value::Text("Initialize data repository".to_string())
    );
}

/// dolt_diff_t shows working-vs-HEAD rows with diff types
#[test]
fn test_working_diff_table() {
    let dir = TempDir::new().unwrap();
    let mut repo = init_repo(&dir);

    create_table_t(&repo);
    insert_t(&repo, 1, 1);
    insert_t(&repo, 2, 2);
    commit_all(&mut repo, "base");

    // add one, change one
    insert_t(&repo, 3, 3);
    {
        let root = repo.working_root().unwrap();
        let table = root.get_table(repo.store(), "t").unwrap().unwrap();
        let mut editor = table.editor();
        editor
            .update_row(&[Value::Int(2)], vec![Value::Int(2), Value::Int(22)])
            .unwrap();
        let root = root.put_table("t", &editor.flush().unwrap()).unwrap();
        repo.set_working_root(&root).unwrap();
    }

    let diff = system_table(&repo, "dolt_diff_t").unwrap();
    assert_eq!(diff.rows.len(), 2);
    let types: Vec<String> = diff
        .rows
        .iter()
        .map(|r| match r.last() {
            Some(Value::Text(s)) => s.clone(),
            _ => String::new(),
        })
        .collect();
    assert!(types.contains(&"added".to_string()));
    assert!(types.contains(&"modified".to_string()));
}
