// tests/common/mod.rs

//! Shared helpers for integration tests

use dolt::codec::Value;
use dolt::config::{Config, ConfigScope};
use dolt::repo::Repository;
use dolt::schema::{Schema, SqlType};
use dolt::table::Table;
use tempfile::TempDir;

/// Create a repository in `dir` with a configured committer identity
pub fn init_repo(dir: &TempDir) -> Repository {
    let cfg_dir = dir.path().join("doltcfg");
    let mut config = Config::load(None, Some(&cfg_dir)).unwrap();
    config.set(ConfigScope::Global, "user.name", "alice").unwrap();
    config
        .set(ConfigScope::Global, "user.email", "alice@example.com")
        .unwrap();
    Repository::init(&dir.path().join("repo"), Some(&cfg_dir), None).unwrap()
}

#[allow(dead_code)]
pub fn reopen_repo(dir: &TempDir) -> Repository {
    let cfg_dir = dir.path().join("doltcfg");
    Repository::open(&dir.path().join("repo"), Some(&cfg_dir)).unwrap()
}

/// `CREATE TABLE t (pk INT PRIMARY KEY, v INT)` in the working root
pub fn create_table_t(repo: &Repository) {
    let schema = Schema::builder("t")
        .column("pk", SqlType::Int, false)
        .column("v", SqlType::Int, true)
        .primary_key(&["pk"])
        .build()
        .unwrap();
    let table = Table::new(repo.store().clone(), schema);
    let root = repo.working_root().unwrap().put_table("t", &table).unwrap();
    repo.set_working_root(&root).unwrap();
}

/// `CREATE TABLE t (pk INT AUTO_INCREMENT PRIMARY KEY, v INT)`
#[allow(dead_code)]
pub fn create_auto_increment_table_t(repo: &Repository) {
    let schema = Schema::builder("t")
        .auto_increment_column("pk", SqlType::Int)
        .column("v", SqlType::Int, true)
        .primary_key(&["pk"])
        .build()
        .unwrap();
    let table = Table::new(repo.store().clone(), schema);
    let root = repo.working_root().unwrap().put_table("t", &table).unwrap();
    repo.set_working_root(&root).unwrap();
}

/// `INSERT INTO t VALUES (pk, v)`
pub fn insert_t(repo: &Repository, pk: i64, v: i64) {
    let root = repo.working_root().unwrap();
    let table = root.get_table(repo.store(), "t").unwrap().unwrap();
    let mut editor = table.editor();
    editor
        .insert_row(vec![Value::Int(pk), Value::Int(v)])
        .unwrap();
    let root = root.put_table("t", &editor.flush().unwrap()).unwrap();
    repo.set_working_root(&root).unwrap();
}

/// `INSERT INTO t(v) VALUES (v)` using the AUTO_INCREMENT counter;
/// returns the allocated key.
#[allow(dead_code)]
pub fn insert_t_auto(repo: &Repository, v: i64) -> i64 {
    let root = repo.working_root().unwrap();
    let table = root.get_table(repo.store(), "t").unwrap().unwrap();
    let mut editor = table.editor();
    let pk = editor.next_auto_increment() as i64;
    editor
        .insert_row(vec![Value::Int(pk), Value::Int(v)])
        .unwrap();
    let root = root.put_table("t", &editor.flush().unwrap()).unwrap();
    repo.set_working_root(&root).unwrap();
    pk
}

/// `SELECT * FROM t ORDER BY pk` as (pk, v) pairs
#[allow(dead_code)]
pub fn select_t(repo: &Repository) -> Vec<(i64, i64)> {
    let root = repo.working_root().unwrap();
    let table = root.get_table(repo.store(), "t").unwrap().unwrap();
    table
        .scan()
        .unwrap()
        .into_iter()
        .map(|row| {
            let pk = match row[0] {
                Value::Int(v) => v,
                _ => panic!("non-int pk"),
            };
            let v = match row[1] {
                Value::Int(v) => v,
                Value::Null => 0,
                _ => panic!("non-int value"),
            };
            (pk, v)
        })
        .collect()
}

/// Stage everything and commit
pub fn commit_all(repo: &mut Repository, message: &str) -> dolt::Addr {
    let branch = repo.current_branch().to_string();
    repo.ops().stage(&branch, None).unwrap();
    let meta = repo.commit_meta(message).unwrap();
    repo.ops().commit(&branch, meta, false, false).unwrap()
}
