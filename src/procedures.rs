// src/procedures.rs

//! Stored-procedure surface
//!
//! Each version-control verb the CLI exposes is also callable from SQL
//! as `CALL dolt_<verb>(...)`. Arguments arrive as strings, exactly as
//! the SQL engine passes them; every procedure returns a single-row
//! [`Relation`] with a status code and detail columns. The CLI
//! commands and these procedures share the same underlying operations,
//! so the two surfaces cannot drift apart.

use crate::codec::Value;
use crate::commit::{tag_ref, TagValue};
use crate::config::ConfigScope;
use crate::merge::resolve_conflicts;
use crate::remote;
use crate::repo::Repository;
use crate::sysdep::Relation;
use crate::workingset::StashStack;
use crate::{Error, Result};

fn one_row(columns: &[&str], row: Vec<Value>) -> Relation {
    let mut relation = Relation::new(columns);
    relation.push(row);
    relation
}

fn status_row(status: i64, message: impl Into<String>) -> Relation {
    one_row(
        &["status", "message"],
        vec![Value::Int(status), Value::Text(message.into())],
    )
}

/// Split flags from positional arguments. Flags named in
/// `value_flags` consume the following argument (read separately via
/// [`flag_value`]); `--` ends option parsing so names starting with a
/// dash stay positional.
fn split_flags<'a>(args: &'a [String], value_flags: &[&str]) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut flags = Vec::new();
    let mut positional = Vec::new();
    let mut options_done = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if !options_done && arg == "--" {
            options_done = true;
        } else if !options_done && arg.starts_with('-') && arg.len() > 1 {
            flags.push(arg.as_str());
            if value_flags.contains(&arg.as_str()) {
                iter.next();
            }
        } else {
            positional.push(arg.as_str());
        }
    }
    (flags, positional)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter.next().map(String::as_str);
        }
        if let Some(value) = arg.strip_prefix(&format!("{}=", flag)) {
            return Some(value);
        }
    }
    None
}

/// Dispatch a procedure call by (case-insensitive) name
pub fn call_procedure(repo: &mut Repository, name: &str, args: &[String]) -> Result<Relation> {
    match name.to_lowercase().as_str() {
        "dolt_add" => dolt_add(repo, args),
        "dolt_commit" => dolt_commit(repo, args),
        "dolt_checkout" => dolt_checkout(repo, args),
        "dolt_branch" => dolt_branch(repo, args),
        "dolt_merge" => dolt_merge(repo, args),
        "dolt_merge_base" => dolt_merge_base(repo, args),
        "dolt_reset" => dolt_reset(repo, args),
        "dolt_revert" => dolt_revert(repo, args),
        "dolt_stash" => dolt_stash(repo, args),
        "dolt_pull" => dolt_pull(repo, args),
        "dolt_push" => dolt_push(repo, args),
        "dolt_fetch" => dolt_fetch(repo, args),
        "dolt_tag" => dolt_tag(repo, args),
        "dolt_conflicts_resolve" => dolt_conflicts_resolve(repo, args),
        _ => Err(Error::Argument(format!("unknown procedure: {}", name))),
    }
}

pub fn dolt_add(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, tables) = split_flags(args, &[]);
    let branch = repo.current_branch().to_string();
    if flags.contains(&"-A") || flags.contains(&"--all") || tables.iter().any(|t| *t == ".") {
        repo.ops().stage(&branch, None)?;
    } else if tables.is_empty() {
        return Err(Error::Argument("nothing specified to add".to_string()));
    } else {
        let names: Vec<String> = tables.iter().map(|s| s.to_string()).collect();
        repo.ops().stage(&branch, Some(&names))?;
    }
    Ok(status_row(0, "staged"))
}

pub fn dolt_commit(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, _) = split_flags(args, &["-m", "--message"]);
    let message = flag_value(args, "-m")
        .or_else(|| flag_value(args, "--message"))
        .ok_or_else(|| Error::Argument("commit requires a message (-m)".to_string()))?
        .to_string();
    let stage_all = flags.contains(&"-a") || flags.contains(&"--all");
    let allow_empty = flags.contains(&"--allow-empty");

    let branch = repo.current_branch().to_string();
    let meta = repo.commit_meta(&message)?;
    let commit = repo.ops().commit(&branch, meta, allow_empty, stage_all)?;
    Ok(one_row(&["hash"], vec![Value::Text(commit.to_hex())]))
}

pub fn dolt_checkout(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &[]);
    let force = flags.contains(&"-f") || flags.contains(&"--force");
    let current = repo.current_branch().to_string();

    if flags.contains(&"-b") {
        let new_branch = positional
            .first()
            .ok_or_else(|| Error::Argument("checkout -b requires a branch name".to_string()))?;
        let start = match positional.get(1) {
            Some(rev) => repo.resolve_commit(rev)?,
            None => repo.ops().branch_head(&current)?,
        };
        repo.ops().create_branch(new_branch, start)?;
        repo.ops().checkout(&current, new_branch, force)?;
        repo.set_current_branch(new_branch)?;
        return Ok(status_row(0, format!("Switched to a new branch '{}'", new_branch)));
    }

    let target = positional
        .first()
        .ok_or_else(|| Error::Argument("checkout requires a branch".to_string()))?;
    repo.ops().checkout(&current, target, force)?;
    repo.set_current_branch(target)?;
    Ok(status_row(0, format!("Switched to branch '{}'", target)))
}

pub fn dolt_branch(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &[]);
    let current = repo.current_branch().to_string();

    if flags.contains(&"-d") || flags.contains(&"-D") {
        let name = positional
            .first()
            .ok_or_else(|| Error::Argument("branch -d requires a name".to_string()))?;
        repo.ops()
            .delete_branch(name, flags.contains(&"-D"), &current)?;
        return Ok(status_row(0, format!("Deleted branch '{}'", name)));
    }
    if flags.contains(&"-m") || flags.contains(&"--move") {
        let (old, new) = match positional.as_slice() {
            [new] => (current.clone(), new.to_string()),
            [old, new] => (old.to_string(), new.to_string()),
            _ => return Err(Error::Argument("branch -m requires a new name".to_string())),
        };
        repo.rename_branch(&old, &new)?;
        return Ok(status_row(0, format!("Renamed branch to '{}'", new)));
    }

    let name = positional
        .first()
        .ok_or_else(|| Error::Argument("branch requires a name".to_string()))?;
    let start = match positional.get(1) {
        Some(rev) => repo.resolve_commit(rev)?,
        None => repo.ops().branch_head(&current)?,
    };
    repo.ops().create_branch(name, start)?;
    Ok(status_row(0, format!("Created branch '{}'", name)))
}

pub fn dolt_merge(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &["-m", "--message"]);
    let revision = positional
        .first()
        .ok_or_else(|| Error::Argument("merge requires a branch or commit".to_string()))?;
    let no_commit = flags.contains(&"--no-commit");
    let theirs = repo.resolve_commit(revision)?;

    let branch = repo.current_branch().to_string();
    let message = flag_value(args, "-m")
        .map(String::from)
        .unwrap_or_else(|| format!("Merge branch '{}' into {}", revision, branch));
    let meta = repo.commit_meta(&message)?;

    let (outcome, committed) = repo
        .ops()
        .merge(&branch, theirs, &message, meta, no_commit)?;

    let hash = committed.map(|a| a.to_hex()).unwrap_or_default();
    let conflicts =
        outcome.conflict_tables.len() as i64 + outcome.violation_tables.len() as i64;
    Ok(one_row(
        &["hash", "fast_forward", "conflicts"],
        vec![
            Value::Text(hash),
            Value::Bool(outcome.fast_forward),
            Value::Int(conflicts),
        ],
    ))
}

pub fn dolt_merge_base(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (_, positional) = split_flags(args, &[]);
    let [left, right] = positional.as_slice() else {
        return Err(Error::Argument("merge_base requires two revisions".to_string()));
    };
    let a = repo.resolve_commit(left)?;
    let b = repo.resolve_commit(right)?;
    let base = crate::commit::merge_base(repo.store(), a, b)?
        .map(|addr| addr.to_hex())
        .unwrap_or_default();
    Ok(one_row(&["merge_base_hash"], vec![Value::Text(base)]))
}

pub fn dolt_reset(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, tables) = split_flags(args, &[]);
    let hard = flags.contains(&"--hard");
    let branch = repo.current_branch().to_string();
    if tables.is_empty() {
        repo.ops().reset(&branch, None, hard)?;
    } else {
        let names: Vec<String> = tables.iter().map(|s| s.to_string()).collect();
        repo.ops().reset(&branch, Some(&names), hard)?;
    }
    Ok(status_row(0, if hard { "hard reset" } else { "reset" }))
}

pub fn dolt_revert(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (_, positional) = split_flags(args, &[]);
    let revision = positional
        .first()
        .ok_or_else(|| Error::Argument("revert requires a commit".to_string()))?;
    let branch = repo.current_branch().to_string();
    let head = repo.ops().branch_head(&branch)?;
    let target = repo.resolve_commit(revision)?;

    let (root, message) = crate::merge::revert_root(repo.store(), head, target)?;
    repo.ops().set_working_root(&branch, &root)?;
    repo.ops().stage(&branch, None)?;
    let meta = repo.commit_meta(&message)?;
    let commit = repo.ops().commit(&branch, meta, false, false)?;
    Ok(one_row(&["hash"], vec![Value::Text(commit.to_hex())]))
}

pub fn dolt_stash(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &[]);
    let action = positional.first().copied().unwrap_or("push");
    let branch = repo.current_branch().to_string();
    let ops = repo.ops();
    let stash = StashStack::new(ops);
    match action {
        "push" | "save" => {
            let include_untracked = flags.contains(&"--include-untracked") || flags.contains(&"-u");
            let now = chrono::Utc::now().timestamp();
            stash.push(&branch, include_untracked, now)?;
            Ok(status_row(0, format!("Saved working directory on {}", branch)))
        }
        "pop" => {
            let entry = stash.pop(&branch)?;
            Ok(status_row(0, format!("Applied stash from {}", entry.branch)))
        }
        "drop" => {
            let entry = stash.drop_newest()?;
            Ok(status_row(0, format!("Dropped stash from {}", entry.branch)))
        }
        "clear" => {
            stash.clear()?;
            Ok(status_row(0, "Cleared all stash entries"))
        }
        "list" => {
            let count = stash.entries()?.len();
            Ok(status_row(0, format!("{} stash entries", count)))
        }
        other => Err(Error::Argument(format!("unknown stash action: {}", other))),
    }
}

/// The branch's upstream remote, honoring push.autoSetupRemote
fn upstream_remote(repo: &mut Repository, branch: &str, create: bool) -> Result<String> {
    let key = format!("branch.{}.remote", branch);
    if let Some(remote) = repo.config().get(&key) {
        return Ok(remote.to_string());
    }
    let auto = repo.config().get_bool(crate::config::PUSH_AUTO_SETUP_REMOTE);
    if create && auto && repo.config().remote_url("origin").is_some() {
        repo.config_mut().set(ConfigScope::Local, &key, "origin")?;
        return Ok("origin".to_string());
    }
    Err(Error::Argument(format!(
        "the current branch {} has no upstream branch; push with an explicit remote \
         or set push.autoSetupRemote",
        branch
    )))
}

pub fn dolt_push(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &[]);
    let force = flags.contains(&"-f") || flags.contains(&"--force");
    let branch = match positional.get(1) {
        Some(b) => b.to_string(),
        None => repo.current_branch().to_string(),
    };
    let remote_name = match positional.first() {
        Some(r) => {
            let key = format!("branch.{}.remote", branch);
            if repo.config().get(&key).is_none()
                && (flags.contains(&"--set-upstream") || flags.contains(&"-u"))
            {
                repo.config_mut().set(ConfigScope::Local, &key, r)?;
            }
            r.to_string()
        }
        None => upstream_remote(repo, &branch, true)?,
    };

    let transport = repo.open_remote(&remote_name)?;
    let report = remote::push(
        repo.refs(),
        transport.as_ref(),
        &remote_name,
        &branch,
        force,
        None,
        |_, _| {},
    )?;
    Ok(one_row(
        &["status", "message"],
        vec![
            Value::Int(0),
            Value::Text(format!(
                "pushed {} to {} ({} chunks)",
                branch, remote_name, report.chunks_uploaded
            )),
        ],
    ))
}

pub fn dolt_fetch(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (_, positional) = split_flags(args, &[]);
    let remote_name = positional.first().copied().unwrap_or("origin").to_string();
    let transport = repo.open_remote(&remote_name)?;
    let report = remote::fetch_all(repo.refs(), transport.as_ref(), &remote_name, None, |_| {})?;
    Ok(status_row(
        0,
        format!("fetched {} chunks from {}", report.chunks_downloaded, remote_name),
    ))
}

pub fn dolt_pull(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &[]);
    let no_commit = flags.contains(&"--no-commit");
    let branch = match positional.get(1) {
        Some(b) => b.to_string(),
        None => repo.current_branch().to_string(),
    };
    let remote_name = match positional.first() {
        Some(r) => r.to_string(),
        None => upstream_remote(repo, &branch, false)?,
    };
    let transport = repo.open_remote(&remote_name)?;
    let message = format!("Merge branch '{}' of {}", branch, remote_name);
    let meta = repo.commit_meta(&message)?;
    let report = remote::pull(
        repo.ops(),
        transport.as_ref(),
        &remote_name,
        &branch,
        meta,
        no_commit,
        None,
        |_| {},
    )?;
    Ok(one_row(
        &["fast_forward", "conflicts", "message"],
        vec![
            Value::Bool(report.fast_forward),
            Value::Int(report.conflict_tables.len() as i64),
            Value::Text(if report.up_to_date {
                "Already up to date".to_string()
            } else {
                format!("pulled {} chunks", report.fetch.chunks_downloaded)
            }),
        ],
    ))
}

pub fn dolt_tag(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, positional) = split_flags(args, &["-m", "--message"]);
    if flags.contains(&"-d") {
        let name = positional
            .first()
            .ok_or_else(|| Error::Argument("tag -d requires a name".to_string()))?;
        if repo.refs().get(&tag_ref(name))?.is_none() {
            return Err(Error::RefNotFound(tag_ref(name)));
        }
        repo.refs().delete(&tag_ref(name))?;
        return Ok(status_row(0, format!("Deleted tag '{}'", name)));
    }

    let name = positional
        .first()
        .ok_or_else(|| Error::Argument("tag requires a name".to_string()))?;
    if repo.refs().get(&tag_ref(name))?.is_some() {
        return Err(Error::Argument(format!("tag '{}' already exists", name)));
    }
    let commit = match positional.get(1) {
        Some(rev) => repo.resolve_commit(rev)?,
        None => repo.ops().branch_head(repo.current_branch())?,
    };
    let message = flag_value(args, "-m").unwrap_or("").to_string();
    let meta = repo.commit_meta(&message)?;
    let capsule = TagValue { commit, meta };
    let capsule_addr = capsule.save(repo.store())?;
    repo.refs().set(&tag_ref(name), capsule_addr)?;
    Ok(status_row(0, format!("Created tag '{}'", name)))
}

pub fn dolt_conflicts_resolve(repo: &mut Repository, args: &[String]) -> Result<Relation> {
    let (flags, tables) = split_flags(args, &[]);
    let take_ours = flags.contains(&"--ours");
    let take_theirs = flags.contains(&"--theirs");
    if take_ours == take_theirs {
        return Err(Error::Argument(
            "conflicts resolve requires exactly one of --ours or --theirs".to_string(),
        ));
    }
    if tables.is_empty() {
        return Err(Error::Argument("specify the tables to resolve".to_string()));
    }
    let branch = repo.current_branch().to_string();
    let mut root = repo.ops().working_root(&branch)?;
    for table in &tables {
        root = resolve_conflicts(repo.store(), &root, table, take_ours)?;
    }
    repo.ops().set_working_root(&branch, &root)?;
    // The staged root carries the sidecars too when mid-merge
    repo.ops().stage(&branch, Some(&tables.iter().map(|s| s.to_string()).collect::<Vec<_>>()))?;
    Ok(status_row(0, format!("resolved conflicts in {} tables", tables.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_flags() {
        let args: Vec<String> = ["-a", "--force", "t1", "--", "-weird-table"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (flags, positional) = split_flags(&args, &[]);
        assert_eq!(flags, vec!["-a", "--force"]);
        // `--` ends option parsing, so a leading dash survives as a name
        assert_eq!(positional, vec!["t1", "-weird-table"]);
    }

    #[test]
    fn test_split_flags_value_flag_consumes_argument() {
        let args: Vec<String> = ["-m", "a message", "feature"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (flags, positional) = split_flags(&args, &["-m"]);
        assert_eq!(flags, vec!["-m"]);
        // The message belongs to -m, not the positionals
        assert_eq!(positional, vec!["feature"]);
    }

    #[test]
    fn test_flag_value_forms() {
        let args: Vec<String> = ["-m", "hello", "--depth=3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, "-m"), Some("hello"));
        assert_eq!(flag_value(&args, "--depth"), Some("3"));
        assert_eq!(flag_value(&args, "--missing"), None);
    }
}
