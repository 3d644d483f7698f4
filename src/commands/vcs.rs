// src/commands/vcs.rs

//! Version-control command handlers: status, log, add, commit, branch,
//! checkout, merge, reset, revert, conflicts, stash, tag

use super::{print_relation, render_value};
use crate::cli::ConflictsAction;
use crate::procedures;
use crate::repo::Repository;
use crate::sysdep;
use crate::{Error, Result};

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn status(repo: &Repository) -> Result<()> {
    let branch = repo.current_branch();
    println!("On branch {}", branch);
    let status = repo.ops().status(branch)?;
    if status.is_clean() {
        println!("nothing to commit, working tree clean");
        return Ok(());
    }
    if status.merging {
        println!("All conflicts and constraint violations fixed but you are still merging.");
    }
    if !status.staged.is_empty() {
        println!("Changes to be committed:");
        for (table, change) in &status.staged {
            println!("        {}:       {}", change.label(), table);
        }
    }
    if !status.unstaged.is_empty() {
        println!("Changes not staged for commit:");
        for (table, change) in &status.unstaged {
            println!("        {}:       {}", change.label(), table);
        }
    }
    if !status.conflicted.is_empty() {
        println!("Unmerged tables:");
        for table in &status.conflicted {
            println!("        both modified:  {}", table);
        }
    }
    Ok(())
}

pub fn log(repo: &Repository, limit: Option<usize>) -> Result<()> {
    let relation = sysdep::log(repo, limit)?;
    for row in &relation.rows {
        println!("commit {}", render_value(&row[0]));
        println!("Author: {} <{}>", render_value(&row[1]), render_value(&row[2]));
        println!("Date:   {}", render_value(&row[3]));
        println!();
        println!("        {}", render_value(&row[4]));
        println!();
    }
    Ok(())
}

pub fn add(repo: &mut Repository, tables: &[String], all: bool) -> Result<()> {
    let mut call: Vec<String> = Vec::new();
    if all {
        call.push("-A".to_string());
    }
    call.extend(tables.iter().cloned());
    procedures::dolt_add(repo, &call)?;
    Ok(())
}

pub fn commit(repo: &mut Repository, message: &str, all: bool, allow_empty: bool) -> Result<()> {
    let mut call = args(&["-m", message]);
    if all {
        call.push("-a".to_string());
    }
    if allow_empty {
        call.push("--allow-empty".to_string());
    }
    let relation = procedures::dolt_commit(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("commit {}", render_value(&row[0]));
    }
    Ok(())
}

pub fn branch(
    repo: &mut Repository,
    name: Option<&str>,
    start_point: Option<&str>,
    delete: bool,
    force_delete: bool,
    rename: bool,
) -> Result<()> {
    if name.is_none() && !delete && !force_delete && !rename {
        // Bare `dolt branch` lists
        let current = repo.current_branch().to_string();
        for (branch, _) in repo.ops().branches()? {
            let marker = if branch == current { "* " } else { "  " };
            println!("{}{}", marker, branch);
        }
        return Ok(());
    }

    let mut call: Vec<String> = Vec::new();
    if force_delete {
        call.push("-D".to_string());
    } else if delete {
        call.push("-d".to_string());
    } else if rename {
        call.push("-m".to_string());
    }
    if let Some(name) = name {
        call.push(name.to_string());
    }
    if let Some(start) = start_point {
        call.push(start.to_string());
    }
    let relation = procedures::dolt_branch(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", render_value(&row[1]));
    }
    Ok(())
}

pub fn checkout(repo: &mut Repository, target: &str, new_branch: bool, force: bool) -> Result<()> {
    let mut call: Vec<String> = Vec::new();
    if new_branch {
        call.push("-b".to_string());
    }
    if force {
        call.push("--force".to_string());
    }
    call.push(target.to_string());
    let relation = procedures::dolt_checkout(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", render_value(&row[1]));
    }
    Ok(())
}

pub fn merge(
    repo: &mut Repository,
    revision: &str,
    message: Option<&str>,
    no_commit: bool,
) -> Result<()> {
    let mut call: Vec<String> = Vec::new();
    if no_commit {
        call.push("--no-commit".to_string());
    }
    if let Some(message) = message {
        call.push("-m".to_string());
        call.push(message.to_string());
    }
    call.push(revision.to_string());
    let relation = procedures::dolt_merge(repo, &call)?;
    let Some(row) = relation.rows.first() else {
        return Ok(());
    };
    let conflicts = match &row[2] {
        crate::codec::Value::Int(n) => *n,
        _ => 0,
    };
    if conflicts > 0 {
        println!(
            "Automatic merge failed; fix conflicts and then commit the result ({} tables affected).",
            conflicts
        );
    } else if render_value(&row[1]) == "true" {
        println!("Fast-forward");
    } else if !render_value(&row[0]).is_empty() {
        println!("merge committed as {}", render_value(&row[0]));
    } else {
        println!("merge staged; commit to finish");
    }
    Ok(())
}

pub fn merge_base(repo: &mut Repository, left: &str, right: &str) -> Result<()> {
    let relation = procedures::dolt_merge_base(repo, &args(&[left, right]))?;
    if let Some(row) = relation.rows.first() {
        println!("{}", render_value(&row[0]));
    }
    Ok(())
}

pub fn reset(repo: &mut Repository, tables: &[String], hard: bool, soft: bool) -> Result<()> {
    if hard && soft {
        return Err(Error::Argument("--hard and --soft are exclusive".to_string()));
    }
    let mut call: Vec<String> = Vec::new();
    if hard {
        call.push("--hard".to_string());
    }
    call.extend(tables.iter().cloned());
    procedures::dolt_reset(repo, &call)?;
    Ok(())
}

pub fn revert(repo: &mut Repository, revision: &str) -> Result<()> {
    let relation = procedures::dolt_revert(repo, &args(&[revision]))?;
    if let Some(row) = relation.rows.first() {
        println!("commit {}", render_value(&row[0]));
    }
    Ok(())
}

pub fn conflicts(repo: &mut Repository, action: &ConflictsAction) -> Result<()> {
    match action {
        ConflictsAction::Cat { table } => {
            let relation = sysdep::system_table(repo, &format!("dolt_conflicts_{}", table))?;
            print_relation(&relation);
            Ok(())
        }
        ConflictsAction::Resolve {
            ours,
            theirs,
            tables,
        } => {
            let mut call: Vec<String> = Vec::new();
            if *ours {
                call.push("--ours".to_string());
            }
            if *theirs {
                call.push("--theirs".to_string());
            }
            call.extend(tables.iter().cloned());
            procedures::dolt_conflicts_resolve(repo, &call)?;
            Ok(())
        }
    }
}

pub fn stash(repo: &mut Repository, action: Option<&str>, include_untracked: bool) -> Result<()> {
    let mut call: Vec<String> = Vec::new();
    if include_untracked {
        call.push("--include-untracked".to_string());
    }
    if let Some(action) = action {
        call.push(action.to_string());
    }
    if action == Some("list") {
        let ops = repo.ops();
        let stash = crate::workingset::StashStack::new(ops);
        for (index, entry) in stash.entries()?.iter().enumerate() {
            println!("stash@{{{}}}: WIP on {}", index, entry.branch);
        }
        return Ok(());
    }
    let relation = procedures::dolt_stash(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", render_value(&row[1]));
    }
    Ok(())
}

pub fn tag(
    repo: &mut Repository,
    name: Option<&str>,
    revision: Option<&str>,
    message: Option<&str>,
    delete: bool,
) -> Result<()> {
    let Some(name) = name else {
        // Bare `dolt tag` lists
        let relation = sysdep::tags(repo)?;
        for row in &relation.rows {
            println!("{}", render_value(&row[0]));
        }
        return Ok(());
    };
    let mut call: Vec<String> = Vec::new();
    if delete {
        call.push("-d".to_string());
    }
    if let Some(message) = message {
        call.push("-m".to_string());
        call.push(message.to_string());
    }
    call.push(name.to_string());
    if let Some(revision) = revision {
        call.push(revision.to_string());
    }
    let relation = procedures::dolt_tag(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", render_value(&row[1]));
    }
    Ok(())
}

pub fn ls(repo: &Repository) -> Result<()> {
    let root = repo.working_root()?;
    let names = root.table_names();
    if names.is_empty() {
        println!("No tables in working set");
        return Ok(());
    }
    println!("Tables in working set:");
    for name in names {
        println!("        {}", name);
    }
    Ok(())
}
