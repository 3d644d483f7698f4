// src/commands/mod.rs

//! Command handlers for the dolt CLI
//!
//! Handlers are thin: they open the repository, delegate to the same
//! operations the stored procedures use, and render the results. Exit
//! codes are decided in `main`: 0 success, 1 user or data error, 2
//! internal error.

mod sync;
mod vcs;

use crate::cli::{Cli, Commands};
use crate::codec::Value;
use crate::config::{Config, ConfigScope};
use crate::repo::Repository;
use crate::sysdep::Relation;
use crate::{Error, Result};
use std::path::PathBuf;

/// Where the repository lives for this invocation
fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn doltcfg_dir(cli: &Cli) -> Option<PathBuf> {
    cli.doltcfg_dir.as_ref().map(PathBuf::from)
}

/// Open the repository and apply `--branch` / `--use-db` overrides
fn open_repo(cli: &Cli) -> Result<Repository> {
    let mut repo = Repository::open(&data_dir(cli), doltcfg_dir(cli).as_deref())?;

    // --use-db db[/branch]: the directory names the database; only the
    // branch half matters here.
    let branch_override = cli
        .branch
        .clone()
        .or_else(|| {
            cli.use_db
                .as_ref()
                .and_then(|db| db.split_once('/').map(|(_, b)| b.to_string()))
        });
    if let Some(branch) = branch_override {
        if !repo.ops().branch_exists(&branch)? {
            return Err(Error::RefNotFound(format!("refs/heads/{}", branch)));
        }
        repo.override_branch(&branch);
    }
    Ok(repo)
}

/// Render a value the way the CLI prints cells
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Uint(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Decimal(v) => v.clone(),
        Value::Text(v) => v.clone(),
        Value::Bytes(v) => hex::encode(v),
        Value::Timestamp(v) => v.to_string(),
        Value::Json(v) => v.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len),
        Value::Tuple(_) => "<tuple>".to_string(),
    }
}

/// Print a relation as an aligned text table
pub(crate) fn print_relation(relation: &Relation) {
    let mut widths: Vec<usize> = relation.columns.iter().map(String::len).collect();
    let rendered: Vec<Vec<String>> = relation
        .rows
        .iter()
        .map(|row| row.iter().map(render_value).collect())
        .collect();
    for row in &rendered {
        for (idx, cell) in row.iter().enumerate() {
            if idx < widths.len() {
                widths[idx] = widths[idx].max(cell.len());
            }
        }
    }

    let header: Vec<String> = relation
        .columns
        .iter()
        .zip(&widths)
        .map(|(name, width)| format!("{:1$}", name, *width))
        .collect();
    println!("| {} |", header.join(" | "));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("|-{}-|", rule.join("-|-"));
    for row in rendered {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:1$}", cell, *width))
            .collect();
        println!("| {} |", cells.join(" | "));
    }
}

/// Dispatch one parsed invocation
pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Init { initial_branch } => init(cli, initial_branch.as_deref()),
        Commands::Config {
            global,
            list,
            unset,
            name,
            value,
        } => config(cli, *global, *list, *unset, name.as_deref(), value.as_deref()),
        Commands::Status => vcs::status(&open_repo(cli)?),
        Commands::Log { number } => vcs::log(&open_repo(cli)?, *number),
        Commands::Add { tables, all } => vcs::add(&mut open_repo(cli)?, tables, *all),
        Commands::Commit {
            message,
            all,
            allow_empty,
        } => vcs::commit(&mut open_repo(cli)?, message, *all, *allow_empty),
        Commands::Branch {
            name,
            start_point,
            delete,
            force_delete,
            rename,
        } => vcs::branch(
            &mut open_repo(cli)?,
            name.as_deref(),
            start_point.as_deref(),
            *delete,
            *force_delete,
            *rename,
        ),
        Commands::Checkout {
            target,
            new_branch,
            force,
        } => vcs::checkout(&mut open_repo(cli)?, target, *new_branch, *force),
        Commands::Merge {
            revision,
            message,
            no_commit,
        } => vcs::merge(&mut open_repo(cli)?, revision, message.as_deref(), *no_commit),
        Commands::MergeBase { left, right } => {
            vcs::merge_base(&mut open_repo(cli)?, left, right)
        }
        Commands::Reset {
            tables,
            hard,
            soft,
        } => vcs::reset(&mut open_repo(cli)?, tables, *hard, *soft),
        Commands::Revert { revision } => vcs::revert(&mut open_repo(cli)?, revision),
        Commands::Conflicts { action } => vcs::conflicts(&mut open_repo(cli)?, action),
        Commands::Stash {
            action,
            include_untracked,
        } => vcs::stash(&mut open_repo(cli)?, action.as_deref(), *include_untracked),
        Commands::Tag {
            name,
            revision,
            message,
            delete,
        } => vcs::tag(
            &mut open_repo(cli)?,
            name.as_deref(),
            revision.as_deref(),
            message.as_deref(),
            *delete,
        ),
        Commands::Remote { action } => sync::remote(&mut open_repo(cli)?, action.as_ref()),
        Commands::Push {
            remote,
            branch,
            force,
            set_upstream,
        } => sync::push(
            &mut open_repo(cli)?,
            remote.as_deref(),
            branch.as_deref(),
            *force,
            *set_upstream,
        ),
        Commands::Pull {
            remote,
            branch,
            no_commit,
        } => sync::pull(
            &mut open_repo(cli)?,
            remote.as_deref(),
            branch.as_deref(),
            *no_commit,
        ),
        Commands::Fetch { remote } => sync::fetch(&mut open_repo(cli)?, remote.as_deref()),
        Commands::Ls => vcs::ls(&open_repo(cli)?),
        Commands::Show { name } => {
            let repo = open_repo(cli)?;
            let relation = crate::sysdep::system_table(&repo, name)?;
            print_relation(&relation);
            Ok(())
        }
    }
}

fn init(cli: &Cli, initial_branch: Option<&str>) -> Result<()> {
    let dir = data_dir(cli);
    let cfg = doltcfg_dir(cli);
    let repo = Repository::init(&dir, cfg.as_deref(), initial_branch)?;
    println!(
        "Initialized dolt data repository on branch {}",
        repo.current_branch()
    );
    Ok(())
}

fn config(
    cli: &Cli,
    global: bool,
    list: bool,
    unset: bool,
    name: Option<&str>,
    value: Option<&str>,
) -> Result<()> {
    let dir = data_dir(cli);
    let dolt_dir = dir.join(".dolt");
    let local = dolt_dir.exists().then_some(dolt_dir);
    let mut config = Config::load(local.as_deref(), doltcfg_dir(cli).as_deref())?;
    let scope = if global {
        ConfigScope::Global
    } else {
        ConfigScope::Local
    };

    if list {
        for (key, val) in config.entries() {
            println!("{} = {}", key, val);
        }
        return Ok(());
    }
    let Some(name) = name else {
        return Err(Error::Argument("config requires an option name".to_string()));
    };
    if unset {
        config.unset(scope, name)?;
        return Ok(());
    }
    match value {
        Some(value) => config.set(scope, name, value),
        None => {
            match config.get(name) {
                Some(value) => println!("{}", value),
                None => return Err(Error::Argument(format!("{} is not set", name))),
            }
            Ok(())
        }
    }
}
