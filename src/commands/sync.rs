// src/commands/sync.rs

//! Remote command handlers: remote add/remove, push, pull, fetch

use crate::cli::RemoteAction;
use crate::procedures;
use crate::remote;
use crate::repo::Repository;
use crate::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};

fn transfer_bar(label: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg} {pos}/{len} chunks {wide_bar}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(label.to_string());
    bar
}

pub fn remote(repo: &mut Repository, action: Option<&RemoteAction>) -> Result<()> {
    match action {
        None => {
            for (name, url) in repo.config().remotes() {
                println!("{} {}", name, url);
            }
            Ok(())
        }
        Some(RemoteAction::Add { name, url }) => {
            if repo.config().remote_url(name).is_some() {
                return Err(Error::Argument(format!("remote '{}' already exists", name)));
            }
            repo.config_mut().set_remote(name, url)
        }
        Some(RemoteAction::Remove { name }) => {
            if repo.config().remote_url(name).is_none() {
                return Err(Error::RemoteNotFound(name.clone()));
            }
            repo.config_mut().remove_remote(name)
        }
    }
}

pub fn push(
    repo: &mut Repository,
    remote_name: Option<&str>,
    branch: Option<&str>,
    force: bool,
    set_upstream: bool,
) -> Result<()> {
    // Resolve names through the procedure-layer rules, but drive the
    // transfer here so a progress bar can ride along.
    let branch = branch.unwrap_or(repo.current_branch()).to_string();
    let mut call: Vec<String> = Vec::new();
    if force {
        call.push("--force".to_string());
    }
    if set_upstream {
        call.push("--set-upstream".to_string());
    }
    if let Some(remote_name) = remote_name {
        call.push(remote_name.to_string());
        call.push(branch.clone());
        let bar = transfer_bar("Uploading");
        let transport = repo.open_remote(remote_name)?;
        let report = remote::push(
            repo.refs(),
            transport.as_ref(),
            remote_name,
            &branch,
            force,
            None,
            |done, total| {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            },
        )?;
        bar.finish_and_clear();
        if set_upstream {
            let key = format!("branch.{}.remote", branch);
            repo.config_mut()
                .set(crate::config::ConfigScope::Local, &key, remote_name)?;
        }
        println!(
            "To {}: {} -> {} ({} chunks)",
            remote_name, branch, report.remote_head, report.chunks_uploaded
        );
        return Ok(());
    }
    let relation = procedures::dolt_push(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", super::render_value(&row[1]));
    }
    Ok(())
}

pub fn pull(
    repo: &mut Repository,
    remote_name: Option<&str>,
    branch: Option<&str>,
    no_commit: bool,
) -> Result<()> {
    let mut call: Vec<String> = Vec::new();
    if no_commit {
        call.push("--no-commit".to_string());
    }
    if let Some(remote_name) = remote_name {
        call.push(remote_name.to_string());
        if let Some(branch) = branch {
            call.push(branch.to_string());
        }
    }
    let relation = procedures::dolt_pull(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", super::render_value(&row[2]));
    }
    Ok(())
}

pub fn fetch(repo: &mut Repository, remote_name: Option<&str>) -> Result<()> {
    let mut call: Vec<String> = Vec::new();
    if let Some(remote_name) = remote_name {
        call.push(remote_name.to_string());
    }
    let relation = procedures::dolt_fetch(repo, &call)?;
    if let Some(row) = relation.rows.first() {
        println!("{}", super::render_value(&row[1]));
    }
    Ok(())
}
