// src/cli.rs
//! CLI definitions for the dolt command
//!
//! This module contains all command-line interface definitions using
//! clap. The actual command implementations are in the `commands`
//! module and run through the same operations as the stored-procedure
//! surface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dolt")]
#[command(version)]
#[command(about = "A version-controlled SQL table store", long_about = None)]
pub struct Cli {
    /// Directory containing the .dolt repository (default: cwd)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Directory for the global configuration file
    #[arg(long, global = true)]
    pub doltcfg_dir: Option<String>,

    /// Privilege file for the SQL front-end (accepted for
    /// compatibility; privileges are enforced by the SQL layer)
    #[arg(long, global = true)]
    pub privilege_file: Option<String>,

    /// Database, optionally with a branch: db or db/branch
    #[arg(long, global = true)]
    pub use_db: Option<String>,

    /// Operate on this branch instead of the checked-out one
    #[arg(long, global = true)]
    pub branch: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new repository in the current directory
    Init {
        /// Name for the initial branch (overrides init.defaultbranch)
        #[arg(short = 'b', long)]
        initial_branch: Option<String>,
    },

    /// Get and set repository or global options
    Config {
        /// Write to the global config instead of the repository's
        #[arg(long)]
        global: bool,

        /// List every visible option
        #[arg(long)]
        list: bool,

        /// Remove the named option
        #[arg(long)]
        unset: bool,

        /// Option name, e.g. user.name
        name: Option<String>,

        /// Value to assign
        value: Option<String>,
    },

    /// Show changed tables in the working and staged roots
    Status,

    /// Show commit history of the current branch
    Log {
        /// Limit the number of commits shown
        #[arg(short = 'n', long)]
        number: Option<usize>,
    },

    /// Stage tables for commit
    Add {
        /// Tables to stage; `.` or -A stages everything
        tables: Vec<String>,

        /// Stage all changed tables
        #[arg(short = 'A', long)]
        all: bool,
    },

    /// Record the staged root as a new commit
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Stage all changed tables first
        #[arg(short = 'a', long)]
        all: bool,

        /// Permit a commit with no changes
        #[arg(long)]
        allow_empty: bool,
    },

    /// List, create, rename, or delete branches
    Branch {
        /// Branch name to create
        name: Option<String>,

        /// Start point (defaults to HEAD)
        start_point: Option<String>,

        /// Delete a merged branch
        #[arg(short = 'd')]
        delete: bool,

        /// Delete a branch regardless of merge status
        #[arg(short = 'D')]
        force_delete: bool,

        /// Rename the current (or named) branch
        #[arg(short = 'm', long = "move")]
        rename: bool,
    },

    /// Switch branches, carrying working changes when they apply
    Checkout {
        /// Branch to switch to
        target: String,

        /// Create the branch first
        #[arg(short = 'b')]
        new_branch: bool,

        /// Discard working changes that would block the switch
        #[arg(short, long)]
        force: bool,
    },

    /// Join another branch's history into the current branch
    Merge {
        /// Branch or commit to merge in
        revision: String,

        /// Merge message
        #[arg(short, long)]
        message: Option<String>,

        /// Stop before creating the merge commit
        #[arg(long)]
        no_commit: bool,
    },

    /// Find the common ancestor of two revisions
    MergeBase {
        left: String,
        right: String,
    },

    /// Move STAGED (and with --hard, WORKING) back to HEAD
    Reset {
        /// Tables to reset; empty resets everything
        tables: Vec<String>,

        /// Also reset the working root
        #[arg(long)]
        hard: bool,

        /// Reset only the staged root (the default)
        #[arg(long)]
        soft: bool,
    },

    /// Commit the inverse of an earlier commit
    Revert {
        /// Commit to undo
        revision: String,
    },

    /// Inspect or resolve merge conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Shelve and restore uncommitted changes
    Stash {
        /// push (default), pop, drop, clear, or list
        action: Option<String>,

        /// Include untracked tables in the stash
        #[arg(short = 'u', long)]
        include_untracked: bool,
    },

    /// Create, list, or delete tags
    Tag {
        /// Tag name; omit to list tags
        name: Option<String>,

        /// Commit to tag (defaults to HEAD)
        revision: Option<String>,

        /// Tag message
        #[arg(short, long)]
        message: Option<String>,

        /// Delete the named tag
        #[arg(short = 'd')]
        delete: bool,
    },

    /// Manage remote endpoints
    Remote {
        #[command(subcommand)]
        action: Option<RemoteAction>,
    },

    /// Publish the current branch to a remote
    Push {
        /// Remote name (defaults to the branch upstream)
        remote: Option<String>,

        /// Branch to push (defaults to the current branch)
        branch: Option<String>,

        /// Replace the remote ref even when it is not an ancestor
        #[arg(short, long)]
        force: bool,

        /// Record the remote as this branch's upstream
        #[arg(short = 'u', long)]
        set_upstream: bool,
    },

    /// Fetch from a remote, then fast-forward or merge
    Pull {
        remote: Option<String>,
        branch: Option<String>,

        /// Stop before creating the merge commit
        #[arg(long)]
        no_commit: bool,
    },

    /// Download remote branches into remote-tracking refs
    Fetch {
        remote: Option<String>,
    },

    /// List the tables in the working root
    Ls,

    /// Print rows of a system table, e.g. dolt_log
    Show {
        /// System table name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ConflictsAction {
    /// Print the conflicts recorded for a table
    Cat { table: String },

    /// Resolve conflicts by taking one side
    Resolve {
        /// Take the rows of the current branch
        #[arg(long)]
        ours: bool,

        /// Take the rows of the merged branch
        #[arg(long)]
        theirs: bool,

        /// Tables to resolve
        tables: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum RemoteAction {
    /// Add a remote
    Add { name: String, url: String },

    /// Remove a remote
    Remove { name: String },
}
