// src/config.rs

//! Layered configuration
//!
//! Repo-local values (`.dolt/config.json`) shadow the global file,
//! which lives under `DOLT_ROOT_PATH` when set and the platform config
//! directory otherwise. Keys are flat dotted strings and match
//! case-insensitively; boolean values accept any casing of
//! true/false/1/0.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const USER_NAME: &str = "user.name";
pub const USER_EMAIL: &str = "user.email";
pub const INIT_DEFAULT_BRANCH: &str = "init.defaultbranch";
pub const PUSH_AUTO_SETUP_REMOTE: &str = "push.autosetupremote";
pub const METRICS_DISABLED: &str = "metrics.disabled";

/// Environment override for the per-user config directory
pub const ENV_ROOT_PATH: &str = "DOLT_ROOT_PATH";
/// Environment override for the storage format
pub const ENV_BIN_FORMAT: &str = "DOLT_DEFAULT_BIN_FORMAT";

/// The one storage format this build reads and writes
pub const STORE_FORMAT: &str = "dolt_prolly_1";

const GLOBAL_FILE: &str = "config_global.json";
const LOCAL_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Local,
    Global,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    values: BTreeMap<String, String>,
}

/// Layered view of global and repo-local configuration
#[derive(Debug, Default)]
pub struct Config {
    global_path: Option<PathBuf>,
    local_path: Option<PathBuf>,
    global: BTreeMap<String, String>,
    local: BTreeMap<String, String>,
}

/// Where the global config file lives, honoring `DOLT_ROOT_PATH`
pub fn global_config_dir(doltcfg_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = doltcfg_dir {
        return Some(dir.to_path_buf());
    }
    if let Ok(root) = std::env::var(ENV_ROOT_PATH) {
        if !root.is_empty() {
            return Some(PathBuf::from(root).join(".dolt"));
        }
    }
    dirs::config_dir().map(|d| d.join("dolt"))
}

/// Validate `DOLT_DEFAULT_BIN_FORMAT` against the supported format
pub fn check_bin_format() -> Result<()> {
    match std::env::var(ENV_BIN_FORMAT) {
        Ok(format) if !format.is_empty() && format != STORE_FORMAT => Err(Error::Config(format!(
            "unsupported storage format '{}'; this build supports '{}'",
            format, STORE_FORMAT
        ))),
        _ => Ok(()),
    }
}

fn read_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path)?;
    let file: ConfigFile = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(file
        .values
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect())
}

fn write_file(path: &Path, values: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = ConfigFile {
        values: values.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&file)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    fs::write(path, bytes)?;
    Ok(())
}

impl Config {
    /// Load the layered config. `dolt_dir` is the repo's `.dolt/`
    /// directory when inside a repository.
    pub fn load(dolt_dir: Option<&Path>, doltcfg_dir: Option<&Path>) -> Result<Config> {
        let global_path = global_config_dir(doltcfg_dir).map(|d| d.join(GLOBAL_FILE));
        let local_path = dolt_dir.map(|d| d.join(LOCAL_FILE));
        let global = match &global_path {
            Some(path) => read_file(path)?,
            None => BTreeMap::new(),
        };
        let local = match &local_path {
            Some(path) => read_file(path)?,
            None => BTreeMap::new(),
        };
        debug!(
            global = global.len(),
            local = local.len(),
            "loaded configuration"
        );
        Ok(Config {
            global_path,
            local_path,
            global,
            local,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.local
            .get(&key)
            .or_else(|| self.global.get(&key))
            .map(String::as_str)
    }

    /// Boolean keys parse case-insensitively
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_lowercase).as_deref(),
            Some("true") | Some("1")
        )
    }

    pub fn set(&mut self, scope: ConfigScope, key: &str, value: &str) -> Result<()> {
        let key = key.to_lowercase();
        match scope {
            ConfigScope::Local => {
                let path = self
                    .local_path
                    .clone()
                    .ok_or_else(|| Error::Config("not inside a repository".to_string()))?;
                self.local.insert(key, value.to_string());
                write_file(&path, &self.local)
            }
            ConfigScope::Global => {
                let path = self
                    .global_path
                    .clone()
                    .ok_or_else(|| Error::Config("no global config directory".to_string()))?;
                self.global.insert(key, value.to_string());
                write_file(&path, &self.global)
            }
        }
    }

    pub fn unset(&mut self, scope: ConfigScope, key: &str) -> Result<()> {
        let key = key.to_lowercase();
        match scope {
            ConfigScope::Local => {
                let path = self
                    .local_path
                    .clone()
                    .ok_or_else(|| Error::Config("not inside a repository".to_string()))?;
                self.local.remove(&key);
                write_file(&path, &self.local)
            }
            ConfigScope::Global => {
                let path = self
                    .global_path
                    .clone()
                    .ok_or_else(|| Error::Config("no global config directory".to_string()))?;
                self.global.remove(&key);
                write_file(&path, &self.global)
            }
        }
    }

    /// Every visible key, local shadowing global
    pub fn entries(&self) -> BTreeMap<String, String> {
        let mut out = self.global.clone();
        out.extend(self.local.clone());
        out
    }

    /// The committer identity, required for commits
    pub fn committer(&self) -> Result<(String, String)> {
        let name = self
            .get(USER_NAME)
            .ok_or_else(|| {
                Error::Config("user.name not configured; run dolt config user.name <name>".to_string())
            })?
            .to_string();
        let email = self
            .get(USER_EMAIL)
            .ok_or_else(|| {
                Error::Config(
                    "user.email not configured; run dolt config user.email <email>".to_string(),
                )
            })?
            .to_string();
        Ok((name, email))
    }

    pub fn default_branch(&self) -> String {
        self.get(INIT_DEFAULT_BRANCH).unwrap_or("main").to_string()
    }

    pub fn remote_url(&self, remote: &str) -> Option<String> {
        self.get(&format!("remote.{}.url", remote)).map(String::from)
    }

    pub fn set_remote(&mut self, remote: &str, url: &str) -> Result<()> {
        self.set(ConfigScope::Local, &format!("remote.{}.url", remote), url)
    }

    pub fn remove_remote(&mut self, remote: &str) -> Result<()> {
        self.unset(ConfigScope::Local, &format!("remote.{}.url", remote))
    }

    /// All configured remotes, name → url
    pub fn remotes(&self) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("remote.")
                    .and_then(|rest| rest.strip_suffix(".url"))
                    .map(|name| (name.to_string(), value))
            })
            .collect()
    }
}
