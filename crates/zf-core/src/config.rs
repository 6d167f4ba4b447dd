//! Application configuration
//!
//! Loaded from `configs.toml` under the base directory, then overlaid with
//! `configs-<ENV>.toml` when the `ENV` environment variable is set. Every
//! field has a default so a missing file yields a usable config.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Base config file name
pub const CONFIG_FILE: &str = "configs.toml";

/// Environment variable selecting the overlay file
pub const ENV_VAR: &str = "ENV";

/// Framework configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Lookup root for request handlers
    pub handlers: String,
    /// Lookup root for helpers
    pub helpers: String,
    /// Lookup root for param handlers
    pub params: String,
    /// Application base directory, always the last include root
    pub basedir: PathBuf,
    /// Extra include roots searched before `basedir`
    pub include_paths: Vec<PathBuf>,
    pub debug: bool,
    pub pretty: bool,
    pub charset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handlers: "handlers".to_string(),
            helpers: "helpers".to_string(),
            params: "params".to_string(),
            basedir: PathBuf::from("."),
            include_paths: Vec::new(),
            debug: false,
            pretty: false,
            charset: "utf-8".to_string(),
        }
    }
}

impl Config {
    /// Load config for `basedir`, honoring the `ENV` overlay
    pub fn load(basedir: impl AsRef<Path>) -> Result<Self> {
        let env = std::env::var(ENV_VAR).ok().filter(|v| !v.is_empty());
        Self::load_with_env(basedir, env.as_deref())
    }

    /// Load config for `basedir` with an explicit overlay name
    pub fn load_with_env(basedir: impl AsRef<Path>, env: Option<&str>) -> Result<Self> {
        let basedir = basedir.as_ref();
        let mut merged = read_table(&basedir.join(CONFIG_FILE))?.unwrap_or_default();
        if let Some(env) = env {
            let overlay_path = basedir.join(format!("configs-{env}.toml"));
            if let Some(overlay) = read_table(&overlay_path)? {
                merge(&mut merged, overlay);
            }
        }
        if !merged.contains_key("basedir") {
            merged.insert(
                "basedir".to_string(),
                toml::Value::String(basedir.to_string_lossy().into_owned()),
            );
        }

        let config: Config = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))?;
        tracing::debug!(basedir = %config.basedir.display(), ?env, "configuration loaded");
        Ok(config)
    }

    /// Override a single key, e.g. `set("handlers", "controllers")`
    pub fn set(&mut self, key: &str, value: impl Into<toml::Value>) -> Result<()> {
        let mut table = match toml::Value::try_from(&*self) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(Error::Config("config is not a table".to_string())),
            Err(e) => return Err(Error::Config(e.to_string())),
        };
        table.insert(key.to_string(), value.into());
        *self = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(format!("{key}: {e}")))?;
        Ok(())
    }

    /// Roots a relative handler path is searched under, in order
    pub fn include_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.include_paths.clone();
        roots.push(self.basedir.clone());
        roots
    }
}

fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    content
        .parse::<toml::Table>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Recursive table merge, `overlay` wins
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
