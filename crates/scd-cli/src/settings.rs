//! Runtime configuration, layered from an optional TOML file and `SCD_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use scd_core::{
  config::{DimensionConfig, DimensionSettings},
  schema::TableKind,
};
use serde::Deserialize;

fn default_store_path() -> PathBuf { PathBuf::from("scd.db") }

fn default_true() -> bool { true }

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
  /// SQLite file holding every dimension's versions. `~` is expanded.
  #[serde(default = "default_store_path")]
  pub store_path:   PathBuf,
  /// Run the blocking schema check on incoming rows before refreshing.
  #[serde(default = "default_true")]
  pub check_schema: bool,
  #[serde(default)]
  pub dimensions:   Vec<DimensionSettings>,
}

impl Settings {
  /// Read `path` (if it exists) and overlay `SCD_*` variables, e.g.
  /// `SCD_STORE_PATH=/tmp/x.db`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("SCD")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise Settings")
  }

  /// The validated configuration of `table`.
  pub fn dimension(&self, table: TableKind) -> anyhow::Result<DimensionConfig> {
    let raw = self
      .dimensions
      .iter()
      .find(|d| d.table == table)
      .cloned()
      .ok_or_else(|| anyhow!("no [[dimensions]] entry for {table}"))?;
    DimensionConfig::try_from(raw).with_context(|| format!("invalid config for {table}"))
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
