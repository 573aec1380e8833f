//! `scd`: maintain SCD2 dimensions and enrich facts from the command line.
//!
//! Reads `scd.toml` (or the path given with `--config`), opens the SQLite
//! version store and runs one command. Row sets are JSON arrays read from
//! `--input` or stdin; results are JSON on stdout.
//!
//! ```text
//! scd refresh --table prod_dim --input prod_snapshot.json
//! scd join --input store_day_facts.json > enriched.json
//! scd history --table prod_dim
//! ```

mod settings;

use std::{
  io::{self, Read as _, Write as _},
  path::{Path, PathBuf},
};

use anyhow::{Context as _, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use scd_core::{
  pipeline::{RunReport, enrich_facts, refresh_dimension},
  record::{Attributes, FactRecord},
  schema::{TableKind, check_schema},
  store::DimensionStore,
  version::history_violations,
};
use scd_store_sqlite::SqliteStore;
use serde::{Serialize, de::DeserializeOwned};
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Slowly-changing dimension maintenance")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "scd.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Version a dimension snapshot and merge the delta into the store.
  Refresh {
    #[arg(long)]
    table:        TableKind,
    /// JSON array of attribute objects; stdin if omitted.
    #[arg(long)]
    input:        Option<PathBuf>,
    /// Processing timestamp for the whole run (RFC 3339); defaults to now.
    #[arg(long)]
    processed_at: Option<DateTime<Utc>>,
  },
  /// Attach point-in-time surrogate keys to facts.
  Join {
    /// JSON array of fact records; stdin if omitted.
    #[arg(long)]
    input: Option<PathBuf>,
  },
  /// Check rows against a table's data model without writing anything.
  Check {
    #[arg(long)]
    table: TableKind,
    #[arg(long)]
    input: Option<PathBuf>,
  },
  /// Print every version of a dimension.
  History {
    #[arg(long)]
    table:  TableKind,
    /// Fail if the history breaks a versioning invariant.
    #[arg(long)]
    verify: bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing. Logs go to stderr so stdout stays machine-readable.
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  match cli.command {
    Command::Refresh { table, input, processed_at } => {
      let rows: Vec<Attributes> = read_json(input.as_deref())?;
      // One timestamp for the whole run, taken before any row is touched.
      let processed_at = processed_at.unwrap_or_else(Utc::now);
      let report = refresh(&settings, table, rows, processed_at).await?;
      print_json(&report)?;
    }
    Command::Join { input } => {
      let facts: Vec<FactRecord> = read_json(input.as_deref())?;
      let store = open_store(&settings).await?;
      let enriched = enrich_facts(&store, facts).await?;
      print_json(&enriched)?;
    }
    Command::Check { table, input } => {
      let rows: Vec<Attributes> = read_json(input.as_deref())?;
      let report = check_schema(table, &rows);
      print_json(&report)?;
      if !report.passed {
        bail!("{table} rows do not match the data model");
      }
    }
    Command::History { table, verify } => {
      let store = open_store(&settings).await?;
      let history = store.history(table).await?;
      if verify {
        let violations = history_violations(&history);
        if !violations.is_empty() {
          bail!("{table} history is inconsistent: {violations:?}");
        }
      }
      print_json(&history)?;
    }
  }

  Ok(())
}

/// Check `rows` (unless disabled) and refresh `table`. A failed check
/// returns before the store is opened.
async fn refresh(
  settings: &Settings,
  table: TableKind,
  rows: Vec<Attributes>,
  processed_at: DateTime<Utc>,
) -> anyhow::Result<RunReport> {
  let config = settings.dimension(table)?;
  if settings.check_schema {
    check_schema(table, &rows).into_result(table)?;
  }
  let store = open_store(settings).await?;
  Ok(refresh_dimension(&store, &config, rows, processed_at).await?)
}

async fn open_store(settings: &Settings) -> anyhow::Result<SqliteStore> {
  let store_path = settings.store_path();
  SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))
}

/// Read a JSON document from `path`, or stdin when `None`.
fn read_json<T: DeserializeOwned>(path: Option<&Path>) -> anyhow::Result<T> {
  let raw = match path {
    Some(p) => std::fs::read_to_string(p)
      .with_context(|| format!("reading {}", p.display()))?,
    None => {
      let mut buf = String::new();
      io::stdin().read_to_string(&mut buf).context("reading stdin")?;
      buf
    }
  };
  serde_json::from_str(&raw).context("parsing input JSON")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let mut out = io::stdout().lock();
  serde_json::to_writer_pretty(&mut out, value)?;
  writeln!(out)?;
  Ok(())
}
