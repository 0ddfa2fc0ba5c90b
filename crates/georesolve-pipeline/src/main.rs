//! georesolve command-line driver.
//!
//! Reads `georesolve.toml` (or the path given with `--config`) layered under
//! `GEORESOLVE_*` environment variables, opens the SQLite store and runs one
//! stage. Reports are printed to stdout as JSON; logs go to stderr.
//!
//! A typical first load:
//!
//! ```text
//! georesolve load-geography states.csv --level state
//! georesolve load-geography counties.csv --level county
//! georesolve import-crosswalk zip_county.csv --relation zip_county --scale auto
//! georesolve import-markets zillow.csv --source zillow
//! georesolve run
//! ```

use std::{
  fs::File,
  io::BufReader,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use georesolve_core::{
  crosswalk::{OverlapScale, RelationType},
  geography::GeoLevel,
  store::GeoStore,
};
use georesolve_ingest::SourceKind;
use georesolve_pipeline::{Pipeline, PipelineConfig};
use georesolve_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Geographic entity resolution and hierarchy builder")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "georesolve.toml")]
  config: PathBuf,

  /// Override the store path from the configuration.
  #[arg(long, env = "GEORESOLVE_STORE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Upsert canonical geography units from a CSV file.
  LoadGeography {
    file:  PathBuf,
    /// Level for rows without a level column.
    #[arg(long)]
    level: Option<GeoLevel>,
  },
  /// Upsert markets from a source CSV file.
  ImportMarkets {
    file:   PathBuf,
    #[arg(long, default_value = "generic")]
    source: SourceKind,
  },
  /// Import an overlap table for one child → parent relation.
  ImportCrosswalk {
    file:          PathBuf,
    /// e.g. `zip_county`.
    #[arg(long)]
    relation:      RelationType,
    /// Scale for rows without a scale column: `auto`, `percentage` or `fraction`.
    #[arg(long, default_value = "auto")]
    scale:         OverlapScale,
    #[arg(long)]
    child_column:  Option<String>,
    #[arg(long)]
    parent_column: Option<String>,
    #[arg(long)]
    value_column:  Option<String>,
    #[arg(long)]
    scale_column:  Option<String>,
  },
  /// Derive county→state, place→state and state→nation crosswalk edges.
  DeriveStructural,
  /// Link markets to canonical units.
  Resolve,
  /// Derive hierarchy edges between linked markets.
  Build,
  /// derive-structural, resolve and build in sequence.
  Run,
  /// Traverse the hierarchy.
  Query {
    #[command(subcommand)]
    query: Query,
  },
  /// List recorded batch failures.
  Failures {
    #[arg(long)]
    run_id: Option<Uuid>,
  },
}

#[derive(Subcommand)]
enum Query {
  Children {
    region_id: String,
    #[arg(long)]
    level:     Option<GeoLevel>,
    /// Print the edges, with overlap and origin, instead of the markets.
    #[arg(long)]
    edges:     bool,
  },
  Parents {
    region_id: String,
    #[arg(long)]
    level:     Option<GeoLevel>,
    /// Print the edges, with overlap and origin, instead of the markets.
    #[arg(long)]
    edges:     bool,
  },
  /// Primary ancestors, child to root.
  Chain { region_id: String },
  /// Every ancestor chain.
  Path { region_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("GEORESOLVE").separator("__"))
    .build()
    .context("failed to read config file")?;
  let mut cfg: PipelineConfig = settings
    .try_deserialize()
    .context("failed to deserialise PipelineConfig")?;
  if let Some(path) = cli.store {
    cfg.store_path = path;
  }

  if let Command::ImportCrosswalk { child_column, parent_column, value_column, scale_column, .. } =
    &cli.command
  {
    let columns = &mut cfg.crosswalk_columns;
    if let Some(c) = child_column {
      columns.child = c.clone();
    }
    if let Some(c) = parent_column {
      columns.parent = c.clone();
    }
    if let Some(c) = value_column {
      columns.value = c.clone();
    }
    if let Some(c) = scale_column {
      columns.scale = Some(c.clone());
    }
  }

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let pipeline = Pipeline::new(store, cfg);

  match cli.command {
    Command::LoadGeography { file, level } => {
      let report = pipeline.load_geography_csv(open(&file)?, level).await?;
      print(&report)
    }
    Command::ImportMarkets { file, source } => {
      let report = pipeline.import_markets_csv(source, open(&file)?).await?;
      print(&report)
    }
    Command::ImportCrosswalk { file, relation, scale, .. } => {
      let report = pipeline.import_crosswalk_csv(relation, open(&file)?, scale).await?;
      print(&report)
    }
    Command::DeriveStructural => print(&pipeline.derive_structural().await?),
    Command::Resolve => print(&pipeline.resolve_links().await?),
    Command::Build => print(&pipeline.build_hierarchy().await?),
    Command::Run => {
      let structural = pipeline.derive_structural().await?;
      let links = pipeline.resolve_links().await?;
      let hierarchy = pipeline.build_hierarchy().await?;
      print(&serde_json::json!({
        "structural": structural,
        "links": links,
        "hierarchy": hierarchy,
      }))
    }
    Command::Query { query } => match query {
      Query::Children { region_id, level, edges: true } => {
        print(&pipeline.children_edges(&region_id, level).await?)
      }
      Query::Children { region_id, level, edges: false } => {
        print(&pipeline.children(&region_id, level).await?)
      }
      Query::Parents { region_id, level, edges: true } => {
        print(&pipeline.parents_edges(&region_id, level).await?)
      }
      Query::Parents { region_id, level, edges: false } => {
        print(&pipeline.parents(&region_id, level).await?)
      }
      Query::Chain { region_id } => print(&pipeline.primary_chain(&region_id).await?),
      Query::Path { region_id } => print(&pipeline.full_path(&region_id).await?),
    },
    Command::Failures { run_id } => {
      let failures = pipeline
        .store()
        .list_batch_failures(run_id)
        .await
        .context("failed to list batch failures")?;
      print(&failures)
    }
  }
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
  let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
  Ok(BufReader::new(file))
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("failed to serialise report")?;
  println!("{json}");
  Ok(())
}
