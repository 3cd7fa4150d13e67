//! The `tenure` binary: manage subscriptions in a local SQLite store.
//!
//! # Usage
//!
//! ```text
//! tenure create --plan pro.json --customer 6f1c…
//! tenure edit <ID> --patches patches.json
//! tenure cancel <ID> --at 2025-01-01T00:00:00Z
//! tenure show <ID>
//! ```
//!
//! Configuration is read from `tenure.toml` (or `--config`) and `TENURE_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, de::DeserializeOwned};
use tenure_core::{
  plan::Plan,
  spec::{CustomerInput, Specification},
  state::SubscriptionStatus,
  store::SubscriptionStore as _,
};
use tenure_patch::Patch;
use tenure_store_sqlite::SqliteStore;
use tenure_sync::SubscriptionService;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Subscription lifecycle engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tenure.toml")]
  config: PathBuf,

  /// Evaluate the command as of this instant instead of the wall clock.
  #[arg(long, global = true, value_name = "RFC3339")]
  now: Option<DateTime<Utc>>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create a subscription from a plan file.
  Create {
    /// JSON plan definition.
    #[arg(long)]
    plan:     PathBuf,
    #[arg(long)]
    customer: Uuid,
    /// Subscription start; defaults to now.
    #[arg(long)]
    from:     Option<DateTime<Utc>>,
    /// Overrides the plan name.
    #[arg(long)]
    name:     Option<String>,
  },
  /// Apply a JSON array of `{op, path, value}` patches.
  Edit {
    id:      Uuid,
    #[arg(long)]
    patches: PathBuf,
  },
  /// Print a subscription as JSON.
  Show { id: Uuid },
  /// List subscriptions with their status.
  List {
    #[arg(long)]
    customer: Option<Uuid>,
  },
  /// End a subscription; defaults to now.
  Cancel {
    id: Uuid,
    #[arg(long)]
    at: Option<DateTime<Utc>>,
  },
  /// Undo a scheduled cancellation.
  Continue { id: Uuid },
  /// Delete a subscription that has not started.
  Delete { id: Uuid },
  /// Print the patch log of a subscription.
  Log { id: Uuid },
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Config {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/tenure/tenure.db") }

fn load_config(path: &Path) -> Result<Config> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("TENURE"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise Config")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = load_config(&cli.config)?;

  let store_path = expand_tilde(&config.store_path);
  if let Some(parent) = store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let service = SubscriptionService::new(store);

  let now = cli.now.unwrap_or_else(Utc::now);
  run(&service, cli.command, now).await
}

async fn run(
  service: &SubscriptionService<SqliteStore>,
  command: Command,
  now: DateTime<Utc>,
) -> Result<()> {
  match command {
    Command::Create { plan, customer, from, name } => {
      let plan: Plan = read_json(&plan)?;
      let spec = Specification::from_plan(&plan, CustomerInput {
        customer_id: customer,
        active_from: from.unwrap_or(now),
        name,
        billing_anchor: None,
      })?;
      let view = service.create(spec).await?;
      println!("{}", view.id());
    }
    Command::Edit { id, patches } => {
      let patches: Vec<Patch> = read_json(&patches)?;
      let view = service.edit(id, &patches, now).await?;
      print_json(&view)?;
    }
    Command::Show { id } => print_json(&service.view(id).await?)?,
    Command::List { customer } => {
      for subscription in service.store().list_subscriptions(customer).await? {
        let record = &subscription.value;
        let status = SubscriptionStatus::at(&record.cadence(), now);
        println!("{}\t{}\t{}\t{status}", subscription.id, record.customer_id, record.name);
      }
    }
    Command::Cancel { id, at } => {
      let view = service.cancel(id, at.unwrap_or(now), now).await?;
      print_json(&view)?;
    }
    Command::Continue { id } => print_json(&service.resume(id, now).await?)?,
    Command::Delete { id } => service.delete(id, now).await?,
    Command::Log { id } => {
      for entry in service.store().patch_log(id).await? {
        println!(
          "{}\t{}#{}\t{} {}\t{}",
          entry.applied_at, entry.batch_id, entry.batch_index, entry.op, entry.path, entry.value
        );
      }
    }
  }
  Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
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
