use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tiercache::cache::{CacheCoordinator, GetOptions, SetOptions, Tier};
use tiercache::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tiercache")]
#[command(about = "Inspect and maintain a tiered cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tiercache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the cached JSON value for a key
  Get {
    key: String,
    /// Start at the durable tier
    #[arg(long)]
    skip_memory: bool,
  },
  /// Store a JSON value under a key
  Set {
    key: String,
    value: String,
    /// TTL for every tier, e.g. "30s" or "2h" (default: per-tier config)
    #[arg(long, value_parser = parse_ttl)]
    ttl: Option<Duration>,
  },
  /// Remove a key from every tier
  Delete { key: String },
  /// Empty every tier
  Clear,
  /// Empty one tier
  ClearLevel { tier: Tier },
  /// Drop expired entries from every tier now
  Sweep,
}

fn parse_ttl(raw: &str) -> Result<Duration, String> {
  humantime_serde::re::humantime::parse_duration(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_stderr)?;

  let config = Config::load(args.config.as_deref())?;
  let cache = CacheCoordinator::new(config);

  match args.command {
    Command::Get { key, skip_memory } => {
      let hit = cache
        .lookup(&key, GetOptions { skip_memory })
        .await
        .ok_or_else(|| eyre!("{} is not cached", key))?;
      tracing::info!(key = %key, source = %hit.source, "cache hit");
      println!("{}", serde_json::to_string_pretty(&hit.value)?);
    }
    Command::Set { key, value, ttl } => {
      let value: serde_json::Value =
        serde_json::from_str(&value).map_err(|e| eyre!("Value is not valid JSON: {}", e))?;
      let options = ttl.map(SetOptions::ttl).unwrap_or_default();
      cache.set_value(&key, value, options).await;
    }
    Command::Delete { key } => cache.delete(&key).await,
    Command::Clear => cache.clear().await,
    Command::ClearLevel { tier } => cache.clear_level(tier).await,
    Command::Sweep => {
      for (tier, removed) in cache.sweep().await {
        println!("{}: {} removed", tier, removed);
      }
    }
  }

  Ok(())
}

/// Install the tracing subscriber. Filter comes from `TIERCACHE_LOG` (default `warn`).
fn init_logging(to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("TIERCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

  if to_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let dir = tiercache::db::data_dir()?;
  std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;
  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "tiercache.log"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Ok(Some(guard))
}
