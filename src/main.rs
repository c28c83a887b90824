use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use harbor::cache::SqliteStorage;
use harbor::config::{self, Config};
use harbor::logging;
use harbor::net::{Destination, ReqwestFetcher, Request};
use harbor::notify::LogSink;
use harbor::server::{self, AppState, AppWorker};

#[derive(Parser, Debug)]
#[command(name = "harbor")]
#[command(about = "Offline-resilient request interception cache proxy")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./harbor.yaml or $XDG_CONFIG_HOME/harbor/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database location (overrides cache.path)
  #[arg(long)]
  cache_db: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured cache generation and serve requests (default)
  Serve {
    /// Address to listen on (overrides server.listen)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
  },
  /// Seed the configured cache generation and activate it
  Install,
  /// Intercept a single request and write the body to stdout
  Fetch {
    url: String,
    /// Destination tag, e.g. document, script, image
    #[arg(short, long, default_value = "other")]
    destination: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
  },
  /// List cache generations
  Generations,
  /// Run the background sync task once
  Sync {
    /// Sync tag (defaults to sync.tag)
    tag: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override cache location if specified on command line
  if let Some(path) = args.cache_db {
    config.cache.path = Some(path);
  }

  let _log_guard = logging::init_logging(&config::data_dir()?.join("logs"))
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  let storage = Arc::new(SqliteStorage::open(config.cache.path.as_deref())?);
  let fetcher = Arc::new(ReqwestFetcher::new()?);
  let worker: Arc<AppWorker> = Arc::new(AppWorker::new(&config, storage, fetcher, LogSink)?);

  match args.command.unwrap_or(Command::Serve { listen: None }) {
    Command::Serve { listen } => {
      // A failed install keeps the previous generation serving
      if let Err(e) = worker.on_install().await {
        error!(error = %e, "install failed, continuing with the previous cache generation");
      }

      let state = AppState {
        worker,
        origin: config.origin.clone(),
      };
      server::serve(state, listen.unwrap_or(config.server.listen)).await?;
    }
    Command::Install => {
      let phase = worker.on_install().await?;
      info!(?phase, "install finished");
      for key in worker.active_keys()? {
        println!("{}", key);
      }
    }
    Command::Fetch {
      url,
      destination,
      method,
    } => {
      let request = Request::get(config.resolve(&url)?)
        .with_method(&method)
        .with_destination(Destination::parse(&destination));
      let served = worker.intercept(request).await;

      eprintln!(
        "{} ({:?}, {})",
        served.response.status,
        served.class,
        served.source.as_str()
      );
      std::io::stdout()
        .write_all(&served.response.body)
        .map_err(|e| eyre!("Failed to write response body: {}", e))?;
    }
    Command::Generations => {
      for generation in worker.generations()? {
        let marker = if generation.active { "*" } else { " " };
        println!(
          "{} {}  {} entries  created {}",
          marker, generation.label, generation.entries, generation.created_at
        );
      }
    }
    Command::Sync { tag } => {
      let mut rx = worker.subscribe();
      let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
      let outcome = worker.on_sync_trigger(&tag).await;

      while let Ok(message) = rx.try_recv() {
        println!(
          "{}",
          serde_json::to_string(&message).map_err(|e| eyre!("Failed to encode event: {}", e))?
        );
      }
      info!(?outcome, "sync finished");
    }
  }

  Ok(())
}
