//! paywire server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) and
//! `PAYWIRE__*` environment variables, opens an in-process SQLite store,
//! connects the DIMOCO gateway and serves the JSON API over HTTP.
//!
//! # Admin token hash generation
//!
//! To generate the argon2 PHC string for `admin_token_hash`:
//!
//! ```
//! cargo run -p paywire-server -- --hash-token
//! ```

mod config;
mod pipeline;
mod worker;

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use paywire_api::AppState;
use paywire_dimoco::DimocoClient;
use paywire_store_sqlite::SqliteStore;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::{config::ServerConfig, pipeline::HttpPipeline};

#[derive(Parser)]
#[command(author, version, about = "paywire carrier-billing server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for an admin token entered on stdin and exit.
  #[arg(long)]
  hash_token: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a token and exit.
  if cli.hash_token {
    let token = read_stdin_line()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(token.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config).required(false))
    .add_source(
      ::config::Environment::with_prefix("PAYWIRE")
        .prefix_separator("__")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  if server_cfg.admin_token_hash.is_none() {
    warn!("admin_token_hash is not set; admin routes will answer 503");
  }
  if server_cfg.callback_secret.is_none() {
    warn!("callback_secret is not set; signed callbacks will be refused");
  }
  if server_cfg.dimoco.sandbox {
    warn!("DIMOCO sandbox mode is enabled");
  }

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let gateway =
    DimocoClient::new(server_cfg.dimoco.clone()).context("failed to build DIMOCO client")?;

  let classifier = server_cfg
    .classifier()
    .context("invalid extra_carrier_ranges")?;
  info!(ranges = classifier.ranges().len(), "carrier table loaded");

  let billing = server_cfg.billing_settings(classifier)?;
  let pipeline = HttpPipeline::new(
    server_cfg.pipeline_url.clone(),
    Duration::from_secs(server_cfg.pipeline_timeout_secs.max(1)),
  )
  .context("failed to build pipeline client")?;

  let state = AppState {
    store:    Arc::new(store),
    gateway:  Arc::new(gateway),
    pipeline: Arc::new(pipeline),
    settings: Arc::new(billing),
    config:   Arc::new(server_cfg.api_config()),
  };

  tokio::spawn(worker::run_outbox(
    state.store.clone(),
    state.settings.clone(),
    Duration::from_secs(server_cfg.outbox_poll_secs.max(1)),
  ));

  let app = paywire_api::router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

/// Read one line from stdin.
fn read_stdin_line() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Token: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
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

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    assert_eq!(expand_tilde(Path::new("~/x.db")), PathBuf::from(home).join("x.db"));
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }
}
