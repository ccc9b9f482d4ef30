//! clinisync-stub server binary.
//!
//! Serves the stub backend with demo data so the `clinisync` CLI has
//! something to talk to:
//!
//! ```
//! cargo run -p clinisync-stub -- --port 8000
//! ```

use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use clinisync_core::notification::Priority;
use clinisync_stub::{StubState, seed};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Clinisync stub backend")]
struct Cli {
  #[arg(long, default_value = "127.0.0.1", env = "CLINISYNC_STUB_HOST")]
  host: String,

  #[arg(short, long, default_value_t = 8000, env = "CLINISYNC_STUB_PORT")]
  port: u16,

  /// Push a synthetic notification every N seconds. 0 disables.
  #[arg(long, default_value_t = 0)]
  push_every: u64,
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
  let state = StubState::seeded();

  if cli.push_every > 0 {
    tokio::spawn(push_loop(state.clone(), Duration::from_secs(cli.push_every)));
  }

  let app = clinisync_stub::router(state);
  let address = format!("{}:{}", cli.host, cli.port);

  tracing::info!("Listening on http://{address} (push on ws://{address}/ws)");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

async fn push_loop(state: StubState, every: Duration) {
  let mut ticker = tokio::time::interval(every);
  ticker.tick().await;
  for n in 1.. {
    ticker.tick().await;
    let priorities = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];
    let mut notification =
      seed::notification(&format!("live-{n}"), priorities[n % priorities.len()], 0);
    notification.title = Some(format!("Live notification #{n}"));
    tracing::info!(id = %notification.id, "pushing notification");
    state.push_notification(notification);
  }
}
