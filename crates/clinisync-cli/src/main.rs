//! `clinisync`: command-line client for the notification inbox and the lead
//! workflow.
//!
//! # Usage
//!
//! ```
//! clinisync --url http://localhost:8000 --tenant demo count
//! clinisync --config ~/.config/clinisync.toml set-status 101 won -m "signed"
//! clinisync watch
//! ```
//!
//! Settings come from the config file, then `CLINISYNC_*` environment
//! variables (`CLINISYNC_BASE_URL`, `CLINISYNC_TENANT_ID`, ...), then flags.

mod output;

use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clinisync_core::{Id, lead::StatusChange};
use clinisync_sync::{
  LeadQuery, LeadWorkflow, ListOptions, NotificationSync, SyncSettings, ViewScope,
};
use clinisync_transport::{ClientConfig, ClientTransport};
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_CONFIG: &str = "clinisync.toml";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "clinisync", version, about = "CRM notification and lead workflow client")]
struct Args {
  /// Path to a TOML config file. `./clinisync.toml` is read when present.
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// API root (default: http://127.0.0.1:8000).
  #[arg(long)]
  url: Option<String>,

  /// Tenant whose lead statuses apply.
  #[arg(long)]
  tenant: Option<String>,

  /// User id sent with push-channel commands.
  #[arg(long)]
  user: Option<String>,

  /// Extra identity header, `NAME=VALUE`. Repeatable.
  #[arg(short = 'H', long = "header", value_name = "NAME=VALUE")]
  headers: Vec<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Unread notification counts by priority.
  Count,
  /// List notifications, newest first.
  Inbox {
    #[arg(long)]
    unread: bool,
    #[arg(short, long, default_value_t = 20)]
    limit:  usize,
  },
  /// Mark one notification read.
  Read { id: String },
  /// Mark every notification read.
  ReadAll,
  /// Follow the inbox live until Ctrl-C.
  Watch,
  /// Lead statuses configured for the tenant.
  Statuses {
    #[arg(long)]
    include_inactive: bool,
  },
  /// List leads.
  Leads {
    #[arg(long)]
    status: Option<String>,
    #[arg(short, long, default_value_t = 50)]
    limit:  usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
  },
  /// Moves currently allowed for a lead.
  Transitions { lead: String },
  /// Status history of a lead, newest first.
  History {
    lead:   String,
    #[arg(short, long, default_value_t = 20)]
    limit:  usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
  },
  /// Move a lead to another status.
  SetStatus {
    lead:    String,
    status:  String,
    #[arg(short = 'm', long)]
    comment: Option<String>,
  },
  /// Move several leads to one status.
  BulkStatus {
    status:  String,
    #[arg(required = true)]
    leads:   Vec<String>,
    #[arg(short = 'm', long)]
    comment: Option<String>,
  },
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Layer file, environment and flags into a [`ClientConfig`].
fn load_config(args: &Args) -> Result<ClientConfig> {
  let path = args
    .config
    .clone()
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

  let settings = config::Config::builder()
    .set_default("base_url", DEFAULT_URL)?
    .add_source(config::File::from(path).required(args.config.is_some()))
    .add_source(config::Environment::with_prefix("CLINISYNC").try_parsing(true))
    .set_override_option("base_url", args.url.clone())?
    .set_override_option("tenant_id", args.tenant.clone())?
    .set_override_option("user_id", args.user.clone())?
    .build()
    .context("failed to read configuration")?;

  let mut config: ClientConfig = settings
    .try_deserialize()
    .context("failed to deserialise ClientConfig")?;

  for raw in &args.headers {
    let (name, value) = raw
      .split_once('=')
      .with_context(|| format!("header {raw:?} is not NAME=VALUE"))?;
    config
      .identity_headers
      .insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
  }
  Ok(config)
}

fn tenant(config: &ClientConfig) -> Result<Id> {
  config
    .tenant_id
    .clone()
    .map(Id::from)
    .context("no tenant configured; pass --tenant or set CLINISYNC_TENANT_ID")
}

fn sync_settings(config: &ClientConfig) -> SyncSettings {
  SyncSettings {
    poll_interval: config.poll_interval(),
    user_id: config.user_id.clone().map(Id::from),
    ..SyncSettings::default()
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();
  let config = load_config(&args)?;

  let transport = Arc::new(
    ClientTransport::http_only(&config)
      .with_context(|| format!("invalid API url {}", config.base_url))?,
  );
  run(args.command, &config, transport).await
}

async fn run(command: Command, config: &ClientConfig, transport: Arc<ClientTransport>) -> Result<()> {
  match command {
    Command::Count => {
      let sync = NotificationSync::new(transport, sync_settings(config));
      let count = sync.get_count().await.context("fetching notification count")?;
      println!("{}", output::count(&count));
    }
    Command::Inbox { unread, limit } => {
      let sync = NotificationSync::new(transport, sync_settings(config));
      let options = ListOptions {
        unread_only: unread,
        limit,
      };
      let list = sync.list(options).await.context("fetching notifications")?;
      if list.is_empty() {
        println!("(no notifications)");
      }
      for n in &list {
        println!("{}", output::notification(n));
      }
    }
    Command::Read { id } => {
      let sync = NotificationSync::new(transport, sync_settings(config));
      sync
        .mark_read(&Id::from(id.clone()))
        .await
        .with_context(|| format!("marking {id} read"))?;
      println!("marked {id} read");
    }
    Command::ReadAll => {
      let sync = NotificationSync::new(transport, sync_settings(config));
      sync.mark_all_read().await.context("marking all read")?;
      println!("marked all read");
    }
    Command::Watch => watch(config).await?,
    Command::Statuses { include_inactive } => {
      let tenant = tenant(config)?;
      let workflow = LeadWorkflow::new(transport, tenant.clone());
      let statuses = workflow
        .get_statuses(&tenant, include_inactive)
        .await
        .context("fetching lead statuses")?;
      for status in &statuses {
        println!("{}", output::status(status));
      }
    }
    Command::Leads {
      status,
      limit,
      offset,
    } => {
      let workflow = LeadWorkflow::new(transport, tenant(config)?);
      let query = LeadQuery {
        status,
        limit,
        offset,
      };
      for lead in workflow.list_leads(&query).await.context("fetching leads")? {
        println!("{}", output::lead(&lead));
      }
    }
    Command::Transitions { lead } => {
      let workflow = LeadWorkflow::new(transport, tenant(config)?);
      let transitions = workflow
        .get_transitions(&Id::from(lead.clone()))
        .await
        .with_context(|| format!("fetching transitions for lead {lead}"))?;
      if transitions.is_empty() {
        println!("(no moves available)");
      }
      for t in &transitions {
        println!("{}", output::transition(t));
      }
    }
    Command::History {
      lead,
      limit,
      offset,
    } => {
      let workflow = LeadWorkflow::new(transport, tenant(config)?);
      let history = workflow
        .get_history(&Id::from(lead.clone()), limit, offset)
        .await
        .with_context(|| format!("fetching history for lead {lead}"))?;
      for item in &history {
        println!("{}", output::history(item));
      }
    }
    Command::SetStatus {
      lead,
      status,
      comment,
    } => {
      let workflow = LeadWorkflow::new(transport, tenant(config)?);
      let id = Id::from(lead.clone());
      let mut change = StatusChange::new(status.clone());
      if let Some(comment) = comment {
        change = change.with_comment(comment);
      }
      workflow
        .change_status(&id, change)
        .await
        .with_context(|| format!("moving lead {lead} to {status}"))?;
      let updated = workflow.get_lead(&id).await.context("re-reading lead")?;
      println!("{}", output::lead(&updated));
    }
    Command::BulkStatus {
      status,
      leads,
      comment,
    } => {
      let workflow = LeadWorkflow::new(transport, tenant(config)?);
      let ids: Vec<Id> = leads.into_iter().map(Id::from).collect();
      let outcome = workflow
        .bulk_change_status(&ids, &status, comment.as_deref())
        .await
        .with_context(|| format!("moving {} leads to {status}", ids.len()))?;
      println!("{} moved, {} failed", outcome.successful, outcome.failed);
    }
  }
  Ok(())
}

// ─── Watch ────────────────────────────────────────────────────────────────────

async fn watch(config: &ClientConfig) -> Result<()> {
  let transport = Arc::new(
    ClientTransport::connect(config)
      .with_context(|| format!("invalid API url {}", config.base_url))?,
  );
  let sync = NotificationSync::new(transport.clone(), sync_settings(config));

  let mut seen = HashSet::new();
  match sync.list(ListOptions::default()).await {
    Ok(list) => {
      for n in list.iter().rev() {
        seen.insert(n.id.clone());
        println!("{}", output::notification(n));
      }
    }
    Err(e) => warn!(error = %e, "initial inbox load failed"),
  }

  let scope = ViewScope::new();
  sync.start(&scope);

  let mut mode = sync.watch_mode();
  let mut ticker = tokio::time::interval(Duration::from_millis(500));
  let mut last_count = None;
  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      changed = mode.changed() => {
        if changed.is_err() {
          break;
        }
        let current = *mode.borrow_and_update();
        println!("-- {current}");
      }
      _ = ticker.tick() => {
        for n in sync.recent().iter().rev() {
          if seen.insert(n.id.clone()) {
            println!("{}", output::notification(n));
          }
        }
        let state = sync.count_state();
        if let Some(count) = state.data.filter(|c| Some(*c) != last_count) {
          println!("{}", output::count(&count));
          last_count = Some(count);
        }
      }
    }
  }

  scope.close();
  // Let the driver send its unsubscribe before the socket goes away.
  tokio::time::sleep(Duration::from_millis(100)).await;
  transport.shutdown();
  Ok(())
}
