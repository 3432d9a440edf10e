//! realmsync - joins a realm and follows its state from the terminal.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use realmsync_client::config::{ENV_API_URL, ENV_HOST, ENV_HUB_URL};
use realmsync_client::logging::{init_tracing, DEFAULT_FILTER};
use realmsync_client::{
    log_error, log_info, log_warn, ApiClient, ClientConfig, ConnectionManager, CredentialStore,
    ProfileStore, SessionFactory, Storage, WsTransportBuilder,
};

#[derive(Parser, Debug)]
#[command(name = "realmsync")]
#[command(about = "Join a realm session and mirror its state")]
struct Cli {
    /// Session code of the realm to join
    #[arg(short, long, env = "REALMSYNC_SESSION")]
    session: String,

    /// Realm host; derives the hub and API URLs
    #[arg(long, env = "REALMSYNC_HOST")]
    host: Option<String>,

    /// Hub WebSocket URL (overrides --host)
    #[arg(long, env = "REALMSYNC_HUB_URL")]
    hub_url: Option<String>,

    /// API base URL (overrides --host)
    #[arg(long, env = "REALMSYNC_API_URL")]
    api_url: Option<String>,

    /// Client id to attribute commands to (defaults to the stored one)
    #[arg(long)]
    client_id: Option<String>,

    /// Display name to join with; saved to the profile
    #[arg(long)]
    name: Option<String>,
}

impl Cli {
    /// Flags win over the environment; clap already folds the env vars in
    fn config(&self) -> ClientConfig {
        ClientConfig::from_lookup(|key| match key {
            ENV_HOST => self.host.clone(),
            ENV_HUB_URL => self.hub_url.clone(),
            ENV_API_URL => self.api_url.clone(),
            other => std::env::var(other).ok(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(DEFAULT_FILTER);
    let cli = Cli::parse();

    let config = cli.config();
    config.validate()?;
    log_info!("hub {} / api {}", config.hub_url, config.api_base_url);

    let storage = Storage::open_default().context("opening client storage")?;
    let profiles = ProfileStore::new(storage.clone());
    let credentials = CredentialStore::open(storage).context("opening credential store")?;

    if let Some(name) = &cli.name {
        let mut profile = profiles.load()?;
        profile.display_name = Some(name.clone());
        profiles.save(&profile)?;
    }

    let client_id = match &cli.client_id {
        Some(id) => id.clone(),
        None => profiles.client_id()?,
    };
    let api = ApiClient::new()
        .with_base_url(config.api_base_url.clone())
        .with_client_id(client_id.clone());
    let factory = Arc::new(SessionFactory::new(api, profiles, credentials));

    let session = factory
        .create_session_as(&cli.session, client_id)
        .await
        .with_context(|| format!("joining realm {}", cli.session))?;

    let manager = ConnectionManager::builder(config, WsTransportBuilder)
        .refresher(factory)
        .build();

    let _status = manager.on_status(|status| log_info!("status: {:?}", status));
    let _errors = manager.on_error(|error| {
        log_error!("{} ({})", error, error.cause.as_deref().unwrap_or("no cause"))
    });
    let _notices = manager.on_notice(|notice| match notice.sent_at {
        Some(at) => log_info!("[{}] {}", at.format("%H:%M:%S"), notice.message),
        None => log_info!("{}", notice.message),
    });

    let mut state = manager.store().subscribe();
    let watcher = tokio::spawn(async move {
        let mut last_revision = None;
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            if current.revision != last_revision {
                last_revision = current.revision;
                let quests = current
                    .snapshot
                    .as_ref()
                    .map(|s| s.quest_log.len())
                    .unwrap_or_default();
                log_info!(
                    "revision {:?}: {} member(s), {} quest(s)",
                    current.revision,
                    current.presence.len(),
                    quests
                );
            }
        }
    });

    if let Err(e) = manager.connect(session).await {
        log_warn!("initial connect failed: {}", e);
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    log_info!("shutting down");

    manager.disconnect().await;
    watcher.abort();
    Ok(())
}
