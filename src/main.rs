use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;

use sitesmith_engine::{GenerationConfig, IntentClassifier, SessionRegistry};
use sitesmith_llm::ChatCompletionsProvider;
use sitesmith_server::{ClientRegistry, HandlerState, ServerConfig};
use sitesmith_settings::{data_dir, resolve_path, SitesmithSettings};
use sitesmith_store::{Database, DocumentRepo};
use sitesmith_telemetry::{init_telemetry, TelemetryConfig};

/// Natural-language website workspace server.
#[derive(Debug, Parser)]
#[command(name = "sitesmith", version)]
struct Args {
    /// Listen port (overrides settings).
    #[arg(long)]
    port: Option<u16>,
    /// Settings file to load instead of `~/.sitesmith/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Document database path (overrides settings).
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => sitesmith_settings::load_settings_from_path(path),
        None => sitesmith_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let home = data_dir();
    let telemetry = init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        persist_warnings: settings.logging.persist_warnings,
        log_db_path: resolve_path(&home, &settings.logging.log_db_path),
    });

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting sitesmith");

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| resolve_path(&home, &settings.storage.db_path));
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    let registry = Arc::new(build_registry(&settings, db)?);
    let clients = Arc::new(ClientRegistry::new(settings.server.max_send_queue));
    let state = HandlerState::new(
        Arc::clone(&registry),
        clients,
        settings.server.public_base_url(),
    )
    .with_telemetry(Arc::new(telemetry));

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let handle = sitesmith_server::start(config, Arc::new(state))
        .await
        .context("failed to start server")?;
    tracing::info!(
        port = handle.port,
        preview_base = %settings.server.public_base_url(),
        "sitesmith ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    registry.shutdown().await;
    Ok(())
}

fn build_registry(settings: &SitesmithSettings, db: Database) -> anyhow::Result<SessionRegistry> {
    let generation = &settings.generation;
    let api_key = std::env::var(&generation.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from);
    if api_key.is_none() {
        tracing::warn!(
            env = %generation.api_key_env,
            "no API key set; commands will fail until one is configured"
        );
    }

    let provider = ChatCompletionsProvider::new(&generation.api_url, &generation.model, api_key)
        .context("failed to build generation provider")?;

    let classifier = IntentClassifier::new(
        settings.workspace.modify_keywords.clone(),
        settings.workspace.min_modify_chars,
    );
    let config = GenerationConfig {
        cooldown: Duration::from_millis(settings.workspace.cooldown_ms),
        timeout: Duration::from_millis(generation.timeout_ms),
        max_tokens: generation.max_tokens,
        temperature: generation.temperature,
        modify_context_chars: generation.modify_context_chars,
    };

    Ok(SessionRegistry::new(
        Arc::new(provider),
        Arc::new(DocumentRepo::new(db)),
        classifier,
        config,
    ))
}
