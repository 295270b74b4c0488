use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use triage_assist::api::{AppState, api_routes};
use triage_assist::config::AppConfig;
use triage_assist::identity::IdentityCache;
use triage_assist::knowledge::{DraftConfig, DraftGenerator};
use triage_assist::llm::{LlmConfig, LlmProvider, create_provider};
use triage_assist::pipeline::{AiClassifier, EventIngestor, IngestConfig, RuleClassifier};
use triage_assist::slack::{IdentitySource, SlackClient};
use triage_assist::store::{KnowledgeStore, LibSqlBackend, MessageStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing. The guard must live until shutdown to flush file logs.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _log_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "triage-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .init();
            None
        }
    };

    eprintln!("📬 Triage Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Events: http://0.0.0.0:{}/slack/events", config.port);
    eprintln!("   API: http://0.0.0.0:{}/api/messages", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    let messages: Arc<dyn MessageStore> = db.clone();
    let knowledge: Arc<dyn KnowledgeStore> = db;
    eprintln!("   Database: {}", config.db_path.display());

    // ── Identity source ─────────────────────────────────────────────────
    let token = config.slack_bot_token.clone().unwrap_or_else(|| {
        tracing::warn!("SLACK_BOT_TOKEN not set; users and channels will resolve as unknown");
        SecretString::from(String::new())
    });
    let source: Arc<dyn IdentitySource> =
        Arc::new(SlackClient::new(token, config.timeouts.identity_lookup));
    let identities = IdentityCache::new(Arc::clone(&source), config.timeouts.identity_lookup);

    // ── Text generation (optional) ──────────────────────────────────────
    let llm: Option<Arc<dyn LlmProvider>> = match &config.anthropic_api_key {
        Some(api_key) => Some(create_provider(&LlmConfig {
            api_key: api_key.clone(),
            model: config.model.clone(),
        })?),
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set; using rule-based classification only");
            None
        }
    };
    eprintln!(
        "   AI: {}",
        if llm.is_some() { "enabled" } else { "disabled (rule-based)" }
    );

    let classifier = AiClassifier::new(
        llm.clone(),
        RuleClassifier::default(),
        config.timeouts.generation,
    );
    let drafts = Arc::new(DraftGenerator::new(
        llm,
        Arc::clone(&knowledge),
        DraftConfig {
            timeout: config.timeouts.generation,
            ..Default::default()
        },
    ));

    // ── Ingestion ───────────────────────────────────────────────────────
    let ingestor = Arc::new(EventIngestor::new(
        source,
        identities,
        classifier,
        Arc::clone(&messages),
        IngestConfig {
            lookup_timeout: config.timeouts.identity_lookup,
            init_attempts: config.bot_init_attempts,
            ..Default::default()
        },
    ));

    match ingestor.initialize().await {
        Ok(bot_id) => eprintln!("   Bot user: {bot_id}"),
        Err(e) => {
            tracing::warn!(error = %e, "Continuing without bot identity; self-messages won't be filtered");
        }
    }

    // ── HTTP server ─────────────────────────────────────────────────────
    let app = api_routes(AppState {
        ingestor,
        messages,
        knowledge,
        drafts,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Triage server started");
    eprintln!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
