use std::sync::Arc;
use std::time::Duration;

use weekender::config::AppConfig;
use weekender::http::{app_routes, AppState};
use weekender::notify::{LogNotifier, Notifier, TwilioNotifier};
use weekender::store::LibSqlBackend;
use weekender::survey::sweeper::spawn_sweep_task;
use weekender::survey::{ConversationEngine, EngineStores, QuestionCatalog, TimeoutSweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env();

    eprintln!("📅 Weekender v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!("   Database: {}", config.db_path);

    // ── Database ─────────────────────────────────────────────────────────
    let backend = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open database at {}: {e}", config.db_path))?,
    );
    let stores = EngineStores {
        users: backend.clone(),
        conversations: backend.clone(),
        preferences: backend.clone(),
    };

    // ── Notifier ─────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match TwilioNotifier::from_env() {
        Some(twilio) => {
            eprintln!("   SMS: Twilio");
            Arc::new(twilio)
        }
        None => {
            eprintln!("   SMS: disabled (log only) — set TWILIO_ACCOUNT_SID to enable");
            Arc::new(LogNotifier)
        }
    };

    // ── Engine + Sweeper ─────────────────────────────────────────────────
    let catalog = Arc::new(QuestionCatalog::default());
    eprintln!("   Survey: {} questions", catalog.len());

    let engine = Arc::new(ConversationEngine::new(
        stores.clone(),
        Some(Arc::clone(&notifier)),
        catalog,
        config.engine.clone(),
    ));

    let sweeper = Arc::new(TimeoutSweeper::new(
        stores.users.clone(),
        Arc::clone(&notifier),
    ));
    if config.sweep_interval_secs > 0 {
        let _sweep_handle = spawn_sweep_task(
            Arc::clone(&sweeper),
            config.sweep_threshold_days,
            Duration::from_secs(config.sweep_interval_secs),
        );
        eprintln!(
            "   Sweep: every {}s (threshold {} days)",
            config.sweep_interval_secs, config.sweep_threshold_days
        );
    } else {
        eprintln!(
            "   Sweep: external cron only (threshold {} days)",
            config.sweep_threshold_days
        );
    }

    // ── HTTP server ──────────────────────────────────────────────────────
    let state = AppState {
        engine,
        users: stores.users.clone(),
        conversations: stores.conversations.clone(),
        notifier,
        sweeper,
        sweep_threshold_days: config.sweep_threshold_days,
        internal_api_key: config.internal_api_key.clone(),
    };

    let app = app_routes(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Server started");
    axum::serve(listener, app).await?;

    Ok(())
}
