use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planetline::{
    config::AppConfig,
    llm::{self, Judge, LlmJudge},
    state::AppState,
    store::{MemoryStore, Store},
};

/// How often expired cooldown keys are dropped
const COOLDOWN_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planetline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Planetline...");

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn Store> = match &config.data_dir {
        Some(dir) => match MemoryStore::open(dir).await {
            Ok(store) => {
                tracing::info!(data_dir = %dir.display(), "Loaded session snapshots");
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(data_dir = %dir.display(), "Failed to open data directory: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("PLANETLINE_DATA_DIR not set, sessions will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let llm_config = llm::LlmConfig::from_env();
    let judge: Option<Arc<dyn Judge>> = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("LLM providers initialized successfully");
            Some(Arc::new(LlmJudge::new(
                Arc::new(manager),
                llm_config.default_timeout,
                llm_config.default_max_tokens,
            )))
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. Entries cannot be judged.",
                e
            );
            None
        }
    };

    let addr = config.addr;
    let state = Arc::new(AppState::new(config, store, judge));

    if let Err(e) = state.clocks.rehydrate_active().await {
        tracing::error!("Failed to rehydrate phase clocks: {}", e);
    }

    let cooldown = state.cooldown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COOLDOWN_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cooldown.cleanup().await;
        }
    });

    let app = planetline::router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let clocks = state.clocks.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
            clocks.stop_all().await;
        })
        .await
        .unwrap();
}
