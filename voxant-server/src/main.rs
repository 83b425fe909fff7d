//! Voxant server binary: configuration, database, warmup, and the HTTP
//! listener.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use voxant_core::llm::OpenAiCompatProvider;
use voxant_core::tts::OpenAiTtsProvider;
use voxant_core::warmup;
use voxant_server::{api, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = voxant_core::load_config(None).map_err(|e| anyhow::anyhow!(e))?;

    let pool = db::connect(&config.database.url, config.database.max_connections).await?;
    db::init_schema(&pool).await?;

    let llm_provider = Arc::new(OpenAiCompatProvider::new(&config.llm)?);
    let tts_provider = Arc::new(
        OpenAiTtsProvider::new(config.llm.api_key.clone(), config.tts.model.clone()),
    );

    if config.carrier.webhook_base_url.is_empty() {
        warn!("carrier.webhook_base_url is not set; carriers cannot fetch audio");
    }

    let endpoints = vec![
        format!("{}/chat/completions", config.llm.base_url.trim_end_matches('/')),
        format!("{}/audio/speech", tts_provider.base_url().trim_end_matches('/')),
    ];

    let state = AppState::build(config.clone(), pool, llm_provider.clone(), tts_provider);

    // Warmup runs in the background; readiness never waits on it.
    {
        let llm = llm_provider;
        let tts = state.tts.clone();
        tokio::spawn(async move {
            warmup::run_warmup(llm, tts, endpoints).await;
        });
    }

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr.as_str()).await?;
    info!(addr = config.server.bind_addr.as_str(), "voxant server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
