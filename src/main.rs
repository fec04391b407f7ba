use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use dealercoach::coach::Coach;
use dealercoach::config::CoachConfig;
use dealercoach::engine::session::SessionStore;
use dealercoach::llm_client::LlmClient;
use dealercoach::server::{serve, AppState};
use dealercoach::sheetlog::SqliteActivityLog;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dealercoach=debug")),
        )
        .init();

    tracing::info!("dealercoach starting...");

    let config = CoachConfig::load();

    let log = Arc::new(SqliteActivityLog::new(&config.database_path)?);
    tracing::info!("Activity log store: {}", config.database_path);

    let model = Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
        config.llm_temperature,
    ));
    tracing::info!("Model: {} at {}", config.llm_model, config.llm_api_url);
    if config.llm_api_key.is_none() {
        tracing::warn!("No LLM API key configured; assuming a local model endpoint");
    }

    let bind_addr = config.bind_addr.clone();
    let sessions = SessionStore::new(Some(config.welcome_message.clone()));
    let coach = Coach::new(model, log, config);

    let state = Arc::new(AppState { coach, sessions });
    serve(state, &bind_addr).await
}
