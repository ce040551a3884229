// Declare the modules
pub mod api;
pub mod cli;
pub mod commands;
pub mod composer;
pub mod config;
pub mod controller;
pub mod dictation;
pub mod error;
pub mod mock;
pub mod models;
pub mod repository;
pub mod state;
pub mod storage;

use anyhow::Context;
use api::{GeminiProvider, LLMApiProvider};
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use storage::{PersistentStore, SqliteStore};

/// Builds the application from `config` and runs the terminal front-end.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // Without a credential the adapter cannot exist; refuse to start.
    let api_key = config
        .api_key()
        .context("Cannot start without an API key (set API_KEY or XANTIUM_API_KEY_REF)")?;

    let store: Arc<dyn PersistentStore> = Arc::new(
        SqliteStore::new(&config.database_path)
            .await
            .context("Failed to open session store")?,
    );

    let api_provider: Arc<dyn LLMApiProvider> = Arc::new(GeminiProvider::new(
        config.api_url.clone(),
        config.model.clone(),
        api_key,
    ));

    let app_state = AppState::new(config, store, api_provider)
        .await
        .context("Failed to load sessions")?;

    cli::run(app_state).await
}
