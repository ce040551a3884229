use crate::api::LLMApiProvider;
use crate::config::AppConfig;
use crate::controller::ConversationController;
use crate::error::Result;
use crate::repository::SessionRepository;
use crate::storage::PersistentStore;
use std::sync::Arc;
use tokio::sync::Mutex;

// Core application state shared by the command layer
#[derive(Clone)]
pub struct AppState {
    // Locked briefly per operation; never held across a network await.
    pub repository: Arc<Mutex<SessionRepository>>,
    pub controller: Arc<ConversationController>,
    pub config: AppConfig,
}

impl AppState {
    /// Loads the stored sessions and wires the controller to `api_provider`.
    pub async fn new(
        config: AppConfig,
        store: Arc<dyn PersistentStore>,
        api_provider: Arc<dyn LLMApiProvider>,
    ) -> Result<Self> {
        let repository = SessionRepository::load(store, &config.storage_key).await?;
        let repository = Arc::new(Mutex::new(repository));
        let controller = Arc::new(ConversationController::new(
            repository.clone(),
            api_provider,
        ));
        Ok(Self {
            repository,
            controller,
            config,
        })
    }
}
