pub mod arena;
pub mod codec;
pub mod commands;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod settings;

use arena::{ArenaController, ProviderResponder};
use commands::{ChatService, KnowledgeBase};
use config::AppConfig;
use db::Database;
use error::AppError;
use settings::SettingsStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`;
/// a second call leaves the first subscriber in place.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Everything the shell holds on to for the lifetime of the app.
pub struct AppState {
    pub db: Arc<Database>,
    pub settings: SettingsStore,
    pub chat: ChatService,
    pub knowledge: KnowledgeBase,
    pub arena: ArenaController,
}

impl AppState {
    pub async fn initialize(config: AppConfig) -> Result<Self, AppError> {
        let data_dir = config.data_dir.clone();
        let db = tokio::task::spawn_blocking(move || Database::new(&data_dir)).await??;
        let db = Arc::new(db);

        let settings = SettingsStore::load(db.clone()).await;
        let knowledge = KnowledgeBase::new(db.clone(), settings.clone());
        let recovered = knowledge.recover_interrupted()?;
        let chat = ChatService::new(db.clone(), settings.clone(), knowledge.clone());
        let arena = ArenaController::new(Arc::new(ProviderResponder::new(settings.clone())));

        info!(
            data_dir = %config.data_dir.display(),
            recovered = recovered.len(),
            "Application state ready"
        );
        Ok(Self {
            db,
            settings,
            chat,
            knowledge,
            arena,
        })
    }
}
