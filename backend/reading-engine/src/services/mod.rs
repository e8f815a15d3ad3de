use crate::config::Config;
use crate::providers::ProviderRegistry;
use crate::store::{MongoHistory, MongoRepository, RedisKeyValueStore};
use crate::utils::time::SystemClock;
use anyhow::Context;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

pub mod card_service;
pub mod generation_service;
pub mod lock_service;
pub mod normalizer;
pub mod prompt;
pub mod quiz_service;
pub mod quota_service;
pub mod reading_engine;
pub mod reward_service;

pub use reading_engine::{EngineDeps, ReadingEngine};

use prompt::{Catalog, PromptBuilder};

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub engine: Arc<ReadingEngine>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let repo = MongoRepository::new(mongo.clone());
        repo.ensure_indexes().await?;

        let catalog = match &config.catalog_path {
            Some(path) => Catalog::from_file(path)
                .with_context(|| format!("Failed to load topic catalog from {}", path))?,
            None => Catalog::builtin(),
        };
        tracing::info!(categories = catalog.categories.len(), "Topic catalog loaded");

        let providers = ProviderRegistry::from_config(&config)?;

        let engine = ReadingEngine::new(EngineDeps {
            kv: Arc::new(RedisKeyValueStore::new(redis.clone())),
            repo: Arc::new(repo),
            history: Arc::new(MongoHistory::new(mongo.clone())),
            clock: Arc::new(SystemClock),
            providers,
            prompts: PromptBuilder::new(catalog),
            settings: config.engine.clone(),
        });

        Ok(Self {
            config,
            mongo,
            redis,
            engine: Arc::new(engine),
        })
    }
}
