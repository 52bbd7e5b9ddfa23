//! Startup wiring.
//!
//! [`Services::from_config`] opens the database, applies migrations, and
//! builds every collaborator once. The CLI and the HTTP server share the
//! result; nothing is held in global state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;

use medrag_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::embedding::batch::BatchEmbedder;
use crate::embedding::create_embedder;
use crate::extract::{create_ocr, FileExtractor, OcrEngine};
use crate::generate::create_generator;
use crate::ingest::Ingestor;
use crate::managed::{create_managed, ManagedRetrieval};
use crate::migrate;
use crate::orchestrator::{HybridOrchestrator, QuerySettings};
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub embedder: Arc<BatchEmbedder>,
    pub managed: Arc<dyn ManagedRetrieval>,
    pub ingestor: Ingestor,
    pub orchestrator: Arc<HybridOrchestrator>,
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;

        let store = Arc::new(SqliteStore::new(
            pool.clone(),
            config.ingest.write_batch_limit,
        ));
        let vector_store: Arc<dyn VectorStore> = store.clone();

        let embedder = Arc::new(BatchEmbedder::from_config(
            create_embedder(&config.embedding)?,
            &config.embedding,
        ));
        let managed = create_managed(&config.managed)?;
        let generator = create_generator(&config.generation)?;
        let ocr: Arc<dyn OcrEngine> = Arc::from(create_ocr(&config.ocr)?);

        let ingestor = Ingestor::new(
            vector_store.clone(),
            embedder.clone(),
            Arc::new(FileExtractor),
            ocr,
            config.chunking.options(),
            Duration::from_millis(config.ingest.document_delay_ms),
        );

        let orchestrator = Arc::new(HybridOrchestrator::new(
            vector_store,
            embedder.clone(),
            managed.clone(),
            generator,
            QuerySettings::from_config(config),
        ));

        tracing::debug!(
            embedding = %config.embedding.provider,
            generation = %config.generation.provider,
            managed = config.managed.enabled,
            "services ready"
        );

        Ok(Self {
            pool,
            store,
            embedder,
            managed,
            ingestor,
            orchestrator,
        })
    }
}
