//! Schema migrations.
//!
//! Every statement is idempotent, so `medrag init` can be run repeatedly.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `chunks` | One row per chunk, keyed by its content-addressed id, with the embedding as a little-endian `f32` BLOB |
//! | `corpus_metadata` | Singleton row (`id = 1`) describing the current corpus generation |
//! | `ingest_jobs` | One row per batch ingestion job |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Open the configured database and bring its schema up to date.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            page_number INTEGER,
            title TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedding_dim INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corpus_metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            total_documents INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_jobs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            processed INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            chunks_indexed INTEGER NOT NULL,
            errors_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_category ON chunks(category)")
        .execute(pool)
        .await?;

    tracing::debug!("schema migrations applied");
    Ok(())
}

/// Remove every indexed chunk and zero the corpus counters.
///
/// The corpus generation row is kept so the next ingestion can detect a
/// model change.
pub async fn reset(pool: &SqlitePool) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM chunks")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query(
        "UPDATE corpus_metadata SET total_documents = 0, total_chunks = 0, updated_at = ? WHERE id = 1",
    )
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(deleted, "corpus reset");
    Ok(deleted)
}
