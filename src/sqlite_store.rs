//! SQLite-backed [`VectorStore`] implementation.
//!
//! Chunks and their embeddings live in one `chunks` table. Search is the
//! same exact brute-force ranking as the in-memory store: rows are loaded
//! (optionally filtered by category), decoded, and scored with
//! [`rank_top_k`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use medrag_core::embedding::{blob_to_vec, vec_to_blob};
use medrag_core::models::{Chunk, CorpusMetadata, JobSummary, ScoredChunk, VectorChunk};
use medrag_core::similarity::rank_top_k;
use medrag_core::store::{check_dimensions, next_version, SearchFilter, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    /// Maximum records per write transaction.
    write_batch_limit: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, write_batch_limit: usize) -> Self {
        Self {
            pool,
            write_batch_limit: write_batch_limit.max(1),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist the summary of a finished batch ingestion job.
    pub async fn record_job(&self, summary: &JobSummary) -> Result<()> {
        let errors_json = serde_json::to_string(&summary.errors)?;
        sqlx::query(
            r#"
            INSERT INTO ingest_jobs (id, started_at, finished_at, processed, failed,
                                     skipped, chunks_indexed, errors_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&summary.job_id)
        .bind(summary.started_at.timestamp())
        .bind(summary.finished_at.timestamp())
        .bind(summary.processed as i64)
        .bind(summary.failed as i64)
        .bind(summary.skipped as i64)
        .bind(summary.chunks_indexed as i64)
        .bind(errors_json)
        .execute(&self.pool)
        .await
        .context("Failed to record ingestion job")?;
        Ok(())
    }

    async fn corpus_dims(&self) -> Result<Option<usize>> {
        let row = sqlx::query("SELECT dimensions, total_chunks FROM corpus_metadata WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .filter(|r| r.get::<i64, _>("total_chunks") > 0)
            .map(|r| r.get::<i64, _>("dimensions") as usize))
    }
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let metadata_json: String = row.get("metadata_json");
    let page_number: Option<i64> = row.get("page_number");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        content: row.get("content"),
        chunk_index: row.get("chunk_index"),
        start_offset: row.get::<i64, _>("start_offset") as usize,
        end_offset: row.get::<i64, _>("end_offset") as usize,
        page_number: page_number.map(|p| p as u32),
        title: row.get("title"),
        source: row.get("source"),
        category: row.get("category"),
        metadata: serde_json::from_str(&metadata_json)
            .with_context(|| format!("Corrupt metadata_json on chunk {}", row.get::<String, _>("id")))?,
        hash: row.get("hash"),
    })
}

fn metadata_from_row(row: &SqliteRow) -> CorpusMetadata {
    let updated_at: i64 = row.get("updated_at");
    CorpusMetadata {
        version: row.get("version"),
        embedding_model: row.get("embedding_model"),
        dimensions: row.get::<i64, _>("dimensions") as usize,
        total_documents: row.get("total_documents"),
        total_chunks: row.get("total_chunks"),
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert_chunks(&self, chunks: &[VectorChunk]) -> Result<usize> {
        check_dimensions(chunks, self.corpus_dims().await?)?;

        let now = Utc::now().timestamp();
        let mut written = 0usize;

        for batch in chunks.chunks(self.write_batch_limit) {
            let mut tx = self.pool.begin().await?;
            for vc in batch {
                let c = &vc.chunk;
                sqlx::query(
                    r#"
                    INSERT INTO chunks (id, document_id, chunk_index, content, start_offset,
                                        end_offset, page_number, title, source, category,
                                        metadata_json, hash, embedding, embedding_dim, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        content = excluded.content,
                        start_offset = excluded.start_offset,
                        end_offset = excluded.end_offset,
                        page_number = excluded.page_number,
                        title = excluded.title,
                        source = excluded.source,
                        category = excluded.category,
                        metadata_json = excluded.metadata_json,
                        hash = excluded.hash,
                        embedding = excluded.embedding,
                        embedding_dim = excluded.embedding_dim,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&c.id)
                .bind(&c.document_id)
                .bind(c.chunk_index)
                .bind(&c.content)
                .bind(c.start_offset as i64)
                .bind(c.end_offset as i64)
                .bind(c.page_number.map(i64::from))
                .bind(&c.title)
                .bind(&c.source)
                .bind(&c.category)
                .bind(serde_json::to_string(&c.metadata)?)
                .bind(&c.hash)
                .bind(vec_to_blob(&vc.embedding))
                .bind(vc.embedding_dim as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            written += batch.len();
            tracing::debug!(records = batch.len(), "chunk write batch committed");
        }

        Ok(written)
    }

    async fn prune_document(&self, document_id: &str, keep_chunks: usize) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ? AND chunk_index >= ?")
            .bind(document_id)
            .bind(keep_chunks as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let category = filter.and_then(|f| f.category.clone());
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, content, start_offset, end_offset,
                   page_number, title, source, category, metadata_json, hash, embedding
            FROM chunks
            WHERE ?1 IS NULL OR category = ?1
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            decoded.push((chunk_from_row(row)?, blob_to_vec(&blob)));
        }

        Ok(rank_top_k(
            query,
            decoded.iter().map(|(c, v)| (c, v.as_slice())),
            k,
        ))
    }

    async fn corpus_metadata(&self) -> Result<Option<CorpusMetadata>> {
        let row = sqlx::query("SELECT * FROM corpus_metadata WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(metadata_from_row))
    }

    async fn refresh_corpus_metadata(&self, model: &str, dims: usize) -> Result<CorpusMetadata> {
        let mut tx = self.pool.begin().await?;

        let counts = sqlx::query(
            "SELECT COUNT(DISTINCT document_id) AS docs, COUNT(*) AS chunks FROM chunks",
        )
        .fetch_one(&mut *tx)
        .await?;
        let previous = sqlx::query("SELECT * FROM corpus_metadata WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(metadata_from_row);

        let updated = CorpusMetadata {
            version: next_version(previous.as_ref(), model, dims),
            embedding_model: model.to_string(),
            dimensions: dims,
            total_documents: counts.get("docs"),
            total_chunks: counts.get("chunks"),
            updated_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO corpus_metadata (id, version, embedding_model, dimensions,
                                         total_documents, total_chunks, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                embedding_model = excluded.embedding_model,
                dimensions = excluded.dimensions,
                total_documents = excluded.total_documents,
                total_chunks = excluded.total_chunks,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(updated.version)
        .bind(&updated.embedding_model)
        .bind(updated.dimensions as i64)
        .bind(updated.total_documents)
        .bind(updated.total_chunks)
        .bind(updated.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}
