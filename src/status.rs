//! Corpus overview for `medrag status` and `GET /corpus`.
//!
//! Reports the corpus generation, chunk and document totals, a per-category
//! breakdown, and the most recent ingestion jobs.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use medrag_core::models::CorpusMetadata;
use medrag_core::store::VectorStore;

use crate::config::Config;
use crate::services::Services;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub documents: i64,
    pub chunks: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub finished_at: i64,
    pub processed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub chunks_indexed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusReport {
    pub metadata: Option<CorpusMetadata>,
    pub categories: Vec<CategoryStats>,
    pub recent_jobs: Vec<JobRecord>,
}

/// Gather the corpus report from the database.
pub async fn corpus_report(store: &SqliteStore, job_limit: i64) -> Result<CorpusReport> {
    let metadata = store.corpus_metadata().await?;
    let categories = category_stats(store.pool()).await?;
    let recent_jobs = recent_jobs(store.pool(), job_limit).await?;
    Ok(CorpusReport {
        metadata,
        categories,
        recent_jobs,
    })
}

async fn category_stats(pool: &SqlitePool) -> Result<Vec<CategoryStats>> {
    let rows = sqlx::query(
        r#"
        SELECT category,
               COUNT(DISTINCT document_id) AS documents,
               COUNT(*) AS chunks
        FROM chunks
        GROUP BY category
        ORDER BY chunks DESC, category ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CategoryStats {
            category: row.get("category"),
            documents: row.get("documents"),
            chunks: row.get("chunks"),
        })
        .collect())
}

async fn recent_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, finished_at, processed, failed, skipped, chunks_indexed
        FROM ingest_jobs
        ORDER BY finished_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| JobRecord {
            job_id: row.get("id"),
            finished_at: row.get("finished_at"),
            processed: row.get("processed"),
            failed: row.get("failed"),
            skipped: row.get("skipped"),
            chunks_indexed: row.get("chunks_indexed"),
        })
        .collect())
}

/// `medrag status`: print the corpus report.
pub async fn run_status(config: &Config) -> Result<()> {
    let services = Services::from_config(config).await?;
    let report = corpus_report(&services.store, 5).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("medrag corpus");
    println!("=============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();

    match &report.metadata {
        Some(meta) => {
            println!("  Version:     {}", meta.version);
            println!("  Model:       {} ({} dims)", meta.embedding_model, meta.dimensions);
            println!("  Documents:   {}", meta.total_documents);
            println!("  Chunks:      {}", meta.total_chunks);
            println!("  Updated:     {}", format_ts_relative(meta.updated_at.timestamp()));
        }
        None => println!("  Nothing indexed yet. Run `medrag ingest <manifest>`."),
    }

    if !report.categories.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<24} {:>6} {:>8}", "CATEGORY", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(40));
        for c in &report.categories {
            println!("  {:<24} {:>6} {:>8}", c.category, c.documents, c.chunks);
        }
    }

    if !report.recent_jobs.is_empty() {
        println!();
        println!("  Recent jobs:");
        for job in &report.recent_jobs {
            println!(
                "  {}  {} processed, {} failed, {} skipped, {} chunks  ({})",
                &job.job_id[..8.min(job.job_id.len())],
                job.processed,
                job.failed,
                job.skipped,
                job.chunks_indexed,
                format_ts_relative(job.finished_at)
            );
        }
    }

    println!();
    services.pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86_400 => plural(d / 3600, "hour"),
        d if d < 86_400 * 30 => plural(d / 86_400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86_400), "1 day ago");
    }
}
