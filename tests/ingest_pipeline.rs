mod common;

use std::sync::Arc;
use std::time::Duration;

use medrag::extract::{ExtractSource, FileExtractor, NoOcr};
use medrag::ingest::Ingestor;
use medrag_core::chunk::{expected_chunk_count, ChunkOptions};
use medrag_core::store::memory::InMemoryStore;
use medrag_core::store::VectorStore;

use common::{batch_embedder, cholera_text, document, malaria_text, KeywordEmbedder};

fn options() -> ChunkOptions {
    ChunkOptions {
        size: 200,
        overlap: 20,
        min_content_chars: 50,
    }
}

fn ingestor(store: Arc<InMemoryStore>, delay: Duration) -> Ingestor {
    ingestor_with(store, options(), delay)
}

fn ingestor_with(store: Arc<InMemoryStore>, options: ChunkOptions, delay: Duration) -> Ingestor {
    Ingestor::new(
        store,
        batch_embedder(Arc::new(KeywordEmbedder::default())),
        Arc::new(FileExtractor),
        Arc::new(NoOcr),
        options,
        delay,
    )
}

#[tokio::test]
async fn test_ingest_document_indexes_every_chunk() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store.clone(), Duration::ZERO);
    let text = malaria_text(20);
    let expected = expected_chunk_count(text.chars().count(), &options());

    let outcome = ingestor
        .ingest_document(&document("malaria-guide", "guidelines"), &ExtractSource::Text(text))
        .await
        .unwrap();

    assert_eq!(outcome.chunks_indexed, expected);
    assert_eq!(outcome.insufficient_content, None);
    assert_eq!(store.len(), expected);

    let meta = store.corpus_metadata().await.unwrap().unwrap();
    assert_eq!(meta.total_chunks, expected as i64);
    assert_eq!(meta.total_documents, 1);
    assert_eq!(meta.embedding_model, "keyword-test");
    assert_eq!(meta.dimensions, common::VOCAB.len() + 1);
}

#[tokio::test]
async fn test_two_thousand_chars_with_default_options_adds_five_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor_with(store.clone(), ChunkOptions::default(), Duration::ZERO);

    ingestor
        .ingest_document(
            &document("malaria-guide", "guidelines"),
            &ExtractSource::Text(malaria_text(20)),
        )
        .await
        .unwrap();
    let before = store.corpus_metadata().await.unwrap().unwrap().total_chunks;

    let outcome = ingestor
        .ingest_document(
            &document("long-doc", "guidelines"),
            &ExtractSource::Text("x".repeat(2000)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.chunks_indexed, 5);
    let after = store.corpus_metadata().await.unwrap().unwrap().total_chunks;
    assert_eq!(after - before, 5);
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store.clone(), Duration::ZERO);
    let doc = document("malaria-guide", "guidelines");
    let source = ExtractSource::Text(malaria_text(20));

    let first = ingestor.ingest_document(&doc, &source).await.unwrap();
    let len_after_first = store.len();
    let second = ingestor.ingest_document(&doc, &source).await.unwrap();

    assert_eq!(first.chunks_indexed, second.chunks_indexed);
    assert_eq!(store.len(), len_after_first);
    assert_eq!(second.chunks_pruned, 0);
}

#[tokio::test]
async fn test_shorter_reingest_prunes_stale_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store.clone(), Duration::ZERO);
    let doc = document("malaria-guide", "guidelines");

    let long = ingestor
        .ingest_document(&doc, &ExtractSource::Text(malaria_text(30)))
        .await
        .unwrap();
    let short = ingestor
        .ingest_document(&doc, &ExtractSource::Text(malaria_text(5)))
        .await
        .unwrap();

    assert!(short.chunks_indexed < long.chunks_indexed);
    assert_eq!(short.chunks_pruned, long.chunks_indexed - short.chunks_indexed);
    assert_eq!(store.len(), short.chunks_indexed);
}

#[tokio::test]
async fn test_reingest_with_too_little_text_drops_old_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store.clone(), Duration::ZERO);
    let doc = document("malaria-guide", "guidelines");

    let first = ingestor
        .ingest_document(&doc, &ExtractSource::Text(malaria_text(20)))
        .await
        .unwrap();
    assert!(first.chunks_indexed > 0);

    let second = ingestor
        .ingest_document(&doc, &ExtractSource::Text("Too short.".into()))
        .await
        .unwrap();

    assert_eq!(second.insufficient_content, Some(10));
    assert_eq!(second.chunks_pruned, first.chunks_indexed);
    assert!(store.is_empty());
    let meta = store.corpus_metadata().await.unwrap().unwrap();
    assert_eq!(meta.total_chunks, 0);
    assert_eq!(meta.total_documents, 0);
}

#[tokio::test]
async fn test_short_document_is_skipped_not_failed() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store.clone(), Duration::ZERO);

    let outcome = ingestor
        .ingest_document(
            &document("stub", "guidelines"),
            &ExtractSource::Text("Too short.".into()),
        )
        .await
        .unwrap();

    assert_eq!(outcome.chunks_indexed, 0);
    assert_eq!(outcome.insufficient_content, Some(10));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_batch_continues_past_failed_document() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store.clone(), Duration::ZERO);

    let items = vec![
        (
            document("malaria-guide", "guidelines"),
            ExtractSource::Text(malaria_text(10)),
        ),
        (
            document("bad-doc", "guidelines"),
            ExtractSource::Text(format!("{} poison", cholera_text(10))),
        ),
        (
            document("cholera-guide", "outbreaks"),
            ExtractSource::Text(cholera_text(10)),
        ),
        (
            document("stub", "guidelines"),
            ExtractSource::Text("tiny".into()),
        ),
    ];

    let summary = ingestor.ingest_batch(&items).await;

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].document_id, "bad-doc");
    assert_eq!(summary.chunks_indexed, store.len());
    assert!(summary.finished_at >= summary.started_at);

    // Nothing from the failed document was written.
    let meta = store.corpus_metadata().await.unwrap().unwrap();
    assert_eq!(meta.total_documents, 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_pauses_between_documents() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store, Duration::from_secs(1));
    let items: Vec<_> = (0..3)
        .map(|i| {
            (
                document(&format!("doc-{}", i), "guidelines"),
                ExtractSource::Text(malaria_text(5)),
            )
        })
        .collect();

    let started = tokio::time::Instant::now();
    let summary = ingestor.ingest_batch(&items).await;

    assert_eq!(summary.processed, 3);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_missing_file_fails_document() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = ingestor(store, Duration::ZERO);

    let err = ingestor
        .ingest_document(
            &document("ghost", "guidelines"),
            &ExtractSource::File("/nonexistent/ghost.pdf".into()),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("ghost"));
}
