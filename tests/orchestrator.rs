mod common;

use std::sync::Arc;
use std::time::Duration;

use medrag::extract::{ExtractSource, FileExtractor, NoOcr};
use medrag::generate::AnswerGenerator;
use medrag::ingest::Ingestor;
use medrag::managed::ManagedRetrieval;
use medrag::orchestrator::{HybridOrchestrator, QuerySettings, INVALID_QUERY_ANSWER, SAFE_ANSWER};
use medrag_core::chunk::ChunkOptions;
use medrag_core::models::{Origin, Role, Strategy};
use medrag_core::retry::RetryPolicy;
use medrag_core::store::memory::InMemoryStore;
use medrag_core::store::SearchFilter;
use medrag_core::RagError;

use common::{
    batch_embedder, cholera_text, document, malaria_text, KeywordEmbedder, RecordingGenerator,
    ScriptedManaged,
};

const GENERAL: &str = "What is the treatment for malaria?";
const VISUAL: &str = "Show me an x-ray image of child pneumonia";
const COMPARATIVE: &str = "Compare bed net use versus indoor spraying for malaria";

fn settings() -> QuerySettings {
    QuerySettings {
        top_k: 3,
        managed_top_k: 3,
        filter: None,
        min_query_chars: 3,
        call_timeout: Duration::from_secs(2),
        managed_retry: quick_retry(),
        generation_retry: quick_retry(),
    }
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
    }
}

async fn indexed_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = Ingestor::new(
        store.clone(),
        batch_embedder(Arc::new(KeywordEmbedder::default())),
        Arc::new(FileExtractor),
        Arc::new(NoOcr),
        ChunkOptions {
            size: 200,
            overlap: 20,
            min_content_chars: 50,
        },
        Duration::ZERO,
    );
    let items = vec![
        (
            document("malaria-guide", "guidelines"),
            ExtractSource::Text(malaria_text(12)),
        ),
        (
            document("cholera-guide", "outbreaks"),
            ExtractSource::Text(cholera_text(12)),
        ),
    ];
    let summary = ingestor.ingest_batch(&items).await;
    assert_eq!(summary.failed, 0);
    store
}

fn orchestrator(
    store: Arc<InMemoryStore>,
    managed: Arc<dyn ManagedRetrieval>,
    generator: Arc<dyn AnswerGenerator>,
    settings: QuerySettings,
) -> HybridOrchestrator {
    HybridOrchestrator::new(
        store,
        batch_embedder(Arc::new(KeywordEmbedder::default())),
        managed,
        generator,
        settings,
    )
}

#[tokio::test]
async fn test_managed_success_uses_managed_answer() {
    let managed = ScriptedManaged::answering("Artemisinin combination therapy.", 0.85);
    let orch = orchestrator(
        indexed_store().await,
        managed.clone(),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.hybrid_query(GENERAL, Role::Patient).await;

    assert_eq!(result.strategy_used, Strategy::Managed);
    assert!(!result.fallback_used);
    assert_eq!(result.answer, "Artemisinin combination therapy.");
    assert!((result.confidence - 0.85).abs() < 1e-9);
    assert!(result.sources.iter().all(|s| s.origin == Origin::Managed));
    assert_eq!(managed.call_count(), 1);
}

#[tokio::test]
async fn test_managed_failure_falls_back_to_custom() {
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator(
        indexed_store().await,
        ScriptedManaged::unavailable(),
        generator.clone(),
        settings(),
    );

    let result = orch.hybrid_query(GENERAL, Role::Patient).await;

    assert_eq!(result.strategy_used, Strategy::Custom);
    assert!(result.fallback_used);
    assert_eq!(result.answer, "grounded answer");
    assert!(!result.sources.is_empty());
    assert!(result.sources.iter().all(|s| s.origin == Origin::Custom));

    // Custom confidence is the mean similarity, then the fallback factor.
    let sims: Vec<f64> = result.sources.iter().map(|s| s.confidence.unwrap()).collect();
    let mean = sims.iter().sum::<f64>() / sims.len() as f64;
    assert!((result.confidence - mean * 0.7).abs() < 1e-6);

    // The most similar chunk is about malaria.
    assert_eq!(result.sources[0].title, "malaria-guide title");
    assert_eq!(generator.prompt_count(), 1);
}

#[tokio::test]
async fn test_rate_limited_managed_call_is_retried() {
    let managed = ScriptedManaged::flaky_once("Artemisinin combination therapy.", 0.85);
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        managed.clone(),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.hybrid_query(GENERAL, Role::Patient).await;

    assert_eq!(managed.call_count(), 2);
    assert_eq!(result.strategy_used, Strategy::Managed);
    assert!(!result.fallback_used);
    assert_eq!(result.answer, "Artemisinin combination therapy.");
    assert!((result.confidence - 0.85).abs() < 1e-9);
}

#[tokio::test]
async fn test_custom_failure_falls_back_to_managed() {
    // Empty store: nothing to ground on.
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        ScriptedManaged::answering("Chest radiographs show consolidation.", 0.6),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.hybrid_query(VISUAL, Role::Patient).await;

    assert_eq!(result.strategy_used, Strategy::Managed);
    assert!(result.fallback_used);
    assert!((result.confidence - 0.6 * 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_exhaustion_returns_safe_answer() {
    let managed = ScriptedManaged::unavailable();
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        managed.clone(),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.try_query(GENERAL, Role::Patient).await.unwrap();

    assert_eq!(result.answer, SAFE_ANSWER);
    assert_eq!(result.confidence, 0.0);
    assert!(result.fallback_used);
    assert!(result.sources.is_empty());
    assert_eq!(result.strategy_used, Strategy::Managed);
    // A missing corpus is not worth retrying.
    assert_eq!(managed.call_count(), 1);
}

#[tokio::test]
async fn test_hybrid_merges_both_branches() {
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator(
        indexed_store().await,
        ScriptedManaged::answering("Nets and spraying both work.", 0.9),
        generator.clone(),
        settings(),
    );

    let result = orch.hybrid_query(COMPARATIVE, Role::Professional).await;

    assert_eq!(result.strategy_used, Strategy::Hybrid);
    assert!(!result.fallback_used);
    assert_eq!(result.answer, "synthesized answer");

    // Managed sources first, then custom, each in native order.
    let first_custom = result
        .sources
        .iter()
        .position(|s| s.origin == Origin::Custom)
        .unwrap();
    assert_eq!(first_custom, 2);
    assert!(result.sources[..2].iter().all(|s| s.origin == Origin::Managed));
    assert!(result.sources[2..].iter().all(|s| s.origin == Origin::Custom));

    let custom_sims: Vec<f64> = result.sources[2..]
        .iter()
        .map(|s| s.confidence.unwrap())
        .collect();
    for pair in custom_sims.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
    let custom_mean = custom_sims.iter().sum::<f64>() / custom_sims.len() as f64;
    assert!((result.confidence - (0.9 + custom_mean) / 2.0).abs() < 1e-6);

    // One grounded answer and one synthesis.
    assert_eq!(generator.prompt_count(), 2);
}

#[tokio::test]
async fn test_hybrid_with_one_branch_discounts_confidence() {
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        ScriptedManaged::answering("Nets and spraying both work.", 0.9),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.hybrid_query(COMPARATIVE, Role::Patient).await;

    assert_eq!(result.strategy_used, Strategy::Hybrid);
    assert!(!result.fallback_used);
    assert_eq!(result.answer, "Nets and spraying both work.");
    assert!((result.confidence - 0.9 * 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_failed_synthesis_keeps_stronger_branch() {
    let orch = orchestrator(
        indexed_store().await,
        ScriptedManaged::answering("Managed view.", 1.0),
        Arc::new(RecordingGenerator::failing_synthesis()),
        settings(),
    );

    let result = orch.hybrid_query(COMPARATIVE, Role::Patient).await;

    assert_eq!(result.strategy_used, Strategy::Hybrid);
    assert_eq!(result.answer, "Managed view.");
}

#[tokio::test]
async fn test_hybrid_failure_falls_back_to_custom_then_safe_answer() {
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        ScriptedManaged::unavailable(),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.hybrid_query(COMPARATIVE, Role::Patient).await;

    assert_eq!(result.answer, SAFE_ANSWER);
    assert_eq!(result.strategy_used, Strategy::Hybrid);
    assert!(result.fallback_used);
}

#[tokio::test(start_paused = true)]
async fn test_slow_managed_times_out_and_falls_back() {
    let managed = ScriptedManaged::slow(Duration::from_secs(30));
    let orch = orchestrator(
        indexed_store().await,
        managed.clone(),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    let result = orch.hybrid_query(GENERAL, Role::Patient).await;

    // Every attempt times out.
    assert_eq!(managed.call_count(), 3);
    assert_eq!(result.strategy_used, Strategy::Custom);
    assert!(result.fallback_used);
}

#[tokio::test]
async fn test_short_query_rejected_before_any_call() {
    let managed = ScriptedManaged::answering("unused", 0.9);
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        managed.clone(),
        generator.clone(),
        settings(),
    );

    let err = orch.try_query("  ", Role::Patient).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));

    let result = orch.hybrid_query("ok", Role::Patient).await;
    assert_eq!(result.answer, INVALID_QUERY_ANSWER);
    assert_eq!(result.confidence, 0.0);
    assert!(result.sources.is_empty());

    assert_eq!(managed.call_count(), 0);
    assert_eq!(generator.prompt_count(), 0);
}

#[tokio::test]
async fn test_category_filter_limits_custom_sources() {
    let mut filtered = settings();
    filtered.filter = Some(SearchFilter::category("outbreaks"));
    let orch = orchestrator(
        indexed_store().await,
        ScriptedManaged::unavailable(),
        Arc::new(RecordingGenerator::default()),
        filtered,
    );

    let result = orch.hybrid_query(GENERAL, Role::Patient).await;

    assert_eq!(result.strategy_used, Strategy::Custom);
    assert!(result
        .sources
        .iter()
        .all(|s| s.title == "cholera-guide title"));
}

#[tokio::test]
async fn test_route_matches_router() {
    let orch = orchestrator(
        Arc::new(InMemoryStore::new()),
        ScriptedManaged::unavailable(),
        Arc::new(RecordingGenerator::default()),
        settings(),
    );

    assert_eq!(orch.route(VISUAL, Role::Patient).strategy, Strategy::Custom);
    assert_eq!(orch.route(COMPARATIVE, Role::Patient).strategy, Strategy::Hybrid);
    assert_eq!(orch.route(GENERAL, Role::Patient).strategy, Strategy::Managed);
}
