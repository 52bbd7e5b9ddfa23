//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use medrag::embedding::batch::BatchEmbedder;
use medrag::generate::{AnswerGenerator, Prompt};
use medrag::managed::{CorpusStatus, ManagedAnswer, ManagedRetrieval};
use medrag_core::batch::BatchLimits;
use medrag_core::embedding::Embedder;
use medrag_core::models::{Document, Origin, Source};
use medrag_core::retry::RetryPolicy;
use medrag_core::{RagError, RagResult};

/// One dimension per keyword, plus a constant so no vector is zero.
pub const VOCAB: &[&str] = &["malaria", "net", "pneumonia", "cholera", "child", "x-ray"];

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect();
    v.push(0.1);
    v
}

/// Embeds by keyword counts. Any text containing `poison` fails.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(RagError::external("embedding", "input rejected"));
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

pub fn batch_embedder(inner: Arc<dyn Embedder>) -> Arc<BatchEmbedder> {
    Arc::new(BatchEmbedder::new(
        inner,
        BatchLimits::default(),
        RetryPolicy::none(),
        Duration::ZERO,
        Duration::from_secs(5),
    ))
}

#[derive(Clone)]
pub enum ManagedBehavior {
    Answer { text: String, confidence: f64 },
    Unavailable,
    Slow(Duration),
    /// Rate-limited on the first call, then answers.
    FlakyOnce { text: String, confidence: f64 },
}

pub struct ScriptedManaged {
    pub behavior: ManagedBehavior,
    pub calls: AtomicUsize,
}

impl ScriptedManaged {
    pub fn answering(text: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            behavior: ManagedBehavior::Answer {
                text: text.to_string(),
                confidence,
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            behavior: ManagedBehavior::Unavailable,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior: ManagedBehavior::Slow(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn flaky_once(text: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            behavior: ManagedBehavior::FlakyOnce {
                text: text.to_string(),
                confidence,
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedRetrieval for ScriptedManaged {
    async fn import_documents(&self, _: &[String], _: usize, _: usize) -> RagResult<()> {
        Ok(())
    }

    async fn query(&self, _question: &str, _top_k: usize) -> RagResult<ManagedAnswer> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ManagedBehavior::Answer { text, confidence } => Ok(managed_answer(text, *confidence)),
            ManagedBehavior::FlakyOnce { .. } if call == 0 => {
                Err(RagError::transient("managed retrieval", "HTTP 429"))
            }
            ManagedBehavior::FlakyOnce { text, confidence } => {
                Ok(managed_answer(text, *confidence))
            }
            ManagedBehavior::Unavailable => Err(RagError::CorpusUnavailable(
                "managed corpus is not ready".into(),
            )),
            ManagedBehavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Err(RagError::external("managed retrieval", "too late"))
            }
        }
    }

    async fn check_status(&self) -> RagResult<CorpusStatus> {
        Ok(CorpusStatus {
            exists: true,
            ready: matches!(self.behavior, ManagedBehavior::Answer { .. }),
            file_count: 2,
        })
    }
}

fn managed_answer(text: &str, confidence: f64) -> ManagedAnswer {
    ManagedAnswer {
        answer: text.to_string(),
        sources: vec![
            managed_source("WHO malaria guidelines"),
            managed_source("MoH treatment protocol"),
        ],
        confidence,
    }
}

fn managed_source(title: &str) -> Source {
    Source {
        title: title.to_string(),
        snippet: "managed passage".to_string(),
        origin: Origin::Managed,
        confidence: Some(0.9),
        uri: None,
    }
}

/// Answers with a fixed prefix; optionally fails synthesis prompts.
#[derive(Default)]
pub struct RecordingGenerator {
    pub fail_synthesis: bool,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl RecordingGenerator {
    pub fn failing_synthesis() -> Self {
        Self {
            fail_synthesis: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, prompt: &Prompt) -> RagResult<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let is_synthesis = prompt.context.contains("Guideline corpus answer");
        if is_synthesis && self.fail_synthesis {
            return Err(RagError::transient("generation", "HTTP 503"));
        }
        if is_synthesis {
            Ok("synthesized answer".to_string())
        } else {
            Ok("grounded answer".to_string())
        }
    }
}

pub fn document(id: &str, category: &str) -> Document {
    Document {
        id: id.to_string(),
        title: format!("{} title", id),
        source: "Ministry of Health".to_string(),
        category: category.to_string(),
        storage: Default::default(),
        metadata: Default::default(),
    }
}

/// Roughly `sentences` sentences about malaria prevention.
pub fn malaria_text(sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Sleeping under a treated net prevents malaria, note {}.", i))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cholera_text(sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Oral rehydration treats cholera dehydration quickly, step {}.", i))
        .collect::<Vec<_>>()
        .join(" ")
}
