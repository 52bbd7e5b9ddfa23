//! Answer generation for the custom strategy and hybrid synthesis.
//!
//! Retrieved chunks are rendered into a numbered grounding context and sent
//! to a chat model with a role-specific system prompt. Patients get plain
//! language; professionals get clinical terminology.
//!
//! Providers:
//! - **[`ExtractiveGenerator`]**: no model; answers with the top excerpts.
//!   Used when `generation.provider = "disabled"`.
//! - **[`OpenAIGenerator`]**: `POST {url}/v1/chat/completions`.
//! - **[`OllamaGenerator`]**: `POST {url}/api/generate`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use medrag_core::models::{Role, ScoredChunk};
use medrag_core::{RagError, RagResult};

use crate::config::GenerationConfig;
use crate::embedding::{status_error, transport_error};

const SERVICE: &str = "generation";

const PATIENT_SYSTEM: &str = "You are a health information assistant for patients in Zambia. \
Answer in plain, friendly language a non-specialist can follow. Use only the numbered context \
provided. If the context does not answer the question, say so. Do not diagnose; encourage the \
reader to see a health worker for personal medical advice.";

const PROFESSIONAL_SYSTEM: &str = "You are a clinical reference assistant for health \
professionals in Zambia. Answer precisely using standard clinical terminology, citing the \
numbered context as [n]. Use only the context provided and state clearly when it is \
insufficient.";

/// A fully rendered generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub question: String,
    /// Grounding material the answer must stay within.
    pub context: String,
}

impl Prompt {
    pub fn user_message(&self) -> String {
        format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            self.context.trim_end(),
            self.question
        )
    }
}

pub fn system_prompt(role: Role) -> &'static str {
    match role {
        Role::Patient => PATIENT_SYSTEM,
        Role::Professional => PROFESSIONAL_SYSTEM,
    }
}

/// Render retrieved chunks as a numbered context block.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (i, scored) in chunks.iter().enumerate() {
        let chunk = &scored.chunk;
        out.push_str(&format!(
            "[{}] {} ({})\n{}\n\n",
            i + 1,
            chunk.title,
            chunk.source,
            chunk.content.trim()
        ));
    }
    out
}

pub fn answer_prompt(question: &str, role: Role, chunks: &[ScoredChunk]) -> Prompt {
    Prompt {
        system: system_prompt(role).to_string(),
        question: question.to_string(),
        context: build_context(chunks),
    }
}

/// Prompt asking the model to merge two independently grounded answers.
pub fn synthesis_prompt(question: &str, role: Role, managed: &str, custom: &str) -> Prompt {
    Prompt {
        system: format!(
            "{} Two answers drawn from different sources follow. Combine them into one \
             answer, keep every supported fact once, and point out any disagreement.",
            system_prompt(role)
        ),
        question: question.to_string(),
        context: format!(
            "[1] Guideline corpus answer\n{}\n\n[2] Local document answer\n{}\n",
            managed.trim(),
            custom.trim()
        ),
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> RagResult<String>;
}

// ============ Extractive ============

/// Answers with the grounding context itself, trimmed to `max_chars`.
pub struct ExtractiveGenerator {
    max_chars: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(1_200)
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &Prompt) -> RagResult<String> {
        let context = prompt.context.trim();
        if context.is_empty() {
            return Err(RagError::Validation("no context to answer from".into()));
        }
        let mut text: String = context.chars().take(self.max_chars).collect();
        if context.chars().count() > self.max_chars {
            text.push_str(" …");
        }
        Ok(format!("From the indexed documents:\n\n{}", text))
    }
}

// ============ OpenAI ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> RagResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.user_message(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        non_empty(
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content),
        )
    }
}

// ============ Ollama ============

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: Option<String>,
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> RagResult<String> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: prompt.user_message(),
            system: &prompt.system,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::transient(
                    SERVICE,
                    format!("Ollama connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        non_empty(body.response)
    }
}

fn non_empty(answer: Option<String>) -> RagResult<String> {
    match answer {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(RagError::external(SERVICE, "model returned an empty answer")),
    }
}

/// Create the configured [`AnswerGenerator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(ExtractiveGenerator::default())),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medrag_core::models::{Chunk, DocumentMetadata};

    fn scored(title: &str, content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "c".into(),
                document_id: "d".into(),
                content: content.into(),
                chunk_index: 0,
                start_offset: 0,
                end_offset: content.len(),
                page_number: None,
                title: title.into(),
                source: "MoH".into(),
                category: "guidelines".into(),
                metadata: DocumentMetadata::default(),
                hash: String::new(),
            },
            similarity: 0.8,
        }
    }

    #[test]
    fn test_context_is_numbered() {
        let ctx = build_context(&[scored("A", "first"), scored("B", "second")]);
        assert!(ctx.starts_with("[1] A (MoH)\nfirst"));
        assert!(ctx.contains("[2] B (MoH)\nsecond"));
    }

    #[test]
    fn test_role_changes_system_prompt() {
        let chunks = [scored("A", "text")];
        let patient = answer_prompt("q", Role::Patient, &chunks);
        let professional = answer_prompt("q", Role::Professional, &chunks);
        assert_ne!(patient.system, professional.system);
        assert!(patient.system.contains("plain"));
        assert!(professional.system.contains("clinical"));
    }

    #[test]
    fn test_synthesis_prompt_carries_both_answers() {
        let p = synthesis_prompt("q", Role::Patient, "managed says", "custom says");
        assert!(p.context.contains("managed says"));
        assert!(p.context.contains("custom says"));
        assert!(p.user_message().ends_with("Answer:"));
    }

    #[tokio::test]
    async fn test_extractive_quotes_context() {
        let prompt = answer_prompt("q", Role::Patient, &[scored("Bed nets", "Sleep under a net.")]);
        let answer = ExtractiveGenerator::default().generate(&prompt).await.unwrap();
        assert!(answer.contains("Sleep under a net."));
    }

    #[tokio::test]
    async fn test_extractive_rejects_empty_context() {
        let prompt = answer_prompt("q", Role::Patient, &[]);
        assert!(ExtractiveGenerator::default().generate(&prompt).await.is_err());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some(" ok ".into())).unwrap(), "ok");
        assert!(non_empty(Some("   ".into())).is_err());
        assert!(non_empty(None).is_err());
    }
}
