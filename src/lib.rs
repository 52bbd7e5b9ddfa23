//! # medrag
//!
//! Hybrid retrieval-augmented question answering over medical guidelines.
//!
//! Questions are routed to one of two retrieval sources, or both:
//! an externally hosted **managed** corpus, and a **custom** local vector
//! store built by the ingestion pipeline. When the chosen source fails, the
//! orchestrator falls back to the other one, and when both fail it still
//! returns a safe, well-formed answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Manifest │──▶│ Extract + Chunk  │──▶│  SQLite   │
//! │ PDF/text │   │ + batched Embed  │   │  vectors  │
//! └──────────┘   └──────────────────┘   └────┬─────┘
//!                                            │ custom
//!  question ──▶ Router ──▶ Orchestrator ─────┤
//!                              │             │ managed
//!                              ▼             ▼
//!                       answer generator   managed corpus
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite-backed vector store |
//! | [`extract`] | Text extraction with OCR fallback |
//! | [`embedding`] | Embedding providers and the batch runner |
//! | [`ingest`] | Ingestion pipeline and manifests |
//! | [`managed`] | Managed corpus client |
//! | [`generate`] | Answer generation and prompts |
//! | [`orchestrator`] | Strategy execution and fallback |
//! | [`server`] | HTTP API |
//!
//! Pure building blocks (chunking, routing, similarity, error taxonomy) live
//! in the `medrag-core` crate.

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod logging;
pub mod managed;
pub mod migrate;
pub mod orchestrator;
pub mod retry;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod status;
