//! # medrag core
//!
//! Runtime-free logic shared by the medrag ingestion and serving paths:
//! data models, the error taxonomy, the sliding-window chunker, token-aware
//! batch planning, cosine similarity ranking, the store and embedder
//! abstractions, and the query router.
//!
//! This crate contains no tokio, sqlx, or network code. Everything that
//! talks to the outside world lives in the `medrag` app crate and plugs in
//! through the traits defined here.

pub mod batch;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retry;
pub mod router;
pub mod similarity;
pub mod store;

pub use error::{RagError, RagResult};
