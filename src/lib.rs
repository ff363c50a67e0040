//! Semantic memory search for AI agents.
//!
//! Mneme stores conversation messages per session and retrieves them by
//! meaning, by metadata, or both:
//!
//! - **Similarity** search embeds the query text and ranks messages by inner
//!   product with their stored embeddings.
//! - **Metadata** filters are boolean trees of JSONPath existence tests plus
//!   an optional creation-date range.
//! - **MMR** search over-fetches a candidate pool and reranks it with Maximal
//!   Marginal Relevance to trade relevance against redundancy.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   and two custom SQL functions for vector distance and JSONPath tests
//! - **Embeddings**: local ONNX Runtime (all-MiniLM-L6-v2) or an
//!   OpenAI-compatible HTTP API
//! - **Transport**: MCP over stdio or Streamable HTTP
//!
//! # Modules
//!
//! - [`search`]: filter compiler, embedding resolver, query assembler, result
//!   validator and MMR reranker
//! - [`db`]: SQLite schema, write path and the [`search::QueryEngine`] implementation
//! - [`embedding`]: text-to-vector providers
//! - [`config`]: TOML configuration with environment overrides
//! - [`error`]: search error taxonomy

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod search;
