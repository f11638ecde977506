//! Entity knowledge-graph store for personal-knowledge-management backends.
//!
//! Dossier owns the entities (people and organizations), their time-varying
//! facts, and their typed relations that an upstream ingestion pipeline
//! produces, and guarantees the graph never accumulates duplicate or
//! structurally invalid data:
//!
//! - **Entities** carry a singleton-owner invariant, soft delete/restore,
//!   merge, and a guarded hard delete.
//! - **Facts** are temporal: values are never edited in place, only closed
//!   (`valid_until`) and replaced. New facts pass through a three-tier
//!   duplicate check — semantic (embedding cosine similarity), exact
//!   normalized text, and fuzzy Levenshtein — before anything is written.
//! - **Relations** are typed and n-ary, with a role vocabulary and a
//!   cardinality rule enforced per relation type.
//! - **Inference** derives employment relations from `company` facts and is
//!   idempotent across repeated runs.
//! - **Projection** builds a one-hop node/edge view for presentation.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for embedding similarity search
//! - **Embeddings**: pluggable via [`embedding::EmbeddingProvider`]; the store
//!   degrades to text-based dedup when no provider is wired in
//! - **Concurrency**: synchronous request/response over a single connection;
//!   owner changes and restores take SQLite's write lock up front
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, and migrations
//! - [`embedding`] — The embedding-provider seam and vector helpers
//! - [`graph`] — Core store: entities, facts, dedup, relations, inference, projection

pub mod config;
pub mod db;
pub mod embedding;
pub mod graph;
