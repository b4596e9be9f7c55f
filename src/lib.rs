//! # Groundwork
//!
//! Grounded question answering over continuously updated document
//! collections.
//!
//! Groundwork answers a question from a named collection by planning a
//! retrieval strategy, running keyword and vector retrieval, fusing and
//! reranking the candidates, and composing a cited answer with a calibrated
//! confidence score. Underneath, an ingestion coordinator keeps every index
//! consistent with the catalog as documents change, are deleted, or are
//! re-embedded under a new model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────────────────┐
//! │ gw ingest│──▶│  Ingestion    │──▶│ Catalog  Keyword  Vec │
//! │ scan+chunk│  │  Coordinator  │   │ (SQLite or in-memory) │
//! └──────────┘   └───────────────┘   └──────────┬────────────┘
//!                                               │
//!                ┌───────────────┐   ┌──────────▼────────────┐
//!   gw query ───▶│ Query Pipeline│──▶│ plan → retrieve → fuse│
//!                │  + Cache      │   │ → rerank → compose    │
//!                └───────────────┘   └───────────────────────┘
//! ```
//!
//! The pure pieces (planner, fusion, rerank blending, confidence, cache
//! keys, fingerprints) and the storage traits live in `groundwork-core`.
//! This crate supplies the runtime: configuration, SQLite backends, HTTP
//! providers, the async pipeline, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Component wiring and CLI command runners |
//! | [`backends`] | Per-capability backend selection |
//! | [`cache`] | Generation-tagged cache layer |
//! | [`chunk`] | Paragraph-aware text chunking |
//! | [`composer`] | LLM answer composition |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`embedding`] | Embedding providers and batching gateway |
//! | [`ingest`] | Ingestion coordinator: upsert, delete, reset, migrate |
//! | [`locks`] | Per-source write serialization |
//! | [`migrate`] | Schema migrations |
//! | [`pipeline`] | Query pipeline |
//! | [`rerank`] | Cached, deadline-bounded reranking |
//! | [`retry`] | Exponential backoff |
//! | [`scan`] | Filesystem document discovery |
//! | [`sqlite_catalog`] | SQLite catalog and pending-op queue |
//! | [`sqlite_index`] | SQLite FTS5 keyword and vector indexes |
//! | [`sqlite_kv`] | SQLite cache store |
//! | [`stats`] | Collection statistics |

pub mod app;
pub mod backends;
pub mod cache;
pub mod chunk;
pub mod composer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod locks;
pub mod migrate;
pub mod pipeline;
pub mod rerank;
pub mod retry;
pub mod scan;
pub mod sqlite_catalog;
pub mod sqlite_index;
pub mod sqlite_kv;
pub mod stats;
