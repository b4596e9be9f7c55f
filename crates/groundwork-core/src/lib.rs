//! # Groundwork Core
//!
//! Shared, runtime-free logic for Groundwork: the data model, content
//! fingerprinting, the query planner, hybrid fusion, rerank blending,
//! confidence scoring, cache-key derivation, and the narrow capability
//! traits that every storage or model backend implements.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! The `groundwork` application crate wires these pieces into the
//! ingestion coordinator and the query pipeline.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunks, collections, candidates, answer results |
//! | [`error`] | Error taxonomy with stable error kinds |
//! | [`fingerprint`] | Content hashing and stable chunk ids |
//! | [`planner`] | Query features and retrieval plans |
//! | [`fusion`] | Min-max normalization and weighted list fusion |
//! | [`rerank`] | Relevance scorer trait and rerank blending |
//! | [`confidence`] | Answer confidence from scored evidence |
//! | [`cache_key`] | Deterministic, generation-versioned cache keys |
//! | [`embedding`] | Embedding gateway trait, hashing embedder, vector utilities |
//! | [`index`] | Keyword and vector index traits plus in-memory backends |
//! | [`catalog`] | Collection metadata and chunk ledger trait |
//! | [`kv`] | Key-value store with TTL for the cache layer |
//! | [`composer`] | Answer composer trait and extractive composer |

pub mod cache_key;
pub mod catalog;
pub mod composer;
pub mod confidence;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod fusion;
pub mod index;
pub mod kv;
pub mod models;
pub mod planner;
pub mod rerank;

pub use error::{Error, ErrorKind, Result};
