//! Backend selection.
//!
//! Each capability (catalog, vector index, keyword index, cache store) is
//! chosen independently from `[backends]`. The pipeline and the ingestion
//! coordinator only ever see the trait objects.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use groundwork_core::catalog::memory::MemoryCatalog;
use groundwork_core::catalog::Catalog;
use groundwork_core::index::memory::{MemoryKeywordIndex, MemoryVectorIndex};
use groundwork_core::index::{KeywordIndex, VectorIndex};
use groundwork_core::kv::{KvStore, MemoryKv};

use crate::config::{BackendKind, Config};
use crate::db;
use crate::migrate::run_migrations;
use crate::sqlite_catalog::SqliteCatalog;
use crate::sqlite_index::{SqliteKeywordIndex, SqliteVectorIndex};
use crate::sqlite_kv::SqliteKv;

#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn Catalog>,
    pub keyword: Arc<dyn KeywordIndex>,
    pub vector: Arc<dyn VectorIndex>,
    pub kv: Arc<dyn KvStore>,
}

impl Backends {
    /// Fresh in-memory backends for every capability.
    pub fn memory() -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            keyword: Arc::new(MemoryKeywordIndex::new()),
            vector: Arc::new(MemoryVectorIndex::new()),
            kv: Arc::new(MemoryKv::new()),
        }
    }
}

/// Open the configured backends, connecting to and migrating SQLite only
/// when at least one capability uses it.
pub async fn open(config: &Config) -> Result<Backends> {
    let b = &config.backends;
    let uses_sqlite = [b.catalog, b.vector, b.keyword, b.cache].contains(&BackendKind::Sqlite);

    let pool: Option<SqlitePool> = if uses_sqlite {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;
        Some(pool)
    } else {
        None
    };

    let mut backends = Backends::memory();
    if b.cache == BackendKind::Memory {
        backends.kv = Arc::new(MemoryKv::with_capacity(config.cache.memory_max_entries));
    }
    if let Some(pool) = pool {
        if b.catalog == BackendKind::Sqlite {
            backends.catalog = Arc::new(SqliteCatalog::new(pool.clone()));
        }
        if b.keyword == BackendKind::Sqlite {
            backends.keyword = Arc::new(SqliteKeywordIndex::new(pool.clone()));
        }
        if b.vector == BackendKind::Sqlite {
            backends.vector = Arc::new(SqliteVectorIndex::new(pool.clone()));
        }
        if b.cache == BackendKind::Sqlite {
            backends.kv = Arc::new(SqliteKv::new(pool));
        }
    }
    Ok(backends)
}
