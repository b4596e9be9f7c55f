//! SQLite index backends: FTS5 BM25 for keywords, cosine over stored blobs
//! for vectors.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use groundwork_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use groundwork_core::fusion::ranked;
use groundwork_core::index::{KeywordIndex, VectorIndex};
use groundwork_core::models::{CandidateSource, Metadata, RetrievalCandidate};
use groundwork_core::planner::tokenize;
use groundwork_core::Result;

use crate::sqlite_catalog::db_err;

/// Turn free text into an FTS5 `MATCH` expression: every token quoted,
/// joined with `OR`. Returns `None` when nothing searchable remains.
pub fn fts_query(text: &str) -> Option<String> {
    let mut seen = std::collections::HashSet::new();
    let terms: Vec<String> = tokenize(&text.to_lowercase())
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

pub struct SqliteKeywordIndex {
    pool: SqlitePool,
}

impl SqliteKeywordIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeywordIndex for SqliteKeywordIndex {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        top_n: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let expr = match fts_query(query) {
            Some(e) if top_n > 0 => e,
            _ => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ? AND collection = ?
            ORDER BY rank, chunk_id
            LIMIT ?
            "#,
        )
        .bind(expr)
        .bind(collection)
        .bind(top_n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // FTS5 rank is a negated bm25 score: lower is better.
        Ok(ranked(
            rows.iter()
                .map(|row| RetrievalCandidate {
                    chunk_id: row.get("chunk_id"),
                    score: -row.get::<f64, _>("rank"),
                    source: CandidateSource::Keyword,
                    rank: 0,
                })
                .collect(),
        ))
    }

    async fn index(
        &self,
        collection: &str,
        chunk_id: &str,
        text: &str,
        _metadata: &Metadata,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM chunks_fts WHERE collection = ? AND chunk_id = ?")
            .bind(collection)
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, collection, text) VALUES (?, ?, ?)")
            .bind(chunk_id)
            .bind(collection)
            .bind(text)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, chunk_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for id in chunk_ids {
            sqlx::query("DELETE FROM chunks_fts WHERE collection = ? AND chunk_id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Brute-force cosine search over `chunk_vectors`.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn search(
        &self,
        space: &str,
        vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors WHERE space = ?")
            .bind(space)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut hits: Vec<(String, f64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let sim = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
                (row.get::<String, _>("chunk_id"), sim)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(top_n);

        Ok(ranked(
            hits.into_iter()
                .map(|(chunk_id, score)| RetrievalCandidate {
                    chunk_id,
                    score,
                    source: CandidateSource::Vector,
                    rank: 0,
                })
                .collect(),
        ))
    }

    async fn upsert(
        &self,
        space: &str,
        chunk_id: &str,
        vector: &[f32],
        _metadata: &Metadata,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (space, chunk_id, dims, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(space, chunk_id) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(space)
        .bind(chunk_id)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, space: &str, chunk_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for id in chunk_ids {
            sqlx::query("DELETE FROM chunk_vectors WHERE space = ? AND chunk_id = ?")
                .bind(space)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn drop_space(&self, space: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE space = ?")
            .bind(space)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn count(&self, space: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE space = ?")
            .bind(space)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as usize)
    }
}
