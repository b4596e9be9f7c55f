//! SQLite-backed [`Catalog`].
//!
//! Collection records live in `collections`, the chunk ledger in `chunks`,
//! and the compensation queue in `pending_ops`. Generation bumps and the
//! version flip are single `UPDATE ... RETURNING` statements, so concurrent
//! writers never lose an increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use groundwork_core::catalog::{Catalog, PendingOp};
use groundwork_core::models::{Chunk, Collection, Metadata};
use groundwork_core::{Error, Result};

pub(crate) fn db_err(e: sqlx::Error) -> Error {
    Error::backend("sqlite", e)
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_collection(row: &SqliteRow) -> Collection {
    Collection {
        name: row.get("name"),
        embedding_model_version: row.get("embedding_model_version"),
        generation: row.get::<i64, _>("generation") as u64,
        chunk_count: row.get::<i64, _>("chunk_count") as u64,
        created_at: ts(row.get("created_at")),
        last_updated_at: ts(row.get("last_updated_at")),
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let metadata_json: String = row.get("metadata_json");
    let section_json: String = row.get("section_path_json");
    Chunk {
        chunk_id: row.get("chunk_id"),
        collection: row.get("collection"),
        source_id: row.get("source_id"),
        position: row.get::<i64, _>("position") as u32,
        text: row.get("text"),
        content_hash: row.get("content_hash"),
        embedding_model_version: row.get("embedding_model_version"),
        metadata: serde_json::from_str::<Metadata>(&metadata_json).unwrap_or_default(),
        section_path: serde_json::from_str(&section_json).unwrap_or_default(),
    }
}

const CHUNK_COLUMNS: &str = "chunk_id, collection, source_id, position, text, content_hash, \
     embedding_model_version, metadata_json, section_path_json";

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn refresh_count(&self, collection: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE collections
            SET chunk_count = (SELECT COUNT(*) FROM chunks WHERE collection = ?),
                last_updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(collection)
        .bind(Utc::now().timestamp())
        .bind(collection)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

fn unknown(name: &str) -> Error {
    Error::Validation(format!("unknown collection '{}'", name))
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn ensure_collection(&self, name: &str, model_version: &str) -> Result<Collection> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO collections (name, embedding_model_version, generation, chunk_count,
                                     created_at, last_updated_at)
            VALUES (?, ?, 0, 0, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(model_version)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.collection(name).await?.ok_or_else(|| unknown(name))
    }

    async fn collection(&self, name: &str) -> Result<Option<Collection>> {
        let row = sqlx::query("SELECT * FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_collection))
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query("SELECT * FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_collection).collect())
    }

    async fn bump_generation(&self, name: &str) -> Result<u64> {
        let generation: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE collections
            SET generation = generation + 1, last_updated_at = ?
            WHERE name = ?
            RETURNING generation
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        generation.map(|g| g as u64).ok_or_else(|| unknown(name))
    }

    async fn set_active_version(
        &self,
        name: &str,
        expected: &str,
        new_version: &str,
    ) -> Result<u64> {
        let generation: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE collections
            SET embedding_model_version = ?, generation = generation + 1, last_updated_at = ?
            WHERE name = ? AND embedding_model_version = ?
            RETURNING generation
            "#,
        )
        .bind(new_version)
        .bind(Utc::now().timestamp())
        .bind(name)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match generation {
            Some(g) => Ok(g as u64),
            None if self.exists(name).await? => Err(Error::Validation(format!(
                "collection '{}' is no longer on '{}'",
                name, expected
            ))),
            None => Err(unknown(name)),
        }
    }

    async fn chunks_for_source(&self, collection: &str, source_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE collection = ? AND source_id = ? \
             ORDER BY position, chunk_id",
            CHUNK_COLUMNS
        ))
        .bind(collection)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn all_chunks(&self, collection: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE collection = ? ORDER BY source_id, position, chunk_id",
            CHUNK_COLUMNS
        ))
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn get_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM chunks WHERE collection = ? AND chunk_id IN ({})",
            CHUNK_COLUMNS,
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(collection);
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

        let mut found: std::collections::HashMap<String, Chunk> = rows
            .iter()
            .map(row_to_chunk)
            .map(|c| (c.chunk_id.clone(), c))
            .collect();
        Ok(chunk_ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn put_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut collections: Vec<&str> = chunks.iter().map(|c| c.collection.as_str()).collect();
        collections.sort_unstable();
        collections.dedup();
        for name in &collections {
            if !self.exists(name).await? {
                return Err(unknown(name));
            }
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".into());
            let section_json =
                serde_json::to_string(&chunk.section_path).unwrap_or_else(|_| "[]".into());
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, collection, source_id, position, text, content_hash,
                                    embedding_model_version, metadata_json, section_path_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, chunk_id) DO UPDATE SET
                    source_id = excluded.source_id,
                    position = excluded.position,
                    text = excluded.text,
                    content_hash = excluded.content_hash,
                    embedding_model_version = excluded.embedding_model_version,
                    metadata_json = excluded.metadata_json,
                    section_path_json = excluded.section_path_json
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.collection)
            .bind(&chunk.source_id)
            .bind(chunk.position as i64)
            .bind(&chunk.text)
            .bind(&chunk.content_hash)
            .bind(&chunk.embedding_model_version)
            .bind(metadata_json)
            .bind(section_json)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        for name in collections {
            self.refresh_count(name).await?;
        }
        Ok(())
    }

    async fn remove_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM chunks WHERE collection = ? AND chunk_id IN ({})",
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(collection);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(db_err)?;
        self.refresh_count(collection).await
    }

    async fn retag_chunks(
        &self,
        collection: &str,
        chunk_ids: &[String],
        model_version: &str,
    ) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE chunks SET embedding_model_version = ? WHERE collection = ? AND chunk_id IN ({})",
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(model_version).bind(collection);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn enqueue_pending(&self, op: &PendingOp) -> Result<()> {
        let action_json = serde_json::to_string(&op.action).map_err(|e| Error::backend("sqlite", e))?;
        let ids_json = serde_json::to_string(&op.chunk_ids).map_err(|e| Error::backend("sqlite", e))?;
        sqlx::query(
            r#"
            INSERT INTO pending_ops (id, collection, action_json, chunk_ids_json, attempts,
                                     last_error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&op.id)
        .bind(&op.collection)
        .bind(action_json)
        .bind(ids_json)
        .bind(op.attempts as i64)
        .bind(&op.last_error)
        .bind(op.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn pending_ops(&self, limit: usize) -> Result<Vec<PendingOp>> {
        let rows = sqlx::query("SELECT * FROM pending_ops ORDER BY created_at, id LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let action_json: String = row.get("action_json");
                let ids_json: String = row.get("chunk_ids_json");
                Ok(PendingOp {
                    id: row.get("id"),
                    collection: row.get("collection"),
                    action: serde_json::from_str(&action_json)
                        .map_err(|e| Error::backend("sqlite", e))?,
                    chunk_ids: serde_json::from_str(&ids_json)
                        .map_err(|e| Error::backend("sqlite", e))?,
                    attempts: row.get::<i64, _>("attempts") as u32,
                    last_error: row.get("last_error"),
                    created_at: ts(row.get("created_at")),
                })
            })
            .collect()
    }

    async fn resolve_pending(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_ops WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_pending_failure(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE pending_ops SET attempts = attempts + 1, last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
