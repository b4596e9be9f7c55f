//! Collection statistics and health overview.
//!
//! Summarizes what is indexed per collection: chunk counts, vector
//! coverage in the active embedding space, the generation counter, and the
//! size of the compensation queue. Used by `gw stats`.

use anyhow::Result;
use serde::Serialize;

use groundwork_core::index::vector_space;

use crate::backends::Backends;
use crate::ingest::DISABLED_MODEL;

/// Upper bound on pending ops inspected for the summary.
const PENDING_SCAN_LIMIT: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub embedding_model_version: String,
    pub generation: u64,
    pub chunk_count: u64,
    pub embedded_count: u64,
    pub pending_ops: usize,
    pub last_updated_ts: i64,
}

/// Gather stats for every collection, sorted by name.
pub async fn collect_stats(backends: &Backends) -> Result<Vec<CollectionStats>> {
    let pending = backends.catalog.pending_ops(PENDING_SCAN_LIMIT).await?;
    let mut out = Vec::new();

    for coll in backends.catalog.list_collections().await? {
        let embedded_count = if coll.embedding_model_version == DISABLED_MODEL {
            0
        } else {
            backends
                .vector
                .count(&vector_space(&coll.name, &coll.embedding_model_version))
                .await? as u64
        };
        out.push(CollectionStats {
            pending_ops: pending.iter().filter(|op| op.collection == coll.name).count(),
            name: coll.name,
            embedding_model_version: coll.embedding_model_version,
            generation: coll.generation,
            chunk_count: coll.chunk_count,
            embedded_count,
            last_updated_ts: coll.last_updated_at.timestamp(),
        });
    }

    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Print the stats table.
pub async fn run_stats(backends: &Backends) -> Result<()> {
    let stats = collect_stats(backends).await?;

    println!("Groundwork: Collection Stats");
    println!("=============================");
    println!();

    if stats.is_empty() {
        println!("  No collections yet. Run `gw ingest <path>` first.");
        println!();
        return Ok(());
    }

    println!(
        "  {:<20} {:<20} {:>6} {:>8} {:>10} {:>8}   {}",
        "COLLECTION", "MODEL", "GEN", "CHUNKS", "EMBEDDED", "PENDING", "UPDATED"
    );
    println!("  {}", "-".repeat(98));

    for s in &stats {
        let coverage = if s.chunk_count > 0 {
            format!("{} ({}%)", s.embedded_count, (s.embedded_count * 100) / s.chunk_count)
        } else {
            "0".to_string()
        };
        println!(
            "  {:<20} {:<20} {:>6} {:>8} {:>10} {:>8}   {}",
            s.name,
            s.embedding_model_version,
            s.generation,
            s.chunk_count,
            coverage,
            s.pending_ops,
            format_ts_relative(s.last_updated_ts)
        );
    }

    let pending: usize = stats.iter().map(|s| s.pending_ops).sum();
    if pending > 0 {
        println!();
        println!("  {} compensation op(s) queued. Run `gw retry-pending`.", pending);
    }
    println!();
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
