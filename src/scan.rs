//! Filesystem walker feeding the `ingest` command.
//!
//! Walks a file or directory, applies include/exclude globs, and returns
//! documents sorted by source id for deterministic ingestion order.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::IngestConfig;

/// A document read from disk, keyed by its path relative to the scan root.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDocument {
    pub source_id: String,
    pub body: String,
}

/// Read `path`. A single file becomes one document whose source id is its
/// file name; a directory is walked recursively.
pub fn scan_path(path: &Path, config: &IngestConfig) -> Result<Vec<ScannedDocument>> {
    if !path.exists() {
        bail!("path does not exist: {}", path.display());
    }

    if path.is_file() {
        let source_id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        return Ok(vec![ScannedDocument {
            source_id,
            body: std::fs::read_to_string(path)?,
        }]);
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file = entry.path();
        let relative = file.strip_prefix(path).unwrap_or(file);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        // Binary or non-UTF-8 files are skipped rather than failing the scan.
        match std::fs::read_to_string(file) {
            Ok(body) => docs.push(ScannedDocument {
                source_id: rel_str,
                body,
            }),
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "skipping unreadable file"),
        }
    }

    docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(docs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
