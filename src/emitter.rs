// Copyright 2025 Cowboy AI, LLC.

//! Content-addressed file emission with source→output provenance.
//!
//! Writes are idempotent on identical content: a second `write` call with
//! the same bytes at the same path is a no-op. Different bytes at an
//! existing path is an error — the caller is expected to namespace by
//! `target` if two producers genuinely disagree about a path's content.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by the emitter.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("path {path} already holds different content under target `{target}`")]
    ContentConflict { path: String, target: String },

    #[error("io error writing {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
}

/// The result of a single `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub ok: bool,
    pub written: bool,
}

/// Provenance for one emitted path: its content hash, the target it was
/// rendered for, the concept it was derived from, and the source paths
/// that fed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub hash: String,
    pub target: String,
    pub concept: String,
    pub sources: Vec<String>,
}

fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Describes one file to emit, for `write`/`write_batch`.
#[derive(Debug, Clone)]
pub struct FileWrite {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub target: String,
    pub concept: String,
    pub sources: Vec<String>,
}

/// Content-addressed emitter: tracks `path -> Provenance` in memory and
/// writes files atomically (write-temp + rename) to disk.
#[derive(Default)]
pub struct Emitter {
    provenance: RwLock<HashMap<PathBuf, Provenance>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one file, returning whether it was actually written.
    #[tracing::instrument(skip(self, file), fields(path = %file.path.display(), target = %file.target))]
    pub async fn write(&self, file: FileWrite) -> Result<WriteOutcome, EmitError> {
        let hash = hash_bytes(&file.content);

        let mut guard = self.provenance.write().await;
        if let Some(existing) = guard.get(&file.path) {
            if existing.hash == hash {
                tracing::debug!("identical content already written, skipping");
                return Ok(WriteOutcome { ok: true, written: false });
            }
            if existing.target != file.target {
                return Err(EmitError::ContentConflict {
                    path: file.path.display().to_string(),
                    target: file.target.clone(),
                });
            }
            return Err(EmitError::ContentConflict {
                path: file.path.display().to_string(),
                target: file.target.clone(),
            });
        }

        write_atomic(&file.path, &file.content).map_err(|source| EmitError::Io {
            path: file.path.display().to_string(),
            source,
        })?;

        guard.insert(
            file.path.clone(),
            Provenance { hash, target: file.target.clone(), concept: file.concept.clone(), sources: file.sources.clone() },
        );
        tracing::info!("wrote new content");
        Ok(WriteOutcome { ok: true, written: true })
    }

    /// Write a batch of files. Semantically equivalent to looping `write`;
    /// independent paths are written concurrently.
    pub async fn write_batch(&self, files: Vec<FileWrite>) -> Vec<Result<WriteOutcome, EmitError>> {
        let futures = files.into_iter().map(|f| self.write(f));
        futures::future::join_all(futures).await
    }

    /// Reverse-lookup: every output path whose provenance lists
    /// `source_path` among its sources. Used to answer impact queries —
    /// "what gets regenerated if I change this source file?"
    pub async fn affected(&self, source_path: &str) -> Vec<PathBuf> {
        let guard = self.provenance.read().await;
        let mut out: Vec<PathBuf> = guard
            .iter()
            .filter(|(_, prov)| prov.sources.iter().any(|s| s == source_path))
            .map(|(path, _)| path.clone())
            .collect();
        out.sort();
        out
    }

    /// The provenance record for a path, if it has been written.
    pub async fn provenance_for(&self, path: &Path) -> Option<Provenance> {
        self.provenance.read().await.get(path).cloned()
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str, target: &str, sources: Vec<&str>) -> FileWrite {
        FileWrite {
            path: PathBuf::from(path),
            content: content.as_bytes().to_vec(),
            target: target.to_string(),
            concept: "Counter".to_string(),
            sources: sources.into_iter().map(String::from).collect(),
        }
    }

    #[tokio::test]
    async fn first_write_is_written_second_identical_write_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/a.ts");
        let emitter = Emitter::new();

        let first = emitter
            .write(file(path.to_str().unwrap(), "export const x=1;", "typescript", vec!["specs/x.concept"]))
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome { ok: true, written: true });

        let second = emitter
            .write(file(path.to_str().unwrap(), "export const x=1;", "typescript", vec!["specs/x.concept"]))
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome { ok: true, written: false });

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "export const x=1;");
    }

    #[tokio::test]
    async fn conflicting_content_at_the_same_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/a.ts");
        let emitter = Emitter::new();

        emitter.write(file(path.to_str().unwrap(), "export const x=1;", "typescript", vec![])).await.unwrap();
        let err = emitter.write(file(path.to_str().unwrap(), "export const x=2;", "typescript", vec![])).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn affected_reverse_looks_up_outputs_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/a.ts");
        let emitter = Emitter::new();
        emitter
            .write(file(path.to_str().unwrap(), "export const x=1;", "typescript", vec!["specs/x.concept"]))
            .await
            .unwrap();

        let affected = emitter.affected("specs/x.concept").await;
        assert_eq!(affected, vec![path]);
        assert!(emitter.affected("specs/other.concept").await.is_empty());
    }

    #[tokio::test]
    async fn write_batch_runs_independent_writes() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = Emitter::new();
        let files = vec![
            file(dir.path().join("a.ts").to_str().unwrap(), "a", "typescript", vec![]),
            file(dir.path().join("b.ts").to_str().unwrap(), "b", "typescript", vec![]),
        ];
        let results = emitter.write_batch(files).await;
        assert!(results.iter().all(|r| matches!(r, Ok(WriteOutcome { written: true, .. }))));
    }
}
