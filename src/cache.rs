// Copyright 2025 Cowboy AI, LLC.

//! Hash-based staleness tracking for compiled artifacts.
//!
//! `compile --cache` hashes every source file, persists the manifest
//! alongside the compiled artifacts under `cache_dir`, and later runs
//! compare current hashes against that manifest: any mismatch invalidates
//! every downstream artifact. The cache does not do fine-grained
//! per-artifact invalidation — any source hash changing invalidates the
//! whole downstream set rather than tracking which artifact depended on
//! which source.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Configuration for one cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { cache_dir: PathBuf::from(".copf-cache") }
    }
}

/// `sources.json`: relative path -> sha256 hex digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesManifest(pub BTreeMap<String, String>);

/// Errors raised while reading or writing the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("malformed cache manifest at {path}: {source}")]
    Malformed { path: String, #[source] source: serde_json::Error },
}

fn hash_file(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Compute the hash of a single file's content.
pub fn hash_source(content: &[u8]) -> String {
    hash_file(content)
}

/// Build a `SourcesManifest` from `(relative_path, content)` pairs.
pub fn build_manifest<'a>(sources: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> SourcesManifest {
    let mut map = BTreeMap::new();
    for (path, content) in sources {
        map.insert(path.to_string(), hash_source(content));
    }
    SourcesManifest(map)
}

/// Compare a freshly computed manifest against the persisted one. Any
/// differing or missing/added path counts as stale.
pub fn is_stale(persisted: &SourcesManifest, current: &SourcesManifest) -> bool {
    persisted.0 != current.0
}

/// A compiled-artifact cache rooted at `cache_dir`: `sources.json` plus
/// `manifests/<Concept>.json` and `syncs/<file>.json` payloads.
pub struct Cache {
    config: CacheConfig,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    fn sources_path(&self) -> PathBuf {
        self.config.cache_dir.join("sources.json")
    }

    fn manifest_path(&self, concept: &str) -> PathBuf {
        self.config.cache_dir.join("manifests").join(format!("{concept}.json"))
    }

    fn sync_path(&self, file_stem: &str) -> PathBuf {
        self.config.cache_dir.join("syncs").join(format!("{file_stem}.json"))
    }

    fn registrations_path(&self) -> PathBuf {
        self.config.cache_dir.join("registrations.json")
    }

    /// Persist the source-hash manifest.
    pub fn write_sources_manifest(&self, manifest: &SourcesManifest) -> Result<(), CacheError> {
        write_json(&self.sources_path(), manifest)
    }

    /// Load the persisted source-hash manifest, if present.
    pub fn read_sources_manifest(&self) -> Result<Option<SourcesManifest>, CacheError> {
        read_json_opt(&self.sources_path())
    }

    /// Persist a compiled `ConceptManifest` under the cache.
    pub fn write_concept_manifest(&self, concept: &str, manifest: &crate::manifest::ConceptManifest) -> Result<(), CacheError> {
        write_json(&self.manifest_path(concept), manifest)
    }

    /// Load a previously cached `ConceptManifest`.
    pub fn read_concept_manifest(&self, concept: &str) -> Result<Option<crate::manifest::ConceptManifest>, CacheError> {
        read_json_opt(&self.manifest_path(concept))
    }

    /// Persist the compiled syncs parsed from one `.sync` file (there may
    /// be several rules per file, hence the array form).
    pub fn write_sync_entries(&self, file_stem: &str, entries: &[crate::sync_compile::CompiledSync]) -> Result<(), CacheError> {
        write_json(&self.sync_path(file_stem), entries)
    }

    pub fn read_sync_entries(&self, file_stem: &str) -> Result<Option<Vec<crate::sync_compile::CompiledSync>>, CacheError> {
        read_json_opt(&self.sync_path(file_stem))
    }

    /// Persist the registration table: which transport serves which
    /// concept URI, and (for in-process handlers) the module path that
    /// implements it (`spec.md` §4.J, §6).
    pub fn write_registrations(&self, entries: &[RegistrationEntry]) -> Result<(), CacheError> {
        write_json(&self.registrations_path(), entries)
    }

    pub fn read_registrations(&self) -> Result<Option<Vec<RegistrationEntry>>, CacheError> {
        read_json_opt(&self.registrations_path())
    }

    /// Whether the cache currently on disk is stale relative to `current`.
    /// Missing persisted manifest counts as stale (nothing cached yet).
    #[tracing::instrument(skip(self, current), fields(cache_dir = %self.config.cache_dir.display()))]
    pub fn check_staleness(&self, current: &SourcesManifest) -> Result<bool, CacheError> {
        match self.read_sources_manifest()? {
            Some(persisted) => {
                let stale = is_stale(&persisted, current);
                tracing::debug!(stale, "compared persisted sources manifest against current");
                Ok(stale)
            }
            None => {
                tracing::debug!("no persisted manifest found, treating cache as stale");
                Ok(true)
            }
        }
    }
}

/// One row of the registration table (`.copf-cache/registrations.json`):
/// the URI a concept is reachable at, the concept it names, which
/// transport serves it, and (for in-process handlers) the module path
/// that implements it (`spec.md` §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    pub uri: String,
    pub concept_name: String,
    pub transport: String,
    pub impl_path: Option<String>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| CacheError::Io { path: path.display().to_string(), source })?;
    }
    let content = serde_json::to_vec_pretty(value).expect("cache payloads always serialize");
    std::fs::write(path, content).map_err(|source| CacheError::Io { path: path.display().to_string(), source })
}

fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|source| CacheError::Malformed { path: path.display().to_string(), source })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::Io { path: path.display().to_string(), source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_hashes_are_stable_for_identical_content() {
        let m1 = build_manifest(vec![("a.concept", b"concept A {}".as_slice())]);
        let m2 = build_manifest(vec![("a.concept", b"concept A {}".as_slice())]);
        assert_eq!(m1, m2);
    }

    #[test]
    fn any_changed_file_marks_the_whole_cache_stale() {
        let persisted = build_manifest(vec![
            ("a.concept", b"concept A {}".as_slice()),
            ("b.concept", b"concept B {}".as_slice()),
        ]);
        let current = build_manifest(vec![
            ("a.concept", b"concept A {}".as_slice()),
            ("b.concept", b"concept B { changed }".as_slice()),
        ]);
        assert!(is_stale(&persisted, &current));
    }

    #[test]
    fn round_trips_sources_manifest_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(CacheConfig { cache_dir: dir.path().to_path_buf() });
        let manifest = build_manifest(vec![("a.concept", b"concept A {}".as_slice())]);
        cache.write_sources_manifest(&manifest).unwrap();
        let loaded = cache.read_sources_manifest().unwrap().unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn missing_cache_is_reported_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(CacheConfig { cache_dir: dir.path().to_path_buf() });
        let current = build_manifest(vec![("a.concept", b"concept A {}".as_slice())]);
        assert!(cache.check_staleness(&current).unwrap());
    }

    #[test]
    fn unchanged_cache_after_write_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(CacheConfig { cache_dir: dir.path().to_path_buf() });
        let current = build_manifest(vec![("a.concept", b"concept A {}".as_slice())]);
        cache.write_sources_manifest(&current).unwrap();
        assert!(!cache.check_staleness(&current).unwrap());
    }

    #[test]
    fn round_trips_compiled_sync_entries_through_disk() {
        use crate::spec::parse_sync;
        use crate::sync_compile::compile_sync;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(CacheConfig { cache_dir: dir.path().to_path_buf() });
        let ast = parse_sync("sync R when { A/f: [] => [y: ?v] } then { B/g: [x: ?v] }", "r.sync").unwrap();
        let compiled = compile_sync(&ast).unwrap();

        cache.write_sync_entries("r", std::slice::from_ref(&compiled)).unwrap();
        let loaded = cache.read_sync_entries("r").unwrap().unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "R");
        assert_eq!(loaded[0].when_clauses.len(), 1);
        assert_eq!(loaded[0].then_templates.len(), 1);
    }

    #[test]
    fn round_trips_registrations_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(CacheConfig { cache_dir: dir.path().to_path_buf() });
        let entries = vec![
            RegistrationEntry {
                uri: "urn:copf/Counter".into(),
                concept_name: "Counter".into(),
                transport: "in-process".into(),
                impl_path: Some("handlers::counter".into()),
            },
            RegistrationEntry {
                uri: "urn:copf/Ledger".into(),
                concept_name: "Ledger".into(),
                transport: "in-process".into(),
                impl_path: None,
            },
        ];

        cache.write_registrations(&entries).unwrap();
        let loaded = cache.read_registrations().unwrap().unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn missing_registrations_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(CacheConfig { cache_dir: dir.path().to_path_buf() });
        assert!(cache.read_registrations().unwrap().is_none());
    }
}
