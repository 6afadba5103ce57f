// Copyright 2025 Cowboy AI, LLC.

//! Per-concept key-value storage.
//!
//! An `#[async_trait]` interface in front of a reference in-memory
//! implementation, so a real backend can be substituted without touching
//! the engine. The reference implementation holds its own map and is
//! never shared across concepts — each concept gets a fresh handle from
//! `StorageFactory`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::RwLock;

use crate::errors::CopfResult;

/// A conjunction of field-equals predicates used by `find`/`delMany`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(pub Vec<(String, Json)>);

impl Filter {
    /// The empty filter, matching every record in a collection.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    /// A filter requiring a single field to equal a value.
    pub fn eq(field: impl Into<String>, value: Json) -> Self {
        Self(vec![(field.into(), value)])
    }

    /// Add another field-equals predicate.
    pub fn and(mut self, field: impl Into<String>, value: Json) -> Self {
        self.0.push((field.into(), value));
        self
    }

    fn matches(&self, record: &Json) -> bool {
        self.0.iter().all(|(field, expected)| {
            record.get(field).map(|actual| crate::value::deep_equal(actual, expected)).unwrap_or(false)
        })
    }
}

/// Storage handle isolated to a single concept.
#[async_trait]
pub trait ConceptStorage: Send + Sync {
    async fn put(&self, collection: &str, key: &str, value: Json) -> CopfResult<()>;
    async fn get(&self, collection: &str, key: &str) -> CopfResult<Option<Json>>;
    async fn find(&self, collection: &str, filter: &Filter) -> CopfResult<Vec<Json>>;
    async fn del(&self, collection: &str, key: &str) -> CopfResult<()>;
    async fn del_many(&self, collection: &str, filter: &Filter) -> CopfResult<usize>;
}

/// Reference storage backend: a nested map `collection -> key -> value`
/// guarded by a single `RwLock`.
#[derive(Default)]
pub struct InMemoryStorage {
    collections: RwLock<HashMap<String, HashMap<String, Json>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConceptStorage for InMemoryStorage {
    async fn put(&self, collection: &str, key: &str, value: Json) -> CopfResult<()> {
        let mut guard = self.collections.write().await;
        guard.entry(collection.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> CopfResult<Option<Json>> {
        let guard = self.collections.read().await;
        Ok(guard.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> CopfResult<Vec<Json>> {
        let guard = self.collections.read().await;
        // `find` returns a snapshot: the clones below are taken while
        // holding the read lock, so concurrent mutations starting after
        // this call are never visible in the returned list.
        Ok(guard
            .get(collection)
            .map(|c| c.values().filter(|v| filter.matches(v)).cloned().collect())
            .unwrap_or_default())
    }

    async fn del(&self, collection: &str, key: &str) -> CopfResult<()> {
        let mut guard = self.collections.write().await;
        if let Some(c) = guard.get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }

    async fn del_many(&self, collection: &str, filter: &Filter) -> CopfResult<usize> {
        let mut guard = self.collections.write().await;
        let Some(c) = guard.get_mut(collection) else { return Ok(0) };
        let doomed: Vec<String> = c.iter().filter(|(_, v)| filter.matches(v)).map(|(k, _)| k.clone()).collect();
        for k in &doomed {
            c.remove(k);
        }
        Ok(doomed.len())
    }
}

/// Hands out one isolated `InMemoryStorage` per concept name. Concepts
/// never see each other's handle; `storage_for` is idempotent per name so
/// repeated lookups for the same concept return the same backing map.
#[derive(Default)]
pub struct StorageFactory {
    handles: RwLock<HashMap<String, std::sync::Arc<InMemoryStorage>>>,
}

impl StorageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn storage_for(&self, concept: &str) -> std::sync::Arc<InMemoryStorage> {
        if let Some(existing) = self.handles.read().await.get(concept) {
            return existing.clone();
        }
        let mut guard = self.handles.write().await;
        guard.entry(concept.to_string()).or_insert_with(|| std::sync::Arc::new(InMemoryStorage::new())).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = InMemoryStorage::new();
        storage.put("counters", "c1", serde_json::json!({"total": 3})).await.unwrap();
        let got = storage.get("counters", "c1").await.unwrap();
        assert_eq!(got, Some(serde_json::json!({"total": 3})));
    }

    #[tokio::test]
    async fn find_filters_by_field_equality() {
        let storage = InMemoryStorage::new();
        storage.put("users", "u1", serde_json::json!({"role": "admin"})).await.unwrap();
        storage.put("users", "u2", serde_json::json!({"role": "member"})).await.unwrap();
        let admins = storage.find("users", &Filter::eq("role", serde_json::json!("admin"))).await.unwrap();
        assert_eq!(admins.len(), 1);
    }

    #[tokio::test]
    async fn del_many_removes_matching_and_reports_count() {
        let storage = InMemoryStorage::new();
        storage.put("users", "u1", serde_json::json!({"role": "member"})).await.unwrap();
        storage.put("users", "u2", serde_json::json!({"role": "member"})).await.unwrap();
        storage.put("users", "u3", serde_json::json!({"role": "admin"})).await.unwrap();
        let removed = storage.del_many("users", &Filter::eq("role", serde_json::json!("member"))).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(storage.find("users", &Filter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_factory_gives_distinct_handles_per_concept() {
        let factory = StorageFactory::new();
        let a = factory.storage_for("Counter").await;
        let b = factory.storage_for("Ledger").await;
        a.put("state", "x", serde_json::json!(1)).await.unwrap();
        assert_eq!(b.get("state", "x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn storage_factory_returns_same_handle_for_same_name() {
        let factory = StorageFactory::new();
        let a = factory.storage_for("Counter").await;
        a.put("state", "x", serde_json::json!(1)).await.unwrap();
        let a_again = factory.storage_for("Counter").await;
        assert_eq!(a_again.get("state", "x").await.unwrap(), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn find_and_del_many_agree_on_a_randomized_fixture() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let storage = InMemoryStorage::new();

        let mut admin_count = 0;
        for i in 0..200 {
            let is_admin = rng.gen_bool(0.3);
            if is_admin {
                admin_count += 1;
            }
            let role = if is_admin { "admin" } else { "member" };
            storage.put("users", &format!("u{i}"), serde_json::json!({"role": role})).await.unwrap();
        }

        let admins = storage.find("users", &Filter::eq("role", serde_json::json!("admin"))).await.unwrap();
        assert_eq!(admins.len(), admin_count);

        let removed = storage.del_many("users", &Filter::eq("role", serde_json::json!("member"))).await.unwrap();
        assert_eq!(removed, 200 - admin_count);
        assert_eq!(storage.find("users", &Filter::all()).await.unwrap().len(), admin_count);
    }
}
