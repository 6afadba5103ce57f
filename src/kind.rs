// Copyright 2025 Cowboy AI, LLC.

//! The kind/transform DAG: a typed graph of source/model/artifact kinds
//! connected by concrete transformation edges.
//!
//! `Kind` is the object, `Transform` the structure-preserving morphism
//! between kinds, implemented as plain stored data rather than a generic
//! `Morphism` trait — the graph is queried and walked, never invoked.
//! Cyclic references across relations are handled by modeling the graph
//! as an adjacency list keyed by `(from, relation)` rather than assuming
//! a DAG.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node's role in the transform graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KindCategory {
    Source,
    Model,
    Artifact,
}

/// The relation a directed edge asserts between two kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    ParsesTo,
    NormalizesTo,
    RendersTo,
}

/// A directed edge asserting a concrete transformation module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub relation: Relation,
    pub transform: Option<String>,
}

/// Errors raised by kind-graph operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KindError {
    #[error("kind `{0}` has not been defined")]
    UnknownKind(String),
}

/// One step in a routed path: the kind reached, the relation that reached
/// it, and the transform that realizes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStep {
    pub to: String,
    pub relation: Relation,
    pub transform: Option<String>,
}

/// The result of `route`: either a concrete path or `Unreachable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Path(Vec<RouteStep>),
    Unreachable,
}

/// The kind/transform graph: append-only during bootstrap, queryable
/// thereafter.
#[derive(Default)]
pub struct KindGraph {
    // `IndexMap` (not `HashMap`) so `graph()` enumerates kinds in
    // definition order — useful for deterministic `copf kinds list`
    // output across runs rather than hash-iteration order.
    kinds: IndexMap<String, KindCategory>,
    edges: Vec<Edge>,
}

impl KindGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent add of a kind.
    pub fn define(&mut self, name: impl Into<String>, category: KindCategory) {
        self.kinds.entry(name.into()).or_insert(category);
    }

    /// Idempotent add of an edge. Both endpoints must already be defined.
    pub fn connect(
        &mut self,
        from: &str,
        to: &str,
        relation: Relation,
        transform: Option<String>,
    ) -> Result<(), KindError> {
        if !self.kinds.contains_key(from) {
            return Err(KindError::UnknownKind(from.to_string()));
        }
        if !self.kinds.contains_key(to) {
            return Err(KindError::UnknownKind(to.to_string()));
        }
        let edge = Edge { from: from.to_string(), to: to.to_string(), relation, transform };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    /// Every kind and edge currently registered.
    pub fn graph(&self) -> (Vec<(&str, KindCategory)>, &[Edge]) {
        (self.kinds.iter().map(|(k, v)| (k.as_str(), *v)).collect(), &self.edges)
    }

    /// Outgoing edges from `kind` (what it can be transformed into).
    pub fn consumers(&self, kind: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == kind).collect()
    }

    /// Incoming edges to `kind` (what produces it).
    pub fn producers(&self, kind: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == kind).collect()
    }

    /// BFS shortest path by edge count from `from` to `to`, ties broken
    /// lexicographically by the sequence of transform names.
    pub fn route(&self, from: &str, to: &str) -> Route {
        if from == to {
            return Route::Path(Vec::new());
        }
        let dist_to_target = self.distances_to(to);
        let Some(&total) = dist_to_target.get(from) else { return Route::Unreachable };
        if total == usize::MAX {
            return Route::Unreachable;
        }

        let mut path = Vec::new();
        let mut current = from.to_string();
        while current != to {
            let current_dist = dist_to_target[&current];
            let mut best: Option<&Edge> = None;
            for edge in self.edges.iter().filter(|e| e.from == current) {
                let Some(&next_dist) = dist_to_target.get(&edge.to) else { continue };
                if next_dist + 1 != current_dist {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some(b) => {
                        (edge.transform.as_deref().unwrap_or(""), edge.to.as_str())
                            < (b.transform.as_deref().unwrap_or(""), b.to.as_str())
                    }
                };
                if better {
                    best = Some(edge);
                }
            }
            let Some(edge) = best else { return Route::Unreachable };
            path.push(RouteStep { to: edge.to.clone(), relation: edge.relation, transform: edge.transform.clone() });
            current = edge.to.clone();
        }
        Route::Path(path)
    }

    fn distances_to(&self, target: &str) -> HashMap<String, usize> {
        let mut dist = HashMap::new();
        if !self.kinds.contains_key(target) {
            return dist;
        }
        dist.insert(target.to_string(), 0);
        let mut queue = VecDeque::new();
        queue.push_back(target.to_string());
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(target.to_string());
        while let Some(node) = queue.pop_front() {
            let d = dist[&node];
            for edge in self.edges.iter().filter(|e| e.to == node) {
                if visited.insert(edge.from.clone()) {
                    dist.insert(edge.from.clone(), d + 1);
                    queue.push_back(edge.from.clone());
                }
            }
        }
        dist
    }
}

/// Bootstrap the standard generator pipeline kind graph:
/// `ConceptDSL -> ConceptAST -> ConceptManifest -> TypeScriptFiles` via
/// `SpecParser`, `SchemaGen`, `TypeScriptGen`.
pub fn bootstrap_default_graph() -> KindGraph {
    let mut graph = KindGraph::new();
    graph.define("ConceptDSL", KindCategory::Source);
    graph.define("ConceptAST", KindCategory::Model);
    graph.define("ConceptManifest", KindCategory::Model);
    graph.define("TypeScriptFiles", KindCategory::Artifact);
    graph.connect("ConceptDSL", "ConceptAST", Relation::ParsesTo, Some("SpecParser".into())).unwrap();
    graph.connect("ConceptAST", "ConceptManifest", Relation::NormalizesTo, Some("SchemaGen".into())).unwrap();
    graph.connect("ConceptManifest", "TypeScriptFiles", Relation::RendersTo, Some("TypeScriptGen".into())).unwrap();
    graph
}
