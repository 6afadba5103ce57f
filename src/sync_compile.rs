// Copyright 2025 Cowboy AI, LLC.

//! Compiling `.sync` ASTs into indexed, executable `CompiledSync` rules.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::ast::{BuiltinCallAst, FilterOp, SyncAst, SyncMode, WhereOpAst};
use crate::value::Value;

/// The closed set of `where` builtins this implementation recognizes.
/// Any other identifier in a `bind(...)` call is a compile-time error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Uuid,
    Now,
}

impl Builtin {
    fn resolve(name: &str) -> Option<Self> {
        match name {
            "uuid" => Some(Builtin::Uuid),
            "now" => Some(Builtin::Now),
            _ => None,
        }
    }

    /// Evaluate the builtin, producing the value to bind.
    pub fn evaluate(self) -> serde_json::Value {
        match self {
            Builtin::Uuid => serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
            Builtin::Now => serde_json::Value::from(chrono::Utc::now().timestamp_millis()),
        }
    }
}

/// A `when` clause reduced to its matching key and binding plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenBindingPlan {
    pub concept: String,
    pub action: String,
    /// `None` matches any variant (indexed under the wildcard key).
    pub variant: Option<String>,
    pub inputs: Vec<(String, Value)>,
    pub outputs: Vec<(String, Value)>,
}

/// A resolved `where` operation, executed in order after `when` bindings
/// are gathered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolvedWhereOp {
    Bind { var: String, builtin: Builtin },
    Filter { left: Value, op: FilterOp, right: Value },
}

/// A fully resolved `then` invocation template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThenTemplate {
    pub concept: String,
    pub action: String,
    pub inputs: Vec<(String, Value)>,
}

/// The compiled, indexable form of a sync rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledSync {
    pub name: String,
    pub mode: SyncMode,
    /// Clause 0 is the rule's first-declared `when` clause, used when a
    /// binding plan needs an anchor by convention (e.g. `primary_clause`);
    /// at match time any clause in this list can anchor a firing, with the
    /// rest joined against the log (`spec.md` §4.F).
    pub when_clauses: Vec<WhenBindingPlan>,
    pub where_ops: Vec<ResolvedWhereOp>,
    pub then_templates: Vec<ThenTemplate>,
}

impl CompiledSync {
    pub fn primary_clause(&self) -> &WhenBindingPlan {
        &self.when_clauses[0]
    }
}

/// A candidate rule returned by `SyncIndex::candidates`, paired with the
/// index of the `when` clause that matched the triggering completion (the
/// *anchor* — not necessarily clause 0; any clause can trigger a rule, and
/// the remaining clauses are then joined against the log).
pub type IndexedCandidate = (Arc<CompiledSync>, usize);

/// Fatal sync-compilation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncCompileError {
    #[error("sync rule has no `when` clauses")]
    EmptyWhen,

    #[error("`where` references unknown builtin `{0}()`")]
    UnknownBuiltin(String),

    #[error("`then` template references unbound variable ?{0}")]
    UnboundVariable(String),
}

/// Compile a parsed sync rule into its indexable form.
pub fn compile_sync(ast: &SyncAst) -> Result<CompiledSync, SyncCompileError> {
    if ast.when.is_empty() {
        return Err(SyncCompileError::EmptyWhen);
    }

    let when_clauses: Vec<WhenBindingPlan> = ast
        .when
        .iter()
        .map(|w| WhenBindingPlan {
            concept: w.concept_uri.clone(),
            action: w.action.clone(),
            variant: w.variant.clone(),
            inputs: w.inputs.clone(),
            outputs: w.outputs.clone(),
        })
        .collect();

    let mut bound: HashSet<String> = HashSet::new();
    for clause in &when_clauses {
        for (_, v) in clause.inputs.iter().chain(clause.outputs.iter()) {
            let mut names = Vec::new();
            v.collect_variables(&mut names);
            bound.extend(names);
        }
    }

    let mut where_ops = Vec::with_capacity(ast.where_ops.len());
    for op in &ast.where_ops {
        match op {
            WhereOpAst::Bind { var, builtin } => {
                let resolved = resolve_builtin(builtin)?;
                where_ops.push(ResolvedWhereOp::Bind { var: var.clone(), builtin: resolved });
                bound.insert(var.clone());
            }
            WhereOpAst::Filter { expr } => {
                where_ops.push(ResolvedWhereOp::Filter { left: expr.left.clone(), op: expr.op, right: expr.right.clone() });
            }
        }
    }

    let mut then_templates = Vec::with_capacity(ast.then.len());
    for clause in &ast.then {
        for (_, v) in &clause.inputs {
            let mut names = Vec::new();
            v.collect_variables(&mut names);
            for name in names {
                if !bound.contains(&name) {
                    return Err(SyncCompileError::UnboundVariable(name));
                }
            }
        }
        then_templates.push(ThenTemplate {
            concept: clause.concept_uri.clone(),
            action: clause.action.clone(),
            inputs: clause.inputs.clone(),
        });
    }

    Ok(CompiledSync { name: ast.name.clone(), mode: ast.mode, when_clauses, where_ops, then_templates })
}

fn resolve_builtin(ast: &BuiltinCallAst) -> Result<Builtin, SyncCompileError> {
    Builtin::resolve(&ast.name).ok_or_else(|| SyncCompileError::UnknownBuiltin(ast.name.clone()))
}

/// Key used to look up candidate rules for a completion:
/// `(concept, action, variant)`, with `variant = None` meaning "any".
pub type SyncIndexKey = (String, String, Option<String>);

/// Index from `(concept, action, variant)` to the compiled rules that have
/// a `when` clause matching that key, each paired with the index of the
/// matching clause. Every clause of every rule is indexed as a potential
/// trigger — a multi-clause rule can fire off of *any* of its clauses
/// completing, joining the rest against the log (`spec.md` §4.F step 3).
#[derive(Default)]
pub struct SyncIndex {
    by_key: HashMap<SyncIndexKey, Vec<IndexedCandidate>>,
    registration_order: Vec<Arc<CompiledSync>>,
}

impl SyncIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled sync under every one of its `when` clauses' keys.
    pub fn register(&mut self, sync: CompiledSync) {
        let sync = Arc::new(sync);
        for (idx, clause) in sync.when_clauses.iter().enumerate() {
            let key = (clause.concept.clone(), clause.action.clone(), clause.variant.clone());
            self.by_key.entry(key).or_default().push((sync.clone(), idx));
        }
        self.registration_order.push(sync);
    }

    /// Candidates for a completion on `(concept, action, variant)`: every
    /// rule with a clause pinned to that exact variant, plus every rule
    /// with a wildcard clause for the same `(concept, action)`, in
    /// registration order with lexicographic name as the tie-break. Each
    /// candidate carries the index of the clause that anchors the match.
    pub fn candidates(&self, concept: &str, action: &str, variant: &str) -> Vec<IndexedCandidate> {
        let mut out: Vec<IndexedCandidate> = Vec::new();
        if let Some(pinned) = self.by_key.get(&(concept.to_string(), action.to_string(), Some(variant.to_string()))) {
            out.extend(pinned.iter().cloned());
        }
        if let Some(wild) = self.by_key.get(&(concept.to_string(), action.to_string(), None)) {
            out.extend(wild.iter().cloned());
        }
        out.sort_by(|(a, a_idx), (b, b_idx)| {
            let a_pos = self.registration_order.iter().position(|s| Arc::ptr_eq(s, a)).unwrap_or(usize::MAX);
            let b_pos = self.registration_order.iter().position(|s| Arc::ptr_eq(s, b)).unwrap_or(usize::MAX);
            a_pos.cmp(&b_pos).then_with(|| a.name.cmp(&b.name)).then_with(|| a_idx.cmp(b_idx))
        });
        out
    }

    pub fn all(&self) -> &[Arc<CompiledSync>] {
        &self.registration_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::parse_sync;

    #[test]
    fn compiles_single_clause_sync() {
        let (ast,) = (parse_sync(
            "sync R when { A/f: [] => [y: ?v] } then { B/g: [x: ?v] }",
            "r.sync",
        )
        .unwrap(),);
        let compiled = compile_sync(&ast).unwrap();
        assert_eq!(compiled.when_clauses.len(), 1);
        assert_eq!(compiled.then_templates.len(), 1);
    }

    #[test]
    fn rejects_unknown_builtin_at_compile_time() {
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v] } where { bind(random() as ?id) } then { B/g: [x: ?id] }",
            "r.sync",
        )
        .unwrap();
        let err = compile_sync(&ast).unwrap_err();
        assert_eq!(err, SyncCompileError::UnknownBuiltin("random".into()));
    }

    #[test]
    fn rejects_then_template_with_unbound_variable() {
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v] } then { B/g: [x: ?missing] }",
            "r.sync",
        )
        .unwrap();
        let err = compile_sync(&ast).unwrap_err();
        assert_eq!(err, SyncCompileError::UnboundVariable("missing".into()));
    }

    #[test]
    fn index_returns_pinned_and_wildcard_candidates() {
        let pinned_ast = parse_sync(
            "sync Pinned when { A/f: [] => [variant: ok, y: ?v] } then { B/g: [x: ?v] }",
            "p.sync",
        )
        .unwrap();
        let wild_ast = parse_sync(
            "sync Wild when { A/f: [] => [y: ?v] } then { B/h: [x: ?v] }",
            "w.sync",
        )
        .unwrap();
        let mut index = SyncIndex::new();
        index.register(compile_sync(&pinned_ast).unwrap());
        index.register(compile_sync(&wild_ast).unwrap());

        let candidates = index.candidates("A", "f", "ok");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0.name, "Pinned");
        assert_eq!(candidates[1].0.name, "Wild");

        let other_variant = index.candidates("A", "f", "error");
        assert_eq!(other_variant.len(), 1);
        assert_eq!(other_variant[0].0.name, "Wild");
    }

    #[test]
    fn index_registers_every_when_clause_as_a_trigger() {
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v], B/g: [] => [z: ?v] } then { C/h: [k: ?v] }",
            "r.sync",
        )
        .unwrap();
        let mut index = SyncIndex::new();
        index.register(compile_sync(&ast).unwrap());

        let via_first = index.candidates("A", "f", "ok");
        assert_eq!(via_first.len(), 1);
        assert_eq!(via_first[0].1, 0);

        let via_second = index.candidates("B", "g", "ok");
        assert_eq!(via_second.len(), 1);
        assert_eq!(via_second[0].1, 1);
    }
}
