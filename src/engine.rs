// Copyright 2025 Cowboy AI, LLC.

//! The synchronization engine: action log, completion-driven matcher, and
//! dispatcher.
//!
//! The engine owns the single append-only `ActionLog` and the immutable
//! `SyncIndex`. It does not dispatch invocations itself — `on_completion`
//! *returns* the invocations a caller should run through the `Registry`,
//! feeding the resulting completions back in with `parent` set to the
//! invocation's id. This separates command handling from the aggregate's
//! pure decision logic: the engine decides what should happen next and
//! leaves *doing it* to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::ids::{FlowId, InvocationId, ParentId};
use crate::sync_compile::{CompiledSync, ResolvedWhereOp, SyncIndex, WhenBindingPlan};
use crate::transport::{ActionCompletion, ActionInvocation};
use crate::value::deep_equal;

/// Configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum causal recursion depth within one flow before a
    /// `flow_overflow` error halts the branch (default 128).
    pub max_flow_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_flow_depth: 128 }
    }
}

/// One append-only log entry: either a completion or an invocation, with
/// enough metadata to reconstruct a flow's causal tree.
#[derive(Debug, Clone)]
pub enum LogRecord {
    Completion(ActionCompletion),
    Invocation(ActionInvocation),
}

impl LogRecord {
    pub fn flow(&self) -> FlowId {
        match self {
            LogRecord::Completion(c) => c.flow,
            LogRecord::Invocation(i) => i.flow,
        }
    }

    pub fn parent(&self) -> Option<ParentId> {
        match self {
            LogRecord::Completion(c) => c.parent,
            LogRecord::Invocation(i) => i.parent,
        }
    }
}

/// Errors the engine can raise synchronously (most runtime faults
/// surface as logged `error`/`timeout` completions instead).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("flow {flow} exceeded max depth {max_depth}")]
    FlowOverflow { flow: String, max_depth: usize },
}

/// A pending `lazy` invocation, queued until `flush_lazy` is called
/// (an explicit poll, not a timer — a lazy invocation is only appended to
/// the log once the caller asks for it).
struct PendingLazy {
    invocation: ActionInvocation,
}

/// The append-only action log plus the compiled sync index and the
/// deferred-lazy queue. `ActionLog` is the only shared mutable structure
/// in the core; every append goes through the single `Mutex` guarding it,
/// held across the synchronous matching algorithm but never across a
/// suspension point (the engine itself performs no I/O).
pub struct SyncEngine {
    config: EngineConfig,
    log: Mutex<Vec<LogRecord>>,
    sync_index: Mutex<SyncIndex>,
    lazy_queue: Mutex<Vec<PendingLazy>>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, log: Mutex::new(Vec::new()), sync_index: Mutex::new(SyncIndex::new()), lazy_queue: Mutex::new(Vec::new()) }
    }

    /// Register a compiled sync. Registration is serialized and the index
    /// is immutable from any reader's point of view once this returns.
    pub async fn register_sync(&self, sync: CompiledSync) {
        self.sync_index.lock().await.register(sync);
    }

    /// Every currently registered sync, in registration order.
    pub async fn registered_syncs(&self) -> Vec<Arc<CompiledSync>> {
        self.sync_index.lock().await.all().to_vec()
    }

    /// The full log, for trace reconstruction and tests.
    pub async fn log_snapshot(&self) -> Vec<LogRecord> {
        self.log.lock().await.clone()
    }

    /// Core matching algorithm: append `completion`, match candidate
    /// rules, join multi-clause patterns within the same flow, run
    /// `where` operations, and return the `then` invocations to dispatch.
    /// Lazy-mode matches are queued rather than returned.
    #[tracing::instrument(skip(self, completion), fields(concept = %completion.concept, action = %completion.action, variant = %completion.variant, flow = %completion.flow))]
    pub async fn on_completion(&self, completion: ActionCompletion) -> Result<Vec<ActionInvocation>, EngineError> {
        let mut log = self.log.lock().await;
        log.push(LogRecord::Completion(completion.clone()));

        let depth = causal_depth(&log, completion.flow, completion.parent);
        if depth > self.config.max_flow_depth {
            tracing::warn!(depth, max_depth = self.config.max_flow_depth, "flow exceeded max causal depth");
            return Err(EngineError::FlowOverflow {
                flow: completion.flow.to_string(),
                max_depth: self.config.max_flow_depth,
            });
        }

        let index = self.sync_index.lock().await;
        let candidates = index.candidates(&completion.concept, &completion.action, &completion.variant);
        drop(index);
        tracing::debug!(candidate_count = candidates.len(), "matching candidate syncs");

        let mut eager_invocations = Vec::new();
        let mut lazy_invocations = Vec::new();

        for (rule, anchor_idx) in candidates {
            let anchor_clause = &rule.when_clauses[anchor_idx];
            let Some(mut env) = bind_clause(anchor_clause, &completion.input, &completion.output) else { continue };

            if !join_remaining_clauses(&rule, anchor_idx, &log, completion.flow, &mut env) {
                continue;
            }

            if !run_where_ops(&rule.where_ops, &mut env) {
                continue;
            }

            for template in &rule.then_templates {
                let Ok(input) = resolve_inputs(&template.inputs, &env) else { continue };
                let invocation = ActionInvocation {
                    id: InvocationId::new(),
                    concept: template.concept.clone(),
                    action: template.action.clone(),
                    input,
                    flow: completion.flow,
                    sync: Some(rule.name.clone()),
                    parent: Some(ParentId::Completion(completion.id)),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                match rule.mode {
                    crate::spec::ast::SyncMode::Eager => eager_invocations.push(invocation),
                    crate::spec::ast::SyncMode::Lazy => lazy_invocations.push(invocation),
                }
            }
        }

        for invocation in &eager_invocations {
            log.push(LogRecord::Invocation(invocation.clone()));
        }
        drop(log);

        if !lazy_invocations.is_empty() {
            let mut queue = self.lazy_queue.lock().await;
            queue.extend(lazy_invocations.into_iter().map(|invocation| PendingLazy { invocation }));
        }

        tracing::debug!(eager_count = eager_invocations.len(), "dispatching eager invocations");
        Ok(eager_invocations)
    }

    /// Drain and return every queued lazy invocation, appending each to
    /// the log. Lazy invocations queue rather than dispatch immediately
    /// and only flush on this explicit poll.
    #[tracing::instrument(skip(self))]
    pub async fn flush_lazy(&self) -> Vec<ActionInvocation> {
        let mut queue = self.lazy_queue.lock().await;
        let pending = std::mem::take(&mut *queue);
        drop(queue);

        let mut log = self.log.lock().await;
        let mut out = Vec::with_capacity(pending.len());
        for p in pending {
            log.push(LogRecord::Invocation(p.invocation.clone()));
            out.push(p.invocation);
        }
        tracing::debug!(flushed_count = out.len(), "flushed lazy invocations");
        out
    }
}

/// Causal depth of the record that would follow `parent` within `flow`:
/// the number of ancestors already in the log, used to detect
/// `flow_overflow`.
fn causal_depth(log: &[LogRecord], flow: FlowId, mut parent: Option<ParentId>) -> usize {
    let mut depth = 0;
    while let Some(p) = parent {
        depth += 1;
        if depth > 100_000 {
            // Defensive bound: a genuine cycle would otherwise loop
            // forever walking a corrupted log. A conforming log's causal
            // tree is acyclic, so this is never reached in practice.
            break;
        }
        parent = match p {
            ParentId::Completion(id) => log.iter().rev().find_map(|r| match r {
                LogRecord::Completion(c) if c.id == id && c.flow == flow => Some(c.parent).flatten(),
                _ => None,
            }),
            ParentId::Invocation(id) => log.iter().rev().find_map(|r| match r {
                LogRecord::Invocation(i) if i.id == id && i.flow == flow => Some(i.parent).flatten(),
                _ => None,
            }),
        };
    }
    depth
}

/// Bind a `when` clause's input/output patterns against a completion's
/// actual input/output records. Literal fields must equal; variable
/// fields populate the environment; a mismatch discards the rule.
fn bind_clause(
    clause: &WhenBindingPlan,
    actual_input: &serde_json::Value,
    actual_output: &serde_json::Value,
) -> Option<BTreeMap<String, serde_json::Value>> {
    let mut env = BTreeMap::new();
    for (field, pattern) in &clause.inputs {
        let actual = actual_input.get(field)?;
        bind_value(pattern, actual, &mut env)?;
    }
    for (field, pattern) in &clause.outputs {
        let actual = actual_output.get(field)?;
        bind_value(pattern, actual, &mut env)?;
    }
    Some(env)
}

/// Bind one pattern value against an actual JSON value, mutating `env`.
/// Returns `None` on a literal mismatch or a variable re-bound to a
/// different value.
fn bind_value(pattern: &crate::value::Value, actual: &serde_json::Value, env: &mut BTreeMap<String, serde_json::Value>) -> Option<()> {
    use crate::value::{Literal, Value};
    match pattern {
        Value::Literal(Literal::String(s)) => (actual == &serde_json::Value::String(s.clone())).then_some(()),
        Value::Literal(Literal::Int(n)) => (actual.as_i64() == Some(*n)).then_some(()),
        Value::Literal(Literal::Decimal(n)) => (actual.as_f64() == Some(*n)).then_some(()),
        Value::Literal(Literal::Bool(b)) => (actual.as_bool() == Some(*b)).then_some(()),
        Value::Variable(name) => match env.get(name) {
            Some(existing) => deep_equal(existing, actual).then_some(()),
            None => {
                env.insert(name.clone(), actual.clone());
                Some(())
            }
        },
        Value::Record(fields) => {
            let obj = actual.as_object()?;
            for (k, v) in fields {
                bind_value(v, obj.get(k)?, env)?;
            }
            Some(())
        }
        Value::List(items) => {
            let arr = actual.as_array()?;
            if arr.len() != items.len() {
                return None;
            }
            for (pattern_item, actual_item) in items.iter().zip(arr.iter()) {
                bind_value(pattern_item, actual_item, env)?;
            }
            Some(())
        }
    }
}

/// For each `when` clause other than the anchor (the clause that matched
/// the triggering completion directly), search the log for a matching
/// completion in the same flow that is consistent with the environment
/// gathered so far. If any clause has no witness, the rule does not fire.
fn join_remaining_clauses(rule: &CompiledSync, anchor_idx: usize, log: &[LogRecord], flow: FlowId, env: &mut BTreeMap<String, serde_json::Value>) -> bool {
    for (idx, clause) in rule.when_clauses.iter().enumerate() {
        if idx == anchor_idx {
            continue;
        }
        let witness = log.iter().rev().find_map(|record| {
            let LogRecord::Completion(c) = record else { return None };
            if c.flow != flow || c.concept != clause.concept || c.action != clause.action {
                return None;
            }
            if let Some(variant) = &clause.variant {
                if &c.variant != variant {
                    return None;
                }
            }
            let mut candidate_env = env.clone();
            bind_clause_into(clause, &c.input, &c.output, &mut candidate_env).then_some(candidate_env)
        });
        match witness {
            Some(merged) => *env = merged,
            None => return false,
        }
    }
    true
}

fn bind_clause_into(clause: &WhenBindingPlan, actual_input: &serde_json::Value, actual_output: &serde_json::Value, env: &mut BTreeMap<String, serde_json::Value>) -> bool {
    for (field, pattern) in &clause.inputs {
        let Some(actual) = actual_input.get(field) else { return false };
        if bind_value(pattern, actual, env).is_none() {
            return false;
        }
    }
    for (field, pattern) in &clause.outputs {
        let Some(actual) = actual_output.get(field) else { return false };
        if bind_value(pattern, actual, env).is_none() {
            return false;
        }
    }
    true
}

/// Execute `where` operations in order: `bind` adds a builtin's value to
/// the environment; `filter` must evaluate truthy or the rule is
/// discarded.
fn run_where_ops(ops: &[ResolvedWhereOp], env: &mut BTreeMap<String, serde_json::Value>) -> bool {
    for op in ops {
        match op {
            ResolvedWhereOp::Bind { var, builtin } => {
                env.insert(var.clone(), builtin.evaluate());
            }
            ResolvedWhereOp::Filter { left, op, right } => {
                let Ok(l) = left.resolve(env) else { return false };
                let Ok(r) = right.resolve(env) else { return false };
                let holds = match op {
                    crate::spec::ast::FilterOp::Eq => deep_equal(&l, &r),
                    crate::spec::ast::FilterOp::Ne => !deep_equal(&l, &r),
                };
                if !holds {
                    return false;
                }
            }
        }
    }
    true
}

/// Resolve a `then` template's input bindings against the final
/// environment, surfacing the first unbound variable.
fn resolve_inputs(inputs: &[(String, crate::value::Value)], env: &BTreeMap<String, serde_json::Value>) -> Result<serde_json::Value, String> {
    let mut map = serde_json::Map::new();
    for (field, value) in inputs {
        map.insert(field.clone(), value.resolve(env)?);
    }
    Ok(serde_json::Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CompletionId;
    use crate::spec::parse_sync;
    use crate::sync_compile::compile_sync;

    fn completion(concept: &str, action: &str, variant: &str, input: serde_json::Value, output: serde_json::Value, flow: FlowId) -> ActionCompletion {
        ActionCompletion {
            id: CompletionId::new(),
            concept: concept.to_string(),
            action: action.to_string(),
            input,
            variant: variant.to_string(),
            output,
            flow,
            parent: None,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn no_index_entry_produces_zero_invocations() {
        let engine = SyncEngine::new(EngineConfig::default());
        let c = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 1}), FlowId::new());
        let invocations = engine.on_completion(c).await.unwrap();
        assert!(invocations.is_empty());
    }

    #[tokio::test]
    async fn single_clause_eager_rule_fires_exactly_once() {
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync("sync R when { A/f: [] => [y: ?v] } then { B/g: [x: ?v] }", "r.sync").unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let c = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 42}), FlowId::new());
        let invocations = engine.on_completion(c.clone()).await.unwrap();

        assert_eq!(invocations.len(), 1);
        let inv = &invocations[0];
        assert_eq!(inv.concept, "B");
        assert_eq!(inv.action, "g");
        assert_eq!(inv.input, serde_json::json!({"x": 42}));
        assert_eq!(inv.flow, c.flow);
        assert_eq!(inv.parent, Some(ParentId::Completion(c.id)));
        assert_eq!(inv.sync.as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn multi_clause_join_fires_only_with_consistent_witness() {
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v], B/g: [] => [z: ?v] } then { C/h: [k: ?v] }",
            "r.sync",
        )
        .unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let flow = FlowId::new();
        let first = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 5}), flow);
        let invocations = engine.on_completion(first).await.unwrap();
        assert!(invocations.is_empty());

        let second = completion("B", "g", "ok", serde_json::json!({}), serde_json::json!({"z": 5}), flow);
        let invocations = engine.on_completion(second).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].input, serde_json::json!({"k": 5}));
    }

    #[tokio::test]
    async fn multi_clause_join_fires_regardless_of_which_clause_arrives_first() {
        // Same rule as above, but with the witnessing order reversed: the
        // clause indexed second in the rule (`B/g`) now completes first,
        // and the clause indexed first (`A/f`) is the one that arrives
        // second and anchors the match. The rule must still fire — any
        // clause can anchor, not just the first one declared.
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v], B/g: [] => [z: ?v] } then { C/h: [k: ?v] }",
            "r.sync",
        )
        .unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let flow = FlowId::new();
        let first = completion("B", "g", "ok", serde_json::json!({}), serde_json::json!({"z": 9}), flow);
        let invocations = engine.on_completion(first).await.unwrap();
        assert!(invocations.is_empty());

        let second = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 9}), flow);
        let invocations = engine.on_completion(second).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].input, serde_json::json!({"k": 9}));
    }

    #[tokio::test]
    async fn multi_clause_join_does_not_fire_on_inconsistent_binding() {
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v], B/g: [] => [z: ?v] } then { C/h: [k: ?v] }",
            "r.sync",
        )
        .unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let flow = FlowId::new();
        engine.on_completion(completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 5}), flow)).await.unwrap();
        let invocations = engine
            .on_completion(completion("B", "g", "ok", serde_json::json!({}), serde_json::json!({"z": 7}), flow))
            .await
            .unwrap();
        assert!(invocations.is_empty());
    }

    #[tokio::test]
    async fn joins_do_not_cross_flows() {
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync(
            "sync R when { A/f: [] => [y: ?v], B/g: [] => [z: ?v] } then { C/h: [k: ?v] }",
            "r.sync",
        )
        .unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let flow_a = FlowId::new();
        let flow_b = FlowId::new();
        engine.on_completion(completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 5}), flow_a)).await.unwrap();
        let invocations = engine
            .on_completion(completion("B", "g", "ok", serde_json::json!({}), serde_json::json!({"z": 5}), flow_b))
            .await
            .unwrap();
        assert!(invocations.is_empty());
    }

    #[tokio::test]
    async fn lazy_rule_defers_until_flush() {
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync("sync R[lazy] when { A/f: [] => [y: ?v] } then { B/g: [x: ?v] }", "r.sync").unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let c = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({"y": 1}), FlowId::new());
        let invocations = engine.on_completion(c).await.unwrap();
        assert!(invocations.is_empty());

        let flushed = engine.flush_lazy().await;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].concept, "B");
    }

    #[tokio::test]
    async fn unrelated_completion_variant_does_not_match_pinned_rule() {
        let engine = SyncEngine::new(EngineConfig::default());
        let ast = parse_sync("sync R when { A/f: [] => [variant: ok, y: ?v] } then { B/g: [x: ?v] }", "r.sync").unwrap();
        engine.register_sync(compile_sync(&ast).unwrap()).await;

        let c = completion("A", "f", "error", serde_json::json!({}), serde_json::json!({"y": 1}), FlowId::new());
        let invocations = engine.on_completion(c).await.unwrap();
        assert!(invocations.is_empty());
    }

    #[tokio::test]
    async fn flow_overflow_is_detected_past_configured_depth() {
        let engine = SyncEngine::new(EngineConfig { max_flow_depth: 2 });
        let flow = FlowId::new();
        let root = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({}), flow);
        engine.on_completion(root.clone()).await.unwrap();

        let mut parent = Some(ParentId::Completion(root.id));
        for _ in 0..5 {
            let mut c = completion("A", "f", "ok", serde_json::json!({}), serde_json::json!({}), flow);
            c.parent = parent;
            let result = engine.on_completion(c.clone()).await;
            parent = Some(ParentId::Completion(c.id));
            if result.is_err() {
                return;
            }
        }
        panic!("expected flow_overflow before exhausting the chain");
    }
}
