// Copyright 2025 Cowboy AI, LLC.

//! Reconstructing a flow's causal tree from the action log.

use serde::{Deserialize, Serialize};

use crate::engine::LogRecord;
use crate::ids::{FlowId, ParentId};

/// A success-ish variant name that `--failed` filtering treats as
/// passing, beyond the canonical `ok`. The core doesn't hardcode a list
/// beyond `ok`; callers that need a broader whitelist pass one in.
pub const DEFAULT_SUCCESS_VARIANTS: &[&str] = &["ok"];

/// One node in a reconstructed flow tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TraceNode {
    Completion {
        concept: String,
        action: String,
        variant: String,
        children: Vec<TraceNode>,
    },
    Invocation {
        concept: String,
        action: String,
        sync: Option<String>,
        children: Vec<TraceNode>,
    },
}

impl TraceNode {
    fn label(&self) -> String {
        match self {
            TraceNode::Completion { concept, action, variant, .. } => format!("{concept}/{action} -> {variant}"),
            TraceNode::Invocation { concept, action, sync, .. } => match sync {
                Some(name) => format!("{concept}/{action} (via {name})"),
                None => format!("{concept}/{action}"),
            },
        }
    }

    fn children(&self) -> &[TraceNode] {
        match self {
            TraceNode::Completion { children, .. } => children,
            TraceNode::Invocation { children, .. } => children,
        }
    }

    fn is_failed_root(&self, success_variants: &[&str]) -> bool {
        match self {
            TraceNode::Completion { variant, .. } => !success_variants.contains(&variant.as_str()),
            TraceNode::Invocation { children, .. } => children.is_empty(),
        }
    }
}

/// A reconstructed flow: the forest of roots sharing one flow id,
/// rebuilt as a causal tree via `parent` pointers. A flow with multiple
/// entry points is a forest of one-node trees, which is the common case
/// of a single root plus any orphaned parentless records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTrace {
    pub flow: String,
    pub roots: Vec<TraceNode>,
}

struct Keyed<'a> {
    id_key: IdKey,
    parent: Option<ParentId>,
    record: &'a LogRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IdKey {
    Completion(crate::ids::CompletionId),
    Invocation(crate::ids::InvocationId),
}

/// Build a `FlowTrace` from every log record sharing `flow`. Roots are
/// records with no parent, or whose parent is outside the flow.
pub fn build_trace(log: &[LogRecord], flow: FlowId) -> FlowTrace {
    let members: Vec<Keyed> = log
        .iter()
        .filter(|r| r.flow() == flow)
        .map(|r| Keyed {
            id_key: match r {
                LogRecord::Completion(c) => IdKey::Completion(c.id),
                LogRecord::Invocation(i) => IdKey::Invocation(i.id),
            },
            parent: r.parent(),
            record: r,
        })
        .collect();

    let known_ids: std::collections::HashSet<IdKey> = members.iter().map(|m| m.id_key).collect();

    let parent_key_of = |p: ParentId| -> IdKey {
        match p {
            ParentId::Completion(id) => IdKey::Completion(id),
            ParentId::Invocation(id) => IdKey::Invocation(id),
        }
    };

    let roots: Vec<&Keyed> = members
        .iter()
        .filter(|m| match m.parent {
            None => true,
            Some(p) => !known_ids.contains(&parent_key_of(p)),
        })
        .collect();

    let build_node = |member: &Keyed| -> TraceNode {
        build_subtree(member.id_key, &members, &parent_key_of)
    };

    FlowTrace { flow: flow.to_string(), roots: roots.into_iter().map(build_node).collect() }
}

fn build_subtree(id: IdKey, members: &[Keyed], parent_key_of: &impl Fn(ParentId) -> IdKey) -> TraceNode {
    let own = members.iter().find(|m| m.id_key == id).expect("id present in members");
    let children: Vec<TraceNode> = members
        .iter()
        .filter(|m| m.parent.map(|p| parent_key_of(p)) == Some(id))
        .map(|m| build_subtree(m.id_key, members, parent_key_of))
        .collect();

    match own.record {
        LogRecord::Completion(c) => TraceNode::Completion {
            concept: c.concept.clone(),
            action: c.action.clone(),
            variant: c.variant.clone(),
            children,
        },
        LogRecord::Invocation(i) => TraceNode::Invocation {
            concept: i.concept.clone(),
            action: i.action.clone(),
            sync: i.sync.clone(),
            children,
        },
    }
}

impl FlowTrace {
    /// Prune subtrees whose root completion's variant is not a success
    /// variant; invocations whose matched sync produced no children are
    /// kept (they show a rule fired to nothing).
    pub fn filter_failed(&self, success_variants: &[&str]) -> FlowTrace {
        FlowTrace {
            flow: self.flow.clone(),
            roots: self
                .roots
                .iter()
                .filter(|n| n.is_failed_root(success_variants))
                .cloned()
                .collect(),
        }
    }

    /// Render as an indented tree.
    pub fn render_indented(&self) -> String {
        let mut out = String::new();
        for root in &self.roots {
            render_node(root, 0, &mut out);
        }
        out
    }

    /// Render as JSON, verbatim node metadata.
    pub fn render_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("FlowTrace always serializes")
    }
}

fn render_node(node: &TraceNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.label());
    out.push('\n');
    for child in node.children() {
        render_node(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CompletionId;
    use crate::transport::{ActionCompletion, ActionInvocation};

    fn completion(concept: &str, action: &str, variant: &str, flow: FlowId, parent: Option<ParentId>) -> ActionCompletion {
        ActionCompletion {
            id: CompletionId::new(),
            concept: concept.into(),
            action: action.into(),
            input: serde_json::json!({}),
            variant: variant.into(),
            output: serde_json::json!({}),
            flow,
            parent,
            timestamp: 0,
        }
    }

    #[test]
    fn three_node_flow_renders_request_invocation_completion() {
        let flow = FlowId::new();
        let request = completion("A", "f", "ok", flow, None);
        let invocation = ActionInvocation {
            id: crate::ids::InvocationId::new(),
            concept: "B".into(),
            action: "g".into(),
            input: serde_json::json!({}),
            flow,
            sync: Some("R".into()),
            parent: Some(ParentId::Completion(request.id)),
            timestamp: 0,
        };
        let reply = completion("B", "g", "ok", flow, Some(ParentId::Invocation(invocation.id)));

        let log = vec![
            LogRecord::Completion(request.clone()),
            LogRecord::Invocation(invocation.clone()),
            LogRecord::Completion(reply.clone()),
        ];

        let trace = build_trace(&log, flow);
        assert_eq!(trace.roots.len(), 1);

        let json = trace.render_json();
        assert_eq!(json["roots"][0]["children"][0]["children"][0]["variant"], "ok");

        let rendered = trace.render_indented();
        assert!(rendered.contains("A/f -> ok"));
        assert!(rendered.contains("B/g (via R)"));
    }

    #[test]
    fn filter_failed_prunes_ok_roots() {
        let flow = FlowId::new();
        let ok_root = completion("A", "f", "ok", flow, None);
        let err_root = completion("A", "f", "error", flow, None);
        let log = vec![LogRecord::Completion(ok_root), LogRecord::Completion(err_root)];
        let trace = build_trace(&log, flow);
        let failed = trace.filter_failed(DEFAULT_SUCCESS_VARIANTS);
        assert_eq!(failed.roots.len(), 1);
        match &failed.roots[0] {
            TraceNode::Completion { variant, .. } => assert_eq!(variant, "error"),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn unrelated_flow_records_are_excluded() {
        let flow_a = FlowId::new();
        let flow_b = FlowId::new();
        let a = completion("A", "f", "ok", flow_a, None);
        let b = completion("A", "f", "ok", flow_b, None);
        let log = vec![LogRecord::Completion(a), LogRecord::Completion(b)];
        let trace = build_trace(&log, flow_a);
        assert_eq!(trace.roots.len(), 1);
    }
}
