// Copyright 2025 Cowboy AI, LLC.

//! Typed ASTs produced by the `.concept` and `.sync` parsers.

use crate::value::Value;

/// A parsed `.concept` file: one top-level concept declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptAst {
    pub name: String,
    pub type_params: Vec<String>,
    pub version: Option<i64>,
    pub purpose: Option<String>,
    pub state: Vec<StateField>,
    pub actions: Vec<ActionAst>,
    pub invariants: Vec<InvariantAst>,
    pub capabilities: Vec<String>,
}

/// A `state { name: Type }` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct StateField {
    pub name: String,
    pub ty: String,
}

/// A named, typed input/output field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: String,
}

/// One `action Name(params) { variant+ }` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionAst {
    pub name: String,
    pub inputs: Vec<Field>,
    pub variants: Vec<VariantAst>,
}

/// One `-> Name(outputs) { prose }` return variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantAst {
    pub name: String,
    pub outputs: Vec<Field>,
    pub prose: String,
}

/// A declarative `invariant { after step+ then step+ }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantAst {
    pub after: Vec<StepAst>,
    pub then: Vec<StepAst>,
}

/// A single call pattern: `label/Action: [inputs] -> Variant(outputs)`. The
/// `label` is the grammar's optional leading `Name` before the `/` — when a
/// step does not name an explicit label (the common case within one
/// concept's own invariants), `label` is `None` and `action` is the bare
/// action name.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAst {
    pub label: Option<String>,
    pub action: String,
    pub inputs: Vec<(String, Value)>,
    pub variant: String,
    pub outputs: Vec<(String, Value)>,
}

/// A parsed `.sync` file: one top-level sync rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncAst {
    pub name: String,
    pub mode: SyncMode,
    pub when: Vec<WhenClauseAst>,
    pub where_ops: Vec<WhereOpAst>,
    pub then: Vec<ThenClauseAst>,
}

/// Evaluation mode for a sync rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Eager,
    Lazy,
}

/// `<uri>/<action>: [inputs] => [outputs]` — a pattern over a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenClauseAst {
    pub concept_uri: String,
    pub action: String,
    /// Variant pin, if the pattern fixes one. `None` matches any variant,
    /// indexed in the sync index under the `*` wildcard key.
    pub variant: Option<String>,
    pub inputs: Vec<(String, Value)>,
    pub outputs: Vec<(String, Value)>,
}

/// A `where { bind(...) | filter(...) }` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereOpAst {
    Bind { var: String, builtin: BuiltinCallAst },
    Filter { expr: FilterExprAst },
}

/// A `where` builtin call as written in source. The parser accepts any
/// identifier call form (`name()`); the sync compiler resolves it against
/// the closed builtin set and rejects unknown names at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinCallAst {
    pub name: String,
}

/// A `filter(...)` expression. Only equality/inequality comparisons between
/// a bound variable and a literal or another variable are supported; this
/// keeps filter evaluation in the compiler rather than embedding a general
/// expression language, matching the grammar's minimal `expr` production.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExprAst {
    pub left: Value,
    pub op: FilterOp,
    pub right: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
}

/// A `then` invocation template: `<uri>/<action>: [inputs]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThenClauseAst {
    pub concept_uri: String,
    pub action: String,
    pub inputs: Vec<(String, Value)>,
}
