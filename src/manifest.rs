// Copyright 2025 Cowboy AI, LLC.

//! Schema generation: `ConceptAst` → `ConceptManifest`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::ast::{ConceptAst, Field, InvariantAst, StepAst};
use crate::value::Value;

/// A named, typed field in an input or output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub ty: String,
    /// True when this field is declared on some but not all of an
    /// action's variants.
    pub optional: bool,
}

/// The schema for one return variant of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSchema {
    pub name: String,
    pub outputs: Vec<FieldSchema>,
    pub prose: String,
}

/// The schema for one action: its inputs and the set of variants it may
/// return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub name: String,
    pub inputs: Vec<FieldSchema>,
    pub variants: Vec<VariantSchema>,
}

/// A binding inside an executable invariant step: a field name paired with
/// its still-tagged value (literal, variable, record, or list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSchema {
    pub name: String,
    pub value: Value,
}

/// One executable call pattern within an invariant's `setup` or
/// `assertions` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSchema {
    pub action: String,
    pub inputs: Vec<BindingSchema>,
    pub expected_variant: String,
    pub expected_outputs: Vec<BindingSchema>,
}

/// A free variable's deterministic test value, assigned at schema-gen
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeVariable {
    pub name: String,
    pub test_value: serde_json::Value,
}

/// One executable invariant test, derived from an `InvariantAst`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantSchema {
    pub description: String,
    pub free_variables: Vec<FreeVariable>,
    pub setup: Vec<StepSchema>,
    pub assertions: Vec<StepSchema>,
}

/// The normalized form of a concept produced by schema generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptManifest {
    pub name: String,
    pub version: Option<i64>,
    pub actions: Vec<ActionSchema>,
    pub invariants: Vec<InvariantSchema>,
}

impl ConceptManifest {
    /// Look up an action by name.
    pub fn action(&self, name: &str) -> Option<&ActionSchema> {
        self.actions.iter().find(|a| a.name == name)
    }
}

impl ActionSchema {
    /// Look up a variant by name.
    pub fn variant(&self, name: &str) -> Option<&VariantSchema> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/// Fatal schema-generation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("action `{0}` is declared more than once")]
    DuplicateAction(String),

    #[error("action `{action}` declares variant `{variant}` more than once")]
    DuplicateVariant { action: String, variant: String },
}

/// Non-fatal schema-generation diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    EmptyPurpose,
    NoState,
    NoActions,
    UnknownActionInInvariant { action: String },
    UnknownVariantInInvariant { action: String, variant: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::EmptyPurpose => write!(f, "empty purpose"),
            ValidationWarning::NoState => write!(f, "no state declared"),
            ValidationWarning::NoActions => write!(f, "no actions declared"),
            ValidationWarning::UnknownActionInInvariant { action } => {
                write!(f, "invariant references unknown action `{action}`")
            }
            ValidationWarning::UnknownVariantInInvariant { action, variant } => {
                write!(f, "invariant references unknown variant `{action}/{variant}`")
            }
        }
    }
}

/// The result of compiling a concept: a manifest plus any warnings, or a
/// list of fatal errors. Schema-gen never aborts on the first error; it
/// collects every validation error for the concept before returning.
pub struct CompileOutcome {
    pub manifest: ConceptManifest,
    pub warnings: Vec<ValidationWarning>,
}

/// Compile a parsed concept into its manifest.
pub fn compile_manifest(ast: &ConceptAst) -> Result<CompileOutcome, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if ast.purpose.as_deref().unwrap_or("").trim().is_empty() {
        warnings.push(ValidationWarning::EmptyPurpose);
    }
    if ast.state.is_empty() {
        warnings.push(ValidationWarning::NoState);
    }
    if ast.actions.is_empty() {
        warnings.push(ValidationWarning::NoActions);
    }

    let mut seen_actions = std::collections::HashSet::new();
    let mut actions = Vec::with_capacity(ast.actions.len());
    for action in &ast.actions {
        if !seen_actions.insert(action.name.clone()) {
            errors.push(ValidationError::DuplicateAction(action.name.clone()));
            continue;
        }

        let mut seen_variants = std::collections::HashSet::new();
        let mut variants = Vec::with_capacity(action.variants.len());
        for variant in &action.variants {
            if !seen_variants.insert(variant.name.clone()) {
                errors.push(ValidationError::DuplicateVariant {
                    action: action.name.clone(),
                    variant: variant.name.clone(),
                });
                continue;
            }
            variants.push(VariantSchema {
                name: variant.name.clone(),
                outputs: fields_to_schema(&variant.outputs),
                prose: variant.prose.clone(),
            });
        }

        mark_variant_output_optionality(&mut variants);

        actions.push(ActionSchema {
            name: action.name.clone(),
            inputs: fields_to_schema(&action.inputs),
            variants,
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut invariants = Vec::with_capacity(ast.invariants.len());
    for inv in &ast.invariants {
        invariants.push(compile_invariant(inv, &actions, &mut warnings));
    }

    Ok(CompileOutcome {
        manifest: ConceptManifest {
            name: ast.name.clone(),
            version: ast.version,
            actions,
            invariants,
        },
        warnings,
    })
}

fn fields_to_schema(fields: &[Field]) -> Vec<FieldSchema> {
    fields
        .iter()
        .map(|f| FieldSchema { name: f.name.clone(), ty: f.ty.clone(), optional: false })
        .collect()
}

/// Mark each variant's output fields as optional when the field name isn't
/// shared by every variant of the action (`spec.md` §4.D: "mark fields as
/// optional if a variant declares them missing").
fn mark_variant_output_optionality(variants: &mut [VariantSchema]) {
    let variant_count = variants.len();
    let mut field_counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for variant in variants.iter() {
        let names: std::collections::HashSet<&str> = variant.outputs.iter().map(|f| f.name.as_str()).collect();
        for name in names {
            *field_counts.entry(name).or_insert(0) += 1;
        }
    }
    for variant in variants.iter_mut() {
        for field in variant.outputs.iter_mut() {
            field.optional = field_counts.get(field.name.as_str()).copied().unwrap_or(0) < variant_count;
        }
    }
}

fn compile_invariant(
    inv: &InvariantAst,
    actions: &[ActionSchema],
    warnings: &mut Vec<ValidationWarning>,
) -> InvariantSchema {
    // First pass: determine which variables are first bound by an output
    // (output-bound) vs. only ever appearing in inputs (free).
    let mut output_bound = std::collections::HashSet::new();
    let mut all_vars = Vec::new();
    for step in inv.after.iter().chain(inv.then.iter()) {
        for (_, v) in &step.outputs {
            v.collect_variables(&mut all_vars);
        }
    }
    for step in inv.after.iter().chain(inv.then.iter()) {
        for (_, v) in &step.outputs {
            let mut names = Vec::new();
            v.collect_variables(&mut names);
            for n in names {
                output_bound.insert(n);
            }
        }
    }
    let mut input_only_order = Vec::new();
    for step in inv.after.iter().chain(inv.then.iter()) {
        for (_, v) in &step.inputs {
            let mut names = Vec::new();
            v.collect_variables(&mut names);
            for n in names {
                if !output_bound.contains(&n) && !input_only_order.contains(&n) {
                    input_only_order.push(n);
                }
            }
        }
    }

    let free_variables: Vec<FreeVariable> = input_only_order
        .iter()
        .map(|name| FreeVariable { name: name.clone(), test_value: test_value_for(name, actions) })
        .collect();

    let setup: Vec<StepSchema> = inv
        .after
        .iter()
        .map(|s| compile_step(s, actions, warnings))
        .collect();
    let assertions: Vec<StepSchema> = inv
        .then
        .iter()
        .map(|s| compile_step(s, actions, warnings))
        .collect();

    let description = format!(
        "after {} then {}",
        inv.after.iter().map(|s| format!("{}->{}", s.action, s.variant)).collect::<Vec<_>>().join(", "),
        inv.then.iter().map(|s| format!("{}->{}", s.action, s.variant)).collect::<Vec<_>>().join(", "),
    );

    InvariantSchema { description, free_variables, setup, assertions }
}

fn compile_step(
    step: &StepAst,
    actions: &[ActionSchema],
    warnings: &mut Vec<ValidationWarning>,
) -> StepSchema {
    match actions.iter().find(|a| a.name == step.action) {
        None => warnings.push(ValidationWarning::UnknownActionInInvariant { action: step.action.clone() }),
        Some(action) => {
            if action.variant(&step.variant).is_none() {
                warnings.push(ValidationWarning::UnknownVariantInInvariant {
                    action: step.action.clone(),
                    variant: step.variant.clone(),
                });
            }
        }
    }

    StepSchema {
        action: step.action.clone(),
        inputs: step.inputs.iter().map(|(n, v)| BindingSchema { name: n.clone(), value: v.clone() }).collect(),
        expected_variant: step.variant.clone(),
        expected_outputs: step.outputs.iter().map(|(n, v)| BindingSchema { name: n.clone(), value: v.clone() }).collect(),
    }
}

/// Assign a deterministic test value to a free variable: `"test-<name>"`
/// for string-typed fields, a stable short numeric id (derived from a hash
/// of the name) for everything else, unless the variable's declared type
/// can be located on some action's input schema, in which case the type
/// guides the representation.
fn test_value_for(name: &str, actions: &[ActionSchema]) -> serde_json::Value {
    let declared_ty = actions
        .iter()
        .flat_map(|a| a.inputs.iter())
        .find(|f| f.name == name)
        .map(|f| f.ty.as_str());

    match declared_ty {
        Some("Int") => serde_json::Value::from(stable_hash(name) as i64 % 1_000_000),
        Some("Bool") => serde_json::Value::Bool(true),
        Some("Decimal") => serde_json::json!((stable_hash(name) % 1000) as f64 / 10.0),
        _ => serde_json::Value::String(format!("test-{name}")),
    }
}

fn stable_hash(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}
