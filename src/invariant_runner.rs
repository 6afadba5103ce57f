// Copyright 2025 Cowboy AI, LLC.

//! Executing `InvariantSchema` test plans against a concept handler.
//!
//! An async checker that runs a set of declarative rules against live
//! state and collects violations rather than failing fast. Here the
//! "state" is a fresh storage handle and the "rules" are the invariant's
//! `setup` and `assertions` steps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::manifest::{InvariantSchema, StepSchema};
use crate::storage::ConceptStorage;
use crate::transport::ConceptHandler;
use crate::value::deep_equal;

/// One mismatch between an invariant's expectation and a handler's actual
/// behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantFailure {
    /// Index into the combined `setup` + `assertions` sequence.
    pub step_index: usize,
    pub action: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The handler returned a different variant than expected.
    VariantMismatch { expected: String, actual: String },
    /// An output field's value didn't deep-equal the expected value (or a
    /// previously captured binding for the same variable).
    OutputMismatch { field: String, expected: serde_json::Value, actual: serde_json::Value },
    /// An expected output field was missing from the handler's response.
    MissingOutput { field: String },
}

/// The outcome of running one invariant against a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantCheckResult {
    pub description: String,
    pub passed: bool,
    pub failures: Vec<InvariantFailure>,
}

/// Runs invariant schemas against a concept handler, using a fresh
/// storage handle per invocation.
pub struct InvariantRunner;

impl InvariantRunner {
    /// Execute one invariant schema: seed free variables, run `setup`,
    /// then run `assertions`, reporting every mismatch (not just the
    /// first).
    pub async fn run<H: ConceptHandler>(
        handler: &H,
        storage: &dyn ConceptStorage,
        invariant: &InvariantSchema,
    ) -> InvariantCheckResult {
        let mut env: BTreeMap<String, serde_json::Value> = invariant
            .free_variables
            .iter()
            .map(|fv| (fv.name.clone(), fv.test_value.clone()))
            .collect();

        let mut failures = Vec::new();
        let mut index = 0;
        for step in invariant.setup.iter().chain(invariant.assertions.iter()) {
            run_step(handler, storage, step, index, &mut env, &mut failures).await;
            index += 1;
        }

        InvariantCheckResult { description: invariant.description.clone(), passed: failures.is_empty(), failures }
    }
}

async fn run_step<H: ConceptHandler>(
    handler: &H,
    storage: &dyn ConceptStorage,
    step: &StepSchema,
    step_index: usize,
    env: &mut BTreeMap<String, serde_json::Value>,
    failures: &mut Vec<InvariantFailure>,
) {
    let mut input_map = serde_json::Map::new();
    for binding in &step.inputs {
        match binding.value.resolve(env) {
            Ok(value) => {
                input_map.insert(binding.name.clone(), value);
            }
            Err(_unbound) => {
                // An unbound free variable at this point is a schema-gen
                // defect (every input-only variable gets a test value);
                // resolve() never fails here in a conforming manifest, so
                // we fall back to null rather than panicking mid-run.
                input_map.insert(binding.name.clone(), serde_json::Value::Null);
            }
        }
    }
    let input = serde_json::Value::Object(input_map);

    let (variant, output) = match handler.invoke_action(&step.action, &input, storage).await {
        Ok(pair) => pair,
        Err(err) => {
            failures.push(InvariantFailure {
                step_index,
                action: step.action.clone(),
                kind: FailureKind::VariantMismatch { expected: step.expected_variant.clone(), actual: format!("error: {err}") },
            });
            return;
        }
    };

    if variant != step.expected_variant {
        failures.push(InvariantFailure {
            step_index,
            action: step.action.clone(),
            kind: FailureKind::VariantMismatch { expected: step.expected_variant.clone(), actual: variant },
        });
        return;
    }

    for binding in &step.expected_outputs {
        let actual = match output.get(&binding.name) {
            Some(v) => v.clone(),
            None => {
                failures.push(InvariantFailure {
                    step_index,
                    action: step.action.clone(),
                    kind: FailureKind::MissingOutput { field: binding.name.clone() },
                });
                continue;
            }
        };

        match &binding.value {
            crate::value::Value::Variable(name) => match env.get(name) {
                Some(captured) => {
                    if !deep_equal(captured, &actual) {
                        failures.push(InvariantFailure {
                            step_index,
                            action: step.action.clone(),
                            kind: FailureKind::OutputMismatch { field: binding.name.clone(), expected: captured.clone(), actual },
                        });
                    }
                }
                None => {
                    env.insert(name.clone(), actual);
                }
            },
            other => match other.resolve(env) {
                Ok(expected) => {
                    if !deep_equal(&expected, &actual) {
                        failures.push(InvariantFailure {
                            step_index,
                            action: step.action.clone(),
                            kind: FailureKind::OutputMismatch { field: binding.name.clone(), expected, actual },
                        });
                    }
                }
                Err(_) => {
                    // Nested literal/record/list referencing an unbound
                    // variable: treat as a mismatch against null rather
                    // than panicking.
                    failures.push(InvariantFailure {
                        step_index,
                        action: step.action.clone(),
                        kind: FailureKind::OutputMismatch { field: binding.name.clone(), expected: serde_json::Value::Null, actual },
                    });
                }
            },
        }
    }
}
