// Copyright 2025 Cowboy AI, LLC.

//! The dynamic record shape shared by the parser, schema generator, and sync
//! compiler.
//!
//! The parsers and normalizers work with a tagged value sum rather than
//! concrete per-concept types. The engine's hot path does not use this
//! type directly — completions and invocations carry resolved
//! `serde_json::Value` records (see `engine`) so that matching never pays
//! the tag-dispatch cost of walking `Value` trees per completion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A literal scalar appearing in a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Literal {
    /// A string literal.
    String(String),
    /// An integer literal.
    Int(i64),
    /// A decimal literal.
    Decimal(f64),
    /// A boolean literal.
    Bool(bool),
}

/// A binding value as it appears in `.concept`/`.sync` source: a literal, a
/// (possibly unbound, `?`-prefixed) variable reference, a nested record, or
/// a list of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Value {
    /// A literal scalar.
    Literal(Literal),
    /// A variable reference, named without its leading `?`.
    Variable(String),
    /// A nested record of named bindings.
    Record(BTreeMap<String, Value>),
    /// An ordered list of values.
    List(Vec<Value>),
}

impl Value {
    /// Collect every variable name referenced anywhere within this value,
    /// in first-appearance order with duplicates removed.
    pub fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Value::Literal(_) => {}
            Value::Variable(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Value::Record(fields) => {
                for v in fields.values() {
                    v.collect_variables(out);
                }
            }
            Value::List(items) => {
                for v in items {
                    v.collect_variables(out);
                }
            }
        }
    }

    /// Resolve this value against a bound environment, producing a plain
    /// JSON value. Returns `Err` with the name of the first unbound
    /// variable encountered.
    pub fn resolve(&self, env: &BTreeMap<String, serde_json::Value>) -> Result<serde_json::Value, String> {
        match self {
            Value::Literal(Literal::String(s)) => Ok(serde_json::Value::String(s.clone())),
            Value::Literal(Literal::Int(n)) => Ok(serde_json::Value::from(*n)),
            Value::Literal(Literal::Decimal(n)) => Ok(serde_json::json!(n)),
            Value::Literal(Literal::Bool(b)) => Ok(serde_json::Value::Bool(*b)),
            Value::Variable(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| name.clone()),
            Value::Record(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.resolve(env)?);
                }
                Ok(serde_json::Value::Object(map))
            }
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for v in items {
                    out.push(v.resolve(env)?);
                }
                Ok(serde_json::Value::Array(out))
            }
        }
    }
}

/// Structural deep-equality over plain JSON values: arrays require same
/// length and elementwise equality; objects require
/// the same key set and elementwise equality. Numbers compare by value,
/// not representation.
pub fn deep_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value as J;
    match (a, b) {
        (J::Null, J::Null) => true,
        (J::Bool(x), J::Bool(y)) => x == y,
        (J::Number(x), J::Number(y)) => x.as_f64() == y.as_f64(),
        (J::String(x), J::String(y)) => x == y,
        (J::Array(x), J::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| deep_equal(a, b))
        }
        (J::Object(x), J::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|v2| deep_equal(v, v2)))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_variables_in_first_appearance_order() {
        let mut record = BTreeMap::new();
        record.insert("a".to_string(), Value::Variable("x".into()));
        record.insert("b".to_string(), Value::Variable("y".into()));
        let v = Value::List(vec![
            Value::Variable("x".into()),
            Value::Record(record),
            Value::Variable("x".into()),
        ]);
        let mut out = Vec::new();
        v.collect_variables(&mut out);
        assert_eq!(out.len(), 2);
        assert!(out.contains(&"x".to_string()));
        assert!(out.contains(&"y".to_string()));
    }

    #[test]
    fn resolve_reports_first_unbound_variable() {
        let v = Value::Variable("missing".into());
        let env = BTreeMap::new();
        assert_eq!(v.resolve(&env), Err("missing".to_string()));
    }

    #[test]
    fn deep_equal_ignores_key_order() {
        let a = serde_json::json!({"x": 1, "y": 2});
        let b = serde_json::json!({"y": 2, "x": 1});
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn deep_equal_rejects_length_mismatch() {
        let a = serde_json::json!([1, 2, 3]);
        let b = serde_json::json!([1, 2]);
        assert!(!deep_equal(&a, &b));
    }

    proptest::proptest! {
        // `deep_equal` is reflexive and symmetric over any record shape a
        // binding can resolve to.
        #[test]
        fn deep_equal_is_reflexive(record in arb_json_record()) {
            proptest::prop_assert!(deep_equal(&record, &record));
        }

        #[test]
        fn deep_equal_is_symmetric(a in arb_json_record(), b in arb_json_record()) {
            proptest::prop_assert_eq!(deep_equal(&a, &b), deep_equal(&b, &a));
        }
    }

    fn arb_json_record() -> impl proptest::strategy::Strategy<Value = serde_json::Value> {
        use proptest::prelude::*;
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::Bool),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z]{0,8}".prop_map(serde_json::Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
                proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }
}
