//! Per-instance execution state
//!
//! The [`ExecutionContext`] is the accumulated state of one workflow
//! instance: the raw input, the value currently flowing through the data
//! pipeline, the exported global context object, bound variables (loop
//! items, caught errors) and the bookkeeping for active loops and retry
//! attempts. It is owned exclusively by its instance and fully
//! serializable, so a suspended instance can be reconstructed from its
//! persisted snapshot alone.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expressions::Vars;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    /// Raw workflow input, after the workflow-level input transform.
    pub input: Value,
    /// Current transformed value flowing from task to task.
    pub data: Value,
    /// Exported global context object; mutated only via `export.as`.
    pub context: Value,
    /// Named variables visible to expressions (`$item`, caught errors, ...).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: IndexMap<String, Value>,
    /// Retry attempt counters keyed by the owning `try` position string.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub retries: IndexMap<String, RetryState>,
    /// Data snapshots captured on entry to protected `try` scopes, so a
    /// retry re-enters the block with the data it originally saw.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scopes: IndexMap<String, Value>,
    /// Materialized loop collections keyed by the `for` position string.
    /// Evaluated once on loop entry so iteration stays stable while the
    /// data flow mutates.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub loops: IndexMap<String, LoopFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryState {
    pub attempts: u32,
    pub first_attempt_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopFrame {
    pub items: Vec<Value>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(input: Value) -> Self {
        Self {
            data: input.clone(),
            input,
            context: Value::Object(serde_json::Map::new()),
            vars: IndexMap::new(),
            retries: IndexMap::new(),
            scopes: IndexMap::new(),
            loops: IndexMap::new(),
        }
    }

    /// Variables bound into expression evaluation: `$input`, `$context`
    /// plus every explicitly bound variable.
    #[must_use]
    pub fn expression_vars(&self) -> Vars {
        let mut vars = Vars::new();
        vars.insert("input".to_string(), self.input.clone());
        vars.insert("context".to_string(), self.context.clone());
        for (name, value) in &self.vars {
            vars.insert(name.clone(), value.clone());
        }
        vars
    }

    /// Merge an exported value into the global context object.
    /// Object exports merge key-wise, last write wins; non-object exports
    /// replace the context entirely.
    pub fn export(&mut self, exported: Value) {
        match (self.context.as_object_mut(), exported) {
            (Some(target), Value::Object(map)) => {
                for (key, value) in map {
                    target.insert(key, value);
                }
            }
            (_, other) => self.context = other,
        }
    }

    pub fn bind_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn unbind_var(&mut self, name: &str) {
        self.vars.shift_remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_export_merges_last_write_wins() {
        let mut ctx = ExecutionContext::new(json!({}));
        ctx.export(json!({"a": 1, "b": 1}));
        ctx.export(json!({"b": 2, "c": 3}));
        assert_eq!(ctx.context, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_non_object_export_replaces_context() {
        let mut ctx = ExecutionContext::new(json!({}));
        ctx.export(json!({"a": 1}));
        ctx.export(json!("flat"));
        assert_eq!(ctx.context, json!("flat"));
    }

    #[test]
    fn test_expression_vars_include_bindings() {
        let mut ctx = ExecutionContext::new(json!({"in": true}));
        ctx.bind_var("item", json!(7));
        let vars = ctx.expression_vars();
        assert_eq!(vars.get("input"), Some(&json!({"in": true})));
        assert_eq!(vars.get("item"), Some(&json!(7)));
    }

    #[test]
    fn test_context_round_trips_through_json() {
        let mut ctx = ExecutionContext::new(json!({"x": 1}));
        ctx.bind_var("item", json!("a"));
        ctx.retries.insert(
            "/do/0/t".to_string(),
            RetryState { attempts: 2, first_attempt_at: Utc::now() },
        );
        ctx.loops
            .insert("/do/1/l".to_string(), LoopFrame { items: vec![json!(1), json!(2)] });

        let json = serde_json::to_string(&ctx).unwrap();
        let back: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
