//! Runtime expression evaluation (jq dialect via jaq)
//!
//! Expressions are pure and deterministic given identical inputs, since
//! retries and resumed instances may re-evaluate guards and transforms.
//! Values wrapped in `${ ... }` are evaluated; bare strings pass through
//! unchanged. Named variables (`$context`, `$input`, loop/error bindings)
//! are bound with jaq's `as` syntax before evaluation.

use jaq_core::Ctx;
use regex::Regex;
use serde_json::Value;
use snafu::prelude::*;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Expression load error: {errors}"))]
    Load { errors: String },

    #[snafu(display("Expression compile error: {errors}"))]
    Compile { errors: String },

    #[snafu(display("Expression evaluation error: {message}"))]
    Evaluation { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Named variables visible to an expression (bound as `$name`).
pub type Vars = serde_json::Map<String, Value>;

fn var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$([a-zA-Z_][a-zA-Z0-9_]*)").unwrap_or_else(|_| unreachable!())
    })
}

/// Evaluate a `${ ... }`-wrapped expression; plain strings pass through.
pub fn evaluate(expression: &str, data: &Value, vars: &Vars) -> Result<Value> {
    let trimmed = expression.trim();
    if let Some(inner) = strip_wrapper(trimmed) {
        evaluate_raw(inner, data, vars)
    } else {
        Ok(Value::String(expression.to_string()))
    }
}

/// Evaluate a bare jq expression (guards, `when` conditions, `input.from`).
/// A `${ ... }` wrapper is tolerated and stripped.
pub fn evaluate_raw(expression: &str, data: &Value, vars: &Vars) -> Result<Value> {
    let expr = strip_wrapper(expression.trim()).unwrap_or_else(|| expression.trim());

    // Bind only the variables the expression actually references so the
    // program stays small and unreferenced vars cannot shadow jq builtins.
    let mut bindings = Vec::new();
    let mut bound: Vec<String> = Vec::new();
    for cap in var_regex().captures_iter(expr) {
        let name = cap[1].to_string();
        if vars.contains_key(&name) && !bound.contains(&name) {
            bindings.push(format!("(.__vars.{name}) as ${name}"));
            bound.push(name);
        }
    }

    let (program, input) = if bindings.is_empty() {
        (expr.to_string(), data.clone())
    } else {
        let mut wrapper = serde_json::Map::new();
        wrapper.insert("__vars".to_string(), Value::Object(vars.clone()));
        wrapper.insert("__value".to_string(), data.clone());
        (
            format!("{} | .__value | {}", bindings.join(" | "), expr),
            Value::Object(wrapper),
        )
    };

    debug!(expression = %program, "evaluating jq expression");
    run_jq(&program, &input)
}

/// Recursively evaluate every `${ ... }` string inside a JSON template.
pub fn evaluate_template(template: &Value, data: &Value, vars: &Vars) -> Result<Value> {
    match template {
        Value::String(s) => evaluate(s, data, vars),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                out.insert(key.clone(), evaluate_template(value, data, vars)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate_template(item, data, vars)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// jq truthiness: null and false are falsy, everything else is truthy.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn strip_wrapper(expr: &str) -> Option<&str> {
    expr.strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
}

fn run_jq(program: &str, input: &Value) -> Result<Value> {
    use jaq_core::{
        compile::Compiler,
        load::{Arena, File, Loader},
    };

    let arena = Arena::default();
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let file: File<_, ()> = File { path: (), code: program };

    let modules = loader
        .load(&arena, file)
        .map_err(|errs| Error::Load { errors: format!("{errs:?}") })?;

    let compiler = Compiler::default().with_funs(jaq_std::funs().chain(jaq_json::funs()));
    let filter = compiler
        .compile(modules)
        .map_err(|errs| Error::Compile { errors: format!("{errs:?}") })?;

    let input: jaq_json::Val = input.clone().into();
    let inputs = jaq_core::RcIter::new(core::iter::empty());
    let mut results: Vec<_> = filter.run((Ctx::new([], &inputs), input)).collect();

    if results.is_empty() {
        return Ok(Value::Null);
    }

    match results.remove(0) {
        Ok(val) => Ok(val.into()),
        Err(e) => Err(Error::Evaluation { message: format!("{e}") }),
    }
}
