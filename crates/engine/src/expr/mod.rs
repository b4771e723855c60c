//! The Expression Evaluator (spec §4.A).
//!
//! Three surface forms share one grammar: parameter references `$(...)`,
//! code blocks `${ ... }`, and interpolated strings that splice either form
//! back in as text. Each call to [`evaluate`] gets a fresh parse of its own
//! source text and never touches shared mutable state, so the evaluator is
//! safe to call concurrently from the Scheduler's parallel step resolution.

mod ast;
mod lexer;
mod parser;

use indexmap::IndexMap;
use wfl_types::{ExpressionKind, RuntimeContext, Value};

pub use ast::Expr;
pub use lexer::Piece;

/// The three-field context an expression evaluates against (spec §3
/// "Runtime Context", §4.A "Context").
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub inputs: IndexMap<String, Value>,
    pub self_value: Value,
    pub runtime: IndexMap<String, Value>,
    /// True only inside an `outputEval`; gates whether `runtime.exitCode` is
    /// visible to the expression (spec §4.A "Context").
    pub in_output_eval: bool,
}

impl EvalContext {
    pub fn new(inputs: IndexMap<String, Value>, self_value: Value, runtime: IndexMap<String, Value>) -> Self {
        Self { inputs, self_value, runtime, in_output_eval: false }
    }

    pub fn for_output_eval(mut self) -> Self {
        self.in_output_eval = true;
        self
    }
}

/// Evaluates a raw source string (which may be a bare literal, a single
/// expression, or text with embedded expressions) against `ctx`.
///
/// Sole-expression typing (spec §4.A): if the entire input is exactly one
/// `$(...)` or `${...}`, the typed result is returned directly. Otherwise
/// every embedded expression is evaluated, converted to a string (spec's
/// "String conversion"), and spliced back into the surrounding text.
pub fn evaluate(source: &str, ctx: &EvalContext) -> Result<Value, ExpressionKind> {
    let scan = lexer::scan(source)?;
    if let Some(sole) = scan.as_sole_expression() {
        return eval_expr(sole, ctx);
    }
    let mut out = String::new();
    for piece in &scan.parts {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Expression(expr) => {
                let value = eval_expr(expr, ctx)?;
                out.push_str(&wfl_types::stringify(&value));
            }
        }
    }
    Ok(Value::String(out))
}

fn eval_expr(source: &str, ctx: &EvalContext) -> Result<Value, ExpressionKind> {
    let expr = parser::parse(source)?;
    parser::eval(&expr, ctx)
}

/// Projects a [`RuntimeContext`] into the `runtime.*` mapping an expression
/// sees (spec §3 "Runtime Context"). `exitCode` is only present when the
/// context was built `for_output_eval`.
pub fn runtime_to_map(runtime: &RuntimeContext) -> IndexMap<String, Value> {
    let mut map = IndexMap::new();
    map.insert("outdir".to_string(), Value::String(runtime.outdir.clone()));
    map.insert("tmpdir".to_string(), Value::String(runtime.tmpdir.clone()));
    map.insert("cores".to_string(), Value::Int(runtime.cores as i64));
    map.insert("ram".to_string(), Value::Int(runtime.ram as i64));
    if let Some(size) = runtime.outdir_size {
        map.insert("outdirSize".to_string(), Value::Int(size as i64));
    }
    if let Some(size) = runtime.tmpdir_size {
        map.insert("tmpdirSize".to_string(), Value::Int(size as i64));
    }
    if let Some(code) = runtime.exit_code {
        map.insert("exitCode".to_string(), Value::Int(code as i64));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_inputs(pairs: &[(&str, Value)]) -> EvalContext {
        let mut inputs = IndexMap::new();
        for (k, v) in pairs {
            inputs.insert((*k).to_string(), v.clone());
        }
        EvalContext::new(inputs, Value::Null, IndexMap::new())
    }

    #[test]
    fn parameter_reference_interpolates_into_surrounding_text() {
        let ctx = ctx_with_inputs(&[("name", Value::String("sample1".into()))]);
        let result = evaluate("output_$(inputs.name).txt", &ctx).unwrap();
        assert_eq!(result, Value::String("output_sample1.txt".into()));
    }

    #[test]
    fn sole_parameter_reference_preserves_type() {
        let ctx = ctx_with_inputs(&[("count", Value::Int(42))]);
        let result = evaluate("$(inputs.count)", &ctx).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn escape_with_single_backslash_yields_literal_expression() {
        let ctx = ctx_with_inputs(&[("x", Value::Int(7))]);
        let result = evaluate(r"\$(inputs.x) vs $(inputs.x)", &ctx).unwrap();
        assert_eq!(result, Value::String("$(inputs.x) vs 7".into()));
    }

    #[test]
    fn escape_with_double_backslash_evaluates_and_keeps_one_backslash() {
        let ctx = ctx_with_inputs(&[("x", Value::Int(7))]);
        let result = evaluate(r"\\$(inputs.x)", &ctx).unwrap();
        assert_eq!(result, Value::String(r"\7".into()));
    }

    #[test]
    fn length_strictness_rejects_non_lengthy_values() {
        let ctx = ctx_with_inputs(&[("n", Value::Int(5))]);
        let err = evaluate("$(inputs.n.length)", &ctx).unwrap_err();
        assert!(matches!(err, ExpressionKind::LengthNotDefined));
    }

    #[test]
    fn length_strictness_accepts_strings() {
        let ctx = ctx_with_inputs(&[("n", Value::String("abc".into()))]);
        let result = evaluate("$(inputs.n.length)", &ctx).unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn undefined_property_access_fails() {
        let ctx = ctx_with_inputs(&[("name", Value::String("x".into()))]);
        let err = evaluate("$(inputs.missing)", &ctx).unwrap_err();
        assert!(matches!(err, ExpressionKind::Undefined(_)));
    }

    #[test]
    fn code_block_return_value_becomes_result() {
        let ctx = ctx_with_inputs(&[("count", Value::Int(2))]);
        let result = evaluate("${ return inputs.count; }", &ctx).unwrap();
        assert_eq!(result, Value::Int(2));
    }
}
