// =============================================================================
// Custom equation evaluator
// =============================================================================
//
// Lets a bot's ANALYZE tool loop evaluate an arbitrary arithmetic expression
// over a set of named variables it supplies (e.g. a bot-authored momentum
// score). Backed by `evalexpr`, a small sandboxed expression evaluator with
// no I/O or side-effect capability — it cannot read files, spawn processes,
// or access anything outside the variable context it is given.

use evalexpr::{eval_with_context, Value as EvalValue};

/// Evaluate `expression` with the given `variables` bound as evaluation
/// context and return the resulting number.
///
/// # Edge cases
/// - Malformed expressions (syntax errors, unknown identifiers) => `Err`
/// - Non-numeric results (e.g. a boolean or string expression) => `Err`
/// - Non-finite results (division by zero, etc.) => `Err`
pub fn evaluate(expression: &str, variables: &[(String, f64)]) -> Result<f64, String> {
    let mut bindings = Vec::with_capacity(variables.len());
    for (name, value) in variables {
        bindings.push((name.clone(), EvalValue::from(*value)));
    }

    let context = build_context(&bindings).map_err(|e| e.to_string())?;

    let result = eval_with_context(expression, &context).map_err(|e| e.to_string())?;

    match result {
        EvalValue::Float(f) if f.is_finite() => Ok(f),
        EvalValue::Int(i) => Ok(i as f64),
        EvalValue::Float(_) => Err("expression produced a non-finite result".to_string()),
        other => Err(format!("expression did not evaluate to a number: {other:?}")),
    }
}

fn build_context(
    bindings: &[(String, EvalValue)],
) -> Result<evalexpr::HashMapContext, evalexpr::EvalexprError> {
    use evalexpr::{ContextWithMutableVariables, HashMapContext};

    let mut ctx = HashMapContext::new();
    for (name, value) in bindings {
        ctx.set_value(name.clone(), value.clone())?;
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_plain_arithmetic() {
        let v = evaluate("2 + 3 * 4", &[]).unwrap();
        assert!((v - 14.0).abs() < 1e-10);
    }

    #[test]
    fn evaluates_with_bound_variables() {
        let vars = vec![("rsi".to_string(), 72.0), ("threshold".to_string(), 70.0)];
        let v = evaluate("rsi - threshold", &vars).unwrap();
        assert!((v - 2.0).abs() < 1e-10);
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(evaluate("2 + + ", &[]).is_err());
    }

    #[test]
    fn rejects_unknown_identifier() {
        assert!(evaluate("unbound_var * 2", &[]).is_err());
    }

    #[test]
    fn rejects_non_numeric_result() {
        assert!(evaluate("1 == 1", &[]).is_err());
    }
}
