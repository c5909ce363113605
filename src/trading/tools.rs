// =============================================================================
// ANALYZE tool registry
// =============================================================================
//
// spec §4.7.2: "tools are pure functions over market data and parameters ...
// they do not mutate state". `run_tool` is the single entry point the
// Decision Loop (C7) calls for every `ProposedAction::Analyze` it sees;
// the result is folded back into the next prompt iteration as-is.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::indicators::{custom_equation, ema, kelly, moon_phase, rsi};

/// The market data a tool call may read. Built fresh by the Decision Loop for
/// each bot turn from the shared market snapshot; never mutated by a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub closes_by_symbol: HashMap<String, Vec<f64>>,
    pub now: DateTime<Utc>,
}

/// Run the named tool against `parameters`, returning a JSON value that is
/// folded into `accumulated_analyses` verbatim. Unknown tools and malformed
/// parameters both produce an `{"error": ...}` value rather than a hard
/// failure — a bot's next iteration sees the error and can adjust.
pub fn run_tool(tool: &str, parameters: &Value, ctx: &ToolContext) -> Value {
    match tool {
        "rsi" => run_rsi(parameters, ctx),
        "moving_average" => run_moving_average(parameters, ctx),
        "kelly" => run_kelly(parameters),
        "custom_equation" => run_custom_equation(parameters),
        "moon_phase" => run_moon_phase(parameters, ctx),
        other => json!({ "error": format!("unknown tool '{other}'") }),
    }
}

fn run_rsi(parameters: &Value, ctx: &ToolContext) -> Value {
    let Some(symbol) = parameters.get("symbol").and_then(Value::as_str) else {
        return json!({ "error": "rsi requires a 'symbol' parameter" });
    };
    let period = parameters
        .get("period")
        .and_then(Value::as_u64)
        .unwrap_or(14) as usize;

    let Some(closes) = ctx.closes_by_symbol.get(symbol) else {
        return json!({ "error": format!("no market data for symbol '{symbol}'") });
    };

    match rsi::current_rsi(closes, period) {
        Some((value, label)) => json!({ "symbol": symbol, "period": period, "value": value, "label": label }),
        None => json!({ "error": format!("insufficient data to compute rsi({period}) for '{symbol}'") }),
    }
}

fn run_moving_average(parameters: &Value, ctx: &ToolContext) -> Value {
    let Some(symbol) = parameters.get("symbol").and_then(Value::as_str) else {
        return json!({ "error": "moving_average requires a 'symbol' parameter" });
    };
    let period = parameters
        .get("period")
        .and_then(Value::as_u64)
        .unwrap_or(20) as usize;

    let Some(closes) = ctx.closes_by_symbol.get(symbol) else {
        return json!({ "error": format!("no market data for symbol '{symbol}'") });
    };

    match ema::calculate_ema(closes, period).last() {
        Some(&value) => json!({ "symbol": symbol, "period": period, "value": value }),
        None => json!({ "error": format!("insufficient data to compute moving_average({period}) for '{symbol}'") }),
    }
}

fn run_kelly(parameters: &Value) -> Value {
    let (Some(win_rate), Some(win_loss_ratio)) = (
        parameters.get("winRate").and_then(Value::as_f64),
        parameters.get("winLossRatio").and_then(Value::as_f64),
    ) else {
        return json!({ "error": "kelly requires 'winRate' and 'winLossRatio' parameters" });
    };

    match kelly::kelly_fraction(win_rate, win_loss_ratio) {
        Some(fraction) => json!({ "fraction": fraction }),
        None => json!({ "error": "winRate must be in [0, 1] and winLossRatio must be > 0" }),
    }
}

fn run_custom_equation(parameters: &Value) -> Value {
    let Some(expression) = parameters.get("expression").and_then(Value::as_str) else {
        return json!({ "error": "custom_equation requires an 'expression' parameter" });
    };

    let variables: Vec<(String, f64)> = parameters
        .get("variables")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect()
        })
        .unwrap_or_default();

    match custom_equation::evaluate(expression, &variables) {
        Ok(value) => json!({ "value": value }),
        Err(message) => json!({ "error": message }),
    }
}

fn run_moon_phase(parameters: &Value, ctx: &ToolContext) -> Value {
    let at = parameters
        .get("date")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(ctx.now);

    let (age_days, fraction, name) = moon_phase::moon_phase(at);
    json!({ "ageDays": age_days, "fraction": fraction, "phase": name })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(symbol: &str, closes: Vec<f64>) -> ToolContext {
        let mut closes_by_symbol = HashMap::new();
        closes_by_symbol.insert(symbol.to_string(), closes);
        ToolContext {
            closes_by_symbol,
            now: Utc::now(),
        }
    }

    #[test]
    fn rsi_tool_reports_overbought_on_ascending_series() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let ctx = ctx_with("ETHUSDT", closes);
        let result = run_tool("rsi", &json!({ "symbol": "ETHUSDT", "period": 14 }), &ctx);
        assert_eq!(result["label"], "OVERBOUGHT");
    }

    #[test]
    fn rsi_tool_errors_on_unknown_symbol() {
        let ctx = ToolContext::default();
        let result = run_tool("rsi", &json!({ "symbol": "DOGEUSDT" }), &ctx);
        assert!(result["error"].is_string());
    }

    #[test]
    fn moving_average_tool_returns_last_ema() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ctx = ctx_with("BTCUSDT", closes);
        let result = run_tool(
            "moving_average",
            &json!({ "symbol": "BTCUSDT", "period": 5 }),
            &ctx,
        );
        assert!(result["value"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn kelly_tool_computes_fraction() {
        let ctx = ToolContext::default();
        let result = run_tool(
            "kelly",
            &json!({ "winRate": 0.5, "winLossRatio": 2.0 }),
            &ctx,
        );
        assert!((result["fraction"].as_f64().unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn custom_equation_tool_evaluates_with_variables() {
        let ctx = ToolContext::default();
        let result = run_tool(
            "custom_equation",
            &json!({ "expression": "rsi - threshold", "variables": { "rsi": 72.0, "threshold": 70.0 } }),
            &ctx,
        );
        assert!((result["value"].as_f64().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn moon_phase_tool_returns_fraction_in_unit_range() {
        let ctx = ToolContext::default();
        let result = run_tool("moon_phase", &json!({}), &ctx);
        let fraction = result["fraction"].as_f64().unwrap();
        assert!((0.0..1.0).contains(&fraction));
    }

    #[test]
    fn unknown_tool_returns_error_value() {
        let ctx = ToolContext::default();
        let result = run_tool("sentiment_score", &json!({}), &ctx);
        assert!(result["error"].is_string());
    }
}
