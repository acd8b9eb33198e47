//! The `json` module, backed by `serde_json` through the wire-value shape.

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    marshal::{to_wire, WireValue},
    token::Span,
    value::Value,
};

use super::{as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["parse", "stringify", "stringify_pretty"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "parse" => {
            let [text] = expect_args::<1>("json.parse", args, span)?;
            let text = as_str("json.parse", &text, span)?;
            let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
                RunError::runtime(format!("json.parse failed: {err}")).with_span(span)
            })?;
            Ok(json_to_value(WireValue::from_json(parsed), interp))
        }
        "stringify" => {
            let [value] = expect_args::<1>("json.stringify", args, span)?;
            let wire = to_wire(&value).map_err(|err| err.with_span(span))?;
            Ok(Value::Str(wire.to_json().to_string()))
        }
        "stringify_pretty" => {
            let [value] = expect_args::<1>("json.stringify_pretty", args, span)?;
            let wire = to_wire(&value).map_err(|err| err.with_span(span))?;
            let pretty = serde_json::to_string_pretty(&wire.to_json()).map_err(|err| {
                RunError::runtime(format!("json.stringify_pretty failed: {err}")).with_span(span)
            })?;
            Ok(Value::Str(pretty))
        }
        other => Err(unknown_function(BuiltinModule::Json, other, FUNCTIONS, span)),
    }
}

fn json_to_value(wire: WireValue, interp: &mut Interp) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(i) => Value::Int(i),
        WireValue::Float(f) => Value::Float(f),
        WireValue::Str(s) | WireValue::Foreign { repr: s, .. } => Value::Str(s),
        WireValue::List(items) => {
            let converted = items
                .into_iter()
                .map(|item| json_to_value(item, interp))
                .collect();
            Value::new_list(converted, &mut interp.runtime.gc)
        }
        WireValue::Dict(entries) => {
            let converted = entries
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v, interp)))
                .collect();
            Value::new_dict(converted, &mut interp.runtime.gc)
        }
    }
}
