//! The `string` module: pure text helpers over host strings.

use crate::{errors::RunResult, interp::Interp, token::Span, value::Value};

use super::{as_int, as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "split",
    "contains",
    "starts_with",
    "ends_with",
    "replace",
    "substring",
    "index_of",
    "repeat",
];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "upper" => {
            let [v] = expect_args::<1>("string.upper", args, span)?;
            Ok(Value::Str(as_str("string.upper", &v, span)?.to_uppercase()))
        }
        "lower" => {
            let [v] = expect_args::<1>("string.lower", args, span)?;
            Ok(Value::Str(as_str("string.lower", &v, span)?.to_lowercase()))
        }
        "trim" => {
            let [v] = expect_args::<1>("string.trim", args, span)?;
            Ok(Value::Str(as_str("string.trim", &v, span)?.trim().to_owned()))
        }
        "split" => {
            let [text, separator] = expect_args::<2>("string.split", args, span)?;
            let text = as_str("string.split", &text, span)?;
            let separator = as_str("string.split", &separator, span)?;
            let parts: Vec<Value> = if separator.is_empty() {
                text.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                text.split(&separator)
                    .map(|part| Value::Str(part.to_owned()))
                    .collect()
            };
            Ok(Value::new_list(parts, &mut interp.runtime.gc))
        }
        "contains" => {
            let [text, needle] = expect_args::<2>("string.contains", args, span)?;
            Ok(Value::Bool(
                as_str("string.contains", &text, span)?
                    .contains(&as_str("string.contains", &needle, span)?),
            ))
        }
        "starts_with" => {
            let [text, prefix] = expect_args::<2>("string.starts_with", args, span)?;
            Ok(Value::Bool(
                as_str("string.starts_with", &text, span)?
                    .starts_with(&as_str("string.starts_with", &prefix, span)?),
            ))
        }
        "ends_with" => {
            let [text, suffix] = expect_args::<2>("string.ends_with", args, span)?;
            Ok(Value::Bool(
                as_str("string.ends_with", &text, span)?
                    .ends_with(&as_str("string.ends_with", &suffix, span)?),
            ))
        }
        "replace" => {
            let [text, from, to] = expect_args::<3>("string.replace", args, span)?;
            Ok(Value::Str(as_str("string.replace", &text, span)?.replace(
                &as_str("string.replace", &from, span)?,
                &as_str("string.replace", &to, span)?,
            )))
        }
        "substring" => {
            let [text, start, end] = expect_args::<3>("string.substring", args, span)?;
            let text = as_str("string.substring", &text, span)?;
            let chars: Vec<char> = text.chars().collect();
            let start = as_int("string.substring", &start, span)?.max(0) as usize;
            let end = (as_int("string.substring", &end, span)?.max(0) as usize).min(chars.len());
            let slice: String = chars
                .get(start..end.max(start))
                .unwrap_or_default()
                .iter()
                .collect();
            Ok(Value::Str(slice))
        }
        "index_of" => {
            let [text, needle] = expect_args::<2>("string.index_of", args, span)?;
            let text = as_str("string.index_of", &text, span)?;
            let needle = as_str("string.index_of", &needle, span)?;
            let index = match text.find(&needle) {
                // Byte offset converted to a character index.
                Some(byte) => text[..byte].chars().count() as i64,
                None => -1,
            };
            Ok(Value::Int(index))
        }
        "repeat" => {
            let [text, count] = expect_args::<2>("string.repeat", args, span)?;
            let count = as_int("string.repeat", &count, span)?.max(0) as usize;
            Ok(Value::Str(as_str("string.repeat", &text, span)?.repeat(count)))
        }
        other => Err(unknown_function(
            BuiltinModule::String,
            other,
            FUNCTIONS,
            span,
        )),
    }
}
