//! The `regex` module, backed by the `regex` crate.

use regex::Regex;

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["is_match", "find", "find_all", "replace", "split", "captures"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "is_match" => {
            let [pattern, text] = expect_args::<2>("regex.is_match", args, span)?;
            let re = compile(&as_str("regex.is_match", &pattern, span)?, span)?;
            Ok(Value::Bool(re.is_match(&as_str("regex.is_match", &text, span)?)))
        }
        "find" => {
            let [pattern, text] = expect_args::<2>("regex.find", args, span)?;
            let re = compile(&as_str("regex.find", &pattern, span)?, span)?;
            let text = as_str("regex.find", &text, span)?;
            Ok(match re.find(&text) {
                Some(found) => Value::Str(found.as_str().to_owned()),
                None => Value::Null,
            })
        }
        "find_all" => {
            let [pattern, text] = expect_args::<2>("regex.find_all", args, span)?;
            let re = compile(&as_str("regex.find_all", &pattern, span)?, span)?;
            let text = as_str("regex.find_all", &text, span)?;
            let matches: Vec<Value> = re
                .find_iter(&text)
                .map(|found| Value::Str(found.as_str().to_owned()))
                .collect();
            Ok(Value::new_list(matches, &mut interp.runtime.gc))
        }
        "replace" => {
            let [pattern, text, replacement] = expect_args::<3>("regex.replace", args, span)?;
            let re = compile(&as_str("regex.replace", &pattern, span)?, span)?;
            let text = as_str("regex.replace", &text, span)?;
            let replacement = as_str("regex.replace", &replacement, span)?;
            Ok(Value::Str(
                re.replace_all(&text, replacement.as_str()).into_owned(),
            ))
        }
        "split" => {
            let [pattern, text] = expect_args::<2>("regex.split", args, span)?;
            let re = compile(&as_str("regex.split", &pattern, span)?, span)?;
            let text = as_str("regex.split", &text, span)?;
            let parts: Vec<Value> = re
                .split(&text)
                .map(|part| Value::Str(part.to_owned()))
                .collect();
            Ok(Value::new_list(parts, &mut interp.runtime.gc))
        }
        "captures" => {
            let [pattern, text] = expect_args::<2>("regex.captures", args, span)?;
            let re = compile(&as_str("regex.captures", &pattern, span)?, span)?;
            let text = as_str("regex.captures", &text, span)?;
            Ok(match re.captures(&text) {
                Some(captures) => {
                    let groups: Vec<Value> = captures
                        .iter()
                        .map(|group| match group {
                            Some(found) => Value::Str(found.as_str().to_owned()),
                            None => Value::Null,
                        })
                        .collect();
                    Value::new_list(groups, &mut interp.runtime.gc)
                }
                None => Value::Null,
            })
        }
        other => Err(unknown_function(BuiltinModule::Regex, other, FUNCTIONS, span)),
    }
}

fn compile(pattern: &str, span: Span) -> RunResult<Regex> {
    Regex::new(pattern).map_err(|err| {
        RunError::runtime(format!("invalid regular expression: {err}")).with_span(span)
    })
}
