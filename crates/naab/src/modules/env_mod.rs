//! The `env` module: process environment and script arguments.

use indexmap::IndexMap;

use crate::{errors::RunResult, interp::Interp, token::Span, value::Value};

use super::{as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["get", "set", "vars", "get_args", "current_dir"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "get" => {
            let [name] = expect_args::<1>("env.get", args, span)?;
            let name = as_str("env.get", &name, span)?;
            Ok(match std::env::var(&name) {
                Ok(value) => Value::Str(value),
                Err(_) => Value::Null,
            })
        }
        "set" => {
            let [name, value] = expect_args::<2>("env.set", args, span)?;
            std::env::set_var(
                as_str("env.set", &name, span)?,
                value.to_display_string(),
            );
            Ok(Value::Null)
        }
        "vars" => {
            expect_args::<0>("env.vars", args, span)?;
            let mut entries = IndexMap::new();
            for (key, value) in std::env::vars() {
                entries.insert(key, Value::Str(value));
            }
            Ok(Value::new_dict(entries, &mut interp.runtime.gc))
        }
        // Script positional arguments, with `--…` flags already filtered by
        // the driver.
        "get_args" => {
            expect_args::<0>("env.get_args", args, span)?;
            let values = interp
                .script_args()
                .iter()
                .map(|arg| Value::Str(arg.clone()))
                .collect();
            Ok(Value::new_list(values, &mut interp.runtime.gc))
        }
        "current_dir" => {
            expect_args::<0>("env.current_dir", args, span)?;
            let dir = std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            Ok(Value::Str(dir))
        }
        other => Err(unknown_function(BuiltinModule::Env, other, FUNCTIONS, span)),
    }
}
