//! The `io` module. `io.write` is the documented primary output routine;
//! the `print` builtin coexists with it.

use std::io::BufRead;

use crate::{errors::RunResult, interp::Interp, token::Span, value::Value};

use super::{expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["write", "writeln", "eprint", "read_line"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "write" => {
            let [value] = expect_args::<1>("io.write", args, span)?;
            interp.write_output(&value.to_display_string());
            Ok(Value::Null)
        }
        "writeln" => {
            let [value] = expect_args::<1>("io.writeln", args, span)?;
            interp.write_output(&value.to_display_string());
            interp.write_output("\n");
            Ok(Value::Null)
        }
        "eprint" => {
            let [value] = expect_args::<1>("io.eprint", args, span)?;
            eprintln!("{}", value.to_display_string());
            Ok(Value::Null)
        }
        "read_line" => {
            expect_args::<0>("io.read_line", args, span)?;
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|err| {
                    crate::errors::RunError::runtime(format!("io.read_line failed: {err}"))
                        .with_span(span)
                })?;
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Value::Str(line))
        }
        other => Err(unknown_function(BuiltinModule::Io, other, FUNCTIONS, span)),
    }
}
