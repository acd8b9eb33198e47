//! The `debug` module: value inspection and collector statistics.

use indexmap::IndexMap;

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["dump", "type_of", "gc_stats", "assert_eq"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "dump" => {
            let [value] = expect_args::<1>("debug.dump", args, span)?;
            Ok(Value::Str(value.repr()))
        }
        "type_of" => {
            let [value] = expect_args::<1>("debug.type_of", args, span)?;
            Ok(Value::Str(value.type_name()))
        }
        "gc_stats" => {
            expect_args::<0>("debug.gc_stats", args, span)?;
            let mut stats = IndexMap::new();
            stats.insert(
                "tracked".to_owned(),
                Value::Int(interp.runtime.gc.tracked_len() as i64),
            );
            stats.insert(
                "total_collected".to_owned(),
                Value::Int(interp.runtime.gc.total_collected() as i64),
            );
            Ok(Value::new_dict(stats, &mut interp.runtime.gc))
        }
        "assert_eq" => {
            let [left, right] = expect_args::<2>("debug.assert_eq", args, span)?;
            if left.structural_eq(&right) {
                Ok(Value::Null)
            } else {
                Err(RunError::assertion(format!(
                    "expected {} to equal {}",
                    left.repr(),
                    right.repr()
                ))
                .with_span(span))
            }
        }
        other => Err(unknown_function(BuiltinModule::Debug, other, FUNCTIONS, span)),
    }
}
