//! The `time` module: wall-clock reads, sleeping, and timestamp formatting
//! via `chrono`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, LocalResult, TimeZone};

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_float, as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["now", "now_ms", "sleep", "format"];

pub(crate) fn call(
    _interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "now" => {
            expect_args::<0>("time.now", args, span)?;
            Ok(Value::Float(unix_now(span)?.as_secs_f64()))
        }
        "now_ms" => {
            expect_args::<0>("time.now_ms", args, span)?;
            Ok(Value::Int(unix_now(span)?.as_millis().min(i64::MAX as u128) as i64))
        }
        "sleep" => {
            let [seconds] = expect_args::<1>("time.sleep", args, span)?;
            let seconds = as_float("time.sleep", &seconds, span)?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(
                    RunError::runtime("time.sleep expects a non-negative duration")
                        .with_span(span),
                );
            }
            std::thread::sleep(Duration::from_secs_f64(seconds));
            Ok(Value::Null)
        }
        "format" => {
            let [timestamp, pattern] = expect_args::<2>("time.format", args, span)?;
            let timestamp = as_float("time.format", &timestamp, span)?;
            let pattern = as_str("time.format", &pattern, span)?;
            let secs = timestamp.floor() as i64;
            let nanos = ((timestamp - timestamp.floor()) * 1e9) as u32;
            let formatted = match Local.timestamp_opt(secs, nanos) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.format(&pattern).to_string()
                }
                LocalResult::None => {
                    return Err(
                        RunError::runtime("time.format timestamp out of range").with_span(span)
                    );
                }
            };
            Ok(Value::Str(formatted))
        }
        other => Err(unknown_function(BuiltinModule::Time, other, FUNCTIONS, span)),
    }
}

fn unix_now(span: Span) -> RunResult<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RunError::runtime("system clock is before the UNIX epoch").with_span(span))
}
