//! The `math` module.

use rand::Rng;

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_float, as_int, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &[
    "pi", "e", "abs", "floor", "ceil", "round", "sqrt", "pow", "min", "max", "random",
    "random_int", "sin", "cos", "tan", "log", "log10", "exp",
];

pub(crate) fn call(
    _interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "pi" => {
            expect_args::<0>("math.pi", args, span)?;
            Ok(Value::Float(std::f64::consts::PI))
        }
        "e" => {
            expect_args::<0>("math.e", args, span)?;
            Ok(Value::Float(std::f64::consts::E))
        }
        "abs" => {
            let [v] = expect_args::<1>("math.abs", args, span)?;
            match v {
                Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
                other => Ok(Value::Float(as_float("math.abs", &other, span)?.abs())),
            }
        }
        "floor" => unary(args, span, "math.floor", |v| v.floor() as i64).map(Value::Int),
        "ceil" => unary(args, span, "math.ceil", |v| v.ceil() as i64).map(Value::Int),
        "round" => unary(args, span, "math.round", |v| v.round() as i64).map(Value::Int),
        "sqrt" => {
            let [v] = expect_args::<1>("math.sqrt", args, span)?;
            let v = as_float("math.sqrt", &v, span)?;
            if v < 0.0 {
                return Err(
                    RunError::runtime("math.sqrt of a negative number").with_span(span)
                );
            }
            Ok(Value::Float(v.sqrt()))
        }
        "pow" => {
            let [base, exponent] = expect_args::<2>("math.pow", args, span)?;
            match (&base, &exponent) {
                (Value::Int(b), Value::Int(e)) if *e >= 0 && *e <= u32::MAX as i64 => {
                    Ok(Value::Int(b.wrapping_pow(*e as u32)))
                }
                _ => Ok(Value::Float(
                    as_float("math.pow", &base, span)?
                        .powf(as_float("math.pow", &exponent, span)?),
                )),
            }
        }
        "min" => pick(args, span, "math.min", |a, b| a < b),
        "max" => pick(args, span, "math.max", |a, b| a > b),
        "random" => {
            expect_args::<0>("math.random", args, span)?;
            Ok(Value::Float(rand::thread_rng().gen::<f64>()))
        }
        "random_int" => {
            let [low, high] = expect_args::<2>("math.random_int", args, span)?;
            let low = as_int("math.random_int", &low, span)?;
            let high = as_int("math.random_int", &high, span)?;
            if low > high {
                return Err(RunError::runtime(
                    "math.random_int expects low <= high",
                )
                .with_span(span));
            }
            Ok(Value::Int(rand::thread_rng().gen_range(low..=high)))
        }
        "sin" => float_fn(args, span, "math.sin", f64::sin),
        "cos" => float_fn(args, span, "math.cos", f64::cos),
        "tan" => float_fn(args, span, "math.tan", f64::tan),
        "log" => float_fn(args, span, "math.log", f64::ln),
        "log10" => float_fn(args, span, "math.log10", f64::log10),
        "exp" => float_fn(args, span, "math.exp", f64::exp),
        other => Err(unknown_function(BuiltinModule::Math, other, FUNCTIONS, span)),
    }
}

fn unary(args: Vec<Value>, span: Span, context: &str, f: impl Fn(f64) -> i64) -> RunResult<i64> {
    let [v] = expect_args::<1>(context, args, span)?;
    Ok(f(as_float(context, &v, span)?))
}

fn float_fn(
    args: Vec<Value>,
    span: Span,
    context: &str,
    f: impl Fn(f64) -> f64,
) -> RunResult<Value> {
    let [v] = expect_args::<1>(context, args, span)?;
    Ok(Value::Float(f(as_float(context, &v, span)?)))
}

fn pick(
    args: Vec<Value>,
    span: Span,
    context: &str,
    better: impl Fn(f64, f64) -> bool,
) -> RunResult<Value> {
    let [a, b] = expect_args::<2>(context, args, span)?;
    let fa = as_float(context, &a, span)?;
    let fb = as_float(context, &b, span)?;
    Ok(if better(fa, fb) { a } else { b })
}
