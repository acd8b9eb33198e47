//! The `crypto` module: digests and random tokens.

use md5::Md5;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_int, as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["md5", "sha1", "sha256", "sha512", "random_hex"];

pub(crate) fn call(
    _interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "md5" => digest::<Md5>("crypto.md5", args, span),
        "sha1" => digest::<Sha1>("crypto.sha1", args, span),
        "sha256" => digest::<Sha256>("crypto.sha256", args, span),
        "sha512" => digest::<Sha512>("crypto.sha512", args, span),
        "random_hex" => {
            let [length] = expect_args::<1>("crypto.random_hex", args, span)?;
            let length = as_int("crypto.random_hex", &length, span)?;
            if !(1..=1024).contains(&length) {
                return Err(RunError::runtime(
                    "crypto.random_hex length must be between 1 and 1024",
                )
                .with_span(span));
            }
            let mut bytes = vec![0u8; length as usize];
            rand::thread_rng().fill_bytes(&mut bytes);
            Ok(Value::Str(hex(&bytes)))
        }
        other => Err(unknown_function(BuiltinModule::Crypto, other, FUNCTIONS, span)),
    }
}

fn digest<D: Digest>(context: &str, args: Vec<Value>, span: Span) -> RunResult<Value> {
    let [text] = expect_args::<1>(context, args, span)?;
    let text = as_str(context, &text, span)?;
    let mut hasher = D::new();
    hasher.update(text.as_bytes());
    Ok(Value::Str(hex(&hasher.finalize())))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
