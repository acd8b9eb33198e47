//! Expression visitors: literals, operators, members, subscripts, struct
//! literals, and polyglot blocks.

use std::{cmp::Ordering, path::Path, rc::Rc, str::FromStr};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{BinOp, Expr, Literal, UnOp},
    dispatch::Dispatcher,
    env::Env,
    errors::{RunError, RunResult},
    executor::Language,
    suggest::suggestion_suffix,
    token::Span,
    types::Type,
    value::{StructValue, Value},
};

use super::{Interp, STDLIB_CALL_MARKER, STDLIB_MODULE_MARKER, USER_MODULE_MARKER};

impl Interp {
    pub(crate) fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        match expr {
            Expr::Literal(literal, _) => Ok(match literal {
                Literal::Int(v) => Value::Int(*v),
                Literal::Float(v) => Value::Float(*v),
                Literal::Str(v) => Value::Str(v.clone()),
                Literal::Bool(v) => Value::Bool(*v),
                Literal::Null => Value::Null,
            }),
            Expr::Identifier(name, span) => self
                .lookup_identifier(name, env)
                .map_err(|err| err.with_span(*span)),
            Expr::List(items, _) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env, base_dir)?);
                }
                Ok(Value::new_list(values, &mut self.runtime.gc))
            }
            Expr::Dict(entries, _) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    let value = self.eval_expr(value_expr, env, base_dir)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::new_dict(map, &mut self.runtime.gc))
            }
            Expr::Range {
                start,
                end,
                inclusive,
                span,
            } => {
                let start = self.eval_expr(start, env, base_dir)?;
                let end = self.eval_expr(end, env, base_dir)?;
                let (Value::Int(start), Value::Int(end)) = (&start, &end) else {
                    return Err(RunError::type_error(format!(
                        "range bounds must be integers, got {} and {}",
                        start.type_name(),
                        end.type_name()
                    ))
                    .with_span(*span));
                };
                self.runtime.gc.tick();
                Ok(Value::Range(crate::value::RangeValue {
                    start: *start,
                    end: *end,
                    inclusive: *inclusive,
                }))
            }
            Expr::Unary { op, expr, span } => {
                let value = self.eval_expr(expr, env, base_dir)?;
                self.runtime.gc.tick();
                match op {
                    UnOp::Neg => match value {
                        Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        other => Err(RunError::type_error(format!(
                            "cannot negate a {} value",
                            other.type_name()
                        ))
                        .with_span(*span)),
                    },
                    UnOp::Not => Ok(Value::Bool(!value.to_bool())),
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => self.eval_binary(*op, left, right, *span, env, base_dir),
            Expr::Member { object, name, span } => {
                self.eval_member(object, name, *span, env, base_dir)
            }
            Expr::Call {
                callee, args, span, ..
            } => self.eval_call(callee, args, *span, env, base_dir),
            Expr::StructLiteral {
                name,
                type_args,
                fields,
                span,
            } => self.eval_struct_literal(name, type_args, fields, *span, env, base_dir),
            Expr::InlineCode {
                language,
                code,
                bound,
                span,
            } => self.run_inline_block(language, code, bound, *span, env, true),
        }
    }

    /// Identifier lookup; stdlib module names that were never `use`d do not
    /// resolve — only bindings do.
    fn lookup_identifier(&mut self, name: &str, env: &Env) -> RunResult<Value> {
        env.get(name)
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        span: Span,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        match op {
            BinOp::Assign => return self.eval_assign(left, right, span, env, base_dir),
            BinOp::Pipeline => return self.eval_pipeline(left, right, span, env, base_dir),
            BinOp::And => {
                let lhs = self.eval_expr(left, env, base_dir)?;
                if !lhs.to_bool() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval_expr(right, env, base_dir)?;
                return Ok(Value::Bool(rhs.to_bool()));
            }
            BinOp::Or => {
                let lhs = self.eval_expr(left, env, base_dir)?;
                if lhs.to_bool() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval_expr(right, env, base_dir)?;
                return Ok(Value::Bool(rhs.to_bool()));
            }
            _ => {}
        }

        let lhs = self.eval_expr(left, env, base_dir)?;
        let rhs = self.eval_expr(right, env, base_dir)?;
        self.runtime.gc.tick();
        match op {
            BinOp::Add => self.eval_add(lhs, rhs, span),
            BinOp::Sub => numeric_op(lhs, rhs, span, "subtract", |a, b| a.wrapping_sub(b), |a, b| {
                a - b
            }),
            BinOp::Mul => numeric_op(lhs, rhs, span, "multiply", |a, b| a.wrapping_mul(b), |a, b| {
                a * b
            }),
            // Division is always float division.
            BinOp::Div => {
                if !is_numeric(&lhs) || !is_numeric(&rhs) {
                    return Err(RunError::type_error(format!(
                        "cannot divide {} by {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ))
                    .with_span(span));
                }
                Ok(Value::Float(lhs.to_float() / rhs.to_float()))
            }
            BinOp::Mod => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        Err(RunError::runtime("modulo by zero").with_span(span))
                    } else {
                        Ok(Value::Int(a.wrapping_rem(*b)))
                    }
                }
                _ if is_numeric(&lhs) && is_numeric(&rhs) => {
                    Ok(Value::Float(lhs.to_float() % rhs.to_float()))
                }
                _ => Err(RunError::type_error(format!(
                    "cannot take {} modulo {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))
                .with_span(span)),
            },
            // Equality is string-form comparison after display coercion on
            // both sides.
            BinOp::Eq => Ok(Value::Bool(lhs.loosely_eq(&rhs))),
            BinOp::Ne => Ok(Value::Bool(!lhs.loosely_eq(&rhs))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = compare_values(&lhs, &rhs).ok_or_else(|| {
                    RunError::type_error(format!(
                        "cannot compare {} with {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ))
                    .with_span(span)
                })?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ordering == Ordering::Less,
                    BinOp::Le => ordering != Ordering::Greater,
                    BinOp::Gt => ordering == Ordering::Greater,
                    BinOp::Ge => ordering != Ordering::Less,
                    _ => unreachable!(),
                }))
            }
            BinOp::Subscript => self.eval_subscript(lhs, rhs, span),
            BinOp::Assign | BinOp::Pipeline | BinOp::And | BinOp::Or => {
                unreachable!("handled above")
            }
        }
    }

    fn eval_add(&mut self, lhs: Value, rhs: Value, span: Span) -> RunResult<Value> {
        match (&lhs, &rhs) {
            // String + string or string + scalar concatenates via display
            // coercion.
            (Value::Str(a), b) if is_scalar(b) => {
                Ok(Value::Str(format!("{a}{}", b.to_display_string())))
            }
            (a, Value::Str(b)) if is_scalar(a) => {
                Ok(Value::Str(format!("{}{b}", a.to_display_string())))
            }
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            // List + list builds a new list; neither operand is aliased.
            (Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::new_list(items, &mut self.runtime.gc))
            }
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            _ if is_numeric(&lhs) && is_numeric(&rhs) => {
                Ok(Value::Float(lhs.to_float() + rhs.to_float()))
            }
            _ => Err(RunError::type_error(format!(
                "cannot add {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))
            .with_span(span)),
        }
    }

    fn eval_pipeline(
        &mut self,
        left: &Expr,
        right: &Expr,
        span: Span,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        let piped = self.eval_expr(left, env, base_dir)?;
        match right {
            // `x |> f(a, b)` calls f(x, a, b).
            Expr::Call {
                callee, args, span, ..
            } => {
                let callee = self.eval_callee(callee, env, base_dir)?;
                let mut call_args = vec![piped];
                for arg in args {
                    call_args.push(self.eval_expr(arg, env, base_dir)?);
                }
                self.call_value(callee, call_args, *span, env)
            }
            // `x |> f` calls f(x).
            _ => {
                let callee = self.eval_callee(right, env, base_dir)?;
                self.call_value(callee, vec![piped], span, env)
            }
        }
    }

    fn eval_subscript(&mut self, container: Value, index: Value, span: Span) -> RunResult<Value> {
        match (&container, &index) {
            (Value::List(items), Value::Int(idx)) => {
                let items = items.borrow();
                let len = items.len();
                usize::try_from(*idx)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| {
                        RunError::runtime(format!(
                            "list index {idx} out of bounds for length {len}"
                        ))
                        .with_span(span)
                    })
            }
            (Value::List(_), other) => Err(RunError::type_error(format!(
                "list index must be an int, got {}",
                other.type_name()
            ))
            .with_span(span)),
            (Value::Dict(entries), Value::Str(key)) => {
                entries.borrow().get(key).cloned().ok_or_else(|| {
                    RunError::runtime(format!("key '{key}' not found in dict")).with_span(span)
                })
            }
            (Value::Dict(_), other) => Err(RunError::type_error(format!(
                "dict keys are strings, got {}",
                other.type_name()
            ))
            .with_span(span)),
            (other, _) => Err(RunError::type_error(format!(
                "cannot index a {} value",
                other.type_name()
            ))
            .with_span(span)),
        }
    }

    fn eval_assign(
        &mut self,
        target: &Expr,
        value_expr: &Expr,
        span: Span,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        match target {
            Expr::Identifier(name, name_span) => {
                let value = self.eval_expr(value_expr, env, base_dir)?;
                env.set(name, value.clone())
                    .map_err(|err| err.with_span(*name_span))?;
                Ok(value)
            }
            Expr::Member {
                object,
                name,
                span: member_span,
            } => {
                let object = self.eval_expr(object, env, base_dir)?;
                let value = self.eval_expr(value_expr, env, base_dir)?;
                match &object {
                    Value::Struct(instance) => {
                        let (position, field_type, struct_name) = {
                            let borrowed = instance.borrow();
                            let Some(position) = borrowed.def.field_position(name) else {
                                let fields: Vec<&str> = borrowed
                                    .def
                                    .fields
                                    .iter()
                                    .map(|(f, _)| f.as_str())
                                    .collect();
                                return Err(RunError::type_error(format!(
                                    "struct '{}' has no field '{name}'{}",
                                    borrowed.def.name,
                                    suggestion_suffix(name, fields.iter().copied())
                                ))
                                .with_span(*member_span));
                            };
                            (
                                position,
                                borrowed.def.fields[position].1.clone(),
                                borrowed.def.name.clone(),
                            )
                        };
                        self.check_type(
                            &field_type,
                            &value,
                            &format!("field '{name}' of struct '{struct_name}'"),
                            *member_span,
                        )?;
                        instance.borrow_mut().fields[position] = value.clone();
                        Ok(value)
                    }
                    Value::Dict(entries) => {
                        entries.borrow_mut().insert(name.clone(), value.clone());
                        Ok(value)
                    }
                    other => Err(RunError::type_error(format!(
                        "cannot assign member '{name}' on a {} value",
                        other.type_name()
                    ))
                    .with_span(*member_span)),
                }
            }
            Expr::Binary {
                op: BinOp::Subscript,
                left,
                right,
                span: subscript_span,
            } => {
                let container = self.eval_expr(left, env, base_dir)?;
                let index = self.eval_expr(right, env, base_dir)?;
                let value = self.eval_expr(value_expr, env, base_dir)?;
                match (&container, &index) {
                    (Value::List(items), Value::Int(idx)) => {
                        let mut items = items.borrow_mut();
                        let len = items.len();
                        let slot = usize::try_from(*idx)
                            .ok()
                            .and_then(|i| items.get_mut(i))
                            .ok_or_else(|| {
                                RunError::runtime(format!(
                                    "list index {idx} out of bounds for length {len}"
                                ))
                                .with_span(*subscript_span)
                            })?;
                        *slot = value.clone();
                        Ok(value)
                    }
                    (Value::Dict(entries), Value::Str(key)) => {
                        entries.borrow_mut().insert(key.clone(), value.clone());
                        Ok(value)
                    }
                    (other, _) => Err(RunError::type_error(format!(
                        "cannot assign into a {} value",
                        other.type_name()
                    ))
                    .with_span(*subscript_span)),
                }
            }
            _ => Err(RunError::syntax("invalid assignment target").with_span(span)),
        }
    }

    /// Member access. Attempts are sequenced and stop at the first match:
    /// enum variant, struct field, block accessor, foreign member, dict
    /// entry, stdlib-module marker, user-module symbol.
    fn eval_member(
        &mut self,
        object: &Expr,
        name: &str,
        span: Span,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        // (i) `Enum.Variant` — resolved against registered enums before the
        // object expression is treated as a value.
        if let Expr::Identifier(type_name, _) = object {
            if let Some(decl) = env.lookup_enum(type_name) {
                let Some((variant, value)) =
                    decl.variants.iter().find(|(variant, _)| variant == name)
                else {
                    let variants: Vec<&str> =
                        decl.variants.iter().map(|(v, _)| v.as_str()).collect();
                    return Err(RunError::reference(format!(
                        "enum '{type_name}' has no member '{name}'{}",
                        suggestion_suffix(name, variants.iter().copied())
                    ))
                    .with_span(span));
                };
                return Ok(Value::EnumMember(crate::value::EnumMember {
                    enum_name: decl.name.clone(),
                    variant: variant.clone(),
                    value: *value,
                }));
            }
        }

        let object = self.eval_expr(object, env, base_dir)?;
        match &object {
            // (ii) struct field access.
            Value::Struct(instance) => {
                let borrowed = instance.borrow();
                match borrowed.def.field_position(name) {
                    Some(position) => Ok(borrowed.fields[position].clone()),
                    None => {
                        let fields: Vec<&str> =
                            borrowed.def.fields.iter().map(|(f, _)| f.as_str()).collect();
                        Err(RunError::type_error(format!(
                            "struct '{}' has no field '{name}'{}",
                            borrowed.def.name,
                            suggestion_suffix(name, fields.iter().copied())
                        ))
                        .with_span(span))
                    }
                }
            }
            // (iii) block member: a new accessor with an extended path.
            Value::Block(block) => Ok(Value::Block(Rc::new(block.member(name)))),
            // (iv) foreign member, resolved later through the executor.
            Value::Foreign(object) => Ok(Value::Foreign(Rc::new(object.member(name)))),
            // (v) dict member: the value under the string key.
            Value::Dict(entries) => entries.borrow().get(name).cloned().ok_or_else(|| {
                RunError::runtime(format!("key '{name}' not found in dict")).with_span(span)
            }),
            Value::Str(text) => {
                // (vi) member on a stdlib-module marker produces a call
                // marker.
                if let Some(module) = text.strip_prefix(STDLIB_MODULE_MARKER) {
                    return Ok(Value::Str(format!("{STDLIB_CALL_MARKER}{module}:{name}")));
                }
                // (vii) member on a user-module marker reads the module's
                // environment.
                if text.starts_with(USER_MODULE_MARKER) {
                    let Some(module_env) = self.module_env_for_marker(text) else {
                        return Err(
                            RunError::import("module is no longer loaded").with_span(span)
                        );
                    };
                    return module_env.lookup(name).ok_or_else(|| {
                        let names = module_env.all_names();
                        RunError::reference(format!(
                            "module has no symbol '{name}'{}",
                            suggestion_suffix(name, names.iter().map(String::as_str))
                        ))
                        .with_span(span)
                    });
                }
                Err(RunError::type_error(format!(
                    "cannot access member '{name}' on a string value"
                ))
                .with_span(span))
            }
            other => Err(RunError::type_error(format!(
                "cannot access member '{name}' on a {} value",
                other.type_name()
            ))
            .with_span(span)),
        }
    }

    fn eval_struct_literal(
        &mut self,
        name: &str,
        type_args: &[Type],
        field_inits: &[(String, Expr)],
        span: Span,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        // Initializers evaluate in literal order before any inference.
        let mut values: Vec<(String, Value)> = Vec::with_capacity(field_inits.len());
        for (field, expr) in field_inits {
            values.push((field.clone(), self.eval_expr(expr, env, base_dir)?));
        }

        let Some(base) = self.runtime.structs.get(name) else {
            let names: Vec<String> = self.runtime.structs.names().map(str::to_owned).collect();
            return Err(RunError::type_error(format!(
                "unknown struct '{name}'{}",
                suggestion_suffix(name, names.iter().map(String::as_str))
            ))
            .with_span(span));
        };

        let def = if base.is_generic() {
            let mut bindings: AHashMap<String, Type> = AHashMap::new();
            if type_args.is_empty() {
                // Element types are inferred from the supplied initializers.
                for (field, value) in &values {
                    if let Some(position) = base.field_position(field) {
                        base.fields[position]
                            .1
                            .unify_with(&Type::of_value(value), &mut bindings);
                    }
                }
            } else {
                if type_args.len() != base.type_params.len() {
                    return Err(RunError::type_error(format!(
                        "struct {name} expects {} type argument(s), got {}",
                        base.type_params.len(),
                        type_args.len()
                    ))
                    .with_span(span));
                }
                for (param, arg) in base.type_params.iter().zip(type_args) {
                    bindings.insert(param.clone(), arg.clone());
                }
            }
            let mut resolved = Vec::with_capacity(base.type_params.len());
            for param in &base.type_params {
                match bindings.get(param) {
                    Some(ty) => resolved.push(ty.clone()),
                    None => {
                        log::warn!(
                            "type parameter '{param}' of struct '{name}' could not be inferred, defaulting to any"
                        );
                        resolved.push(Type::any());
                    }
                }
            }
            self.runtime
                .structs
                .ensure_specialization(&base, &resolved)
                .map_err(|err| err.with_span(span))?
        } else {
            if !type_args.is_empty() {
                return Err(
                    RunError::type_error(format!("struct '{name}' is not generic")).with_span(span)
                );
            }
            base
        };

        let mut fields: Vec<Option<Value>> = vec![None; def.fields.len()];
        for (field, value) in values {
            let Some(position) = def.field_position(&field) else {
                let names: Vec<&str> = def.fields.iter().map(|(f, _)| f.as_str()).collect();
                return Err(RunError::type_error(format!(
                    "struct '{}' has no field '{field}'{}",
                    def.name,
                    suggestion_suffix(&field, names.iter().copied())
                ))
                .with_span(span));
            };
            self.check_type(
                &def.fields[position].1,
                &value,
                &format!("field '{field}' of struct '{}'", def.name),
                span,
            )?;
            fields[position] = Some(value);
        }

        let mut ordered = Vec::with_capacity(fields.len());
        for (position, slot) in fields.into_iter().enumerate() {
            match slot {
                Some(value) => ordered.push(value),
                None => {
                    let (field, ty) = &def.fields[position];
                    if ty.nullable {
                        ordered.push(Value::Null);
                    } else {
                        return Err(RunError::type_error(format!(
                            "missing field '{field}' in struct literal for '{}'",
                            def.name
                        ))
                        .with_span(span));
                    }
                }
            }
        }

        Ok(Value::new_struct(
            StructValue {
                def,
                fields: ordered,
            },
            &mut self.runtime.gc,
        ))
    }

    /// Runs an embedded polyglot block: bound variables are looked up in
    /// the current scope and serialized into declarations ahead of the
    /// code. In value position (`returning`) the trailing expression's
    /// value comes back as the result; in statement position the block runs
    /// for its side effects only.
    pub(crate) fn run_inline_block(
        &mut self,
        language: &str,
        code: &str,
        bound: &[String],
        span: Span,
        env: &Env,
        returning: bool,
    ) -> RunResult<Value> {
        let language = Language::from_str(language).map_err(|_| {
            RunError::block(format!("unknown block language '{language}'")).with_span(span)
        })?;
        let mut bindings = Vec::with_capacity(bound.len());
        for name in bound {
            bindings.push((name.clone(), env.get(name).map_err(|e| e.with_span(span))?));
        }
        let source = Dispatcher::prepare_source(language, code, &bindings)
            .map_err(|err| err.with_span(span))?;
        let backend = self
            .runtime
            .dispatcher
            .backend_for(language)
            .map_err(|err| err.with_span(span))?;
        if returning {
            let wire = self
                .runtime
                .dispatcher
                .execute_with_return(&backend, language, &source, self.sink.as_mut())
                .map_err(|err| err.with_span(span))?;
            Ok(wire.into_value(&mut self.runtime.gc, language, backend.executor()))
        } else {
            self.runtime
                .dispatcher
                .execute(&backend, language, &source, self.sink.as_mut())
                .map_err(|err| err.with_span(span))?;
            Ok(Value::Null)
        }
    }
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_)
    )
}

fn numeric_op(
    lhs: Value,
    rhs: Value,
    span: Span,
    verb: &str,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> RunResult<Value> {
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        _ if is_numeric(&lhs) && is_numeric(&rhs) => {
            Ok(Value::Float(float_op(lhs.to_float(), rhs.to_float())))
        }
        _ => Err(RunError::type_error(format!(
            "cannot {verb} {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))
        .with_span(span)),
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ if is_numeric(lhs) && is_numeric(rhs) => lhs.to_float().partial_cmp(&rhs.to_float()),
        _ => None,
    }
}
