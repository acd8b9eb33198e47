//! Call dispatch: user functions (with generics and reference parameters),
//! builtins, stdlib-module calls, block invocation, and foreign calls.

use std::{path::Path, path::PathBuf, rc::Rc};

use ahash::AHashMap;

use crate::{
    ast::{Expr, FunctionDecl, Literal, Stmt},
    dispatch::flush_output,
    env::Env,
    errors::{RunError, RunResult, StackFrame},
    marshal::{self, WireValue},
    modules::BuiltinModule,
    suggest::suggestion_suffix,
    token::Span,
    types::{Type, TypeKind},
    value::{FunctionValue, Value},
};

use super::{Flow, Interp, STDLIB_CALL_MARKER, STDLIB_MODULE_MARKER};

const BUILTIN_MARKER: &str = "__builtin__:";
const BUILTINS: &[&str] = &["print", "len", "type", "typeof", "gc_collect", "assert"];

impl Interp {
    pub(crate) fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        let callee_value = self.eval_callee(callee, env, base_dir)?;
        // Arguments evaluate left-to-right before dispatch.
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_expr(arg, env, base_dir)?);
        }

        if let Value::Function(func) = &callee_value {
            let func = Rc::clone(func);
            let (value, ref_finals) = self.call_function(&func, arg_values, span)?;
            // Reference parameters alias the caller's value cell; for
            // scalars that aliasing is realized by writing the final value
            // back to identifier arguments.
            for (index, final_value) in ref_finals {
                if let Some(Expr::Identifier(name, _)) = args.get(index) {
                    env.set(name, final_value)?;
                }
            }
            return Ok(value);
        }
        self.call_value(callee_value, arg_values, span, env)
    }

    /// Resolves a callee expression. Unbound identifiers fall back to the
    /// builtin table before reporting `ReferenceError` with suggestions.
    pub(crate) fn eval_callee(
        &mut self,
        callee: &Expr,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Value> {
        if let Expr::Identifier(name, span) = callee {
            if let Some(value) = env.lookup(name) {
                return Ok(value);
            }
            if BUILTINS.contains(&name.as_str()) {
                return Ok(Value::Str(format!("{BUILTIN_MARKER}{name}")));
            }
            let mut candidates = env.all_names();
            candidates.extend(BUILTINS.iter().map(|s| (*s).to_owned()));
            return Err(RunError::reference(format!(
                "Undefined variable '{name}'{}",
                suggestion_suffix(name, candidates.iter().map(String::as_str))
            ))
            .with_span(*span));
        }
        self.eval_expr(callee, env, base_dir)
    }

    /// Dispatch over an already-evaluated callee.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: Span,
        env: &Env,
    ) -> RunResult<Value> {
        match callee {
            Value::Function(func) => {
                let (value, _) = self.call_function(&func, args, span)?;
                Ok(value)
            }
            Value::Block(block) => {
                if block.member_path.is_empty() {
                    // Direct invocation: declared inputs bind positionally.
                    let names = block.meta.inputs.clone();
                    if args.len() != names.len() {
                        return Err(RunError::block(format!(
                            "block '{}' declares {} input(s), got {}",
                            block.meta.id,
                            names.len(),
                            args.len()
                        ))
                        .with_span(span));
                    }
                    let bindings: Vec<(String, Value)> =
                        names.into_iter().zip(args).collect();
                    let code = crate::dispatch::Dispatcher::prepare_source(
                        block.meta.language,
                        &block.code,
                        &bindings,
                    )?;
                    let wire = self
                        .runtime
                        .dispatcher
                        .execute_with_return(
                            &block.backend,
                            block.meta.language,
                            &code,
                            self.sink.as_mut(),
                        )
                        .map_err(|err| err.with_span(span))?;
                    Ok(wire.into_value(
                        &mut self.runtime.gc,
                        block.meta.language,
                        block.backend.executor(),
                    ))
                } else {
                    let mut wire_args = Vec::with_capacity(args.len());
                    for arg in &args {
                        wire_args.push(marshal::to_wire(arg)?);
                    }
                    let wire = self
                        .runtime
                        .dispatcher
                        .call_member(&block, &wire_args, self.sink.as_mut())
                        .map_err(|err| err.with_span(span))?;
                    Ok(wire.into_value(
                        &mut self.runtime.gc,
                        block.meta.language,
                        block.backend.executor(),
                    ))
                }
            }
            Value::Foreign(object) => {
                if object.path.is_empty() {
                    return Err(RunError::type_error(
                        "a foreign object is not callable; call one of its members",
                    )
                    .with_span(span));
                }
                // The owning handle travels as the first argument so the
                // executor can resolve the receiver.
                let mut wire_args = Vec::with_capacity(args.len() + 1);
                wire_args.push(WireValue::Foreign {
                    handle: object.handle,
                    repr: object.repr.clone(),
                });
                for arg in &args {
                    wire_args.push(marshal::to_wire(arg)?);
                }
                let result = object
                    .executor
                    .call_function(&object.path_string(), &wire_args);
                flush_output(&object.executor, self.sink.as_mut());
                let wire = result.map_err(|failure| {
                    RunError::block(format!(
                        "{} call failed: {}",
                        object.language, failure.message
                    ))
                    .with_span(span)
                })?;
                Ok(wire.into_value(&mut self.runtime.gc, object.language, &object.executor))
            }
            Value::Str(marker) => {
                if let Some(name) = marker.strip_prefix(BUILTIN_MARKER) {
                    return self.call_builtin(&name.to_owned(), args, span, env);
                }
                if let Some(rest) = marker.strip_prefix(STDLIB_CALL_MARKER) {
                    let Some((module, function)) = rest.split_once(':') else {
                        return Err(
                            RunError::runtime("malformed stdlib call marker").with_span(span)
                        );
                    };
                    let Some(module) = BuiltinModule::by_name(module) else {
                        return Err(RunError::reference(format!(
                            "unknown stdlib module '{module}'"
                        ))
                        .with_span(span));
                    };
                    let (module_owned, function_owned) = (module, function.to_owned());
                    return crate::modules::call(self, module_owned, &function_owned, args, span);
                }
                if let Some(module) = marker.strip_prefix(STDLIB_MODULE_MARKER) {
                    return Err(RunError::type_error(format!(
                        "module '{module}' is not callable; call one of its functions"
                    ))
                    .with_span(span));
                }
                Err(RunError::type_error("a string value is not callable").with_span(span))
            }
            other => Err(RunError::type_error(format!(
                "a {} value is not callable",
                other.type_name()
            ))
            .with_span(span)),
        }
    }

    fn call_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        span: Span,
        env: &Env,
    ) -> RunResult<Value> {
        match name {
            "print" => {
                let line = args
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.print_line(&line);
                Ok(Value::Null)
            }
            "len" => {
                let [value] = args.as_slice() else {
                    return Err(
                        RunError::type_error("len() takes exactly one argument").with_span(span)
                    );
                };
                let length = match value {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Dict(entries) => entries.borrow().len(),
                    other => {
                        return Err(RunError::runtime(format!(
                            "len() is not defined for a {} value",
                            other.type_name()
                        ))
                        .with_span(span));
                    }
                };
                Ok(Value::Int(length as i64))
            }
            "type" | "typeof" => {
                let [value] = args.as_slice() else {
                    return Err(RunError::type_error(format!(
                        "{name}() takes exactly one argument"
                    ))
                    .with_span(span));
                };
                Ok(Value::Str(value.type_name()))
            }
            "gc_collect" => {
                let collected = self.collect_now(env);
                Ok(Value::Int(collected as i64))
            }
            "assert" => {
                let condition = args
                    .first()
                    .ok_or_else(|| {
                        RunError::type_error("assert() needs a condition").with_span(span)
                    })?
                    .to_bool();
                if condition {
                    Ok(Value::Null)
                } else {
                    let message = args
                        .get(1)
                        .map(Value::to_display_string)
                        .unwrap_or_else(|| "assertion failed".to_owned());
                    Err(RunError::assertion(message).with_span(span))
                }
            }
            other => {
                Err(RunError::reference(format!("unknown builtin '{other}'")).with_span(span))
            }
        }
    }

    /// Invokes a user function: fresh environment descending from the
    /// captured closure, generics unification, the reference/value binding
    /// split, defaults evaluated in the callee environment, declared-type
    /// checks on arguments and the returned value, and a stack frame pushed
    /// and popped around everything (exceptional exits included).
    ///
    /// The second return component carries the final values of reference
    /// parameters (by index) for caller write-back.
    pub(crate) fn call_function(
        &mut self,
        func: &Rc<FunctionValue>,
        args: Vec<Value>,
        span: Span,
    ) -> RunResult<(Value, Vec<(usize, Value)>)> {
        self.push_frame(StackFrame {
            function: func.name.clone(),
            file: func.source_file.clone(),
            line: span.line,
            column: span.column,
        })?;
        let result = self.call_function_inner(func, args, span).map_err(|mut err| {
            if err.trace.is_empty() {
                err.trace = self.frames.clone();
            }
            err
        });
        self.pop_frame();
        result
    }

    fn call_function_inner(
        &mut self,
        func: &Rc<FunctionValue>,
        args: Vec<Value>,
        span: Span,
    ) -> RunResult<(Value, Vec<(usize, Value)>)> {
        let decl = Rc::clone(&func.decl);
        if args.len() > decl.params.len() {
            return Err(RunError::type_error(format!(
                "function '{}' takes {} argument(s), got {}",
                decl.name,
                decl.params.len(),
                args.len()
            ))
            .with_span(span));
        }

        // Unify declared parameter types against runtime argument types to
        // bind type parameters; unresolved ones default to `any`.
        let mut substitution: AHashMap<String, Type> = AHashMap::new();
        for (param, arg) in decl.params.iter().zip(&args) {
            if param.ty.has_type_parameter() {
                param.ty.unify_with(&Type::of_value(arg), &mut substitution);
            }
        }
        for type_param in &decl.type_params {
            if !substitution.contains_key(type_param) {
                log::warn!(
                    "type parameter '{type_param}' of '{}' could not be inferred, defaulting to any",
                    decl.name
                );
                substitution.insert(type_param.clone(), Type::any());
            }
        }

        let call_env = func.closure.child();
        let base_dir = function_dir(func);
        let mut args = args.into_iter();
        for param in &decl.params {
            let concrete = param.ty.substitute(&substitution);
            match args.next() {
                Some(arg) => {
                    self.check_type(
                        &concrete,
                        &arg,
                        &format!("argument '{}' of '{}'", param.name, decl.name),
                        span,
                    )?;
                    let bound = if param.ty.reference {
                        // Alias the caller's cell.
                        arg
                    } else {
                        arg.deep_copy(&mut self.runtime.gc)
                    };
                    call_env.define(&param.name, bound);
                }
                None => match &param.default {
                    // Defaults evaluate in the callee environment, after
                    // positional arguments are bound.
                    Some(default) => {
                        let value = self.eval_expr(default, &call_env, &base_dir)?;
                        self.check_type(
                            &concrete,
                            &value,
                            &format!("default for '{}' of '{}'", param.name, decl.name),
                            span,
                        )?;
                        call_env.define(&param.name, value);
                    }
                    None => {
                        return Err(RunError::type_error(format!(
                            "missing argument '{}' for '{}'",
                            param.name, decl.name
                        ))
                        .with_span(span));
                    }
                },
            }
        }

        let flow = self.exec_block(&decl.body, &call_env, &base_dir)?;
        // A `break`/`continue` reaching the function boundary is dropped so
        // the caller's control state is undisturbed.
        let value = match flow {
            Flow::Return(value) => value,
            Flow::Normal | Flow::Break | Flow::Continue => Value::Null,
        };

        match &decl.return_type {
            Some(declared) => {
                let concrete = declared.substitute(&substitution);
                if matches!(concrete.kind, TypeKind::Void) {
                    if !matches!(value, Value::Null) {
                        return Err(RunError::type_error(format!(
                            "function '{}' is declared void but returned a {}",
                            decl.name,
                            value.type_name()
                        ))
                        .with_span(span));
                    }
                } else {
                    self.check_type(
                        &concrete,
                        &value,
                        &format!("return value of '{}'", decl.name),
                        span,
                    )?;
                }
            }
            None => {
                // Structural inference only describes the type; it never
                // executes user code, so there is nothing to enforce here.
                self.inferred_return_type(func);
            }
        }

        let mut ref_finals = Vec::new();
        for (index, param) in decl.params.iter().enumerate() {
            if param.ty.reference {
                if let Some(final_value) = call_env.lookup(&param.name) {
                    ref_finals.push((index, final_value));
                }
            }
        }
        Ok((value, ref_finals))
    }

    /// The structurally inferred return type of a function without an
    /// explicit annotation: `void` when the body never returns a value, the
    /// single agreed type, or the union of the distinct return types.
    pub(crate) fn inferred_return_type(&self, func: &FunctionValue) -> Type {
        if let Some(cached) = func.inferred_return.borrow().as_ref() {
            return cached.clone();
        }
        let inferred = infer_return_type(&func.decl);
        *func.inferred_return.borrow_mut() = Some(inferred.clone());
        inferred
    }
}

fn function_dir(func: &FunctionValue) -> PathBuf {
    Path::new(&func.source_file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Walks the body for `return` statements and infers each returned
/// expression's type from literals, annotations, and operator shapes.
/// Nested function declarations are not entered.
pub(crate) fn infer_return_type(decl: &FunctionDecl) -> Type {
    let mut ctx: AHashMap<String, Type> = decl
        .params
        .iter()
        .map(|p| (p.name.clone(), p.ty.clone()))
        .collect();
    let mut returns = Vec::new();
    collect_returns(&decl.body, &mut ctx, &mut returns);
    if returns.is_empty() {
        Type::void()
    } else {
        Type::union_of(returns)
    }
}

fn collect_returns(stmts: &[Stmt], ctx: &mut AHashMap<String, Type>, out: &mut Vec<Type>) {
    for stmt in stmts {
        match stmt {
            Stmt::Return(value, _) => out.push(match value {
                Some(expr) => static_type_of(expr, ctx),
                None => Type::void(),
            }),
            Stmt::VarDecl {
                name, ty, init, ..
            } => {
                let inferred = match (ty, init) {
                    (Some(ty), _) => Some(ty.clone()),
                    (None, Some(init)) => Some(static_type_of(init, ctx)),
                    (None, None) => None,
                };
                if let Some(inferred) = inferred {
                    ctx.insert(name.clone(), inferred);
                }
            }
            Stmt::Compound(body, _) => collect_returns(body, ctx, out),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_returns(then_body, ctx, out);
                if let Some(else_body) = else_body {
                    collect_returns(else_body, ctx, out);
                }
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => {
                collect_returns(body, ctx, out);
            }
            Stmt::Try {
                body,
                catch_body,
                finally_body,
                ..
            } => {
                collect_returns(body, ctx, out);
                collect_returns(catch_body, ctx, out);
                if let Some(finally_body) = finally_body {
                    collect_returns(finally_body, ctx, out);
                }
            }
            // Nested functions have their own return types.
            Stmt::Function(_) => {}
            _ => {}
        }
    }
}

fn static_type_of(expr: &Expr, ctx: &AHashMap<String, Type>) -> Type {
    use crate::ast::BinOp;
    match expr {
        Expr::Literal(literal, _) => match literal {
            Literal::Int(_) => Type::int(),
            Literal::Float(_) => Type::float(),
            Literal::Str(_) => Type::string(),
            Literal::Bool(_) => Type::bool_(),
            Literal::Null => Type::any().with_nullable(true),
        },
        Expr::Identifier(name, _) => ctx.get(name).cloned().unwrap_or_else(Type::any),
        Expr::Unary { op, expr, .. } => match op {
            crate::ast::UnOp::Neg => static_type_of(expr, ctx),
            crate::ast::UnOp::Not => Type::bool_(),
        },
        Expr::Binary {
            op, left, right, ..
        } => match op {
            BinOp::Eq
            | BinOp::Ne
            | BinOp::Lt
            | BinOp::Le
            | BinOp::Gt
            | BinOp::Ge
            | BinOp::And
            | BinOp::Or => Type::bool_(),
            BinOp::Div => Type::float(),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Mod => {
                let lhs = static_type_of(left, ctx);
                let rhs = static_type_of(right, ctx);
                if lhs.kind == TypeKind::Str || rhs.kind == TypeKind::Str {
                    Type::string()
                } else if lhs.kind == TypeKind::Float || rhs.kind == TypeKind::Float {
                    Type::float()
                } else if lhs.kind == TypeKind::Int && rhs.kind == TypeKind::Int {
                    Type::int()
                } else {
                    Type::any()
                }
            }
            _ => Type::any(),
        },
        Expr::List(items, _) => {
            let mut element: Option<Type> = None;
            for item in items {
                let t = static_type_of(item, ctx);
                match &element {
                    None => element = Some(t),
                    Some(current) if *current == t => {}
                    Some(_) => return Type::list_of(Type::any()),
                }
            }
            Type::list_of(element.unwrap_or_else(Type::any))
        }
        Expr::Dict(..) => Type::dict_of(Type::string(), Type::any()),
        Expr::StructLiteral { name, .. } => Type::named_struct(name.clone()),
        _ => Type::any(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn first_function(source: &str) -> Rc<FunctionDecl> {
        let program = parse_program(source, "infer.naab").unwrap();
        Rc::clone(&program.functions[0])
    }

    #[test]
    fn no_returns_means_void() {
        let decl = first_function("fn f() { print(1) }");
        assert_eq!(infer_return_type(&decl), Type::void());
    }

    #[test]
    fn agreeing_returns_collapse() {
        let decl = first_function(
            "fn f(a: int) { if a > 0 { return 1 } return 2 }",
        );
        assert_eq!(infer_return_type(&decl), Type::int());
    }

    #[test]
    fn distinct_returns_union() {
        let decl = first_function(
            "fn f(a: int) { if a > 0 { return 1 } return \"neg\" }",
        );
        let inferred = infer_return_type(&decl);
        assert!(matches!(inferred.kind, TypeKind::Union(ref m) if m.len() == 2));
    }

    #[test]
    fn inference_uses_annotations_not_evaluation() {
        // The body calls a function that does not exist; structural
        // inference must not care.
        let decl = first_function(
            "fn f(n: int) { let x: float = mystery(n)\n return x }",
        );
        assert_eq!(infer_return_type(&decl), Type::float());
    }
}
