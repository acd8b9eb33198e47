//! Statement visitors.

use std::{cell::RefCell, path::Path, rc::Rc};

use crate::{
    ast::{BinOp, Expr, Stmt},
    batch::{self, BlockSite},
    dispatch::{flush_output, Dispatcher, ParallelJob},
    env::Env,
    errors::{RunError, RunResult},
    structs::StructDef,
    types::Type,
    value::{FunctionValue, Value},
};

use super::{Flow, Interp};

impl Interp {
    /// Runs a statement list in `env`, short-circuiting on any non-normal
    /// flow. Allocation checkpoints sit between statements, where every
    /// live value is rooted in an environment.
    pub(crate) fn exec_block(
        &mut self,
        stmts: &[Stmt],
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Flow> {
        for stmt in stmts {
            self.maybe_collect(env);
            match self.exec_stmt(stmt, env, base_dir)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    pub(crate) fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Flow> {
        match stmt {
            Stmt::Compound(body, _) => {
                let scope = env.child();
                self.exec_block(body, &scope, base_dir)
            }
            Stmt::Expr(expr) => {
                // A block in statement position runs in side-effect mode;
                // anything else is an ordinary discarded expression.
                if let Expr::InlineCode {
                    language,
                    code,
                    bound,
                    span,
                } = expr
                {
                    self.run_inline_block(language, code, bound, *span, env, false)?;
                } else {
                    self.eval_expr(expr, env, base_dir)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::VarDecl {
                name,
                ty,
                init,
                exported,
                span,
            } => {
                let value = match (ty, init) {
                    (None, None) => {
                        return Err(RunError::type_error(format!(
                            "let '{name}' needs a type annotation or an initializer"
                        ))
                        .with_span(*span));
                    }
                    (None, Some(init)) => {
                        let value = self.eval_expr(init, env, base_dir)?;
                        if matches!(value, Value::Null) {
                            // The declared type would be ambiguous.
                            return Err(RunError::type_error(format!(
                                "cannot infer a type for '{name}' from null; add a type annotation"
                            ))
                            .with_span(*span));
                        }
                        value
                    }
                    (Some(ty), None) => {
                        if !ty.nullable {
                            return Err(RunError::type_error(format!(
                                "'{name}' has non-nullable type {ty} and must be initialized"
                            ))
                            .with_span(*span));
                        }
                        Value::Null
                    }
                    (Some(ty), Some(init)) => {
                        let value = self.eval_expr(init, env, base_dir)?;
                        self.check_type(ty, &value, &format!("'{name}'"), *span)?;
                        value
                    }
                };
                env.define(name, value);
                if *exported {
                    env.with_exports(|exports| exports.variables.push(name.clone()));
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let take_then = self.eval_expr(cond, env, base_dir)?.to_bool();
                let scope = env.child();
                if take_then {
                    self.exec_block(then_body, &scope, base_dir)
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body, &scope, base_dir)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body, .. } => {
                while self.eval_expr(cond, env, base_dir)?.to_bool() {
                    let scope = env.child();
                    match self.exec_block(body, &scope, base_dir)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                var,
                iter,
                body,
                span,
            } => {
                let iterable = self.eval_expr(iter, env, base_dir)?;
                match iterable {
                    Value::Range(range) => {
                        for i in range.iter() {
                            match self.run_loop_body(var, Value::Int(i), body, env, base_dir)? {
                                Flow::Break => break,
                                flow @ Flow::Return(_) => return Ok(flow),
                                _ => {}
                            }
                        }
                        Ok(Flow::Normal)
                    }
                    Value::List(items) => {
                        // Snapshot so body mutations of the list cannot
                        // invalidate the iteration borrow.
                        let snapshot: Vec<Value> = items.borrow().clone();
                        for item in snapshot {
                            match self.run_loop_body(var, item, body, env, base_dir)? {
                                Flow::Break => break,
                                flow @ Flow::Return(_) => return Ok(flow),
                                _ => {}
                            }
                        }
                        Ok(Flow::Normal)
                    }
                    other => Err(RunError::type_error(format!(
                        "cannot iterate over a {} value",
                        other.type_name()
                    ))
                    .with_span(*span)),
                }
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Return(value, _) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env, base_dir)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr, span) => {
                let payload = self.eval_expr(expr, env, base_dir)?;
                let mut err = RunError::thrown(payload).with_span(*span);
                err.trace = self.frames.clone();
                Err(err)
            }
            Stmt::Try {
                body,
                catch_name,
                catch_body,
                finally_body,
                ..
            } => {
                let scope = env.child();
                let body_result = self.exec_block(body, &scope, base_dir);
                let mut outcome = match body_result {
                    Err(err) => {
                        let catch_env = env.child();
                        catch_env.define(catch_name, err.catch_value());
                        self.exec_block(catch_body, &catch_env, base_dir)
                    }
                    ok => ok,
                };
                if let Some(finally_body) = finally_body {
                    let finally_env = env.child();
                    // `finally` runs on both paths; anything abnormal it
                    // produces supersedes the pending outcome.
                    match self.exec_block(finally_body, &finally_env, base_dir) {
                        Ok(Flow::Normal) => {}
                        superseding => outcome = superseding,
                    }
                }
                outcome
            }
            Stmt::UseModule { path, alias, span } => {
                self.bind_use_module(path, alias.as_deref(), env, base_dir)
                    .map_err(|err| err.with_span(*span))?;
                Ok(Flow::Normal)
            }
            Stmt::UseBlock { id, alias, span } => {
                self.bind_use_block(id, alias.as_deref(), env)
                    .map_err(|err| err.with_span(*span))?;
                Ok(Flow::Normal)
            }
            Stmt::Import { path, items, span } => {
                self.bind_import(path, items, env, base_dir)
                    .map_err(|err| err.with_span(*span))?;
                Ok(Flow::Normal)
            }
            Stmt::ExportDefault(expr, _) => {
                let value = self.eval_expr(expr, env, base_dir)?;
                env.with_exports(|exports| exports.default = Some(value));
                Ok(Flow::Normal)
            }
            Stmt::Function(decl) => {
                let function = Value::Function(Rc::new(FunctionValue {
                    name: decl.name.clone(),
                    decl: Rc::clone(decl),
                    closure: env.clone(),
                    source_file: self.current_file.clone(),
                    source_line: decl.span.line,
                    inferred_return: RefCell::new(None),
                }));
                env.define(&decl.name, function);
                Ok(Flow::Normal)
            }
            Stmt::Struct(decl) => {
                self.runtime.structs.register(StructDef::new(
                    decl.name.clone(),
                    decl.fields.clone(),
                    decl.type_params.clone(),
                ))?;
                Ok(Flow::Normal)
            }
            Stmt::Enum(decl) => {
                env.register_enum(Rc::new(decl.clone()));
                Ok(Flow::Normal)
            }
        }
    }

    fn run_loop_body(
        &mut self,
        var: &str,
        value: Value,
        body: &[Stmt],
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<Flow> {
        let scope = env.child();
        scope.define(var, value);
        self.exec_block(body, &scope, base_dir)
    }

    /// Runs the `main` block. With parallel blocks enabled, maximal runs of
    /// consecutive top-level polyglot statements are planned into dependency
    /// groups and each group executes concurrently; everything else runs in
    /// source order.
    pub(crate) fn execute_main(
        &mut self,
        stmts: &[Stmt],
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<()> {
        if !self.options.parallel_blocks {
            self.exec_block(stmts, env, base_dir)?;
            return Ok(());
        }

        let sites = batch::extract_sites(stmts);
        let mut site_at: ahash::AHashMap<usize, usize> = ahash::AHashMap::new();
        for (pos, site) in sites.iter().enumerate() {
            site_at.insert(site.stmt_index, pos);
        }

        let mut index = 0;
        while index < stmts.len() {
            if !site_at.contains_key(&index) {
                self.maybe_collect(env);
                match self.exec_stmt(&stmts[index], env, base_dir)? {
                    Flow::Normal => {}
                    _ => return Ok(()),
                }
                index += 1;
                continue;
            }

            // Maximal run of consecutive polyglot statements.
            let run_start = index;
            while index < stmts.len() && site_at.contains_key(&index) {
                index += 1;
            }
            let run_sites: Vec<BlockSite> = (run_start..index)
                .map(|i| sites[site_at[&i]].clone())
                .collect();
            for group in batch::plan_groups(&run_sites) {
                if group.len() == 1 {
                    let stmt = &stmts[run_sites[group[0]].stmt_index];
                    self.maybe_collect(env);
                    self.exec_stmt(stmt, env, base_dir)?;
                } else {
                    self.run_block_group(&run_sites, &group, stmts, env)?;
                }
            }
        }
        Ok(())
    }

    /// Executes one pairwise-independent group of blocks concurrently.
    /// Sources are fully prepared (dedent + injection) before any thread
    /// spawns; results flush and bind in source order.
    fn run_block_group(
        &mut self,
        sites: &[BlockSite],
        group: &[usize],
        stmts: &[Stmt],
        env: &Env,
    ) -> RunResult<()> {
        let mut jobs = Vec::with_capacity(group.len());
        let mut backends = Vec::with_capacity(group.len());
        for &member in group {
            let site = &sites[member];
            let mut bindings = Vec::with_capacity(site.reads.len());
            for name in &site.reads {
                bindings.push((name.clone(), env.get(name)?));
            }
            let code = Dispatcher::prepare_source(site.language, &site.code, &bindings)?;
            let backend = self.runtime.dispatcher.backend_for(site.language)?;
            jobs.push(ParallelJob {
                executor: std::sync::Arc::clone(backend.executor()),
                language: site.language,
                code,
            });
            backends.push(backend);
        }

        let results = Dispatcher::run_parallel(jobs);

        for ((&member, backend), result) in group.iter().zip(&backends).zip(results) {
            let site = &sites[member];
            flush_output(backend.executor(), self.sink.as_mut());
            let wire = result.map_err(|failure| {
                RunError::block(format!(
                    "{} block failed: {}",
                    site.language, failure.message
                ))
            })?;
            let value =
                wire.into_value(&mut self.runtime.gc, site.language, backend.executor());
            if let Some(name) = &site.write {
                match &stmts[site.stmt_index] {
                    Stmt::VarDecl { .. } => env.define(name, value),
                    Stmt::Expr(Expr::Binary {
                        op: BinOp::Assign, ..
                    }) => env.set(name, value)?,
                    _ => env.define(name, value),
                }
            }
        }
        Ok(())
    }

    /// The shared expected-vs-got check used at every mandated check site.
    pub(crate) fn check_type(
        &self,
        expected: &Type,
        value: &Value,
        what: &str,
        span: crate::token::Span,
    ) -> RunResult<()> {
        if expected.matches_value(value, &self.runtime.structs) {
            Ok(())
        } else {
            Err(RunError::type_error(format!(
                "type mismatch for {what}: expected {expected}, got {}",
                value.type_name()
            ))
            .with_span(span))
        }
    }
}
