//! The tree-walking evaluator.
//!
//! [`Interp`] drives one program at a time. All process-wide mutable state —
//! the struct registry, the module registry, the executor table behind the
//! dispatcher, and the GC arena — hangs off the single [`Runtime`] context
//! object owned by the interpreter; nothing lives in globals.
//!
//! Non-local control flow is a value, not an exception: every statement
//! visitor returns a [`Flow`] and composition points short-circuit on
//! anything but `Flow::Normal`, so `returning`/`breaking`/`continuing`
//! state cannot leak across scope boundaries.

mod call;
mod expr;
mod stmt;

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    ast::{ImportItems, Program},
    dispatch::Dispatcher,
    env::Env,
    errors::{RunError, RunResult, StackFrame},
    executor::{ExecutorRegistry, Language},
    gc::{GcState, DEFAULT_GC_THRESHOLD},
    io_sink::{PrintSink, StdoutSink},
    loader::{ExecState, ModuleRegistry},
    modules::BuiltinModule,
    structs::{StructDef, StructRegistry},
    suggest::suggestion_suffix,
    value::{BlockMetadata, BlockValue, FunctionValue, Value},
};

/// A block fetched from the external block registry.
pub struct RegistryBlock {
    pub id: String,
    pub language: Language,
    pub code: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub source_hint: Option<String>,
}

/// Lookup interface onto the block-registry database, which is an external
/// collaborator. The default provider knows no blocks.
pub trait BlockProvider {
    fn lookup(&self, id: &str) -> Option<RegistryBlock>;
}

/// Provider used when no registry is wired up.
pub struct NoBlocks;

impl BlockProvider for NoBlocks {
    fn lookup(&self, _id: &str) -> Option<RegistryBlock> {
        None
    }
}

/// Everything process-wide the evaluator consults, passed explicitly
/// instead of living in singletons.
pub struct Runtime {
    pub structs: StructRegistry,
    pub modules: ModuleRegistry,
    pub dispatcher: Dispatcher,
    pub block_provider: Box<dyn BlockProvider>,
    pub gc: GcState,
}

/// Marker prefixes for stdlib-module plumbing. A `use io` binds the module
/// marker; member access on it produces a call marker the call visitor
/// dispatches on.
pub(crate) const STDLIB_MODULE_MARKER: &str = "__stdlib_module__:";
pub(crate) const STDLIB_CALL_MARKER: &str = "__stdlib_call__:";
/// Marker binding for a `use`-loaded user module, carrying its canonical
/// path.
pub(crate) const USER_MODULE_MARKER: &str = "__module__:";

#[derive(Debug, Clone)]
pub struct InterpOptions {
    pub gc_threshold: usize,
    /// Script positional arguments exposed through `env.get_args()`.
    pub script_args: Vec<String>,
    /// Execute independent top-level polyglot blocks concurrently.
    pub parallel_blocks: bool,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            script_args: Vec::new(),
            parallel_blocks: false,
        }
    }
}

/// Transient control-flow outcome of a statement.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

const MAX_CALL_DEPTH: usize = 1000;

pub struct Interp {
    pub runtime: Runtime,
    pub(crate) globals: Env,
    pub(crate) frames: Vec<StackFrame>,
    pub(crate) sink: Box<dyn PrintSink>,
    pub(crate) options: InterpOptions,
    pub(crate) call_depth: usize,
    pub(crate) current_file: String,
}

impl Interp {
    pub fn new(options: InterpOptions) -> Self {
        Self::with_sink(options, Box::new(StdoutSink))
    }

    pub fn with_sink(options: InterpOptions, sink: Box<dyn PrintSink>) -> Self {
        let gc = GcState::new(options.gc_threshold);
        Self {
            runtime: Runtime {
                structs: StructRegistry::new(),
                modules: ModuleRegistry::new(),
                dispatcher: Dispatcher::new(ExecutorRegistry::new()),
                block_provider: Box::new(NoBlocks),
                gc,
            },
            globals: Env::new(),
            frames: Vec::new(),
            sink,
            options,
            call_depth: 0,
            current_file: String::new(),
        }
    }

    /// An interpreter wired with the built-in subprocess executors.
    pub fn with_default_executors(options: InterpOptions) -> Self {
        let mut interp = Self::new(options);
        interp.runtime.dispatcher = Dispatcher::new(ExecutorRegistry::with_defaults());
        interp
    }

    pub fn set_block_provider(&mut self, provider: Box<dyn BlockProvider>) {
        self.runtime.block_provider = provider;
    }

    /// Parses and runs a source buffer as the main module.
    pub fn run_source(&mut self, source: &str, file: &str) -> RunResult<()> {
        let program = crate::parser::parse_program(source, file)?;
        self.run_program(Rc::new(program), Path::new("."))
    }

    /// Runs a script file as the main module.
    pub fn run_file(&mut self, path: &Path) -> RunResult<()> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| RunError::runtime(format!("cannot read {}: {err}", path.display())))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let program =
            crate::parser::parse_program(&source, &path.display().to_string())?;
        self.run_program(Rc::new(program), dir)
    }

    /// Parses and applies declarations without running `main` — the `check`
    /// command's core.
    pub fn check_source(&mut self, source: &str, file: &str) -> RunResult<()> {
        let program = crate::parser::parse_program(source, file)?;
        let env = self.globals.child();
        env.enable_exports();
        self.current_file = file.to_owned();
        self.execute_declarations(&Rc::new(program), &env, Path::new("."))
    }

    /// Executes a parsed program: declarations first, then the `main` block
    /// if present.
    pub fn run_program(&mut self, program: Rc<Program>, base_dir: &Path) -> RunResult<()> {
        self.current_file = program.file.clone();
        let module_env = self.globals.child();
        module_env.enable_exports();
        let result = self.run_program_inner(&program, &module_env, base_dir);
        result.map_err(|mut err| {
            if err.trace.is_empty() {
                err.trace = self.frames.clone();
            }
            if err.file.is_none() {
                err.file = Some(program.file.clone());
            }
            err
        })
    }

    fn run_program_inner(
        &mut self,
        program: &Rc<Program>,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<()> {
        self.execute_declarations(program, env, base_dir)?;
        if let Some(main) = &program.main {
            let main_env = env.child();
            self.execute_main(main, &main_env, base_dir)?;
        }
        Ok(())
    }

    /// Applies a program's declarations to `env` in the mandated order:
    /// `use`-statements first so later declarations can reference imported
    /// modules, then blocks, imports, enums, structs, functions, and
    /// finally module-level statements in source order.
    pub(crate) fn execute_declarations(
        &mut self,
        program: &Rc<Program>,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<()> {
        for stmt in &program.module_uses {
            self.exec_stmt(stmt, env, base_dir)?;
        }
        for stmt in &program.block_uses {
            self.exec_stmt(stmt, env, base_dir)?;
        }
        for stmt in &program.imports {
            self.exec_stmt(stmt, env, base_dir)?;
        }
        for decl in &program.enums {
            let decl = Rc::new(decl.clone());
            env.register_enum(Rc::clone(&decl));
            if decl.exported {
                env.with_exports(|exports| exports.enums.push(decl.name.clone()));
            }
        }
        for decl in &program.structs {
            self.runtime.structs.register(StructDef::new(
                decl.name.clone(),
                decl.fields.clone(),
                decl.type_params.clone(),
            ))?;
            if decl.exported {
                env.with_exports(|exports| exports.structs.push(decl.name.clone()));
            }
        }
        for decl in &program.functions {
            let function = Value::Function(Rc::new(FunctionValue {
                name: decl.name.clone(),
                decl: Rc::clone(decl),
                closure: env.clone(),
                source_file: program.file.clone(),
                source_line: decl.span.line,
                inferred_return: RefCell::new(None),
            }));
            env.define(&decl.name, function);
            if decl.exported {
                env.with_exports(|exports| exports.functions.push(decl.name.clone()));
            }
        }
        for stmt in &program.top_level {
            match self.exec_stmt(stmt, env, base_dir)? {
                Flow::Normal => {}
                other => {
                    return Err(RunError::runtime(format!(
                        "{} is not allowed at module level",
                        flow_name(&other)
                    ))
                    .with_span(stmt.span()));
                }
            }
        }
        Ok(())
    }

    // --- Modules ---------------------------------------------------------

    /// Binds `use path.to.module` — a stdlib marker for built-in modules, a
    /// loaded-and-executed module for files.
    pub(crate) fn bind_use_module(
        &mut self,
        path: &str,
        alias: Option<&str>,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<()> {
        let bind_name = alias
            .map(str::to_owned)
            .unwrap_or_else(|| path.rsplit('.').next().unwrap_or(path).to_owned());
        if BuiltinModule::by_name(path).is_some() {
            env.define(
                &bind_name,
                Value::Str(format!("{STDLIB_MODULE_MARKER}{path}")),
            );
            return Ok(());
        }
        let canonical = self.runtime.modules.resolve_use(path, base_dir)?;
        self.load_and_execute_module(&canonical)?;
        env.define(
            &bind_name,
            Value::Str(format!("{USER_MODULE_MARKER}{}", canonical.display())),
        );
        Ok(())
    }

    /// Loads, topologically orders, and executes a module graph. Each module
    /// transitions `Parsed → Executing → Executed` exactly once; the
    /// topological walk reports cycles before execution starts.
    pub(crate) fn load_and_execute_module(&mut self, path: &Path) -> RunResult<()> {
        self.runtime.modules.load_parsed(path)?;
        let order = self.runtime.modules.topological_order(path)?;
        for module_path in order {
            let module = self
                .runtime
                .modules
                .get(&module_path)
                .expect("ordered module is registered");
            let (state, ast) = {
                let m = module.borrow();
                (m.state, Rc::clone(&m.ast))
            };
            match state {
                ExecState::Executed => continue,
                ExecState::Executing => {
                    return Err(RunError::import(format!(
                        "import cycle detected while executing {}",
                        module_path.display()
                    )));
                }
                ExecState::NotParsed | ExecState::Parsed => {}
            }
            let module_env = self.globals.child();
            module_env.enable_exports();
            {
                let mut m = module.borrow_mut();
                m.state = ExecState::Executing;
                m.env = module_env.clone();
            }
            let dir = module_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_owned();
            let saved_file = std::mem::replace(
                &mut self.current_file,
                module_path.display().to_string(),
            );
            // Declarations only; an imported module's `main` never runs.
            let result = self.execute_declarations(&ast, &module_env, &dir);
            self.current_file = saved_file;
            result?;
            module.borrow_mut().state = ExecState::Executed;
        }
        Ok(())
    }

    /// `import { a, b as c } from "path"` / `import * as ns from "path"`:
    /// copies symbols out of an executed module's environment.
    pub(crate) fn bind_import(
        &mut self,
        path: &str,
        items: &ImportItems,
        env: &Env,
        base_dir: &Path,
    ) -> RunResult<()> {
        let canonical = self.runtime.modules.resolve_import(path, base_dir)?;
        self.load_and_execute_module(&canonical)?;
        let module = self
            .runtime
            .modules
            .get(&canonical)
            .expect("imported module is registered");
        match items {
            ImportItems::Wildcard(alias) => {
                env.define(
                    alias,
                    Value::Str(format!("{USER_MODULE_MARKER}{}", canonical.display())),
                );
            }
            ImportItems::Named(names) => {
                let module_env = module.borrow().env.clone();
                let exports = module_env.exports().unwrap_or_default();
                let has_explicit_exports = !exports.functions.is_empty()
                    || !exports.variables.is_empty()
                    || !exports.structs.is_empty()
                    || !exports.enums.is_empty();
                for (name, alias) in names {
                    if has_explicit_exports
                        && !exports.functions.iter().any(|n| n == name)
                        && !exports.variables.iter().any(|n| n == name)
                    {
                        return Err(RunError::import(format!(
                            "module \"{path}\" does not export '{name}'"
                        )));
                    }
                    let Some(value) = module_env.lookup(name) else {
                        let names = module_env.all_names();
                        return Err(RunError::import(format!(
                            "module \"{path}\" has no symbol '{name}'{}",
                            suggestion_suffix(name, names.iter().map(String::as_str))
                        )));
                    };
                    env.define(alias.as_deref().unwrap_or(name), value);
                }
            }
        }
        Ok(())
    }

    /// Resolves a user-module marker back to its environment.
    pub(crate) fn module_env_for_marker(&self, marker: &str) -> Option<Env> {
        let path = marker.strip_prefix(USER_MODULE_MARKER)?;
        self.runtime
            .modules
            .get(&PathBuf::from(path))
            .map(|module| module.borrow().env.clone())
    }

    /// Binds `use "block-id" as alias` through the block provider.
    pub(crate) fn bind_use_block(
        &mut self,
        id: &str,
        alias: Option<&str>,
        env: &Env,
    ) -> RunResult<()> {
        let Some(block) = self.runtime.block_provider.lookup(id) else {
            return Err(RunError::block(format!(
                "block '{id}' is not present in the registry"
            )));
        };
        let backend = self.runtime.dispatcher.backend_for(block.language)?;
        let value = Value::Block(Rc::new(BlockValue {
            meta: BlockMetadata {
                id: block.id.clone(),
                language: block.language,
                inputs: block.inputs,
                outputs: block.outputs,
                source_hint: block.source_hint,
            },
            code: block.code,
            backend,
            member_path: Vec::new(),
        }));
        env.define(alias.unwrap_or(&block.id), value);
        Ok(())
    }

    // --- GC glue ---------------------------------------------------------

    /// Collection checkpoint between statements; roots are the current
    /// environment chain, the globals, and every module environment.
    pub(crate) fn maybe_collect(&mut self, env: &Env) {
        if self.runtime.gc.should_collect() {
            self.collect_now(env);
        }
    }

    pub(crate) fn collect_now(&mut self, env: &Env) -> usize {
        let module_envs: Vec<Env> = self.runtime.modules.all_envs();
        let mut roots: Vec<&Env> = vec![env, &self.globals];
        roots.extend(module_envs.iter());
        self.runtime.gc.collect(&roots)
    }

    /// Pushes a stack frame, returning an error when the call depth guard
    /// trips.
    pub(crate) fn push_frame(&mut self, frame: StackFrame) -> RunResult<()> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(RunError::runtime("maximum call depth exceeded"));
        }
        self.call_depth += 1;
        self.frames.push(frame);
        Ok(())
    }

    pub(crate) fn pop_frame(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
        self.frames.pop();
    }

    pub(crate) fn print_line(&mut self, text: &str) {
        self.sink.write_str(text);
        self.sink.write_str("\n");
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        self.sink.write_str(text);
    }

    pub fn script_args(&self) -> &[String] {
        &self.options.script_args
    }

    /// Invokes an already-evaluated callable — the entry point stdlib
    /// modules use for higher-order operations.
    pub(crate) fn call_callable(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: crate::token::Span,
    ) -> RunResult<Value> {
        let env = self.globals.clone();
        self.call_value(callee, args, span, &env)
    }
}

fn flow_name(flow: &Flow) -> &'static str {
    match flow {
        Flow::Normal => "normal flow",
        Flow::Return(_) => "`return`",
        Flow::Break => "`break`",
        Flow::Continue => "`continue`",
    }
}
