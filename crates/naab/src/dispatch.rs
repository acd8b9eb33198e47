//! The polyglot dispatcher.
//!
//! Owns the executor registry and everything that happens between "the
//! evaluator met a block" and "a host value came back": indentation
//! normalization, bound-variable injection, executor selection, the two
//! execution modes, the member-call protocol, and parallel group execution.
//! Captured foreign stdout is flushed to the host sink after every
//! returning execution, preserving interleaving at block granularity.

use std::sync::Arc;

use crate::{
    errors::{RunError, RunResult},
    executor::{ExecFailure, Executor, ExecutorRegistry, Language},
    io_sink::PrintSink,
    marshal::{binding_decl, dedent, WireValue},
    value::{BlockBackend, BlockValue, Value},
};

pub struct Dispatcher {
    pub executors: ExecutorRegistry,
}

impl Dispatcher {
    pub fn new(executors: ExecutorRegistry) -> Self {
        Self { executors }
    }

    /// Picks the backend for a language: the shared process-wide executor
    /// for stateful runtimes, a fresh owned instance for compiled-per-block
    /// targets.
    pub fn backend_for(&self, language: Language) -> RunResult<BlockBackend> {
        if language.uses_shared_executor() {
            self.executors
                .shared(language)
                .map(BlockBackend::Shared)
                .ok_or_else(|| no_executor(language))
        } else {
            self.executors
                .new_owned(language)
                .map(BlockBackend::Owned)
                .ok_or_else(|| no_executor(language))
        }
    }

    /// Normalizes indentation and prepends one binding declaration per bound
    /// variable, in the target language's syntax.
    pub fn prepare_source(
        language: Language,
        code: &str,
        bindings: &[(String, Value)],
    ) -> RunResult<String> {
        let body = dedent(code);
        if bindings.is_empty() {
            return Ok(body);
        }
        let mut out = String::new();
        for (name, value) in bindings {
            out.push_str(&binding_decl(language, name, value)?);
            out.push('\n');
        }
        out.push_str(&body);
        Ok(out)
    }

    /// Runs a block for its side effects, then flushes captured output.
    pub fn execute(
        &self,
        backend: &BlockBackend,
        language: Language,
        code: &str,
        sink: &mut dyn PrintSink,
    ) -> RunResult<()> {
        let executor = backend.executor();
        let result = executor.execute(code);
        flush_output(executor, sink);
        result.map_err(|failure| block_error(language, failure))
    }

    /// Runs a block and delivers the value of its trailing expression, then
    /// flushes captured output.
    pub fn execute_with_return(
        &self,
        backend: &BlockBackend,
        language: Language,
        code: &str,
        sink: &mut dyn PrintSink,
    ) -> RunResult<WireValue> {
        let executor = backend.executor();
        let result = executor.execute_with_return(code);
        flush_output(executor, sink);
        result.map_err(|failure| block_error(language, failure))
    }

    /// The member-call protocol: `block.path.to.member(args)` becomes
    /// `executor.call_function("path.to.member", args)`.
    pub fn call_member(
        &self,
        block: &BlockValue,
        args: &[WireValue],
        sink: &mut dyn PrintSink,
    ) -> RunResult<WireValue> {
        let executor = block.backend.executor();
        let path = block.member_path_string();
        let result = executor.call_function(&path, args);
        flush_output(executor, sink);
        result.map_err(|failure| block_error(block.meta.language, failure))
    }

    /// Executes one parallel group. Every job's source is fully prepared on
    /// the interpreter thread; only `Send` wire data crosses into the
    /// workers. Results come back in job order.
    pub fn run_parallel(
        jobs: Vec<ParallelJob>,
    ) -> Vec<Result<WireValue, ExecFailure>> {
        if jobs.len() == 1 {
            let job = jobs.into_iter().next().expect("one job");
            return vec![job.executor.execute_with_return(&job.code)];
        }
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| {
                    let executor = Arc::clone(&job.executor);
                    let code = job.code.clone();
                    scope.spawn(move || executor.execute_with_return(&code))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ExecFailure::new("executor thread panicked"))
                    })
                })
                .collect()
        })
    }
}

/// One unit of work for a parallel group.
pub struct ParallelJob {
    pub executor: Arc<dyn Executor>,
    pub language: Language,
    pub code: String,
}

/// Drains the executor's captured stdout into the host sink.
pub fn flush_output(executor: &Arc<dyn Executor>, sink: &mut dyn PrintSink) {
    let captured = executor.take_captured_output();
    if !captured.is_empty() {
        sink.write_str(&captured);
    }
}

fn block_error(language: Language, failure: ExecFailure) -> Box<RunError> {
    RunError::block(format!("{language} block failed: {}", failure.message))
}

fn no_executor(language: Language) -> Box<RunError> {
    RunError::block(format!("no executor registered for language '{language}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptedExecutor;
    use crate::io_sink::CollectSink;
    use crate::gc::GcState;

    #[test]
    fn prepare_injects_bindings_before_dedented_body() {
        let prepared = Dispatcher::prepare_source(
            Language::Python,
            " x * 2\n    print(x)",
            &[("x".to_owned(), Value::Int(21))],
        )
        .unwrap();
        assert_eq!(prepared, "x = 21\n x * 2\nprint(x)");
    }

    #[test]
    fn execute_with_return_flushes_captured_output() {
        let executor = Arc::new(ScriptedExecutor::new(
            Language::Python,
            vec![WireValue::Int(42)],
        ));
        executor.push_output("side effect\n");
        let dispatcher = Dispatcher::new(ExecutorRegistry::new());
        let backend = BlockBackend::Shared(executor);
        let mut sink = CollectSink::new();
        let result = dispatcher
            .execute_with_return(&backend, Language::Python, "x * 2", &mut sink)
            .unwrap();
        assert_eq!(result, WireValue::Int(42));
        assert_eq!(sink.buffer().borrow().as_str(), "side effect\n");
    }

    #[test]
    fn member_call_uses_the_accumulated_path() {
        let executor: Arc<ScriptedExecutor> = Arc::new(ScriptedExecutor::new(
            Language::Python,
            vec![WireValue::Str("ok".to_owned())],
        ));
        let block = BlockValue {
            meta: crate::value::BlockMetadata {
                id: "b1".to_owned(),
                language: Language::Python,
                inputs: vec![],
                outputs: vec![],
                source_hint: None,
            },
            code: String::new(),
            backend: BlockBackend::Shared(Arc::clone(&executor) as Arc<dyn Executor>),
            member_path: vec!["api".to_owned(), "fetch".to_owned()],
        };
        let dispatcher = Dispatcher::new(ExecutorRegistry::new());
        let mut sink = CollectSink::new();
        let result = dispatcher
            .call_member(&block, &[WireValue::Int(1)], &mut sink)
            .unwrap();
        assert_eq!(result, WireValue::Str("ok".to_owned()));
        assert_eq!(executor.received(), vec!["call api.fetch(1)".to_owned()]);
    }

    #[test]
    fn executor_failures_become_block_errors() {
        struct FailingExecutor;
        impl Executor for FailingExecutor {
            fn execute(&self, _code: &str) -> Result<(), ExecFailure> {
                Err(ExecFailure::new("boom"))
            }
            fn execute_with_return(&self, _code: &str) -> Result<WireValue, ExecFailure> {
                Err(ExecFailure::new("boom"))
            }
            fn call_function(
                &self,
                _path: &str,
                _args: &[WireValue],
            ) -> Result<WireValue, ExecFailure> {
                Err(ExecFailure::new("boom"))
            }
            fn take_captured_output(&self) -> String {
                String::new()
            }
            fn supported_languages(&self) -> Vec<Language> {
                vec![Language::Python]
            }
        }
        let dispatcher = Dispatcher::new(ExecutorRegistry::new());
        let backend = BlockBackend::Shared(Arc::new(FailingExecutor));
        let mut sink = CollectSink::new();
        let err = dispatcher
            .execute_with_return(&backend, Language::Python, "x", &mut sink)
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::BlockError);
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn parallel_jobs_return_in_order() {
        let make = |value: i64| ParallelJob {
            executor: Arc::new(ScriptedExecutor::new(
                Language::Python,
                vec![WireValue::Int(value)],
            )) as Arc<dyn Executor>,
            language: Language::Python,
            code: "v".to_owned(),
        };
        let results = Dispatcher::run_parallel(vec![make(1), make(2), make(3)]);
        let values: Vec<WireValue> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            values,
            vec![WireValue::Int(1), WireValue::Int(2), WireValue::Int(3)]
        );
    }

    #[test]
    fn wire_results_convert_to_values() {
        let executor: Arc<dyn Executor> =
            Arc::new(ScriptedExecutor::new(Language::Python, vec![]));
        let mut gc = GcState::new(usize::MAX);
        let value = WireValue::List(vec![WireValue::Int(1), WireValue::Str("a".into())])
            .into_value(&mut gc, Language::Python, &executor);
        assert_eq!(value.repr(), "[1, \"a\"]");
    }
}
