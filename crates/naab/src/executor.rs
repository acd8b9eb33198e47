//! The executor contract: the abstraction the dispatcher uses to drive each
//! foreign language.
//!
//! The dispatcher may invoke executors from parallel block groups, so the
//! trait is `Send + Sync`; shared executors must be internally synchronized.
//! Values cross this boundary as [`WireValue`]s (see `marshal`), never as
//! interpreter `Value`s — wire data is `Send`, interpreter values are not.

use std::{
    process::{Command, Stdio},
    sync::{Arc, Mutex},
};

use strum::{Display, EnumString, IntoStaticStr};

use crate::marshal::{parse_scalar_output, WireValue};

/// A foreign language a polyglot block can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(ascii_case_insensitive)]
pub enum Language {
    #[strum(serialize = "py", to_string = "python")]
    Python,
    #[strum(serialize = "js", serialize = "node", to_string = "javascript")]
    JavaScript,
    #[strum(serialize = "c++", to_string = "cpp")]
    Cpp,
    #[strum(serialize = "sh", serialize = "shell", to_string = "bash")]
    Bash,
    #[strum(to_string = "rust")]
    Rust,
    #[strum(to_string = "go")]
    Go,
    #[strum(serialize = "rb", to_string = "ruby")]
    Ruby,
    #[strum(serialize = "cs", serialize = "c#", to_string = "csharp")]
    CSharp,
}

impl Language {
    /// Languages whose runtimes keep incremental global state share a single
    /// process-wide executor; compiled-per-block languages get an owned
    /// instance per block.
    pub fn uses_shared_executor(self) -> bool {
        !matches!(self, Self::Cpp | Self::Rust | Self::Go | Self::CSharp)
    }
}

/// A failure reported by an executor; the dispatcher converts these into
/// `BlockError`s with the foreign message embedded.
#[derive(Debug, Clone)]
pub struct ExecFailure {
    pub message: String,
}

impl ExecFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ExecResult<T> = Result<T, ExecFailure>;

/// Contract every foreign-language runtime driver implements.
pub trait Executor: Send + Sync {
    /// Runs code for its side effects. Stdout is captured, not streamed.
    fn execute(&self, code: &str) -> ExecResult<()>;

    /// Runs code and delivers the value of the trailing expression.
    fn execute_with_return(&self, code: &str) -> ExecResult<WireValue>;

    /// Calls a function (or chained member path) with marshalled arguments.
    fn call_function(&self, path: &str, args: &[WireValue]) -> ExecResult<WireValue>;

    /// Returns and clears any stdout captured since the last read.
    fn take_captured_output(&self) -> String;

    /// Languages this executor can be registered for.
    fn supported_languages(&self) -> Vec<Language>;
}

/// Factory for owned (per-block) executor instances.
pub type ExecutorFactory = Box<dyn Fn() -> Arc<dyn Executor> + Send + Sync>;

/// Process-wide executor table: one shared instance per stateful language,
/// a factory per compiled language.
#[derive(Default)]
pub struct ExecutorRegistry {
    shared: ahash::AHashMap<Language, Arc<dyn Executor>>,
    factories: ahash::AHashMap<Language, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry wired with the built-in subprocess executors for every
    /// language they support.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for language in [
            Language::Python,
            Language::JavaScript,
            Language::Bash,
            Language::Ruby,
        ] {
            registry.register_shared(Arc::new(ProcessExecutor::new(language)));
        }
        registry
    }

    pub fn register_shared(&mut self, executor: Arc<dyn Executor>) {
        for language in executor.supported_languages() {
            self.shared.insert(language, Arc::clone(&executor));
        }
    }

    pub fn register_owned_factory(&mut self, language: Language, factory: ExecutorFactory) {
        self.factories.insert(language, factory);
    }

    /// The shared executor for a language, if one is registered.
    pub fn shared(&self, language: Language) -> Option<Arc<dyn Executor>> {
        self.shared.get(&language).cloned()
    }

    /// A fresh owned instance for a compiled-per-block language.
    pub fn new_owned(&self, language: Language) -> Option<Arc<dyn Executor>> {
        self.factories.get(&language).map(|factory| factory())
    }
}

/// Minimal subprocess-backed executor for interpreter-style languages.
///
/// Each call is a one-shot process; the result protocol appends a sentinel
/// line carrying the trailing expression as JSON so user output and the
/// returned value can be split apart. This is deliberately small — real
/// executors with persistent runtimes plug in behind the same trait.
pub struct ProcessExecutor {
    language: Language,
    captured: Mutex<String>,
}

const RESULT_SENTINEL: &str = "__NAAB_RESULT_9d4f__";

impl ProcessExecutor {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            captured: Mutex::new(String::new()),
        }
    }

    fn interpreter(&self) -> (&'static str, &'static [&'static str]) {
        match self.language {
            Language::Python => ("python3", &["-c"]),
            Language::JavaScript => ("node", &["-e"]),
            Language::Ruby => ("ruby", &["-e"]),
            Language::Bash => ("bash", &["-c"]),
            other => unreachable!("ProcessExecutor does not drive {other}"),
        }
    }

    fn run(&self, program: &str) -> ExecResult<String> {
        let (binary, args) = self.interpreter();
        let child = Command::new(binary)
            .args(args)
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ExecFailure::new(format!("failed to start {binary}: {err}")))?;
        let output = child
            .wait_with_output()
            .map_err(|err| ExecFailure::new(format!("{binary} did not finish: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecFailure::new(format!(
                "{} exited with {}: {}",
                binary,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn capture(&self, text: &str) {
        self.captured
            .lock()
            .expect("captured-output lock poisoned")
            .push_str(text);
    }

    /// Wraps code so the trailing expression is printed as JSON after a
    /// sentinel, leaving user prints untouched before it.
    fn returning_program(&self, code: &str) -> String {
        let trimmed = code.trim_end();
        let (body, tail) = match trimmed.rfind('\n') {
            Some(idx) => (&trimmed[..idx], trimmed[idx + 1..].trim()),
            None => ("", trimmed.trim()),
        };
        let sentinel = RESULT_SENTINEL;
        match self.language {
            Language::Python => format!(
                "import json as __naab_json\n{body}\n__naab_result = ({tail})\nprint(\"{sentinel}\" + __naab_json.dumps(__naab_result))"
            ),
            Language::JavaScript => format!(
                "{body}\nconst __naab_result = ({tail});\nconsole.log(\"{sentinel}\" + JSON.stringify(__naab_result));"
            ),
            Language::Ruby => format!(
                "require 'json'\n{body}\n__naab_result = ({tail})\nputs(\"{sentinel}\" + JSON.generate(__naab_result))"
            ),
            // Shell has no expression language to wrap; the whole stdout is
            // the result and is reparsed as int, float, or string.
            Language::Bash => code.to_owned(),
            other => unreachable!("ProcessExecutor does not drive {other}"),
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, code: &str) -> ExecResult<()> {
        let stdout = self.run(code)?;
        self.capture(&stdout);
        Ok(())
    }

    fn execute_with_return(&self, code: &str) -> ExecResult<WireValue> {
        if self.language == Language::Bash {
            let stdout = self.run(code)?;
            return Ok(parse_scalar_output(&stdout));
        }
        let program = self.returning_program(code);
        let stdout = self.run(&program)?;
        match stdout.rsplit_once(RESULT_SENTINEL) {
            Some((before, result_json)) => {
                self.capture(before);
                let parsed: serde_json::Value = serde_json::from_str(result_json.trim())
                    .map_err(|err| {
                        ExecFailure::new(format!("unreadable block result: {err}"))
                    })?;
                Ok(WireValue::from_json(parsed))
            }
            None => {
                self.capture(&stdout);
                Ok(WireValue::Null)
            }
        }
    }

    fn call_function(&self, path: &str, args: &[WireValue]) -> ExecResult<WireValue> {
        let rendered_args: Vec<String> = args
            .iter()
            .map(|arg| arg.to_json().to_string())
            .collect();
        let call = format!("{path}({})", rendered_args.join(", "));
        self.execute_with_return(&call)
    }

    fn take_captured_output(&self) -> String {
        std::mem::take(
            &mut *self
                .captured
                .lock()
                .expect("captured-output lock poisoned"),
        )
    }

    fn supported_languages(&self) -> Vec<Language> {
        vec![self.language]
    }
}

/// An executor driven by a fixed script of responses, for tests and
/// embedding scenarios where no foreign runtime should be spawned.
///
/// `execute_with_return` and `call_function` pop responses front-to-back;
/// every received program text is recorded for inspection.
pub struct ScriptedExecutor {
    language: Language,
    responses: Mutex<Vec<WireValue>>,
    received: Mutex<Vec<String>>,
    captured: Mutex<String>,
}

impl ScriptedExecutor {
    pub fn new(language: Language, responses: Vec<WireValue>) -> Self {
        Self {
            language,
            responses: Mutex::new(responses),
            received: Mutex::new(Vec::new()),
            captured: Mutex::new(String::new()),
        }
    }

    /// Queues output to be flushed to the host on the next read.
    pub fn push_output(&self, text: &str) {
        self.captured
            .lock()
            .expect("captured lock poisoned")
            .push_str(text);
    }

    /// Every program text this executor has been asked to run.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().expect("received lock poisoned").clone()
    }

    fn record(&self, code: &str) {
        self.received
            .lock()
            .expect("received lock poisoned")
            .push(code.to_owned());
    }

    fn next_response(&self) -> WireValue {
        let mut responses = self.responses.lock().expect("responses lock poisoned");
        if responses.is_empty() {
            WireValue::Null
        } else {
            responses.remove(0)
        }
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, code: &str) -> ExecResult<()> {
        self.record(code);
        Ok(())
    }

    fn execute_with_return(&self, code: &str) -> ExecResult<WireValue> {
        self.record(code);
        Ok(self.next_response())
    }

    fn call_function(&self, path: &str, args: &[WireValue]) -> ExecResult<WireValue> {
        let rendered: Vec<String> = args.iter().map(|a| a.to_json().to_string()).collect();
        self.record(&format!("call {path}({})", rendered.join(", ")));
        Ok(self.next_response())
    }

    fn take_captured_output(&self) -> String {
        std::mem::take(&mut *self.captured.lock().expect("captured lock poisoned"))
    }

    fn supported_languages(&self) -> Vec<Language> {
        vec![self.language]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parsing_accepts_aliases() {
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("js".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("shell".parse::<Language>().unwrap(), Language::Bash);
    }

    #[test]
    fn shared_vs_owned_split() {
        assert!(Language::Python.uses_shared_executor());
        assert!(Language::JavaScript.uses_shared_executor());
        assert!(!Language::Cpp.uses_shared_executor());
        assert!(!Language::Rust.uses_shared_executor());
    }

    #[test]
    fn scripted_executor_pops_responses_in_order() {
        let exec = ScriptedExecutor::new(
            Language::Python,
            vec![WireValue::Int(1), WireValue::Int(2)],
        );
        assert_eq!(exec.execute_with_return("a").unwrap(), WireValue::Int(1));
        assert_eq!(exec.execute_with_return("b").unwrap(), WireValue::Int(2));
        assert_eq!(exec.execute_with_return("c").unwrap(), WireValue::Null);
        assert_eq!(exec.received(), vec!["a", "b", "c"]);
    }

    #[test]
    fn python_returning_program_wraps_tail_expression() {
        let exec = ProcessExecutor::new(Language::Python);
        let program = exec.returning_program("x = 1\nx * 2");
        assert!(program.contains("__naab_result = (x * 2)"));
        assert!(program.starts_with("import json"));
    }
}
