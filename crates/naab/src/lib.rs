#![doc = include_str!("../../../README.md")]

pub mod abi;
pub mod ast;
pub mod batch;
pub mod dispatch;
pub mod env;
pub mod errors;
pub mod executor;
pub mod gc;
pub mod interp;
pub mod io_sink;
pub mod lexer;
pub mod loader;
pub mod marshal;
pub mod modules;
pub mod parser;
pub mod structs;
pub mod suggest;
pub mod token;
pub mod types;
pub mod value;

pub use crate::{
    errors::{Diagnostic, ErrorKind, RunError, RunResult, StackFrame},
    executor::{ExecFailure, Executor, ExecutorRegistry, Language, ProcessExecutor, ScriptedExecutor},
    interp::{BlockProvider, Interp, InterpOptions, NoBlocks, RegistryBlock},
    io_sink::{CollectSink, PrintSink, StdoutSink},
    marshal::WireValue,
    parser::{parse_program, parse_with_diagnostics},
    types::Type,
    value::Value,
};
