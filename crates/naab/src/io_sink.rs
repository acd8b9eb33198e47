//! Host stdout abstraction.
//!
//! The interpreter never prints directly; `print`, `io.write`, and flushed
//! polyglot output all go through a [`PrintSink`]. The default sink writes
//! to process stdout; [`CollectSink`] gathers output into a shared buffer
//! for tests and embedders.

use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

pub trait PrintSink {
    fn write_str(&mut self, text: &str);
}

/// Writes through to process stdout, flushing eagerly so host prints and
/// subprocess output interleave sensibly.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl PrintSink for StdoutSink {
    fn write_str(&mut self, text: &str) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects all output into a shared string buffer.
///
/// The buffer handle survives the interpreter taking ownership of the sink:
/// clone it with [`CollectSink::buffer`] before handing the sink over.
#[derive(Debug, Default)]
pub struct CollectSink {
    buffer: Rc<RefCell<String>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> Rc<RefCell<String>> {
        Rc::clone(&self.buffer)
    }
}

impl PrintSink for CollectSink {
    fn write_str(&mut self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }
}
