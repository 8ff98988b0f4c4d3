use crate::sink::{ExportSink, SinkError};
use std::sync::{Arc, Mutex};

/// A sink that simply drops all lines.
///
/// Useful for measuring the overhead of the target and layer without any
/// file I/O.
#[derive(Clone, Default)]
pub struct NoopSink;

impl ExportSink for NoopSink {
    fn export(&mut self, _lines: &[String]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A sink that keeps every exported line in memory.
///
/// Clones share the same storage, so a test can hand one clone to the
/// target and read the lines back through another.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
    exports: Arc<Mutex<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line exported so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Number of `export` calls so far.
    pub fn exports(&self) -> usize {
        self.exports.lock().map(|n| *n).unwrap_or_default()
    }
}

impl ExportSink for MemorySink {
    fn export(&mut self, lines: &[String]) -> Result<(), SinkError> {
        self.lines
            .lock()
            .map_err(|_| "memory sink lock poisoned")?
            .extend_from_slice(lines);
        *self.exports.lock().map_err(|_| "memory sink lock poisoned")? += 1;
        Ok(())
    }
}
