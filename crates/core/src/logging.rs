//! Stack of log streams.
//!
//! Long operations push a stream (for example a `command.log` file) before
//! running external tools and pop it when done. Every line logged while the
//! stream is on the stack is written to it and flushed immediately, and is
//! also mirrored to `tracing`.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

type Stream = Box<dyn Write + Send>;

/// Cloneable handle to a shared stack of log streams.
#[derive(Clone, Default)]
pub struct LogStack {
    streams: Arc<Mutex<Vec<(u64, Stream)>>>,
    next_id: Arc<Mutex<u64>>,
}

/// Pops its stream from the owning [`LogStack`] when dropped.
#[must_use = "the stream is popped as soon as the guard is dropped"]
pub struct StreamGuard {
    stack: LogStack,
    id: u64,
}

impl LogStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide stack used when callers do not thread their own through.
    pub fn global() -> &'static LogStack {
        static GLOBAL: OnceLock<LogStack> = OnceLock::new();
        GLOBAL.get_or_init(LogStack::new)
    }

    /// Push a stream; it receives every logged line until the guard drops.
    pub fn push<W: Write + Send + 'static>(&self, stream: W) -> StreamGuard {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        self.lock().push((id, Box::new(stream)));
        StreamGuard { stack: self.clone(), id }
    }

    /// Number of streams currently pushed.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    /// Log a message to `tracing` and to every pushed stream.
    ///
    /// Write failures on individual streams are reported through `tracing`
    /// and otherwise ignored so that logging never aborts an operation.
    pub fn log(&self, message: &str) {
        tracing::info!("{}", message);
        let mut streams = self.lock();
        for (_, stream) in streams.iter_mut() {
            let result = writeln!(stream, "{}", message).and_then(|_| stream.flush());
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to write to log stream");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Stream)>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let mut streams = self.stack.lock();
        if let Some(index) = streams.iter().position(|(id, _)| *id == self.id) {
            let (_, mut stream) = streams.remove(index);
            let _ = stream.flush();
        }
    }
}
