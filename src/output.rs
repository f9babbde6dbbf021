//! # Output Writer
//!
//! Sink for human-readable migration progress. The embedding application
//! decides where messages go by supplying a handler; the default handler
//! discards them.

use std::fmt;
use std::sync::Arc;

type Handler = Arc<dyn Fn(&str) + Send + Sync>;

/// Progress message sink shared by the registry, executor and orchestrator.
#[derive(Clone)]
pub struct OutputWriter {
    handler: Handler,
}

impl OutputWriter {
    /// Create a writer forwarding every message to `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A writer that discards everything.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    /// A writer printing each message on its own line to stdout.
    pub fn stdout() -> Self {
        Self::new(|message| println!("{}", message))
    }

    /// Write one message.
    pub fn write(&self, message: &str) {
        tracing::trace!(target: "docmigrate::output", "{}", message);
        (self.handler)(message);
    }
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_write_forwards_to_handler() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let writer = OutputWriter::new(move |m| sink.lock().unwrap().push(m.to_string()));

        writer.write("migrating 20140101000000");
        writer.clone().write("done");

        let messages = captured.lock().unwrap();
        assert_eq!(messages.as_slice(), ["migrating 20140101000000", "done"]);
    }

    #[test]
    fn test_default_writer_is_silent() {
        OutputWriter::default().write("nobody listens");
    }
}
