//! Log transports.
//!
//! # Responsibilities
//! - Define the sink contract finished entries are handed to
//! - Provide console (JSON lines), in-memory and `tracing` sinks
//!
//! # Design Decisions
//! - `log` is synchronous and must not block: sinks with slow I/O hand the
//!   entry to their own writer. This keeps dispatch ordered per transport
//! - The console sink renders on the caller and writes on a dedicated
//!   thread; `flush` waits until every line queued before it is written
//! - Transport failures are contained by the logger, never surfaced to callers

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::logging::entry::LogEntry;
use crate::logging::level::Level;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// A sink receiving finished log entries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Minimum level accepted; `None` accepts everything.
    fn level(&self) -> Option<Level> {
        None
    }

    /// Hand an entry to the sink. Must not block.
    fn log(&self, entry: &Arc<LogEntry>) -> Result<(), TransportError>;

    /// Flush buffered entries.
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Output stream for [`ConsoleTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    #[default]
    Stdout,
    Stderr,
}

enum ConsoleCommand {
    Line(String),
    Flush(oneshot::Sender<std::io::Result<()>>),
}

/// Writes one JSON line per entry.
pub struct ConsoleTransport {
    level: Option<Level>,
    writer: mpsc::UnboundedSender<ConsoleCommand>,
}

impl ConsoleTransport {
    pub fn new(stream: ConsoleStream, level: Option<Level>) -> Self {
        let writer: Box<dyn Write + Send> = match stream {
            ConsoleStream::Stdout => Box::new(std::io::stdout()),
            ConsoleStream::Stderr => Box::new(std::io::stderr()),
        };
        Self::with_writer(writer, level)
    }

    /// Console transport writing to `writer` instead of a standard stream.
    pub fn with_writer(writer: Box<dyn Write + Send>, level: Option<Level>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("relaylog-console".to_string())
            .spawn(move || write_lines(writer, rx));
        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to start console writer; console output disabled");
        }
        Self { level, writer: tx }
    }

    fn send(&self, command: ConsoleCommand) -> Result<(), TransportError> {
        self.writer
            .send(command)
            .map_err(|_| TransportError::Other("console writer stopped".to_string()))
    }
}

/// Writer loop; ends when the transport is dropped.
fn write_lines(mut out: Box<dyn Write + Send>, mut commands: mpsc::UnboundedReceiver<ConsoleCommand>) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            ConsoleCommand::Line(line) => {
                if let Err(e) = writeln!(out, "{line}") {
                    tracing::warn!(error = %e, "Console write failed");
                }
            }
            ConsoleCommand::Flush(done) => {
                let _ = done.send(out.flush());
            }
        }
    }
    let _ = out.flush();
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn log(&self, entry: &Arc<LogEntry>) -> Result<(), TransportError> {
        let line = serde_json::to_string(entry.as_ref())?;
        self.send(ConsoleCommand::Line(line))
    }

    async fn flush(&self) -> Result<(), TransportError> {
        let (done, flushed) = oneshot::channel();
        self.send(ConsoleCommand::Flush(done))?;
        flushed
            .await
            .map_err(|_| TransportError::Other("console writer stopped".to_string()))??;
        Ok(())
    }
}

impl std::fmt::Debug for ConsoleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleTransport")
            .field("level", &self.level)
            .finish()
    }
}

/// Keeps entries in memory; the spy used by tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    level: Option<Level>,
    entries: Mutex<Vec<Arc<LogEntry>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self {
            level: Some(level),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<Arc<LogEntry>> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.msg.clone()).collect()
    }

    /// Entries rendered as JSON lines.
    pub fn lines(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.to_json()).collect()
    }

    pub fn find(&self, predicate: impl Fn(&LogEntry) -> bool) -> Vec<Arc<LogEntry>> {
        self.entries
            .lock()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn log(&self, entry: &Arc<LogEntry>) -> Result<(), TransportError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Re-emits entries as `tracing` events under the `relaylog` target.
#[derive(Debug, Default)]
pub struct TracingTransport {
    level: Option<Level>,
}

impl TracingTransport {
    pub fn new(level: Option<Level>) -> Self {
        Self { level }
    }
}

#[async_trait]
impl Transport for TracingTransport {
    fn name(&self) -> &str {
        "tracing"
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn log(&self, entry: &Arc<LogEntry>) -> Result<(), TransportError> {
        let fields = serde_json::to_string(&entry.fields)?;
        let context = serde_json::to_string(&entry.context)?;
        let service = entry.service.as_str();
        let msg = entry.msg.as_str();
        match entry.level {
            Level::Trace => tracing::trace!(target: "relaylog", service, %fields, %context, "{msg}"),
            Level::Debug => tracing::debug!(target: "relaylog", service, %fields, %context, "{msg}"),
            Level::Info => tracing::info!(target: "relaylog", service, %fields, %context, "{msg}"),
            Level::Warn => tracing::warn!(target: "relaylog", service, %fields, %context, "{msg}"),
            Level::Error => tracing::error!(target: "relaylog", service, %fields, %context, "{msg}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn entry(level: Level, msg: &str) -> Arc<LogEntry> {
        Arc::new(LogEntry::assemble(
            level,
            "svc",
            msg.to_string(),
            Map::new(),
            &Map::new(),
            Map::new(),
        ))
    }

    #[test]
    fn test_memory_transport_records_in_order() {
        let memory = MemoryTransport::new();
        memory.log(&entry(Level::Info, "first")).unwrap();
        memory.log(&entry(Level::Warn, "second")).unwrap();
        assert_eq!(memory.messages(), vec!["first", "second"]);
        assert_eq!(memory.find(|e| e.level == Level::Warn).len(), 1);
        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_tracing_transport_accepts_all_levels() {
        let transport = TracingTransport::default();
        for level in [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error] {
            assert!(transport.log(&entry(level, "bridged")).is_ok());
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_console_transport_writes() {
        let transport = ConsoleTransport::new(ConsoleStream::Stderr, Some(Level::Warn));
        assert_eq!(transport.level(), Some(Level::Warn));
        assert!(transport.log(&entry(Level::Error, "to stderr")).is_ok());
        assert!(transport.flush().await.is_ok());
    }

    #[tokio::test]
    async fn test_console_lines_written_in_order_by_flush() {
        let buffer = SharedBuffer::default();
        let transport = ConsoleTransport::with_writer(Box::new(buffer.clone()), None);

        for msg in ["first", "second", "third"] {
            transport.log(&entry(Level::Info, msg)).unwrap();
        }
        transport.flush().await.unwrap();

        let written = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let messages: Vec<String> = written
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["msg"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }
}
