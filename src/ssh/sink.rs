//! Logging sink for command lifecycle events

use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use super::interaction::Stream;

/// Receives command start, output and completion events.
///
/// Implementations must be cheap: they are called inline from the session
/// loop for every visible chunk.
pub trait OutputSink: Send + Sync {
    /// A command is about to be executed
    fn command_start(&self, host: &str, command: &str);

    /// A visible chunk of output arrived
    fn command_data(&self, host: &str, stream: Stream, chunk: &str);

    /// The command finished with `exit_status`
    fn command_exit(&self, host: &str, command: &str, exit_status: u32);
}

/// Default sink: structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn command_start(&self, host: &str, command: &str) {
        info!(host, command, "running command");
    }

    fn command_data(&self, host: &str, stream: Stream, chunk: &str) {
        match stream {
            Stream::Stdout => info!(host, stream = %stream, "{}", chunk.trim_end()),
            Stream::Stderr => warn!(host, stream = %stream, "{}", chunk.trim_end()),
        }
    }

    fn command_exit(&self, host: &str, command: &str, exit_status: u32) {
        info!(host, command, exit_status, "command finished");
    }
}

/// A sink event, as recorded by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    Start {
        host: String,
        command: String,
    },
    Data {
        host: String,
        stream: &'static str,
        chunk: String,
    },
    Exit {
        host: String,
        command: String,
        exit_status: u32,
    },
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events as JSON lines
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for event in self.events() {
            out.push_str(&serde_json::to_string(&event)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn push(&self, event: SinkEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl OutputSink for RecordingSink {
    fn command_start(&self, host: &str, command: &str) {
        self.push(SinkEvent::Start {
            host: host.to_string(),
            command: command.to_string(),
        });
    }

    fn command_data(&self, host: &str, stream: Stream, chunk: &str) {
        self.push(SinkEvent::Data {
            host: host.to_string(),
            stream: stream.as_str(),
            chunk: chunk.to_string(),
        });
    }

    fn command_exit(&self, host: &str, command: &str, exit_status: u32) {
        self.push(SinkEvent::Exit {
            host: host.to_string(),
            command: command.to_string(),
            exit_status,
        });
    }
}
