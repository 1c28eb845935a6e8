//! In-memory channels for exercising sessions without a network
//!
//! [`ScriptedChannel`] replays a fixed list of [`ChannelEvent`]s and records
//! what the session did to it. [`ScriptedOpener`] hands out queued channels
//! in order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, SudoSshError};
use crate::ssh::channel::{ChannelEvent, ChannelOpener, SessionChannel};

/// What a session did to a [`ScriptedChannel`]
#[derive(Debug, Clone, Default)]
pub struct ChannelRecord {
    pub pty_requested: bool,
    pub executed: Vec<String>,
    pub sent: Vec<Vec<u8>>,
    pub closed: bool,
}

/// Channel replaying a scripted event sequence
#[derive(Debug)]
pub struct ScriptedChannel {
    events: VecDeque<ChannelEvent>,
    hang_when_drained: bool,
    send_error: Option<String>,
    record: Arc<Mutex<ChannelRecord>>,
}

impl ScriptedChannel {
    pub fn new(events: impl IntoIterator<Item = ChannelEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            hang_when_drained: false,
            send_error: None,
            record: Arc::new(Mutex::new(ChannelRecord::default())),
        }
    }

    /// Wait forever once the script is drained instead of reporting the
    /// channel as gone.
    pub fn hanging(mut self) -> Self {
        self.hang_when_drained = true;
        self
    }

    /// Fail every `send_data` call with `reason`
    pub fn failing_send(mut self, reason: impl Into<String>) -> Self {
        self.send_error = Some(reason.into());
        self
    }

    /// Handle to the record, readable after the channel is consumed
    pub fn record(&self) -> Arc<Mutex<ChannelRecord>> {
        Arc::clone(&self.record)
    }

    fn update(&self, f: impl FnOnce(&mut ChannelRecord)) {
        if let Ok(mut record) = self.record.lock() {
            f(&mut record);
        }
    }
}

#[async_trait]
impl SessionChannel for ScriptedChannel {
    async fn request_pty(&mut self) -> Result<()> {
        self.update(|r| r.pty_requested = true);
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<()> {
        self.update(|r| r.executed.push(command.to_string()));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }

        let closed = self.record.lock().map(|r| r.closed).unwrap_or(true);
        if self.hang_when_drained && !closed {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        if let Some(reason) = &self.send_error {
            return Err(SudoSshError::connection(reason.clone()));
        }
        self.update(|r| r.sent.push(data.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.update(|r| r.closed = true);
        Ok(())
    }
}

#[derive(Debug)]
enum ScriptedOpen {
    Channel(ScriptedChannel),
    Failure(String),
    Stall,
}

/// Opener returning queued [`ScriptedChannel`]s
#[derive(Debug)]
pub struct ScriptedOpener {
    host: String,
    queue: Mutex<VecDeque<ScriptedOpen>>,
    records: Mutex<Vec<Arc<Mutex<ChannelRecord>>>>,
}

impl ScriptedOpener {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            queue: Mutex::new(VecDeque::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Queue a channel for the next `open_channel` call
    pub fn push(&self, channel: ScriptedChannel) {
        if let Ok(mut records) = self.records.lock() {
            records.push(channel.record());
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(ScriptedOpen::Channel(channel));
        }
    }

    /// Make the next `open_channel` call fail
    pub fn push_open_failure(&self, reason: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(ScriptedOpen::Failure(reason.into()));
        }
    }

    /// Make the next `open_channel` call never resolve
    pub fn push_stall(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(ScriptedOpen::Stall);
        }
    }

    /// Commands executed across all channels, in queue order
    pub fn executed(&self) -> Vec<String> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| r.lock().ok().map(|r| r.executed.clone()))
                    .flatten()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records of every queued channel
    pub fn records(&self) -> Vec<ChannelRecord> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| r.lock().ok().map(|r| r.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelOpener for ScriptedOpener {
    async fn open_channel(&self) -> Result<Box<dyn SessionChannel>> {
        let next = self
            .queue
            .lock()
            .map_err(|_| SudoSshError::connection("scripted opener poisoned"))?
            .pop_front();

        match next {
            Some(ScriptedOpen::Channel(channel)) => Ok(Box::new(channel)),
            Some(ScriptedOpen::Failure(reason)) => Err(SudoSshError::OpenFailed(reason)),
            Some(ScriptedOpen::Stall) => {
                std::future::pending::<()>().await;
                Err(SudoSshError::open_failed("stalled open resumed"))
            }
            None => Err(SudoSshError::open_failed("no scripted channel left")),
        }
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// A channel that answers a sudo prompt and completes with `exit_status`,
/// printing `stdout` in between.
pub fn sudo_channel(user: &str, stdout: &str, exit_status: u32) -> ScriptedChannel {
    ScriptedChannel::new([
        ChannelEvent::Started,
        ChannelEvent::Stdout(format!("[sudo] password for {}: ", user).into_bytes()),
        ChannelEvent::Stdout(b"\r\n".to_vec()),
        ChannelEvent::Stdout(stdout.as_bytes().to_vec()),
        ChannelEvent::ExitStatus(exit_status),
        ChannelEvent::Eof,
        ChannelEvent::Closed,
    ])
}
