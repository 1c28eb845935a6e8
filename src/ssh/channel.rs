//! Channel abstraction consumed by execution sessions
//!
//! [`SessionChannel`] is the minimal surface a session needs from one SSH
//! channel; [`ChannelOpener`] hands out fresh channels. [`RusshChannel`]
//! adapts a `russh` client channel, translating `ChannelMsg` into
//! [`ChannelEvent`].

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg};
use tracing::{debug, warn};

use crate::error::{Result, SudoSshError};

/// Terminal type requested for the PTY
pub const PTY_TERM: &str = "xterm";

/// PTY size (cols, rows)
pub const PTY_SIZE: (u32, u32) = (80, 24);

/// Events delivered by a channel, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The exec request was accepted
    Started,
    /// A chunk on stdout (the PTY)
    Stdout(Vec<u8>),
    /// A chunk on stderr (extended data type 1)
    Stderr(Vec<u8>),
    /// The remote process reported its exit status
    ExitStatus(u32),
    /// The remote side will send no more data
    Eof,
    /// The channel is closed
    Closed,
    /// The channel or the exec request was refused
    OpenFailed(String),
}

/// One interactive channel, owned by a single session
#[async_trait]
pub trait SessionChannel: Send {
    /// Request a pseudo-terminal, so sudo can prompt on it
    async fn request_pty(&mut self) -> Result<()>;

    /// Execute `command`
    async fn exec(&mut self, command: &str) -> Result<()>;

    /// Next event; `None` once the channel is gone
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Write to the remote process' stdin
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;

    /// Close the channel
    async fn close(&mut self) -> Result<()>;
}

/// Source of fresh channels, e.g. a connected SSH session
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    /// Open a new channel. Fails with `OpenFailed` if the remote side refuses.
    async fn open_channel(&self) -> Result<Box<dyn SessionChannel>>;

    /// Host identifier used in logs
    fn host(&self) -> &str;
}

/// [`SessionChannel`] over a `russh` client channel
pub struct RusshChannel {
    inner: Channel<client::Msg>,
}

impl RusshChannel {
    pub fn new(inner: Channel<client::Msg>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SessionChannel for RusshChannel {
    async fn request_pty(&mut self) -> Result<()> {
        // No reply requested: the only Success/Failure on this channel then
        // belongs to the exec request.
        self.inner
            .request_pty(false, PTY_TERM, PTY_SIZE.0, PTY_SIZE.1, 0, 0, &[])
            .await
            .map_err(|e| SudoSshError::connection(format!("Failed to request PTY: {}", e)))
    }

    async fn exec(&mut self, command: &str) -> Result<()> {
        self.inner
            .exec(true, command)
            .await
            .map_err(|e| SudoSshError::connection(format!("Failed to exec command: {}", e)))
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let msg = self.inner.wait().await?;
            let event = match msg {
                ChannelMsg::Success => ChannelEvent::Started,
                ChannelMsg::Failure => {
                    ChannelEvent::OpenFailed("exec request refused".to_string())
                }
                ChannelMsg::Data { data } => ChannelEvent::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        ChannelEvent::Stderr(data.to_vec())
                    } else {
                        ChannelEvent::Stdout(data.to_vec())
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    warn!("Remote process killed by signal {:?}", signal_name);
                    continue;
                }
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Closed,
                other => {
                    debug!("Ignoring channel message: {:?}", other);
                    continue;
                }
            };
            return Some(event);
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.inner
            .data(data)
            .await
            .map_err(|e| SudoSshError::connection(format!("Failed to send data: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| SudoSshError::connection(format!("Failed to close channel: {}", e)))
    }
}
