//! Execution session: one command over one channel
//!
//! [`SessionMachine`] is a pure state machine. It consumes [`SessionEvent`]s
//! and returns the [`Effect`]s the caller must carry out, so every transition
//! can be tested without a channel. [`ExecutionSession`] drives the machine
//! against a real [`SessionChannel`].
//!
//! Exit status and EOF may arrive in either order. A session completes once
//! both an exit status and channel completion (EOF or close) have been seen.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::channel::{ChannelEvent, ChannelOpener, SessionChannel};
use super::command::CommandOutput;
use super::filter::OutputFilter;
use super::interaction::{AbortReason, Action, PasswordInteractionHandler, Stream};
use super::sink::OutputSink;
use crate::error::{Result, SudoSshError};

/// Events fed into the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Channel-level event
    Channel(ChannelEvent),
    /// Caller-initiated cancellation or timeout
    Cancelled,
    /// Writing to the channel failed
    SendFailed(String),
}

impl From<ChannelEvent> for SessionEvent {
    fn from(event: ChannelEvent) -> Self {
        SessionEvent::Channel(event)
    }
}

/// Side effects requested by the machine, to be applied in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    LogStart,
    RequestPty,
    Exec(String),
    SendPassword,
    LogData { stream: Stream, chunk: String },
    LogExit(u32),
    CloseChannel,
}

/// Why a session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    WrongPassword,
    OpenFailed(String),
    Cancelled,
    ClosedWithoutStatus,
    ChannelLost(String),
}

/// Lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Executing,
    Completed,
    Failed(SessionFailure),
}

impl SessionPhase {
    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed(_))
    }
}

/// Per-session state and transition logic
#[derive(Debug)]
pub struct SessionMachine {
    command: String,
    phase: SessionPhase,
    started: bool,
    exit_status: Option<u32>,
    channel_done: bool,
    output: CommandOutput,
    // Incomplete UTF-8 sequences held back until the next chunk
    pending_stdout: Vec<u8>,
    pending_stderr: Vec<u8>,
    handler: Arc<PasswordInteractionHandler>,
    filter: OutputFilter,
}

impl SessionMachine {
    /// Create a machine for the final command text
    pub fn new(command: impl Into<String>, handler: Arc<PasswordInteractionHandler>) -> Self {
        let filter = OutputFilter::new(handler.patterns().clone());
        Self {
            command: command.into(),
            phase: SessionPhase::Created,
            started: false,
            exit_status: None,
            channel_done: false,
            output: CommandOutput::new(),
            pending_stdout: Vec::new(),
            pending_stderr: Vec::new(),
            handler,
            filter,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Output captured so far
    pub fn output(&self) -> &CommandOutput {
        &self.output
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Created → Executing: log, request the PTY, exec the command.
    pub fn start(&mut self) -> Vec<Effect> {
        if self.phase != SessionPhase::Created {
            return Vec::new();
        }

        self.started = true;
        self.phase = SessionPhase::Executing;
        vec![
            Effect::LogStart,
            Effect::RequestPty,
            Effect::Exec(self.command.clone()),
        ]
    }

    /// Apply one event. Events after a terminal phase are ignored.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }

        match event {
            SessionEvent::Cancelled => {
                self.fail(SessionFailure::Cancelled);
                vec![Effect::CloseChannel]
            }
            SessionEvent::SendFailed(reason) => {
                self.fail(SessionFailure::ChannelLost(reason));
                vec![Effect::CloseChannel]
            }
            SessionEvent::Channel(ChannelEvent::OpenFailed(reason)) => {
                self.fail(SessionFailure::OpenFailed(reason));
                vec![Effect::CloseChannel]
            }
            SessionEvent::Channel(ChannelEvent::Started) => {
                debug!(command = %self.command, "exec accepted");
                Vec::new()
            }
            SessionEvent::Channel(ChannelEvent::Stdout(data)) => {
                self.on_output(Stream::Stdout, &data)
            }
            SessionEvent::Channel(ChannelEvent::Stderr(data)) => {
                self.on_output(Stream::Stderr, &data)
            }
            SessionEvent::Channel(ChannelEvent::ExitStatus(code)) => {
                self.exit_status = Some(code);
                self.output.exit_code = Some(code);
                self.try_complete()
            }
            SessionEvent::Channel(ChannelEvent::Eof) => {
                self.channel_done = true;
                self.try_complete()
            }
            SessionEvent::Channel(ChannelEvent::Closed) => {
                self.channel_done = true;
                let effects = self.try_complete();
                if !self.is_terminal() {
                    self.fail(SessionFailure::ClosedWithoutStatus);
                }
                effects
            }
        }
    }

    fn on_output(&mut self, stream: Stream, data: &[u8]) -> Vec<Effect> {
        let pending = match stream {
            Stream::Stdout => &mut self.pending_stdout,
            Stream::Stderr => &mut self.pending_stderr,
        };
        let chunk = decode_utf8(pending, data);
        if chunk.is_empty() {
            return Vec::new();
        }

        let mut effects = Vec::new();

        match self.handler.on_data(stream, &chunk) {
            Action::Abort(AbortReason::WrongPassword) => {
                self.fail(SessionFailure::WrongPassword);
                return vec![Effect::CloseChannel];
            }
            Action::SendPassword => effects.push(Effect::SendPassword),
            Action::None => {}
        }

        let suppressed = match stream {
            Stream::Stdout => self.filter.should_suppress(stream, &chunk),
            Stream::Stderr => false,
        };

        match stream {
            Stream::Stdout => self.output.stdout.push_str(&chunk),
            Stream::Stderr => self.output.stderr.push_str(&chunk),
        }

        if !suppressed {
            effects.push(Effect::LogData { stream, chunk });
        }

        effects
    }

    fn try_complete(&mut self) -> Vec<Effect> {
        match self.exit_status {
            Some(code) if self.channel_done => {
                self.phase = SessionPhase::Completed;
                vec![Effect::LogExit(code)]
            }
            _ => Vec::new(),
        }
    }

    fn fail(&mut self, failure: SessionFailure) {
        warn!(command = %self.command, ?failure, "session failed");
        self.phase = SessionPhase::Failed(failure);
    }

    /// Turn the final phase into the caller-facing result.
    pub fn finish(mut self) -> Result<CommandOutput> {
        // A sequence still incomplete at the end is invalid
        self.output
            .stdout
            .push_str(&String::from_utf8_lossy(&self.pending_stdout));
        self.output
            .stderr
            .push_str(&String::from_utf8_lossy(&self.pending_stderr));

        match self.phase {
            SessionPhase::Completed => Ok(self.output),
            SessionPhase::Failed(SessionFailure::WrongPassword) => Err(SudoSshError::WrongPassword),
            SessionPhase::Failed(SessionFailure::OpenFailed(reason)) => {
                Err(SudoSshError::OpenFailed(reason))
            }
            SessionPhase::Failed(SessionFailure::Cancelled) => {
                Err(SudoSshError::Cancelled(Box::new(self.output)))
            }
            SessionPhase::Failed(SessionFailure::ChannelLost(reason)) => {
                Err(SudoSshError::ChannelLost {
                    reason,
                    output: Box::new(self.output),
                })
            }
            SessionPhase::Failed(SessionFailure::ClosedWithoutStatus) => Err(
                SudoSshError::connection("Channel closed without an exit status"),
            ),
            SessionPhase::Created | SessionPhase::Executing => Err(SudoSshError::connection(
                "Session ended before the command completed",
            )),
        }
    }
}

/// Append `data` to `pending` and decode as much of it as possible.
///
/// Invalid bytes become U+FFFD. A multi-byte sequence cut off at the end of
/// the buffer stays in `pending` for the next call.
fn decode_utf8(pending: &mut Vec<u8>, data: &[u8]) -> String {
    pending.extend_from_slice(data);

    let mut decoded = String::new();
    let mut rest: &[u8] = pending;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                decoded.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                decoded.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        decoded.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }

    let tail = rest.to_vec();
    *pending = tail;
    decoded
}

/// Drives one [`SessionMachine`] over a channel
pub struct ExecutionSession {
    host: String,
    machine: SessionMachine,
    handler: Arc<PasswordInteractionHandler>,
    sink: Arc<dyn OutputSink>,
}

impl ExecutionSession {
    pub fn new(
        host: impl Into<String>,
        command: impl Into<String>,
        handler: Arc<PasswordInteractionHandler>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let machine = SessionMachine::new(command, Arc::clone(&handler));
        Self {
            host: host.into(),
            machine,
            handler,
            sink,
        }
    }

    /// Open a channel and run the command until it completes, fails, or
    /// `cancel` resolves. `cancel` also bounds the channel open.
    pub async fn run<F>(mut self, opener: &dyn ChannelOpener, cancel: F) -> Result<CommandOutput>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(cancel);

        let opened = tokio::select! {
            opened = opener.open_channel() => opened,
            _ = &mut cancel => {
                self.machine.handle(SessionEvent::Cancelled);
                return self.machine.finish();
            }
        };

        let mut channel = match opened {
            Ok(channel) => channel,
            Err(SudoSshError::OpenFailed(reason)) => {
                self.machine
                    .handle(ChannelEvent::OpenFailed(reason).into());
                return self.machine.finish();
            }
            Err(e) => return Err(e),
        };

        self.drive(channel.as_mut(), &mut cancel).await
    }

    /// Run the command over an already opened channel.
    pub async fn drive<F>(mut self, channel: &mut dyn SessionChannel, cancel: F) -> Result<CommandOutput>
    where
        F: Future<Output = ()> + Send,
    {
        let effects = self.machine.start();
        self.apply(channel, effects).await?;

        tokio::pin!(cancel);

        while !self.machine.is_terminal() {
            let event = tokio::select! {
                event = channel.next_event() => {
                    SessionEvent::from(event.unwrap_or(ChannelEvent::Closed))
                }
                _ = &mut cancel => SessionEvent::Cancelled,
            };

            let effects = self.machine.handle(event);
            self.apply(channel, effects).await?;
        }

        self.machine.finish()
    }

    async fn apply(&mut self, channel: &mut dyn SessionChannel, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::LogStart => self.sink.command_start(&self.host, self.machine.command()),
                Effect::RequestPty => {
                    if let Err(e) = channel.request_pty().await {
                        return self.abort_start(channel, e).await;
                    }
                }
                Effect::Exec(command) => {
                    if let Err(e) = channel.exec(&command).await {
                        return self.abort_start(channel, e).await;
                    }
                }
                Effect::SendPassword => {
                    let payload = self.handler.password_payload();
                    if let Err(e) = channel.send_data(&payload).await {
                        self.machine.handle(SessionEvent::SendFailed(e.to_string()));
                        if let Err(e) = channel.close().await {
                            debug!("Ignoring close error: {}", e);
                        }
                        return Ok(());
                    }
                }
                Effect::LogData { stream, chunk } => {
                    self.sink.command_data(&self.host, stream, &chunk)
                }
                Effect::LogExit(code) => {
                    self.sink
                        .command_exit(&self.host, self.machine.command(), code)
                }
                Effect::CloseChannel => {
                    if let Err(e) = channel.close().await {
                        debug!("Ignoring close error: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    /// PTY or exec request failed: the channel is unusable.
    async fn abort_start(
        &mut self,
        channel: &mut dyn SessionChannel,
        error: SudoSshError,
    ) -> Result<()> {
        self.machine
            .handle(ChannelEvent::OpenFailed(error.to_string()).into());
        if let Err(e) = channel.close().await {
            debug!("Ignoring close error: {}", e);
        }
        Ok(())
    }
}
