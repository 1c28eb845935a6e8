//! SSH command execution module
//!
//! This module provides the command builder, the sudo prompt interaction
//! handler, the output filter and the per-command execution session, plus a
//! persistent `russh` connection that supplies channels to sessions.

pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod elevation;
pub mod filter;
pub mod handler;
pub mod interaction;
pub mod sanitize;
pub mod session;
pub mod sink;

// Re-exports
pub use channel::{ChannelEvent, ChannelOpener, RusshChannel, SessionChannel};
pub use command::{Command, CommandBuilder, CommandOutput};
pub use config::SshConfig;
pub use connection::SshConnectionManager;
pub use elevation::{escape_for_shell, home_dir_for, sanitize_password, ElevationTarget};
pub use filter::OutputFilter;
pub use handler::SshHandler;
pub use interaction::{Action, PasswordInteractionHandler, PromptDetection, PromptPatterns, Stream};
pub use sanitize::{escape_newlines, sanitize_args};
pub use session::{ExecutionSession, SessionEvent, SessionMachine, SessionPhase};
pub use sink::{OutputSink, RecordingSink, TracingSink};
