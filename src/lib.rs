//! sudo-ssh - Remote command execution over SSH with interactive sudo elevation
//!
//! This crate runs shell commands on a remote host over an SSH channel with a
//! pseudo-terminal, answers `sudo` password prompts as they appear, and
//! captures stdout/stderr/exit status while keeping prompt text out of logs
//! and captured output.
//!
//! # Features
//!
//! - Command builder with environment export and `sudo -u`/`sg` wrapping
//! - sudo prompt detection with a fatal, never-retried wrong-password path
//! - Explicit per-session state machine (exit status and EOF in any order)
//! - Caller-controlled timeout and cancellation, keeping partial output
//! - Optional append-only command audit log
//! - `chown` fix-up after uploads, so files belong to the elevation target
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! sudo-ssh --host=10.0.0.5 --user=admin --password=secret --owner=deploy \
//!   capture whoami
//! ```

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod ssh;

/// Scripted channels for tests; not part of the supported API
#[doc(hidden)]
pub mod testing;

// Re-exports for convenience
pub use audit::CommandAuditLog;
pub use backend::{SudoBackend, Uploader};
pub use config::{Args, BackendConfig, Config};
pub use error::{Result, SudoSshError};
pub use ssh::{
    Command, CommandBuilder, CommandOutput, ExecutionSession, OutputFilter, OutputSink,
    PasswordInteractionHandler, PromptPatterns, SshConfig, SshConnectionManager, Stream,
    TracingSink,
};
