//! Error types for sudo-ssh

use thiserror::Error;

use crate::ssh::command::CommandOutput;

/// Main error type for remote command execution
///
/// Structural failures (the command never got a fair chance to run) are kept
/// apart from [`SudoSshError::CommandFailed`], which means the remote process
/// ran and returned a non-zero exit status.
#[derive(Debug, Error)]
pub enum SudoSshError {
    /// SSH connection failed or dropped mid-session
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// SSH authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Empty or malformed command, rejected before any channel interaction
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// sudo rejected the configured password
    #[error("Authentication failed: sudo rejected the password (wrong password)")]
    WrongPassword,

    /// The SSH channel could not be opened or the exec request was refused
    #[error("Channel open failed: {0}")]
    OpenFailed(String),

    /// The session was cancelled or timed out; carries the partial output
    #[error("Command cancelled")]
    Cancelled(Box<CommandOutput>),

    /// The channel broke while the command was running; carries the partial output
    #[error("Channel lost: {reason}")]
    ChannelLost {
        reason: String,
        output: Box<CommandOutput>,
    },

    /// The command ran and exited with a non-zero status
    #[error("Command `{command}` exited with status {exit_status}")]
    CommandFailed { command: String, exit_status: u32 },

    /// File upload failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using SudoSshError
pub type Result<T> = std::result::Result<T, SudoSshError>;

impl SudoSshError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        SudoSshError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        SudoSshError::Authentication(msg.into())
    }

    /// Create an invalid command error from a string
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        SudoSshError::InvalidCommand(msg.into())
    }

    /// Create an open failed error from a string
    pub fn open_failed(msg: impl Into<String>) -> Self {
        SudoSshError::OpenFailed(msg.into())
    }

    /// Create an upload error from a string
    pub fn upload(msg: impl Into<String>) -> Self {
        SudoSshError::Upload(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SudoSshError::Config(msg.into())
    }

    /// Whether the error is an authentication failure, either SSH-level or sudo-level
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SudoSshError::Authentication(_) | SudoSshError::WrongPassword
        )
    }

    /// Partial output captured before a cancellation or a lost channel, if any
    pub fn partial_output(&self) -> Option<&CommandOutput> {
        match self {
            SudoSshError::Cancelled(output) | SudoSshError::ChannelLost { output, .. } => {
                Some(&**output)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SudoSshError::Connection("failed to connect".to_string());
        assert_eq!(err.to_string(), "SSH connection error: failed to connect");

        let err = SudoSshError::CommandFailed {
            command: "false".to_string(),
            exit_status: 1,
        };
        assert_eq!(err.to_string(), "Command `false` exited with status 1");
    }

    #[test]
    fn test_wrong_password_is_auth_failure() {
        assert!(SudoSshError::WrongPassword.is_auth_failure());
        assert!(SudoSshError::auth("rejected").is_auth_failure());
        assert!(!SudoSshError::open_failed("refused").is_auth_failure());
    }

    #[test]
    fn test_cancelled_keeps_partial_output() {
        let output = CommandOutput {
            stdout: "half".to_string(),
            stderr: String::new(),
            exit_code: None,
        };
        let err = SudoSshError::Cancelled(Box::new(output));
        assert_eq!(err.partial_output().map(|o| o.stdout.as_str()), Some("half"));
        assert_eq!(err.to_string(), "Command cancelled");
    }

    #[test]
    fn test_channel_lost_keeps_partial_output() {
        let err = SudoSshError::ChannelLost {
            reason: "broken pipe".to_string(),
            output: Box::new(CommandOutput {
                stdout: "[sudo] password for deploy: ".to_string(),
                stderr: String::new(),
                exit_code: None,
            }),
        };
        assert_eq!(err.to_string(), "Channel lost: broken pipe");
        assert!(err.partial_output().is_some());
    }
}
