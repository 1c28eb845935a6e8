//! Command sanitization utilities
//!
//! Validates argument vectors before they reach a channel, and flattens
//! command text for single-line logs.

use crate::error::{Result, SudoSshError};

/// Validate an argument vector before it is turned into a command.
///
/// This function:
/// - Rejects an empty vector
/// - Rejects a blank program name (first element)
/// - Trims surrounding whitespace from the program name
///
/// Arguments after the program are passed through untouched.
///
/// # Examples
/// ```
/// use sudo_ssh::ssh::sanitize::sanitize_args;
///
/// let args = sanitize_args(vec!["  ls ".to_string(), "-la".to_string()]).unwrap();
/// assert_eq!(args, vec!["ls", "-la"]);
///
/// assert!(sanitize_args(Vec::new()).is_err());
/// ```
pub fn sanitize_args(args: Vec<String>) -> Result<Vec<String>> {
    let mut args = args;

    let Some(program) = args.first_mut() else {
        return Err(SudoSshError::invalid_command("Command cannot be empty"));
    };

    let trimmed = program.trim();
    if trimmed.is_empty() {
        return Err(SudoSshError::invalid_command(
            "Command program cannot be blank",
        ));
    }
    *program = trimmed.to_string();

    if args.iter().any(|arg| arg.contains('\0')) {
        return Err(SudoSshError::invalid_command(
            "Command cannot contain null bytes",
        ));
    }

    Ok(args)
}

/// Put a command on a single line by replacing `\r\n` and `\n` with the
/// two-character sequence `\n`.
///
/// # Example
/// ```
/// use sudo_ssh::ssh::sanitize::escape_newlines;
///
/// assert_eq!(escape_newlines("a\nb\r\nc"), "a\\nb\\nc");
/// ```
pub fn escape_newlines(command: &str) -> String {
    command.replace("\r\n", "\\n").replace('\n', "\\n")
}
