//! sudo password prompt detection and answering
//!
//! [`PromptPatterns`] holds the regexes as plain data so they can be tested
//! and swapped independently of the session. [`PasswordInteractionHandler`]
//! classifies each chunk of channel output and decides whether to answer a
//! prompt or abort.
//!
//! Matching is applied to each chunk as received. A prompt split across two
//! chunks is not detected; sudo writes its prompt in a single write in
//! practice, so no cross-chunk buffering is done.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use zeroize::Zeroizing;

use crate::error::{Result, SudoSshError};

/// sudo's message after a rejected password
pub const WRONG_PASSWORD_PATTERN: &str = r"Sorry.*\stry\sagain";

/// Any password prompt
pub const PASSWORD_PROMPT_PATTERN: &str = r"[Pp]assword.*:";

/// sudo's default prompt, as printed on the PTY
pub const SUDO_PROMPT_PATTERN: &str = r"\[sudo\] password for \S+:";

static WRONG_PASSWORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(WRONG_PASSWORD_PATTERN).expect("valid wrong-password regex"));
static PASSWORD_PROMPT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(PASSWORD_PROMPT_PATTERN).expect("valid password-prompt regex"));
static SUDO_PROMPT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(SUDO_PROMPT_PATTERN).expect("valid sudo-prompt regex"));

/// Output stream of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Lowercase stream name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a single output chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDetection {
    WrongPassword,
    PasswordPrompt,
    None,
}

/// Patterns used to recognize prompts in channel output
#[derive(Debug, Clone)]
pub struct PromptPatterns {
    wrong_password: Regex,
    password_prompt: Regex,
    sudo_prompt: Regex,
}

impl Default for PromptPatterns {
    fn default() -> Self {
        Self {
            wrong_password: WRONG_PASSWORD_REGEX.clone(),
            password_prompt: PASSWORD_PROMPT_REGEX.clone(),
            sudo_prompt: SUDO_PROMPT_REGEX.clone(),
        }
    }
}

impl PromptPatterns {
    /// Compile custom patterns, e.g. for a localized sudo.
    pub fn new(wrong_password: &str, password_prompt: &str, sudo_prompt: &str) -> Result<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                SudoSshError::config(format!("Invalid {} pattern '{}': {}", name, pattern, e))
            })
        };

        Ok(Self {
            wrong_password: compile("wrong-password", wrong_password)?,
            password_prompt: compile("password-prompt", password_prompt)?,
            sudo_prompt: compile("sudo-prompt", sudo_prompt)?,
        })
    }

    /// Classify a chunk. The wrong-password check wins over the prompt check,
    /// so a rejected password is never sent again.
    pub fn classify(&self, chunk: &str) -> PromptDetection {
        if self.wrong_password.is_match(chunk) {
            PromptDetection::WrongPassword
        } else if self.password_prompt.is_match(chunk) {
            PromptDetection::PasswordPrompt
        } else {
            PromptDetection::None
        }
    }

    /// Whether the chunk contains sudo's own prompt
    pub fn is_sudo_prompt(&self, chunk: &str) -> bool {
        self.sudo_prompt.is_match(chunk)
    }

    /// Remove every sudo prompt from captured text
    pub fn strip_sudo_prompts(&self, text: &str) -> String {
        self.sudo_prompt.replace_all(text, "").into_owned()
    }
}

/// Why a session was aborted by the interaction handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    WrongPassword,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::WrongPassword => f.write_str("wrong password"),
        }
    }
}

/// What the session should do in response to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    SendPassword,
    Abort(AbortReason),
}

/// Answers sudo password prompts with a single shared password.
///
/// Holds no per-session state, so one handler is shared (behind an `Arc`)
/// by every session of a backend.
pub struct PasswordInteractionHandler {
    password: Zeroizing<String>,
    patterns: PromptPatterns,
}

impl PasswordInteractionHandler {
    /// Create a handler using the default sudo patterns
    pub fn new(password: impl Into<String>) -> Self {
        Self::with_patterns(password, PromptPatterns::default())
    }

    /// Create a handler with custom patterns
    pub fn with_patterns(password: impl Into<String>, patterns: PromptPatterns) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            patterns,
        }
    }

    /// Patterns in use
    pub fn patterns(&self) -> &PromptPatterns {
        &self.patterns
    }

    /// Decide how to react to a chunk of output.
    ///
    /// A wrong-password message aborts: retrying would hit the same rejection
    /// and may trip lockout policies on the host.
    pub fn on_data(&self, stream: Stream, chunk: &str) -> Action {
        match self.patterns.classify(chunk) {
            PromptDetection::WrongPassword => Action::Abort(AbortReason::WrongPassword),
            PromptDetection::PasswordPrompt => {
                tracing::debug!(%stream, "password prompt detected");
                Action::SendPassword
            }
            PromptDetection::None => Action::None,
        }
    }

    /// Bytes written to the channel to answer a prompt: the password plus a
    /// line terminator.
    pub fn password_payload(&self) -> Zeroizing<Vec<u8>> {
        let mut payload = Vec::with_capacity(self.password.len() + 1);
        payload.extend_from_slice(self.password.as_bytes());
        payload.push(b'\n');
        Zeroizing::new(payload)
    }
}

impl fmt::Debug for PasswordInteractionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordInteractionHandler")
            .field("password", &"<redacted>")
            .field("patterns", &self.patterns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_prompt_sends_password() {
        let handler = PasswordInteractionHandler::new("s3cret");
        assert_eq!(
            handler.on_data(Stream::Stdout, "[sudo] password for alice: "),
            Action::SendPassword
        );
    }

    #[test]
    fn test_generic_prompt_sends_password() {
        let handler = PasswordInteractionHandler::new("s3cret");
        assert_eq!(
            handler.on_data(Stream::Stdout, "Password: "),
            Action::SendPassword
        );
    }

    #[test]
    fn test_wrong_password_aborts() {
        let handler = PasswordInteractionHandler::new("s3cret");
        assert_eq!(
            handler.on_data(Stream::Stdout, "Sorry, try again."),
            Action::Abort(AbortReason::WrongPassword)
        );
    }

    #[test]
    fn test_wrong_password_wins_over_prompt() {
        let handler = PasswordInteractionHandler::new("s3cret");
        let chunk = "Sorry, try again.\r\n[sudo] password for alice: ";
        assert_eq!(
            handler.on_data(Stream::Stdout, chunk),
            Action::Abort(AbortReason::WrongPassword)
        );
    }

    #[test]
    fn test_plain_output_ignored() {
        let handler = PasswordInteractionHandler::new("s3cret");
        assert_eq!(handler.on_data(Stream::Stdout, "total 42\r\n"), Action::None);
        assert_eq!(handler.on_data(Stream::Stdout, ""), Action::None);
    }

    #[test]
    fn test_split_prompt_is_not_detected() {
        let handler = PasswordInteractionHandler::new("s3cret");
        assert_eq!(handler.on_data(Stream::Stdout, "[sudo] pass"), Action::None);
        assert_eq!(handler.on_data(Stream::Stdout, "word for alice"), Action::None);
    }

    #[test]
    fn test_password_payload_has_newline() {
        let handler = PasswordInteractionHandler::new("s3cret");
        assert_eq!(handler.password_payload().as_slice(), b"s3cret\n");
    }

    #[test]
    fn test_debug_redacts_password() {
        let handler = PasswordInteractionHandler::new("s3cret");
        let debug = format!("{:?}", handler);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_strip_sudo_prompts() {
        let patterns = PromptPatterns::default();
        let text = "[sudo] password for deploy: \r\nhello\r\n";
        let stripped = patterns.strip_sudo_prompts(text);
        assert_eq!(stripped, " \r\nhello\r\n");
        assert!(!stripped.contains("[sudo] password for"));
    }

    #[test]
    fn test_custom_patterns() {
        let patterns =
            PromptPatterns::new(r"Désolé", r"[Mm]ot de passe.*:", r"\[sudo\] mot de passe de \S+ :")
                .unwrap();
        assert_eq!(
            patterns.classify("[sudo] mot de passe de alice : "),
            PromptDetection::PasswordPrompt
        );
        assert_eq!(patterns.classify("Désolé, essayez de nouveau."), PromptDetection::WrongPassword);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = PromptPatterns::new("(", "x", "y");
        assert!(matches!(result, Err(SudoSshError::Config(_))));
    }

    #[test]
    fn test_stream_display() {
        assert_eq!(Stream::Stdout.to_string(), "stdout");
        assert_eq!(Stream::Stderr.to_string(), "stderr");
    }
}
