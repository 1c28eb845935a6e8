//! Output visibility filtering
//!
//! Decides which chunks reach the logging sink. Filtering only affects what is
//! logged; captured buffers still receive every chunk.

use super::interaction::{PromptPatterns, Stream};

/// Per-chunk visibility filter
#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    patterns: PromptPatterns,
}

impl OutputFilter {
    /// Create a filter using the given prompt patterns
    pub fn new(patterns: PromptPatterns) -> Self {
        Self { patterns }
    }

    /// Whether `chunk` should be hidden from the log output.
    ///
    /// Hidden:
    /// - a chunk that is only a line terminator (PTY noise after the prompt is answered)
    /// - a stdout chunk containing sudo's password prompt
    ///
    /// Ordinary output mentioning "password" stays visible.
    pub fn should_suppress(&self, stream: Stream, chunk: &str) -> bool {
        if chunk == "\r\n" || chunk == "\n" {
            return true;
        }

        stream == Stream::Stdout && self.patterns.is_sudo_prompt(chunk)
    }
}
