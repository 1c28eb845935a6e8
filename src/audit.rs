//! Raw command audit log
//!
//! Appends every executed command, one per line, to a file. Embedded newlines
//! are written as the two characters `\n` so each command stays on one line.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;
use crate::ssh::sanitize::escape_newlines;

/// Append-only command log
#[derive(Debug, Clone)]
pub struct CommandAuditLog {
    path: PathBuf,
}

impl CommandAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `command` as a single line.
    ///
    /// The line is written with one `write_all` on a file opened in append
    /// mode, so concurrent sessions do not interleave within a line.
    pub async fn append(&self, command: &str) -> Result<()> {
        let mut line = escape_newlines(command);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Logged command to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_escapes_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandAuditLog::new(dir.path().join("commands.log"));

        log.append("echo a\necho b").await.unwrap();
        log.append("uptime").await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "echo a\\necho b\nuptime\n");
    }

    #[tokio::test]
    async fn test_append_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.log");
        std::fs::write(&path, "earlier\n").unwrap();

        CommandAuditLog::new(&path).append("later").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[tokio::test]
    async fn test_append_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandAuditLog::new(dir.path().join("missing/commands.log"));
        assert!(log.append("ls").await.is_err());
    }
}
