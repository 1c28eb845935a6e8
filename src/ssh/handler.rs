//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use russh::keys::{HashAlg, PublicKey};
use tracing::{debug, warn};

/// SSH client handler for russh
///
/// Verifies the server key against a pinned SHA-256 fingerprint when one is
/// configured; otherwise every key is accepted and its fingerprint logged.
#[derive(Debug, Clone, Default)]
pub struct SshHandler {
    expected_fingerprint: Option<String>,
}

impl SshHandler {
    /// Create a handler that accepts any server key
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler that only accepts the key with `fingerprint`
    pub fn with_fingerprint(fingerprint: Option<String>) -> Self {
        Self {
            expected_fingerprint: fingerprint,
        }
    }

    /// Decide whether a server key with `fingerprint` is acceptable
    pub fn accepts(&self, fingerprint: &str) -> bool {
        match &self.expected_fingerprint {
            Some(expected) => expected.trim() == fingerprint,
            None => true,
        }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();

        if self.accepts(&fingerprint) {
            debug!("Accepted server key {}", fingerprint);
            Ok(true)
        } else {
            warn!(
                "Server key {} does not match pinned fingerprint {:?}",
                fingerprint, self.expected_fingerprint
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_accepts_any_key_by_default() {
        let handler = SshHandler::new();
        assert!(handler.accepts("SHA256:anything"));
    }

    #[test]
    fn test_handler_pinned_fingerprint() {
        let handler = SshHandler::with_fingerprint(Some("SHA256:abc ".to_string()));
        assert!(handler.accepts("SHA256:abc"));
        assert!(!handler.accepts("SHA256:xyz"));
    }
}
