//! SSH Connection Manager
//!
//! Provides persistent SSH connection handling with automatic reconnection and
//! concurrent access protection. Each command gets its own channel through the
//! [`ChannelOpener`] implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Channel;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::channel::{ChannelOpener, RusshChannel, SessionChannel};
use super::config::SshConfig;
use super::handler::SshHandler;
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{Result, SudoSshError};

/// SSH Connection Manager
///
/// Manages a persistent SSH connection to one host with the following features:
/// - Automatic reconnection when connection drops
/// - Concurrent access protection via mutex/atomic flags
/// - 30-second connection timeout
/// - One fresh channel per command
pub struct SshConnectionManager {
    /// SSH configuration
    config: SshConfig,

    /// Active SSH session handle
    session: Arc<Mutex<Option<Handle<SshHandler>>>>,

    /// Flag to prevent concurrent connection attempts
    is_connecting: AtomicBool,
}

impl SshConnectionManager {
    /// Create a new SSH Connection Manager
    ///
    /// Does not establish connection immediately; call `connect()` or
    /// `ensure_connected()` to establish the connection.
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
            is_connecting: AtomicBool::new(false),
        }
    }

    /// Connection parameters
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Establish SSH connection
    ///
    /// If already connected, returns immediately. If another task is currently
    /// connecting, waits for that connection attempt to complete.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected().await {
            debug!("Already connected to SSH server");
            return Ok(());
        }

        // Prevent concurrent connection attempts
        if self
            .is_connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Another connection attempt in progress, waiting...");
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if !self.is_connecting.load(Ordering::SeqCst) {
                    break;
                }
            }
            return if self.is_connected().await {
                Ok(())
            } else {
                Err(SudoSshError::connection("Connection failed by another task"))
            };
        }

        let result = self.do_connect().await;

        self.is_connecting.store(false, Ordering::SeqCst);

        result
    }

    /// Internal connection logic
    async fn do_connect(&self) -> Result<()> {
        info!(
            "Connecting to SSH server {}:{}...",
            self.config.host, self.config.port
        );

        let connection_timeout = Duration::from_secs(CONNECTION_TIMEOUT_SECS);

        let ssh_config = Arc::new(client::Config::default());
        let handler = SshHandler::with_fingerprint(self.config.host_fingerprint.clone());

        let addr = self.config.address();
        let connect_result = timeout(
            connection_timeout,
            client::connect(ssh_config, addr.as_str(), handler),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(SudoSshError::connection(e.to_string()));
            }
            Err(_) => {
                error!("SSH connection timeout after {}s", CONNECTION_TIMEOUT_SECS);
                return Err(SudoSshError::connection(format!(
                    "Connection timeout after {}s",
                    CONNECTION_TIMEOUT_SECS
                )));
            }
        };

        self.authenticate(&mut session).await?;

        {
            let mut session_guard = self.session.lock().await;
            *session_guard = Some(session);
        }

        info!(
            "Successfully connected to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        Ok(())
    }

    /// Authenticate with the SSH server
    async fn authenticate(&self, session: &mut Handle<SshHandler>) -> Result<()> {
        if let Some(ref password) = self.config.password {
            debug!(
                "Attempting password authentication for user '{}'",
                self.config.username
            );
            let auth_result = session
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SudoSshError::auth(e.to_string()))?;

            return if auth_result.success() {
                info!("Password authentication successful");
                Ok(())
            } else {
                Err(SudoSshError::auth("Password authentication rejected"))
            };
        }

        if let Some(ref key_content) = self.config.private_key {
            debug!(
                "Attempting key authentication for user '{}'",
                self.config.username
            );

            let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
                .map_err(|e| SudoSshError::SshKey(format!("Failed to parse private key: {}", e)))?;

            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            let auth_result = session
                .authenticate_publickey(&self.config.username, key_with_alg)
                .await
                .map_err(|e| SudoSshError::auth(e.to_string()))?;

            return if auth_result.success() {
                info!("Key authentication successful");
                Ok(())
            } else {
                Err(SudoSshError::auth("Key authentication rejected"))
            };
        }

        Err(SudoSshError::auth(
            "No authentication method available (require password or private_key)",
        ))
    }

    /// Check if the connection is active
    ///
    /// A handle whose transport has shut down is dropped here, so the next
    /// `ensure_connected()` reconnects.
    pub async fn is_connected(&self) -> bool {
        let mut session_guard = self.session.lock().await;
        let alive = retain_live(&mut *session_guard, |session| session.is_closed());
        if !alive {
            debug!("SSH session to {} is not open", self.config.host);
        }
        alive
    }

    /// Ensure connection is established, reconnecting if necessary
    pub async fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected().await {
            self.connect().await?;
        }
        Ok(())
    }

    /// Open a new session channel
    ///
    /// A refusal from the server is reported as `OpenFailed`; a missing
    /// connection as `Connection`.
    pub async fn open_session_channel(&self) -> Result<Channel<client::Msg>> {
        let session_guard = self.session.lock().await;
        let session = session_guard
            .as_ref()
            .ok_or_else(|| SudoSshError::connection("SSH connection not established"))?;

        session
            .channel_open_session()
            .await
            .map_err(|e| SudoSshError::open_failed(e.to_string()))
    }

    /// Close the SSH connection
    pub async fn close(&self) {
        let mut session_guard = self.session.lock().await;
        if let Some(session) = session_guard.take() {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }

        info!("SSH connection closed");
    }
}

/// Clear `slot` if its session is closed; true when a live session remains.
fn retain_live<T>(slot: &mut Option<T>, is_closed: impl FnOnce(&T) -> bool) -> bool {
    let closed = match slot.as_ref() {
        Some(session) => is_closed(session),
        None => return false,
    };
    if closed {
        *slot = None;
    }
    !closed
}

#[async_trait]
impl ChannelOpener for SshConnectionManager {
    async fn open_channel(&self) -> Result<Box<dyn SessionChannel>> {
        self.ensure_connected().await?;
        let channel = self.open_session_channel().await?;
        Ok(Box::new(RusshChannel::new(channel)))
    }

    fn host(&self) -> &str {
        &self.config.host
    }
}

impl std::fmt::Debug for SshConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnectionManager")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .field("is_connecting", &self.is_connecting.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_manager_creation() {
        let config = SshConfig::new("localhost", "testuser")
            .with_port(22)
            .with_password("testpass");

        let manager = SshConnectionManager::new(config);

        assert!(!manager.is_connected().await);
        assert_eq!(ChannelOpener::host(&manager), "localhost");
    }

    #[tokio::test]
    async fn test_not_connected_initially() {
        let config = SshConfig::new("localhost", "testuser");
        let manager = SshConnectionManager::new(config);

        let result = manager.open_session_channel().await;
        assert!(matches!(result, Err(SudoSshError::Connection(_))));
    }

    #[test]
    fn test_closed_session_is_dropped() {
        let mut slot = Some("dead");
        assert!(!retain_live(&mut slot, |_| true));
        assert!(slot.is_none());

        let mut slot = Some("alive");
        assert!(retain_live(&mut slot, |_| false));
        assert!(slot.is_some());

        let mut slot: Option<&str> = None;
        assert!(!retain_live(&mut slot, |_| false));
    }

    #[test]
    fn test_debug_hides_credentials() {
        let config = SshConfig::new("localhost", "testuser").with_password("hunter2");
        let manager = SshConnectionManager::new(config);
        let debug = format!("{:?}", manager);
        assert!(debug.contains("localhost"));
        assert!(!debug.contains("hunter2"));
    }
}
