//! Sudo-aware command backend
//!
//! [`SudoBackend`] ties the pieces together for one host: it builds each
//! command with the elevation environment, appends it to the audit log, and
//! runs it in a fresh [`ExecutionSession`]. Scoping helpers (`as_user`,
//! `with_env`, `within`) return new backend views sharing the same
//! connection, password and sink.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::audit::CommandAuditLog;
use crate::config::BackendConfig;
use crate::error::{Result, SudoSshError};
use crate::ssh::channel::ChannelOpener;
use crate::ssh::command::{Command, CommandOutput};
use crate::ssh::elevation::ElevationTarget;
use crate::ssh::interaction::{PasswordInteractionHandler, PromptPatterns};
use crate::ssh::session::ExecutionSession;
use crate::ssh::sink::{OutputSink, TracingSink};

/// File transfer to the remote host, supplied by the caller
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Copy `local` to `remote` as the SSH login user
    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct Scope {
    user: Option<String>,
    group: Option<String>,
    env: BTreeMap<String, String>,
    pwd: Option<String>,
}

/// Runs commands on one host, elevating through sudo
#[derive(Clone)]
pub struct SudoBackend {
    opener: Arc<dyn ChannelOpener>,
    config: Arc<BackendConfig>,
    handler: Arc<PasswordInteractionHandler>,
    sink: Arc<dyn OutputSink>,
    audit: Option<CommandAuditLog>,
    scope: Scope,
}

impl SudoBackend {
    /// Create a backend with the default sudo patterns and a tracing sink
    pub fn new(opener: Arc<dyn ChannelOpener>, config: BackendConfig) -> Self {
        let handler = Arc::new(PasswordInteractionHandler::new(
            config.sudo_password.clone(),
        ));
        let audit = config.commands_log.as_ref().map(CommandAuditLog::new);

        Self {
            opener,
            config: Arc::new(config),
            handler,
            sink: Arc::new(TracingSink),
            audit,
            scope: Scope::default(),
        }
    }

    /// Replace the logging sink
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the prompt patterns
    pub fn with_patterns(mut self, patterns: PromptPatterns) -> Self {
        self.handler = Arc::new(PasswordInteractionHandler::with_patterns(
            self.config.sudo_password.clone(),
            patterns,
        ));
        self
    }

    /// Host commands run on
    pub fn host(&self) -> &str {
        self.opener.host()
    }

    /// Backend settings
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// View running commands as `user` (and optionally `group`)
    pub fn as_user(&self, user: impl Into<String>, group: Option<&str>) -> Self {
        let mut view = self.clone();
        view.scope.user = Some(user.into());
        view.scope.group = group.map(str::to_string);
        view
    }

    /// View with extra environment variables
    pub fn with_env<I, K, V>(&self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut view = self.clone();
        view.scope
            .env
            .extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        view
    }

    /// View running commands inside `dir`. Relative paths nest inside the
    /// current directory.
    pub fn within(&self, dir: impl AsRef<str>) -> Self {
        let dir = dir.as_ref();
        let mut view = self.clone();
        view.scope.pwd = match &self.scope.pwd {
            Some(current) if !dir.starts_with('/') => {
                Some(format!("{}/{}", current.trim_end_matches('/'), dir))
            }
            _ => Some(dir.to_string()),
        };
        view
    }

    /// Elevation target for the current scope.
    ///
    /// The scoped user (with its own group) wins; otherwise the configured
    /// owner and group are used.
    fn elevation_target(&self) -> Option<ElevationTarget> {
        let (user, group) = match &self.scope.user {
            Some(user) => (user.clone(), self.scope.group.clone()),
            None => (self.config.owner.clone()?, self.config.group.clone()),
        };

        let target = ElevationTarget::new(user);
        Some(match group {
            Some(group) => target.with_group(group),
            None => target,
        })
    }

    /// Build the command for `args` in the current scope.
    ///
    /// Scoped variables go in first, then `user` and `home` of the elevation
    /// target, then the deployment-environment variable, each overriding the
    /// last. Keys are case-insensitive.
    pub fn command<I, S>(&self, args: I) -> Result<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Command::builder(args)
            .host(self.host())
            .env(self.scope.env.clone());

        match self.elevation_target() {
            Some(target) => {
                builder = builder.env(target.env()).user(target.user);
                if let Some(group) = target.group {
                    builder = builder.group(group);
                }
            }
            None => {
                if let Some(group) = &self.config.group {
                    builder = builder.group(group.as_str());
                }
            }
        }

        if let Some(value) = &self.config.deploy_env {
            builder = builder.env_var(self.config.deploy_env_var.as_str(), value.as_str());
        }
        if let Some(pwd) = &self.scope.pwd {
            builder = builder.within(pwd.as_str());
        }

        builder.build()
    }

    /// Run a command and return its output, whatever the exit status
    pub async fn run<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self.command(args)?;
        self.run_command(&command, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but the session is cancelled when `cancel`
    /// resolves. The partial output is available from the `Cancelled` error.
    pub async fn run_until<I, S, F>(&self, args: I, cancel: F) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Future<Output = ()> + Send,
    {
        let command = self.command(args)?;
        self.run_command(&command, cancel).await
    }

    /// Run a command; a non-zero exit status is an error
    pub async fn execute<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self.command(args)?;
        let output = self
            .run_command(&command, std::future::pending())
            .await?;

        match output.exit_code {
            Some(0) => Ok(output),
            Some(exit_status) => Err(SudoSshError::CommandFailed {
                command: command.to_command_string(),
                exit_status,
            }),
            None => Err(SudoSshError::connection("Command finished without exit status")),
        }
    }

    /// Run a command and report whether it exited with status 0
    pub async fn test<I, S>(&self, args: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.run(args).await?.success())
    }

    /// Run a command and return its stdout, trimmed, with sudo prompts
    /// removed. A non-zero exit status is an error.
    pub async fn capture<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output = self.execute(args).await?;
        let stripped = self.handler.patterns().strip_sudo_prompts(&output.stdout);
        Ok(stripped.trim().to_string())
    }

    /// Upload a file, then hand it to the target user.
    ///
    /// The transfer runs as the SSH login user, so the file is chowned as
    /// root to the scoped user (or the configured owner) afterwards.
    pub async fn upload(&self, uploader: &dyn Uploader, local: &Path, remote: &str) -> Result<()> {
        uploader.upload(local, remote).await?;

        let owner = self.elevation_target().map(|target| target.user).ok_or_else(|| {
            SudoSshError::config("Cannot chown uploaded file: no target user or owner configured")
        })?;

        debug!("Uploaded {} to {}, chowning to {}", local.display(), remote, owner);
        self.as_user("root", None)
            .execute(["chown", owner.as_str(), remote])
            .await?;
        Ok(())
    }

    async fn run_command<F>(&self, command: &Command, cancel: F) -> Result<CommandOutput>
    where
        F: Future<Output = ()> + Send,
    {
        let text = command.to_command_string();

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.append(&text).await {
                warn!("Failed to write command log {}: {}", audit.path().display(), e);
            }
        }

        let timeout = self.config.timeout;
        let cancel = async move {
            match timeout {
                Some(limit) => {
                    tokio::select! {
                        _ = cancel => {}
                        _ = tokio::time::sleep(limit) => {
                            warn!("Command timed out after {}ms", limit.as_millis());
                        }
                    }
                }
                None => cancel.await,
            }
        };

        let session = ExecutionSession::new(
            command.host(),
            text,
            Arc::clone(&self.handler),
            Arc::clone(&self.sink),
        );
        session.run(self.opener.as_ref(), cancel).await
    }
}

impl std::fmt::Debug for SudoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SudoBackend")
            .field("host", &self.host())
            .field("config", &self.config)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sudo_channel, ScriptedOpener};

    fn backend(opener: Arc<ScriptedOpener>, config: BackendConfig) -> SudoBackend {
        SudoBackend::new(opener, config)
    }

    #[test]
    fn test_command_merges_elevation_env() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let backend = backend(opener, BackendConfig::new("pw").with_owner("deploy"));

        let command = backend.command(["whoami"]).unwrap();
        assert_eq!(command.user(), Some("deploy"));
        assert_eq!(command.env().get("USER").map(String::as_str), Some("deploy"));
        assert_eq!(
            command.env().get("HOME").map(String::as_str),
            Some("/home/deploy")
        );
        assert_eq!(command.host(), "web-1");
    }

    #[test]
    fn test_command_passes_deploy_env_through() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let config = BackendConfig::new("pw")
            .with_owner("deploy")
            .with_deploy_env("production");
        let command = backend(opener, config).command(["rake", "db:migrate"]).unwrap();

        assert_eq!(
            command.to_command_string(),
            "sudo -u deploy HOME=\"/home/deploy\" RAILS_ENV=\"production\" USER=\"deploy\" -- sh -c 'rake db:migrate'"
        );
    }

    #[test]
    fn test_scoped_env_cannot_duplicate_target_vars() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let config = BackendConfig::new("pw")
            .with_owner("deploy")
            .with_deploy_env("production");
        let command = backend(opener, config)
            .with_env([("USER", "mallory"), ("RAILS_ENV", "test")])
            .command(["id"])
            .unwrap();

        assert_eq!(
            command.environment_string(),
            "HOME=\"/home/deploy\" RAILS_ENV=\"production\" USER=\"deploy\""
        );
    }

    #[test]
    fn test_group_without_owner_still_applies() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let command = backend(opener, BackendConfig::new("pw").with_group("www"))
            .command(["id"])
            .unwrap();
        assert_eq!(command.user(), None);
        assert_eq!(command.group(), Some("www"));
    }

    #[test]
    fn test_command_without_owner_exports_env() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let backend = backend(opener, BackendConfig::new("pw")).with_env([("port", "8080")]);

        let command = backend.command(["./server"]).unwrap();
        assert_eq!(
            command.to_command_string(),
            "( export PORT=\"8080\" ; ./server )"
        );
    }

    #[test]
    fn test_command_without_owner_or_env_is_unmodified() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let command = backend(opener, BackendConfig::new("pw"))
            .command(["uptime"])
            .unwrap();
        assert_eq!(command.to_command_string(), "uptime");
    }

    #[test]
    fn test_as_root_uses_root_home() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let backend = backend(opener, BackendConfig::new("pw").with_owner("deploy"));

        let command = backend.as_user("root", None).command(["id"]).unwrap();
        assert_eq!(command.user(), Some("root"));
        assert_eq!(command.env().get("HOME").map(String::as_str), Some("/root"));
    }

    #[test]
    fn test_group_fallback_only_without_scoped_user() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let backend = backend(
            opener,
            BackendConfig::new("pw").with_owner("deploy").with_group("www"),
        );

        assert_eq!(backend.command(["id"]).unwrap().group(), Some("www"));
        assert_eq!(
            backend.as_user("root", None).command(["id"]).unwrap().group(),
            None
        );
        assert_eq!(
            backend
                .as_user("app", Some("staff"))
                .command(["id"])
                .unwrap()
                .group(),
            Some("staff")
        );
    }

    #[test]
    fn test_within_nests_relative_paths() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let backend = backend(opener, BackendConfig::new("pw"));

        let nested = backend.within("/srv/app").within("current");
        assert_eq!(nested.command(["ls"]).unwrap().pwd(), Some("/srv/app/current"));

        let reset = nested.within("/tmp");
        assert_eq!(reset.command(["ls"]).unwrap().pwd(), Some("/tmp"));
    }

    #[test]
    fn test_empty_command_rejected_before_channel() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        let backend = backend(opener.clone(), BackendConfig::new("pw"));

        let result = backend.command(Vec::<String>::new());
        assert!(matches!(result, Err(SudoSshError::InvalidCommand(_))));
        assert!(opener.executed().is_empty());
    }

    #[tokio::test]
    async fn test_capture_strips_prompt() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        opener.push(sudo_channel("alice", "deploy\r\n", 0));
        let backend = backend(opener, BackendConfig::new("pw").with_owner("deploy"));

        let captured = backend.capture(["whoami"]).await.unwrap();
        assert_eq!(captured, "deploy");
    }

    #[tokio::test]
    async fn test_execute_non_zero_is_command_failure() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        opener.push(sudo_channel("alice", "", 2));
        let backend = backend(opener, BackendConfig::new("pw"));

        let err = backend.execute(["false"]).await.unwrap_err();
        match err {
            SudoSshError::CommandFailed { command, exit_status } => {
                assert_eq!(command, "false");
                assert_eq!(exit_status, 2);
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_returns_non_zero_output() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        opener.push(sudo_channel("alice", "", 1));
        let backend = backend(opener, BackendConfig::new("pw"));

        let output = backend.run(["test", "-f", "/nope"]).await.unwrap();
        assert_eq!(output.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_test_reports_exit_status() {
        let opener = Arc::new(ScriptedOpener::new("web-1"));
        opener.push(sudo_channel("alice", "", 0));
        opener.push(sudo_channel("alice", "", 1));
        let backend = backend(opener, BackendConfig::new("pw"));

        assert!(backend.test(["true"]).await.unwrap());
        assert!(!backend.test(["false"]).await.unwrap());
    }
}
