//! Configuration and CLI argument parsing for sudo-ssh

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::error::{Result, SudoSshError};
use crate::ssh::config::SshConfig;
use crate::ssh::elevation::{is_valid_password, sanitize_password};

/// Default timeout for command execution in milliseconds (0 = no timeout)
pub const DEFAULT_TIMEOUT_MS: u64 = 0;

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default name of the deployment-environment variable
pub const DEFAULT_DEPLOY_ENV_VAR: &str = "rails_env";

/// sudo-ssh CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "sudo-ssh")]
#[command(version)]
#[command(about = "Run remote commands over SSH, answering sudo prompts on the way")]
pub struct Args {
    /// SSH host to connect to
    #[arg(long, env = "SUDO_SSH_HOST")]
    pub host: String,

    /// SSH port
    #[arg(long, default_value = "22", env = "SUDO_SSH_PORT")]
    pub port: u16,

    /// SSH username
    #[arg(long, env = "SUDO_SSH_USER")]
    pub user: String,

    /// SSH password (alternative to key)
    #[arg(long, env = "SUDO_SSH_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SUDO_SSH_KEY")]
    pub key: Option<PathBuf>,

    /// Pinned server key fingerprint (SHA256:...)
    #[arg(long, env = "SUDO_SSH_HOST_FINGERPRINT")]
    pub host_fingerprint: Option<String>,

    /// Password answered to sudo prompts (defaults to --password)
    #[arg(long, env = "SUDO_SSH_SUDO_PASSWORD")]
    pub sudo_password: Option<String>,

    /// User commands run as by default
    #[arg(long, env = "SUDO_SSH_OWNER")]
    pub owner: Option<String>,

    /// Group commands run with by default
    #[arg(long, env = "SUDO_SSH_GROUP")]
    pub group: Option<String>,

    /// Name of the deployment-environment variable exported to every command
    #[arg(long, default_value = DEFAULT_DEPLOY_ENV_VAR, env = "SUDO_SSH_DEPLOY_ENV_VAR")]
    pub deploy_env_var: String,

    /// Value of the deployment-environment variable
    #[arg(long, env = "SUDO_SSH_DEPLOY_ENV")]
    pub deploy_env: Option<String>,

    /// Append every executed command to this file
    #[arg(long, env = "SUDO_SSH_COMMANDS_LOG")]
    pub commands_log: Option<PathBuf>,

    /// Command timeout in milliseconds (0 = none)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, env = "SUDO_SSH_TIMEOUT")]
    pub timeout: u64,

    /// Print the result as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,

    #[command(subcommand)]
    pub action: Action,
}

/// What to do on the remote host
#[derive(Subcommand, Debug, Clone)]
pub enum Action {
    /// Run a command, streaming its output to the log
    Exec(CommandArgs),

    /// Run a command and print its stdout, sudo prompts removed
    Capture(CommandArgs),
}

/// Arguments shared by command-running subcommands
#[derive(ClapArgs, Debug, Clone)]
pub struct CommandArgs {
    /// Run as this user instead of the owner
    #[arg(long = "as")]
    pub as_user: Option<String>,

    /// Working directory on the remote host
    #[arg(long)]
    pub within: Option<String>,

    /// Extra environment variable, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Command and arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Settings shared by every session of a backend.
///
/// Built once per process (or per test) and passed to
/// [`SudoBackend`](crate::backend::SudoBackend); there is no global state.
#[derive(Clone)]
pub struct BackendConfig {
    /// Default elevation target
    pub owner: Option<String>,

    /// Default group
    pub group: Option<String>,

    /// Password answered to sudo prompts, shared by all hosts
    pub sudo_password: String,

    /// Name of the deployment-environment variable
    pub deploy_env_var: String,

    /// Value of the deployment-environment variable; not exported when unset
    pub deploy_env: Option<String>,

    /// Raw command audit log
    pub commands_log: Option<PathBuf>,

    /// Per-command timeout
    pub timeout: Option<Duration>,
}

impl BackendConfig {
    pub fn new(sudo_password: impl Into<String>) -> Self {
        Self {
            owner: None,
            group: None,
            sudo_password: sudo_password.into(),
            deploy_env_var: DEFAULT_DEPLOY_ENV_VAR.to_string(),
            deploy_env: None,
            commands_log: None,
            timeout: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_deploy_env(mut self, value: impl Into<String>) -> Self {
        self.deploy_env = Some(value.into());
        self
    }

    pub fn with_deploy_env_var(mut self, name: impl Into<String>) -> Self {
        self.deploy_env_var = name.into();
        self
    }

    pub fn with_commands_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.commands_log = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("owner", &self.owner)
            .field("group", &self.group)
            .field("sudo_password", &"<redacted>")
            .field("deploy_env_var", &self.deploy_env_var)
            .field("deploy_env", &self.deploy_env)
            .field("commands_log", &self.commands_log)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SSH connection parameters
    pub ssh: SshConfig,

    /// Backend settings
    pub backend: BackendConfig,

    /// Print results as JSON
    pub json: bool,

    /// Requested action
    pub action: Action,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let password = sanitize_password(args.password.as_deref());
        let sudo_password = sanitize_password(args.sudo_password.as_deref())
            .or_else(|| password.clone())
            .ok_or_else(|| {
                SudoSshError::config("Must provide --sudo-password (or --password to reuse)")
            })?;

        if !is_valid_password(&sudo_password) {
            return Err(SudoSshError::config(
                "sudo password cannot contain newlines or null bytes",
            ));
        }

        let mut ssh = SshConfig::new(&args.host, &args.user).with_port(args.port);
        if let Some(password) = &password {
            ssh = ssh.with_password(password);
        }
        if let Some(key_path) = &args.key {
            let key_content = std::fs::read_to_string(key_path)?;
            ssh = ssh.with_private_key(key_content);
        }
        if let Some(fingerprint) = args.host_fingerprint {
            ssh = ssh.with_host_fingerprint(fingerprint);
        }

        let backend = BackendConfig {
            owner: args.owner,
            group: args.group,
            sudo_password,
            deploy_env_var: args.deploy_env_var,
            deploy_env: args.deploy_env,
            commands_log: args.commands_log,
            timeout: parse_timeout(args.timeout),
        };

        Ok(Config {
            ssh,
            backend,
            json: args.json,
            action: args.action,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.is_empty() {
        errors.push("Missing required --host".to_string());
    }

    if args.user.is_empty() {
        errors.push("Missing required --user".to_string());
    }

    if args.password.is_none() && args.key.is_none() {
        errors.push("Must provide either --password or --key".to_string());
    }

    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.deploy_env_var.trim().is_empty() {
        errors.push("--deploy-env-var cannot be empty".to_string());
    }

    if !errors.is_empty() {
        return Err(SudoSshError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Parse the timeout argument: 0 disables the timeout
pub fn parse_timeout(timeout_ms: u64) -> Option<Duration> {
    (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms))
}

/// Parse a `KEY=VALUE` pair
pub fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;

    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid environment variable name '{}'", key));
    }

    Ok((key.to_string(), value.to_string()))
}
