//! Remote command model
//!
//! Provides the immutable [`Command`] value, its [`CommandBuilder`], and the
//! [`CommandOutput`] returned by a finished session.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::elevation::{wrap_group_command, wrap_sudo_command};
use super::sanitize::sanitize_args;
use crate::error::Result;

/// A command ready to be submitted to a session.
///
/// Built through [`CommandBuilder`]; there are no setters, so a command cannot
/// change after it has been handed to a session. The environment is a
/// `BTreeMap`, which keeps serialization sorted by key and therefore
/// independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<String>,
    pwd: Option<String>,
    env: BTreeMap<String, String>,
    user: Option<String>,
    group: Option<String>,
    host: String,
}

impl Command {
    /// Start building a command from an argument vector
    pub fn builder<I, S>(args: I) -> CommandBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandBuilder::new(args)
    }

    /// Argument vector (program first)
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if any
    pub fn pwd(&self) -> Option<&str> {
        self.pwd.as_deref()
    }

    /// Environment mapping
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Elevation target user, if any
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Elevation target group, if any
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Host the command is meant for
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Serialize the environment as `KEY="value"` assignments.
    ///
    /// Double quotes in values are backslash-escaped.
    pub fn environment_string(&self) -> String {
        self.env
            .iter()
            .map(|(key, value)| {
                format!("{}=\"{}\"", key, value.replace('"', "\\\""))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Compose the final command text submitted to the channel.
    ///
    /// Wrapping, innermost first:
    /// 1. `sg <group> -c '...'` when a group is set
    /// 2. `sudo -u <user> ENV... -- sh -c '...'` when a user is set
    /// 3. `( export ENV... ; ... )` when no user is set and the env is non-empty
    /// 4. `cd <pwd> && ...` when a working directory is set
    pub fn to_command_string(&self) -> String {
        let mut command = self.args.join(" ");

        if let Some(group) = &self.group {
            command = wrap_group_command(&command, group);
        }

        let env_string = self.environment_string();

        match &self.user {
            Some(user) => {
                command = wrap_sudo_command(&command, user, &env_string);
            }
            None if !env_string.is_empty() => {
                command = format!("( export {} ; {} )", env_string, command);
            }
            None => {}
        }

        if let Some(pwd) = &self.pwd {
            command = format!("cd {} && {}", pwd, command);
        }

        command
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}

/// Builder for [`Command`]
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    args: Vec<String>,
    pwd: Option<String>,
    env: BTreeMap<String, String>,
    user: Option<String>,
    group: Option<String>,
    host: String,
}

impl CommandBuilder {
    /// Create a builder from an argument vector
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Run inside `pwd`
    pub fn within(mut self, pwd: impl Into<String>) -> Self {
        self.pwd = Some(pwd.into());
        self
    }

    /// Add a single environment variable. Keys are stored upper-cased, so
    /// `user` and `USER` name the same variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into().to_uppercase(), value.into());
        self
    }

    /// Merge an environment mapping; later values win
    pub fn env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(
            env.into_iter()
                .map(|(k, v)| (k.into().to_uppercase(), v.into())),
        );
        self
    }

    /// Elevate to `user`
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Run with `group` as effective group
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Target host identifier
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Validate and freeze the command.
    ///
    /// Fails with `InvalidCommand` if the argument vector is empty or the
    /// program name is blank.
    pub fn build(self) -> Result<Command> {
        let args = sanitize_args(self.args)?;

        Ok(Command {
            args,
            pwd: self.pwd,
            env: self.env,
            user: self.user,
            group: self.group,
            host: self.host,
        })
    }
}

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (if available)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}
