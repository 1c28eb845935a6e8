//! Privilege elevation utilities for SSH command execution
//!
//! This module provides utilities for:
//! - Resolving the elevation target (user, group, home directory)
//! - Wrapping commands with `sudo -u` and `sg`
//! - Escaping payloads for single-quoted shell contexts
//!
//! The interactive password exchange itself lives in
//! [`interaction`](super::interaction); commands built here never carry the
//! password.

use std::collections::BTreeMap;

/// The user/group a command is elevated to.
///
/// `sudo -u <user>` runs a non-login shell, so the target's `USER` and `HOME`
/// are not picked up from the remote side. [`ElevationTarget::env`] returns the
/// variables that must be exported explicitly for user/home-dependent logic to
/// resolve against the target instead of the SSH identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationTarget {
    /// Target user for `sudo -u`
    pub user: String,

    /// Optional target group for `sg`
    pub group: Option<String>,

    /// Home directory of the target user
    pub home: String,
}

impl ElevationTarget {
    /// Create a target for `user`, deriving the home directory.
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        let home = home_dir_for(&user);
        Self {
            user,
            group: None,
            home,
        }
    }

    /// Set the target group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Variables to merge into the command environment.
    pub fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("user".to_string(), self.user.clone()),
            ("home".to_string(), self.home.clone()),
        ])
    }
}

/// Home directory convention for a remote user.
///
/// # Examples
///
/// ```
/// use sudo_ssh::ssh::elevation::home_dir_for;
///
/// assert_eq!(home_dir_for("root"), "/root");
/// assert_eq!(home_dir_for("deploy"), "/home/deploy");
/// ```
pub fn home_dir_for(user: &str) -> String {
    if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", user)
    }
}

/// Wraps a command for execution as another user via sudo.
///
/// `env_string` holds pre-serialized `KEY="value"` assignments which sudo
/// applies to the elevated process. sudo prompts interactively for the
/// password; the prompt is answered over the channel, not on the command line.
///
/// # Examples
///
/// ```
/// use sudo_ssh::ssh::elevation::wrap_sudo_command;
///
/// let cmd = wrap_sudo_command("whoami", "deploy", "");
/// assert_eq!(cmd, "sudo -u deploy -- sh -c 'whoami'");
///
/// let cmd = wrap_sudo_command("whoami", "deploy", "USER=\"deploy\"");
/// assert_eq!(cmd, "sudo -u deploy USER=\"deploy\" -- sh -c 'whoami'");
/// ```
pub fn wrap_sudo_command(command: &str, user: &str, env_string: &str) -> String {
    let escaped_command = escape_for_shell(command);

    if env_string.is_empty() {
        format!("sudo -u {} -- sh -c '{}'", user, escaped_command)
    } else {
        format!(
            "sudo -u {} {} -- sh -c '{}'",
            user, env_string, escaped_command
        )
    }
}

/// Wraps a command to run with `group` as the effective group via `sg`.
///
/// ```
/// use sudo_ssh::ssh::elevation::wrap_group_command;
///
/// assert_eq!(wrap_group_command("touch f", "www-data"), "sg www-data -c 'touch f'");
/// ```
pub fn wrap_group_command(command: &str, group: &str) -> String {
    format!("sg {} -c '{}'", group, escape_for_shell(command))
}

/// Escapes a string for safe use in single-quoted shell contexts.
///
/// Replaces single quotes with the pattern `'"'"'` which:
/// 1. Ends the current single-quoted string
/// 2. Adds a literal single quote via double quotes
/// 3. Starts a new single-quoted string
///
/// # Examples
///
/// ```
/// use sudo_ssh::ssh::elevation::escape_for_shell;
///
/// assert_eq!(escape_for_shell("hello"), "hello");
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

/// Checks if a password is usable for answering a sudo prompt.
///
/// A valid password is not blank and contains no newline or null byte, since
/// the prompt reads exactly one line.
pub fn is_valid_password(password: &str) -> bool {
    !password.trim().is_empty() && !password.contains(['\0', '\n', '\r'])
}

/// Sanitizes a password: returns `None` if it is empty or only whitespace.
///
/// Surrounding whitespace is kept, since it may be part of the secret.
pub fn sanitize_password(password: Option<&str>) -> Option<String> {
    password
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_dir_for_root() {
        assert_eq!(home_dir_for("root"), "/root");
    }

    #[test]
    fn test_home_dir_for_regular_user() {
        assert_eq!(home_dir_for("deploy"), "/home/deploy");
    }

    #[test]
    fn test_elevation_target_env() {
        let target = ElevationTarget::new("deploy");
        let env = target.env();
        assert_eq!(env.get("user").map(String::as_str), Some("deploy"));
        assert_eq!(env.get("home").map(String::as_str), Some("/home/deploy"));
    }

    #[test]
    fn test_elevation_target_with_group() {
        let target = ElevationTarget::new("app").with_group("www-data");
        assert_eq!(target.home, "/home/app");
        assert_eq!(target.group.as_deref(), Some("www-data"));
    }

    #[test]
    fn test_wrap_sudo_command_without_env() {
        let result = wrap_sudo_command("apt update", "root", "");
        assert_eq!(result, "sudo -u root -- sh -c 'apt update'");
    }

    #[test]
    fn test_wrap_sudo_command_with_env() {
        let result = wrap_sudo_command("ls", "deploy", "HOME=\"/home/deploy\"");
        assert_eq!(
            result,
            "sudo -u deploy HOME=\"/home/deploy\" -- sh -c 'ls'"
        );
    }

    #[test]
    fn test_wrap_sudo_command_with_quotes_in_command() {
        let result = wrap_sudo_command("echo 'hello world'", "root", "");
        assert_eq!(
            result,
            "sudo -u root -- sh -c 'echo '\"'\"'hello world'\"'\"''"
        );
    }

    #[test]
    fn test_wrap_group_command_escapes() {
        assert_eq!(
            wrap_group_command("echo 'x'", "staff"),
            "sg staff -c 'echo '\"'\"'x'\"'\"''"
        );
    }

    #[test]
    fn test_escape_for_shell_multiple_quotes() {
        assert_eq!(
            escape_for_shell("'a' and 'b'"),
            "'\"'\"'a'\"'\"' and '\"'\"'b'\"'\"'"
        );
    }

    #[test]
    fn test_is_valid_password() {
        assert!(is_valid_password("secret123"));
        assert!(is_valid_password("with spaces"));
        assert!(!is_valid_password(""));
        assert!(!is_valid_password("   "));
        assert!(!is_valid_password("has\0null"));
        assert!(!is_valid_password("two\nlines"));
    }

    #[test]
    fn test_sanitize_password() {
        assert_eq!(sanitize_password(Some("secret")), Some("secret".to_string()));
        assert_eq!(
            sanitize_password(Some(" padded ")),
            Some(" padded ".to_string())
        );
        assert_eq!(sanitize_password(Some("   ")), None);
        assert_eq!(sanitize_password(None), None);
    }
}
