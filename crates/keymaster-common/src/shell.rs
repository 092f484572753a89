//! Shell command execution utilities.
//!
//! Commands run through `/bin/sh -c` with every variable argument passed
//! through [`shellquote`]. Secrets (private and preshared keys, UCI batch
//! scripts that contain them) never go on the command line: use
//! [`exec_with_input`] to hand them to the child on stdin.
//!
//! # Example
//!
//! ```ignore
//! use keymaster_common::shell::{self, WG_CMD, shellquote};
//!
//! let cmd = format!("{} set {} private-key /dev/stdin", WG_CMD, shellquote("wg0"));
//! shell::exec_with_input(&cmd, &private_key.to_base64()).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{KeymasterError, KeymasterResult};

/// Path to the `ip` command for link and address configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `wg` command for WireGuard device configuration.
pub const WG_CMD: &str = "/usr/bin/wg";

/// Path to OpenWrt's `uci` configuration tool.
pub const UCI_CMD: &str = "/sbin/uci";

/// Path to OpenWrt's `ifup` helper.
pub const IFUP_CMD: &str = "/sbin/ifup";

/// Path to OpenWrt's `ifdown` helper.
pub const IFDOWN_CMD: &str = "/sbin/ifdown";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes `$`, `` ` ``, `"`, `\`
/// and newline.
///
/// ```
/// use keymaster_common::shell::shellquote;
///
/// assert_eq!(shellquote("wg0"), "\"wg0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    fn into_checked(self, cmd: &str) -> KeymasterResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(KeymasterError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }
}

/// Executes a shell command asynchronously.
///
/// Returns `Err` only if the command could not be spawned; a non-zero exit
/// is reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> KeymasterResult<ExecResult> {
    run(cmd, None).await
}

/// Executes a shell command, writing `input` to its stdin.
///
/// `input` is never logged.
pub async fn exec_with_input(cmd: &str, input: &str) -> KeymasterResult<ExecResult> {
    run(cmd, Some(input)).await
}

/// Executes a shell command and fails on non-zero exit, returning stdout.
pub async fn exec_or_throw(cmd: &str) -> KeymasterResult<String> {
    exec(cmd).await?.into_checked(cmd)
}

/// [`exec_with_input`] that fails on non-zero exit, returning stdout.
pub async fn exec_with_input_or_throw(cmd: &str, input: &str) -> KeymasterResult<String> {
    exec_with_input(cmd, input).await?.into_checked(cmd)
}

async fn run(cmd: &str, input: Option<&str>) -> KeymasterResult<ExecResult> {
    tracing::debug!(command = %cmd, stdin = input.is_some(), "Executing shell command");

    let spawn_err = |e: std::io::Error| KeymasterError::ShellExec {
        command: cmd.to_string(),
        source: e,
    };

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(input.as_bytes()).await.map_err(spawn_err)?;
        // dropping stdin closes the pipe so the child sees EOF
        drop(stdin);
    }

    let output = child.wait_with_output().await.map_err(spawn_err)?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("wg0"), "\"wg0\"");
        assert_eq!(shellquote("51820"), "\"51820\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let result = exec("exit 42").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_exec_with_input_reaches_stdin() {
        let output = exec_with_input_or_throw("cat", "secret-material\n")
            .await
            .unwrap();
        assert_eq!(output, "secret-material");
    }

    #[tokio::test]
    async fn test_exec_without_input_sees_eof() {
        let output = exec_or_throw("cat").await.unwrap();
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("exit 1").await {
            Err(KeymasterError::ShellCommandFailed { exit_code, .. }) => {
                assert_eq!(exit_code, 1);
            }
            other => panic!("Expected ShellCommandFailed error, got {:?}", other),
        }
    }
}
