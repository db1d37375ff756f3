//! The command execution contract
//!
//! The engine never raises on an ordinary remote failure: a command that
//! exits nonzero is an `Ok` [`CommandOutput`] whose `ok()` is false. Only
//! transport failures (connect, auth, channel) surface as [`SshError`],
//! and the engine folds even those into per-operation booleans.

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level errors. Remote command failure is NOT an error; it is
/// a [`CommandOutput`] with a nonzero exit code.
#[derive(Error, Debug)]
pub enum SshError {
    /// Could not establish a TCP/SSH session
    #[error("Connection to {host} failed: {message}")]
    Connect { host: String, message: String },

    /// Authentication rejected
    #[error("Authentication as {username} rejected by {host}")]
    AuthRejected { host: String, username: String },

    /// Connect or command deadline exceeded
    #[error("Timed out talking to {0}")]
    Timeout(String),

    /// Channel-level failure mid-command
    #[error("Channel error on {host}: {message}")]
    Channel { host: String, message: String },
}

/// Normalized result of one remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Remote exit status; None if the channel closed without reporting one
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// True iff the remote command reported exit status 0.
    pub fn ok(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// First line of stdout, trimmed. None if stdout is blank.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }

    /// A successful output with the given stdout, for dry runs and tests.
    pub fn success(stdout: &str) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Runs commands on one remote host.
///
/// Implementations connect per command with a bounded timeout; there is
/// no retry logic here or anywhere above, because every remote mutation
/// in this tool is idempotent and the tool is meant to be re-run.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// True iff a no-op command completes over a fresh session.
    async fn ping(&self) -> bool;

    /// Run a command as the login user.
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Run a command with elevated privilege. In dry-run mode this logs
    /// the intended command and reports success without executing.
    async fn run_privileged(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Host identity for log context.
    fn target(&self) -> &str;
}
