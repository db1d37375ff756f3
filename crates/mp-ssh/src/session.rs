//! russh-backed implementation of [`CommandRunner`]
//!
//! Sessions are established per command: the Conduits being provisioned
//! are small embedded boxes on a flat LAN, each seeing at most a dozen
//! commands per run, and a fresh session per command keeps the failure
//! model simple (any transport problem maps to exactly one failed
//! operation).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config};
use russh::ChannelMsg;

use mp_core::shell;

use crate::command::{CommandOutput, CommandRunner, SshError};

/// How to authenticate to the remote host.
#[derive(Debug, Clone)]
pub enum Auth {
    /// Password login; the same password is fed to sudo for privileged
    /// commands (mLinux Conduits).
    Password(String),
    /// Private key file; privileged commands use passwordless sudo
    /// (jumphost provisioning accounts).
    KeyFile(PathBuf),
}

/// Connects to one host and runs commands over SSH.
pub struct SshConnector {
    host: String,
    port: u16,
    username: String,
    auth: Auth,
    connect_timeout: Duration,
    command_timeout: Duration,
    dry_run: bool,
    target: String,
}

impl SshConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: Auth,
        connect_timeout: Duration,
        command_timeout: Duration,
        dry_run: bool,
    ) -> Self {
        let host = host.into();
        let target = format!("{}:{}", host, port);
        Self {
            host,
            port,
            username: username.into(),
            auth,
            connect_timeout,
            command_timeout,
            dry_run,
            target,
        }
    }

    /// Open a session and authenticate.
    async fn connect(&self) -> Result<client::Handle<AcceptingHandler>, SshError> {
        let config = Arc::new(Config::default());
        let handler = AcceptingHandler;

        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, (self.host.as_str(), self.port), handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.target.clone()))?
        .map_err(|e| SshError::Connect {
            host: self.target.clone(),
            message: e.to_string(),
        })?;

        let authenticated = match &self.auth {
            Auth::Password(password) => session
                .authenticate_password(&self.username, password)
                .await
                .map_err(|e| SshError::Connect {
                    host: self.target.clone(),
                    message: e.to_string(),
                })?,
            Auth::KeyFile(path) => {
                let key = russh_keys::load_secret_key(path, None).map_err(|e| {
                    SshError::Connect {
                        host: self.target.clone(),
                        message: format!("failed to load key {}: {}", path.display(), e),
                    }
                })?;
                session
                    .authenticate_publickey(&self.username, Arc::new(key))
                    .await
                    .map_err(|e| SshError::Connect {
                        host: self.target.clone(),
                        message: e.to_string(),
                    })?
            }
        };

        if !authenticated {
            return Err(SshError::AuthRejected {
                host: self.target.clone(),
                username: self.username.clone(),
            });
        }

        Ok(session)
    }

    /// Exec one command, optionally feeding stdin, and collect the
    /// normalized output.
    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, SshError> {
        let session = self.connect().await?;

        let mut channel =
            session
                .channel_open_session()
                .await
                .map_err(|e| SshError::Channel {
                    host: self.target.clone(),
                    message: e.to_string(),
                })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel {
                host: self.target.clone(),
                message: e.to_string(),
            })?;

        if let Some(data) = stdin {
            channel.data(data).await.map_err(|e| SshError::Channel {
                host: self.target.clone(),
                message: e.to_string(),
            })?;
            channel.eof().await.map_err(|e| SshError::Channel {
                host: self.target.clone(),
                message: e.to_string(),
            })?;
        }

        let mut output = CommandOutput::default();
        let collect = async {
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => {
                        output.stdout.push_str(&String::from_utf8_lossy(data));
                    }
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                        output.stderr.push_str(&String::from_utf8_lossy(data));
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        output.exit_code = Some(exit_status as i32);
                    }
                    _ => {}
                }
            }
        };

        tokio::time::timeout(self.command_timeout, collect)
            .await
            .map_err(|_| SshError::Timeout(self.target.clone()))?;

        let _ = session
            .disconnect(russh::Disconnect::ByApplication, "done", "en")
            .await;

        tracing::debug!(
            target = %self.target,
            command,
            exit = ?output.exit_code,
            "remote command finished"
        );
        Ok(output)
    }
}

#[async_trait]
impl CommandRunner for SshConnector {
    async fn ping(&self) -> bool {
        match self.exec("echo ping", None).await {
            Ok(out) => out.ok(),
            Err(e) => {
                tracing::debug!(target = %self.target, error = %e, "ping failed");
                false
            }
        }
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.exec(command, None).await
    }

    async fn run_privileged(&self, command: &str) -> Result<CommandOutput, SshError> {
        if self.dry_run {
            tracing::info!(target = %self.target, command, "dry-run: would run privileged command");
            return Ok(CommandOutput::success(""));
        }

        match &self.auth {
            Auth::Password(password) => {
                // sudo reads the password from stdin; -p '' keeps the
                // prompt out of stderr.
                let wrapped = format!("sudo -S -p '' -- sh -c {}", shell::quote(command));
                let stdin = format!("{}\n", password);
                self.exec(&wrapped, Some(stdin.as_bytes())).await
            }
            Auth::KeyFile(_) => {
                let wrapped = format!("sudo -n -- sh -c {}", shell::quote(command));
                self.exec(&wrapped, None).await
            }
        }
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Client handler that accepts any server host key.
///
/// Provisioning runs on an isolated commissioning LAN against
/// factory-fresh devices whose host keys are being harvested by this very
/// tool, so there is nothing to verify against yet.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_skips_privileged_execution() {
        // unroutable host: any real connection attempt would fail, so a
        // successful result proves nothing was executed
        let connector = SshConnector::new(
            "192.0.2.1",
            22,
            "mtadm",
            Auth::Password("secret".to_string()),
            Duration::from_millis(10),
            Duration::from_millis(10),
            true,
        );
        let out = connector
            .run_privileged("rm -rf /var/config")
            .await
            .unwrap();
        assert!(out.ok());
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn test_target_includes_port() {
        let connector = SshConnector::new(
            "10.0.0.7",
            2222,
            "mtadm",
            Auth::Password("secret".to_string()),
            Duration::from_secs(1),
            Duration::from_secs(1),
            false,
        );
        assert_eq!(connector.target(), "10.0.0.7:2222");
    }
}
