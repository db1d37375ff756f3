//! The jumphost and its account namespace
//!
//! A jumphost owns one namespace of OS groups, user accounts, and
//! per-user `authorized_keys` files, and every gateway in the fleet
//! contends for it. All operations here are idempotent: re-running a
//! completed allocation changes nothing, and an account that already
//! exists with a different UID than requested is a conflict, never
//! silently adopted.
//!
//! Namespace-mutating operations (groupadd, useradd, key installation)
//! must not run concurrently against the same jumphost; the driver
//! processes gateways strictly in sequence for this reason. Read-only
//! queries are safe at any time.

use std::sync::Arc;

use mp_core::settings::JumphostAttributes;
use mp_core::shell::{self, RemoteCommand};
use mp_ssh::CommandRunner;

pub struct Jumphost {
    attrs: JumphostAttributes,
    runner: Arc<dyn CommandRunner>,
}

impl Jumphost {
    pub fn new(attrs: JumphostAttributes, runner: Arc<dyn CommandRunner>) -> Self {
        Self { attrs, runner }
    }

    pub fn hostname(&self) -> &str {
        &self.attrs.hostname
    }

    pub fn first_uid(&self) -> u32 {
        self.attrs.first_uid
    }

    pub fn first_keepalive(&self) -> u16 {
        self.attrs.first_keepalive
    }

    pub async fn is_reachable(&self) -> bool {
        self.runner.ping().await
    }

    /// Look up one entry in a remote directory-service database.
    ///
    /// Returns the first non-blank line of output. Empty output and a
    /// nonzero exit both mean "does not exist" (None); neither is an
    /// error, because getent legitimately reports absence via exit code 2.
    pub async fn query_getent(&self, dbname: &str, entryname: &str) -> Option<String> {
        let command = RemoteCommand::new("getent")
            .arg(dbname)
            .arg(entryname)
            .into_string();
        let answer = match self.runner.run(&command).await {
            Ok(a) => a,
            Err(e) => {
                tracing::debug!(jumphost = %self.attrs.hostname, dbname, error = %e, "getent failed completely");
                return None;
            }
        };

        if !answer.ok() {
            tracing::debug!(
                dbname,
                entryname,
                exit = ?answer.exit_code,
                "doesn't exist: getent exit status"
            );
            return None;
        }
        match answer.first_line() {
            Some(line) => {
                tracing::debug!(dbname, entryname, value = line, "exists");
                Some(line.to_string())
            }
            None => {
                tracing::debug!(dbname, entryname, "doesn't exist: empty response");
                None
            }
        }
    }

    pub async fn group_exists(&self, groupname: &str) -> bool {
        self.query_getent("group", groupname).await.is_some()
    }

    /// Create the gateway group if it is missing. Idempotent; a failed
    /// create is reported but does not crash the run.
    pub async fn ensure_group(&self, groupname: &str) -> bool {
        if self.group_exists(groupname).await {
            return true;
        }

        let command = RemoteCommand::new("groupadd").arg(groupname).into_string();
        let answer = match self.runner.run_privileged(&command).await {
            Ok(a) => a,
            Err(_) => return false,
        };
        if answer.ok() {
            tracing::info!(jumphost = %self.attrs.hostname, group = groupname, "created group");
            true
        } else {
            tracing::error!(
                jumphost = %self.attrs.hostname,
                group = groupname,
                stderr = %answer.stderr.trim(),
                "groupadd failed"
            );
            false
        }
    }

    /// The UID of an existing gateway account, from the third field of
    /// its passwd entry. Unparseable entries are logged and treated as
    /// absent.
    pub async fn query_user_uid(&self, gateway_id: &str) -> Option<u32> {
        let entry = self.query_getent("passwd", gateway_id).await?;
        match entry.split(':').nth(2).and_then(|f| f.parse::<u32>().ok()) {
            Some(uid) => Some(uid),
            None => {
                tracing::error!(
                    jumphost = %self.attrs.hostname,
                    gateway_id,
                    entry,
                    "couldn't parse uid from passwd entry"
                );
                None
            }
        }
    }

    /// The home directory of an existing gateway account.
    async fn query_user_home(&self, gateway_id: &str) -> Option<String> {
        let entry = self.query_getent("passwd", gateway_id).await?;
        entry.split(':').nth(5).map(|h| h.to_string())
    }

    /// Create the gateway's account, or reconcile against one that
    /// already exists.
    ///
    /// - existing account whose UID matches `desired_uid` (or no desired
    ///   UID given): returns the existing UID, issues no mutation;
    /// - existing account with a different UID: conflict, returns None,
    ///   issues no mutation;
    /// - absent: creates it constrained to this jumphost's UID floor and
    ///   re-queries for the authoritative UID.
    pub async fn create_or_reconcile_user(
        &self,
        desired_uid: Option<u32>,
        gateway_name: &str,
        gateway_id: &str,
        gateway_groupname: &str,
    ) -> Option<u32> {
        if let Some(current_uid) = self.query_user_uid(gateway_id).await {
            if let Some(desired) = desired_uid {
                if desired != current_uid {
                    tracing::error!(
                        jumphost = %self.attrs.hostname,
                        gateway_id,
                        current_uid,
                        desired_uid = desired,
                        "uid conflict"
                    );
                    return None;
                }
            }
            tracing::info!(
                jumphost = %self.attrs.hostname,
                gateway_id,
                uid = current_uid,
                "already exists"
            );
            return Some(current_uid);
        }

        let mut command = RemoteCommand::new("useradd")
            .flag("--comment")
            .arg(gateway_name)
            .flag("--password")
            .arg("*")
            .flag("--gid")
            .arg(gateway_groupname)
            .flag("--no-user-group")
            .flag("--create-home")
            .flag("--key")
            .arg(&format!("UID_MIN={}", self.attrs.first_uid));
        if let Some(uid) = desired_uid {
            command = command.flag("-u").arg(&uid.to_string());
        }
        let command = command.arg(gateway_id).into_string();

        let answer = match self.runner.run_privileged(&command).await {
            Ok(a) => a,
            Err(_) => return None,
        };
        if !answer.ok() {
            tracing::error!(
                jumphost = %self.attrs.hostname,
                gateway_id,
                stderr = %answer.stderr.trim(),
                "useradd failed"
            );
            return None;
        }

        // re-query: useradd picked the UID, the passwd entry is the truth
        let created_uid = self.query_user_uid(gateway_id).await;
        tracing::info!(
            jumphost = %self.attrs.hostname,
            gateway_id,
            uid = ?created_uid,
            "created"
        );
        created_uid
    }

    /// Idempotently install public keys into the gateway account's
    /// `authorized_keys` on this jumphost. Every step failure aborts.
    pub async fn ensure_ssh_authorization(
        &self,
        keys: &[String],
        username: &str,
        groupname: &str,
    ) -> bool {
        let Some(home) = self.query_user_home(username).await else {
            tracing::error!(
                jumphost = %self.attrs.hostname,
                username,
                "no home directory in passwd entry"
            );
            return false;
        };

        let ssh_dir = format!("{}/.ssh", home);
        let auth_keys = format!("{}/authorized_keys", ssh_dir);
        let owner = format!("{}:{}", username, groupname);

        let steps = [
            format!("mkdir -p -m 700 {}", shell::quote(&ssh_dir)),
            format!("chown {} {}", shell::quote(&owner), shell::quote(&ssh_dir)),
            format!("touch {}", shell::quote(&auth_keys)),
            format!("chmod 600 {}", shell::quote(&auth_keys)),
            format!("chown {} {}", shell::quote(&owner), shell::quote(&auth_keys)),
            RemoteCommand::sh(&format!(
                "printf '%s\\n' {} >>{}",
                shell::join(keys),
                shell::quote(&auth_keys)
            ))
            .into_string(),
            format!(
                "sort -u -o {} {}",
                shell::quote(&auth_keys),
                shell::quote(&auth_keys)
            ),
        ];

        for step in &steps {
            let ok = match self.runner.run_privileged(step).await {
                Ok(answer) => answer.ok(),
                Err(_) => false,
            };
            if !ok {
                tracing::error!(
                    jumphost = %self.attrs.hostname,
                    username,
                    command = %step,
                    "ssh authorization step failed"
                );
                return false;
            }
        }
        true
    }
}
