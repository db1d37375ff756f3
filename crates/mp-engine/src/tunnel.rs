//! Reverse-tunnel installation on a Conduit
//!
//! Runs the ordered sequence of privileged filesystem and service
//! operations that leaves a gateway with a persistent autossh reverse
//! tunnel to its jumphost. The sequence is fail-fast: the first step
//! that fails stops everything, the device stays partially configured,
//! and a re-run converges because every step is idempotent.

use mp_core::constants::{
    HOST_PRIVKEY_PATH, HOST_PUBKEY_PATH, NTP_SERVER, PERSISTENT_HOME, ROOT_HOME,
    TUNNEL_DEFAULTS_PATH, TUNNEL_SCRIPT_PATH,
};
use mp_core::shell::{self, RemoteCommand};
use mp_ssh::CommandRunner;

use crate::conduit::Conduit;
use crate::jumphost::Jumphost;

/// Install the reverse-SSH tunnel service on one gateway.
///
/// Requires the gateway's hostname to be derived and its jumphost UID
/// assigned; returns false immediately if any remote step fails.
pub async fn provision_tunnel(
    conduit: &Conduit,
    jumphost: &Jumphost,
    authorized_keys: &[String],
    tunnel_script: &[String],
) -> bool {
    let (Some(hostname), Some(reverse_port), Some(keepalive_port)) = (
        conduit.hostname.as_deref(),
        conduit.reverse_port(jumphost),
        conduit.keepalive_port(jumphost),
    ) else {
        tracing::error!(mac = %conduit.mac, "tunnel setup requires hostname and assigned uid");
        return false;
    };
    let runner = conduit.runner();

    // 1. valid clock first: ssh to the jumphost needs sane time
    if !sudo_ok(runner, conduit, &format!("ntpdate -ub {}", NTP_SERVER)).await {
        return false;
    }

    // 2. persistent tree that survives factory reset / firmware update
    let var_root = format!("{}/root", PERSISTENT_HOME);
    let var_ssh = format!("{}/.ssh", var_root);
    if !mkdir(runner, conduit, PERSISTENT_HOME, "755").await {
        return false;
    }
    if !mkdir(runner, conduit, &var_root, "700").await {
        return false;
    }
    if !mkdir(runner, conduit, &var_ssh, "700").await {
        return false;
    }

    // 3. migrate or initialize the persistent authorized_keys
    let var_auth_keys = format!("{}/authorized_keys", var_ssh);
    let root_ssh = format!("{}/.ssh", ROOT_HOME);
    let root_auth_keys = format!("{}/authorized_keys", root_ssh);
    if !sudo_test(runner, &format!("test -f {}", var_auth_keys)).await {
        if sudo_test(runner, &format!("test -f {}", root_auth_keys)).await {
            let seed = RemoteCommand::sh(&format!("cat {} >{}", root_auth_keys, var_auth_keys));
            if !sudo_ok(runner, conduit, seed.as_str()).await {
                return false;
            }
        } else if !sudo_ok(runner, conduit, &format!("touch {}", var_auth_keys)).await {
            return false;
        }
        if !sudo_ok(runner, conduit, &format!("chmod 700 {}", var_auth_keys)).await {
            return false;
        }
    }

    // 4. idempotent union of the fleet's standard keys
    if !append_lines(runner, conduit, &var_auth_keys, authorized_keys).await {
        return false;
    }
    if !sudo_ok(
        runner,
        conduit,
        &format!("sort -u -o {} {}", var_auth_keys, var_auth_keys),
    )
    .await
    {
        return false;
    }

    // 5. make ~root/.ssh point at the persistent tree
    //    no .ssh        -> link it
    //    .ssh, not link -> move it aside, then link
    //    .ssh, a link   -> relink (no-op in effect)
    if !sudo_test(runner, &format!("test -d {}", root_ssh)).await {
        if !sudo_ok(runner, conduit, &format!("ln -fs {} {}", var_ssh, ROOT_HOME)).await {
            return false;
        }
    } else if !sudo_test(runner, &format!("test -L {}", root_ssh)).await {
        if !sudo_ok(
            runner,
            conduit,
            &format!("mv {} {}/.ssh_old", root_ssh, ROOT_HOME),
        )
        .await
        {
            return false;
        }
        if !sudo_ok(runner, conduit, &format!("ln -s {} {}", var_ssh, ROOT_HOME)).await {
            return false;
        }
    } else if !sudo_ok(runner, conduit, &format!("ln -fs {} {}", var_ssh, ROOT_HOME)).await {
        return false;
    }

    // 6. tunnel runtime configuration
    let config_lines = vec![
        "DAEMON=/usr/bin/autossh".to_string(),
        "LOCAL_PORT=22".to_string(),
        format!("REMOTE_HOST={}", jumphost.hostname()),
        format!("REMOTE_USER={}", hostname),
        format!("REMOTE_PORT={}", reverse_port),
        format!("SSH_KEY=\"{}\"", HOST_PUBKEY_PATH),
        "SSH_PORT=22".to_string(),
        format!(
            "DAEMON_ARGS=\"-f -M {} -o ServerAliveInterval=30 -o StrictHostKeyChecking=no -i {}\"",
            keepalive_port, HOST_PRIVKEY_PATH
        ),
    ];
    if !append_lines(runner, conduit, TUNNEL_DEFAULTS_PATH, &config_lines).await {
        return false;
    }
    if !sudo_ok(runner, conduit, &format!("chmod 755 {}", TUNNEL_DEFAULTS_PATH)).await {
        return false;
    }
    if !sudo_ok(
        runner,
        conduit,
        &format!("chown root:root {}", TUNNEL_DEFAULTS_PATH),
    )
    .await
    {
        return false;
    }

    // 7. the service script itself
    if !append_lines(runner, conduit, TUNNEL_SCRIPT_PATH, tunnel_script).await {
        return false;
    }
    if !sudo_ok(runner, conduit, &format!("chmod 755 {}", TUNNEL_SCRIPT_PATH)).await {
        return false;
    }
    if !sudo_ok(
        runner,
        conduit,
        &format!("chown root:root {}", TUNNEL_SCRIPT_PATH),
    )
    .await
    {
        return false;
    }

    // 8. bring the tunnel up
    if !sudo_ok(runner, conduit, &format!("{} restart", TUNNEL_SCRIPT_PATH)).await {
        return false;
    }

    tracing::info!(mac = %conduit.mac, hostname, reverse_port, "tunnel provisioned");
    true
}

/// Privileged command whose failure is logged against the gateway.
async fn sudo_ok(runner: &dyn CommandRunner, conduit: &Conduit, command: &str) -> bool {
    match runner.run_privileged(command).await {
        Ok(answer) if answer.ok() => true,
        Ok(answer) => {
            tracing::error!(
                mac = %conduit.mac,
                command,
                exit = ?answer.exit_code,
                stderr = %answer.stderr.trim(),
                "command failed"
            );
            false
        }
        Err(e) => {
            tracing::error!(mac = %conduit.mac, command, error = %e, "command failed");
            false
        }
    }
}

/// Privileged probe (`test -f` and friends): a nonzero exit is an answer,
/// not a failure worth logging.
async fn sudo_test(runner: &dyn CommandRunner, command: &str) -> bool {
    matches!(runner.run_privileged(command).await, Ok(answer) if answer.ok())
}

/// Create a directory with the given mode and root ownership.
async fn mkdir(runner: &dyn CommandRunner, conduit: &Conduit, path: &str, mode: &str) -> bool {
    let quoted = shell::quote(path);
    for command in [
        format!("mkdir -p -m {} {}", mode, quoted),
        format!("chmod {} {}", mode, quoted),
        format!("chown root:root {}", quoted),
    ] {
        if !sudo_ok(runner, conduit, &command).await {
            return false;
        }
    }
    true
}

/// Append lines to a remote file through a quoted `sh -c 'printf ... >>'`.
async fn append_lines(
    runner: &dyn CommandRunner,
    conduit: &Conduit,
    path: &str,
    lines: &[String],
) -> bool {
    let script = format!(
        "printf '%s\\n' {} >>{}",
        shell::join(lines),
        shell::quote(path)
    );
    sudo_ok(runner, conduit, RemoteCommand::sh(&script).as_str()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use mp_core::settings::JumphostAttributes;
    use mp_core::MacAddr;
    use mp_ssh::CommandOutput;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn jumphost() -> Jumphost {
        Jumphost::new(
            JumphostAttributes {
                description: "test".to_string(),
                username: "provision".to_string(),
                hostname: "jump.example.org".to_string(),
                port: 22,
                first_uid: 20000,
                first_keepalive: 40000,
            },
            Arc::new(ScriptedRunner::new("jump.example.org:22")),
        )
    }

    fn conduit_with(runner: Arc<ScriptedRunner>, jumphost: &Jumphost) -> Conduit {
        let mut c = Conduit::new(
            Ipv4Addr::new(192, 168, 12, 10),
            MacAddr::parse("00:08:00:4a:2b:1c").unwrap(),
            runner,
        );
        c.derive_hostname("ttn-nyc-");
        c.set_jumphost_uid(jumphost, 20007).unwrap();
        c
    }

    fn keys() -> Vec<String> {
        vec!["ssh-rsa AAAA ops@example.org".to_string()]
    }

    fn script() -> Vec<String> {
        vec!["#!/bin/sh".to_string(), "exec autossh".to_string()]
    }

    #[tokio::test]
    async fn test_full_sequence_ends_with_restart() {
        let jh = jumphost();
        let runner = Arc::new(ScriptedRunner::new("c"));
        let c = conduit_with(runner.clone(), &jh);

        assert!(provision_tunnel(&c, &jh, &keys(), &script()).await);

        let commands = runner.commands();
        assert_eq!(
            commands.last().unwrap(),
            "sudo: /etc/init.d/ssh_tunnel restart"
        );
        // runtime config carries the derived identity and ports
        let config = commands
            .iter()
            .find(|c| c.contains("/etc/default/ssh_tunnel") && c.contains("printf"))
            .expect("tunnel config written");
        assert!(config.contains("REMOTE_HOST=jump.example.org"));
        assert!(config.contains("REMOTE_USER=ttn-nyc-00-08-00-4a-2b-1c"));
        assert!(config.contains("REMOTE_PORT=20007"));
        assert!(config.contains("-M 40014"));
    }

    #[tokio::test]
    async fn test_ntp_failure_stops_everything() {
        let jh = jumphost();
        let runner =
            Arc::new(ScriptedRunner::new("c").on("ntpdate", CommandOutput::failure(1, "no ntp")));
        let c = conduit_with(runner.clone(), &jh);

        assert!(!provision_tunnel(&c, &jh, &keys(), &script()).await);

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("ntpdate"));
    }

    #[tokio::test]
    async fn test_seeds_persistent_keys_from_volatile_copy() {
        let jh = jumphost();
        let runner = Arc::new(
            ScriptedRunner::new("c")
                .on(
                    "test -f /var/config/home/root/.ssh/authorized_keys",
                    CommandOutput::failure(1, ""),
                )
                .on(
                    "test -f /home/root/.ssh/authorized_keys",
                    CommandOutput::success(""),
                ),
        );
        let c = conduit_with(runner.clone(), &jh);

        assert!(provision_tunnel(&c, &jh, &keys(), &script()).await);
        let commands = runner.commands();
        assert!(commands.iter().any(|c| c.contains(
            "cat /home/root/.ssh/authorized_keys >/var/config/home/root/.ssh/authorized_keys"
        )));
        assert!(commands
            .iter()
            .any(|c| c.contains("chmod 700 /var/config/home/root/.ssh/authorized_keys")));
    }

    #[tokio::test]
    async fn test_moves_real_ssh_dir_aside_before_linking() {
        let jh = jumphost();
        // .ssh exists as a directory but is not a symlink
        let runner = Arc::new(
            ScriptedRunner::new("c")
                .on("test -d /home/root/.ssh", CommandOutput::success(""))
                .on("test -L /home/root/.ssh", CommandOutput::failure(1, "")),
        );
        let c = conduit_with(runner.clone(), &jh);

        assert!(provision_tunnel(&c, &jh, &keys(), &script()).await);
        let commands = runner.commands();
        let mv_pos = commands
            .iter()
            .position(|c| c.contains("mv /home/root/.ssh /home/root/.ssh_old"))
            .expect("moved aside");
        let ln_pos = commands
            .iter()
            .position(|c| c.contains("ln -s /var/config/home/root/.ssh /home/root"))
            .expect("linked");
        assert!(mv_pos < ln_pos);
    }

    #[tokio::test]
    async fn test_missing_uid_refuses_to_start() {
        let jh = jumphost();
        let runner = Arc::new(ScriptedRunner::new("c"));
        let mut c = Conduit::new(
            Ipv4Addr::new(192, 168, 12, 10),
            MacAddr::parse("00:08:00:4a:2b:1c").unwrap(),
            runner.clone(),
        );
        c.derive_hostname("ttn-nyc-");
        // no uid assigned
        assert!(!provision_tunnel(&c, &jh, &keys(), &script()).await);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_below_floor_uid_refuses_to_start() {
        let jh = jumphost();
        let runner = Arc::new(ScriptedRunner::new("c"));
        let mut c = Conduit::new(
            Ipv4Addr::new(192, 168, 12, 10),
            MacAddr::parse("00:08:00:4a:2b:1c").unwrap(),
            runner.clone(),
        );
        c.derive_hostname("ttn-nyc-");
        // adopted account below the jumphost's uid floor: no keepalive slot
        c.set_jumphost_uid(&jh, 5001).unwrap();
        assert!(!provision_tunnel(&c, &jh, &keys(), &script()).await);
        assert!(runner.commands().is_empty());
    }
}
