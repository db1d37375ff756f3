//! Scripted command runner for engine tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use mp_ssh::{CommandOutput, CommandRunner, SshError};

struct Rule {
    prefix: String,
    outputs: VecDeque<CommandOutput>,
}

/// In-memory [`CommandRunner`] driven by prefix-matched canned outputs.
///
/// Rules match in registration order on command prefix. A rule with
/// several outputs yields them one at a time and then sticks on the last,
/// which lets a test model "user absent, then present after useradd".
/// Unmatched commands succeed with empty output. Every command is logged
/// (`run:` / `sudo:` prefixed) for assertions about what was issued.
pub(crate) struct ScriptedRunner {
    target: String,
    reachable: bool,
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            reachable: true,
            rules: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(target: &str) -> Self {
        Self {
            reachable: false,
            ..Self::new(target)
        }
    }

    /// Register one canned output for commands starting with `prefix`.
    pub fn on(self, prefix: &str, output: CommandOutput) -> Self {
        self.on_seq(prefix, vec![output])
    }

    /// Register a sequence of outputs for commands starting with `prefix`.
    pub fn on_seq(self, prefix: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            outputs: outputs.into(),
        });
        self
    }

    /// Everything that was executed, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn respond(&self, kind: &str, command: &str) -> CommandOutput {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}: {}", kind, command));

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if command.starts_with(&rule.prefix) {
                return if rule.outputs.len() > 1 {
                    rule.outputs.pop_front().unwrap()
                } else {
                    rule.outputs.front().cloned().unwrap_or_default()
                };
            }
        }
        CommandOutput::success("")
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn ping(&self) -> bool {
        self.reachable
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        if !self.reachable {
            return Err(SshError::Connect {
                host: self.target.clone(),
                message: "scripted: unreachable".to_string(),
            });
        }
        Ok(self.respond("run", command))
    }

    async fn run_privileged(&self, command: &str) -> Result<CommandOutput, SshError> {
        if !self.reachable {
            return Err(SshError::Connect {
                host: self.target.clone(),
                message: "scripted: unreachable".to_string(),
            });
        }
        Ok(self.respond("sudo", command))
    }

    fn target(&self) -> &str {
        &self.target
    }
}
