//! Executes a verification tier's commands against the working tree.

use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use supervisor_core::types::{CommandResult, Tier, VerifyResult};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to spawn verify command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct VerifyEngine {
    pub workdir: std::path::PathBuf,
    pub timeout_sec: u64,
}

impl VerifyEngine {
    pub fn new(workdir: impl Into<std::path::PathBuf>, timeout_sec: u64) -> Self {
        Self {
            workdir: workdir.into(),
            timeout_sec,
        }
    }

    /// Run every command in `commands` for `tier`, stopping at the first
    /// failure (fail-fast) but still reporting results for commands that
    /// did run.
    pub async fn run_tier(&self, tier: Tier, commands: &[String]) -> Result<VerifyResult, VerifyError> {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut overall_ok = true;
        let mut combined_output = String::new();

        for command in commands {
            if !overall_ok {
                break;
            }
            let cmd_start = Instant::now();
            let outcome = self.run_one(command).await?;
            let duration_ms = cmd_start.elapsed().as_millis() as u64;
            combined_output.push_str(&outcome.output);
            combined_output.push('\n');
            overall_ok = overall_ok && outcome.ok;
            results.push(CommandResult {
                command: command.clone(),
                exit_code: outcome.exit_code,
                ok: outcome.ok,
                duration_ms,
            });
        }

        Ok(VerifyResult {
            tier,
            commands: commands.to_vec(),
            command_results: results,
            ok: overall_ok,
            duration_ms: start.elapsed().as_millis() as u64,
            output: combined_output,
        })
    }

    /// Run every selected tier's commands in one pass, tier0 first
    /// through the highest escalated tier, fail-fast across the whole
    /// combined command list. The returned `VerifyResult::tier` is the
    /// highest tier that ran, but `command_results` covers every command
    /// across every tier so `build_evidence` can be fed the full set.
    pub async fn run_tiers(
        &self,
        tiers: &[Tier],
        commands_for: impl Fn(Tier) -> Vec<String>,
    ) -> Result<VerifyResult, VerifyError> {
        let mut sorted_tiers = tiers.to_vec();
        sorted_tiers.sort();
        sorted_tiers.dedup();

        let mut all_commands = Vec::new();
        for tier in &sorted_tiers {
            all_commands.extend(commands_for(*tier));
        }

        let highest = sorted_tiers.last().copied().unwrap_or(Tier::Tier0);
        self.run_tier(highest, &all_commands).await
    }

    async fn run_one(&self, command: &str) -> Result<OneShotOutcome, VerifyError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let child = Command::new(program)
            .args(&args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VerifyError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let deadline = Duration::from_secs(self.timeout_sec);
        match timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(OneShotOutcome {
                    ok: output.status.success(),
                    exit_code: output.status.code(),
                    output: text,
                })
            }
            Ok(Err(source)) => Err(VerifyError::Spawn {
                command: command.to_string(),
                source,
            }),
            Err(_) => Ok(OneShotOutcome {
                ok: false,
                exit_code: None,
                output: format!("command `{command}` timed out after {}s", self.timeout_sec),
            }),
        }
    }
}

struct OneShotOutcome {
    ok: bool,
    exit_code: Option<i32>,
    output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passing_commands_report_ok() {
        let engine = VerifyEngine::new(std::env::temp_dir(), 5);
        let result = engine.run_tier(Tier::Tier0, &["true".to_string()]).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.command_results.len(), 1);
    }

    #[tokio::test]
    async fn failing_command_stops_remaining_commands() {
        let engine = VerifyEngine::new(std::env::temp_dir(), 5);
        let result = engine
            .run_tier(Tier::Tier0, &["false".to_string(), "true".to_string()])
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.command_results.len(), 1);
    }

    #[tokio::test]
    async fn run_tiers_runs_tier0_and_escalated_tier_in_one_pass() {
        let engine = VerifyEngine::new(std::env::temp_dir(), 5);
        let result = engine
            .run_tiers(&[Tier::Tier0, Tier::Tier1], |tier| match tier {
                Tier::Tier0 => vec!["true".to_string()],
                Tier::Tier1 => vec!["true".to_string()],
                Tier::Tier2 => vec![],
            })
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.tier, Tier::Tier1);
        assert_eq!(result.command_results.len(), 2);
    }
}
