//! Worker adapter: spawns a worker subprocess, enforces a time budget,
//! and parses its output into a `WorkerResult`.
//!
//! Workers are black boxes by design (spec Non-goal: the workers
//! themselves aren't implemented here) — this module only knows how to
//! launch a configured command, feed it a prompt on stdin, and collect
//! stdout/stderr within a deadline.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use supervisor_core::types::WorkerResult;
use supervisor_core::worker_protocol::{self, OutputProtocol, ProtocolError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker `{role}` timed out after {timeout_sec}s")]
    Timeout { role: String, timeout_sec: u64 },
    #[error("worker `{role}` exited with a non-zero status (code {exit_code:?})")]
    NonZeroExit { role: String, exit_code: Option<i32> },
    #[error("worker `{0}` output could not be parsed: {1}")]
    Protocol(String, #[source] ProtocolError),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub role: String,
    pub command: String,
    pub protocol: OutputProtocol,
    pub timeout_sec: u64,
    pub retries: u32,
    pub retry_backoff_sec: u64,
}

#[derive(Debug)]
pub struct WorkerOutcome {
    pub result: WorkerResult,
    pub raw_transcript: String,
    pub attempt: u32,
    pub duration_ms: u64,
}

/// Run a preflight "ping" to confirm the worker command is invocable
/// before committing a full phase to it. A ping is just the same command
/// invoked with an empty prompt and a short deadline.
pub async fn ping(config: &WorkerConfig) -> Result<(), WorkerError> {
    let short = WorkerConfig {
        timeout_sec: config.timeout_sec.min(10),
        retries: 0,
        ..config.clone()
    };
    invoke_once(&short, "").await.map(|_| ())
}

/// Invoke the worker, retrying once (per `config.retries`) on either a
/// protocol parse failure or a process-level failure, with a fixed
/// backoff between attempts.
pub async fn invoke(config: &WorkerConfig, prompt: &str) -> Result<WorkerOutcome, WorkerError> {
    let mut attempt = 0;
    let mut last_err = None;
    loop {
        attempt += 1;
        match invoke_once(config, prompt).await {
            Ok((raw, duration_ms)) => match worker_protocol::parse_output(config.protocol, &raw) {
                Ok(result) => {
                    return Ok(WorkerOutcome {
                        result,
                        raw_transcript: raw,
                        attempt,
                        duration_ms,
                    });
                }
                Err(e) => last_err = Some(WorkerError::Protocol(config.role.clone(), e)),
            },
            Err(e) => last_err = Some(e),
        }
        if attempt > config.retries {
            break;
        }
        tokio::time::sleep(Duration::from_secs(config.retry_backoff_sec)).await;
    }
    Err(last_err.expect("loop always records an error before exiting"))
}

async fn invoke_once(config: &WorkerConfig, prompt: &str) -> Result<(String, u64), WorkerError> {
    let start = std::time::Instant::now();
    let mut parts = config.command.split_whitespace();
    let program = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| WorkerError::Spawn {
            command: config.command.clone(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(prompt.as_bytes()).await;
    }

    let deadline = Duration::from_secs(config.timeout_sec);
    let output = match timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(WorkerError::Spawn {
                command: config.command.clone(),
                source,
            });
        }
        Err(_) => {
            return Err(WorkerError::Timeout {
                role: config.role.clone(),
                timeout_sec: config.timeout_sec,
            });
        }
    };

    if !output.status.success() {
        return Err(WorkerError::NonZeroExit {
            role: config.role.clone(),
            exit_code: output.status.code(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    Ok((stdout, start.elapsed().as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_config(protocol: OutputProtocol) -> WorkerConfig {
        WorkerConfig {
            role: "implementer".to_string(),
            command: "true".to_string(),
            protocol,
            timeout_sec: 5,
            retries: 1,
            retry_backoff_sec: 0,
        }
    }

    #[tokio::test]
    async fn raw_text_protocol_accepts_any_output() {
        let config = echo_config(OutputProtocol::RawText);
        let outcome = invoke(&config, "hello").await.unwrap();
        assert_eq!(outcome.attempt, 1);
    }

    #[tokio::test]
    async fn nonexistent_command_errors_on_spawn() {
        let mut config = echo_config(OutputProtocol::RawText);
        config.command = "definitely-not-a-real-binary-xyz".to_string();
        config.retries = 0;
        let err = invoke(&config, "hi").await.unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
    }
}
