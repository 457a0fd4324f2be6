//! Worker output protocol: how a worker subprocess's stdout is turned
//! into a `WorkerResult`.
//!
//! Workers emit free-form reasoning to stdout and then a single fenced
//! JSON block delimited by `BEGIN_JSON`/`END_JSON` markers. Anything
//! outside the markers is ignored; anything that fails to parse is
//! surfaced to the caller so it can retry once before giving up.

use thiserror::Error;

use crate::types::WorkerResult;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no BEGIN_JSON/END_JSON markers found in output")]
    MarkersNotFound,
    #[error("BEGIN_JSON marker found without matching END_JSON")]
    UnterminatedBlock,
    #[error("failed to parse JSON block: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

const BEGIN_MARKER: &str = "BEGIN_JSON";
const END_MARKER: &str = "END_JSON";

/// Output shape declared by a worker role's adapter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputProtocol {
    /// No structured result expected; the caller synthesizes one.
    RawText,
    /// A single marker-delimited JSON object.
    SingleJson,
    /// One JSON object per line, no markers; the last valid line wins.
    JsonLines,
}

impl OutputProtocol {
    /// Parse a `workers.<role>.output` config value. Unrecognized values
    /// fall back to `None` so callers can keep the worker's existing
    /// protocol rather than fail the whole config load.
    pub fn from_config_str(value: &str) -> Option<Self> {
        match value {
            "raw_text" => Some(Self::RawText),
            "single_json" => Some(Self::SingleJson),
            "json_lines" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

/// Extract the substring between the first `BEGIN_JSON` and the next
/// `END_JSON` after it. Exposed so callers that need a worker-specific
/// schema (e.g. the planner's milestone list) can reuse the same
/// marker convention without going through `WorkerResult`.
pub fn extract_marked_block(output: &str) -> Result<&str, ProtocolError> {
    let start = output.find(BEGIN_MARKER).ok_or(ProtocolError::MarkersNotFound)?;
    let after_begin = start + BEGIN_MARKER.len();
    let end_rel = output[after_begin..]
        .find(END_MARKER)
        .ok_or(ProtocolError::UnterminatedBlock)?;
    Ok(output[after_begin..after_begin + end_rel].trim())
}

fn parse_single_json(output: &str) -> Result<WorkerResult, ProtocolError> {
    let block = extract_marked_block(output)?;
    serde_json::from_str(block).map_err(ProtocolError::InvalidJson)
}

fn parse_json_lines(output: &str) -> Result<WorkerResult, ProtocolError> {
    output
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<WorkerResult>(line.trim()).ok())
        .ok_or(ProtocolError::MarkersNotFound)
}

/// Parse raw worker stdout per the declared protocol.
pub fn parse_output(protocol: OutputProtocol, output: &str) -> Result<WorkerResult, ProtocolError> {
    match protocol {
        OutputProtocol::RawText => Ok(WorkerResult {
            status: crate::types::WorkerStatus::Ok,
            observations: vec![output.trim().to_string()],
            commands_run: Vec::new(),
            handoff_memo: None,
        }),
        OutputProtocol::SingleJson => parse_single_json(output),
        OutputProtocol::JsonLines => parse_json_lines(output),
    }
}

/// Parse with one retry: if the first attempt fails, try again against
/// retry output (the caller re-invokes the worker and passes the second
/// transcript in). Returns the first error if both attempts fail.
pub fn parse_with_one_retry(
    protocol: OutputProtocol,
    first_output: &str,
    retry_output: Option<&str>,
) -> Result<WorkerResult, ProtocolError> {
    match parse_output(protocol, first_output) {
        Ok(result) => Ok(result),
        Err(first_err) => match retry_output {
            Some(retry) => parse_output(protocol, retry).map_err(|_| first_err),
            None => Err(first_err),
        },
    }
}
