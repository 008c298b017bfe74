use serde_json::{Map, Value};
use thiserror::Error;

/// One point-in-time read of the worker's state.
///
/// Produced by decoding a `/stats` response. Never mutated; a new poll
/// replaces it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorkerSnapshot {
    pub total_blocks: u64,
    /// Blocks per second, never negative.
    pub mining_rate: f64,
    pub is_mining: bool,
}

/// Failure of a single request against the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("worker unreachable: {0}")]
    Unreachable(String),
    #[error("worker returned HTTP {0}")]
    BadStatus(u16),
    #[error("malformed worker response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Unreachable(_) => true,
            FetchError::BadStatus(code) => *code >= 500,
            FetchError::Malformed(_) => false,
        }
    }
}

// Snake case is what the worker sends today; camel case came from older revisions.
const TOTAL_BLOCKS: [&str; 2] = ["total_blocks", "totalBlocks"];
const MINING_RATE: [&str; 2] = ["mining_rate", "miningRate"];
const IS_MINING: [&str; 2] = ["is_mining", "isMining"];

/// Decode a `/stats` response body.
///
/// Only a body that is not a JSON object is rejected. Each field is looked up
/// independently and falls back to its default when absent or of the wrong
/// shape, so `{}` decodes to [`WorkerSnapshot::default`].
pub fn decode_snapshot(body: &[u8]) -> Result<WorkerSnapshot, FetchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(FetchError::Malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    Ok(WorkerSnapshot {
        total_blocks: lookup(&fields, &TOTAL_BLOCKS)
            .and_then(as_block_count)
            .unwrap_or(0),
        mining_rate: lookup(&fields, &MINING_RATE)
            .and_then(as_rate)
            .unwrap_or(0.0),
        is_mining: lookup(&fields, &IS_MINING)
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// First present name wins, even if its value turns out to be unusable.
fn lookup<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| fields.get(*name))
}

fn as_block_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn as_rate(value: &Value) -> Option<f64> {
    value.as_f64().filter(|r| r.is_finite() && *r >= 0.0)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
