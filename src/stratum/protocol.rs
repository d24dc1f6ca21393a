//! Stratum V1 protocol message definitions
//!
//! Newline-delimited JSON-RPC. Requests carry `{id, method, params}`,
//! responses `{id, result, error}`, notifications a null id. Errors on
//! the wire are `[code, message, null]` triples.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Stratum V1 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    /// Catch-all: malformed params, hex errors
    Other,
    /// Unknown or evicted job id
    StaleJob,
    /// Fingerprint already seen for this job
    Duplicate,
    /// Share below session difficulty
    LowDifficulty,
    /// Submit/authorize without authorization
    Unauthorized,
    /// Authorize before subscribe
    NotSubscribed,
}

impl StratumErrorCode {
    /// The numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            Self::Other => 20,
            Self::StaleJob => 21,
            Self::Duplicate => 22,
            Self::LowDifficulty => 23,
            Self::Unauthorized => 24,
            Self::NotSubscribed => 25,
        }
    }
}

/// A Stratum protocol error as sent to miners.
#[derive(Debug, Clone)]
pub struct StratumError {
    /// Behavioral class of the failure
    pub code: StratumErrorCode,
    /// Human-readable reason
    pub message: String,
}

impl StratumError {
    /// Create an error with the given code and message.
    pub fn new(code: StratumErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stratum error {}: {}", self.code.code(), self.message)
    }
}

impl Serialize for StratumError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.code.code(), &self.message, Value::Null).serialize(serializer)
    }
}

/// A JSON-RPC request from a miner.
#[derive(Debug, Clone, Deserialize)]
pub struct StratumRequest {
    /// Request id, echoed in the response (null for notifications)
    #[serde(default)]
    pub id: Value,
    /// Method name, e.g. `mining.submit`
    pub method: String,
    /// Positional parameters
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Parse a raw line into a request.
pub fn parse_request(line: &str) -> Result<StratumRequest> {
    let req: StratumRequest = serde_json::from_str(line)?;
    if req.method.is_empty() {
        return Err(Error::protocol("missing method"));
    }
    Ok(req)
}

/// Encode a response line (trailing newline included).
pub fn encode_response(id: &Value, result: Value, error: Option<&StratumError>) -> String {
    let mut line = json!({
        "id": id,
        "result": result,
        "error": error,
    })
    .to_string();
    line.push('\n');
    line
}

/// Encode a server notification line (id is always null).
pub fn encode_notification(method: &str, params: Value) -> String {
    let mut line = json!({
        "id": Value::Null,
        "method": method,
        "params": params,
    })
    .to_string();
    line.push('\n');
    line
}

/// Extract a string parameter.
pub fn param_str(params: &[Value], index: usize) -> Option<String> {
    params.get(index)?.as_str().map(str::to_string)
}

/// Extract a float parameter.
pub fn param_f64(params: &[Value], index: usize) -> Option<f64> {
    params.get(index)?.as_f64()
}

/// Extract a job id, handling both string (`"1a"`) and numeric (`26`)
/// forms. Some miner firmware sends job ids back as JSON numbers; those
/// are rendered as lowercase hex to match the ids we issue.
pub fn param_job_id(params: &[Value], index: usize) -> Option<String> {
    let value = params.get(index)?;
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    value.as_i64().map(|n| format!("{:x}", n))
}

/// The nine positional fields of `mining.notify`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams {
    /// Job identifier
    pub job_id: String,
    /// Previous block hash, Stratum transport form (64 hex chars)
    pub prev_hash: String,
    /// Coinbase prefix, hex
    pub coinb1: String,
    /// Coinbase suffix, hex
    pub coinb2: String,
    /// Merkle branch hashes, internal order hex
    pub merkle_branches: Vec<String>,
    /// Block version, 8 hex chars big-endian
    pub version: String,
    /// Compact target, 8 hex chars
    pub nbits: String,
    /// Block time, 8 hex chars big-endian
    pub ntime: String,
    /// Whether miners must drop outstanding work
    pub clean_jobs: bool,
}

impl JobParams {
    /// Render as the `mining.notify` params array.
    pub fn to_params(&self) -> Value {
        json!([
            self.job_id.clone(),
            self.prev_hash.clone(),
            self.coinb1.clone(),
            self.coinb2.clone(),
            self.merkle_branches.clone(),
            self.version.clone(),
            self.nbits.clone(),
            self.ntime.clone(),
            self.clean_jobs,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let req = parse_request(r#"{"id":1,"method":"mining.subscribe","params":["cgminer/4.12"]}"#)
            .unwrap();
        assert_eq!(req.id, json!(1));
        assert_eq!(req.method, "mining.subscribe");
        assert_eq!(req.params.len(), 1);
    }

    #[test]
    fn test_parse_request_missing_method() {
        assert!(parse_request(r#"{"id":1,"params":[]}"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn test_encode_response_success() {
        let line = encode_response(&json!(7), json!(true), None);
        assert!(line.ends_with('\n'));
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["id"], json!(7));
        assert_eq!(v["result"], json!(true));
        assert_eq!(v["error"], Value::Null);
    }

    #[test]
    fn test_encode_response_error_triple() {
        let err = StratumError::new(StratumErrorCode::Duplicate, "duplicate share");
        let line = encode_response(&json!(2), json!(false), Some(&err));
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["error"], json!([22, "duplicate share", null]));
    }

    #[test]
    fn test_encode_notification() {
        let line = encode_notification("mining.set_difficulty", json!([1024.0]));
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["id"], Value::Null);
        assert_eq!(v["method"], "mining.set_difficulty");
        assert_eq!(v["params"], json!([1024.0]));
    }

    #[test]
    fn test_param_job_id_accepts_numbers() {
        let params = vec![json!("worker"), json!(1234)];
        assert_eq!(param_job_id(&params, 1).unwrap(), "4d2");

        let params = vec![json!("worker"), json!("1a2b")];
        assert_eq!(param_job_id(&params, 1).unwrap(), "1a2b");

        assert!(param_job_id(&params, 5).is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(StratumErrorCode::Other.code(), 20);
        assert_eq!(StratumErrorCode::StaleJob.code(), 21);
        assert_eq!(StratumErrorCode::Duplicate.code(), 22);
        assert_eq!(StratumErrorCode::LowDifficulty.code(), 23);
        assert_eq!(StratumErrorCode::Unauthorized.code(), 24);
        assert_eq!(StratumErrorCode::NotSubscribed.code(), 25);
    }

    #[test]
    fn test_job_params_order() {
        let params = JobParams {
            job_id: "4d2".into(),
            prev_hash: "00".repeat(32),
            coinb1: "0200".into(),
            coinb2: "ffff".into(),
            merkle_branches: vec!["aa".repeat(32)],
            version: "20000000".into(),
            nbits: "17057e19".into(),
            ntime: "65abcdef".into(),
            clean_jobs: true,
        };
        let v = params.to_params();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 9);
        assert_eq!(arr[0], json!("4d2"));
        assert_eq!(arr[5], json!("20000000"));
        assert_eq!(arr[8], json!(true));
    }
}
