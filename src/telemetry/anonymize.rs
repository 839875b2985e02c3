//! Pure anonymization and classification helpers

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters kept from the session digest
const SESSION_HASH_LEN: usize = 16;

/// Shape metrics of a parameter value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complexity {
    /// Maximum container nesting (scalars are 0)
    pub depth: u32,
    /// Top-level key count (0 for non-objects)
    pub count: u32,
    /// Largest array length at any depth
    pub max_array_length: u32,
}

/// Coarse error bucket derived from the error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Deadline exceeded
    Timeout,
    /// Quota or throttling
    RateLimit,
    /// Credentials rejected
    Auth,
    /// Bad input
    Validation,
    /// Anything else
    Unknown,
}

/// Keywords per category, checked in order; first match wins
const ERROR_KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Timeout, &["timeout", "timed out", "deadline"]),
    (
        ErrorCategory::RateLimit,
        &["rate limit", "rate_limit", "ratelimit", "too many requests", "429"],
    ),
    (
        ErrorCategory::Auth,
        &["unauthorized", "forbidden", "auth", "token", "401", "403", "credential"],
    ),
    (
        ErrorCategory::Validation,
        &["invalid", "validation", "required", "missing", "bad request", "400"],
    ),
];

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// One-way session identifier from connection-level signals
///
/// Uses `mcp-session-id` when present, otherwise the first `x-forwarded-for`
/// address plus `user-agent`. Authentication headers are never read.
#[must_use]
pub fn session_hash(headers: &HeaderMap, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    if let Some(session_id) = header(headers, "mcp-session-id") {
        hasher.update(b"session:");
        hasher.update(session_id.as_bytes());
    } else {
        let ip = header(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map_or("unknown", str::trim);
        let user_agent = header(headers, "user-agent").unwrap_or("unknown");
        hasher.update(b"client:");
        hasher.update(ip.as_bytes());
        hasher.update(b"|");
        hasher.update(user_agent.as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(SESSION_HASH_LEN);
    digest
}

/// Replace every leaf with its type tag; `None` (missing arguments) becomes `"undefined"`
#[must_use]
pub fn anonymize_params(value: Option<&Value>) -> Value {
    value.map_or_else(|| Value::String("undefined".to_string()), anonymize)
}

fn anonymize(value: &Value) -> Value {
    match value {
        Value::Null => Value::String("null".to_string()),
        Value::Bool(_) => Value::String("boolean".to_string()),
        Value::Number(_) => Value::String("number".to_string()),
        Value::String(_) => Value::String("string".to_string()),
        Value::Array(items) => {
            let inner = items
                .first()
                .map_or_else(|| "empty".to_string(), |first| render(&anonymize(first)));
            Value::String(format!("array<{inner}>"))
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), anonymize(v)))
                .collect(),
        ),
    }
}

fn render(shape: &Value) -> String {
    match shape {
        Value::String(tag) => tag.clone(),
        other => other.to_string(),
    }
}

/// Depth, top-level key count and largest array length in one walk
#[must_use]
pub fn complexity(value: &Value) -> Complexity {
    let count = value
        .as_object()
        .map_or(0, |m| u32::try_from(m.len()).unwrap_or(u32::MAX));
    let (depth, max_array_length) = walk(value);
    Complexity {
        depth,
        count,
        max_array_length,
    }
}

fn walk(value: &Value) -> (u32, u32) {
    match value {
        Value::Array(items) => {
            let len = u32::try_from(items.len()).unwrap_or(u32::MAX);
            items.iter().map(walk).fold((1, len), |(d, m), (cd, cm)| {
                (d.max(cd + 1), m.max(cm))
            })
        }
        Value::Object(map) => map
            .values()
            .map(walk)
            .fold((1, 0), |(d, m), (cd, cm)| (d.max(cd + 1), m.max(cm))),
        _ => (0, 0),
    }
}

/// Rough token count: a quarter of the serialized length, rounded up
#[must_use]
pub fn estimate_tokens(value: Option<&Value>) -> u64 {
    match value {
        None | Some(Value::Null) => 0,
        Some(v) => serde_json::to_string(v).map_or(0, |s| (s.len() as u64).div_ceil(4)),
    }
}

/// Bucket an error message by keyword
#[must_use]
pub fn categorize_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    ERROR_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Coarse region from a trusted country-code header
///
/// Returns `None` when the header is absent or not an ISO 3166 alpha-2 code.
/// Codes outside the table map to `"other"`.
#[must_use]
pub fn geo_region(headers: &HeaderMap, header_name: &str) -> Option<String> {
    let code = header(headers, header_name)?.to_ascii_uppercase();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    // XX is Cloudflare's "unknown"
    if code == "XX" {
        return None;
    }
    let region = match code.as_str() {
        "US" | "CA" | "MX" => "north_america",
        "BR" | "AR" | "CL" | "CO" | "PE" | "UY" | "VE" | "EC" | "BO" | "PY" => "south_america",
        "GB" | "IE" | "FR" | "DE" | "NL" | "BE" | "LU" | "CH" | "AT" | "IT" | "ES" | "PT" | "SE"
        | "NO" | "DK" | "FI" | "IS" | "PL" | "CZ" | "SK" | "HU" | "RO" | "BG" | "GR" | "HR"
        | "SI" | "EE" | "LV" | "LT" | "UA" => "europe",
        "CN" | "JP" | "KR" | "TW" | "HK" | "SG" | "IN" | "ID" | "TH" | "VN" | "MY" | "PH"
        | "PK" | "BD" => "asia",
        "AE" | "SA" | "IL" | "TR" | "QA" | "EG" | "NG" | "KE" | "ZA" | "MA" | "GH" => {
            "middle_east_africa"
        }
        "AU" | "NZ" => "oceania",
        _ => "other",
    };
    Some(region.to_string())
}
