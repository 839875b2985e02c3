//! Anonymized per-call analytics record

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anonymize::{Complexity, ErrorCategory};
use super::detector::{ExecutionMode, RetryInfo};
use crate::store::CallStatus;

/// One tool invocation attempt, free of user identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    /// One-way session identifier
    pub session_hash: String,
    /// Integration slug
    pub integration_slug: String,
    /// Qualified tool name
    pub tool_name: String,
    /// Dispatch time (epoch ms)
    pub started_at: i64,
    /// Completion time (epoch ms)
    pub completed_at: i64,
    /// Upstream round trip
    pub latency_ms: u64,
    /// Outcome
    pub status: CallStatus,
    /// Error bucket when `status` is not success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Upstream rate-limit type hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_type: Option<String>,
    /// Estimated tokens in the arguments
    pub input_tokens: u64,
    /// Estimated tokens in the result
    pub output_tokens: u64,
    /// Retry classification
    #[serde(flatten)]
    pub retry: RetryInfo,
    /// Batch classification
    #[serde(flatten)]
    pub execution_mode: ExecutionMode,
    /// Arguments with every leaf replaced by its type
    pub parameter_shape: Value,
    /// Argument shape metrics
    pub parameter_complexity: Complexity,
    /// Coarse client region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_region: Option<String>,
}

#[cfg(test)]
impl AnalyticsRecord {
    pub(crate) fn sample(tool_name: &str) -> Self {
        Self {
            session_hash: "abcd".into(),
            integration_slug: tool_name.split('/').next().unwrap_or_default().into(),
            tool_name: tool_name.into(),
            started_at: 1,
            completed_at: 5,
            latency_ms: 4,
            status: CallStatus::Success,
            error_category: None,
            rate_limit_type: None,
            input_tokens: 3,
            output_tokens: 0,
            retry: RetryInfo::default(),
            execution_mode: ExecutionMode::Sequential,
            parameter_shape: serde_json::json!({"owner": "string"}),
            parameter_complexity: Complexity::default(),
            geo_region: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat_camel_case() {
        let mut record = AnalyticsRecord::sample("github/list_repos");
        record.status = CallStatus::RateLimited;
        record.error_category = Some(ErrorCategory::RateLimit);
        record.retry.is_retry = true;
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["toolName"], "github/list_repos");
        assert_eq!(v["status"], "rate_limited");
        assert_eq!(v["errorCategory"], "rate_limit");
        assert_eq!(v["isRetry"], true);
        assert_eq!(v["executionMode"], "sequential");
        assert_eq!(v["parameterComplexity"]["maxArrayLength"], 0);
        assert!(v.get("geoRegion").is_none());
    }
}
