//! Privacy-preserving usage telemetry
//!
//! [`Telemetry::begin`] captures the anonymized shape of a call just before it
//! is dispatched; [`Telemetry::finish`] classifies the outcome and hands one
//! usage entry plus one analytics record to the background emitter.

pub mod anonymize;
pub mod detector;
pub mod emitter;
pub mod record;

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

pub use anonymize::{
    Complexity, ErrorCategory, anonymize_params, categorize_error, complexity, estimate_tokens,
    geo_region, session_hash,
};
pub use detector::{BoundedCache, ExecutionMode, ExecutionModeDetector, RetryDetector, RetryInfo};
pub use emitter::{TelemetryEmitter, TelemetryEvent};
pub use record::AnalyticsRecord;

use crate::Error;
use crate::clock::Clock;
use crate::config::TelemetryConfig;
use crate::store::{CallStatus, UsageEntry};

fn duration_ms(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Anonymized facts about a call, captured at dispatch
#[derive(Debug, Clone)]
pub struct CallContext {
    session_hash: String,
    integration_slug: String,
    tool_name: String,
    started_at: i64,
    execution_mode: ExecutionMode,
    parameter_shape: Value,
    parameter_complexity: Complexity,
    input_tokens: u64,
    geo_region: Option<String>,
}

impl CallContext {
    /// Dispatch time (epoch ms)
    #[must_use]
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Batch classification
    #[must_use]
    pub fn execution_mode(&self) -> &ExecutionMode {
        &self.execution_mode
    }
}

/// Telemetry pipeline: detectors plus the background emitter
pub struct Telemetry {
    config: TelemetryConfig,
    execution: ExecutionModeDetector,
    retries: RetryDetector,
    emitter: TelemetryEmitter,
    clock: Arc<dyn Clock>,
}

impl Telemetry {
    /// Create the pipeline
    #[must_use]
    pub fn new(config: TelemetryConfig, emitter: TelemetryEmitter, clock: Arc<dyn Clock>) -> Self {
        Self {
            execution: ExecutionModeDetector::new(
                duration_ms(config.coalescing_window),
                config.max_entries,
            ),
            retries: RetryDetector::new(duration_ms(config.retry_window), config.max_entries),
            config,
            emitter,
            clock,
        }
    }

    /// Current time from the injected clock
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Capture the call's anonymized context right before dispatch
    pub fn begin(
        &self,
        headers: &HeaderMap,
        slug: &str,
        tool_name: &str,
        arguments: Option<&Value>,
    ) -> CallContext {
        let started_at = self.clock.now_ms();
        let session_hash = session_hash(headers, &self.config.session_salt);
        let execution_mode = if self.config.enabled {
            self.execution.detect(&session_hash, started_at)
        } else {
            ExecutionMode::Sequential
        };
        CallContext {
            integration_slug: slug.to_string(),
            tool_name: tool_name.to_string(),
            started_at,
            execution_mode,
            parameter_shape: anonymize_params(arguments),
            parameter_complexity: arguments.map(complexity).unwrap_or_default(),
            input_tokens: estimate_tokens(arguments),
            geo_region: geo_region(headers, &self.config.geo_header),
            session_hash,
        }
    }

    /// Classify the outcome and enqueue usage and analytics
    pub fn finish(
        &self,
        ctx: CallContext,
        user_id: &str,
        integration_id: &str,
        outcome: &Result<Value, Error>,
    ) {
        let completed_at = self.clock.now_ms();
        let latency_ms = u64::try_from(completed_at.saturating_sub(ctx.started_at)).unwrap_or(0);

        let (status, error_category, rate_limit_type) = match outcome {
            Ok(_) => (CallStatus::Success, None, None),
            Err(Error::RateLimited { limit_type, .. }) => (
                CallStatus::RateLimited,
                Some(ErrorCategory::RateLimit),
                limit_type.clone(),
            ),
            Err(e) => (
                CallStatus::Error,
                Some(categorize_error(&e.to_string())),
                None,
            ),
        };

        let usage = UsageEntry {
            user_id: user_id.to_string(),
            integration_id: integration_id.to_string(),
            tool_name: ctx.tool_name.clone(),
            latency_ms,
            status,
        };

        let analytics = self.config.enabled.then(|| {
            let retry = self.retries.detect(
                &ctx.session_hash,
                &ctx.tool_name,
                status != CallStatus::Success,
                ctx.started_at,
            );
            if self.config.loop_threshold > 0 && retry.loop_count >= self.config.loop_threshold {
                warn!(
                    tool = %ctx.tool_name,
                    loop_count = retry.loop_count,
                    "Client appears stuck retrying a failing tool"
                );
            }
            AnalyticsRecord {
                session_hash: ctx.session_hash,
                integration_slug: ctx.integration_slug,
                tool_name: ctx.tool_name,
                started_at: ctx.started_at,
                completed_at,
                latency_ms,
                status,
                error_category,
                rate_limit_type,
                input_tokens: ctx.input_tokens,
                output_tokens: estimate_tokens(outcome.as_ref().ok()),
                retry,
                execution_mode: ctx.execution_mode,
                parameter_shape: ctx.parameter_shape,
                parameter_complexity: ctx.parameter_complexity,
                geo_region: ctx.geo_region,
            }
        });

        self.emitter.emit(TelemetryEvent { usage, analytics });
    }

    /// Drop detector state older than the detection windows
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let removed = self.execution.sweep(now) + self.retries.sweep(now);
        if removed > 0 {
            debug!(removed, "Swept telemetry detector state");
        }
        removed
    }

    /// Deliver queued events and stop the worker
    pub async fn shutdown(&self) {
        self.emitter.shutdown().await;
    }
}
