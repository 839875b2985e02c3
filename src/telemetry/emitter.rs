//! Background delivery of usage entries and analytics records
//!
//! Producers enqueue on an unbounded channel and return immediately. One worker
//! task writes each event's usage entry and analytics record concurrently;
//! sink failures are logged and dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AnalyticsRecord;
use crate::store::{AnalyticsSink, UsageEntry, UsageLog};

/// Everything recorded for one dispatched tool call
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Per-user usage entry
    pub usage: UsageEntry,
    /// Anonymized record (absent when analytics is disabled)
    pub analytics: Option<AnalyticsRecord>,
}

/// Handle to the telemetry worker
pub struct TelemetryEmitter {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryEmitter {
    /// Spawn the worker on the current runtime
    #[must_use]
    pub fn spawn(usage: Arc<dyn UsageLog>, analytics: Arc<dyn AnalyticsSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(rx, cancel.clone(), usage, analytics));
        Self {
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue an event; never blocks and never fails the caller
    pub fn emit(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            debug!("Telemetry worker stopped, event dropped");
        }
    }

    /// Stop accepting events, deliver what is queued, and join the worker
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Telemetry worker panicked");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    cancel: CancellationToken,
    usage: Arc<dyn UsageLog>,
    analytics: Arc<dyn AnalyticsSink>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => deliver(event, usage.as_ref(), analytics.as_ref()).await,
                None => return,
            },
            () = cancel.cancelled() => break,
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(event) = rx.recv().await {
        deliver(event, usage.as_ref(), analytics.as_ref()).await;
        drained += 1;
    }
    debug!(drained, "Telemetry worker stopped");
}

async fn deliver(event: TelemetryEvent, usage: &dyn UsageLog, analytics: &dyn AnalyticsSink) {
    let TelemetryEvent {
        usage: entry,
        analytics: record,
    } = event;
    let tool = entry.tool_name.clone();
    let (usage_result, analytics_result) = tokio::join!(usage.log(entry), async move {
        match record {
            Some(record) => analytics.log_tool_call(record).await,
            None => Ok(()),
        }
    });
    if let Err(e) = usage_result {
        warn!(tool = %tool, error = %e, "Usage log write failed");
    }
    if let Err(e) = analytics_result {
        warn!(tool = %tool, error = %e, "Analytics write failed");
    }
}
