//! Event types published over the transport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker instance.
///
/// `Error` is reachable from any non-terminal state. Idempotent
/// start/stop transitions still emit a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// Retained status snapshot for a worker. Late subscribers observe the
/// last-known state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub worker_id: String,
    pub state: LifecycleState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusEvent {
    pub fn new(worker_id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            worker_id: worker_id.into(),
            state,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(worker_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: LifecycleState::Error,
            timestamp: Utc::now(),
            error: Some(detail.into()),
        }
    }
}

/// Best-effort structured log line from a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Best-effort process resource sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    pub fn now(cpu_pct: f64, mem_pct: f64) -> Self {
        Self {
            cpu_pct,
            mem_pct,
            timestamp: Utc::now(),
        }
    }
}

/// A trade row scraped from the worker's local ledger. The timestamp is
/// epoch milliseconds as recorded by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: i64,
    pub market: String,
    pub symbol: String,
    pub side: String,
    pub price: f64,
    pub amount: f64,
    pub timestamp: i64,
}
