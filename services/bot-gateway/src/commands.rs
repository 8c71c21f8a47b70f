//! Typed command payloads
//!
//! The worker id is always taken from the topic, never from the payload.
//! Unknown payload fields are kept: anything not matching a named field
//! lands in the spec's free-form config map and crosses into the worker
//! environment as a `CONFIG_*` entry.

use std::collections::BTreeMap;

use messaging::CommandKind;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Worker strategy mode: one monolithic legacy strategy or a set of
/// declarative sub-strategy controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Legacy,
    Controllers,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Controllers => "controllers",
        }
    }
}

/// Declarative worker configuration. Immutable once submitted; replaced
/// only via an explicit config-update command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSpec {
    #[serde(default)]
    pub strategy_type: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit_mb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Free-form key/value configuration forwarded to the worker.
    #[serde(flatten)]
    pub config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartCommand {
    #[serde(default)]
    pub spec: WorkerSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopCommand {
    #[serde(default)]
    pub skip_order_cancellation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfigCommand {
    #[serde(default)]
    pub spec: WorkerSpec,
    #[serde(default)]
    pub skip_restart: bool,
}

/// Backtest request arriving over the collaborator HTTP surface.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestRequest {
    #[serde(default)]
    pub spec: WorkerSpec,
    pub start_date: String,
    pub end_date: String,
}

/// A validated lifecycle command ready for dispatch.
#[derive(Debug, Clone)]
pub enum Command {
    Start(StartCommand),
    Stop(StopCommand),
    UpdateConfig(UpdateConfigCommand),
}

impl Command {
    /// Decode a raw payload against the schema for its topic's command.
    pub fn parse(kind: CommandKind, payload: &[u8]) -> Result<Self, GatewayError> {
        let malformed = |e: serde_json::Error| GatewayError::MalformedCommand(e.to_string());
        match kind {
            CommandKind::Start => serde_json::from_slice(payload)
                .map(Command::Start)
                .map_err(malformed),
            CommandKind::Stop => serde_json::from_slice(payload)
                .map(Command::Stop)
                .map_err(malformed),
            CommandKind::ConfigUpdate => serde_json::from_slice(payload)
                .map(Command::UpdateConfig)
                .map_err(malformed),
        }
    }
}
