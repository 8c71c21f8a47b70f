//! Bot gateway: message-driven control plane for trading-bot workers.
//!
//! Consumes lifecycle commands from the broker, drives the container
//! runtime to start/stop/reconfigure/backtest worker instances, and
//! publishes status transitions back out.

pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod router;
pub mod runtime;

pub use commands::{BacktestRequest, Command, StrategyKind, WorkerSpec};
pub use config::GatewaySettings;
pub use error::{GatewayError, RuntimeError};
pub use lifecycle::{LifecycleManager, WorkerSummary};
pub use router::{CommandRouter, RouterHandle};
pub use runtime::{CreateRequest, DockerDriver, InstanceHandle, InstanceSummary, RuntimeDriver};
