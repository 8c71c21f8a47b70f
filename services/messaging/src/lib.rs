//! Shared messaging layer: topic grammar, event types, and the status
//! publisher used by both the gateway and the in-container relay.

pub mod events;
pub mod publisher;
pub mod settings;
pub mod topics;

pub use events::{LifecycleState, LogEvent, MetricEvent, StatusEvent, TradeEvent};
pub use publisher::StatusPublisher;
pub use settings::MqttSettings;
pub use topics::{CommandKind, CommandTopic};
