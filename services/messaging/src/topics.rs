//! Topic grammar for the control plane.
//!
//! Commands flow in on `<ns>/<worker_id>/start`, `<ns>/<worker_id>/stop`
//! and `<ns>/<worker_id>/config/update`. Status and telemetry flow out on
//! `<ns>/<worker_id>/status`, `/logs/<level>`, `/metrics` and `/trades`.

/// Command carried by an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    ConfigUpdate,
}

/// A parsed inbound command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub worker_id: String,
    pub kind: CommandKind,
}

impl CommandTopic {
    /// Decompose an inbound topic. Returns `None` for anything that does
    /// not match the `<ns>/<worker_id>/<command>` shape.
    pub fn parse(namespace: &str, topic: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 3 || parts[0] != namespace || parts[1].is_empty() {
            return None;
        }

        let kind = match (parts[2], parts.get(3)) {
            ("start", None) => CommandKind::Start,
            ("stop", None) => CommandKind::Stop,
            ("config", Some(&"update")) if parts.len() == 4 => CommandKind::ConfigUpdate,
            _ => return None,
        };

        Some(Self {
            worker_id: parts[1].to_string(),
            kind,
        })
    }
}

/// Subscription filters covering every command topic in the namespace.
pub fn command_filters(namespace: &str) -> [String; 3] {
    [
        format!("{namespace}/+/start"),
        format!("{namespace}/+/stop"),
        format!("{namespace}/+/config/update"),
    ]
}

pub fn status(namespace: &str, worker_id: &str) -> String {
    format!("{namespace}/{worker_id}/status")
}

pub fn logs(namespace: &str, worker_id: &str, level: &str) -> String {
    format!("{namespace}/{worker_id}/logs/{level}")
}

pub fn metrics(namespace: &str, worker_id: &str) -> String {
    format!("{namespace}/{worker_id}/metrics")
}

pub fn trades(namespace: &str, worker_id: &str) -> String {
    format!("{namespace}/{worker_id}/trades")
}

pub fn config_update(namespace: &str, worker_id: &str) -> String {
    format!("{namespace}/{worker_id}/config/update")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_topic() {
        let parsed = CommandTopic::parse("bots", "bots/abc/start").unwrap();
        assert_eq!(parsed.worker_id, "abc");
        assert_eq!(parsed.kind, CommandKind::Start);
    }

    #[test]
    fn test_parse_config_update_topic() {
        let parsed = CommandTopic::parse("bots", "bots/w1/config/update").unwrap();
        assert_eq!(parsed.worker_id, "w1");
        assert_eq!(parsed.kind, CommandKind::ConfigUpdate);
    }

    #[test]
    fn test_parse_rejects_malformed_topics() {
        assert!(CommandTopic::parse("bots", "bots/abc").is_none());
        assert!(CommandTopic::parse("bots", "other/abc/start").is_none());
        assert!(CommandTopic::parse("bots", "bots//start").is_none());
        assert!(CommandTopic::parse("bots", "bots/abc/restart").is_none());
        assert!(CommandTopic::parse("bots", "bots/abc/config").is_none());
        assert!(CommandTopic::parse("bots", "bots/abc/config/update/extra").is_none());
    }

    #[test]
    fn test_outbound_topics() {
        assert_eq!(status("bots", "abc"), "bots/abc/status");
        assert_eq!(logs("bots", "abc", "warning"), "bots/abc/logs/warning");
        assert_eq!(metrics("bots", "abc"), "bots/abc/metrics");
        assert_eq!(trades("bots", "abc"), "bots/abc/trades");
    }

    #[test]
    fn test_command_filters_cover_all_commands() {
        let filters = command_filters("bots");
        assert_eq!(filters[0], "bots/+/start");
        assert_eq!(filters[1], "bots/+/stop");
        assert_eq!(filters[2], "bots/+/config/update");
    }
}
