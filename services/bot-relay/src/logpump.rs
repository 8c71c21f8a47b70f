//! Log normalization and the pump loop.
//!
//! The wrapped engine writes colored, banner-heavy terminal output. Each
//! line is stripped of escape sequences, filtered against known-benign
//! noise, unwrapped when it is already JSON-encoded, classified by level
//! and republished as a structured log event.

use std::sync::OnceLock;

use messaging::{LogEvent, StatusPublisher};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tracing::debug;

/// Box-drawing and block characters from the engine's welcome banner.
const BANNER_CHARS: &str = "█╗╝╚═║╔";

fn ansi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLog {
    pub level: String,
    pub message: String,
}

/// Clean and classify one raw output line. Returns `None` for noise.
pub fn normalize_line(raw: &str) -> Option<NormalizedLog> {
    let clean = ansi_pattern().replace_all(raw, "").trim().to_string();
    if clean.is_empty() {
        return None;
    }

    // Welcome-screen banner art.
    if clean.chars().any(|c| BANNER_CHARS.contains(c)) {
        return None;
    }
    // Harmless artifacts of the scripted-input launch wrapper.
    if clean.contains("Broken pipe") && clean.contains("yes") {
        return None;
    }
    if clean.contains("/bin/bash:") {
        return None;
    }

    let mut level = classify(&clean);
    let mut message = clean;

    // Opportunistically unwrap lines the engine already emits as JSON.
    if message.starts_with('{') && message.ends_with('}') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&message) {
            if let Some(inner) = map.get("message").and_then(|v| v.as_str()) {
                let inner = inner.trim();
                if !inner.is_empty() {
                    message = inner.to_string();
                }
            }
            if let Some(l) = map.get("level").and_then(|v| v.as_str()) {
                level = l.to_lowercase();
            }
        }
    }

    if message.len() < 2 {
        return None;
    }

    Some(NormalizedLog { level, message })
}

fn classify(line: &str) -> String {
    let lower = line.to_lowercase();
    if lower.contains("error") {
        "error".to_string()
    } else if lower.contains("warning") {
        "warning".to_string()
    } else {
        "info".to_string()
    }
}

/// Read the engine's combined output line by line and republish every
/// surviving line upstream. Runs until the stream closes.
pub async fn pump(stdout: ChildStdout, publisher: StatusPublisher, worker_id: String) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("engine: {}", line);
        if let Some(log) = normalize_line(&line) {
            publisher
                .publish_log(&worker_id, &LogEvent::new(log.level, log.message))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ansi_codes_are_stripped() {
        let log = normalize_line("\x1b[31mERROR\x1b[0m order rejected").unwrap();
        assert_eq!(log.level, "error");
        assert_eq!(log.message, "ERROR order rejected");
    }

    #[test]
    fn test_broken_pipe_noise_is_suppressed() {
        assert!(normalize_line("yes: standard output: Broken pipe").is_none());
    }

    #[test]
    fn test_banner_art_is_suppressed() {
        assert!(normalize_line("║  Welcome to the engine  ║").is_none());
        assert!(normalize_line("╔══════════════╗").is_none());
        assert!(normalize_line("███ ENGINE ███").is_none());
    }

    #[test]
    fn test_shell_noise_is_suppressed() {
        assert!(normalize_line("/bin/bash: warning: setlocale failed").is_none());
    }

    #[test]
    fn test_json_lines_are_unwrapped_exactly() {
        let log = normalize_line(r#"{"level":"warning","message":"low balance"}"#).unwrap();
        assert_eq!(log.level, "warning");
        assert_eq!(log.message, "low balance");
    }

    #[test]
    fn test_level_classification_by_keyword() {
        assert_eq!(normalize_line("Error: connection refused").unwrap().level, "error");
        assert_eq!(normalize_line("WARNING low inventory").unwrap().level, "warning");
        assert_eq!(normalize_line("order filled").unwrap().level, "info");
    }

    #[test]
    fn test_short_lines_are_dropped() {
        assert!(normalize_line("x").is_none());
        assert!(normalize_line("   ").is_none());
        assert!(normalize_line("").is_none());
    }

    #[test]
    fn test_plain_lines_pass_through() {
        let log = normalize_line("Markets are ready. Trading started.").unwrap();
        assert_eq!(log.level, "info");
        assert_eq!(log.message, "Markets are ready. Trading started.");
    }
}
