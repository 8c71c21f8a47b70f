//! Engine process launch and interactive prompt handling.
//!
//! The engine expects a TTY and an interactive confirmation sequence on
//! startup, so it is launched under `script` (which allocates a pty) and
//! fed a burst of newlines once it has had time to render its prompts.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;

const DEFAULT_ENGINE_BIN: &str = "/worker/bin/trader-engine";

/// Delay before the first prompt acknowledgement is sent.
const PROMPT_INITIAL_DELAY: Duration = Duration::from_secs(5);
/// Number of newline acknowledgements and the pause between them.
const PROMPT_COUNT: usize = 5;
const PROMPT_INTERVAL: Duration = Duration::from_secs(2);

/// Full shell command line for the engine, honoring the override from
/// the environment when set.
pub fn engine_command(cfg: &RelayConfig) -> String {
    if let Some(cmd) = &cfg.engine_cmd {
        return cmd.clone();
    }

    let mut cmd = String::from(DEFAULT_ENGINE_BIN);
    if cfg.strategy_type == "controllers" {
        cmd.push_str(&format!(" --controllers {}", cfg.controllers_path().display()));
    } else {
        cmd.push_str(&format!(" --strategy-config {}", cfg.strategy_path().display()));
    }
    if cfg.backtest {
        cmd.push_str(&format!(
            " --backtest --start-date {} --end-date {}",
            cfg.backtest_start, cfg.backtest_end
        ));
    }
    cmd
}

/// Launch the engine inside a pty wrapper with piped stdin/stdout.
/// stderr is merged into stdout by the wrapper itself.
pub fn spawn(cfg: &RelayConfig) -> Result<Child, RelayError> {
    let cmd = engine_command(cfg);
    info!("Launching engine: {}", cmd);

    let child = Command::new("script")
        .args(["-q", "-e", "-c", &cmd, "/dev/null"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    Ok(child)
}

/// Acknowledge the engine's startup prompts by sending newlines on a
/// fixed cadence. Write errors end the sequence early, which is normal
/// when the engine exits before all prompts are consumed.
pub async fn feed_prompts(mut stdin: ChildStdin) {
    tokio::time::sleep(PROMPT_INITIAL_DELAY).await;
    for _ in 0..PROMPT_COUNT {
        if let Err(e) = stdin.write_all(b"\n").await {
            warn!("Stopped feeding startup prompts: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("Stopped feeding startup prompts: {}", e);
            break;
        }
        tokio::time::sleep(PROMPT_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use messaging::MqttSettings;

    fn base_config() -> RelayConfig {
        RelayConfig {
            worker_id: "bot1".to_string(),
            mqtt: MqttSettings {
                host: "localhost".to_string(),
                port: 1883,
                username: String::new(),
                password: String::new(),
                client_id: "relay-bot1".to_string(),
                namespace: "bots".to_string(),
            },
            strategy_type: "legacy".to_string(),
            config: BTreeMap::new(),
            backtest: false,
            backtest_start: String::new(),
            backtest_end: String::new(),
            engine_cmd: None,
            conf_dir: PathBuf::from("/worker/conf"),
            ledger_path: PathBuf::from("/worker/data/trades.sqlite"),
        }
    }

    #[test]
    fn test_legacy_command_uses_strategy_config() {
        let cmd = engine_command(&base_config());
        assert!(cmd.contains("--strategy-config /worker/conf/strategy.yml"));
        assert!(!cmd.contains("--backtest"));
    }

    #[test]
    fn test_controllers_command_uses_controllers_file() {
        let mut cfg = base_config();
        cfg.strategy_type = "controllers".to_string();
        let cmd = engine_command(&cfg);
        assert!(cmd.contains("--controllers /worker/conf/controllers.yml"));
    }

    #[test]
    fn test_backtest_flags_are_appended() {
        let mut cfg = base_config();
        cfg.backtest = true;
        cfg.backtest_start = "2024-01-01".to_string();
        cfg.backtest_end = "2024-02-01".to_string();
        let cmd = engine_command(&cfg);
        assert!(cmd.contains("--backtest --start-date 2024-01-01 --end-date 2024-02-01"));
    }

    #[test]
    fn test_explicit_command_overrides_default() {
        let mut cfg = base_config();
        cfg.engine_cmd = Some("sleep 60".to_string());
        assert_eq!(engine_command(&cfg), "sleep 60");
    }
}
