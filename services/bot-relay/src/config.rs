//! Relay configuration and worker-side artifact generation
//!
//! All environment-derived state is read exactly once here; every consumer
//! receives this struct by reference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use messaging::MqttSettings;
use serde_json::json;
use tracing::{info, warn};

use crate::error::RelayError;

const CONFIG_PREFIX: &str = "CONFIG_";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub worker_id: String,
    pub mqtt: MqttSettings,
    /// `legacy` or `controllers`.
    pub strategy_type: String,
    /// Declarative configuration recovered from `CONFIG_*` variables,
    /// keyed by the original lowercase names.
    pub config: BTreeMap<String, String>,
    pub backtest: bool,
    pub backtest_start: String,
    pub backtest_end: String,
    /// Full engine command line override.
    pub engine_cmd: Option<String>,
    pub conf_dir: PathBuf,
    pub ledger_path: PathBuf,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| "default".to_string());

        let mut config = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(CONFIG_PREFIX) {
                config.insert(name.to_lowercase(), value);
            }
        }

        let strategy_type = config
            .get("strategy_type")
            .cloned()
            .unwrap_or_else(|| "legacy".to_string());
        let backtest = config.get("backtest").map(|v| v == "true").unwrap_or(false);
        let backtest_start = config
            .get("backtest_start")
            .cloned()
            .unwrap_or_else(|| "2023-01-01".to_string());
        let backtest_end = config
            .get("backtest_end")
            .cloned()
            .unwrap_or_else(|| "2023-01-02".to_string());

        let conf_dir = std::env::var("WORKER_CONF_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/worker/conf"));
        let ledger_path = std::env::var("TRADE_LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/worker/data/trades.sqlite"));

        Self {
            mqtt: MqttSettings::from_env(format!("bot-relay-{worker_id}")),
            worker_id,
            strategy_type,
            config,
            backtest,
            backtest_start,
            backtest_end,
            engine_cmd: std::env::var("ENGINE_CMD").ok(),
            conf_dir,
            ledger_path,
        }
    }

    pub fn config_value(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn strategy_path(&self) -> PathBuf {
        self.conf_dir.join("strategy.yml")
    }

    pub fn controllers_path(&self) -> PathBuf {
        self.conf_dir.join("controllers.yml")
    }

    pub fn global_path(&self) -> PathBuf {
        self.conf_dir.join("global.yml")
    }

    /// Remote override artifact, distinct from the launch artifacts. The
    /// engine polls this path and hot-reloads on its own.
    pub fn override_path(&self) -> PathBuf {
        self.conf_dir.join("remote_override.yml")
    }

    /// Generate the on-disk configuration artifacts consumed by the engine
    /// at launch. An unparsable controllers spec is reported but does not
    /// abort: the engine launches with an empty controller set.
    pub fn write_artifacts(&self) -> Result<(), RelayError> {
        std::fs::create_dir_all(&self.conf_dir)?;

        if self.strategy_type == "controllers" {
            let raw = self.config_value("controllers", r#"{"controllers":[]}"#);
            let parsed: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Invalid controllers configuration ({}), using empty set", e);
                    json!({ "controllers": [] })
                }
            };
            write_yaml(&self.controllers_path(), &parsed)?;
            info!("Controllers configuration generated");
        } else {
            let strategy = self.legacy_strategy_template();
            write_yaml(&self.strategy_path(), &strategy)?;
            info!("Legacy strategy configuration generated");
        }

        let global = json!({
            "instance_id": self.worker_id,
            "log_level": self.config_value("log_level", "INFO"),
            "debug_console": false,
            "strategy_report_interval": 900,
        });
        write_yaml(&self.global_path(), &global)?;

        Ok(())
    }

    /// Single-strategy template with conservative market-making defaults.
    fn legacy_strategy_template(&self) -> serde_json::Value {
        json!({
            "template_version": 10,
            "strategy": "single_strategy",
            "exchange": self.config_value("exchange", "binance"),
            "market": self.config_value("market", "BTC-USDT"),
            "bid_spread": parse_f64(&self.config_value("bid_spread", "0.1"), 0.1),
            "ask_spread": parse_f64(&self.config_value("ask_spread", "0.1"), 0.1),
            "order_amount": parse_f64(&self.config_value("order_amount", "0.01"), 0.01),
            "order_refresh_time": 30,
            "max_order_age": 1800,
            "filled_order_delay": 10,
            "inventory_target_base_pct": 50,
            "kill_switch_enabled": false,
        })
    }
}

fn parse_f64(raw: &str, default: f64) -> f64 {
    raw.parse().unwrap_or(default)
}

fn write_yaml(path: &Path, value: &serde_json::Value) -> Result<(), RelayError> {
    let file = std::fs::File::create(path)?;
    serde_yaml::to_writer(file, value)
        .map_err(|e| RelayError::ConfigGeneration(e.to_string()))
}
