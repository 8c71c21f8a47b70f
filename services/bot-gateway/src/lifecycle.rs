//! Worker lifecycle manager
//!
//! Owns the mapping from logical worker id to runtime instance. Every
//! operation is idempotent and serialized per worker id: commands for one
//! worker never interleave, commands for different workers run in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use messaging::{LifecycleState, StatusPublisher};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::commands::{Command, WorkerSpec};
use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::runtime::{CreateRequest, RuntimeDriver};

const WORKER_PREFIX: &str = "worker_";
const BACKTEST_PREFIX: &str = "backtest_";

/// Graceful stop window before the engine escalates to a kill.
const STOP_TIMEOUT_SECS: i64 = 30;

/// Pause between stop and start on a restart, letting the runtime release
/// the worker's name and network resources.
const RESTART_SETTLE: Duration = Duration::from_secs(2);

/// Runtime handle for one live worker, owned exclusively by the manager.
#[derive(Debug, Clone)]
pub struct WorkerInstance {
    pub container_id: String,
    pub name: String,
    pub worker_id: String,
    pub state: LifecycleState,
}

/// Projection returned by `list()` for external observers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub worker_id: String,
}

pub struct LifecycleManager {
    runtime: Arc<dyn RuntimeDriver>,
    settings: GatewaySettings,
    instances: RwLock<HashMap<String, WorkerInstance>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn RuntimeDriver>, settings: GatewaySettings) -> Self {
        Self {
            runtime,
            settings,
            instances: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_name(worker_id: &str) -> String {
        format!("{WORKER_PREFIX}{worker_id}")
    }

    /// Apply a command and publish exactly one status event for it, both
    /// inside the worker's critical section. Publishing before the lock is
    /// released keeps per-worker status order identical to command order.
    pub async fn execute(
        &self,
        worker_id: &str,
        command: Command,
        publisher: &StatusPublisher,
    ) {
        let lock = self.lock_for(worker_id).await;
        let _guard = lock.lock().await;

        match self.apply_locked(worker_id, command).await {
            Ok(state) => publisher.publish_status(worker_id, state).await,
            Err(e) => {
                warn!("Worker {}: command failed: {}", worker_id, e);
                publisher.publish_error(worker_id, &e.to_string()).await;
            }
        }
    }

    /// Apply a command under the worker's lock and return the resulting
    /// state instead of publishing it.
    pub async fn apply(
        &self,
        worker_id: &str,
        command: Command,
    ) -> Result<LifecycleState, GatewayError> {
        let lock = self.lock_for(worker_id).await;
        let _guard = lock.lock().await;
        self.apply_locked(worker_id, command).await
    }

    async fn apply_locked(
        &self,
        worker_id: &str,
        command: Command,
    ) -> Result<LifecycleState, GatewayError> {
        match command {
            Command::Start(cmd) => {
                self.start_locked(worker_id, &cmd.spec).await?;
                Ok(LifecycleState::Running)
            }
            Command::Stop(cmd) => {
                self.stop_locked(worker_id, cmd.skip_order_cancellation)
                    .await?;
                Ok(LifecycleState::Stopped)
            }
            Command::UpdateConfig(cmd) => {
                if cmd.skip_restart {
                    // The new configuration has already reached the worker
                    // out-of-band; pure pass-through at this layer.
                    info!(
                        "Worker {}: config pushed on the fly, skipping restart",
                        worker_id
                    );
                } else {
                    self.stop_locked(worker_id, false).await?;
                    tokio::time::sleep(RESTART_SETTLE).await;
                    self.start_locked(worker_id, &cmd.spec).await?;
                }
                Ok(LifecycleState::Running)
            }
        }
    }

    /// Launch a uniquely named, self-removing backtest instance and return
    /// its container id without waiting for completion. Backtests are never
    /// tracked as live workers.
    pub async fn run_backtest(
        &self,
        worker_id: &str,
        spec: &WorkerSpec,
        start_date: &str,
        end_date: &str,
    ) -> Result<String, GatewayError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{BACKTEST_PREFIX}{worker_id}_{}", &suffix[..8]);

        let mut env = self.build_env(&format!("bt_{worker_id}"), spec);
        env.push("CONFIG_BACKTEST=true".to_string());
        env.push(format!("CONFIG_BACKTEST_START={start_date}"));
        env.push(format!("CONFIG_BACKTEST_END={end_date}"));

        info!(
            "Worker {}: launching backtest {} ({} .. {})",
            worker_id, name, start_date, end_date
        );

        let handle = self
            .runtime
            .create_and_start(self.create_request(name, env, spec, true))
            .await?;

        Ok(handle.id)
    }

    /// List live workers by naming convention, stripping the prefix back to
    /// the logical worker id. Backtest instances never appear here.
    pub async fn list(&self) -> Result<Vec<WorkerSummary>, GatewayError> {
        let summaries = self.runtime.list(WORKER_PREFIX).await?;
        Ok(summaries
            .into_iter()
            .map(|s| {
                let worker_id = s
                    .name
                    .strip_prefix(WORKER_PREFIX)
                    .unwrap_or(&s.name)
                    .to_string();
                WorkerSummary {
                    id: s.id,
                    name: s.name,
                    status: s.status,
                    worker_id,
                }
            })
            .collect())
    }

    /// Liveness of the underlying engine, probed on demand.
    pub async fn runtime_available(&self) -> bool {
        self.runtime.ping().await.is_ok()
    }

    // A running instance with the same name is left untouched; a stale
    // instance in any other state is force-removed and recreated.
    async fn start_locked(&self, worker_id: &str, spec: &WorkerSpec) -> Result<(), GatewayError> {
        let name = Self::worker_name(worker_id);

        if let Some(existing) = self.runtime.get(&name).await? {
            if existing.state == "running" {
                info!("Worker {}: instance {} already running", worker_id, name);
                self.record(worker_id, &name, &existing.id, LifecycleState::Running)
                    .await;
                return Ok(());
            }
            // Stale or crashed instance: self-heal by recreating it.
            info!(
                "Worker {}: removing stale instance {} in state {}",
                worker_id, name, existing.state
            );
            self.runtime.remove(&name, true).await?;
        }

        let env = self.build_env(worker_id, spec);
        let handle = self
            .runtime
            .create_and_start(self.create_request(name.clone(), env, spec, false))
            .await?;

        info!("Worker {}: started instance {} ({})", worker_id, name, handle.id);
        self.record(worker_id, &name, &handle.id, LifecycleState::Running)
            .await;
        Ok(())
    }

    // Absent instances are treated as already stopped. The local record is
    // dropped even when the runtime call fails; state reconciles lazily on
    // the next list/start.
    async fn stop_locked(
        &self,
        worker_id: &str,
        skip_order_cancellation: bool,
    ) -> Result<(), GatewayError> {
        let name = Self::worker_name(worker_id);

        let found = self.runtime.get(&name).await?;
        let Some(existing) = found else {
            // Already stopped.
            self.instances.write().await.remove(worker_id);
            info!("Worker {}: no instance {}, treating stop as success", worker_id, name);
            return Ok(());
        };

        // The cancellation hint travels to the worker itself; this layer
        // only bounds the shutdown window.
        if skip_order_cancellation {
            info!("Worker {}: stopping without order cancellation", worker_id);
        }

        let result = if existing.state == "running" {
            self.runtime.stop(&name, STOP_TIMEOUT_SECS).await
        } else {
            Ok(())
        };

        self.instances.write().await.remove(worker_id);

        match result {
            Ok(()) => {
                info!("Worker {}: stopped instance {}", worker_id, name);
                Ok(())
            }
            Err(e) => {
                warn!("Worker {}: stop of {} failed: {}", worker_id, name, e);
                Err(e.into())
            }
        }
    }

    fn create_request(
        &self,
        name: String,
        env: Vec<String>,
        spec: &WorkerSpec,
        auto_remove: bool,
    ) -> CreateRequest {
        let mem_limit_mb = spec.mem_limit_mb.unwrap_or(self.settings.default_mem_limit_mb);
        CreateRequest {
            name,
            image: self.settings.worker_image.clone(),
            env,
            network: spec
                .network
                .clone()
                .or_else(|| self.settings.worker_network.clone()),
            mem_limit_bytes: Some(mem_limit_mb * 1024 * 1024),
            auto_remove,
        }
    }

    /// Environment is the sole channel by which declarative configuration
    /// crosses into the worker process.
    fn build_env(&self, worker_id: &str, spec: &WorkerSpec) -> Vec<String> {
        let mqtt = &self.settings.mqtt;
        let mut env = vec![
            format!("WORKER_ID={worker_id}"),
            format!("MQTT_HOST={}", mqtt.host),
            format!("MQTT_PORT={}", mqtt.port),
            format!("MQTT_USERNAME={}", mqtt.username),
            format!("MQTT_PASSWORD={}", mqtt.password),
            format!("TOPIC_NAMESPACE={}", mqtt.namespace),
            format!("CONFIG_STRATEGY_TYPE={}", spec.strategy_type.as_str()),
        ];

        for (key, value) in &spec.config {
            env.push(format!("CONFIG_{}={}", key.to_uppercase(), env_value(value)));
        }

        env
    }

    async fn record(&self, worker_id: &str, name: &str, id: &str, state: LifecycleState) {
        self.instances.write().await.insert(
            worker_id.to_string(),
            WorkerInstance {
                container_id: id.to_string(),
                name: name.to_string(),
                worker_id: worker_id.to_string(),
                state,
            },
        );
    }

    async fn lock_for(&self, worker_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(worker_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Scalar values cross bare, composite values as compact JSON.
fn env_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_value_stringification() {
        assert_eq!(env_value(&serde_json::json!("binance")), "binance");
        assert_eq!(env_value(&serde_json::json!(0.1)), "0.1");
        assert_eq!(env_value(&serde_json::json!(true)), "true");
        assert_eq!(
            env_value(&serde_json::json!({"controllers": []})),
            r#"{"controllers":[]}"#
        );
    }

    #[test]
    fn test_worker_name_derivation() {
        assert_eq!(LifecycleManager::worker_name("abc"), "worker_abc");
    }
}
