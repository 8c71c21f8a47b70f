//! Lifecycle manager tests against a mocked runtime driver

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bot_gateway::commands::{Command, StartCommand, StopCommand, UpdateConfigCommand};
use bot_gateway::config::GatewaySettings;
use bot_gateway::error::RuntimeError;
use bot_gateway::lifecycle::LifecycleManager;
use bot_gateway::runtime::{CreateRequest, InstanceHandle, InstanceSummary, RuntimeDriver};
use bot_gateway::WorkerSpec;
use messaging::{LifecycleState, MqttSettings};

/// In-memory runtime driver recording every call.
#[derive(Default)]
struct MockRuntime {
    containers: Mutex<HashMap<String, InstanceHandle>>,
    envs: Mutex<HashMap<String, Vec<String>>>,
    auto_removes: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
    fail_create: AtomicBool,
}

impl MockRuntime {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn env_for(&self, name: &str) -> Vec<String> {
        self.envs.lock().unwrap().get(name).cloned().unwrap_or_default()
    }

    fn seed(&self, name: &str, state: &str) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            InstanceHandle {
                id: format!("seed-{name}"),
                name: name.to_string(),
                state: state.to_string(),
            },
        );
    }
}

#[async_trait]
impl RuntimeDriver for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn build_image(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create_and_start(&self, req: CreateRequest) -> Result<InstanceHandle, RuntimeError> {
        self.calls.lock().unwrap().push(format!("create:{}", req.name));
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(RuntimeError::Operation("image missing".to_string()));
        }

        let handle = InstanceHandle {
            id: format!("id-{}", req.name),
            name: req.name.clone(),
            state: "running".to_string(),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(req.name.clone(), handle.clone());
        self.envs.lock().unwrap().insert(req.name.clone(), req.env);
        self.auto_removes
            .lock()
            .unwrap()
            .insert(req.name, req.auto_remove);
        Ok(handle)
    }

    async fn get(&self, name: &str) -> Result<Option<InstanceHandle>, RuntimeError> {
        self.calls.lock().unwrap().push(format!("get:{name}"));
        Ok(self.containers.lock().unwrap().get(name).cloned())
    }

    async fn stop(&self, name: &str, _timeout_secs: i64) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("stop:{name}"));
        if let Some(handle) = self.containers.lock().unwrap().get_mut(name) {
            handle.state = "exited".to_string();
        }
        Ok(())
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("remove:{name}"));
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<InstanceSummary>, RuntimeError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.name.starts_with(prefix))
            .map(|h| InstanceSummary {
                id: h.id.clone(),
                name: h.name.clone(),
                status: h.state.clone(),
            })
            .collect())
    }
}

fn test_settings() -> GatewaySettings {
    GatewaySettings {
        mqtt: MqttSettings {
            host: "localhost".to_string(),
            port: 1883,
            username: "admin".to_string(),
            password: "public".to_string(),
            client_id: "test".to_string(),
            namespace: "bots".to_string(),
        },
        worker_image: "trader-worker".to_string(),
        worker_network: Some("trader-net".to_string()),
        image_build_context: None,
        default_mem_limit_mb: 2048,
        http_port: 8000,
    }
}

fn manager() -> (Arc<MockRuntime>, LifecycleManager) {
    let runtime = Arc::new(MockRuntime::default());
    let manager = LifecycleManager::new(runtime.clone(), test_settings());
    (runtime, manager)
}

fn spec(pairs: &[(&str, &str)]) -> WorkerSpec {
    let mut spec = WorkerSpec::default();
    for (k, v) in pairs {
        spec.config
            .insert(k.to_string(), serde_json::Value::String(v.to_string()));
    }
    spec
}

fn start(spec: WorkerSpec) -> Command {
    Command::Start(StartCommand { spec })
}

fn stop() -> Command {
    Command::Stop(StopCommand::default())
}

fn update(spec: WorkerSpec, skip_restart: bool) -> Command {
    Command::UpdateConfig(UpdateConfigCommand { spec, skip_restart })
}

#[tokio::test]
async fn test_double_start_creates_exactly_one_instance() {
    let (runtime, manager) = manager();
    let spec = spec(&[("exchange", "binance")]);

    let first = manager.apply("abc", start(spec.clone())).await.unwrap();
    let second = manager.apply("abc", start(spec)).await.unwrap();

    // Both commands report running even though only one instance exists.
    assert_eq!(first, LifecycleState::Running);
    assert_eq!(second, LifecycleState::Running);

    let creates: Vec<_> = runtime
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("create:"))
        .collect();
    assert_eq!(creates, vec!["create:worker_abc"]);
    assert_eq!(runtime.containers.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_builds_config_environment() {
    let (runtime, manager) = manager();
    let spec = spec(&[("exchange", "binance"), ("market", "BTC-USDT")]);

    manager.apply("abc", start(spec)).await.unwrap();

    let env = runtime.env_for("worker_abc");
    assert!(env.contains(&"WORKER_ID=abc".to_string()));
    assert!(env.contains(&"MQTT_HOST=localhost".to_string()));
    assert!(env.contains(&"CONFIG_EXCHANGE=binance".to_string()));
    assert!(env.contains(&"CONFIG_MARKET=BTC-USDT".to_string()));
    assert!(env.contains(&"CONFIG_STRATEGY_TYPE=legacy".to_string()));
}

#[tokio::test]
async fn test_start_replaces_stale_instance() {
    let (runtime, manager) = manager();
    runtime.seed("worker_abc", "exited");

    manager.apply("abc", start(WorkerSpec::default())).await.unwrap();

    let calls = runtime.calls();
    let remove_pos = calls.iter().position(|c| c == "remove:worker_abc").unwrap();
    let create_pos = calls.iter().position(|c| c == "create:worker_abc").unwrap();
    assert!(remove_pos < create_pos, "stale instance removed before recreation");
}

#[tokio::test]
async fn test_stop_nonexistent_worker_succeeds() {
    let (runtime, manager) = manager();

    let state = manager.apply("ghost", stop()).await.unwrap();

    assert_eq!(state, LifecycleState::Stopped);
    assert!(!runtime.calls().iter().any(|c| c.starts_with("stop:")));
}

#[tokio::test]
async fn test_stop_running_worker_issues_graceful_stop() {
    let (runtime, manager) = manager();
    manager.apply("abc", start(WorkerSpec::default())).await.unwrap();

    let state = manager.apply("abc", stop()).await.unwrap();

    assert_eq!(state, LifecycleState::Stopped);
    assert!(runtime.calls().contains(&"stop:worker_abc".to_string()));
}

#[tokio::test]
async fn test_update_config_skip_restart_never_touches_runtime() {
    let (runtime, manager) = manager();

    let state = manager
        .apply("abc", update(spec(&[("bid_spread", "0.2")]), true))
        .await
        .unwrap();

    assert_eq!(state, LifecycleState::Running);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_update_config_restarts_with_new_spec() {
    let (runtime, manager) = manager();
    manager
        .apply("abc", start(spec(&[("bid_spread", "0.1")])))
        .await
        .unwrap();

    manager
        .apply("abc", update(spec(&[("bid_spread", "0.3")]), false))
        .await
        .unwrap();

    let env = runtime.env_for("worker_abc");
    assert!(env.contains(&"CONFIG_BID_SPREAD=0.3".to_string()));
    let calls = runtime.calls();
    assert!(calls.contains(&"stop:worker_abc".to_string()));
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("create:")).count(),
        2
    );
}

#[tokio::test]
async fn test_backtest_names_are_unique_and_untracked() {
    let (runtime, manager) = manager();
    let spec = spec(&[("exchange", "binance")]);

    let first = manager
        .run_backtest("abc", &spec, "2023-01-01", "2023-01-02")
        .await
        .unwrap();
    let second = manager
        .run_backtest("abc", &spec, "2023-01-01", "2023-01-02")
        .await
        .unwrap();

    assert_ne!(first, second);

    let names: Vec<String> = runtime
        .containers
        .lock()
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert_eq!(names.len(), 2);
    for name in &names {
        assert!(name.starts_with("backtest_abc_"));
        assert!(runtime.auto_removes.lock().unwrap()[name]);
    }

    // Backtests never appear as live workers.
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backtest_env_carries_date_range() {
    let (runtime, manager) = manager();

    manager
        .run_backtest("abc", &WorkerSpec::default(), "2023-01-01", "2023-01-02")
        .await
        .unwrap();

    let name = runtime
        .containers
        .lock()
        .unwrap()
        .keys()
        .next()
        .cloned()
        .unwrap();
    let env = runtime.env_for(&name);
    assert!(env.contains(&"CONFIG_BACKTEST=true".to_string()));
    assert!(env.contains(&"CONFIG_BACKTEST_START=2023-01-01".to_string()));
    assert!(env.contains(&"CONFIG_BACKTEST_END=2023-01-02".to_string()));
    assert!(env.contains(&"WORKER_ID=bt_abc".to_string()));
}

#[tokio::test]
async fn test_list_projects_worker_ids() {
    let (_runtime, manager) = manager();
    manager.apply("abc", start(WorkerSpec::default())).await.unwrap();
    manager.apply("xyz", start(WorkerSpec::default())).await.unwrap();

    let mut workers = manager.list().await.unwrap();
    workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].worker_id, "abc");
    assert_eq!(workers[0].name, "worker_abc");
    assert_eq!(workers[1].worker_id, "xyz");
}

#[tokio::test]
async fn test_create_failure_propagates_without_panic() {
    let (runtime, manager) = manager();
    runtime.fail_create.store(true, Ordering::Relaxed);

    let err = manager
        .apply("abc", start(WorkerSpec::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("image missing"));
}
