//! Gateway configuration loaded from environment

use std::path::PathBuf;

use messaging::MqttSettings;

/// Everything the gateway needs, constructed once at startup and passed by
/// reference to the components that consume it.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub mqtt: MqttSettings,
    /// Image every worker container runs.
    pub worker_image: String,
    /// Network workers attach to unless the spec overrides it.
    pub worker_network: Option<String>,
    /// Optional tarball with the worker image build context. Absent means
    /// the image is expected to exist already.
    pub image_build_context: Option<PathBuf>,
    /// Default container memory limit in megabytes.
    pub default_mem_limit_mb: i64,
    pub http_port: u16,
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        let worker_image =
            std::env::var("WORKER_IMAGE").unwrap_or_else(|_| "trader-worker".to_string());
        let worker_network = std::env::var("WORKER_NETWORK").ok().filter(|n| !n.is_empty());
        let image_build_context = std::env::var("IMAGE_BUILD_CONTEXT").ok().map(PathBuf::from);
        let default_mem_limit_mb = std::env::var("WORKER_MEM_LIMIT_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2048);
        let http_port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        Self {
            mqtt: MqttSettings::from_env(format!("bot-gateway-{}", std::process::id())),
            worker_image,
            worker_network,
            image_build_context,
            default_mem_limit_mb,
            http_port,
        }
    }
}
