//! Shared per-process state.

use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    backend::{BackendsConfig, ToolRegistry},
    config::ProxyConfig,
    hooks::HookChain,
};

pub struct AppContext {
    pub config: ProxyConfig,
    /// Connection pool to the upstream gateway, shared read-only after init.
    pub client: reqwest::Client,
    pub registry: Arc<ToolRegistry>,
    pub hooks: HookChain,
}

impl AppContext {
    /// Build the HTTP client, load the backend list, and bring the registry
    /// up. Returns once the catalog is ready.
    pub async fn new(config: ProxyConfig) -> Result<Arc<Self>, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .build()
            .map_err(|e| format!("build HTTP client: {}", e))?;

        let backends = BackendsConfig::load(&config.backends_config)?;
        let registry = ToolRegistry::init(backends).await;

        info!(
            upstream = %config.upstream_base_url,
            tools = registry.tool_names().len(),
            hybrid_streaming = config.enable_hybrid_streaming,
            "Proxy context initialized"
        );

        Ok(Arc::new(Self {
            config,
            client,
            registry,
            hooks: HookChain::new(),
        }))
    }

    /// Context with a caller-supplied hook chain.
    pub async fn with_hooks(config: ProxyConfig, hooks: HookChain) -> Result<Arc<Self>, String> {
        let ctx = Self::new(config).await?;
        let mut inner = Arc::try_unwrap(ctx).map_err(|_| "context already shared".to_string())?;
        inner.hooks = hooks;
        Ok(Arc::new(inner))
    }
}
