//! Tool registry: launches, supervises, and multiplexes tool backends.
//!
//! The registry starts every configured backend concurrently, interrogates
//! each with `list_tools`, and builds the global catalog. A backend that
//! fails to come up or answer within the discovery budget is excluded and
//! logged, never fatal. Exited backends are restarted with exponential
//! backoff and the catalog is swapped atomically, so readers observe either
//! the pre- or post-restart snapshot.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::{
    backend::{
        config::{BackendDescriptor, BackendsConfig},
        error::{BackendError, BackendResult},
        session::BackendSession,
    },
    protocols::chat::ToolSpec,
};

const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const RESTART_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const RESTART_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Dispatch surface the invoker runs against. Implemented by the registry;
/// tests substitute their own.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// Execute one tool call with already-parsed arguments, returning the
    /// tool's text output.
    async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> BackendResult<String>;
}

/// One exposed tool in the catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Name the tool is exposed under: the bare name, or `backend.tool` when
    /// two backends advertise the same bare name.
    pub qualified_name: String,
    /// Owning backend.
    pub backend: String,
    /// Bare name the backend itself understands.
    pub tool: String,
    /// Spec advertised to the model (function name = qualified name).
    pub spec: ToolSpec,
}

type Catalog = HashMap<String, CatalogEntry>;

pub struct ToolRegistry {
    descriptors: BTreeMap<String, BackendDescriptor>,
    sessions: DashMap<String, Arc<BackendSession>>,
    backend_tools: DashMap<String, Vec<ToolSpec>>,
    catalog: RwLock<Arc<Catalog>>,
    shutting_down: AtomicBool,
}

impl ToolRegistry {
    /// Start all configured backends and build the catalog. Returns once
    /// every backend has either reported its tools or been excluded.
    pub async fn init(config: BackendsConfig) -> Arc<Self> {
        let registry = Arc::new(Self {
            descriptors: config.backends,
            sessions: DashMap::new(),
            backend_tools: DashMap::new(),
            catalog: RwLock::new(Arc::new(Catalog::new())),
            shutting_down: AtomicBool::new(false),
        });

        let startups = registry.descriptors.iter().map(|(name, descriptor)| {
            let name = name.clone();
            let descriptor = descriptor.clone();
            async move { (name.clone(), start_backend(&name, &descriptor).await) }
        });

        for (name, outcome) in join_all(startups).await {
            match outcome {
                Ok((session, tools)) => {
                    info!(backend = %name, tools = tools.len(), "Backend ready");
                    registry.sessions.insert(name.clone(), session);
                    registry.backend_tools.insert(name.clone(), tools);
                    Arc::clone(&registry).supervise(name);
                }
                Err(e) => {
                    error!(backend = %name, error = %e, "Backend excluded from catalog");
                }
            }
        }

        registry.rebuild_catalog();
        info!(
            backends = registry.sessions.len(),
            tools = registry.catalog.read().len(),
            "Tool registry ready"
        );
        registry
    }

    /// True when no backend exposes any tool.
    pub fn is_empty(&self) -> bool {
        self.catalog.read().is_empty()
    }

    /// Specs of every exposed tool, ordered by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let catalog = self.catalog.read().clone();
        let mut specs: Vec<ToolSpec> = catalog.values().map(|e| e.spec.clone()).collect();
        specs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        specs
    }

    /// Exposed names, ordered. Diagnostics surface only.
    pub fn tool_names(&self) -> Vec<String> {
        let catalog = self.catalog.read().clone();
        let mut names: Vec<String> = catalog.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tear down every backend: close stdin, allow a grace period, then
    /// force-terminate. In-flight calls fail with `Shutdown`.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let sessions: Vec<Arc<BackendSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        join_all(
            sessions
                .iter()
                .map(|session| session.shutdown(SHUTDOWN_GRACE)),
        )
        .await;
        self.sessions.clear();
        self.backend_tools.clear();
        self.rebuild_catalog();
        info!("Tool registry shut down");
    }

    fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Watch one backend for exit and restart it with exponential backoff,
    /// swapping the session and refreshed catalog atomically.
    fn supervise(self: Arc<Self>, name: String) {
        let registry = self;
        tokio::spawn(async move {
            loop {
                let Some(session) = registry
                    .sessions
                    .get(&name)
                    .map(|entry| Arc::clone(entry.value()))
                else {
                    break;
                };
                session.wait_closed().await;
                if registry.shutting_down() {
                    break;
                }

                warn!(backend = %name, "Backend exited, scheduling restart");
                registry.sessions.remove(&name);
                registry.backend_tools.remove(&name);
                registry.rebuild_catalog();

                match registry.restart_with_backoff(&name).await {
                    Some((session, tools)) => {
                        info!(backend = %name, tools = tools.len(), "Backend restarted");
                        registry.sessions.insert(name.clone(), session);
                        registry.backend_tools.insert(name.clone(), tools);
                        registry.rebuild_catalog();
                    }
                    None => break,
                }
            }
        });
    }

    async fn restart_with_backoff(
        &self,
        name: &str,
    ) -> Option<(Arc<BackendSession>, Vec<ToolSpec>)> {
        let descriptor = self.descriptors.get(name)?.clone();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(RESTART_INITIAL_BACKOFF)
            .with_max_interval(RESTART_MAX_BACKOFF)
            .with_max_elapsed_time(None)
            .build();

        let result = backoff::future::retry(policy, || async {
            if self.shutting_down() {
                return Err(backoff::Error::permanent(BackendError::Shutdown));
            }
            start_backend(name, &descriptor).await.map_err(|e| {
                warn!(backend = %name, error = %e, "Restart attempt failed");
                backoff::Error::transient(e)
            })
        })
        .await;

        result.ok()
    }

    fn rebuild_catalog(&self) {
        let tools_by_backend: BTreeMap<String, Vec<ToolSpec>> = self
            .backend_tools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let catalog = build_catalog(&tools_by_backend);
        *self.catalog.write() = Arc::new(catalog);
    }
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> BackendResult<String> {
        if self.shutting_down() {
            return Err(BackendError::Shutdown);
        }
        let entry = {
            let catalog = self.catalog.read().clone();
            catalog
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::UnknownTool(name.to_string()))?
        };
        let session = self
            .sessions
            .get(&entry.backend)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| BackendError::BackendUnavailable {
                backend: entry.backend.clone(),
            })?;
        session.call_tool(&entry.tool, arguments).await
    }
}

async fn start_backend(
    name: &str,
    descriptor: &BackendDescriptor,
) -> BackendResult<(Arc<BackendSession>, Vec<ToolSpec>)> {
    let session = Arc::new(BackendSession::spawn(name, descriptor)?);
    let tools = match tokio::time::timeout(LIST_TOOLS_TIMEOUT, session.list_tools()).await {
        Ok(Ok(tools)) => tools,
        Ok(Err(e)) => {
            session.shutdown(Duration::from_secs(1)).await;
            return Err(e);
        }
        Err(_) => {
            session.shutdown(Duration::from_secs(1)).await;
            return Err(BackendError::ListToolsTimeout {
                backend: name.to_string(),
                timeout_secs: LIST_TOOLS_TIMEOUT.as_secs(),
            });
        }
    };
    Ok((session, tools))
}

/// Build the exposed catalog from per-backend tool lists.
///
/// A bare name advertised by exactly one backend is exposed as-is; a name
/// advertised by several backends is exposed only under `backend.tool` for
/// each of them. Deterministic for a given set of inputs.
fn build_catalog(tools_by_backend: &BTreeMap<String, Vec<ToolSpec>>) -> Catalog {
    let mut owners: HashMap<&str, usize> = HashMap::new();
    for tools in tools_by_backend.values() {
        let mut seen: Vec<&str> = Vec::new();
        for spec in tools {
            let name = spec.function.name.as_str();
            if !seen.contains(&name) {
                seen.push(name);
                *owners.entry(name).or_insert(0) += 1;
            }
        }
    }

    let mut catalog = Catalog::new();
    for (backend, tools) in tools_by_backend {
        for spec in tools {
            let bare = spec.function.name.clone();
            let qualified = if owners.get(bare.as_str()).copied().unwrap_or(0) > 1 {
                format!("{}.{}", backend, bare)
            } else {
                bare.clone()
            };
            let mut exposed = spec.clone();
            exposed.function.name = qualified.clone();
            catalog.insert(
                qualified.clone(),
                CatalogEntry {
                    qualified_name: qualified,
                    backend: backend.clone(),
                    tool: bare,
                    spec: exposed,
                },
            );
        }
    }
    catalog
}
