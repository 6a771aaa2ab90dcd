// src/core/plugin/mod.rs

//! The plugin pipeline: every operation on a session flows through an
//! ordered, subscription-filtered chain of plugins, each of which may pass
//! the call on, short-circuit it, or re-invoke the remainder of the chain
//! for a retry. The terminal plugin performs the real work.

pub mod auth;
pub mod default_plugin;
pub mod efm;
pub mod factory;
pub mod failover;
pub mod read_write_splitting;
pub mod service;

use crate::config::Properties;
use crate::core::dialect::IsolationLevel;
use crate::core::driver::{QueryResult, WireConnection};
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostInfo;
use crate::core::topology::NodeChanges;
use async_trait::async_trait;
use bitflags::bitflags;
use futures::future::BoxFuture;
use serde_json::Value;
use service::PluginService;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Method names plugins can subscribe to.
pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const FORCE_CONNECT: &str = "forceConnect";
    pub const INIT_HOST_PROVIDER: &str = "initHostProvider";
    pub const NOTIFY_CONNECTION_CHANGED: &str = "notifyConnectionChanged";
    pub const NOTIFY_NODE_LIST_CHANGED: &str = "notifyNodeListChanged";

    pub const QUERY: &str = "query";
    pub const EXECUTE: &str = "execute";
    pub const COMMIT: &str = "commit";
    pub const ROLLBACK: &str = "rollback";
    pub const SET_READ_ONLY: &str = "setReadOnly";
    pub const SET_AUTO_COMMIT: &str = "setAutoCommit";
    pub const SET_SCHEMA: &str = "setSchema";
    pub const SET_CATALOG: &str = "setCatalog";
    pub const SET_TRANSACTION_ISOLATION: &str = "setTransactionIsolation";
    pub const END: &str = "end";
}

/// A plugin's subscription set: either the wildcard or an explicit list.
#[derive(Debug, Clone)]
pub enum Subscriptions {
    All,
    Methods(HashSet<&'static str>),
}

impl Subscriptions {
    pub fn of(methods: &[&'static str]) -> Self {
        Subscriptions::Methods(methods.iter().copied().collect())
    }

    pub fn includes(&self, method: &str) -> bool {
        match self {
            Subscriptions::All => true,
            Subscriptions::Methods(set) => set.contains(method),
        }
    }
}

/// One data-verb invocation travelling down the chain.
#[derive(Debug, Clone)]
pub enum SqlOperation {
    Query { sql: String, params: Vec<Value> },
    Execute { sql: String, params: Vec<Value> },
    Commit,
    Rollback,
    SetReadOnly(bool),
    SetAutoCommit(bool),
    SetTransactionIsolation(IsolationLevel),
    SetSchema(String),
    SetCatalog(String),
    End,
}

impl SqlOperation {
    pub fn method_name(&self) -> &'static str {
        match self {
            SqlOperation::Query { .. } => methods::QUERY,
            SqlOperation::Execute { .. } => methods::EXECUTE,
            SqlOperation::Commit => methods::COMMIT,
            SqlOperation::Rollback => methods::ROLLBACK,
            SqlOperation::SetReadOnly(_) => methods::SET_READ_ONLY,
            SqlOperation::SetAutoCommit(_) => methods::SET_AUTO_COMMIT,
            SqlOperation::SetTransactionIsolation(_) => methods::SET_TRANSACTION_ISOLATION,
            SqlOperation::SetSchema(_) => methods::SET_SCHEMA,
            SqlOperation::SetCatalog(_) => methods::SET_CATALOG,
            SqlOperation::End => methods::END,
        }
    }

    /// The raw SQL the operation carries, when it carries any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            SqlOperation::Query { sql, .. } | SqlOperation::Execute { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// What a chain invocation produces.
#[derive(Debug, Clone)]
pub enum OperationResult {
    Rows(QueryResult),
    Unit,
}

impl OperationResult {
    pub fn rows(&self) -> Option<&QueryResult> {
        match self {
            OperationResult::Rows(result) => Some(result),
            OperationResult::Unit => None,
        }
    }
}

bitflags! {
    /// What changed when the current target client was swapped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnectionChanges: u8 {
        const CONNECTION_OBJECT_CHANGED = 1 << 0;
        const HOST_CHANGED              = 1 << 1;
        const PROMOTED_TO_WRITER        = 1 << 2;
        const PROMOTED_TO_READER        = 1 << 3;
        const INITIAL_CONNECTION        = 1 << 4;
    }
}

/// A plugin's verdict on the connection it is being told about. If any
/// plugin answers `Preserve`, the previous target is retained for that
/// plugin's own use instead of being disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOpinion {
    NoOpinion,
    Preserve,
    Dispose,
}

/// Mutable context for the `initHostProvider` pipeline. Plugins that cannot
/// operate on a static host list demand a topology-aware provider here.
#[derive(Debug, Default)]
pub struct HostProviderInit {
    pub force_topology_aware: AtomicBool,
}

impl HostProviderInit {
    pub fn require_topology_aware(&self) {
        self.force_topology_aware
            .store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn topology_aware_required(&self) -> bool {
        self.force_topology_aware
            .load(std::sync::atomic::Ordering::Acquire)
    }
}

/// The continuation handed to a plugin's `execute`. Calling `run` invokes the
/// rest of the chain; a plugin may call it zero, one, or several times, but
/// must never assume the continuation is idempotent.
#[derive(Clone, Copy)]
pub struct ExecuteChain<'a> {
    plugins: &'a [Arc<dyn ConnectionPlugin>],
    service: &'a Arc<PluginService>,
}

impl<'a> ExecuteChain<'a> {
    pub fn service(&self) -> &Arc<PluginService> {
        self.service
    }

    pub fn run(self, op: &'a SqlOperation) -> BoxFuture<'a, Result<OperationResult>> {
        Box::pin(async move {
            match self.plugins.split_first() {
                Some((head, rest)) => {
                    let next = ExecuteChain {
                        plugins: rest,
                        service: self.service,
                    };
                    head.execute(op, next).await
                }
                None => Err(DroverError::Internal(
                    "Plugin chain exhausted without a terminal plugin".to_string(),
                )),
            }
        })
    }
}

/// The continuation for the `connect` / `forceConnect` pipelines.
#[derive(Clone, Copy)]
pub struct ConnectChain<'a> {
    plugins: &'a [Arc<dyn ConnectionPlugin>],
    service: &'a Arc<PluginService>,
    force: bool,
}

impl<'a> ConnectChain<'a> {
    pub fn service(&self) -> &Arc<PluginService> {
        self.service
    }

    pub fn run(
        self,
        host: &'a Arc<HostInfo>,
        props: &'a Properties,
        is_initial: bool,
    ) -> BoxFuture<'a, Result<Arc<dyn WireConnection>>> {
        Box::pin(async move {
            match self.plugins.split_first() {
                Some((head, rest)) => {
                    let next = ConnectChain {
                        plugins: rest,
                        service: self.service,
                        force: self.force,
                    };
                    if self.force {
                        head.force_connect(host, props, is_initial, next).await
                    } else {
                        head.connect(host, props, is_initial, next).await
                    }
                }
                None => Err(DroverError::Internal(
                    "Connect pipeline exhausted without a terminal plugin".to_string(),
                )),
            }
        })
    }
}

/// The continuation for the `initHostProvider` pipeline.
#[derive(Clone, Copy)]
pub struct InitChain<'a> {
    plugins: &'a [Arc<dyn ConnectionPlugin>],
    service: &'a Arc<PluginService>,
}

impl<'a> InitChain<'a> {
    pub fn service(&self) -> &Arc<PluginService> {
        self.service
    }

    pub fn run(
        self,
        props: &'a Properties,
        init: &'a HostProviderInit,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.plugins.split_first() {
                Some((head, rest)) => {
                    let next = InitChain {
                        plugins: rest,
                        service: self.service,
                    };
                    head.init_host_provider(props, init, next).await
                }
                None => Err(DroverError::Internal(
                    "Init pipeline exhausted without a terminal plugin".to_string(),
                )),
            }
        })
    }
}

/// A component that may intercept one or more operations on a session.
/// Every hook defaults to passing straight through.
#[async_trait]
pub trait ConnectionPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn subscriptions(&self) -> Subscriptions;

    async fn execute(&self, op: &SqlOperation, next: ExecuteChain<'_>) -> Result<OperationResult> {
        next.run(op).await
    }

    async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        next.run(host, props, is_initial).await
    }

    /// Like `connect` but reserved for internal connections that must bypass
    /// interception (monitoring connections in particular).
    async fn force_connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        next.run(host, props, is_initial).await
    }

    async fn init_host_provider(
        &self,
        props: &Properties,
        init: &HostProviderInit,
        next: InitChain<'_>,
    ) -> Result<()> {
        next.run(props, init).await
    }

    async fn notify_connection_changed(&self, _changes: ConnectionChanges) -> PluginOpinion {
        PluginOpinion::NoOpinion
    }

    async fn notify_host_list_changed(&self, _changes: &HashMap<String, NodeChanges>) {}
}

/// The ordered chain for one session. Plugins keep their user-configured
/// order; the terminal plugin is always appended last and subscribes to
/// everything.
pub struct PluginChain {
    entries: Vec<(Arc<dyn ConnectionPlugin>, Subscriptions)>,
    service: Arc<PluginService>,
}

impl PluginChain {
    pub fn new(service: Arc<PluginService>, mut plugins: Vec<Arc<dyn ConnectionPlugin>>) -> Arc<Self> {
        plugins.push(Arc::new(default_plugin::DefaultPlugin));
        let entries = plugins
            .into_iter()
            .map(|plugin| {
                let subs = plugin.subscriptions();
                (plugin, subs)
            })
            .collect();
        let chain = Arc::new(Self {
            entries,
            service: service.clone(),
        });
        service.attach_chain(&chain);
        chain
    }

    pub fn service(&self) -> &Arc<PluginService> {
        &self.service
    }

    fn subscribed(&self, method: &str) -> Vec<Arc<dyn ConnectionPlugin>> {
        self.entries
            .iter()
            .filter(|(_, subs)| subs.includes(method))
            .map(|(plugin, _)| plugin.clone())
            .collect()
    }

    pub async fn execute(&self, op: &SqlOperation) -> Result<OperationResult> {
        let plugins = self.subscribed(op.method_name());
        ExecuteChain {
            plugins: &plugins,
            service: &self.service,
        }
        .run(op)
        .await
    }

    pub async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
    ) -> Result<Arc<dyn WireConnection>> {
        let plugins = self.subscribed(methods::CONNECT);
        ConnectChain {
            plugins: &plugins,
            service: &self.service,
            force: false,
        }
        .run(host, props, is_initial)
        .await
    }

    pub async fn force_connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
    ) -> Result<Arc<dyn WireConnection>> {
        let plugins = self.subscribed(methods::FORCE_CONNECT);
        ConnectChain {
            plugins: &plugins,
            service: &self.service,
            force: true,
        }
        .run(host, props, is_initial)
        .await
    }

    pub async fn init_host_provider(
        &self,
        props: &Properties,
        init: &HostProviderInit,
    ) -> Result<()> {
        let plugins = self.subscribed(methods::INIT_HOST_PROVIDER);
        InitChain {
            plugins: &plugins,
            service: &self.service,
        }
        .run(props, init)
        .await
    }

    /// Delivers a connection-change notification to every subscribed plugin,
    /// synchronously and in order, collecting their opinions.
    pub async fn notify_connection_changed(&self, changes: ConnectionChanges) -> Vec<PluginOpinion> {
        let mut opinions = Vec::new();
        for plugin in self.subscribed(methods::NOTIFY_CONNECTION_CHANGED) {
            opinions.push(plugin.notify_connection_changed(changes).await);
        }
        opinions
    }

    pub async fn notify_host_list_changed(&self, changes: &HashMap<String, NodeChanges>) {
        if changes.is_empty() {
            return;
        }
        for plugin in self.subscribed(methods::NOTIFY_NODE_LIST_CHANGED) {
            plugin.notify_host_list_changed(changes).await;
        }
    }
}
