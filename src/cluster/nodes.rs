//! Worker node metadata and live node connections.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::ReplicaInfo;
use crate::error::{AgentwireError, Result};
use crate::transport::BoxedConn;

/// Catalog entry for a worker node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: String,
    /// Whether the node's agent serves streaming agent RPCs.
    pub supports_rpc: bool,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            supports_rpc: true,
        }
    }
}

/// Node metadata lookup, backed by the state store.
pub trait NodeCatalog: Send + Sync {
    /// Look a node up by id. `Ok(None)` means the node does not exist.
    fn node_by_id(&self, node_id: &str) -> Result<Option<NodeInfo>>;
}

/// A live multiplexed session to a worker node held by this replica.
#[async_trait]
pub trait NodeSession: Send + Sync {
    /// Open a new stream on the session addressed to `method`.
    async fn open_stream(&self, method: &str) -> Result<BoxedConn>;
}

/// Registry of node sessions.
pub trait NodeConnections: Send + Sync {
    /// Session held by this replica, if any.
    fn node_session(&self, node_id: &str) -> Option<Arc<dyn NodeSession>>;

    /// Replica that holds a session to the node.
    ///
    /// # Errors
    ///
    /// `NoNodeConnection` when no replica holds one.
    fn server_with_node_conn(&self, node_id: &str) -> Result<ReplicaInfo>;
}

/// Concurrent in-memory [`NodeConnections`] registry.
///
/// Sessions are registered by the connection handler when a node dials in;
/// remote holders are recorded from node heartbeats forwarded by peers.
#[derive(Default)]
pub struct NodeConnectionTable {
    sessions: DashMap<String, Arc<dyn NodeSession>>,
    remote: DashMap<String, ReplicaInfo>,
}

impl NodeConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session held by this replica.
    pub fn register(&self, node_id: impl Into<String>, session: Arc<dyn NodeSession>) {
        self.sessions.insert(node_id.into(), session);
    }

    /// Drop this replica's session to a node.
    pub fn unregister(&self, node_id: &str) {
        self.sessions.remove(node_id);
    }

    /// Record which peer replica holds a node's session.
    pub fn record_remote(&self, node_id: impl Into<String>, replica: ReplicaInfo) {
        self.remote.insert(node_id.into(), replica);
    }

    /// Forget a remote holder.
    pub fn forget_remote(&self, node_id: &str) {
        self.remote.remove(node_id);
    }

    /// Number of locally held sessions.
    pub fn local_count(&self) -> usize {
        self.sessions.len()
    }
}

impl NodeConnections for NodeConnectionTable {
    fn node_session(&self, node_id: &str) -> Option<Arc<dyn NodeSession>> {
        self.sessions.get(node_id).map(|entry| Arc::clone(entry.value()))
    }

    fn server_with_node_conn(&self, node_id: &str) -> Result<ReplicaInfo> {
        self.remote
            .get(node_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AgentwireError::NoNodeConnection(node_id.to_string()))
    }
}

/// Fixed node catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeCatalog {
    nodes: HashMap<String, NodeInfo>,
}

impl StaticNodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    pub fn node(mut self, info: NodeInfo) -> Self {
        self.nodes.insert(info.id.clone(), info);
        self
    }
}

impl NodeCatalog for StaticNodeCatalog {
    fn node_by_id(&self, node_id: &str) -> Result<Option<NodeInfo>> {
        Ok(self.nodes.get(node_id).cloned())
    }
}
