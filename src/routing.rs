//! Request routing - decide where an agent request executes.
//!
//! Rules, in order:
//! 1. `NodeID` set: the node, over this replica's own session when it holds
//!    one, otherwise via the replica that does.
//! 2. `ServerID` names another replica: that replica.
//! 3. `ServerID` is `"leader"` and this replica does not lead: the leader.
//! 4. Otherwise: this replica.
//!
//! Lookups are in-memory; the router never retries or blocks.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cluster::{
    Membership, MembershipResolver, NodeCatalog, NodeConnections, NodeSession, ReplicaInfo,
    ServerTarget,
};
use crate::error::{AgentwireError, Result};
use crate::protocol::Addressed;
use crate::remote::call_unary;
use crate::transport::{BoxedConn, ReplicaDialer};

/// Where a request should execute.
pub enum Target {
    /// Execute on this replica.
    Local,
    /// This replica holds a live session to the node.
    NodeDirect {
        node_id: String,
        session: Arc<dyn NodeSession>,
    },
    /// Another replica holds the node's session and must proxy.
    NodeViaReplica {
        node_id: String,
        replica: ReplicaInfo,
    },
    /// Execute on another replica.
    ReplicaDirect(ReplicaInfo),
    /// No destination; the error selects the response code.
    Unresolved(AgentwireError),
}

impl Target {
    /// Check if the request executes on this replica.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::NodeDirect { node_id, .. } => {
                f.debug_struct("NodeDirect").field("node_id", node_id).finish()
            }
            Self::NodeViaReplica { node_id, replica } => f
                .debug_struct("NodeViaReplica")
                .field("node_id", node_id)
                .field("replica", &replica.name)
                .finish(),
            Self::ReplicaDirect(replica) => f.debug_tuple("ReplicaDirect").field(&replica.name).finish(),
            Self::Unresolved(err) => f.debug_tuple("Unresolved").field(err).finish(),
        }
    }
}

/// Copy of a request ready to be sent to another hop.
///
/// The replica target is cleared so the receiving replica never forwards it
/// again on the strength of `ServerID`.
pub fn forwarded_copy<R: Addressed + Clone>(request: &R) -> R {
    let mut copy = request.clone();
    copy.clear_server_id();
    copy
}

/// Classifies requests and opens connections to their destinations.
#[derive(Clone)]
pub struct RequestRouter {
    membership: MembershipResolver,
    catalog: Arc<dyn NodeCatalog>,
    nodes: Arc<dyn NodeConnections>,
    dialer: Arc<dyn ReplicaDialer>,
}

impl RequestRouter {
    pub fn new(
        membership: Arc<dyn Membership>,
        catalog: Arc<dyn NodeCatalog>,
        nodes: Arc<dyn NodeConnections>,
        dialer: Arc<dyn ReplicaDialer>,
    ) -> Self {
        Self {
            membership: MembershipResolver::new(membership),
            catalog,
            nodes,
            dialer,
        }
    }

    /// Name of this replica.
    pub fn local_name(&self) -> String {
        self.membership.local_name()
    }

    /// Decide where `request` executes.
    pub fn route<R: Addressed + ?Sized>(&self, request: &R) -> Target {
        let target = if !request.node_id().is_empty() {
            self.route_node(request.node_id())
        } else {
            match self.membership.resolve(request.server_id()) {
                Ok(ServerTarget::Local) => Target::Local,
                Ok(ServerTarget::Remote(replica)) => Target::ReplicaDirect(replica),
                Err(err) => Target::Unresolved(err),
            }
        };

        debug!(
            node_id = request.node_id(),
            server_id = request.server_id(),
            target = ?target,
            "routed agent request"
        );
        target
    }

    fn route_node(&self, node_id: &str) -> Target {
        let node = match self.catalog.node_by_id(node_id) {
            Ok(Some(node)) => node,
            Ok(None) => return Target::Unresolved(AgentwireError::UnknownNode(node_id.to_string())),
            Err(err) => return Target::Unresolved(err),
        };

        if !node.supports_rpc {
            return Target::Unresolved(AgentwireError::NodeUnsupported(node_id.to_string()));
        }

        if let Some(session) = self.nodes.node_session(node_id) {
            return Target::NodeDirect {
                node_id: node_id.to_string(),
                session,
            };
        }

        match self.nodes.server_with_node_conn(node_id) {
            Ok(replica) => Target::NodeViaReplica {
                node_id: node_id.to_string(),
                replica,
            },
            Err(err) => Target::Unresolved(err),
        }
    }

    /// Open a connection to a forwarding target, addressed to `method`.
    ///
    /// # Errors
    ///
    /// Returns the unresolved reason for `Unresolved`, and a protocol error
    /// for `Local` (there is nothing to dial).
    pub async fn open(&self, target: &Target, method: &str) -> Result<BoxedConn> {
        match target {
            Target::NodeDirect { session, .. } => session.open_stream(method).await,
            Target::NodeViaReplica { replica, .. } | Target::ReplicaDirect(replica) => {
                self.dialer.open_stream(replica, method).await
            }
            Target::Unresolved(err) => Err(AgentwireError::Protocol(format!(
                "cannot open unresolved target: {}",
                err
            ))),
            Target::Local => Err(AgentwireError::Protocol(
                "local target has no connection".to_string(),
            )),
        }
    }

    /// Forward a unary call: one request out, exactly one response back.
    ///
    /// The connection is closed when this returns, whatever the outcome.
    pub async fn forward_unary<Req, Resp>(
        &self,
        target: &Target,
        method: &str,
        request: &Req,
        max_message_size: u32,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut conn = self.open(target, method).await?;
        call_unary(&mut conn, request, max_message_size).await
    }
}
