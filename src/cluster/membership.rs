//! Replica membership and leadership lookups.
//!
//! The membership view is owned by the gossip layer; this crate only reads it
//! through the [`Membership`] trait, once per request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{AgentwireError, Result};
use crate::protocol::LEADER;

/// Tag naming a member's role in the cluster.
pub const ROLE_TAG: &str = "role";

/// Role tag value carried by control-plane replicas.
pub const SERVER_ROLE: &str = "server";

/// Tag carrying the replica's RPC port when it differs from the gossip port.
pub const RPC_PORT_TAG: &str = "port";

/// Tag carrying the replica's region.
pub const REGION_TAG: &str = "region";

/// A gossip member as reported by the membership directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub addr: SocketAddr,
    pub tags: HashMap<String, String>,
}

impl Member {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            tags: HashMap::new(),
        }
    }

    /// Builder-style tag setter.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Member tagged as a control-plane replica.
    pub fn server(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self::new(name, addr).tag(ROLE_TAG, SERVER_ROLE)
    }
}

/// A control-plane replica that can be dialed for RPCs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub name: String,
    pub region: String,
    pub rpc_addr: SocketAddr,
}

impl ReplicaInfo {
    /// Interpret a gossip member as a replica.
    ///
    /// Returns `None` for members without the server role tag or with a
    /// malformed port tag.
    pub fn from_member(member: &Member) -> Option<Self> {
        if member.tags.get(ROLE_TAG).map(String::as_str) != Some(SERVER_ROLE) {
            return None;
        }

        let mut rpc_addr = member.addr;
        if let Some(port) = member.tags.get(RPC_PORT_TAG) {
            rpc_addr.set_port(port.parse().ok()?);
        }

        Some(Self {
            name: member.name.clone(),
            region: member.tags.get(REGION_TAG).cloned().unwrap_or_default(),
            rpc_addr,
        })
    }
}

/// Read-only snapshot of cluster membership and leadership.
///
/// Implementations must be safe for concurrent reads; they are mutated only
/// by the membership layer.
pub trait Membership: Send + Sync {
    /// Name of this replica.
    fn local_name(&self) -> String;

    /// Whether this replica currently holds leadership.
    fn is_leader(&self) -> bool;

    /// The current leader, when it is a different, known replica.
    fn leader(&self) -> Option<ReplicaInfo>;

    /// All known gossip members.
    fn members(&self) -> Vec<Member>;
}

/// Where a `ServerID` points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTarget {
    Local,
    Remote(ReplicaInfo),
}

/// Turns a symbolic replica target into a concrete one.
#[derive(Clone)]
pub struct MembershipResolver {
    membership: Arc<dyn Membership>,
}

impl MembershipResolver {
    pub fn new(membership: Arc<dyn Membership>) -> Self {
        Self { membership }
    }

    /// Name of this replica.
    pub fn local_name(&self) -> String {
        self.membership.local_name()
    }

    /// Resolve a `ServerID`.
    ///
    /// Empty, this replica's own name, and `"leader"` while leading all
    /// resolve to [`ServerTarget::Local`].
    ///
    /// # Errors
    ///
    /// `NoLeader` when targeting the leader and leadership is unknown;
    /// `UnknownServer` when no replica member carries the name.
    pub fn resolve(&self, server_id: &str) -> Result<ServerTarget> {
        if server_id.is_empty() {
            return Ok(ServerTarget::Local);
        }

        if server_id == LEADER {
            if self.membership.is_leader() {
                return Ok(ServerTarget::Local);
            }
            return self
                .membership
                .leader()
                .map(ServerTarget::Remote)
                .ok_or(AgentwireError::NoLeader);
        }

        if server_id == self.membership.local_name() {
            return Ok(ServerTarget::Local);
        }

        self.membership
            .members()
            .iter()
            .filter(|member| member.name == server_id)
            .find_map(ReplicaInfo::from_member)
            .map(ServerTarget::Remote)
            .ok_or_else(|| AgentwireError::UnknownServer(server_id.to_string()))
    }
}

/// Fixed membership snapshot.
///
/// Useful for single-replica deployments and as a test double; production
/// deployments implement [`Membership`] over their gossip layer.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    local: String,
    leader: Option<String>,
    members: Vec<Member>,
}

impl StaticMembership {
    /// Create a snapshot for the replica named `local` with no known leader.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            leader: None,
            members: Vec::new(),
        }
    }

    /// Add a gossip member.
    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    /// Set the leader by member name.
    pub fn with_leader(mut self, name: impl Into<String>) -> Self {
        self.leader = Some(name.into());
        self
    }
}

impl Membership for StaticMembership {
    fn local_name(&self) -> String {
        self.local.clone()
    }

    fn is_leader(&self) -> bool {
        self.leader.as_deref() == Some(self.local.as_str())
    }

    fn leader(&self) -> Option<ReplicaInfo> {
        let leader = self.leader.as_deref()?;
        if leader == self.local {
            return None;
        }
        self.members
            .iter()
            .filter(|member| member.name == leader)
            .find_map(ReplicaInfo::from_member)
    }

    fn members(&self) -> Vec<Member> {
        self.members.clone()
    }
}
