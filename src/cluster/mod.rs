//! Cluster view - replica membership and worker node connections.
//!
//! Both are external collaborators: this crate reads them per request and
//! never mutates the membership view.

mod membership;
mod nodes;

pub use membership::{
    Member, Membership, MembershipResolver, ReplicaInfo, ServerTarget, StaticMembership,
    REGION_TAG, ROLE_TAG, RPC_PORT_TAG, SERVER_ROLE,
};
pub use nodes::{
    NodeCatalog, NodeConnectionTable, NodeConnections, NodeInfo, NodeSession, StaticNodeCatalog,
};
