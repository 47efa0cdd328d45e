//! # agentwire
//!
//! Debug request router for cluster agents.
//!
//! A replica serves two agent endpoints and routes each request to where it
//! must execute: this replica, another replica, or a worker node reachable
//! through whichever replica holds its session.
//!
//! - **`Agent.Monitor`** (streaming): live log lines, batched into frames and
//!   written as envelopes until the caller disconnects
//! - **`Agent.Profile`** (unary): one profile capture, local or forwarded
//!
//! ## Wire format
//!
//! Every message is a 4-byte big-endian length followed by a MessagePack
//! body. A connection opens with an `RpcHeader` naming the endpoint.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agentwire::{Agent, AgentConfig, RequestRouter, Server};
//!
//! #[tokio::main]
//! async fn main() -> agentwire::Result<()> {
//!     let router = RequestRouter::new(membership, catalog, nodes, Arc::new(TcpDialer::new()));
//!     let agent = Arc::new(Agent::new(
//!         router,
//!         Arc::new(AllowAll),
//!         Arc::new(LogHub::new()),
//!         Arc::new(ProcessProfiler),
//!         AgentConfig::default(),
//!     ));
//!
//!     let server = Server::builder().agent(&agent).bind("0.0.0.0:4647").await?;
//!     server.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod acl;
pub mod agent;
pub mod cluster;
pub mod codec;
pub mod error;
pub mod handler;
pub mod monitor;
pub mod profile;
pub mod protocol;
pub mod remote;
pub mod routing;
pub mod server;
pub mod transport;

pub use agent::{Agent, AgentConfig, MonitorOutcome, MONITOR_METHOD};
pub use error::{AgentwireError, Result, RpcError};
pub use profile::{ProfileDispatcher, PROFILE_METHOD};
pub use routing::{RequestRouter, Target};
pub use server::{Server, ServerBuilder, ServerConfig};
