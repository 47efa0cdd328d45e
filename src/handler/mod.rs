//! Handler module - endpoint registration and dispatch.
//!
//! Provides [`EndpointRegistry`], which maps RPC method names to unary or
//! streaming endpoints.
//!
//! # Example
//!
//! ```ignore
//! use agentwire::handler::EndpointRegistry;
//!
//! let mut registry = EndpointRegistry::new();
//! agent.register(&mut registry);
//!
//! registry.dispatch("Agent.Monitor", conn).await?;
//! ```

mod registry;

pub use registry::{
    BoxFuture, Endpoint, EndpointKind, EndpointRegistry, StreamingEndpoint, UnaryEndpoint,
};
