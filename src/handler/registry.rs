//! Endpoint registry for dispatching connections by method name.
//!
//! Two endpoint shapes exist:
//! - **unary** - one MsgPack request in, one [`RpcResponse`] out
//! - **streaming** - the handler takes over the connection
//!
//! # Example
//!
//! ```ignore
//! use agentwire::handler::EndpointRegistry;
//!
//! let mut registry = EndpointRegistry::new();
//!
//! registry.register_unary("Status.Ping", |_: ()| async move {
//!     Ok::<_, RpcError>("pong".to_string())
//! });
//! registry.register_streaming("Agent.Monitor", move |conn| {
//!     let agent = agent.clone();
//!     async move { agent.monitor(conn).await }
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AgentwireError, Result, RpcError, CODE_INTERNAL};
use crate::protocol::{RpcResponse, DEFAULT_MAX_MESSAGE_SIZE};
use crate::transport::{read_message, write_message, BoxedConn};

/// Boxed future for endpoint results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How an endpoint uses its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Unary,
    Streaming,
}

/// A registered endpoint. Owns the connection for the rest of its life.
pub trait Endpoint: Send + Sync + 'static {
    fn call(&self, conn: BoxedConn, max_message_size: u32) -> BoxFuture<'static, Result<()>>;
}

/// Wrapper that decodes the request, runs the handler and writes the reply.
pub struct UnaryEndpoint<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, RpcError>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> UnaryEndpoint<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, RpcError>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Endpoint for UnaryEndpoint<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, RpcError>> + Send + 'static,
{
    fn call(&self, mut conn: BoxedConn, max_message_size: u32) -> BoxFuture<'static, Result<()>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let response: RpcResponse<R> = match read_message::<_, T>(&mut conn, max_message_size).await {
                Ok(request) => handler(request).await.into(),
                Err(e) => RpcResponse::err(e.to_rpc_coded(CODE_INTERNAL)),
            };
            write_message(&mut conn, &response).await
        })
    }
}

/// Wrapper handing the raw connection to a streaming handler.
pub struct StreamingEndpoint<F, Fut>
where
    F: Fn(BoxedConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    handler: F,
}

impl<F, Fut> StreamingEndpoint<F, Fut>
where
    F: Fn(BoxedConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Endpoint for StreamingEndpoint<F, Fut>
where
    F: Fn(BoxedConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, conn: BoxedConn, _max_message_size: u32) -> BoxFuture<'static, Result<()>> {
        let fut = (self.handler)(conn);
        Box::pin(async move {
            fut.await;
            Ok(())
        })
    }
}

struct EndpointEntry {
    endpoint: Box<dyn Endpoint>,
    kind: EndpointKind,
}

/// Registry mapping method names to endpoints.
pub struct EndpointRegistry {
    endpoints: HashMap<String, EndpointEntry>,
    max_message_size: u32,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit on request messages read by unary endpoints.
    pub fn max_message_size(mut self, max: u32) -> Self {
        self.max_message_size = max;
        self
    }

    /// Register a request/response endpoint.
    pub fn register_unary<F, T, R, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, RpcError>> + Send + 'static,
    {
        self.endpoints.insert(
            name.to_string(),
            EndpointEntry {
                endpoint: Box::new(UnaryEndpoint::new(handler)),
                kind: EndpointKind::Unary,
            },
        );
    }

    /// Register an endpoint that takes over the connection.
    pub fn register_streaming<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(BoxedConn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.endpoints.insert(
            name.to_string(),
            EndpointEntry {
                endpoint: Box::new(StreamingEndpoint::new(handler)),
                kind: EndpointKind::Streaming,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&dyn Endpoint> {
        self.endpoints.get(name).map(|e| e.endpoint.as_ref())
    }

    pub fn kind(&self, name: &str) -> Option<EndpointKind> {
        self.endpoints.get(name).map(|e| e.kind)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Hand `conn` to the endpoint registered under `method`.
    ///
    /// Unknown methods get a 404 reply before the connection closes.
    pub async fn dispatch(&self, method: &str, mut conn: BoxedConn) -> Result<()> {
        let Some(endpoint) = self.get(method) else {
            let err = AgentwireError::UnknownMethod(method.to_string());
            let _ = write_message(&mut conn, &RpcResponse::<()>::err(err.to_rpc())).await;
            return Err(err);
        };
        endpoint.call(conn, self.max_message_size).await
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
