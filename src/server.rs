//! RPC server builder and accept loop.
//!
//! The [`Server`] manages the lifecycle:
//! 1. Bind a TCP listener
//! 2. Accept connections, bounded by a connection semaphore
//! 3. Read the [`RpcHeader`] naming the endpoint
//! 4. Hand the connection to the registered endpoint
//!
//! # Example
//!
//! ```ignore
//! use agentwire::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .agent(&agent)
//!         .max_concurrent_connections(512)
//!         .bind("0.0.0.0:4647")
//!         .await?;
//!
//!     server.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::{AgentwireError, Result, RpcError};
use crate::handler::EndpointRegistry;
use crate::protocol::{RpcHeader, DEFAULT_MAX_MESSAGE_SIZE};
use crate::transport::{read_message, BoxedConn};

/// Default maximum concurrent connections.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 256;

/// Default time allowed for the endpoint header to arrive.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest [`RpcHeader`] accepted from a connection that has not yet named
/// an endpoint.
pub const MAX_RPC_HEADER_SIZE: u32 = 4 * 1024;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Connections beyond this are closed immediately.
    pub max_concurrent_connections: usize,
    /// Largest accepted message.
    pub max_message_size: u32,
    /// Deadline for the endpoint header.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Builder for configuring and starting a [`Server`].
pub struct ServerBuilder {
    registry: EndpointRegistry,
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            registry: EndpointRegistry::new(),
            config: ServerConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve the agent debug endpoints.
    pub fn agent(mut self, agent: &Arc<Agent>) -> Self {
        agent.register(&mut self.registry);
        self
    }

    /// Register a request/response endpoint.
    pub fn handle_unary<F, T, R, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, RpcError>> + Send + 'static,
    {
        self.registry.register_unary(method, handler);
        self
    }

    /// Register an endpoint that takes over the connection.
    pub fn handle_streaming<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(BoxedConn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.registry.register_streaming(method, handler);
        self
    }

    /// Set the maximum number of concurrent connections.
    ///
    /// Default: 256
    pub fn max_concurrent_connections(mut self, limit: usize) -> Self {
        self.config.max_concurrent_connections = limit;
        self
    }

    /// Set the maximum message size.
    ///
    /// Default: 64 MiB
    pub fn max_message_size(mut self, max: u32) -> Self {
        self.config.max_message_size = max;
        self
    }

    /// Set the endpoint header deadline.
    ///
    /// Default: 10 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Stop the server when `token` is cancelled.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Bind and start serving.
    pub async fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener)
    }

    /// Start serving on an already bound listener.
    pub fn serve(self, listener: TcpListener) -> Result<Server> {
        Server::start(listener, self.registry, self.config, self.shutdown)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running RPC server.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    fn start(
        listener: TcpListener,
        registry: EndpointRegistry,
        config: ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let registry = Arc::new(registry.max_message_size(config.max_message_size));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_connections));

        tracing::info!(addr = %local_addr, endpoints = ?registry.names(), "agent RPC server listening");

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            config,
            semaphore,
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Arc<EndpointRegistry>,
        config: ServerConfig,
        semaphore: Arc<Semaphore>,
        shutdown: CancellationToken,
    ) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        continue;
                    }
                },
            };

            // Try to acquire semaphore permit
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!(%peer, "connection capacity reached, dropping connection");
                    continue;
                }
            };

            let registry = registry.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                // Permit is held until this task completes
                let _permit = permit;

                tokio::select! {
                    res = Self::handle_connection(stream, &registry, &config) => {
                        if let Err(e) = res {
                            tracing::debug!(%peer, error = %e, "connection ended with error");
                        }
                    }
                    _ = shutdown.cancelled() => {}
                }
            });
        }
        tracing::debug!("accept loop stopped");
    }

    async fn handle_connection(
        mut stream: TcpStream,
        registry: &EndpointRegistry,
        config: &ServerConfig,
    ) -> Result<()> {
        let _ = stream.set_nodelay(true);

        let header: RpcHeader = tokio::time::timeout(
            config.handshake_timeout,
            read_message(&mut stream, MAX_RPC_HEADER_SIZE.min(config.max_message_size)),
        )
        .await
        .map_err(|_| AgentwireError::Protocol("timed out waiting for RPC header".to_string()))??;

        tracing::debug!(method = %header.method, "dispatching connection");
        registry.dispatch(&header.method, Box::new(stream)).await
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close active connections.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the accept loop stops.
    pub async fn wait_for_shutdown(self) {
        let _ = self.accept_task.await;
    }
}
