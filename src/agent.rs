//! Agent debug endpoints: `Agent.Monitor` and `Agent.Profile`.
//!
//! The monitor handshake runs in a fixed order:
//! 1. decode the [`MonitorRequest`] (failure: 500)
//! 2. check agent read capability (denied: 403, token failure: uncoded)
//! 3. validate the log level (unknown: 400)
//! 4. route: forward and bridge, or stream locally
//!
//! Every rejection is a single error envelope followed by connection close.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::acl::{authorize, Authorizer, Capability};
use crate::error::{RpcError, CODE_INTERNAL};
use crate::handler::EndpointRegistry;
use crate::monitor::{LogLevel, LogSource, MonitorConfig, MonitorOptions, SessionReport, StreamPipeline};
use crate::profile::{ProfileDispatcher, Profiler, PROFILE_METHOD};
use crate::protocol::{AgentProfileRequest, AgentProfileResponse, MonitorRequest, StreamEnvelope, DEFAULT_MAX_MESSAGE_SIZE};
use crate::routing::{forwarded_copy, RequestRouter, Target};
use crate::transport::{bridge, read_message, write_message, BridgeEnd, Conn};

/// Stable endpoint name for log monitoring.
pub const MONITOR_METHOD: &str = "Agent.Monitor";

/// Agent endpoint configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub monitor: MonitorConfig,
    /// Largest accepted request or forwarded response.
    pub max_message_size: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl AgentConfig {
    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn max_message_size(mut self, max: u32) -> Self {
        self.max_message_size = max;
        self
    }
}

/// How a monitor connection ended.
#[derive(Debug)]
pub enum MonitorOutcome {
    /// Rejected during the handshake with this error.
    Rejected(RpcError),
    /// Forwarded and bridged; the side that finished first.
    Forwarded(BridgeEnd),
    /// Streamed from this replica.
    Streamed(SessionReport),
}

/// The agent debug endpoints of one replica.
pub struct Agent {
    router: RequestRouter,
    authorizer: Arc<dyn Authorizer>,
    logs: Arc<dyn LogSource>,
    profiles: ProfileDispatcher,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        router: RequestRouter,
        authorizer: Arc<dyn Authorizer>,
        logs: Arc<dyn LogSource>,
        profiler: Arc<dyn Profiler>,
        config: AgentConfig,
    ) -> Self {
        let profiles = ProfileDispatcher::new(router.clone(), authorizer.clone(), profiler)
            .max_message_size(config.max_message_size);
        Self {
            router,
            authorizer,
            logs,
            profiles,
            config,
        }
    }

    /// Register `Agent.Monitor` and `Agent.Profile`.
    pub fn register(self: &Arc<Self>, registry: &mut EndpointRegistry) {
        let agent = Arc::clone(self);
        registry.register_streaming(MONITOR_METHOD, move |conn| {
            let agent = agent.clone();
            async move {
                agent.monitor(conn).await;
            }
        });

        let agent = Arc::clone(self);
        registry.register_unary(PROFILE_METHOD, move |request: AgentProfileRequest| {
            let agent = agent.clone();
            async move { agent.profile(request).await }
        });
    }

    /// Serve one monitor connection to completion.
    pub async fn monitor<C: Conn>(&self, mut conn: C) -> MonitorOutcome {
        let request: MonitorRequest = match read_message(&mut conn, self.config.max_message_size).await {
            Ok(request) => request,
            Err(e) => return reject(conn, e.to_rpc_coded(CODE_INTERNAL)).await,
        };

        if let Err(e) = authorize(&self.authorizer, &request.auth_token, Capability::AgentRead).await {
            return reject(conn, e.to_rpc()).await;
        }

        let level = match LogLevel::from_request(&request.log_level) {
            Ok(level) => level,
            Err(e) => return reject(conn, e.to_rpc()).await,
        };

        match self.router.route(&request) {
            Target::Local => {
                let options = MonitorOptions {
                    level,
                    json: request.log_json,
                    buffer: self.config.monitor.log_buffer,
                };
                let pipeline = StreamPipeline::new(self.config.monitor.clone(), options, request.plain_text);
                let report = pipeline.run(conn, self.logs.as_ref()).await;
                debug!(envelopes = report.envelopes_sent, cancelled = report.cancelled, "monitor session closed");
                MonitorOutcome::Streamed(report)
            }
            Target::Unresolved(e) => reject(conn, e.to_rpc()).await,
            target => self.forward_monitor(conn, &target, &request).await,
        }
    }

    async fn forward_monitor<C: Conn>(&self, conn: C, target: &Target, request: &MonitorRequest) -> MonitorOutcome {
        let mut upstream = match self.router.open(target, MONITOR_METHOD).await {
            Ok(upstream) => upstream,
            Err(e) => return reject(conn, e.to_rpc_coded(CODE_INTERNAL)).await,
        };

        if let Err(e) = write_message(&mut upstream, &forwarded_copy(request)).await {
            return reject(conn, e.to_rpc_coded(CODE_INTERNAL)).await;
        }

        debug!(target = ?target, "bridging forwarded monitor stream");
        MonitorOutcome::Forwarded(bridge(conn, upstream).await)
    }

    /// Serve one profile request.
    pub async fn profile(&self, request: AgentProfileRequest) -> Result<AgentProfileResponse, RpcError> {
        self.profiles.dispatch(request).await
    }
}

async fn reject<C: Conn>(mut conn: C, error: RpcError) -> MonitorOutcome {
    warn!(error = %error, "rejecting monitor request");
    let _ = write_message(&mut conn, &StreamEnvelope::error(error.clone())).await;
    let _ = conn.shutdown().await;
    MonitorOutcome::Rejected(error)
}
