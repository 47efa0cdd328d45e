//! Profile request dispatch.
//!
//! A profile request is routed first. Forwarded requests get exactly one
//! structured response from the target. Local requests need agent write
//! capability, then name one of four capture kinds which the dispatcher maps
//! onto a [`Profiler`] call: unknown kinds and missing named profiles are
//! 404, every other capture failure is 500.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::acl::{authorize, Authorizer, Capability};
use crate::error::{
    AgentwireError, Result, RpcError, CODE_INTERNAL, CODE_NOT_FOUND, CODE_PERMISSION_DENIED,
};
use crate::protocol::{AgentProfileRequest, AgentProfileResponse, DEFAULT_MAX_MESSAGE_SIZE};
use crate::routing::{forwarded_copy, RequestRouter, Target};

/// Kind of profile capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// CPU profile over `Seconds`.
    Cpu,
    /// Process command line.
    Cmdline,
    /// Named profile snapshot.
    Lookup,
    /// Execution trace over `Seconds`.
    Trace,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cmdline => "cmdline",
            Self::Lookup => "lookup",
            Self::Trace => "trace",
        }
    }
}

impl FromStr for ProfileKind {
    type Err = AgentwireError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "cmdline" => Ok(Self::Cmdline),
            "lookup" => Ok(Self::Lookup),
            "trace" => Ok(Self::Trace),
            _ => Err(AgentwireError::UnknownRequestType),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture routines.
///
/// Named-profile lookups that do not exist must fail with
/// `ProfileNotFound`; any other error is reported as an internal failure.
#[async_trait]
pub trait Profiler: Send + Sync {
    async fn cpu(&self, duration: Duration) -> Result<Bytes>;
    async fn cmdline(&self) -> Result<Bytes>;
    async fn lookup(&self, profile: &str, debug: i64) -> Result<Bytes>;
    async fn trace(&self, duration: Duration) -> Result<Bytes>;
}

/// Stable endpoint name for profile requests.
pub const PROFILE_METHOD: &str = "Agent.Profile";

/// Serves one profile request: local capture or a single forward.
#[derive(Clone)]
pub struct ProfileDispatcher {
    router: RequestRouter,
    authorizer: Arc<dyn Authorizer>,
    profiler: Arc<dyn Profiler>,
    max_message_size: u32,
}

impl ProfileDispatcher {
    pub fn new(
        router: RequestRouter,
        authorizer: Arc<dyn Authorizer>,
        profiler: Arc<dyn Profiler>,
    ) -> Self {
        Self {
            router,
            authorizer,
            profiler,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit on the forwarded response size.
    pub fn max_message_size(mut self, max: u32) -> Self {
        self.max_message_size = max;
        self
    }

    /// Route and serve `request`.
    ///
    /// Exactly one of payload or coded error comes back. Forwarding failures
    /// are reported immediately; nothing is retried.
    pub async fn dispatch(
        &self,
        request: AgentProfileRequest,
    ) -> std::result::Result<AgentProfileResponse, RpcError> {
        match self.router.route(&request) {
            Target::Local => self.execute(&request).await,
            Target::Unresolved(err) => Err(err.to_rpc()),
            target => self.forward(&target, &request).await,
        }
    }

    async fn forward(
        &self,
        target: &Target,
        request: &AgentProfileRequest,
    ) -> std::result::Result<AgentProfileResponse, RpcError> {
        let forwarded = forwarded_copy(request);
        debug!(target = ?target, req_type = %forwarded.req_type, "forwarding profile request");

        self.router
            .forward_unary(target, PROFILE_METHOD, &forwarded, self.max_message_size)
            .await
            .map_err(|err| match err {
                AgentwireError::Remote(remote) => remote,
                other => other.to_rpc_coded(CODE_INTERNAL),
            })
    }

    async fn execute(
        &self,
        request: &AgentProfileRequest,
    ) -> std::result::Result<AgentProfileResponse, RpcError> {
        if let Err(err) = authorize(&self.authorizer, &request.auth_token, Capability::AgentWrite).await {
            let code = match err {
                AgentwireError::PermissionDenied => CODE_PERMISSION_DENIED,
                _ => CODE_INTERNAL,
            };
            return Err(err.to_rpc_coded(code));
        }

        let payload = self.capture(request).await.map_err(|err| {
            let code = match err {
                AgentwireError::UnknownRequestType | AgentwireError::ProfileNotFound(_) => CODE_NOT_FOUND,
                _ => CODE_INTERNAL,
            };
            err.to_rpc_coded(code)
        })?;

        Ok(AgentProfileResponse {
            agent_id: self.router.local_name(),
            payload,
        })
    }

    /// Run the capture named by `request.req_type` on this process.
    ///
    /// Duration-bounded kinds block for `request.seconds`.
    pub async fn capture(&self, request: &AgentProfileRequest) -> Result<Bytes> {
        let kind: ProfileKind = request.req_type.parse()?;
        let duration = Duration::from_secs(request.seconds);

        debug!(kind = %kind, seconds = request.seconds, "running profile capture");

        match kind {
            ProfileKind::Cpu => self.profiler.cpu(duration).await,
            ProfileKind::Cmdline => self.profiler.cmdline().await,
            ProfileKind::Lookup => self.profiler.lookup(&request.profile, request.debug).await,
            ProfileKind::Trace => self.profiler.trace(duration).await,
        }
    }
}

/// [`Profiler`] backed by what the running process can report about itself.
///
/// `cmdline` returns the NUL-separated arguments. `lookup` knows the
/// `runtime` profile (tokio worker and task counts). CPU and trace capture
/// need an external sampler and report a capture failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessProfiler;

/// Named profile served by [`ProcessProfiler::lookup`].
pub const RUNTIME_PROFILE: &str = "runtime";

#[async_trait]
impl Profiler for ProcessProfiler {
    async fn cpu(&self, _duration: Duration) -> Result<Bytes> {
        Err(AgentwireError::Capture(
            "cpu profiling is not available in this process".to_string(),
        ))
    }

    async fn cmdline(&self) -> Result<Bytes> {
        let args: Vec<String> = std::env::args().collect();
        Ok(Bytes::from(args.join("\x00")))
    }

    async fn lookup(&self, profile: &str, debug: i64) -> Result<Bytes> {
        if profile != RUNTIME_PROFILE {
            return Err(AgentwireError::ProfileNotFound(profile.to_string()));
        }

        let metrics = tokio::runtime::Handle::current().metrics();
        let mut out = format!(
            "workers: {}\nalive_tasks: {}\n",
            metrics.num_workers(),
            metrics.num_alive_tasks()
        );
        if debug > 0 {
            out.push_str(&format!("global_queue_depth: {}\n", metrics.global_queue_depth()));
        }
        Ok(Bytes::from(out))
    }

    async fn trace(&self, _duration: Duration) -> Result<Bytes> {
        Err(AgentwireError::Capture(
            "execution tracing is not available in this process".to_string(),
        ))
    }
}
