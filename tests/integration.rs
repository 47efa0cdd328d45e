//! Integration tests for agentwire.
//!
//! These drive the agent endpoints end to end: caller, replica hops and
//! node sessions are wired together over in-memory pipes and local TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentwire::acl::AllowAll;
use agentwire::cluster::{
    Member, NodeConnectionTable, NodeInfo, NodeSession, ReplicaInfo, StaticMembership,
    StaticNodeCatalog,
};
use agentwire::codec::JsonCodec;
use agentwire::handler::EndpointRegistry;
use agentwire::monitor::{
    FrameBufferConfig, LogHub, LogLevel, MonitorConfig, MonitorOptions, SessionState,
    StreamPipeline,
};
use agentwire::profile::ProcessProfiler;
use agentwire::protocol::{
    AgentProfileRequest, AgentProfileResponse, MonitorRequest, RpcHeader, RpcResponse,
    StreamFrame, DEFAULT_MAX_MESSAGE_SIZE, LEADER,
};
use agentwire::remote::{call_unary, open_monitor};
use agentwire::transport::{read_message, write_message, BoxedConn, ReplicaDialer, TcpDialer};
use agentwire::{Agent, AgentConfig, MonitorOutcome, RequestRouter, Result, RpcError, Server};
use async_trait::async_trait;
use tokio::io::duplex;
use tokio::net::TcpStream;

fn addr(host: u8, port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, host], port))
}

/// One entry per frame, no heartbeats.
fn eager_config() -> AgentConfig {
    AgentConfig::default().monitor(MonitorConfig {
        frames: FrameBufferConfig::default()
            .heartbeat_interval(None)
            .max_batch_entries(1),
        ..Default::default()
    })
}

fn local_agent(name: &str, hub: Arc<LogHub>) -> Agent {
    let router = RequestRouter::new(
        Arc::new(StaticMembership::new(name).with_leader(name)),
        Arc::new(StaticNodeCatalog::new()),
        Arc::new(NodeConnectionTable::new()),
        Arc::new(TcpDialer::new()),
    );
    Agent::new(router, Arc::new(AllowAll), hub, Arc::new(ProcessProfiler), AgentConfig::default())
}

async fn wait_for_subscribers(hub: &LogHub, n: usize) {
    while hub.subscriber_count() < n {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scenario A: local monitor on the leader, default batching and heartbeats,
/// delivers one envelope per emitted entry, in order, and keeps the
/// connection open.
#[tokio::test]
async fn test_local_monitor_delivers_entries_in_order() {
    let hub = Arc::new(LogHub::new());
    let agent = Arc::new(local_agent("r1", hub.clone()));

    let (caller, server) = duplex(64 * 1024);
    let session = tokio::spawn({
        let agent = agent.clone();
        async move { agent.monitor(server).await }
    });

    let request = MonitorRequest {
        log_level: "DEBUG".to_string(),
        plain_text: true,
        ..Default::default()
    };
    let mut stream = open_monitor(caller, &request).await.unwrap();
    wait_for_subscribers(&hub, 1).await;

    hub.emit(LogLevel::Debug, "agent", "first");
    hub.emit(LogLevel::Info, "agent", "second");
    hub.emit(LogLevel::Error, "agent", "third");

    let mut lines = Vec::new();
    for _ in 0..3 {
        let envelope = stream.next().await.unwrap().unwrap();
        assert!(!envelope.is_error());
        lines.push(String::from_utf8(envelope.payload.to_vec()).unwrap());
    }
    assert_eq!(
        lines,
        vec![
            "[DEBUG]  agent: first\n",
            "[INFO]  agent: second\n",
            "[ERROR]  agent: third\n",
        ]
    );

    // Still open past a heartbeat interval, nothing more arrives.
    let idle = tokio::time::timeout(Duration::from_millis(1500), stream.next()).await;
    assert!(idle.is_err());

    drop(stream);
    match session.await.unwrap() {
        MonitorOutcome::Streamed(report) => {
            assert_eq!(report.envelopes_sent, 3);
            assert_eq!(report.state, SessionState::Closed);
            assert!(report.cancelled);
            assert!(report.error.is_none());
        }
        other => panic!("expected local stream, got {:?}", other),
    }
}

#[tokio::test]
async fn test_json_monitor_wraps_frames() {
    let hub = Arc::new(LogHub::new());
    let agent = Arc::new(local_agent("r1", hub.clone()));

    let (caller, server) = duplex(64 * 1024);
    tokio::spawn({
        let agent = agent.clone();
        async move { agent.monitor(server).await }
    });

    let request = MonitorRequest {
        log_json: true,
        ..Default::default()
    };
    let mut stream = open_monitor(caller, &request).await.unwrap();
    wait_for_subscribers(&hub, 1).await;

    hub.emit(LogLevel::Debug, "", "filtered out");
    hub.emit(LogLevel::Warn, "", "kept");

    let envelope = stream.next().await.unwrap().unwrap();
    let frame: StreamFrame = JsonCodec::decode(&envelope.payload).unwrap();
    assert_eq!(frame.file_event, "log");
    assert_eq!(frame.offset, 0);

    let line: serde_json::Value = serde_json::from_slice(&frame.data).unwrap();
    assert_eq!(line["@level"], "warn");
    assert_eq!(line["@message"], "kept");
}

#[tokio::test]
async fn test_caller_close_ends_session_and_subscription() {
    let hub = Arc::new(LogHub::new());
    let agent = Arc::new(local_agent("r1", hub.clone()));

    let (caller, server) = duplex(64 * 1024);
    let session = tokio::spawn({
        let agent = agent.clone();
        async move { agent.monitor(server).await }
    });

    let stream = open_monitor(caller, &MonitorRequest::default()).await.unwrap();
    wait_for_subscribers(&hub, 1).await;
    drop(stream);

    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not stop after caller closed")
        .unwrap();
    assert!(matches!(outcome, MonitorOutcome::Streamed(ref r) if r.cancelled));

    while hub.subscriber_count() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scenario B: unknown named profile yields a single 404 error and no body.
#[tokio::test]
async fn test_profile_lookup_missing_profile() {
    let agent = Arc::new(local_agent("r1", Arc::new(LogHub::new())));
    let server = Server::builder().agent(&agent).bind("127.0.0.1:0").await.unwrap();

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    write_message(&mut stream, &RpcHeader::new("Agent.Profile")).await.unwrap();

    let request = AgentProfileRequest {
        req_type: "lookup".to_string(),
        profile: "goroutine".to_string(),
        ..Default::default()
    };
    write_message(&mut stream, &request).await.unwrap();
    let reply: RpcResponse<AgentProfileResponse> =
        read_message(&mut stream, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();

    assert!(reply.body.is_none());
    assert_eq!(reply.error.unwrap().code, Some(404));

    server.shutdown();
}

#[tokio::test]
async fn test_profile_cmdline_over_tcp() {
    let agent = Arc::new(local_agent("r1", Arc::new(LogHub::new())));
    let server = Server::builder().agent(&agent).bind("127.0.0.1:0").await.unwrap();

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    write_message(&mut stream, &RpcHeader::new("Agent.Profile")).await.unwrap();
    let request = AgentProfileRequest {
        req_type: "cmdline".to_string(),
        ..Default::default()
    };
    let reply: AgentProfileResponse = call_unary(&mut stream, &request, DEFAULT_MAX_MESSAGE_SIZE)
        .await
        .unwrap();

    assert_eq!(reply.agent_id, "r1");
    assert!(!reply.payload.is_empty());

    server.shutdown();
}

/// Node side of a node session: serves monitor requests from its own hub.
struct FakeNodeSession {
    hub: Arc<LogHub>,
    requests: Arc<Mutex<Vec<MonitorRequest>>>,
}

#[async_trait]
impl NodeSession for FakeNodeSession {
    async fn open_stream(&self, method: &str) -> Result<BoxedConn> {
        assert_eq!(method, "Agent.Monitor");
        let (replica_side, mut node_side) = duplex(64 * 1024);
        let hub = self.hub.clone();
        let requests = self.requests.clone();

        tokio::spawn(async move {
            let request: MonitorRequest =
                read_message(&mut node_side, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
            requests.lock().unwrap().push(request.clone());

            let options = MonitorOptions {
                level: LogLevel::from_request(&request.log_level).unwrap(),
                json: request.log_json,
                buffer: 64,
            };
            let config = eager_config().monitor;
            StreamPipeline::new(config, options, request.plain_text)
                .run(node_side, hub.as_ref())
                .await;
        });

        Ok(Box::new(replica_side))
    }
}

/// Dials replicas by dispatching into their in-process endpoint registries.
struct InProcessDialer {
    replicas: Vec<(String, Arc<EndpointRegistry>)>,
    dials: AtomicUsize,
}

#[async_trait]
impl ReplicaDialer for InProcessDialer {
    async fn open_stream(&self, replica: &ReplicaInfo, method: &str) -> Result<BoxedConn> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let registry = self
            .replicas
            .iter()
            .find(|(name, _)| *name == replica.name)
            .map(|(_, registry)| registry.clone())
            .ok_or_else(|| agentwire::AgentwireError::UnknownServer(replica.name.clone()))?;

        let (caller_side, server_side) = duplex(64 * 1024);
        let method = method.to_string();
        tokio::spawn(async move {
            let _ = registry.dispatch(&method, Box::new(server_side)).await;
        });
        Ok(Box::new(caller_side))
    }
}

/// Scenario C: a node held by another replica is reached through that
/// replica, and its envelopes come back verbatim.
#[tokio::test]
async fn test_monitor_node_via_peer_replica() {
    let node_hub = Arc::new(LogHub::new());
    let node_requests = Arc::new(Mutex::new(Vec::new()));

    // r2 holds the session to node-7.
    let r2_nodes = Arc::new(NodeConnectionTable::new());
    r2_nodes.register(
        "node-7",
        Arc::new(FakeNodeSession {
            hub: node_hub.clone(),
            requests: node_requests.clone(),
        }),
    );
    let r2_router = RequestRouter::new(
        Arc::new(StaticMembership::new("r2").with_leader("r1")),
        Arc::new(StaticNodeCatalog::new().node(NodeInfo::new("node-7"))),
        r2_nodes,
        Arc::new(TcpDialer::new()),
    );
    let r2 = Arc::new(Agent::new(
        r2_router,
        Arc::new(AllowAll),
        Arc::new(LogHub::new()),
        Arc::new(ProcessProfiler),
        eager_config(),
    ));
    let mut r2_registry = EndpointRegistry::new();
    r2.register(&mut r2_registry);

    // r1 only knows that r2 holds node-7.
    let r2_info = ReplicaInfo::from_member(&Member::server("r2", addr(2, 4647))).unwrap();
    let r1_nodes = Arc::new(NodeConnectionTable::new());
    r1_nodes.record_remote("node-7", r2_info);
    let dialer = Arc::new(InProcessDialer {
        replicas: vec![("r2".to_string(), Arc::new(r2_registry))],
        dials: AtomicUsize::new(0),
    });
    let r1_router = RequestRouter::new(
        Arc::new(
            StaticMembership::new("r1")
                .member(Member::server("r2", addr(2, 4647)))
                .with_leader("r1"),
        ),
        Arc::new(StaticNodeCatalog::new().node(NodeInfo::new("node-7"))),
        r1_nodes,
        dialer.clone(),
    );
    let r1 = Arc::new(Agent::new(
        r1_router,
        Arc::new(AllowAll),
        Arc::new(LogHub::new()),
        Arc::new(ProcessProfiler),
        eager_config(),
    ));

    let (caller, server) = duplex(64 * 1024);
    let session = tokio::spawn({
        let r1 = r1.clone();
        async move { r1.monitor(server).await }
    });

    let request = MonitorRequest {
        node_id: "node-7".to_string(),
        server_id: "r1".to_string(),
        plain_text: true,
        ..Default::default()
    };
    let mut stream = open_monitor(caller, &request).await.unwrap();
    wait_for_subscribers(&node_hub, 1).await;

    for i in 0..3 {
        node_hub.emit(LogLevel::Info, "client", format!("line {}", i));
    }
    for i in 0..3 {
        let envelope = stream.next().await.unwrap().unwrap();
        assert_eq!(
            String::from_utf8(envelope.payload.to_vec()).unwrap(),
            format!("[INFO]  client: line {}\n", i)
        );
    }

    assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
    {
        let seen = node_requests.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].node_id, "node-7");
        assert!(seen[0].server_id.is_empty());
    }

    drop(stream);
    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("bridge did not close")
        .unwrap();
    assert!(matches!(outcome, MonitorOutcome::Forwarded(_)));
}

#[tokio::test]
async fn test_monitor_node_without_connection() {
    let router = RequestRouter::new(
        Arc::new(StaticMembership::new("r1").with_leader("r1")),
        Arc::new(StaticNodeCatalog::new().node(NodeInfo::new("node-9"))),
        Arc::new(NodeConnectionTable::new()),
        Arc::new(TcpDialer::new()),
    );
    let agent = Agent::new(
        router,
        Arc::new(AllowAll),
        Arc::new(LogHub::new()),
        Arc::new(ProcessProfiler),
        AgentConfig::default(),
    );

    let (caller, server) = duplex(4096);
    let request = MonitorRequest {
        node_id: "node-9".to_string(),
        ..Default::default()
    };
    let stream = open_monitor(caller, &request).await.unwrap();

    let outcome = agent.monitor(server).await;
    assert!(matches!(outcome, MonitorOutcome::Rejected(ref e) if e.code == Some(404)));

    let envelopes = stream.collect().await.unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].error.as_ref().unwrap().code, Some(404));
}

/// Dialer that counts dials and delegates to TCP.
struct CountingTcpDialer {
    inner: TcpDialer,
    dials: AtomicUsize,
}

#[async_trait]
impl ReplicaDialer for CountingTcpDialer {
    async fn open_stream(&self, replica: &ReplicaInfo, method: &str) -> Result<BoxedConn> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.inner.open_stream(replica, method).await
    }
}

/// Scenario D: a follower forwards a leader-targeted profile request exactly
/// once, with `ServerID` cleared.
#[tokio::test]
async fn test_profile_leader_forwarded_from_follower() {
    let received: Arc<Mutex<Vec<AgentProfileRequest>>> = Arc::new(Mutex::new(Vec::new()));

    let leader = Server::builder()
        .handle_unary("Agent.Profile", {
            let received = received.clone();
            move |request: AgentProfileRequest| {
                let received = received.clone();
                async move {
                    received.lock().unwrap().push(request);
                    Ok::<_, RpcError>(AgentProfileResponse {
                        agent_id: "r1".to_string(),
                        payload: bytes::Bytes::from_static(b"profile"),
                    })
                }
            }
        })
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let dialer = Arc::new(CountingTcpDialer {
        inner: TcpDialer::new(),
        dials: AtomicUsize::new(0),
    });
    let router = RequestRouter::new(
        Arc::new(
            StaticMembership::new("r2")
                .member(Member::server("r1", leader.local_addr()))
                .member(Member::server("r2", addr(2, 4647)))
                .with_leader("r1"),
        ),
        Arc::new(StaticNodeCatalog::new()),
        Arc::new(NodeConnectionTable::new()),
        dialer.clone(),
    );
    let follower = Agent::new(
        router,
        Arc::new(AllowAll),
        Arc::new(LogHub::new()),
        Arc::new(ProcessProfiler),
        AgentConfig::default(),
    );

    let response = follower
        .profile(AgentProfileRequest {
            server_id: LEADER.to_string(),
            req_type: "cpu".to_string(),
            seconds: 1,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.agent_id, "r1");
    assert_eq!(&response.payload[..], b"profile");
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);

    let seen = received.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].server_id.is_empty());
    assert_eq!(seen[0].req_type, "cpu");

    leader.shutdown();
}

#[tokio::test]
async fn test_profile_leader_unknown() {
    let router = RequestRouter::new(
        Arc::new(StaticMembership::new("r2")),
        Arc::new(StaticNodeCatalog::new()),
        Arc::new(NodeConnectionTable::new()),
        Arc::new(TcpDialer::new()),
    );
    let follower = Agent::new(
        router,
        Arc::new(AllowAll),
        Arc::new(LogHub::new()),
        Arc::new(ProcessProfiler),
        AgentConfig::default(),
    );

    let err = follower
        .profile(AgentProfileRequest {
            server_id: LEADER.to_string(),
            req_type: "cmdline".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, Some(400));
}
