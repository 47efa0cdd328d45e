//! Profile - request profile captures from an agent.
//!
//! This example demonstrates:
//! - Serving `Agent.Profile` backed by `ProcessProfiler`
//! - Calling it as a unary RPC for the command line and runtime profiles
//! - How an unknown capture kind comes back as a coded error
//!
//! # Running
//!
//! ```text
//! cargo run --example profile
//! ```

use std::sync::Arc;

use agentwire::acl::AllowAll;
use agentwire::cluster::{NodeConnectionTable, StaticMembership, StaticNodeCatalog};
use agentwire::monitor::LogHub;
use agentwire::profile::{ProcessProfiler, RUNTIME_PROFILE};
use agentwire::protocol::{AgentProfileRequest, AgentProfileResponse, RpcHeader, DEFAULT_MAX_MESSAGE_SIZE};
use agentwire::remote::call_unary;
use agentwire::transport::{write_message, TcpDialer};
use agentwire::{Agent, AgentConfig, AgentwireError, RequestRouter, Server, PROFILE_METHOD};
use tokio::net::TcpStream;

async fn profile(server: &Server, request: AgentProfileRequest) -> agentwire::Result<AgentProfileResponse> {
    let mut conn = TcpStream::connect(server.local_addr()).await?;
    write_message(&mut conn, &RpcHeader::new(PROFILE_METHOD)).await?;
    call_unary(&mut conn, &request, DEFAULT_MAX_MESSAGE_SIZE).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let router = RequestRouter::new(
        Arc::new(StaticMembership::new("demo").with_leader("demo")),
        Arc::new(StaticNodeCatalog::new()),
        Arc::new(NodeConnectionTable::new()),
        Arc::new(TcpDialer::new()),
    );
    let agent = Arc::new(Agent::new(
        router,
        Arc::new(AllowAll),
        Arc::new(LogHub::new()),
        Arc::new(ProcessProfiler),
        AgentConfig::default(),
    ));

    let server = Server::builder().agent(&agent).bind("127.0.0.1:0").await?;

    let cmdline = profile(
        &server,
        AgentProfileRequest {
            req_type: "cmdline".to_string(),
            ..Default::default()
        },
    )
    .await?;
    let args: Vec<String> = cmdline
        .payload
        .split(|b| *b == 0)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    println!("[{}] cmdline: {:?}", cmdline.agent_id, args);

    let runtime = profile(
        &server,
        AgentProfileRequest {
            req_type: "lookup".to_string(),
            profile: RUNTIME_PROFILE.to_string(),
            ..Default::default()
        },
    )
    .await?;
    println!("[{}] runtime:\n{}", runtime.agent_id, String::from_utf8_lossy(&runtime.payload));

    let unknown = profile(
        &server,
        AgentProfileRequest {
            req_type: "flame".to_string(),
            ..Default::default()
        },
    )
    .await;
    match unknown {
        Err(AgentwireError::Remote(err)) => println!("flame: {:?} {}", err.code, err.message),
        other => println!("flame: unexpected {:?}", other.map(|r| r.agent_id)),
    }

    server.shutdown();
    server.wait_for_shutdown().await;

    Ok(())
}
