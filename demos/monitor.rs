//! Monitor - stream live agent logs over TCP.
//!
//! This example demonstrates:
//! - Serving `Agent.Monitor` from a single replica with the server builder
//! - Feeding log lines through a `LogHub`
//! - Opening a plain-text monitor session and printing what arrives
//!
//! # Running
//!
//! ```text
//! cargo run --example monitor
//! ```

use std::sync::Arc;
use std::time::Duration;

use agentwire::acl::AllowAll;
use agentwire::cluster::{NodeConnectionTable, StaticMembership, StaticNodeCatalog};
use agentwire::monitor::{LogHub, LogLevel};
use agentwire::profile::ProcessProfiler;
use agentwire::protocol::{MonitorRequest, RpcHeader};
use agentwire::remote::open_monitor;
use agentwire::transport::{write_message, TcpDialer};
use agentwire::{Agent, AgentConfig, RequestRouter, Server, MONITOR_METHOD};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let hub = Arc::new(LogHub::new());

    let router = RequestRouter::new(
        Arc::new(StaticMembership::new("demo").with_leader("demo")),
        Arc::new(StaticNodeCatalog::new()),
        Arc::new(NodeConnectionTable::new()),
        Arc::new(TcpDialer::new()),
    );
    let agent = Arc::new(Agent::new(
        router,
        Arc::new(AllowAll),
        hub.clone(),
        Arc::new(ProcessProfiler),
        AgentConfig::default(),
    ));

    let server = Server::builder().agent(&agent).bind("127.0.0.1:0").await?;
    println!("serving agent endpoints on {}", server.local_addr());

    // A background task standing in for the process's own logging
    let emitter = hub.clone();
    tokio::spawn(async move {
        for i in 0u32.. {
            let level = if i % 3 == 0 { LogLevel::Warn } else { LogLevel::Info };
            emitter.emit(level, "demo", format!("tick {}", i));
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    });

    let mut conn = TcpStream::connect(server.local_addr()).await?;
    write_message(&mut conn, &RpcHeader::new(MONITOR_METHOD)).await?;

    let request = MonitorRequest {
        log_level: "info".to_string(),
        plain_text: true,
        ..Default::default()
    };
    let mut stream = open_monitor(conn, &request).await?;

    let mut received = 0;
    while let Some(envelope) = stream.next().await? {
        if let Some(err) = envelope.error {
            eprintln!("monitor error: {}", err.message);
            break;
        }
        print!("{}", String::from_utf8_lossy(&envelope.payload));
        received += 1;
        if received == 10 {
            break;
        }
    }

    // Dropping the stream closes the session on the server side
    drop(stream);
    server.shutdown();
    server.wait_for_shutdown().await;

    Ok(())
}
