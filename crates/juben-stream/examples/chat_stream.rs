//! Chat Stream Example
//!
//! Streams one agent run from a juben backend and prints progress as it
//! arrives.
//!
//! Run with: `cargo run -p juben-stream --example chat_stream -- [base_url] [capability] [prompt]`
//!
//! Set `RUST_LOG=juben_stream=debug` to see the connection state machine at work.

use std::sync::Arc;

use juben_stream::{
    ConnectionState, HeartbeatState, Metadata, StreamClient, StreamConfig, StreamObserver,
    StreamRequest,
};
use tracing_subscriber::EnvFilter;

struct PrintObserver;

impl StreamObserver for PrintObserver {
    fn on_start(&self) {
        println!("== run started");
    }

    fn on_update(&self, text: &str, metadata: &Metadata) {
        let agent = metadata
            .get("agent_type")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!("[{agent}] {} chars so far", text.chars().count());
    }

    fn on_complete(&self, text: &str, _metadata: &Metadata) {
        println!("== completed\n{text}");
    }

    fn on_error(&self, message: &str) {
        eprintln!("== failed: {message}");
    }

    fn on_connection_change(&self, state: ConnectionState) {
        println!("-- connection: {state}");
    }

    fn on_heartbeat(&self, state: HeartbeatState) {
        println!("-- heartbeat: {state}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let base_url = args
        .next()
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let capability = args.next().unwrap_or_else(|| "planner".to_string());
    let prompt = args
        .next()
        .unwrap_or_else(|| "Outline a three-act thriller set in Shanghai".to_string());

    let config = StreamConfig::new(base_url).reconnect_max_attempts(5);
    let mut client = StreamClient::builder(config)
        .observer(Arc::new(PrintObserver))
        .build()?;
    println!("session: {}", client.session_id());

    let request = StreamRequest::builder(prompt)
        .capability(capability)
        .knowledge_base(true)
        .build();
    client.start(request).await?;

    tokio::select! {
        _ = client.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("interrupted, stopping");
            client.stop().await;
        }
    }

    let stats = client.stats();
    println!(
        "messages={} completed={} errors={} tokens={} cost={:.4}",
        stats.total_messages,
        stats.completed_messages,
        stats.error_count,
        stats.total_tokens,
        stats.total_cost,
    );
    Ok(())
}
