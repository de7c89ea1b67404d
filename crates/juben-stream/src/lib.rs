//! # Juben Stream
//!
//! Streaming ingestion and connection-resilience engine for juben agent chat
//! and multi-agent collaboration sessions.
//!
//! A run flows through one sequential pipeline:
//!
//! ```text
//! transport bytes ─▶ FrameDecoder ─▶ normalize ─▶ SessionAggregator ─▶ StreamObserver
//!                                 ▲
//!          ConnectionController ──┘ (reconnect with backoff)
//!          HeartbeatMonitor ───────  (idle probe while connected)
//! ```
//!
//! ## Features
//!
//! - **Chunk-safe decoding**: frames split across network chunks (including
//!   inside multi-byte characters) are reassembled before parsing
//! - **Shape normalization**: typed, canonical, and bare upstream payloads map
//!   onto one [`StreamEvent`]; malformed payloads degrade to text
//! - **Resilience**: explicit connection state machine, exponential backoff
//!   with a bounded attempt budget, and idle-triggered liveness probes
//! - **Cancellation**: [`StreamClient::stop`] aborts the transport and every
//!   timer; no callback fires afterwards
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use juben_stream::{StreamClient, StreamConfig, StreamRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = StreamClient::new(StreamConfig::new("http://localhost:8000"))?;
//!
//!     let request = StreamRequest::builder("Outline a three-act thriller")
//!         .capability("planner")
//!         .build();
//!     client.start(request).await?;
//!
//!     let mut session = client.subscribe_session();
//!     while session.changed().await.is_ok() {
//!         if session.borrow().status.is_terminal() {
//!             break;
//!         }
//!     }
//!     println!("{}", client.session().accumulated_text());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod client;
pub mod config;
pub mod connection;
pub mod decode;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod normalize;
pub mod observer;
pub mod reconnect;
pub mod request;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use aggregate::SessionAggregator;
pub use client::{StreamClient, StreamClientBuilder};
pub use config::StreamConfig;
pub use connection::{ConnectionController, ConnectionState, ConnectionStatus, Recovery};
pub use decode::{Frame, FrameDecoder, FrameStream};
pub use error::{StreamError, StreamResult};
pub use event::{
    ContentDelta, ContentType, DoneSignal, Metadata, MetadataUpdate, StreamEvent, StreamFault,
};
pub use heartbeat::{HeartbeatMonitor, HeartbeatState, HeartbeatStatus, HeartbeatVerdict};
pub use normalize::{normalize, normalize_frame};
pub use observer::{NoopObserver, StreamObserver};
pub use reconnect::{BackoffConfig, calculate_backoff};
pub use request::{StreamRequest, StreamRequestBuilder};
pub use session::{
    SessionMessage, SessionStats, SessionStatus, StreamSession, Transition, reduce,
};
pub use transport::{
    ByteStream, HealthReport, HttpTransport, LivenessProbe, SessionControl, SessionDescriptor,
    StartSessionRequest, StreamTransport,
};
