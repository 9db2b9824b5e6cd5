//! Upstream Platform Adapters
//!
//! WebSocket client for the charting platform:
//!
//! - **Tunnel**: HTTP `CONNECT` through the symbol's proxy
//! - **Codec**: JSON `{m, p}` envelopes
//! - **Heartbeat**: ping/pong liveness
//! - **Client**: one session per symbol, charts multiplexed over it

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod tunnel;

pub use client::{UpstreamClientConfig, WsSession, WsUpstreamConnector};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use messages::{ClientMessage, Envelope, SeriesPoint, ServerMessage};
pub use tunnel::{TunnelError, open_tunnel};
