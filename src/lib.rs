//! WebSocket room relay.
//!
//! Clients connect with `GET /?room=<id>` and every text message a client
//! sends is relayed to all members of its room.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod rooms;
pub mod ws;

pub use config::RelayConfig;
pub use http::{RelayContext, RelayServer};
pub use lifecycle::{Shutdown, ShutdownSignal};
