//! HTTP/1.1 handling for the opening handshake.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, spawns a session per connection)
//!     → request.rs (read and parse the request head)
//!     → ws::handshake (upgrade) or response.rs (plain JSON status)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use server::{RelayContext, RelayServer};
