//! Room membership and broadcast subsystem.
//!
//! # Data Flow
//! ```text
//! Handshake complete
//!     → registry.rs (join room under the resolved id)
//!
//! Text message decoded
//!     → router.rs (encode once, queue for every member in join order)
//!     → each member's writer task
//!
//! Connection closing / writer gone
//!     → registry.rs (deregister, or pruned lazily by the router)
//! ```

pub mod registry;
pub mod router;

pub use registry::{RoomId, RoomRegistry};
pub use router::{BroadcastReport, BroadcastRouter};
