//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Apply CLI overrides → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close 1001 to every peer → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then logging and metrics, then listener
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
