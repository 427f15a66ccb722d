//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! SIGTERM/SIGINT → Shutdown::trigger → broadcast to all long-running tasks
//!
//! Source server mutation / POST /api/reload
//!     → ReloadHandle::request (buffered-1, coalescing)
//!     → Coordinator: cancel fleet → wait for drain → spawn next generation
//! ```
//!
//! # Design Decisions
//! - Shutdown is a broadcast channel: one trigger, every subscriber drains
//! - Reload is message passing with capacity 1; a pending request absorbs
//!   any number of further requests
//! - At most one listener fleet is alive; a brief gap during reload is
//!   acceptable

pub mod reload;
pub mod shutdown;

pub use reload::{reload_channel, Coordinator, ReloadHandle};
pub use shutdown::Shutdown;
