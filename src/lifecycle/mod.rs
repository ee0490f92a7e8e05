//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     ServerConfig → LifecycleRegistry with one TcpService per endpoint
//!
//! Shutdown (shutdown.rs):
//!     Open → Closing → Closed
//!     First close() wins Open → Closing, every caller waits for Closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → caller invokes LifecycleRegistry::close
//! ```
//!
//! # Design Decisions
//! - One watch channel carries both the "close begun" broadcast and completion
//! - No reset path: Closed is terminal

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{LifecycleState, Shutdown};
