//! Network layer: a TCP transport implementing the service contract.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking)
//!     → service.rs (line protocol, dispatch to handler.rs)
//!
//! Service::close:
//!     stop accepting → connections finish current line → done signalled
//! ```

pub mod connection;
pub mod handler;
pub mod listener;
pub mod service;

pub use handler::{handler_impl, Echo, Handler, HandlerRef};
pub use service::TcpService;
