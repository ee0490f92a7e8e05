//! Request handlers bound to a TCP service.

use std::sync::Arc;

use crate::service::ServiceImpl;

/// Handles the payload of one request line.
pub trait Handler: Send + Sync {
    fn call(&self, payload: &str) -> Result<String, String>;
}

/// Shared handler as stored by [`TcpService`](super::TcpService).
pub type HandlerRef = Arc<dyn Handler>;

/// Wrap `handler` into the opaque value accepted by `register`.
pub fn handler_impl<H: Handler + 'static>(handler: H) -> ServiceImpl {
    let handler: HandlerRef = Arc::new(handler);
    Arc::new(handler)
}

/// Replies with the payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn call(&self, payload: &str) -> Result<String, String> {
        Ok(payload.to_string())
    }
}
