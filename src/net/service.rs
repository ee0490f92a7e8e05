//! TCP service: serves registered handlers over a line protocol.
//!
//! # Protocol
//! ```text
//! request:  <service_name> <payload>\n
//! response: <handler output>\n | ERR <reason>\n
//! ```
//!
//! # Design Decisions
//! - `serve` binds synchronously and spawns the accept loop on the current runtime
//! - `close` stops accepting, lets each connection finish its current line,
//!   and signals `done` once every connection has been dropped

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

use crate::config::ServiceConfig;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::handler::HandlerRef;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::service::{CloseNotifier, Service, ServiceDesc, ServiceError, ServiceImpl};

type Handlers = Arc<DashMap<String, HandlerRef>>;

struct Running {
    stop: watch::Sender<bool>,
    stopped: oneshot::Receiver<()>,
    local_addr: SocketAddr,
}

/// A [`Service`] listening on one TCP address.
pub struct TcpService {
    config: ServiceConfig,
    handlers: Handlers,
    running: Mutex<Option<Running>>,
}

impl TcpService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(DashMap::new()),
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bound address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|running| running.local_addr)
    }

    pub fn is_serving(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Names of the RPC services bound to this endpoint.
    pub fn registered(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn current_runtime() -> Result<Handle, ServiceError> {
    Handle::try_current().map_err(|e| ServiceError::Runtime(e.to_string()))
}

impl Service for TcpService {
    fn register(&self, desc: &ServiceDesc, service_impl: ServiceImpl) -> Result<(), ServiceError> {
        let handler = service_impl
            .downcast_ref::<HandlerRef>()
            .ok_or_else(|| ServiceError::ImplTypeMismatch(desc.service_name.clone()))?;

        match self.handlers.entry(desc.service_name.clone()) {
            Entry::Occupied(_) => Err(ServiceError::AlreadyRegistered(desc.service_name.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(handler));
                tracing::debug!(
                    service = %self.config.name,
                    rpc_service = %desc.service_name,
                    "Handler registered"
                );
                Ok(())
            }
        }
    }

    fn serve(&self) -> Result<(), ServiceError> {
        let runtime = current_runtime()?;
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(ServiceError::AlreadyServing);
        }

        let listener = Listener::bind(&self.config)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        let (stop, stop_rx) = watch::channel(false);
        let (stopped_tx, stopped) = oneshot::channel();

        runtime.spawn(accept_loop(
            self.config.name.clone(),
            listener,
            Arc::clone(&self.handlers),
            stop_rx,
            stopped_tx,
        ));

        *running = Some(Running {
            stop,
            stopped,
            local_addr,
        });
        Ok(())
    }

    fn close(&self, done: CloseNotifier) -> Result<(), ServiceError> {
        let runtime = current_runtime()?;
        let Some(running) = self.lock_running().take() else {
            // Never served: nothing to drain.
            let _ = done.send(());
            return Ok(());
        };

        tracing::info!(service = %self.config.name, "Closing service");
        let _ = running.stop.send(true);

        let name = self.config.name.clone();
        runtime.spawn(async move {
            let _ = running.stopped.await;
            tracing::info!(service = %name, "Service closed");
            let _ = done.send(());
        });
        Ok(())
    }
}

async fn accept_loop(
    name: String,
    listener: Listener,
    handlers: Handlers,
    mut stop: watch::Receiver<bool>,
    stopped: oneshot::Sender<()>,
) {
    let tracker = ConnectionTracker::new();
    let connection_stop = stop.clone();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let connection = Connection {
                        service: name.clone(),
                        handlers: Arc::clone(&handlers),
                        stop: connection_stop.clone(),
                        guard: tracker.track(),
                        _permit: permit,
                    };
                    tokio::spawn(connection.run(stream, peer));
                }
                Err(ListenerError::LimitClosed) => break,
                Err(e) => back_off_after_accept_error(&name, &e).await,
            },
        }
    }

    drop(listener);
    tracing::debug!(
        service = %name,
        active = tracker.active_count(),
        "Stopped accepting, draining connections"
    );
    tracker.wait_idle().await;
    let _ = stopped.send(());
}

/// Pause after a failed accept. Errors such as EMFILE persist until a
/// connection closes, so retrying at once would spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

async fn back_off_after_accept_error(service: &str, error: &ListenerError) {
    tracing::warn!(
        service = %service,
        error = %error,
        backoff = ?ACCEPT_ERROR_BACKOFF,
        "Accept failed"
    );
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

struct Connection {
    service: String,
    handlers: Handlers,
    stop: watch::Receiver<bool>,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
}

impl Connection {
    async fn run(mut self, stream: TcpStream, peer: SocketAddr) {
        let connection_id = self.guard.id();
        tracing::debug!(service = %self.service, %connection_id, peer = %peer, "Connection opened");

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = tokio::select! {
                _ = self.stop.changed() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(
                        service = %self.service,
                        %connection_id,
                        peer = %peer,
                        error = %e,
                        "Read failed"
                    );
                    break;
                }
            };

            let response = self.dispatch(&line);
            if let Err(e) = writer.write_all(response.as_bytes()).await {
                tracing::debug!(
                    service = %self.service,
                    %connection_id,
                    peer = %peer,
                    error = %e,
                    "Write failed"
                );
                break;
            }
        }
    }

    fn dispatch(&self, line: &str) -> String {
        let (rpc_service, payload) = line.split_once(' ').unwrap_or((line, ""));
        let Some(handler) = self.handlers.get(rpc_service).map(|h| Arc::clone(h.value())) else {
            metrics::record_request(&self.service, "unknown");
            return format!("ERR unknown service {rpc_service}\n");
        };

        match handler.call(payload) {
            Ok(reply) => {
                metrics::record_request(&self.service, "ok");
                format!("{reply}\n")
            }
            Err(reason) => {
                metrics::record_request(&self.service, "error");
                format!("ERR {reason}\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::handler::{handler_impl, Echo};

    fn service() -> TcpService {
        TcpService::new(ServiceConfig::new("rpc", "127.0.0.1:0"))
    }

    #[test]
    fn register_rejects_wrong_impl_type() {
        let svc = service();
        let err = svc
            .register(&ServiceDesc::new("echo"), Arc::new(42u32))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ImplTypeMismatch(name) if name == "echo"));
    }

    #[test]
    fn register_rejects_duplicates() {
        let svc = service();
        let desc = ServiceDesc::new("echo");
        svc.register(&desc, handler_impl(Echo)).unwrap();
        let err = svc.register(&desc, handler_impl(Echo)).unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyRegistered(name) if name == "echo"));
        assert_eq!(svc.registered(), vec!["echo".to_string()]);
    }

    #[test]
    fn serve_requires_runtime() {
        assert!(matches!(service().serve(), Err(ServiceError::Runtime(_))));
    }

    #[tokio::test]
    async fn serve_twice_is_rejected() {
        let svc = service();
        svc.serve().unwrap();
        assert!(svc.local_addr().is_some());
        assert!(matches!(svc.serve(), Err(ServiceError::AlreadyServing)));

        let (done, rx) = oneshot::channel();
        svc.close(done).unwrap();
        rx.await.unwrap();
        assert!(!svc.is_serving());
    }

    #[tokio::test]
    async fn close_without_serve_signals_immediately() {
        let (done, rx) = oneshot::channel();
        service().close(done).unwrap();
        rx.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn accept_error_backs_off_before_retrying() {
        let error = ListenerError::Accept(std::io::Error::from_raw_os_error(24));
        let started = tokio::time::Instant::now();
        back_off_after_accept_error("rpc", &error).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }
}
