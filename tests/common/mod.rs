//! Shared test services.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpc_lifecycle::{CloseNotifier, Service, ServiceDesc, ServiceError, ServiceImpl};

/// How a [`SpyService`] reacts to `close`.
#[derive(Debug, Clone, Copy)]
pub enum CloseBehavior {
    /// Signal completion right away.
    Immediate,
    /// Keep the notifier alive and never signal.
    Never,
    /// Signal after the given delay.
    After(Duration),
    /// Return an error without signalling.
    Fail,
    /// Block the calling thread for the given time, then signal.
    Block(Duration),
}

/// A service that records every call it receives.
pub struct SpyService {
    name: String,
    close_behavior: CloseBehavior,
    register_error: Option<String>,
    serve_error: Option<String>,
    pub register_calls: AtomicUsize,
    pub serve_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    registered: Mutex<Vec<ServiceDesc>>,
    held: Mutex<Vec<CloseNotifier>>,
    visits: Option<VisitLog>,
    events: Option<VisitLog>,
    serve_delay: Option<Duration>,
}

/// Order in which services received `register`, shared between spies.
pub type VisitLog = Arc<Mutex<Vec<String>>>;

impl SpyService {
    pub fn new(name: &str, close_behavior: CloseBehavior) -> Self {
        Self {
            name: name.to_string(),
            close_behavior,
            register_error: None,
            serve_error: None,
            register_calls: AtomicUsize::new(0),
            serve_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            registered: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            visits: None,
            events: None,
            serve_delay: None,
        }
    }

    /// Append this service's name to `log` on every `register` call.
    pub fn with_visit_log(mut self, log: &VisitLog) -> Self {
        self.visits = Some(Arc::clone(log));
        self
    }

    /// Append `serve` once `serve` has finished and `close` when `close` is called.
    pub fn with_event_log(mut self, log: &VisitLog) -> Self {
        self.events = Some(Arc::clone(log));
        self
    }

    /// Block inside `serve` for `delay` before reporting success.
    pub fn with_serve_delay(mut self, delay: Duration) -> Self {
        self.serve_delay = Some(delay);
        self
    }

    pub fn failing_register_on(mut self, message: &str) -> Self {
        self.register_error = Some(message.to_string());
        self
    }

    pub fn immediate(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, CloseBehavior::Immediate))
    }

    pub fn failing_register(name: &str, message: &str) -> Arc<Self> {
        Arc::new(Self::new(name, CloseBehavior::Immediate).failing_register_on(message))
    }

    pub fn failing_serve(name: &str, message: &str) -> Arc<Self> {
        let mut spy = Self::new(name, CloseBehavior::Immediate);
        spy.serve_error = Some(message.to_string());
        Arc::new(spy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registers(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn serves(&self) -> usize {
        self.serve_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> Vec<ServiceDesc> {
        self.registered.lock().unwrap().clone()
    }
}

impl Service for SpyService {
    fn register(&self, desc: &ServiceDesc, _service_impl: ServiceImpl) -> Result<(), ServiceError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.visits {
            log.lock().unwrap().push(self.name.clone());
        }
        if let Some(message) = &self.register_error {
            return Err(ServiceError::Rejected(message.clone()));
        }
        self.registered.lock().unwrap().push(desc.clone());
        Ok(())
    }

    fn serve(&self) -> Result<(), ServiceError> {
        self.serve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.serve_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.serve_error {
            return Err(ServiceError::Rejected(message.clone()));
        }
        self.record("serve");
        Ok(())
    }

    fn close(&self, done: CloseNotifier) -> Result<(), ServiceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.record("close");
        match self.close_behavior {
            CloseBehavior::Immediate => {
                let _ = done.send(());
            }
            CloseBehavior::Never => self.held.lock().unwrap().push(done),
            CloseBehavior::After(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = done.send(());
                });
            }
            CloseBehavior::Fail => {
                return Err(ServiceError::Rejected(format!("{} cannot close", self.name)));
            }
            CloseBehavior::Block(delay) => {
                std::thread::sleep(delay);
                let _ = done.send(());
            }
        }
        Ok(())
    }
}

impl SpyService {
    fn record(&self, event: &str) {
        if let Some(log) = &self.events {
            log.lock().unwrap().push(event.to_string());
        }
    }
}
