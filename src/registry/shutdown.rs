//! The guarded shutdown body.
//!
//! # Design Decisions
//! - One deadline per pass, shared by every service (total latency is bounded
//!   by a constant regardless of registry size)
//! - The body runs in its own task so a dropped `close` future cannot strand
//!   the other callers
//! - Hooks and `Service::close` run on the blocking pool, so a close that
//!   blocks its thread cannot hold up the timer driving the deadline
//! - The deadline is fixed before hooks run; hook time counts against it
//! - A service that misses the deadline is abandoned, not cancelled. Its close
//!   task may still finish later with no observer. This is a known leak.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant};

use super::{LifecycleRegistry, ShutdownHook};
use crate::observability::metrics;
use crate::service::Service;

/// What happened to each service during the shutdown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Services that signalled completion before the deadline.
    pub closed: Vec<String>,
    /// Services abandoned at the deadline.
    pub timed_out: Vec<String>,
    /// Services skipped because they were marked failed.
    pub skipped: Vec<String>,
    /// Wall time of the pass, hooks included.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOutcome {
    Closed,
    TimedOut,
}

impl CloseOutcome {
    fn as_str(self) -> &'static str {
        match self {
            CloseOutcome::Closed => "closed",
            CloseOutcome::TimedOut => "timed_out",
        }
    }
}

/// Everything the body needs, detached from the registry.
struct ShutdownPlan {
    wait: Duration,
    targets: Vec<(String, Arc<dyn Service>)>,
    skipped: Vec<String>,
    hooks: Vec<ShutdownHook>,
}

impl LifecycleRegistry {
    /// Spawn the shutdown body. Called only by the caller that won the latch.
    pub(super) fn start_shutdown(&self) {
        let gate = self.lock_serve_gate();
        let (targets, mut skipped): (Vec<_>, Vec<_>) = self
            .snapshot()
            .into_iter()
            .partition(|(name, _)| !self.failed.contains(name));
        let skipped = {
            skipped.sort_by(|a, b| a.0.cmp(&b.0));
            skipped.into_iter().map(|(name, _)| name).collect()
        };

        let hooks = std::mem::take(
            &mut *self
                .hooks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        drop(gate);

        let plan = ShutdownPlan {
            wait: self.close_wait(),
            targets,
            skipped,
            hooks,
        };

        tracing::info!(
            services = plan.targets.len(),
            skipped = plan.skipped.len(),
            wait = ?plan.wait,
            "Shutdown started"
        );

        let shutdown = self.shutdown.clone();
        let report = Arc::clone(&self.report);
        tokio::spawn(async move {
            match tokio::spawn(plan.run()).await {
                Ok(outcome) => {
                    let _ = report.set(outcome);
                }
                Err(e) => tracing::error!(error = %e, "Shutdown body aborted"),
            }
            shutdown.complete();
        });
    }
}

impl ShutdownPlan {
    async fn run(self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + self.wait;

        run_hooks(self.hooks, deadline).await;

        let mut closing = JoinSet::new();
        for (name, service) in self.targets {
            closing.spawn(close_service(name, service, deadline));
        }

        let mut report = ShutdownReport {
            skipped: self.skipped,
            ..ShutdownReport::default()
        };
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((name, CloseOutcome::Closed)) => report.closed.push(name),
                Ok((name, CloseOutcome::TimedOut)) => report.timed_out.push(name),
                Err(e) => tracing::error!(error = %e, "Close waiter panicked"),
            }
        }
        report.closed.sort();
        report.timed_out.sort();
        report.elapsed = started.elapsed();

        metrics::record_shutdown(report.elapsed);
        tracing::info!(
            closed = report.closed.len(),
            timed_out = ?report.timed_out,
            skipped = ?report.skipped,
            elapsed = ?report.elapsed,
            "Shutdown complete"
        );
        report
    }
}

/// Run shutdown hooks off the async workers, giving up on them at `deadline`.
async fn run_hooks(hooks: Vec<ShutdownHook>, deadline: Instant) {
    if hooks.is_empty() {
        return;
    }

    let count = hooks.len();
    let running = tokio::task::spawn_blocking(move || {
        for hook in hooks {
            hook();
        }
    });

    match time::timeout_at(deadline, running).await {
        Ok(Ok(())) => tracing::debug!(hooks = count, "Shutdown hooks finished"),
        Ok(Err(e)) => tracing::error!(error = %e, "Shutdown hook panicked"),
        Err(_) => tracing::warn!(hooks = count, "Shutdown hooks overran the deadline, abandoning"),
    }
}

/// Ask one service to close and race its completion against the shared deadline.
async fn close_service(
    name: String,
    service: Arc<dyn Service>,
    deadline: Instant,
) -> (String, CloseOutcome) {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    let closer = name.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = service.close(done_tx) {
            tracing::warn!(service = %closer, error = %e, "Service close failed");
            metrics::record_close_error(&closer);
        }
    });

    let signalled = async move {
        // A dropped notifier never signals; only the deadline ends the wait.
        if done_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let outcome = match time::timeout_at(deadline, signalled).await {
        Ok(()) => CloseOutcome::Closed,
        Err(_) => {
            tracing::warn!(service = %name, "Service did not close before deadline, abandoning");
            CloseOutcome::TimedOut
        }
    };
    metrics::record_close(&name, outcome.as_str());
    (name, outcome)
}
