//! Periodic reconciliation.
//!
//! One task ticks at `conductor.periodic_interval` and runs a pass over
//! every in-flight bay. Passes never overlap: the interval skips ticks
//! missed while a pass was running, and a [`Reconciler::run_once`] that
//! finds a pass in flight returns `None` instead of queueing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bay_core::ConductorConfig;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conductor::Conductor;
use crate::reconcile::ReconcileReport;

pub struct Reconciler {
    conductor: Conductor,
    interval: Duration,
    token: CancellationToken,
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(conductor: Conductor, config: &ConductorConfig) -> Self {
        Self::with_interval(conductor, config.periodic_interval())
    }

    pub fn with_interval(conductor: Conductor, interval: Duration) -> Self {
        Self {
            conductor,
            interval,
            token: CancellationToken::new(),
            pass: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Token that stops the loop once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop ticking. A pass already running finishes first.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Spawn the loop on the current runtime.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Tick until cancelled. The first pass runs immediately.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "reconciler started");

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("reconciler stopped");
    }

    /// Run one pass now, unless one is already running.
    pub async fn run_once(&self) -> Option<ReconcileReport> {
        let Ok(_guard) = self.pass.try_lock() else {
            debug!("reconciliation pass already running, skipping");
            return None;
        };

        let started = Instant::now();
        let report = self.conductor.reconcile_all().await;
        let elapsed = started.elapsed();

        if let Some(ref reason) = report.aborted {
            error!(error = %reason, "reconciliation pass aborted");
        } else if report.failed() > 0 {
            warn!(
                bays = report.len(),
                changed = report.changed(),
                failed = report.failed(),
                ?elapsed,
                "reconciliation pass finished with failures"
            );
        } else {
            debug!(
                bays = report.len(),
                changed = report.changed(),
                ?elapsed,
                "reconciliation pass finished"
            );
        }
        Some(report)
    }
}
