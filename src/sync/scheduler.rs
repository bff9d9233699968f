//! Periodic auto-sync.
//!
//! The scheduler holds at most one pending deadline. A cycle runs the
//! library sync followed by the bundle sync and re-arms for the next
//! period, whatever the outcome. Cycles borrow the engine mutably, so they
//! never overlap each other or a manual operation.

use crate::sync::bundle::BundleReport;
use crate::sync::engine::SyncEngine;
use crate::sync::library::LibraryReport;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// What one scheduled cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Auto-sync is disabled or the session is gone; nothing is re-armed.
    Stopped,
    /// Server unreachable before or during the library phase; re-armed.
    Offline,
    /// Both phases ran.
    Completed {
        /// Library phase report.
        library: LibraryReport,
        /// Bundle phase report, `None` if that phase failed.
        bundles: Option<BundleReport>,
    },
    /// The library phase failed; re-armed.
    Failed(String),
}

/// Single-deadline scheduler.
#[derive(Debug)]
pub struct Scheduler {
    period: Duration,
    due: Option<Instant>,
}

impl Scheduler {
    /// Create an unarmed scheduler.
    pub fn new(period: Duration) -> Self {
        Self { period, due: None }
    }

    /// Whether a cycle is pending.
    pub fn is_armed(&self) -> bool {
        self.due.is_some()
    }

    /// Arm or disarm according to the engine state. Calling this again
    /// while armed keeps the existing deadline, so there is never more than
    /// one pending cycle.
    pub fn refresh(&mut self, engine: &SyncEngine) {
        if !engine.can_auto_sync() {
            if self.due.take().is_some() {
                tracing::info!("Auto-sync stopped");
            }
            return;
        }
        if self.due.is_none() {
            self.arm();
        }
    }

    /// Cancel the pending cycle.
    pub fn stop(&mut self) {
        self.due = None;
    }

    fn arm(&mut self) {
        self.due = Some(Instant::now() + self.period);
        tracing::debug!(period_secs = self.period.as_secs(), "Next sync scheduled");
    }

    /// Run one cycle now.
    pub async fn fire(&mut self, engine: &mut SyncEngine) -> CycleOutcome {
        self.due = None;

        if !engine.can_auto_sync() {
            return CycleOutcome::Stopped;
        }

        let library = match engine.auto_sync().await {
            Ok(Some(report)) => report,
            Ok(None) => {
                self.arm();
                return CycleOutcome::Offline;
            }
            // The connectivity check passed but the server dropped away
            Err(e) if e.is_network() => {
                tracing::info!(error = %e, "Server unreachable, skipping cycle");
                self.arm();
                return CycleOutcome::Offline;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Scheduled library sync failed");
                self.arm();
                return CycleOutcome::Failed(e.to_string());
            }
        };

        let bundles = match engine.sync_all_bundles().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "Scheduled bundle sync failed");
                None
            }
        };

        self.arm();
        CycleOutcome::Completed { library, bundles }
    }

    /// Drive cycles until `shutdown` resolves or auto-sync is turned off.
    pub async fn run(&mut self, engine: &mut SyncEngine, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        self.refresh(engine);
        while let Some(due) = self.due {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler shutting down");
                    self.stop();
                    break;
                }
                _ = tokio::time::sleep_until(due) => {
                    let outcome = self.fire(engine).await;
                    tracing::debug!(?outcome, "Sync cycle finished");
                }
            }
        }
    }
}
