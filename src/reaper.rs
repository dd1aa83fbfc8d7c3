//! Retention reaper.
//!
//! Deletes Ended escort sessions whose `purge_at` has passed. Each deletion is
//! a conditional purge in the store, so a session that is still Active (or was
//! ended with a later `purge_at`) is skipped and picked up on a later sweep.
//! Failed purges are logged and retried on the next scheduled sweep only.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, SafeguardError, SafeguardResult};
use crate::escort::EscortState;
use crate::storage::EscortSessionStore;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sessions that looked expired when the sweep started.
    pub examined: usize,
    /// Sessions deleted by this sweep.
    pub purged: usize,
    /// Sessions no longer eligible by the time they were purged.
    pub skipped: usize,
    /// Purge attempts that hit a storage error.
    pub failed: usize,
}

/// Purges expired escort sessions.
#[derive(Clone)]
pub struct RetentionReaper {
    sessions: Arc<dyn EscortSessionStore>,
}

impl RetentionReaper {
    #[must_use]
    pub fn new(sessions: Arc<dyn EscortSessionStore>) -> Self {
        Self { sessions }
    }

    /// Run one sweep as of `now`.
    ///
    /// # Errors
    ///
    /// `Storage` if the expired-session listing itself fails. Individual purge
    /// failures are counted in the report instead.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> SafeguardResult<SweepReport> {
        let candidates = self.sessions.find_expired(now)?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for id in candidates {
            match self.sessions.purge_if_expired(id, now) {
                Ok(Some(session)) => {
                    report.purged += 1;
                    tracing::debug!(
                        session_id = %id,
                        subject = %session.subject,
                        trail_len = session.trail.len(),
                        state = ?EscortState::Purged,
                        "escort session purged"
                    );
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(session_id = %id, error = %e, "escort purge failed; retrying next sweep");
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                purged = report.purged,
                skipped = report.skipped,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Start the background worker, sweeping every `interval`.
    ///
    /// # Errors
    ///
    /// `Internal` if the worker thread cannot be spawned.
    pub fn spawn(self, interval: Duration) -> SafeguardResult<ReaperWorker> {
        let (control_tx, control_rx) = bounded::<ControlMsg>(8);
        let join = thread::Builder::new()
            .name("safeguard-reaper".to_string())
            .spawn(move || worker_loop(&self, interval, &control_rx))
            .map_err(|e| SafeguardError::internal(format!("failed to spawn reaper worker: {e}")))?;

        tracing::info!(interval_secs = interval.as_secs(), "retention reaper started");
        Ok(ReaperWorker {
            control_tx,
            join: Mutex::new(Some(join)),
        })
    }
}

enum ControlMsg {
    SweepNow { reply: Sender<SafeguardResult<SweepReport>> },
    Stop,
}

/// Handle to the background reaper thread.
#[derive(Debug)]
pub struct ReaperWorker {
    control_tx: Sender<ControlMsg>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ReaperWorker {
    /// Run a sweep on the worker thread now and wait for its report.
    ///
    /// # Errors
    ///
    /// `Runtime` if the worker has stopped, otherwise whatever the sweep returned.
    pub fn sweep_now(&self) -> SafeguardResult<SweepReport> {
        let (reply, rx) = bounded(1);
        self.control_tx
            .send(ControlMsg::SweepNow { reply })
            .map_err(|_| disconnected())?;
        rx.recv().map_err(|_| disconnected())?
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&self) {
        let _ = self.control_tx.send(ControlMsg::Stop);
        let handle = self.join.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("retention reaper worker panicked");
            }
        }
    }
}

impl Drop for ReaperWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn disconnected() -> SafeguardError {
    RuntimeError::Disconnected {
        path: "reaper".to_string(),
    }
    .into()
}

fn worker_loop(reaper: &RetentionReaper, interval: Duration, control_rx: &Receiver<ControlMsg>) {
    loop {
        select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::SweepNow { reply }) => {
                        let _ = reply.send(reaper.sweep_once(Utc::now()));
                    }
                    Ok(ControlMsg::Stop) | Err(_) => break,
                }
            }
            default(interval) => {
                if let Err(e) = reaper.sweep_once(Utc::now()) {
                    tracing::error!(error = %e, "retention sweep failed");
                }
            }
        }
    }
    tracing::info!("retention reaper stopped");
}
