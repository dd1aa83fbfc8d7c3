//! Notification gateway contract.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DependencyError;
use crate::ids::ResponderId;

/// Message handed to the push/email transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Machine-readable payload; always carries `event_id` and `event_kind`.
    pub data: serde_json::Value,
}

/// Per-call delivery counts reported by the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub succeeded: usize,
    pub failed: usize,
}

/// Best-effort push/email transport.
///
/// No delivery guarantee is surfaced beyond the receipt counts.
pub trait NotificationGateway: Send + Sync {
    /// Send `notification` to `responders`.
    fn send(&self, responders: &[ResponderId], notification: &Notification) -> Result<SendReceipt, DependencyError>;
}

/// Gateway that only logs. Used by the daemon when no transport is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingGateway;

impl NotificationGateway for TracingGateway {
    fn send(&self, responders: &[ResponderId], notification: &Notification) -> Result<SendReceipt, DependencyError> {
        for responder in responders {
            tracing::info!(
                responder = %responder,
                title = %notification.title,
                event_id = %notification.data["event_id"],
                "notification"
            );
        }
        Ok(SendReceipt {
            succeeded: responders.len(),
            failed: 0,
        })
    }
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend {
    pub responders: Vec<ResponderId>,
    pub notification: Notification,
}

/// In-process gateway that records every call.
///
/// Individual responders can be set to fail or to stall, which makes it
/// suitable for embedded use and for exercising partial-success paths.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<RecordedSend>>,
    failing: Mutex<HashSet<ResponderId>>,
    stalled: Mutex<HashSet<ResponderId>>,
    stall_for: Mutex<Duration>,
    calls: AtomicU64,
}

impl RecordingGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `responder` fail.
    pub fn fail_for(&self, responder: ResponderId) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(responder);
        }
    }

    /// Make sends to `responder` block for `duration` before succeeding.
    pub fn stall_for(&self, responder: ResponderId, duration: Duration) {
        if let Ok(mut stalled) = self.stalled.lock() {
            stalled.insert(responder);
        }
        if let Ok(mut d) = self.stall_for.lock() {
            *d = duration;
        }
    }

    /// Number of `send` invocations so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Snapshot of successful sends.
    #[must_use]
    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Every responder that received a notification for `event_id`, with repeats.
    #[must_use]
    pub fn recipients_of(&self, event_id: &str) -> Vec<ResponderId> {
        self.sent()
            .into_iter()
            .filter(|s| s.notification.data["event_id"] == event_id)
            .flat_map(|s| s.responders)
            .collect()
    }
}

impl NotificationGateway for RecordingGateway {
    fn send(&self, responders: &[ResponderId], notification: &Notification) -> Result<SendReceipt, DependencyError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let stall = {
            let stalled = self.stalled.lock().map_err(|_| poisoned())?;
            responders.iter().any(|r| stalled.contains(r))
        };
        if stall {
            let d = *self.stall_for.lock().map_err(|_| poisoned())?;
            thread::sleep(d);
        }

        {
            let failing = self.failing.lock().map_err(|_| poisoned())?;
            if let Some(r) = responders.iter().find(|r| failing.contains(r)) {
                return Err(DependencyError::NotificationFailed {
                    responder: *r,
                    reason: "push token rejected".to_string(),
                });
            }
        }

        self.sent.lock().map_err(|_| poisoned())?.push(RecordedSend {
            responders: responders.to_vec(),
            notification: notification.clone(),
        });
        Ok(SendReceipt {
            succeeded: responders.len(),
            failed: 0,
        })
    }
}

fn poisoned() -> DependencyError {
    DependencyError::Unavailable {
        collaborator: "recording_gateway".to_string(),
        message: "poisoned lock".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(event_id: &str) -> Notification {
        Notification {
            title: "t".to_string(),
            body: "b".to_string(),
            data: serde_json::json!({ "event_id": event_id, "event_kind": "panic" }),
        }
    }

    #[test]
    fn records_and_fails_selectively() {
        let gw = RecordingGateway::new();
        let ok = ResponderId::new();
        let bad = ResponderId::new();
        gw.fail_for(bad);

        assert_eq!(gw.send(&[ok], &note("e1")).unwrap().succeeded, 1);
        assert!(gw.send(&[bad], &note("e1")).is_err());
        assert_eq!(gw.calls(), 2);
        assert_eq!(gw.recipients_of("e1"), vec![ok]);
        assert!(gw.recipients_of("e2").is_empty());
    }

    #[test]
    fn tracing_gateway_reports_all_succeeded() {
        let receipt = TracingGateway
            .send(&[ResponderId::new(), ResponderId::new()], &note("e"))
            .unwrap();
        assert_eq!(receipt, SendReceipt { succeeded: 2, failed: 0 });
    }
}
