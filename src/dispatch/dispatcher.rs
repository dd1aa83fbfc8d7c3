//! Event dispatcher.
//!
//! Queries the [`GeoIndex`] for responders covering an event location,
//! deduplicates them and invokes the gateway exactly once per responder.
//! Failures never roll anything back: the event is already persisted by the
//! time it is dispatched, so the caller gets a partial-success count instead.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SafeguardConfig;
use crate::error::DependencyError;
use crate::geo::GeoPoint;
use crate::geo_index::GeoIndex;
use crate::ids::ResponderId;

use super::gateway::{Notification, NotificationGateway, SendReceipt};

/// Which kind of event is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Panic,
    Report,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic => write!(f, "panic"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// A freshly created event to fan out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub location: GeoPoint,
    pub title: String,
    pub body: String,
    /// Extra payload fields; must be a JSON object or null.
    pub payload: serde_json::Value,
}

/// Partial-success summary of one dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Distinct responders whose catchment covered the event.
    pub matched: usize,
    /// Responders whose send succeeded.
    pub notified: usize,
    /// Responders whose send failed or timed out.
    pub failed: usize,
    /// Failure details, one per failed responder.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DependencyError>,
    /// Set when the responder lookup itself failed; nothing was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_error: Option<String>,
}

impl DispatchOutcome {
    /// True when every matched responder was notified.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lookup_error.is_none() && self.failed == 0
    }
}

/// Orchestrates responder lookup and notification fan-out.
#[derive(Clone)]
pub struct EventDispatcher {
    geo: GeoIndex,
    gateway: Arc<dyn NotificationGateway>,
    send_timeout: Duration,
    max_parallel_sends: usize,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(geo: GeoIndex, gateway: Arc<dyn NotificationGateway>, config: &SafeguardConfig) -> Self {
        Self {
            geo,
            gateway,
            send_timeout: config.notification_timeout(),
            max_parallel_sends: config.max_parallel_sends.max(1),
        }
    }

    /// Dispatch `event` to every covering responder.
    ///
    /// Never fails: lookup and send errors are logged and reported in the
    /// returned outcome. Each responder is sent to at most once per call.
    pub fn dispatch(&self, event: &DispatchEvent) -> DispatchOutcome {
        let responders = match self.geo.find_responders_at(&event.location) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id,
                    kind = %event.kind,
                    error = %e,
                    "responder lookup failed; event not dispatched"
                );
                return DispatchOutcome {
                    lookup_error: Some(e.to_string()),
                    ..DispatchOutcome::default()
                };
            }
        };

        // The index already returns a set; keep the guarantee local as well.
        let unique: Vec<ResponderId> = responders.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            tracing::debug!(event_id = %event.event_id, kind = %event.kind, "no responders in range");
            return DispatchOutcome::default();
        }

        let notification = Arc::new(build_notification(event));
        let (notified, failures) = self.fan_out(&unique, &notification);

        let outcome = DispatchOutcome {
            matched: unique.len(),
            notified,
            failed: failures.len(),
            failures,
            lookup_error: None,
        };

        if outcome.failed > 0 {
            tracing::warn!(
                event_id = %event.event_id,
                kind = %event.kind,
                matched = outcome.matched,
                notified = outcome.notified,
                failed = outcome.failed,
                "dispatch completed with failures"
            );
        } else {
            tracing::info!(
                event_id = %event.event_id,
                kind = %event.kind,
                notified = outcome.notified,
                "dispatch completed"
            );
        }
        outcome
    }

    fn fan_out(&self, responders: &[ResponderId], notification: &Arc<Notification>) -> (usize, Vec<DependencyError>) {
        let mut notified = 0usize;
        let mut failures = Vec::new();

        for wave in responders.chunks(self.max_parallel_sends) {
            let deadline = Instant::now() + self.send_timeout;
            let mut pending: Vec<(ResponderId, Receiver<Result<SendReceipt, DependencyError>>)> =
                Vec::with_capacity(wave.len());

            for &responder in wave {
                let (tx, rx) = bounded(1);
                let gateway = Arc::clone(&self.gateway);
                let notification = Arc::clone(notification);
                let spawned = thread::Builder::new()
                    .name("safeguard-notify".to_string())
                    .spawn(move || {
                        let _ = tx.send(gateway.send(&[responder], &notification));
                    });
                match spawned {
                    Ok(_) => pending.push((responder, rx)),
                    Err(e) => failures.push(DependencyError::Unavailable {
                        collaborator: "notification_gateway".to_string(),
                        message: format!("failed to spawn sender for {responder}: {e}"),
                    }),
                }
            }

            for (responder, rx) in pending {
                match rx.recv_deadline(deadline) {
                    Ok(Ok(receipt)) if receipt.succeeded > 0 && receipt.failed == 0 => notified += 1,
                    Ok(Ok(receipt)) => failures.push(DependencyError::NotificationFailed {
                        responder,
                        reason: format!(
                            "gateway reported {} succeeded, {} failed",
                            receipt.succeeded, receipt.failed
                        ),
                    }),
                    Ok(Err(e)) => failures.push(e),
                    Err(RecvTimeoutError::Timeout) => failures.push(DependencyError::NotificationTimeout {
                        responder,
                        timeout_ms: u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX),
                    }),
                    Err(RecvTimeoutError::Disconnected) => failures.push(DependencyError::NotificationFailed {
                        responder,
                        reason: "sender exited without a result".to_string(),
                    }),
                }
            }
        }

        for failure in &failures {
            tracing::warn!(error = %failure, "notification failed");
        }
        (notified, failures)
    }
}

fn build_notification(event: &DispatchEvent) -> Notification {
    let mut data = match &event.payload {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    data.insert("event_id".to_string(), event.event_id.to_string().into());
    data.insert("event_kind".to_string(), event.kind.to_string().into());
    data.insert("latitude".to_string(), event.location.latitude().into());
    data.insert("longitude".to_string(), event.location.longitude().into());
    data.insert("geohash".to_string(), event.location.geohash().into());

    Notification {
        title: event.title.clone(),
        body: event.body.clone(),
        data: serde_json::Value::Object(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::gateway::RecordingGateway;
    use crate::storage::InMemoryResponderStore;

    fn setup(config: &SafeguardConfig) -> (EventDispatcher, GeoIndex, Arc<RecordingGateway>) {
        let geo = GeoIndex::new(Arc::new(InMemoryResponderStore::new()), config);
        let gateway = Arc::new(RecordingGateway::new());
        let dispatcher = EventDispatcher::new(geo.clone(), gateway.clone(), config);
        (dispatcher, geo, gateway)
    }

    fn event(lat: f64, lon: f64) -> DispatchEvent {
        DispatchEvent {
            event_id: Uuid::new_v4(),
            kind: EventKind::Panic,
            location: GeoPoint::new(lat, lon).unwrap(),
            title: "Panic alert".to_string(),
            body: "Someone nearby needs help".to_string(),
            payload: serde_json::json!({ "category": "robbery" }),
        }
    }

    #[test]
    fn empty_responder_set_is_a_noop() {
        let (dispatcher, _geo, gateway) = setup(&SafeguardConfig::default());
        let outcome = dispatcher.dispatch(&event(6.5, 3.38));
        assert_eq!(outcome.notified, 0);
        assert_eq!(outcome.matched, 0);
        assert!(outcome.is_complete());
        assert_eq!(gateway.calls(), 0);
    }

    #[test]
    fn notifies_each_covering_responder_once_with_tagged_payload() {
        let (dispatcher, geo, gateway) = setup(&SafeguardConfig::default());
        let a = ResponderId::new();
        let b = ResponderId::new();
        let far = ResponderId::new();
        geo.set_responder_location(a, 6.50, 3.38, 10.0).unwrap();
        geo.set_responder_location(b, 6.52, 3.37, 5.0).unwrap();
        geo.set_responder_location(far, 9.0, 7.0, 10.0).unwrap();

        let ev = event(6.5244, 3.3792);
        let outcome = dispatcher.dispatch(&ev);
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.notified, 2);
        assert_eq!(gateway.calls(), 2);

        let mut recipients = gateway.recipients_of(&ev.event_id.to_string());
        recipients.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(recipients, expected);

        let sent = gateway.sent();
        let data = &sent[0].notification.data;
        assert_eq!(data["event_kind"], "panic");
        assert_eq!(data["category"], "robbery");
        assert_eq!(data["event_id"], ev.event_id.to_string().as_str());
    }

    #[test]
    fn failures_are_counted_not_propagated() {
        let (dispatcher, geo, gateway) = setup(&SafeguardConfig::default());
        let ok = ResponderId::new();
        let bad = ResponderId::new();
        geo.set_responder_location(ok, 0.0, 0.0, 10.0).unwrap();
        geo.set_responder_location(bad, 0.0, 0.01, 10.0).unwrap();
        gateway.fail_for(bad);

        let outcome = dispatcher.dispatch(&event(0.0, 0.0));
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.notified, 1);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.is_complete());
        assert!(matches!(
            outcome.failures[0],
            DependencyError::NotificationFailed { responder, .. } if responder == bad
        ));
    }

    #[test]
    fn slow_sends_time_out_without_blocking_others() {
        let config = SafeguardConfig {
            notification_timeout_ms: 50,
            ..SafeguardConfig::default()
        };
        let (dispatcher, geo, gateway) = setup(&config);
        let fast = ResponderId::new();
        let slow = ResponderId::new();
        geo.set_responder_location(fast, 0.0, 0.0, 10.0).unwrap();
        geo.set_responder_location(slow, 0.0, 0.01, 10.0).unwrap();
        gateway.stall_for(slow, Duration::from_millis(500));

        let started = Instant::now();
        let outcome = dispatcher.dispatch(&event(0.0, 0.0));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(outcome.notified, 1);
        assert!(matches!(
            outcome.failures[0],
            DependencyError::NotificationTimeout { responder, timeout_ms: 50 } if responder == slow
        ));
    }

    #[test]
    fn waves_respect_parallelism_bound() {
        let config = SafeguardConfig {
            max_parallel_sends: 2,
            ..SafeguardConfig::default()
        };
        let (dispatcher, geo, gateway) = setup(&config);
        for i in 0..5 {
            geo.set_responder_location(ResponderId::new(), 0.0, f64::from(i) * 0.001, 10.0)
                .unwrap();
        }
        let outcome = dispatcher.dispatch(&event(0.0, 0.0));
        assert_eq!(outcome.notified, 5);
        assert_eq!(gateway.calls(), 5);
    }
}
