//! Incident reports.
//!
//! A report is immutable once created apart from its one-shot upload flag.
//! Creation dispatches exactly once; nothing about a report re-dispatches.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchEvent, DispatchOutcome, EventDispatcher, EventKind};
use crate::error::{ConflictError, NotFoundError, SafeguardResult, ValidationError};
use crate::geo::{Catchment, GeoPoint};
use crate::ids::{ReportId, SubjectId};
use crate::panic::EmergencyCategory;
use crate::storage::{IncidentReportStore, UploadMark};

/// Cap on a subject's own report listing.
pub const MAX_REPORTS_PER_LISTING: usize = 100;

const MAX_MEDIA_LEN: usize = 2048;
const MAX_CAPTION_LEN: usize = 500;

/// Media type of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Video,
    Audio,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// A stored incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: ReportId,
    pub subject: SubjectId,
    pub kind: ReportKind,
    pub location: GeoPoint,
    pub anonymous: bool,
    /// Media reference; replaced by the final URL when the upload completes.
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub category: EmergencyCategory,
    pub uploaded: bool,
    pub created_at: DateTime<Utc>,
}

/// Input to [`ReportStore::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub kind: ReportKind,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub anonymous: bool,
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<EmergencyCategory>,
}

impl NewReport {
    /// Minimal report with only the required fields.
    #[must_use]
    pub fn new(kind: ReportKind, latitude: f64, longitude: f64, media_url: impl Into<String>) -> Self {
        Self {
            kind,
            latitude,
            longitude,
            anonymous: false,
            media_url: media_url.into(),
            caption: None,
            thumbnail_url: None,
            category: None,
        }
    }

    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: EmergencyCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Result of [`ReportStore::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCreated {
    pub report_id: ReportId,
    pub dispatch: DispatchOutcome,
}

/// Responder-facing view of a report. The subject is withheld when anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyReport {
    pub report_id: ReportId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectId>,
    pub kind: ReportKind,
    pub location: GeoPoint,
    pub geohash: String,
    pub category: EmergencyCategory,
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub uploaded: bool,
    pub created_at: DateTime<Utc>,
    pub distance_km: f64,
}

impl NearbyReport {
    fn from_report(report: IncidentReport, distance_km: f64) -> Self {
        Self {
            report_id: report.id,
            subject: (!report.anonymous).then_some(report.subject),
            kind: report.kind,
            geohash: report.location.geohash(),
            location: report.location,
            category: report.category,
            media_url: report.media_url,
            caption: report.caption,
            thumbnail_url: report.thumbnail_url,
            uploaded: report.uploaded,
            created_at: report.created_at,
            distance_km,
        }
    }
}

fn require_text(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    check_length(field, value, max_length)
}

fn check_length(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.len() > max_length {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        });
    }
    Ok(())
}

/// Creates and lists incident reports.
#[derive(Clone)]
pub struct ReportStore {
    reports: Arc<dyn IncidentReportStore>,
    dispatcher: EventDispatcher,
}

impl ReportStore {
    #[must_use]
    pub fn new(reports: Arc<dyn IncidentReportStore>, dispatcher: EventDispatcher) -> Self {
        Self { reports, dispatcher }
    }

    /// Persist a report and dispatch it once.
    ///
    /// # Errors
    ///
    /// `Validation` for bad coordinates, a missing media reference or an
    /// oversize field. `Storage` if the report could not be persisted.
    pub fn create(&self, subject: SubjectId, input: NewReport) -> SafeguardResult<ReportCreated> {
        let location = GeoPoint::new(input.latitude, input.longitude)?;
        require_text("media_url", &input.media_url, MAX_MEDIA_LEN)?;
        if let Some(caption) = &input.caption {
            check_length("caption", caption, MAX_CAPTION_LEN)?;
        }
        if let Some(thumb) = &input.thumbnail_url {
            check_length("thumbnail_url", thumb, MAX_MEDIA_LEN)?;
        }

        let report = IncidentReport {
            id: ReportId::new(),
            subject,
            kind: input.kind,
            location,
            anonymous: input.anonymous,
            media_url: input.media_url,
            caption: input.caption,
            thumbnail_url: input.thumbnail_url,
            category: input.category.unwrap_or_default(),
            uploaded: false,
            created_at: Utc::now(),
        };
        let report_id = report.id;
        let event = dispatch_event(&report);
        self.reports.insert(report)?;

        tracing::info!(
            subject = %subject,
            report_id = %report_id,
            kind = %input.kind,
            "report created"
        );

        let dispatch = self.dispatcher.dispatch(&event);
        Ok(ReportCreated { report_id, dispatch })
    }

    /// Set the one-shot upload flag and record the final media URL.
    ///
    /// # Errors
    ///
    /// `NotFound` if the report does not exist or is not owned by `subject`;
    /// `Conflict` if it was already marked.
    pub fn mark_uploaded(&self, subject: SubjectId, report: ReportId, media_url: &str) -> SafeguardResult<()> {
        require_text("media_url", media_url, MAX_MEDIA_LEN)?;
        match self.reports.mark_uploaded(report, subject, media_url)? {
            UploadMark::Marked => {
                tracing::info!(subject = %subject, report_id = %report, "report upload completed");
                Ok(())
            }
            UploadMark::AlreadyUploaded => Err(ConflictError::AlreadyUploaded { report }.into()),
            UploadMark::NotFound => Err(NotFoundError::Report { report }.into()),
        }
    }

    /// The subject's own reports, newest first.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn reports_for_subject(&self, subject: SubjectId) -> SafeguardResult<Vec<IncidentReport>> {
        Ok(self.reports.find_by_subject(subject, MAX_REPORTS_PER_LISTING)?)
    }

    /// A single report by id.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub fn get(&self, report: ReportId) -> SafeguardResult<IncidentReport> {
        self.reports
            .get(report)?
            .ok_or_else(|| NotFoundError::Report { report }.into())
    }

    /// Reports inside `catchment`, newest first, anonymized where requested.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn nearby(&self, catchment: &Catchment) -> SafeguardResult<Vec<NearbyReport>> {
        Ok(self
            .reports
            .find_within(catchment)?
            .into_iter()
            .map(|r| {
                let d = catchment.center.distance_km(&r.location);
                NearbyReport::from_report(r, d)
            })
            .collect())
    }
}

fn dispatch_event(report: &IncidentReport) -> DispatchEvent {
    let mut payload = serde_json::json!({
        "report_kind": report.kind.to_string(),
        "category": report.category.as_str(),
        "category_label": report.category.label(),
        "anonymous": report.anonymous,
    });
    if !report.anonymous {
        payload["subject_id"] = serde_json::Value::String(report.subject.to_string());
    }
    DispatchEvent {
        event_id: *report.id.as_uuid(),
        kind: EventKind::Report,
        location: report.location,
        title: format!("New {} report nearby", report.kind),
        body: report
            .caption
            .clone()
            .unwrap_or_else(|| report.category.label().to_string()),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafeguardConfig;
    use crate::dispatch::RecordingGateway;
    use crate::geo_index::GeoIndex;
    use crate::ids::ResponderId;
    use crate::storage::InMemoryStores;

    struct Fixture {
        store: ReportStore,
        geo: GeoIndex,
        gateway: Arc<RecordingGateway>,
    }

    fn fixture() -> Fixture {
        let stores = InMemoryStores::default();
        let config = SafeguardConfig::default();
        let geo = GeoIndex::new(Arc::new(stores.responders), &config);
        let gateway = Arc::new(RecordingGateway::new());
        let dispatcher = EventDispatcher::new(geo.clone(), gateway.clone(), &config);
        Fixture {
            store: ReportStore::new(Arc::new(stores.reports), dispatcher),
            geo,
            gateway,
        }
    }

    #[test]
    fn create_dispatches_once() {
        let f = fixture();
        let r1 = ResponderId::new();
        let r2 = ResponderId::new();
        f.geo.set_responder_location(r1, 6.50, 3.38, 10.0).unwrap();
        f.geo.set_responder_location(r2, 6.52, 3.38, 5.0).unwrap();

        let created = f
            .store
            .create(
                SubjectId::new(),
                NewReport::new(ReportKind::Video, 6.5244, 3.3792, "blob://pending/1")
                    .with_category(EmergencyCategory::Fire),
            )
            .unwrap();

        assert_eq!(created.dispatch.matched, 2);
        assert_eq!(created.dispatch.notified, 2);
        let mut got = f.gateway.recipients_of(&created.report_id.to_string());
        got.sort();
        let mut want = vec![r1, r2];
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn validation_rejects_before_persisting() {
        let f = fixture();
        let subject = SubjectId::new();
        let err = f
            .store
            .create(subject, NewReport::new(ReportKind::Audio, 91.0, 0.0, "blob://x"))
            .unwrap_err();
        assert!(err.is_validation());
        let err = f
            .store
            .create(subject, NewReport::new(ReportKind::Audio, 1.0, 0.0, "  "))
            .unwrap_err();
        assert!(err.is_validation());
        let long = "x".repeat(MAX_CAPTION_LEN + 1);
        let err = f
            .store
            .create(
                subject,
                NewReport::new(ReportKind::Audio, 1.0, 0.0, "blob://x").with_caption(long),
            )
            .unwrap_err();
        assert!(err.is_validation());

        assert!(f.store.reports_for_subject(subject).unwrap().is_empty());
        assert_eq!(f.gateway.calls(), 0);
    }

    #[test]
    fn upload_flag_is_one_shot_and_owner_only() {
        let f = fixture();
        let owner = SubjectId::new();
        let id = f
            .store
            .create(owner, NewReport::new(ReportKind::Video, 1.0, 1.0, "blob://pending"))
            .unwrap()
            .report_id;

        assert!(f
            .store
            .mark_uploaded(SubjectId::new(), id, "https://cdn/v.mp4")
            .unwrap_err()
            .is_not_found());
        f.store.mark_uploaded(owner, id, "https://cdn/v.mp4").unwrap();
        assert!(f
            .store
            .mark_uploaded(owner, id, "https://cdn/v2.mp4")
            .unwrap_err()
            .is_conflict());

        let stored = f.store.get(id).unwrap();
        assert!(stored.uploaded);
        assert_eq!(stored.media_url, "https://cdn/v.mp4");
        assert!(f
            .store
            .mark_uploaded(owner, ReportId::new(), "https://cdn/x")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn nearby_hides_anonymous_subjects() {
        let f = fixture();
        let named = SubjectId::new();
        let hidden = SubjectId::new();
        f.store
            .create(named, NewReport::new(ReportKind::Video, 1.0, 1.0, "blob://a"))
            .unwrap();
        f.store
            .create(hidden, NewReport::new(ReportKind::Audio, 1.01, 1.0, "blob://b").anonymous())
            .unwrap();
        f.store
            .create(named, NewReport::new(ReportKind::Video, 20.0, 20.0, "blob://far"))
            .unwrap();

        let catchment = Catchment {
            center: GeoPoint::new(1.0, 1.0).unwrap(),
            radius_km: 5.0,
        };
        let found = f.store.nearby(&catchment).unwrap();
        assert_eq!(found.len(), 2);
        let subjects: Vec<Option<SubjectId>> = found.iter().map(|r| r.subject).collect();
        assert!(subjects.contains(&Some(named)));
        assert!(subjects.contains(&None));
        assert!(!subjects.contains(&Some(hidden)));
    }

    #[test]
    fn anonymous_dispatch_payload_omits_subject() {
        let f = fixture();
        f.geo
            .set_responder_location(ResponderId::new(), 1.0, 1.0, 5.0)
            .unwrap();
        f.store
            .create(
                SubjectId::new(),
                NewReport::new(ReportKind::Audio, 1.0, 1.0, "blob://b").anonymous(),
            )
            .unwrap();
        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].notification.data.get("subject_id").is_none());
        assert_eq!(sent[0].notification.data["event_kind"], "report");
    }
}
