//! Responder catchments and "who covers this point" queries.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SafeguardConfig;
use crate::error::{NotFoundError, SafeguardResult, ValidationError};
use crate::geo::{Catchment, GeoPoint};
use crate::ids::ResponderId;
use crate::storage::ResponderStore;

/// Latest known catchment of a responder team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponderTeam {
    pub responder: ResponderId,
    pub catchment: Catchment,
    pub updated_at: DateTime<Utc>,
}

/// Maintains responder locations and answers coverage queries.
///
/// Coverage is judged against each responder's own radius: a responder matches
/// a point iff the point lies inside the responder's catchment.
#[derive(Clone)]
pub struct GeoIndex {
    responders: Arc<dyn ResponderStore>,
    min_radius_km: f64,
    max_radius_km: f64,
}

impl GeoIndex {
    #[must_use]
    pub fn new(responders: Arc<dyn ResponderStore>, config: &SafeguardConfig) -> Self {
        Self {
            responders,
            min_radius_km: config.min_radius_km,
            max_radius_km: config.max_radius_km,
        }
    }

    /// Upsert a responder's location and radius. Last write wins.
    ///
    /// # Errors
    ///
    /// `Validation` for bad coordinates or a radius outside the configured
    /// bounds; nothing is written in that case.
    pub fn set_responder_location(
        &self,
        responder: ResponderId,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> SafeguardResult<ResponderTeam> {
        let center = GeoPoint::new(latitude, longitude)?;
        if !radius_km.is_finite() || radius_km < self.min_radius_km || radius_km > self.max_radius_km {
            return Err(ValidationError::RadiusOutOfRange {
                value: radius_km,
                min: self.min_radius_km,
                max: self.max_radius_km,
            }
            .into());
        }

        let team = ResponderTeam {
            responder,
            catchment: Catchment { center, radius_km },
            updated_at: Utc::now(),
        };
        self.responders.upsert(team.clone())?;

        tracing::debug!(
            responder = %responder,
            center = %center,
            radius_km,
            "responder catchment updated"
        );
        Ok(team)
    }

    /// The stored catchment of `responder`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the responder never set a location.
    pub fn responder(&self, responder: ResponderId) -> SafeguardResult<ResponderTeam> {
        self.responders
            .get(responder)?
            .ok_or_else(|| NotFoundError::Responder { responder }.into())
    }

    /// Responders whose catchment covers `(latitude, longitude)`.
    ///
    /// # Errors
    ///
    /// `Validation` for bad coordinates, `Storage` on backend failure.
    pub fn find_responders(&self, latitude: f64, longitude: f64) -> SafeguardResult<Vec<ResponderId>> {
        let point = GeoPoint::new(latitude, longitude)?;
        self.find_responders_at(&point)
    }

    /// As [`Self::find_responders`] for an already validated point.
    ///
    /// The result has set semantics: each responder appears once, in no
    /// particular order.
    ///
    /// # Errors
    ///
    /// `Storage` on backend failure.
    pub fn find_responders_at(&self, point: &GeoPoint) -> SafeguardResult<Vec<ResponderId>> {
        let teams = self.responders.find_covering(point, self.max_radius_km)?;
        let unique: BTreeSet<ResponderId> = teams
            .into_iter()
            .filter(|t| t.catchment.covers(point))
            .map(|t| t.responder)
            .collect();
        Ok(unique.into_iter().collect())
    }
}
