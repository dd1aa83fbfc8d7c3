use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use safeguard::storage::InMemoryResponderStore;
use safeguard::{GeoIndex, ResponderId, SafeguardConfig};

/// Great-circle distance via the spherical law of cosines, independent of the
/// crate's haversine.
fn reference_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dl = (lon2 - lon1).to_radians();
    let cos_c = p1.sin() * p2.sin() + p1.cos() * p2.cos() * dl.cos();
    6371.0 * cos_c.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone)]
struct Team {
    lat: f64,
    lon: f64,
    radius_km: f64,
}

fn team() -> impl Strategy<Value = Team> {
    (-60.0f64..60.0, -170.0f64..170.0, 1.0f64..50.0).prop_map(|(lat, lon, radius_km)| Team {
        lat,
        lon,
        radius_km,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn find_responders_matches_reference(
        teams in prop::collection::vec(team(), 1..24),
        anchor in 0usize..24,
        dlat in -0.6f64..0.6,
        dlon in -0.6f64..0.6,
    ) {
        let index = GeoIndex::new(Arc::new(InMemoryResponderStore::new()), &SafeguardConfig::default());
        let ids: Vec<ResponderId> = teams
            .iter()
            .map(|t| {
                let id = ResponderId::new();
                index.set_responder_location(id, t.lat, t.lon, t.radius_km).unwrap();
                id
            })
            .collect();

        // Probe near one of the teams so both sides of the boundary get exercised.
        let a = &teams[anchor % teams.len()];
        let (lat, lon) = (a.lat + dlat, a.lon + dlon);

        let mut expected = BTreeSet::new();
        for (id, t) in ids.iter().zip(&teams) {
            let d = reference_distance_km(t.lat, t.lon, lat, lon);
            // Formula rounding differs right at the boundary.
            prop_assume!((d - t.radius_km).abs() > 1e-4);
            if d <= t.radius_km {
                expected.insert(*id);
            }
        }

        let found = index.find_responders(lat, lon).unwrap();
        let found_set: BTreeSet<ResponderId> = found.iter().copied().collect();
        prop_assert_eq!(found.len(), found_set.len());
        prop_assert_eq!(found_set, expected);
    }

    #[test]
    fn latest_catchment_wins(
        first in team(),
        second in team(),
    ) {
        let index = GeoIndex::new(Arc::new(InMemoryResponderStore::new()), &SafeguardConfig::default());
        let id = ResponderId::new();
        index.set_responder_location(id, first.lat, first.lon, first.radius_km).unwrap();
        index.set_responder_location(id, second.lat, second.lon, second.radius_km).unwrap();

        let team = index.responder(id).unwrap();
        prop_assert_eq!(team.catchment.center.latitude(), second.lat);
        prop_assert_eq!(team.catchment.radius_km, second.radius_km);

        let found = index.find_responders(second.lat, second.lon).unwrap();
        prop_assert_eq!(found, vec![id]);
    }
}

#[test]
fn out_of_range_radius_is_rejected() {
    let index = GeoIndex::new(Arc::new(InMemoryResponderStore::new()), &SafeguardConfig::default());
    let id = ResponderId::new();
    assert!(index.set_responder_location(id, 6.5, 3.38, 0.5).unwrap_err().is_validation());
    assert!(index.set_responder_location(id, 6.5, 3.38, 51.0).unwrap_err().is_validation());
    assert!(index.set_responder_location(id, 6.5, 181.0, 5.0).unwrap_err().is_validation());
    assert!(index.responder(id).unwrap_err().is_not_found());
}
