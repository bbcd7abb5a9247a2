/// Result composer: merges fuzzy scores and distances into one ordering.
///
/// The primary sort key is the fuzzy score (descending) when the query named
/// someone; otherwise distance (ascending) when the query had a location;
/// otherwise filter-stage order is preserved. The other signal, when
/// available, breaks ties. Records whose location cannot be resolved keep a
/// null distance and always sort after records with a known distance.
use std::cmp::Ordering;

use tracing::warn;

use medsearch_common::geocode::{GeocodeCache, Geocoder};

use crate::config::EngineConfig;
use crate::model::{
    Record, RelaxedConstraint, ScoredRecord, SearchMetadata, SearchResults, StructuredFilter,
};

/// Resolve distances, order, cap, and attach metadata.
pub async fn compose(
    mut scored: Vec<ScoredRecord>,
    filter: &StructuredFilter,
    geocoder: &dyn Geocoder,
    cache: &GeocodeCache,
    config: &EngineConfig,
    relaxations: Vec<RelaxedConstraint>,
    loaded: usize,
) -> SearchResults {
    let candidates = scored.len();
    let mut geocode_misses = 0usize;

    let origin = match &filter.location_query {
        Some(query) => {
            let resolved = cache.resolve(geocoder, query).await;
            if resolved.is_none() {
                geocode_misses += 1;
                warn!(query = %query, "query location unresolved, ranking without distance");
            }
            resolved
        }
        None => None,
    };

    if let Some(origin) = origin {
        for entry in &mut scored {
            let Some(location) = record_location(&entry.record) else {
                geocode_misses += 1;
                continue;
            };
            match cache.resolve(geocoder, &location).await {
                Some(point) => entry.distance_km = Some(origin.distance_km(&point)),
                None => geocode_misses += 1,
            }
        }
    }

    let by_fuzzy = filter.name_fragment.is_some();
    let by_distance = origin.is_some();

    scored.sort_by(|a, b| order(a, b, by_fuzzy, by_distance));
    for entry in &mut scored {
        entry.rank_score = rank_score(entry, by_fuzzy, by_distance);
    }
    scored.truncate(config.max_results);

    let metadata = SearchMetadata {
        loaded,
        candidates,
        returned: scored.len(),
        relaxations,
        low_confidence_specialty: if filter.specialty_in_taxonomy {
            None
        } else {
            filter.specialty.clone()
        },
        geocode_misses,
        reasoning: filter.reasoning.clone(),
    };

    SearchResults {
        results: scored,
        metadata,
    }
}

/// The best location string a record offers for geocoding. Postal codes are
/// the most precise, then the full address, then the area name.
fn record_location(record: &Record) -> Option<String> {
    if let Some(postal) = &record.postal_code {
        return Some(format!("Singapore {postal}"));
    }
    record.address.clone().or_else(|| record.area.clone())
}

fn order(a: &ScoredRecord, b: &ScoredRecord, by_fuzzy: bool, by_distance: bool) -> Ordering {
    if by_fuzzy {
        descending(a.fuzzy_score, b.fuzzy_score).then_with(|| {
            if by_distance {
                ascending(a.distance_km, b.distance_km)
            } else {
                Ordering::Equal
            }
        })
    } else if by_distance {
        ascending(a.distance_km, b.distance_km)
            .then_with(|| descending(a.fuzzy_score, b.fuzzy_score))
    } else {
        Ordering::Equal
    }
}

/// Ascending; absent values sort last.
fn ascending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Descending; absent values sort last.
fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn rank_score(entry: &ScoredRecord, by_fuzzy: bool, by_distance: bool) -> f64 {
    if by_fuzzy {
        entry.fuzzy_score.unwrap_or(0.0) / 100.0
    } else if by_distance {
        entry
            .distance_km
            .map(|km| 1.0 / (1.0 + km))
            .unwrap_or(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use async_trait::async_trait;
    use medsearch_common::geocode::{GeoPoint, GeocodeError};

    use crate::model::{Intent, RecordCategory};

    use super::*;

    /// Resolves a query when it contains one of the known keys.
    struct MapGeocoder {
        points: HashMap<&'static str, GeoPoint>,
    }

    #[async_trait]
    impl Geocoder for MapGeocoder {
        async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
            Ok(self
                .points
                .iter()
                .find(|(key, _)| query.contains(*key))
                .map(|(_, point)| *point))
        }
    }

    fn city_hall_geocoder() -> MapGeocoder {
        let mut points = HashMap::new();
        points.insert("179094", GeoPoint::new(1.2966, 103.8520));
        points.insert("180231", GeoPoint::new(1.2969, 103.8535));
        points.insert("018989", GeoPoint::new(1.2821, 103.8545));
        MapGeocoder { points }
    }

    fn clinic(id: &str, name: &str, postal: Option<&str>) -> ScoredRecord {
        ScoredRecord::unranked(Record {
            id: id.to_string(),
            name: name.to_string(),
            category: RecordCategory::Clinic,
            specialty: None,
            languages: Vec::new(),
            area: None,
            postal_code: postal.map(|p| p.to_string()),
            address: None,
            services: None,
            raw: BTreeMap::new(),
        })
    }

    fn clinic_filter(location: Option<&str>) -> StructuredFilter {
        StructuredFilter {
            intent: Intent::FindClinic,
            specialty: None,
            specialty_in_taxonomy: false,
            languages: Vec::new(),
            area: None,
            name_fragment: None,
            location_query: location.map(|l| l.to_string()),
            reasoning: None,
        }
    }

    #[tokio::test]
    async fn distance_orders_ascending_with_unresolved_last() {
        let geocoder = city_hall_geocoder();
        let cache = GeocodeCache::new();
        let scored = vec![
            clinic("far", "Marina GP", Some("018989")),
            clinic("unknown", "Mystery Clinic", None),
            clinic("near", "Bras Basah Clinic", Some("180231")),
        ];

        let results = compose(
            scored,
            &clinic_filter(Some("179094")),
            &geocoder,
            &cache,
            &EngineConfig::default(),
            Vec::new(),
            3,
        )
        .await;

        let ids: Vec<&str> = results.results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far", "unknown"]);
        assert!(results.results[0].distance_km.expect("near") < 1.0);
        assert!(results.results[1].distance_km.expect("far") > 1.0);
        assert!(results.results[2].distance_km.is_none());
        assert_eq!(results.metadata.geocode_misses, 1);
        assert!(results.results[0].rank_score > results.results[1].rank_score);
    }

    #[tokio::test]
    async fn fuzzy_score_is_primary_when_a_name_was_given() {
        let geocoder = city_hall_geocoder();
        let cache = GeocodeCache::new();

        let mut better = clinic("better", "Tan Clinic", Some("018989"));
        better.fuzzy_score = Some(90.0);
        let mut closer = clinic("closer", "Teo Clinic", Some("180231"));
        closer.fuzzy_score = Some(70.0);

        let mut filter = clinic_filter(Some("179094"));
        filter.name_fragment = Some("Tan".to_string());

        let results = compose(
            vec![closer, better],
            &filter,
            &geocoder,
            &cache,
            &EngineConfig::default(),
            Vec::new(),
            2,
        )
        .await;

        let ids: Vec<&str> = results.results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["better", "closer"]);
    }

    #[tokio::test]
    async fn unresolved_query_location_degrades_to_filter_order() {
        let geocoder = MapGeocoder {
            points: HashMap::new(),
        };
        let cache = GeocodeCache::new();
        let scored = vec![
            clinic("first", "A Clinic", Some("180231")),
            clinic("second", "B Clinic", Some("018989")),
        ];

        let results = compose(
            scored,
            &clinic_filter(Some("999999")),
            &geocoder,
            &cache,
            &EngineConfig::default(),
            Vec::new(),
            2,
        )
        .await;

        let ids: Vec<&str> = results.results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert!(results.results.iter().all(|r| r.distance_km.is_none()));
        assert_eq!(results.metadata.geocode_misses, 1);
    }

    #[tokio::test]
    async fn result_list_is_capped_and_counted() {
        let geocoder = city_hall_geocoder();
        let cache = GeocodeCache::new();
        let config = EngineConfig {
            max_results: 1,
            ..EngineConfig::default()
        };
        let scored = vec![
            clinic("near", "Bras Basah Clinic", Some("180231")),
            clinic("far", "Marina GP", Some("018989")),
        ];

        let results = compose(
            scored,
            &clinic_filter(Some("179094")),
            &geocoder,
            &cache,
            &config,
            vec![RelaxedConstraint::Area],
            10,
        )
        .await;

        assert_eq!(results.results.len(), 1);
        assert_eq!(results.metadata.loaded, 10);
        assert_eq!(results.metadata.candidates, 2);
        assert_eq!(results.metadata.returned, 1);
        assert_eq!(results.metadata.relaxations, vec![RelaxedConstraint::Area]);
    }

    #[test]
    fn record_location_prefers_postal_then_address_then_area() {
        let mut record = clinic("a", "A", Some("180231")).record;
        record.address = Some("231 Bain Street".to_string());
        record.area = Some("Bras Basah".to_string());
        assert_eq!(
            record_location(&record).as_deref(),
            Some("Singapore 180231")
        );

        record.postal_code = None;
        assert_eq!(record_location(&record).as_deref(), Some("231 Bain Street"));

        record.address = None;
        assert_eq!(record_location(&record).as_deref(), Some("Bras Basah"));
    }
}
