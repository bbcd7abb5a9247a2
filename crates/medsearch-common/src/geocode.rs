/// Geocoding client, great-circle distance math, and the session geocode cache.
///
/// Resolution order for a location query:
/// 1. A Singapore 6-digit postal code anywhere in the query is geocoded as
///    "Singapore {code}" (postal codes are the most precise signal we get).
/// 2. The query itself is sent to a Nominatim-style search endpoint.
/// 3. If the service has no match or is unreachable, a static table of
///    Singapore area centroids is consulted before giving up.
///
/// Callers treat `Ok(None)` and `Err(_)` the same way: the record keeps a
/// null distance and ranks after records with a known distance.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Approximate centroids for common Singapore planning areas, used when the
/// geocoding service cannot resolve an area name.
const AREA_CENTROIDS: &[(&str, f64, f64)] = &[
    ("ang mo kio", 1.375, 103.845),
    ("bedok", 1.324, 103.930),
    ("bishan", 1.351, 103.848),
    ("bukit batok", 1.358, 103.754),
    ("bukit merah", 1.277, 103.823),
    ("clementi", 1.315, 103.760),
    ("hougang", 1.371, 103.886),
    ("jurong west", 1.347, 103.717),
    ("kallang", 1.311, 103.862),
    ("pasir ris", 1.372, 103.949),
    ("punggol", 1.405, 103.902),
    ("sengkang", 1.391, 103.895),
    ("serangoon", 1.357, 103.874),
    ("tampines", 1.345, 103.944),
    ("toa payoh", 1.334, 103.856),
    ("woodlands", 1.437, 103.786),
    ("yishun", 1.429, 103.835),
];

/// A resolved coordinate pair. Absence of coordinates is always
/// `Option<GeoPoint>`, never a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle (haversine) distance in kilometres.
    /// Symmetric, and zero for identical points.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat_a = self.latitude.to_radians();
        let lat_b = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let h = (d_lat / 2.0).sin().powi(2)
            + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("geocoding service returned error: status={status} body={body}")]
    Upstream { status: StatusCode, body: String },
}

/// Seam between the engine and the geocoding service.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve free text (address, area name, or postal code) to coordinates.
    /// `Ok(None)` means the service answered but found no match.
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError>;
}

#[derive(Clone, Debug)]
pub struct GeocodeConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Appended to queries that don't already mention the country, biasing
    /// the service toward Singapore results.
    pub country_hint: Option<String>,
}

impl GeocodeConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("MEDSEARCH_GEOCODE_BASE_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());

        let user_agent = std::env::var("MEDSEARCH_GEOCODE_USER_AGENT")
            .unwrap_or_else(|_| "medsearch/geocoder".to_string());

        let timeout = std::env::var("MEDSEARCH_GEOCODE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(5));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent,
            timeout,
            country_hint: Some("Singapore".to_string()),
        }
    }
}

pub struct NominatimGeocoder {
    config: GeocodeConfig,
    http: reqwest::Client,
    postal_re: Regex,
}

impl NominatimGeocoder {
    pub fn new(config: GeocodeConfig) -> Result<Self, GeocodeError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        let postal_re = Regex::new(r"\b(\d{6})\b").expect("valid regex");
        Ok(Self {
            config,
            http,
            postal_re,
        })
    }

    async fn search(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        let url = format!("{}/search", self.config.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(self.config.timeout)
            .query(&[("q", query), ("format", "jsonv2"), ("limit", "1")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GeocodeError::Upstream { status, body });
        }

        let places = resp.json::<Vec<NominatimPlace>>().await?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        match (place.lat.parse::<f64>(), place.lon.parse::<f64>()) {
            (Ok(latitude), Ok(longitude)) => Ok(Some(GeoPoint {
                latitude,
                longitude,
            })),
            _ => {
                warn!(query, "geocoding service returned unparseable coordinates");
                Ok(None)
            }
        }
    }

    fn effective_query(&self, query: &str) -> String {
        // Postal codes are resolved as "Singapore {code}" regardless of the
        // surrounding text.
        if let Some(caps) = self.postal_re.captures(query) {
            return format!("Singapore {}", &caps[1]);
        }

        let cleaned = query.split_whitespace().collect::<Vec<_>>().join(" ");
        match &self.config.country_hint {
            Some(hint) if !cleaned.to_lowercase().contains(&hint.to_lowercase()) => {
                format!("{cleaned}, {hint}")
            }
            _ => cleaned,
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        let effective = self.effective_query(query);

        match self.search(&effective).await {
            Ok(Some(point)) => Ok(Some(point)),
            Ok(None) => {
                if let Some(point) = area_centroid(query) {
                    debug!(query, "using area centroid fallback");
                    return Ok(Some(point));
                }
                Ok(None)
            }
            Err(e) => {
                if let Some(point) = area_centroid(query) {
                    warn!(query, error = %e, "geocoding failed, using area centroid fallback");
                    return Ok(Some(point));
                }
                Err(e)
            }
        }
    }
}

/// Look up a known Singapore area centroid by name. The query matches when it
/// contains the area name (case-insensitive).
pub fn area_centroid(query: &str) -> Option<GeoPoint> {
    let needle = query.to_lowercase();
    AREA_CENTROIDS
        .iter()
        .find(|(name, _, _)| needle.contains(name))
        .map(|&(_, latitude, longitude)| GeoPoint {
            latitude,
            longitude,
        })
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Session-scoped cache of resolved locations, keyed by the normalized query.
///
/// Negative results (`None`) are cached too, so a postal code that resolves
/// to nothing is not re-queried for every record. Insert-if-absent semantics;
/// duplicate concurrent lookups for the same key are acceptable.
#[derive(Default)]
pub struct GeocodeCache {
    inner: RwLock<HashMap<String, Option<GeoPoint>>>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `query` through the cache, calling the geocoder on a miss.
    /// Service errors degrade to `None` and are not cached (they may be
    /// transient).
    pub async fn resolve(&self, geocoder: &dyn Geocoder, query: &str) -> Option<GeoPoint> {
        let key = cache_key(query);
        if key.is_empty() {
            return None;
        }

        if let Some(cached) = self.inner.read().await.get(&key) {
            return *cached;
        }

        match geocoder.geocode(query).await {
            Ok(resolved) => {
                self.inner
                    .write()
                    .await
                    .entry(key)
                    .or_insert(resolved);
                resolved
            }
            Err(e) => {
                warn!(query, error = %e, "geocoding failed, ranking without distance");
                None
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

fn cache_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedGeocoder {
        point: Option<GeoPoint>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.point)
        }
    }

    struct FailingGeocoder;

    #[async_trait]
    impl Geocoder for FailingGeocoder {
        async fn geocode(&self, _query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
            Err(GeocodeError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "down".to_string(),
            })
        }
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let bedok = GeoPoint::new(1.324, 103.930);
        let tampines = GeoPoint::new(1.345, 103.944);

        assert_eq!(bedok.distance_km(&bedok), 0.0);
        let ab = bedok.distance_km(&tampines);
        let ba = tampines.distance_km(&bedok);
        assert!((ab - ba).abs() < 1e-12);
        // Neighbouring towns in the east, a few km apart.
        assert!(ab > 1.0 && ab < 10.0, "unexpected distance: {ab}");
    }

    #[test]
    fn centroid_lookup_is_case_insensitive_substring() {
        assert!(area_centroid("clinics around Bedok please").is_some());
        assert!(area_centroid("JURONG WEST").is_some());
        assert!(area_centroid("orchard road").is_none());
    }

    #[tokio::test]
    async fn cache_hits_skip_the_geocoder() {
        let geocoder = FixedGeocoder {
            point: Some(GeoPoint::new(1.3, 103.8)),
            calls: AtomicUsize::new(0),
        };
        let cache = GeocodeCache::new();

        let first = cache.resolve(&geocoder, "Singapore 179094").await;
        let second = cache.resolve(&geocoder, "singapore  179094").await;

        assert_eq!(first, second);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn negative_results_are_cached() {
        let geocoder = FixedGeocoder {
            point: None,
            calls: AtomicUsize::new(0),
        };
        let cache = GeocodeCache::new();

        assert!(cache.resolve(&geocoder, "nowhere at all").await.is_none());
        assert!(cache.resolve(&geocoder, "nowhere at all").await.is_none());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn service_errors_degrade_and_are_not_cached() {
        let cache = GeocodeCache::new();
        assert!(cache.resolve(&FailingGeocoder, "somewhere").await.is_none());
        assert!(cache.is_empty().await);
    }
}
