use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One doctor or one clinic in canonical form, produced by the column
/// normalizer from an uploaded row with arbitrary headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique within its category. Taken from an id column when one maps,
    /// otherwise generated from the row position (e.g. "doctor-3").
    pub id: String,
    /// Display name. Never empty; rows without one are skipped and counted.
    pub name: String,
    pub category: RecordCategory,
    pub specialty: Option<String>,
    /// Deduplicated, trimmed language names.
    pub languages: Vec<String>,
    pub area: Option<String>,
    /// Singapore 6-digit postal code.
    pub postal_code: Option<String>,
    pub address: Option<String>,
    /// Free-text services description; participates in specialty matching.
    pub services: Option<String>,
    /// The original row, retained for display.
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    Doctor,
    Clinic,
}

impl RecordCategory {
    /// Prefix used when generating record ids ("doctor-1", "clinic-7").
    pub fn id_prefix(&self) -> &'static str {
        match self {
            RecordCategory::Doctor => "doctor",
            RecordCategory::Clinic => "clinic",
        }
    }
}

/// The classified purpose of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FindDoctor,
    FindClinic,
    /// The query could not be understood; no filtering is performed and the
    /// raw query is echoed back with guidance.
    Ambiguous,
}

/// Validated output of intent parsing. Every field except `intent` is a
/// constraint that may be absent; absent means "no constraint", never
/// "match nothing".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFilter {
    pub intent: Intent,
    pub specialty: Option<String>,
    /// False when `specialty` is not in the known taxonomy. Low-confidence
    /// specialties are kept for display but never hard-filtered.
    pub specialty_in_taxonomy: bool,
    pub languages: Vec<String>,
    pub area: Option<String>,
    /// Fuzzy-search target against record names.
    pub name_fragment: Option<String>,
    /// Raw location text or postal code for geocoding.
    pub location_query: Option<String>,
    /// The model's one-line explanation of its parse, retained verbatim.
    pub reasoning: Option<String>,
}

impl StructuredFilter {
    pub fn ambiguous() -> Self {
        Self {
            intent: Intent::Ambiguous,
            specialty: None,
            specialty_in_taxonomy: false,
            languages: Vec::new(),
            area: None,
            name_fragment: None,
            location_query: None,
            reasoning: None,
        }
    }
}

/// A constraint the filter engine dropped to avoid an empty result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxedConstraint {
    Area,
    Languages,
    Specialty,
}

/// A record with its per-query scores. Created fresh per query and discarded
/// after the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    /// Name similarity 0-100; present only when the query had a name fragment.
    pub fuzzy_score: Option<f64>,
    /// Distance from the query location; `None` when either end is unresolved.
    pub distance_km: Option<f64>,
    /// Derived display score consistent with the result ordering.
    pub rank_score: f64,
    /// Set when the fuzzy score fell below the configured minimum. Kept in
    /// the results anyway; users often have typos.
    pub low_confidence: bool,
}

impl ScoredRecord {
    /// Wrap a record that went through no fuzzy ranking.
    pub fn unranked(record: Record) -> Self {
        Self {
            record,
            fuzzy_score: None,
            distance_km: None,
            rank_score: 0.0,
            low_confidence: false,
        }
    }
}

/// Pipeline counts and degradations, for transparency in the presentation
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Records loaded in the session before any stage ran.
    pub loaded: usize,
    /// Candidates after filtering (and relaxation, if any).
    pub candidates: usize,
    /// Results returned after the cap.
    pub returned: usize,
    /// Constraints dropped to avoid an empty result, in priority order.
    pub relaxations: Vec<RelaxedConstraint>,
    /// Specialty kept for display only because it was not in the taxonomy.
    pub low_confidence_specialty: Option<String>,
    /// Locations that could not be resolved to coordinates this query.
    pub geocode_misses: usize,
    pub reasoning: Option<String>,
}

/// Everything the presentation layer needs to render a result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<ScoredRecord>,
    pub metadata: SearchMetadata,
}

/// Outcome of one query: either ranked results, or a request to rephrase
/// when the intent could not be understood.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchReply {
    Results(SearchResults),
    Clarification { query: String, message: String },
}
