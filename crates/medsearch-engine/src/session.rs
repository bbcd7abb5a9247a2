/// Session context: the owned state one user interaction operates on.
///
/// A session owns the canonical record set (rebuilt on every upload), the
/// schema context sent to the language model, the geocode cache, and the two
/// external seams. Queries run read-only against the loaded records; the
/// geocode cache is the only mutable structure they share, and it is safe
/// for concurrent use. Nothing is process-global, so tests run against
/// synthetic tables with scripted model and geocoder fakes.
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use medsearch_common::geocode::{GeocodeCache, Geocoder};
use medsearch_common::llm::LanguageModel;

use crate::compose;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::filter;
use crate::intent::{IntentParser, SchemaContext};
use crate::model::{Intent, Record, RecordCategory, ScoredRecord, SearchReply};
use crate::normalize::{normalize_table, MappingReport, SynonymTable};
use crate::rank;

const CLARIFICATION_MESSAGE: &str = "I couldn't work out whether you're looking for a \
doctor or a clinic. Try naming a person, a specialty, a language, or a location, for \
example \"find Dr. Tan\" or \"nearest clinic to 179094\".";

pub struct SearchSession {
    parser: IntentParser,
    geocoder: Arc<dyn Geocoder>,
    config: EngineConfig,
    synonyms: SynonymTable,
    records: Vec<Record>,
    context: SchemaContext,
    geocode_cache: GeocodeCache,
}

impl SearchSession {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        geocoder: Arc<dyn Geocoder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            parser: IntentParser::new(llm),
            geocoder,
            config,
            synonyms: SynonymTable::default(),
            records: Vec::new(),
            context: SchemaContext::default(),
            geocode_cache: GeocodeCache::new(),
        }
    }

    /// Override the header synonym table before loading data.
    pub fn with_synonyms(mut self, synonyms: SynonymTable) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Rebuild the canonical record set from freshly uploaded tables.
    ///
    /// Returns the mapping/skip report for each table so the caller can show
    /// what was recognized. The geocode cache survives reloads; coordinates
    /// don't move when a spreadsheet is re-uploaded.
    pub fn load_tables(
        &mut self,
        doctor_rows: &[BTreeMap<String, String>],
        clinic_rows: &[BTreeMap<String, String>],
    ) -> (MappingReport, MappingReport) {
        let doctors = normalize_table(doctor_rows, RecordCategory::Doctor, &self.synonyms);
        let clinics = normalize_table(clinic_rows, RecordCategory::Clinic, &self.synonyms);

        info!(
            doctors = doctors.records.len(),
            clinics = clinics.records.len(),
            skipped = doctors.report.skipped.len() + clinics.report.skipped.len(),
            "session data loaded"
        );

        self.records = doctors.records;
        self.records.extend(clinics.records);
        self.context = SchemaContext::from_records(&self.records, self.config.schema_context_cap);

        (doctors.report, clinics.report)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Run one query through the whole pipeline:
    /// intent → filter (+relaxation) → fuzzy rank → distance → compose.
    ///
    /// The only hard failure is querying before any data is loaded. Every
    /// stage past that degrades instead of erroring.
    pub async fn search(&self, query: &str) -> Result<SearchReply, EngineError> {
        if self.records.is_empty() {
            return Err(EngineError::NoData);
        }

        let filter = self.parser.parse(query, &self.context).await;
        if filter.intent == Intent::Ambiguous {
            return Ok(SearchReply::Clarification {
                query: query.to_string(),
                message: CLARIFICATION_MESSAGE.to_string(),
            });
        }

        let outcome = filter::apply(&self.records, &filter, &self.config.relaxation_order);

        let scored: Vec<ScoredRecord> = match &filter.name_fragment {
            Some(fragment) => {
                rank::rank(outcome.candidates, fragment, self.config.min_fuzzy_score)
            }
            None => outcome
                .candidates
                .into_iter()
                .map(ScoredRecord::unranked)
                .collect(),
        };

        let results = compose::compose(
            scored,
            &filter,
            self.geocoder.as_ref(),
            &self.geocode_cache,
            &self.config,
            outcome.relaxations,
            self.records.len(),
        )
        .await;

        Ok(SearchReply::Results(results))
    }
}
