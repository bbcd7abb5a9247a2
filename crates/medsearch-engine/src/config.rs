use crate::error::EngineError;
use crate::model::RelaxedConstraint;

/// Tunable ranking and relaxation policy.
///
/// Defaults reproduce the observed behavior of the system this engine was
/// built for; every knob is overridable programmatically or via environment
/// variables. Absent variables fall back to defaults; present-but-invalid
/// values are an error rather than a silent fallback.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on the returned result list.
    pub max_results: usize,
    /// Fuzzy scores below this are kept but marked low-confidence.
    pub min_fuzzy_score: f64,
    /// Priority order in which the filter engine may drop constraints when
    /// a query matches nothing.
    pub relaxation_order: Vec<RelaxedConstraint>,
    /// Maximum distinct values per field listed in the model's schema
    /// context (specialties, areas, languages).
    pub schema_context_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_results: 15,
            min_fuzzy_score: 60.0,
            relaxation_order: vec![
                RelaxedConstraint::Area,
                RelaxedConstraint::Languages,
                RelaxedConstraint::Specialty,
            ],
            schema_context_cap: 40,
        }
    }
}

impl EngineConfig {
    /// Load overrides from environment variables.
    ///
    /// Recognized:
    /// - `MEDSEARCH_MAX_RESULTS`
    /// - `MEDSEARCH_MIN_FUZZY_SCORE`
    /// - `MEDSEARCH_RELAXATION_ORDER`: comma-separated subset of
    ///   `area,languages,specialty`
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("MEDSEARCH_MAX_RESULTS") {
            config.max_results = raw.parse::<usize>().map_err(|_| {
                EngineError::Config(format!("MEDSEARCH_MAX_RESULTS is not a number: {raw}"))
            })?;
        }

        if let Ok(raw) = std::env::var("MEDSEARCH_MIN_FUZZY_SCORE") {
            let score = raw.parse::<f64>().map_err(|_| {
                EngineError::Config(format!("MEDSEARCH_MIN_FUZZY_SCORE is not a number: {raw}"))
            })?;
            if !(0.0..=100.0).contains(&score) {
                return Err(EngineError::Config(format!(
                    "MEDSEARCH_MIN_FUZZY_SCORE must be in 0..=100, got {score}"
                )));
            }
            config.min_fuzzy_score = score;
        }

        if let Ok(raw) = std::env::var("MEDSEARCH_RELAXATION_ORDER") {
            config.relaxation_order = parse_relaxation_order(&raw)?;
        }

        Ok(config)
    }
}

fn parse_relaxation_order(raw: &str) -> Result<Vec<RelaxedConstraint>, EngineError> {
    let mut order = Vec::new();
    for part in raw.split(',') {
        let constraint = match part.trim().to_lowercase().as_str() {
            "area" => RelaxedConstraint::Area,
            "languages" | "language" => RelaxedConstraint::Languages,
            "specialty" | "speciality" => RelaxedConstraint::Specialty,
            other => {
                return Err(EngineError::Config(format!(
                    "unknown relaxation constraint: {other}"
                )))
            }
        };
        if !order.contains(&constraint) {
            order.push(constraint);
        }
    }
    Ok(order)
}
