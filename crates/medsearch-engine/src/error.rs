/// Hard failures of the search engine.
///
/// Almost everything in the pipeline degrades instead of failing: unusable
/// model output becomes an ambiguous intent, unresolved locations rank with
/// a null distance, and an over-constrained filter is relaxed. The variants
/// here are the exceptions — preconditions the caller must fix.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no data loaded: load doctor and clinic tables before searching")]
    NoData,

    #[error("config error: {0}")]
    Config(String),
}
