/// Intent parser: the think stage of the pipeline.
///
/// Sends the user query plus a compact description of the loaded data to the
/// language model and validates the reply into a `StructuredFilter`. This is
/// the only component that talks to the model, and its output is never
/// trusted without validation: a reply that cannot be parsed triggers exactly
/// one repair re-prompt (carrying the parse error back to the model), and a
/// second failure degrades the query to `Intent::Ambiguous` so the caller can
/// ask the user to rephrase. The model's non-determinism stops here.
use std::sync::Arc;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use tracing::{info, warn};

use medsearch_common::llm::LanguageModel;

use crate::model::{Intent, Record, StructuredFilter};

/// Specialty names the engine knows how to reason about, independent of any
/// particular upload. Merged with the specialties observed in the loaded
/// records to form the taxonomy.
const KNOWN_SPECIALTIES: &[&str] = &[
    "General Medicine",
    "Family & Community Medicine",
    "Emergency Medicine",
    "Internal Medicine",
    "Cardiology",
    "Gastroenterology",
    "Orthopaedic Surgery",
    "Ophthalmology",
    "Otolaryngology",
    "Psychiatry",
    "Dental",
    "Endocrinology",
    "Renal Medicine",
    "Urology",
    "Respiratory Medicine",
];

/// Corrections for specialty names the model tends to invent. Matched on the
/// whole value, case-insensitively.
const SPECIALTY_ALIASES: &[(&str, &str)] = &[
    ("general practitioner", "General Medicine"),
    ("gp", "General Medicine"),
    ("family medicine", "Family & Community Medicine"),
    ("paediatric", "Family & Community Medicine"),
    ("pediatric", "Family & Community Medicine"),
    ("ent", "Otolaryngology"),
    ("orthopaedic", "Orthopaedic Surgery"),
    ("orthopedic", "Orthopaedic Surgery"),
    ("dentist", "Dental"),
];

const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("chinese", "Mandarin"),
    ("中文", "Mandarin"),
    ("华语", "Mandarin"),
];

const SYMPTOM_GUIDANCE: &str = "\
- fever / cold / flu / general illness -> General Medicine (never \"General Practitioner\")
- baby / kid / child / infant -> Family & Community Medicine
- emergency / urgent / serious -> Emergency Medicine
- heart / chest pain / cardiac -> Cardiology
- stomach / gut / digestive -> Gastroenterology
- bone / fracture / injury -> Orthopaedic Surgery
- eye / vision -> Ophthalmology
- throat / ear / nose -> Otolaryngology
- mental / depression / anxiety -> Psychiatry
- tooth / teeth / dentist -> Dental
- diabetes / sugar -> Endocrinology
- kidney / renal -> Renal Medicine
- urine / bladder -> Urology
- breathing / lung -> Respiratory Medicine";

/// The JSON shape the model is asked to produce. Kept separate from
/// `StructuredFilter` so the wire contract can stay lenient while the
/// validated filter stays strict.
#[derive(Debug, Deserialize, JsonSchema)]
struct WireFilter {
    /// One of "find_doctor", "find_clinic", "ambiguous".
    intent: String,
    /// Specialty name from the known list, or empty when a specific person
    /// is named.
    #[serde(default)]
    specialty: Option<String>,
    #[serde(default)]
    languages: Vec<String>,
    /// Area or neighbourhood name, when mentioned.
    #[serde(default)]
    area: Option<String>,
    /// Specific doctor or clinic name to search for.
    #[serde(default)]
    name_fragment: Option<String>,
    /// Raw location text or 6-digit postal code for distance ranking.
    #[serde(default)]
    location_query: Option<String>,
    /// One-line explanation of the parse.
    #[serde(default)]
    reasoning: Option<String>,
}

/// Compact description of the loaded data, included in the prompt so the
/// model picks values that exist.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    pub specialties: Vec<String>,
    pub areas: Vec<String>,
    pub languages: Vec<String>,
}

impl SchemaContext {
    /// Collect distinct specialties, areas, and languages from the loaded
    /// records, capped per field to keep the prompt bounded.
    pub fn from_records(records: &[Record], cap: usize) -> Self {
        let mut context = Self::default();
        for record in records {
            if let Some(specialty) = &record.specialty {
                push_distinct(&mut context.specialties, specialty, cap);
            }
            if let Some(area) = &record.area {
                push_distinct(&mut context.areas, area, cap);
            }
            for language in &record.languages {
                push_distinct(&mut context.languages, language, cap);
            }
        }
        context.specialties.sort();
        context.areas.sort();
        context.languages.sort();
        context
    }
}

fn push_distinct(values: &mut Vec<String>, value: &str, cap: usize) {
    let trimmed = value.trim();
    if trimmed.is_empty() || values.len() >= cap {
        return;
    }
    if !values.iter().any(|v| v.eq_ignore_ascii_case(trimmed)) {
        values.push(trimmed.to_string());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IntentParseError {
    #[error("reply contains no JSON object")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown intent value: {0}")]
    UnknownIntent(String),
}

pub struct IntentParser {
    llm: Arc<dyn LanguageModel>,
}

impl IntentParser {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Parse a free-text query into a validated filter.
    ///
    /// Never fails: an unusable model reply (after the single repair attempt)
    /// or a failed model call degrades to `Intent::Ambiguous`.
    pub async fn parse(&self, query: &str, context: &SchemaContext) -> StructuredFilter {
        let system = system_prompt(context);

        let first = match self.llm.complete(&system, query).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "language model call failed, degrading to ambiguous");
                return StructuredFilter::ambiguous();
            }
        };

        let parse_error = match interpret(&first, context) {
            Ok(filter) => {
                info!(intent = ?filter.intent, "intent parsed");
                return filter;
            }
            Err(e) => e,
        };

        warn!(error = %parse_error, "intent reply unusable, attempting repair");
        let repair = repair_prompt(query, &first, &parse_error);
        match self.llm.complete(&system, &repair).await {
            Ok(second) => interpret(&second, context).unwrap_or_else(|e| {
                warn!(error = %e, "repair reply still unusable, degrading to ambiguous");
                StructuredFilter::ambiguous()
            }),
            Err(e) => {
                warn!(error = %e, "repair call failed, degrading to ambiguous");
                StructuredFilter::ambiguous()
            }
        }
    }
}

fn system_prompt(context: &SchemaContext) -> String {
    let schema = schema_for!(WireFilter);
    let schema_json =
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

    format!(
        "You are a medical search intent analyzer for a Singapore doctor and clinic directory.\n\
Parse the user's query into a single JSON object matching this schema:\n\
{schema_json}\n\
\n\
Rules:\n\
1. Location search: phrases like \"nearest\", \"closest\", \"near\", \"around\" mean \
intent=\"find_clinic\"; put the location text or 6-digit postal code into location_query.\n\
2. Name search: \"find dr. [name]\", \"doctor [name]\", or any specific person or clinic \
name goes into name_fragment, and specialty stays empty.\n\
3. Symptoms map to a specialty ONLY when no specific name is mentioned, using exactly \
these names:\n{symptoms}\n\
4. Languages mentioned in the query (\"Mandarin\", \"Malay\", ...) go into languages.\n\
5. If the query is not a doctor or clinic search, or you cannot tell what is being \
asked, set intent=\"ambiguous\".\n\
\n\
Known specialties: {specialties}\n\
Known areas: {areas}\n\
Known languages: {languages}\n\
\n\
Reply with ONLY the JSON object.",
        symptoms = SYMPTOM_GUIDANCE,
        specialties = join_or_none(&context.specialties),
        areas = join_or_none(&context.areas),
        languages = join_or_none(&context.languages),
    )
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none loaded)".to_string()
    } else {
        values.join(", ")
    }
}

fn repair_prompt(query: &str, reply: &str, error: &IntentParseError) -> String {
    format!(
        "Your previous reply could not be parsed.\n\
Parse error: {error}\n\
Previous reply:\n{reply}\n\
\n\
Original query: {query}\n\
Return ONLY the corrected JSON object, with no surrounding text."
    )
}

/// Validate a raw model reply into a `StructuredFilter`.
fn interpret(reply: &str, context: &SchemaContext) -> Result<StructuredFilter, IntentParseError> {
    let json = extract_json_object(reply).ok_or(IntentParseError::NoJsonObject)?;
    let wire: WireFilter = serde_json::from_str(&json)?;

    let intent = match wire.intent.trim().to_lowercase().as_str() {
        "find_doctor" => Intent::FindDoctor,
        "find_clinic" => Intent::FindClinic,
        "ambiguous" => Intent::Ambiguous,
        other => return Err(IntentParseError::UnknownIntent(other.to_string())),
    };

    if intent == Intent::Ambiguous {
        let mut filter = StructuredFilter::ambiguous();
        filter.reasoning = clean(wire.reasoning);
        return Ok(filter);
    }

    let (specialty, specialty_in_taxonomy) = match clean(wire.specialty) {
        Some(raw) => {
            let corrected = correct_specialty(&raw);
            let known = is_known_specialty(&corrected, context);
            if !known {
                info!(specialty = %corrected, "specialty not in taxonomy, display only");
            }
            (Some(corrected), known)
        }
        None => (None, false),
    };

    let mut languages = Vec::new();
    for raw in wire.languages {
        if let Some(language) = clean(Some(raw)) {
            let corrected = correct_language(&language);
            if !languages
                .iter()
                .any(|l: &String| l.eq_ignore_ascii_case(&corrected))
            {
                languages.push(corrected);
            }
        }
    }

    let area = clean(wire.area);

    // The model sometimes leaves a postal code in `area`; promote it so the
    // distance stage still runs.
    let location_query = clean(wire.location_query).or_else(|| {
        let postal_re = Regex::new(r"\b\d{6}\b").expect("valid regex");
        area.as_deref()
            .filter(|a| postal_re.is_match(a))
            .map(|a| a.to_string())
    });

    Ok(StructuredFilter {
        intent,
        specialty,
        specialty_in_taxonomy,
        languages,
        area,
        name_fragment: clean(wire.name_fragment),
        location_query,
        reasoning: clean(wire.reasoning),
    })
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn correct_specialty(value: &str) -> String {
    let lowered = value.to_lowercase();
    SPECIALTY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| value.to_string())
}

fn correct_language(value: &str) -> String {
    let lowered = value.to_lowercase();
    LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| value.to_string())
}

fn is_known_specialty(value: &str, context: &SchemaContext) -> bool {
    KNOWN_SPECIALTIES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(value))
        || context
            .specialties
            .iter()
            .any(|known| known.eq_ignore_ascii_case(value))
}

/// Pull the JSON object out of a model reply, tolerating markdown fences and
/// surrounding prose.
fn extract_json_object(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    let fence_re = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex");
    let body = fence_re
        .captures(trimmed)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| trimmed.to_string());

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(body[start..=end].to_string())
}
