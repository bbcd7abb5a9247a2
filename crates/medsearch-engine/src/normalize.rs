/// Column normalizer for uploaded doctor/clinic tables.
///
/// Uploaded spreadsheets arrive with arbitrary headers ("Doctor Name",
/// "GP Clinic Name", "诊所名称", ...). Each header is mapped to a canonical
/// field by case-insensitive keyword matching against a configurable synonym
/// table; the longest matching keyword wins, so "clinic name" beats "name".
///
/// Normalization never drops a row for a non-critical missing field. Only a
/// row without a usable name is excluded, and every exclusion is counted in
/// the skip report. The header mapping itself is reported for transparency.
use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{Record, RecordCategory};

/// Canonical fields every uploaded table is mapped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Id,
    Name,
    Specialty,
    Languages,
    Area,
    PostalCode,
    Address,
    Services,
}

/// Keyword table driving header recognition. Keywords are matched
/// case-insensitively as substrings; keywords shorter than four characters
/// must match a whole word to avoid accidental hits (e.g. "id" inside
/// "Provider").
#[derive(Debug, Clone)]
pub struct SynonymTable {
    keywords: Vec<(CanonicalField, Vec<String>)>,
}

impl Default for SynonymTable {
    fn default() -> Self {
        let entry = |field: CanonicalField, words: &[&str]| {
            (field, words.iter().map(|w| w.to_lowercase()).collect())
        };
        Self {
            keywords: vec![
                entry(CanonicalField::Id, &["id", "code", "编号"]),
                entry(
                    CanonicalField::Name,
                    &[
                        "doctor name",
                        "gp clinic name",
                        "clinic name",
                        "name",
                        "诊所名称",
                        "医生姓名",
                        "姓名",
                    ],
                ),
                entry(
                    CanonicalField::Specialty,
                    &["specialty", "speciality", "专科"],
                ),
                entry(
                    CanonicalField::Languages,
                    &["languages spoken", "language", "语言"],
                ),
                entry(CanonicalField::Area, &["area", "region", "district", "区域"]),
                entry(
                    CanonicalField::PostalCode,
                    &["postal", "postcode", "zip", "邮编"],
                ),
                entry(CanonicalField::Address, &["address", "地址"]),
                entry(CanonicalField::Services, &["services", "服务"]),
            ],
        }
    }
}

impl SynonymTable {
    /// Replace the keywords for one canonical field.
    pub fn with_keywords(mut self, field: CanonicalField, words: &[&str]) -> Self {
        let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
        if let Some(entry) = self.keywords.iter_mut().find(|(f, _)| *f == field) {
            entry.1 = lowered;
        } else {
            self.keywords.push((field, lowered));
        }
        self
    }

    /// Map a raw header to a canonical field, if any keyword matches.
    pub fn map_header(&self, header: &str) -> Option<CanonicalField> {
        let lowered = header.trim().to_lowercase();
        self.keywords
            .iter()
            .flat_map(|(field, words)| words.iter().map(move |w| (*field, w)))
            .filter(|(_, word)| keyword_matches(&lowered, word))
            .max_by_key(|(_, word)| word.len())
            .map(|(field, _)| field)
    }
}

fn keyword_matches(header: &str, keyword: &str) -> bool {
    if keyword.chars().count() >= 4 || !keyword.is_ascii() {
        header.contains(keyword)
    } else {
        header
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == keyword)
    }
}

/// One header of the uploaded table and the canonical field it mapped to
/// (`None` for unrecognized headers, which are preserved in `Record::raw`).
#[derive(Debug, Clone, Serialize)]
pub struct HeaderMapping {
    pub header: String,
    pub field: Option<CanonicalField>,
}

/// A row excluded during normalization.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub index: usize,
    pub reason: String,
}

/// What happened during normalization of one table.
#[derive(Debug, Clone, Serialize)]
pub struct MappingReport {
    pub mapping: Vec<HeaderMapping>,
    pub skipped: Vec<SkippedRow>,
}

/// Canonical records plus the report of how they were produced.
#[derive(Debug)]
pub struct NormalizedTable {
    pub records: Vec<Record>,
    pub report: MappingReport,
}

/// Normalize one uploaded table into canonical records.
pub fn normalize_table(
    rows: &[BTreeMap<String, String>],
    category: RecordCategory,
    synonyms: &SynonymTable,
) -> NormalizedTable {
    let postal_re = Regex::new(r"\b(\d{6})\b").expect("valid regex");

    // Collect headers across all rows; uploaded data is not guaranteed to
    // carry every column in every row.
    let headers: BTreeSet<&String> = rows.iter().flat_map(|row| row.keys()).collect();

    let mapping: Vec<HeaderMapping> = headers
        .iter()
        .map(|header| HeaderMapping {
            header: (*header).clone(),
            field: synonyms.map_header(header),
        })
        .collect();

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        let value_of = |field: CanonicalField| -> Option<String> {
            mapping
                .iter()
                .filter(|m| m.field == Some(field))
                .filter_map(|m| row.get(&m.header))
                .map(|cell| cell.trim())
                .find(|cell| !cell.is_empty())
                .map(|cell| cell.to_string())
        };

        let Some(name) = value_of(CanonicalField::Name) else {
            warn!(index, ?category, "row has no usable name, skipping");
            skipped.push(SkippedRow {
                index,
                reason: "missing name".to_string(),
            });
            continue;
        };

        let address = value_of(CanonicalField::Address);

        // Prefer an explicit postal column; otherwise pull the code out of
        // the address text ("... Singapore 179094").
        let postal_code = value_of(CanonicalField::PostalCode)
            .as_deref()
            .and_then(|cell| postal_re.captures(cell))
            .map(|caps| caps[1].to_string())
            .or_else(|| {
                address
                    .as_deref()
                    .and_then(|a| postal_re.captures(a))
                    .map(|caps| caps[1].to_string())
            });

        let mut id = value_of(CanonicalField::Id)
            .unwrap_or_else(|| format!("{}-{}", category.id_prefix(), index + 1));
        if !seen_ids.insert(id.clone()) {
            let disambiguated = format!("{id}-{}", index + 1);
            debug!(index, id = %id, disambiguated = %disambiguated, "duplicate id, disambiguating");
            id = disambiguated;
            seen_ids.insert(id.clone());
        }

        records.push(Record {
            id,
            name,
            category,
            specialty: value_of(CanonicalField::Specialty),
            languages: value_of(CanonicalField::Languages)
                .map(|cell| split_languages(&cell))
                .unwrap_or_default(),
            area: value_of(CanonicalField::Area),
            postal_code,
            address,
            services: value_of(CanonicalField::Services),
            raw: row.clone(),
        });
    }

    NormalizedTable {
        records,
        report: MappingReport { mapping, skipped },
    }
}

/// Split a languages cell on the separators seen in uploaded data.
fn split_languages(cell: &str) -> Vec<String> {
    let mut languages = Vec::new();
    for part in cell.split([',', ';', '/', '、']) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !languages.iter().any(|l: &String| l.eq_ignore_ascii_case(trimmed)) {
            languages.push(trimmed.to_string());
        }
    }
    languages
}
