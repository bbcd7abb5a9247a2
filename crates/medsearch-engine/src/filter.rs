/// Filter engine: hard categorical filtering with progressive relaxation.
///
/// Every non-null filter field is a conjunctive predicate. When the full
/// conjunction matches nothing, constraints are dropped rather than
/// returning an empty result silently: the engine searches for the smallest
/// set of droppable constraints whose removal yields candidates, trying
/// smaller sets first and breaking ties by the configured priority order
/// (default Area, then Languages, then Specialty). Whatever was dropped is
/// reported to the caller.
use tracing::info;

use crate::model::{Intent, Record, RecordCategory, RelaxedConstraint, StructuredFilter};

/// Candidates plus the constraints that had to be dropped to produce them.
#[derive(Debug)]
pub struct FilterOutcome {
    pub candidates: Vec<Record>,
    pub relaxations: Vec<RelaxedConstraint>,
}

/// Apply `filter` to `records`, relaxing per `relaxation_order` if the full
/// conjunction matches nothing. Constraints absent from `relaxation_order`
/// are never dropped.
pub fn apply(
    records: &[Record],
    filter: &StructuredFilter,
    relaxation_order: &[RelaxedConstraint],
) -> FilterOutcome {
    let select = |dropped: &[RelaxedConstraint]| -> Vec<Record> {
        records
            .iter()
            .filter(|record| matches(record, filter, dropped))
            .cloned()
            .collect()
    };

    let full = select(&[]);
    if !full.is_empty() {
        return FilterOutcome {
            candidates: full,
            relaxations: Vec::new(),
        };
    }

    let droppable: Vec<RelaxedConstraint> = relaxation_order
        .iter()
        .copied()
        .filter(|constraint| constraint_present(filter, *constraint))
        .collect();

    // Smallest drop set first; among equal sizes the numeric mask order
    // follows the priority order (bit 0 = first droppable constraint).
    let count = droppable.len() as u32;
    let mut masks: Vec<u32> = (1..(1u32 << count)).collect();
    masks.sort_by_key(|mask| (mask.count_ones(), *mask));

    for mask in masks {
        let dropped: Vec<RelaxedConstraint> = droppable
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, c)| *c)
            .collect();

        let candidates = select(&dropped);
        if !candidates.is_empty() {
            info!(relaxed = ?dropped, "filters relaxed to avoid an empty result");
            return FilterOutcome {
                candidates,
                relaxations: dropped,
            };
        }
    }

    // Nothing matched even with every droppable constraint removed (e.g. no
    // records of the requested category). Surface which relaxations were
    // tried; the caller reports the empty result rather than crashing.
    FilterOutcome {
        candidates: Vec::new(),
        relaxations: droppable,
    }
}

fn constraint_present(filter: &StructuredFilter, constraint: RelaxedConstraint) -> bool {
    match constraint {
        RelaxedConstraint::Area => filter.area.is_some(),
        RelaxedConstraint::Languages => !filter.languages.is_empty(),
        RelaxedConstraint::Specialty => {
            filter.specialty.is_some() && filter.specialty_in_taxonomy
        }
    }
}

fn matches(record: &Record, filter: &StructuredFilter, dropped: &[RelaxedConstraint]) -> bool {
    let category = match filter.intent {
        Intent::FindDoctor => RecordCategory::Doctor,
        Intent::FindClinic => RecordCategory::Clinic,
        Intent::Ambiguous => return false,
    };
    if record.category != category {
        return false;
    }

    let active = |constraint: RelaxedConstraint| {
        constraint_present(filter, constraint) && !dropped.contains(&constraint)
    };

    if active(RelaxedConstraint::Specialty) {
        let Some(wanted) = &filter.specialty else {
            return false;
        };
        let in_specialty = record
            .specialty
            .as_deref()
            .is_some_and(|have| contains_ci(have, wanted));
        let in_services = record
            .services
            .as_deref()
            .is_some_and(|have| contains_ci(have, wanted));
        if !in_specialty && !in_services {
            return false;
        }
    }

    if active(RelaxedConstraint::Languages) {
        let offered = &record.languages;
        let all_offered = filter
            .languages
            .iter()
            .all(|wanted| offered.iter().any(|have| contains_ci(have, wanted)));
        if !all_offered {
            return false;
        }
    }

    if active(RelaxedConstraint::Area) {
        let Some(wanted) = &filter.area else {
            return false;
        };
        let in_area = record
            .area
            .as_deref()
            .is_some_and(|have| contains_ci(have, wanted) || contains_ci(wanted, have));
        let in_address = record
            .address
            .as_deref()
            .is_some_and(|have| contains_ci(have, wanted));
        if !in_area && !in_address {
            return false;
        }
    }

    true
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::model::Intent;

    use super::*;

    fn doctor(id: &str, specialty: &str, languages: &[&str], area: &str) -> Record {
        Record {
            id: id.to_string(),
            name: format!("Dr {id}"),
            category: RecordCategory::Doctor,
            specialty: Some(specialty.to_string()),
            languages: languages.iter().map(|l| l.to_string()).collect(),
            area: Some(area.to_string()),
            postal_code: None,
            address: None,
            services: None,
            raw: BTreeMap::new(),
        }
    }

    fn filter(
        specialty: Option<&str>,
        languages: &[&str],
        area: Option<&str>,
    ) -> StructuredFilter {
        StructuredFilter {
            intent: Intent::FindDoctor,
            specialty: specialty.map(|s| s.to_string()),
            specialty_in_taxonomy: specialty.is_some(),
            languages: languages.iter().map(|l| l.to_string()).collect(),
            area: area.map(|a| a.to_string()),
            name_fragment: None,
            location_query: None,
            reasoning: None,
        }
    }

    const DEFAULT_ORDER: &[RelaxedConstraint] = &[
        RelaxedConstraint::Area,
        RelaxedConstraint::Languages,
        RelaxedConstraint::Specialty,
    ];

    #[test]
    fn conjunctive_predicates_all_apply() {
        let records = vec![
            doctor("a", "Cardiology", &["English", "Mandarin"], "Bedok"),
            doctor("b", "Cardiology", &["English"], "Bedok"),
            doctor("c", "Urology", &["Mandarin"], "Bedok"),
        ];
        let outcome = apply(
            &records,
            &filter(Some("Cardiology"), &["Mandarin"], Some("Bedok")),
            DEFAULT_ORDER,
        );
        assert_eq!(outcome.relaxations, Vec::<RelaxedConstraint>::new());
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].id, "a");
    }

    #[test]
    fn relaxes_in_priority_order_when_several_single_drops_work() {
        // Dropping area alone OR languages alone would each yield matches;
        // area must win because it comes first in the order.
        let records = vec![
            doctor("a", "Cardiology", &["Mandarin"], "Tampines"),
            doctor("b", "Cardiology", &["Malay"], "Bedok"),
        ];
        let outcome = apply(
            &records,
            &filter(Some("Cardiology"), &["Mandarin"], Some("Bedok")),
            DEFAULT_ORDER,
        );
        assert_eq!(outcome.relaxations, vec![RelaxedConstraint::Area]);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].id, "a");
    }

    #[test]
    fn relaxes_only_the_constraint_that_blocks() {
        // No record has the requested specialty; languages match fine. The
        // engine must drop specialty and keep the language constraint.
        let records = vec![
            doctor("a", "General Medicine", &["Mandarin"], "Bedok"),
            doctor("b", "Cardiology", &["English"], "Bedok"),
        ];
        let outcome = apply(
            &records,
            &filter(Some("Orthopaedic Surgery"), &["Mandarin"], None),
            DEFAULT_ORDER,
        );
        assert_eq!(outcome.relaxations, vec![RelaxedConstraint::Specialty]);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].id, "a");
    }

    #[test]
    fn low_confidence_specialty_is_not_hard_filtered() {
        let records = vec![doctor("a", "General Medicine", &["English"], "Bedok")];
        let mut f = filter(Some("Chronomancy"), &[], None);
        f.specialty_in_taxonomy = false;
        let outcome = apply(&records, &f, DEFAULT_ORDER);
        assert!(outcome.relaxations.is_empty());
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn empty_even_after_all_relaxations_reports_what_was_tried() {
        let records = vec![doctor("a", "Cardiology", &["English"], "Bedok")];
        let mut f = filter(Some("Cardiology"), &[], None);
        // Wrong category: no clinic records exist at all.
        f.intent = Intent::FindClinic;
        let outcome = apply(&records, &f, DEFAULT_ORDER);
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.relaxations, vec![RelaxedConstraint::Specialty]);
    }

    #[test]
    fn reapplying_the_filter_to_its_own_output_is_a_fixed_point() {
        let records = vec![
            doctor("a", "General Medicine", &["Mandarin"], "Bedok"),
            doctor("b", "Cardiology", &["English"], "Tampines"),
        ];
        let f = filter(Some("Orthopaedic Surgery"), &["Mandarin"], None);

        let once = apply(&records, &f, DEFAULT_ORDER);
        let twice = apply(&once.candidates, &f, DEFAULT_ORDER);

        let ids = |candidates: &[Record]| -> Vec<String> {
            candidates.iter().map(|r| r.id.clone()).collect()
        };
        assert_eq!(ids(&once.candidates), ids(&twice.candidates));
    }

    #[test]
    fn constraints_outside_the_order_are_never_dropped() {
        let records = vec![doctor("a", "Cardiology", &["English"], "Bedok")];
        let f = filter(Some("Dermatology"), &[], None);
        // Specialty is not relaxable under this policy.
        let outcome = apply(&records, &f, &[RelaxedConstraint::Area]);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.relaxations.is_empty());
    }
}
