//! Field-by-field majority voting over extraction attempts.

use crate::models::record::{Agreement, ExtractionAttempt, FieldValue, ListItem, ReconciledRecord};
use crate::schema::{ExtractionSchema, FieldSpec};

struct Candidate<'a> {
    key: String,
    /// Proposals in this group, in attempt order.
    members: Vec<&'a FieldValue>,
    confidences: Vec<f64>,
}

#[derive(Default)]
struct Tally<'a> {
    candidates: Vec<Candidate<'a>>,
    proposals: usize,
}

impl<'a> Tally<'a> {
    fn add(&mut self, key: String, value: &'a FieldValue, confidence: Option<f64>) {
        self.proposals += 1;
        let idx = match self.candidates.iter().position(|c| c.key == key) {
            Some(idx) => idx,
            None => {
                self.candidates.push(Candidate {
                    key,
                    members: Vec::new(),
                    confidences: Vec::new(),
                });
                self.candidates.len() - 1
            }
        };
        let candidate = &mut self.candidates[idx];
        candidate.members.push(value);
        candidate.confidences.extend(confidence);
    }

    /// Largest group; strict comparison keeps the earliest group on ties.
    fn winner(&self) -> Option<&Candidate<'a>> {
        let mut winner: Option<&Candidate<'a>> = None;
        for candidate in &self.candidates {
            if winner.is_none_or(|w| candidate.members.len() > w.members.len()) {
                winner = Some(candidate);
            }
        }
        winner
    }
}

/// Reconcile attempts into one record.
///
/// For each schema field the proposals are grouped by the field type's vote
/// key. The largest group wins; on a tie the group whose first proposal came
/// from the earliest attempt wins. The winning value is that first proposal.
///
/// List fields vote on the number of entries first. The attempts that agree
/// on the winning length then vote cell by cell at each entry index, and the
/// field's agreement is the weakest of those votes.
/// `attempts` must be ordered by attempt index.
pub fn reconcile(attempts: &[ExtractionAttempt], schema: &ExtractionSchema) -> ReconciledRecord {
    let mut record = ReconciledRecord::default();

    for spec in &schema.fields {
        let kind = spec.kind();
        let item_specs = spec.field_type.as_list().map(|(items, _)| items);
        let mut tally = Tally::default();

        for attempt in attempts {
            let Some(value) = attempt.fields.get(&spec.name) else {
                continue;
            };
            let key = match (item_specs, value) {
                (Some(_), FieldValue::List(items)) => items.len().to_string(),
                _ => kind.vote_key(value),
            };
            let confidence = attempt
                .model_confidence
                .as_ref()
                .and_then(|c| c.get(&spec.name))
                .copied();
            tally.add(key, value, confidence);
        }

        let Some(winner) = tally.winner() else {
            continue;
        };
        let (value, votes) = match item_specs {
            Some(items) => reconcile_entries(items, winner),
            None => (winner.members[0].clone(), winner.members.len()),
        };

        record.fields.insert(spec.name.clone(), value);
        record.agreement.insert(
            spec.name.clone(),
            Agreement {
                votes,
                total: tally.proposals,
            },
        );
        if !winner.confidences.is_empty() {
            let mean = winner.confidences.iter().sum::<f64>() / winner.confidences.len() as f64;
            record.model_confidence.insert(spec.name.clone(), mean);
        }
    }

    record
}

/// Cell-by-cell vote among lists of the same length.
fn reconcile_entries(specs: &[FieldSpec], winner: &Candidate<'_>) -> (FieldValue, usize) {
    let lists: Vec<&[ListItem]> = winner.members.iter().filter_map(|v| v.as_list()).collect();
    let len = lists.first().map_or(0, |l| l.len());
    let mut votes = winner.members.len();
    let mut entries = Vec::with_capacity(len);

    for index in 0..len {
        let mut entry = ListItem::new();
        for spec in specs {
            let kind = spec.kind();
            let mut tally = Tally::default();
            for list in &lists {
                if let Some(cell) = list.get(index).and_then(|item| item.get(&spec.name)) {
                    tally.add(kind.vote_key(cell), cell, None);
                }
            }
            if let Some(cell) = tally.winner() {
                votes = votes.min(cell.members.len());
                entry.insert(spec.name.clone(), cell.members[0].clone());
            }
        }
        entries.push(entry);
    }

    (FieldValue::List(entries), votes)
}
