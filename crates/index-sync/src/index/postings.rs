use crate::schema::{tokenize, FieldType};
use crate::values::{FieldValue, Fields};
use std::collections::BTreeMap;

type Mapping = BTreeMap<String, FieldType>;

/// Term postings for one index, per field.
///
/// Maps field → term → document id → term frequency. Mapped fields are
/// analyzed by their [`FieldType`]; unmapped fields are tokenized as text.
/// Backed by BTreeMaps so scoring visits documents in a fixed order.
#[derive(Debug, Default, Clone)]
pub struct Postings {
    entries: BTreeMap<String, BTreeMap<String, BTreeMap<String, u32>>>,
}

impl Postings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document's terms.
    pub fn insert(&mut self, doc_id: &str, fields: &Fields, mapping: &Mapping) {
        for (field, value) in fields {
            let terms = self.entries.entry(field.clone()).or_default();
            for term in analyze_value(field, value, mapping) {
                *terms
                    .entry(term)
                    .or_default()
                    .entry(doc_id.to_owned())
                    .or_default() += 1;
            }
        }
    }

    /// Remove a document's terms. `fields` must be what was inserted.
    pub fn remove(&mut self, doc_id: &str, fields: &Fields, mapping: &Mapping) {
        for (field, value) in fields {
            let Some(terms) = self.entries.get_mut(field) else {
                continue;
            };
            for term in analyze_value(field, value, mapping) {
                if let Some(docs) = terms.get_mut(&term) {
                    docs.remove(doc_id);
                    if docs.is_empty() {
                        terms.remove(&term);
                    }
                }
            }
            if terms.is_empty() {
                self.entries.remove(field);
            }
        }
    }

    /// Replace a document's terms (remove old, insert new).
    pub fn update(&mut self, doc_id: &str, old_fields: &Fields, new_fields: &Fields, mapping: &Mapping) {
        self.remove(doc_id, old_fields, mapping);
        self.insert(doc_id, new_fields, mapping);
    }

    /// Documents containing `term` in `field`, with their term frequency.
    pub fn lookup(&self, field: &str, term: &str) -> Vec<(&str, u32)> {
        self.entries
            .get(field)
            .and_then(|terms| terms.get(term))
            .map(|docs| docs.iter().map(|(id, tf)| (id.as_str(), *tf)).collect())
            .unwrap_or_default()
    }

    /// Score documents against `text`.
    ///
    /// A document's score is the sum, over target fields and query terms, of
    /// term frequency times the field's boost. With no targets every indexed
    /// field is searched with boost 1. Documents scoring zero are omitted.
    pub fn score(&self, text: &str, targets: &[(String, f64)], mapping: &Mapping) -> BTreeMap<String, f64> {
        let all_fields: Vec<(String, f64)>;
        let targets = if targets.is_empty() {
            all_fields = self.entries.keys().map(|f| (f.clone(), 1.0)).collect();
            &all_fields
        } else {
            targets
        };

        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for (field, boost) in targets {
            for term in analyze_text(field, text, mapping) {
                for (doc_id, tf) in self.lookup(field, &term) {
                    *scores.entry(doc_id.to_owned()).or_default() += f64::from(tf) * boost;
                }
            }
        }
        scores.retain(|_, score| *score > 0.0);
        scores
    }

    /// Number of distinct (field, term) pairs.
    pub fn term_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn analyze_text(field: &str, text: &str, mapping: &Mapping) -> Vec<String> {
    match mapping.get(field) {
        Some(field_type) => field_type.analyze(text),
        None => tokenize(text),
    }
}

fn analyze_value(field: &str, value: &FieldValue, mapping: &Mapping) -> Vec<String> {
    value
        .texts()
        .iter()
        .flat_map(|text| analyze_text(field, text, mapping))
        .collect()
}
