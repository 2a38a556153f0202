use crate::index::Postings;
use crate::query::{rank, SearchHit};
use crate::schema::{validate_fields, IndexSpec};
use crate::values::Fields;
use std::collections::BTreeMap;

/// A stored document: its source fields and the version that wrote them.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub version: u64,
    pub fields: Fields,
}

/// Why a write was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRejection {
    /// The write's version is not newer than the stored one.
    VersionConflict { current: u64 },
    /// A field does not fit its mapping.
    Mapping(String),
}

/// One index inside the in-memory engine.
///
/// Documents live in a BTreeMap keyed by id, so iteration and scoring visit
/// them in id order. Postings are kept in step with every write and delete.
#[derive(Debug)]
pub struct Table {
    spec: IndexSpec,
    docs: BTreeMap<String, StoredDocument>,
    postings: Postings,
}

impl Table {
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            docs: BTreeMap::new(),
            postings: Postings::new(),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Write a document with an externally assigned version.
    ///
    /// The version must be greater than the stored one. Returns `true` when
    /// the id was not present before.
    pub fn put(&mut self, id: &str, version: u64, fields: Fields) -> Result<bool, WriteRejection> {
        if let Some(existing) = self.docs.get(id) {
            if version <= existing.version {
                return Err(WriteRejection::VersionConflict {
                    current: existing.version,
                });
            }
        }
        validate_fields(&fields, &self.spec.schema).map_err(WriteRejection::Mapping)?;

        let created = match self.docs.get(id) {
            Some(existing) => {
                self.postings
                    .update(id, &existing.fields, &fields, &self.spec.schema);
                false
            }
            None => {
                self.postings.insert(id, &fields, &self.spec.schema);
                true
            }
        };
        self.docs
            .insert(id.to_owned(), StoredDocument { version, fields });
        Ok(created)
    }

    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.docs.get(id)
    }

    /// Delete a document by id. Returns the removed document, if any.
    pub fn delete(&mut self, id: &str) -> Option<StoredDocument> {
        let removed = self.docs.remove(id)?;
        self.postings.remove(id, &removed.fields, &self.spec.schema);
        Some(removed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// Ranked matches for `text`, best first, at most `size` of them.
    /// Also returns the total number of matches before truncation.
    pub fn search(&self, text: &str, targets: &[(String, f64)], size: usize) -> (usize, Vec<SearchHit>) {
        let mut hits: Vec<SearchHit> = self
            .postings
            .score(text, targets, &self.spec.schema)
            .into_iter()
            .map(|(id, score)| SearchHit::new(id, score))
            .collect();
        let total = hits.len();
        hits.sort_by(rank);
        hits.truncate(size);
        (total, hits)
    }
}
