use crate::error::{IndexError, IndexResult};
use crate::values::{FieldValue, Fields};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-document write counter.
///
/// Starts at zero for an id that was never written and increases by exactly
/// one for every successful write to that id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A document stored in an index.
///
/// The version is assigned by the synchronizer on each successful write;
/// whatever version a caller passes in is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    #[serde(default)]
    fields: Fields,
    #[serde(default)]
    version: Version,
}

impl Document {
    /// Create an unwritten document (version 0).
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            version: Version::ZERO,
        }
    }

    /// Create a document with an explicit version, as read back from an index.
    pub fn with_version(id: impl Into<String>, fields: Fields, version: Version) -> Self {
        Self {
            id: id.into(),
            fields,
            version,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Get a field value by name.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Set a field value. Rejects reserved names (leading underscore).
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> IndexResult<()> {
        let field = field.into();
        if field.starts_with('_') {
            return Err(IndexError::InvalidDocument(format!(
                "cannot set reserved field: {field}"
            )));
        }
        self.fields.insert(field, value.into());
        Ok(())
    }

    /// Remove a field, returning its previous value if it existed.
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// Checks applied before a write is sent anywhere.
    pub(crate) fn validate(&self) -> IndexResult<()> {
        if self.id.is_empty() {
            return Err(IndexError::InvalidDocument("document id cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn create_document() {
        let doc = Document::new("1", fields! { "title" => "Moneyball", "year" => 2011i64 });

        assert_eq!(doc.id(), "1");
        assert_eq!(doc.version(), Version::ZERO);
        assert_eq!(doc.get("title"), Some(&FieldValue::from("Moneyball")));
        assert_eq!(doc.get("year"), Some(&FieldValue::from(2011i64)));
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn set_and_remove_fields() {
        let mut doc = Document::new("1", Fields::new());

        doc.set("title", "Moneyball").unwrap();
        assert_eq!(doc.get("title"), Some(&FieldValue::from("Moneyball")));

        let old = doc.remove("title");
        assert_eq!(old, Some(FieldValue::from("Moneyball")));
        assert_eq!(doc.get("title"), None);
    }

    #[test]
    fn reject_reserved_field_names() {
        let mut doc = Document::new("1", Fields::new());
        assert!(doc.set("_id", "hacked").is_err());
        assert!(doc.set("_version", 9i64).is_err());
    }

    #[test]
    fn empty_id_is_invalid() {
        assert!(Document::new("", Fields::new()).validate().is_err());
        assert!(Document::new("1", Fields::new()).validate().is_ok());
    }

    #[test]
    fn version_sequence() {
        assert_eq!(Version::ZERO.next(), Version(1));
        assert_eq!(Version(41).next().get(), 42);
        assert!(Version(1) < Version(2));
        assert_eq!(Version(3).to_string(), "v3");
    }

    #[test]
    fn deserialize_without_version() {
        let doc: Document =
            serde_json::from_str(r#"{"id":"7","fields":{"title":"Heat"}}"#).unwrap();
        assert_eq!(doc.version(), Version::ZERO);
        assert_eq!(doc.get("title"), Some(&FieldValue::from("Heat")));
    }
}
