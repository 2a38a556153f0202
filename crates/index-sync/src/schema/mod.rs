use crate::error::{IndexError, IndexResult};
use crate::values::{FieldValue, Fields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping type of an indexed field.
///
/// `Text` is tokenized for full-text matching, `Keyword` matches the whole
/// value exactly. Numeric and boolean fields match their literal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Keyword,
    #[serde(alias = "int", alias = "long")]
    Integer,
    #[serde(alias = "double")]
    Float,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
        }
    }

    /// Split a value's text into the terms stored for this field type.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        match self {
            FieldType::Text => tokenize(text),
            FieldType::Keyword | FieldType::Integer | FieldType::Float | FieldType::Boolean => {
                vec![text.to_owned()]
            }
        }
    }
}

/// Lowercased alphanumeric runs. Used for text fields and unmapped strings.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Declarative settings of a named index.
///
/// The name is the index's only identity. Two specs are compatible only if
/// every setting is equal; changing any of them requires delete-and-recreate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub shard_count: u32,
    pub replica_count: u32,
    #[serde(default)]
    pub schema: BTreeMap<String, FieldType>,
}

impl IndexSpec {
    /// A spec with one shard, one replica and no mapped fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shard_count: 1,
            replica_count: 1,
            schema: BTreeMap::new(),
        }
    }

    pub fn shards(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn replicas(mut self, replica_count: u32) -> Self {
        self.replica_count = replica_count;
        self
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.schema.insert(name.into(), field_type);
        self
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.schema.get(field).copied()
    }

    /// Check the settings before any request is built from them.
    pub fn validate(&self) -> IndexResult<()> {
        validate_index_name(&self.name)?;
        if self.shard_count == 0 {
            return Err(IndexError::InvalidSpec(format!(
                "index `{}`: shard_count must be at least 1",
                self.name
            )));
        }
        for field in self.schema.keys() {
            if field.is_empty() {
                return Err(IndexError::InvalidSpec(format!(
                    "index `{}`: field names cannot be empty",
                    self.name
                )));
            }
            if field.starts_with('_') {
                return Err(IndexError::InvalidSpec(format!(
                    "index `{}`: field names cannot start with underscore: `{field}`",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_index_name(name: &str) -> IndexResult<()> {
    if name.is_empty() {
        return Err(IndexError::InvalidSpec("index name cannot be empty".into()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(IndexError::InvalidSpec(format!(
            "index name cannot contain whitespace: `{name}`"
        )));
    }
    Ok(())
}

/// Validate a document's fields against an index schema.
///
/// Unmapped fields are accepted as-is. Returns a descriptive message for the
/// first field that does not fit its mapping.
pub fn validate_fields(fields: &Fields, schema: &BTreeMap<String, FieldType>) -> Result<(), String> {
    for (field_name, value) in fields {
        if field_name.starts_with('_') {
            return Err(format!(
                "field names cannot start with underscore: `{field_name}`"
            ));
        }
        if let Some(field_type) = schema.get(field_name) {
            validate_value(value, *field_type, field_name)?;
        }
    }
    Ok(())
}

/// Validate a single value against a field type. Arrays validate per element.
fn validate_value(value: &FieldValue, expected: FieldType, path: &str) -> Result<(), String> {
    match (expected, value) {
        (_, FieldValue::Null) => Ok(()),
        (_, FieldValue::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if matches!(item, FieldValue::Array(_)) {
                    return Err(format!("field `{path}[{i}]`: nested arrays are not supported"));
                }
                validate_value(item, expected, &format!("{path}[{i}]"))?;
            }
            Ok(())
        }
        (FieldType::Text | FieldType::Keyword, FieldValue::String(_)) => Ok(()),
        (FieldType::Integer, FieldValue::Int64(_)) => Ok(()),
        // Numeric strings are coerced the way the cluster does for integer mappings.
        (FieldType::Integer, FieldValue::String(s)) if s.trim().parse::<i64>().is_ok() => Ok(()),
        (FieldType::Float, FieldValue::Int64(_) | FieldValue::Float64(_)) => Ok(()),
        (FieldType::Float, FieldValue::String(s)) if s.trim().parse::<f64>().is_ok() => Ok(()),
        (FieldType::Boolean, FieldValue::Boolean(_)) => Ok(()),
        _ => Err(format!(
            "field `{path}`: expected {}, got {}",
            expected.as_str(),
            value.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    fn movie_schema() -> BTreeMap<String, FieldType> {
        BTreeMap::from([
            ("title".to_string(), FieldType::Text),
            ("year".to_string(), FieldType::Integer),
            ("rating".to_string(), FieldType::Float),
        ])
    }

    #[test]
    fn valid_document_passes() {
        let fields = fields! { "title" => "Moneyball", "year" => 2011i64 };
        assert!(validate_fields(&fields, &movie_schema()).is_ok());
    }

    #[test]
    fn unmapped_fields_are_accepted() {
        let fields = fields! { "director" => "Bennett Miller" };
        assert!(validate_fields(&fields, &movie_schema()).is_ok());
    }

    #[test]
    fn wrong_type_fails() {
        let fields = fields! { "year" => "not a year" };
        let err = validate_fields(&fields, &movie_schema()).unwrap_err();
        assert!(err.contains("expected integer"));
        assert!(err.contains("year"));
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let fields = fields! { "year" => "2011", "rating" => "7.5" };
        assert!(validate_fields(&fields, &movie_schema()).is_ok());
    }

    #[test]
    fn float_accepts_integers() {
        let fields = fields! { "rating" => 8i64 };
        assert!(validate_fields(&fields, &movie_schema()).is_ok());
    }

    #[test]
    fn array_elements_are_validated() {
        let fields = fields! { "title" => vec![FieldValue::from("a"), FieldValue::from(1i64)] };
        let err = validate_fields(&fields, &movie_schema()).unwrap_err();
        assert!(err.contains("title[1]"));
    }

    #[test]
    fn rejects_underscore_prefixed_fields() {
        let fields = fields! { "_id" => "1" };
        let err = validate_fields(&fields, &movie_schema()).unwrap_err();
        assert!(err.contains("underscore"));
    }

    #[test]
    fn spec_validation() {
        assert!(IndexSpec::new("movies").validate().is_ok());
        assert!(IndexSpec::new("").validate().is_err());
        assert!(IndexSpec::new("my movies").validate().is_err());
        assert!(IndexSpec::new("movies").shards(0).validate().is_err());
        assert!(IndexSpec::new("movies")
            .field("_secret", FieldType::Keyword)
            .validate()
            .is_err());
        assert!(IndexSpec::new("movies").replicas(0).validate().is_ok());
    }

    #[test]
    fn spec_equality_is_structural() {
        let a = IndexSpec::new("movies").field("title", FieldType::Text);
        let b = IndexSpec::new("movies").field("title", FieldType::Text);
        let c = IndexSpec::new("movies").field("title", FieldType::Keyword);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, b.clone().shards(2));
    }

    #[test]
    fn field_type_aliases() {
        let parsed: FieldType = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(parsed, FieldType::Integer);
        let parsed: FieldType = serde_json::from_str("\"double\"").unwrap();
        assert_eq!(parsed, FieldType::Float);
        assert_eq!(serde_json::to_string(&FieldType::Text).unwrap(), "\"text\"");
    }

    #[test]
    fn analyze_by_type() {
        assert_eq!(
            FieldType::Text.analyze("Tim Robbins, Jr."),
            vec!["tim", "robbins", "jr"]
        );
        assert_eq!(FieldType::Keyword.analyze("Tim Robbins"), vec!["Tim Robbins"]);
        assert!(tokenize("  ,, ").is_empty());
    }
}
