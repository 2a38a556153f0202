use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Default number of hits returned by a search.
pub const DEFAULT_SIZE: usize = 10;

/// A field to match against, with an optional score multiplier.
///
/// Parsed from and printed as `field` or `field^boost` (e.g. `title^2`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBoost {
    pub field: String,
    pub boost: f64,
}

impl FieldBoost {
    pub fn new(field: impl Into<String>, boost: f64) -> Self {
        Self {
            field: field.into(),
            boost,
        }
    }
}

impl FromStr for FieldBoost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, boost) = match s.split_once('^') {
            Some((field, boost)) => {
                let boost: f64 = boost
                    .parse()
                    .map_err(|_| format!("invalid boost in `{s}`"))?;
                if !boost.is_finite() || boost <= 0.0 {
                    return Err(format!("boost must be positive in `{s}`"));
                }
                (field, boost)
            }
            None => (s, 1.0),
        };
        if field.is_empty() {
            return Err(format!("missing field name in `{s}`"));
        }
        Ok(Self::new(field, boost))
    }
}

impl fmt::Display for FieldBoost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if (self.boost - 1.0).abs() < f64::EPSILON {
            f.write_str(&self.field)
        } else {
            write!(f, "{}^{}", self.field, self.boost)
        }
    }
}

/// A full-text query over one or more fields.
///
/// With no fields listed, every field is searched.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    fields: Vec<FieldBoost>,
    size: usize,
    malformed: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: Vec::new(),
            size: DEFAULT_SIZE,
            malformed: Vec::new(),
        }
    }

    /// Restrict matching to these `field` or `field^boost` entries.
    ///
    /// Entries that fail to parse are remembered and reported by
    /// [`validate`](Self::validate).
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fields.clear();
        self.malformed.clear();
        for entry in fields {
            match entry.as_ref().parse() {
                Ok(boost) => self.fields.push(boost),
                Err(reason) => self.malformed.push(reason),
            }
        }
        self
    }

    pub fn field(mut self, field: FieldBoost) -> Self {
        self.fields.push(field);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn targets(&self) -> &[FieldBoost] {
        &self.fields
    }

    pub fn limit(&self) -> usize {
        self.size
    }

    pub fn validate(&self) -> IndexResult<()> {
        match self.malformed.first() {
            Some(reason) => Err(IndexError::InvalidQuery(reason.clone())),
            None => Ok(()),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

impl SearchHit {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Result order: descending score, then ascending id.
pub fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_boosts() {
        let boost: FieldBoost = "title^2".parse().unwrap();
        assert_eq!(boost, FieldBoost::new("title", 2.0));

        let plain: FieldBoost = "director".parse().unwrap();
        assert_eq!(plain, FieldBoost::new("director", 1.0));

        assert!("title^x".parse::<FieldBoost>().is_err());
        assert!("title^0".parse::<FieldBoost>().is_err());
        assert!("^2".parse::<FieldBoost>().is_err());
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(FieldBoost::new("title", 2.0).to_string(), "title^2");
        assert_eq!(FieldBoost::new("title", 1.5).to_string(), "title^1.5");
        assert_eq!(FieldBoost::new("director", 1.0).to_string(), "director");
    }

    #[test]
    fn query_builder() {
        let query = Query::new("tim").fields(["title^2", "director"]).size(5);
        assert_eq!(query.text(), "tim");
        assert_eq!(query.limit(), 5);
        assert_eq!(query.targets().len(), 2);
        assert_eq!(query.targets()[0].boost, 2.0);
        assert_eq!(Query::new("x").limit(), DEFAULT_SIZE);
        assert!(query.validate().is_ok());
    }

    #[test]
    fn malformed_fields_fail_validation() {
        let query = Query::new("tim").fields(["title^x", "director"]);
        assert_eq!(query.targets(), [FieldBoost::new("director", 1.0)]);
        let err = query.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_query");
        assert!(err.to_string().contains("title^x"));

        assert!(query.fields(["title"]).validate().is_ok());
    }

    #[test]
    fn ranking_breaks_ties_by_id() {
        let mut hits = vec![
            SearchHit::new("b", 1.0),
            SearchHit::new("c", 2.0),
            SearchHit::new("a", 1.0),
        ];
        hits.sort_by(rank);
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
