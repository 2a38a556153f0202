mod postings;
mod registry;

pub use postings::Postings;
pub use registry::{Generation, IndexRegistry, Transition};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an index name.
///
/// `Absent -> Creating -> Ready -> Deleting -> Absent`. Creating and
/// Deleting fall back to the prior state when their request fails. Document
/// operations are admitted only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Absent,
    Creating,
    Ready,
    Deleting,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Absent => "absent",
            IndexState::Creating => "creating",
            IndexState::Ready => "ready",
            IndexState::Deleting => "deleting",
        }
    }

    /// Whether a create or delete is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, IndexState::Creating | IndexState::Deleting)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
