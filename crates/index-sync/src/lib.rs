pub mod answer;
pub mod bulk;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod locks;
pub mod query;
pub mod schema;
pub mod synchronizer;
pub mod table;
pub mod transport;
pub mod values;

pub use answer::{BackendError, GenerationBackend, QaSession};
pub use bulk::{load_bulk_file, parse_bulk_ndjson, BulkFailure, BulkOutcome, FailureReason};
pub use config::{SyncConfig, TransitionPolicy};
pub use document::{Document, Version};
pub use engine::{Fault, InMemoryEngine};
pub use error::{IndexError, IndexResult};
pub use index::IndexState;
pub use query::{FieldBoost, Query, SearchHit};
pub use schema::{FieldType, IndexSpec};
pub use synchronizer::IndexSynchronizer;
pub use transport::{Operation, Transport, TransportError, TransportRequest, TransportResponse};
pub use values::{FieldValue, Fields};
