use ulid::Ulid;

use crate::model::{EntityKind, FieldError};
use crate::store::StoreError;

use super::BlockReason;

#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),
    #[error("bed {bed_id} is unavailable for that window (overlaps reservation {conflicting})")]
    Conflict { bed_id: Ulid, conflicting: Ulid },
    #[error("{0}")]
    Blocked(BlockReason),
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Ulid },
    #[error(transparent)]
    Store(StoreError),
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConsistencyError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConsistencyError::Validation(vec![FieldError::new(field, message)])
    }
}

/// Constraint violations raised by the store map back onto the same outcomes the
/// pre-checks produce; everything else stays a store failure.
impl From<StoreError> for ConsistencyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ExclusionViolation { bed_id, conflicting } => {
                ConsistencyError::Conflict { bed_id, conflicting }
            }
            StoreError::NotFound { kind, id } => ConsistencyError::NotFound { kind, id },
            StoreError::AlreadyExists { kind, id } => {
                ConsistencyError::field("id", format!("{kind} {id} already exists"))
            }
            other => ConsistencyError::Store(other),
        }
    }
}
