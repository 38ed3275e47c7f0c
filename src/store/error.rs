use ulid::Ulid;

use crate::model::EntityKind;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Ulid },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: Ulid },
    #[error("reservation window on bed {bed_id} overlaps reservation {conflicting}")]
    ExclusionViolation { bed_id: Ulid, conflicting: Ulid },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("operation timed out")]
    Timeout,
    #[error("write interrupted: {0}")]
    Interrupted(String),
}
