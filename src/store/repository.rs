use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Entity, EntityKind, Filter, Record};

use super::StoreError;

/// Persistence seam for every component above the store.
///
/// Each call completes before the caller makes its next decision; callers that need
/// check-then-act atomicity serialize through their own locks.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn find_by_id(&self, kind: EntityKind, id: Ulid) -> Result<Option<Record>, StoreError>;

    /// Records of `kind` matching every term of `filter`, ordered by id.
    async fn find_many(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    async fn count(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError>;

    async fn create(&self, record: Record) -> Result<Record, StoreError>;

    /// Replace the stored record with the same kind and id.
    async fn update(&self, record: Record) -> Result<Record, StoreError>;

    /// Remove and return the record.
    async fn delete(&self, kind: EntityKind, id: Ulid) -> Result<Record, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub async fn get<E: Entity>(repo: &dyn EntityRepository, id: Ulid) -> Result<Option<E>, StoreError> {
    Ok(repo.find_by_id(E::KIND, id).await?.and_then(E::from_record))
}

pub async fn list<E: Entity>(repo: &dyn EntityRepository, filter: &Filter) -> Result<Vec<E>, StoreError> {
    Ok(repo
        .find_many(E::KIND, filter)
        .await?
        .into_iter()
        .filter_map(E::from_record)
        .collect())
}

pub async fn exists(repo: &dyn EntityRepository, kind: EntityKind, id: Ulid) -> Result<bool, StoreError> {
    Ok(repo.find_by_id(kind, id).await?.is_some())
}
