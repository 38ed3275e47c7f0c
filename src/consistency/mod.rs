mod conflict;
mod error;
mod guard;
mod locks;


pub use conflict::{ConflictChecker, first_conflict};
pub use error::ConsistencyError;
pub use guard::{BlockReason, DeleteCheck, ReferentialGuard};
pub use locks::{KeyGuard, KeyedLocks};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;
use crate::observability::{DELETES_BLOCKED_TOTAL, RESERVATION_CONFLICTS_TOTAL};
use crate::store::{self, EntityRepository, StoreError};

/// Entry point for every write that has to stay consistent with other records.
///
/// A write runs in two phases. The check phase takes the keyed locks of the
/// record and of the parent it counts against, then validates references,
/// uniqueness and reservation overlap. It is bounded by `deadline`. The commit
/// phase runs on its own task and owns the guards, so it finishes even if the
/// caller goes away.
pub struct ConsistencyService {
    repo: Arc<dyn EntityRepository>,
    locks: KeyedLocks,
    deadline: Duration,
}

fn reject(errors: Vec<FieldError>) -> Result<(), ConsistencyError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConsistencyError::Validation(errors))
    }
}

impl ConsistencyService {
    pub fn new(repo: Arc<dyn EntityRepository>, deadline: Duration) -> Self {
        Self {
            repo,
            locks: KeyedLocks::new(),
            deadline,
        }
    }

    pub fn repository(&self) -> &dyn EntityRepository {
        self.repo.as_ref()
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    fn checker(&self) -> ConflictChecker<'_> {
        ConflictChecker::new(self.repo.as_ref())
    }

    fn guard(&self) -> ReferentialGuard<'_> {
        ReferentialGuard::new(self.repo.as_ref())
    }

    async fn within_deadline<T, F>(&self, check: F) -> Result<T, ConsistencyError>
    where
        F: Future<Output = Result<T, ConsistencyError>>,
    {
        match tokio::time::timeout(self.deadline, check).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(deadline = ?self.deadline, "check phase timed out");
                Err(ConsistencyError::Store(StoreError::Timeout))
            }
        }
    }

    async fn commit<T, F>(&self, guards: Vec<KeyGuard>, write: F) -> Result<T, ConsistencyError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let result = write.await;
            drop(guards);
            result
        });
        match task.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let err = ConsistencyError::from(err);
                match &err {
                    ConsistencyError::Conflict { bed_id, conflicting } => {
                        metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
                        tracing::warn!(%bed_id, %conflicting, "store rejected overlapping reservation");
                    }
                    ConsistencyError::Store(e) => tracing::error!(error = %e, "commit failed"),
                    _ => {}
                }
                Err(err)
            }
            Err(join) => {
                tracing::error!(error = %join, "commit task failed");
                Err(ConsistencyError::Store(StoreError::Interrupted(join.to_string())))
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn get<E: Entity>(&self, id: Ulid) -> Result<E, ConsistencyError> {
        store::get::<E>(self.repository(), id)
            .await?
            .ok_or(ConsistencyError::NotFound { kind: E::KIND, id })
    }

    /// At most `MAX_PAGE_SIZE` records, ordered by id.
    pub async fn list<E: Entity>(&self, filter: &Filter) -> Result<Vec<E>, ConsistencyError> {
        let mut rows = store::list::<E>(self.repository(), filter).await?;
        rows.truncate(MAX_PAGE_SIZE);
        Ok(rows)
    }

    /// Whether `bed_id` is free over `window`, ignoring `exclude`. Unknown beds are `NotFound`.
    pub async fn check_availability(
        &self,
        bed_id: Ulid,
        window: Window,
        exclude: Option<Ulid>,
    ) -> Result<bool, ConsistencyError> {
        self.within_deadline(async {
            if !store::exists(self.repository(), EntityKind::Bed, bed_id).await? {
                return Err(ConsistencyError::NotFound {
                    kind: EntityKind::Bed,
                    id: bed_id,
                });
            }
            Ok(self.checker().check_availability(bed_id, &window, exclude).await?)
        })
        .await
    }

    pub async fn can_delete(&self, kind: EntityKind, id: Ulid) -> Result<DeleteCheck, ConsistencyError> {
        self.within_deadline(async { Ok(self.guard().can_delete(kind, id).await?) })
            .await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Checks every reference of `record` and the per-kind rules. Caller holds the locks.
    async fn check_write(&self, record: &Record) -> Result<(), ConsistencyError> {
        let mut errors = Vec::new();
        for reference in record.references() {
            if let Some(id) = reference.id
                && !store::exists(self.repository(), reference.kind, id).await?
            {
                errors.push(FieldError::new(
                    reference.field,
                    format!("{} {id} does not exist", reference.kind),
                ));
            }
        }

        if let Record::Bed(bed) = record {
            let siblings: Vec<Bed> =
                store::list(self.repository(), &Filter::new().eq("serviceId", bed.service_id)).await?;
            if siblings
                .iter()
                .any(|b| b.id != bed.id && b.number == bed.number)
            {
                errors.push(FieldError::new(
                    "number",
                    format!("bed {} already exists in this service", bed.number),
                ));
            }
        }
        reject(errors)?;

        if let Record::Reservation(reservation) = record
            && let Some(conflicting) = self
                .checker()
                .find_conflict(reservation.bed_id, &reservation.window(), Some(reservation.id))
                .await?
        {
            metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
            tracing::warn!(
                bed_id = %reservation.bed_id,
                reservation = %reservation.id,
                %conflicting,
                "reservation overlaps an existing one"
            );
            return Err(ConsistencyError::Conflict {
                bed_id: reservation.bed_id,
                conflicting,
            });
        }
        Ok(())
    }

    pub async fn create<E: Entity>(&self, entity: E) -> Result<E, ConsistencyError> {
        reject(entity.validate())?;
        let record = entity.clone().into_record();

        let guards = self
            .within_deadline(async {
                let keys = [Some(record.id()), record.guarded_parent()];
                let guards = self.locks.lock_all(keys.into_iter().flatten()).await;
                self.check_write(&record).await?;
                Ok(guards)
            })
            .await?;

        let repo = self.repo.clone();
        self.commit(guards, async move { repo.create(record).await })
            .await?;
        tracing::info!(kind = %E::KIND, id = %entity.id(), "created");
        Ok(entity)
    }

    /// Applies `patch` to the stored record. Locks the record, its current parent and
    /// the parent the patch moves it to, then re-reads; a concurrent re-parenting
    /// between the first read and the lock restarts the sequence.
    pub async fn update<E: Entity>(&self, id: Ulid, patch: E::Patch) -> Result<E, ConsistencyError> {
        let (guards, updated) = self
            .within_deadline(async {
                loop {
                    let seen: E = self.get(id).await?;
                    let mut moved = seen.clone();
                    moved.apply_patch(patch.clone());
                    let keys = [Some(id), seen.guarded_parent(), moved.guarded_parent()];
                    let guards = self.locks.lock_all(keys.into_iter().flatten()).await;

                    let latest: E = self.get(id).await?;
                    if latest.guarded_parent() != seen.guarded_parent() {
                        tracing::debug!(kind = %E::KIND, %id, "parent changed while locking, retrying");
                        continue;
                    }

                    let mut updated = latest;
                    updated.apply_patch(patch.clone());
                    reject(updated.validate())?;
                    self.check_write(&updated.clone().into_record()).await?;
                    return Ok((guards, updated));
                }
            })
            .await?;

        let repo = self.repo.clone();
        let record = updated.clone().into_record();
        self.commit(guards, async move { repo.update(record).await })
            .await?;
        tracing::info!(kind = %E::KIND, %id, "updated");
        Ok(updated)
    }

    /// Deletes the record once no dependent blocks it. Beds, services and
    /// establishments are checked under their own lock; children lock their parent.
    pub async fn delete(&self, kind: EntityKind, id: Ulid) -> Result<Record, ConsistencyError> {
        let guards = self
            .within_deadline(async {
                loop {
                    let seen = self
                        .repo
                        .find_by_id(kind, id)
                        .await?
                        .ok_or(ConsistencyError::NotFound { kind, id })?;
                    let parent = seen.guarded_parent();
                    let guards = self
                        .locks
                        .lock_all([Some(id), parent].into_iter().flatten())
                        .await;

                    let latest = self
                        .repo
                        .find_by_id(kind, id)
                        .await?
                        .ok_or(ConsistencyError::NotFound { kind, id })?;
                    if latest.guarded_parent() != parent {
                        continue;
                    }

                    if let DeleteCheck::Blocked(reason) = self.guard().can_delete(kind, id).await? {
                        metrics::counter!(DELETES_BLOCKED_TOTAL, "reason" => reason.code()).increment(1);
                        tracing::warn!(%kind, %id, %reason, count = reason.count(), "delete blocked");
                        return Err(ConsistencyError::Blocked(reason));
                    }
                    return Ok(guards);
                }
            })
            .await?;

        let repo = self.repo.clone();
        let removed = self
            .commit(guards, async move { repo.delete(kind, id).await })
            .await?;
        tracing::info!(%kind, %id, "deleted");
        Ok(removed)
    }

    // ── Named flows ──────────────────────────────────────────────────

    pub async fn create_reservation(&self, reservation: Reservation) -> Result<Reservation, ConsistencyError> {
        self.create(reservation).await
    }

    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, ConsistencyError> {
        self.update::<Reservation>(id, patch).await
    }

    pub async fn delete_bed(&self, id: Ulid) -> Result<(), ConsistencyError> {
        self.delete(EntityKind::Bed, id).await.map(drop)
    }

    pub async fn delete_service(&self, id: Ulid) -> Result<(), ConsistencyError> {
        self.delete(EntityKind::Service, id).await.map(drop)
    }

    pub async fn delete_establishment(&self, id: Ulid) -> Result<(), ConsistencyError> {
        self.delete(EntityKind::Establishment, id).await.map(drop)
    }

    pub async fn health(&self) -> Result<(), ConsistencyError> {
        self.within_deadline(async { Ok(self.repo.ping().await?) })
            .await
    }
}
