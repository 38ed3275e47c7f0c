use ulid::Ulid;

use crate::model::*;
use crate::store::{EntityRepository, StoreError};

/// Decides whether a bed is free over a proposed window.
///
/// Read-only. Store failures are returned unchanged; "unavailable" is a value, not an error.
pub struct ConflictChecker<'a> {
    repo: &'a dyn EntityRepository,
}

impl<'a> ConflictChecker<'a> {
    pub fn new(repo: &'a dyn EntityRepository) -> Self {
        Self { repo }
    }

    /// `true` when no reservation on `bed_id`, other than `exclude`, overlaps `window`.
    pub async fn check_availability(
        &self,
        bed_id: Ulid,
        window: &Window,
        exclude: Option<Ulid>,
    ) -> Result<bool, StoreError> {
        Ok(self.find_conflict(bed_id, window, exclude).await?.is_none())
    }

    /// Id of the earliest-starting reservation on `bed_id` that overlaps `window`.
    pub async fn find_conflict(
        &self,
        bed_id: Ulid,
        window: &Window,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, StoreError> {
        let filter = Filter::new().eq("bedId", bed_id);
        let mut existing: Vec<Reservation> = crate::store::list(self.repo, &filter).await?;
        existing.retain(|r| Some(r.id) != exclude);
        existing.sort_by_key(|r| (r.start_date, r.id));
        let conflict = first_conflict(&existing, window);
        tracing::debug!(
            %bed_id,
            candidates = existing.len(),
            conflict = ?conflict,
            "availability check"
        );
        Ok(conflict)
    }
}

/// First reservation in `existing` whose window the proposal overlaps.
pub fn first_conflict(existing: &[Reservation], window: &Window) -> Option<Ulid> {
    existing
        .iter()
        .find(|r| window.overlaps(&r.window()))
        .map(|r| r.id)
}
