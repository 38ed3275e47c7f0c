use std::fmt;

use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::store::{EntityRepository, StoreError};

/// Why a delete was refused. Carries the number of blocking dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "count", rename_all = "camelCase")]
pub enum BlockReason {
    BedHasReservations(usize),
    ServiceHasBeds(usize),
    ServiceHasStaff(usize),
    ServiceHasEquipment(usize),
    EstablishmentHasServices(usize),
}

impl BlockReason {
    /// Short machine-readable name of the blocking dependent.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::BedHasReservations(_) => "reservations",
            BlockReason::ServiceHasBeds(_) => "beds",
            BlockReason::ServiceHasStaff(_) => "staff",
            BlockReason::ServiceHasEquipment(_) => "equipment",
            BlockReason::EstablishmentHasServices(_) => "services",
        }
    }

    pub fn count(&self) -> usize {
        match self {
            BlockReason::BedHasReservations(n)
            | BlockReason::ServiceHasBeds(n)
            | BlockReason::ServiceHasStaff(n)
            | BlockReason::ServiceHasEquipment(n)
            | BlockReason::EstablishmentHasServices(n) => *n,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockReason::BedHasReservations(_) => "bed has associated reservations",
            BlockReason::ServiceHasBeds(_) => "service has beds",
            BlockReason::ServiceHasStaff(_) => "service has staff",
            BlockReason::ServiceHasEquipment(_) => "service has equipment",
            BlockReason::EstablishmentHasServices(_) => "establishment has services",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteCheck {
    Allowed,
    Blocked(BlockReason),
}

impl DeleteCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DeleteCheck::Allowed)
    }
}

/// (dependent kind, its field referencing the deleted record, reason when non-zero).
type Dependent = (EntityKind, &'static str, fn(usize) -> BlockReason);

// Checked in order; the first non-zero count is reported.
const BED_DEPENDENTS: &[Dependent] = &[(
    EntityKind::Reservation,
    "bedId",
    BlockReason::BedHasReservations,
)];

const SERVICE_DEPENDENTS: &[Dependent] = &[
    (EntityKind::Bed, "serviceId", BlockReason::ServiceHasBeds),
    (EntityKind::Staff, "serviceId", BlockReason::ServiceHasStaff),
    (EntityKind::Equipment, "serviceId", BlockReason::ServiceHasEquipment),
];

const ESTABLISHMENT_DEPENDENTS: &[Dependent] = &[(
    EntityKind::Service,
    "establishmentId",
    BlockReason::EstablishmentHasServices,
)];

/// Pre-delete dependent checks. Holds no lock and deletes nothing; the caller keeps
/// the record's keyed lock across the check and the delete.
pub struct ReferentialGuard<'a> {
    repo: &'a dyn EntityRepository,
}

impl<'a> ReferentialGuard<'a> {
    pub fn new(repo: &'a dyn EntityRepository) -> Self {
        Self { repo }
    }

    pub async fn can_delete(&self, kind: EntityKind, id: Ulid) -> Result<DeleteCheck, StoreError> {
        let dependents = match kind {
            EntityKind::Bed => BED_DEPENDENTS,
            EntityKind::Service => SERVICE_DEPENDENTS,
            EntityKind::Establishment => ESTABLISHMENT_DEPENDENTS,
            _ => &[],
        };

        for (dependent, field, reason) in dependents {
            let n = self
                .repo
                .count(*dependent, &Filter::new().eq(*field, id))
                .await?;
            if n > 0 {
                tracing::debug!(%kind, %id, dependent = %dependent, n, "delete blocked");
                return Ok(DeleteCheck::Blocked(reason(n)));
            }
        }
        Ok(DeleteCheck::Allowed)
    }
}
