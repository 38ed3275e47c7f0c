mod entities;

pub use entities::*;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// UTC instant — the only time type for occupancy windows.
pub type Timestamp = DateTime<Utc>;

/// Inclusive occupancy window `[start, end]`.
///
/// Ordering is not enforced here: a window whose `end` precedes its `start` is
/// representable and is compared literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Window {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    /// `self` is the proposed window, `stored` the window of an existing reservation.
    ///
    /// Conflicts when the proposal starts inside the stored window, ends inside it,
    /// or fully contains it. All endpoints are inclusive, so two windows sharing a
    /// single instant conflict.
    pub fn overlaps(&self, stored: &Window) -> bool {
        let starts_inside = stored.start <= self.start && self.start <= stored.end;
        let ends_inside = stored.start <= self.end && self.end <= stored.end;
        let contains = self.start <= stored.start && stored.end <= self.end;
        starts_inside || ends_inside || contains
    }
}

/// Every persisted entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Establishment,
    Service,
    Bed,
    Patient,
    Staff,
    Equipment,
    Transfer,
    Reservation,
    CareEpisode,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Establishment,
        EntityKind::Service,
        EntityKind::Bed,
        EntityKind::Patient,
        EntityKind::Staff,
        EntityKind::Equipment,
        EntityKind::Transfer,
        EntityKind::Reservation,
        EntityKind::CareEpisode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Establishment => "establishment",
            EntityKind::Service => "service",
            EntityKind::Bed => "bed",
            EntityKind::Patient => "patient",
            EntityKind::Staff => "staff",
            EntityKind::Equipment => "equipment",
            EntityKind::Transfer => "transfer",
            EntityKind::Reservation => "reservation",
            EntityKind::CareEpisode => "care_episode",
        }
    }

    /// JSON fields holding a reference to another entity. These are indexed by the store.
    pub fn reference_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Establishment | EntityKind::Patient => &[],
            EntityKind::Service => &["establishmentId", "headStaffId"],
            EntityKind::Bed => &["serviceId", "patientId"],
            EntityKind::Staff | EntityKind::Equipment => &["serviceId"],
            EntityKind::Transfer => &[
                "patientId",
                "originEstablishmentId",
                "destinationEstablishmentId",
            ],
            EntityKind::Reservation => &["patientId", "bedId", "destinationEstablishmentId"],
            EntityKind::CareEpisode => &["patientId", "staffId"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A foreign-key-shaped field on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub field: &'static str,
    pub kind: EntityKind,
    pub id: Option<Ulid>,
}

impl Reference {
    pub fn required(field: &'static str, kind: EntityKind, id: Ulid) -> Self {
        Self { field, kind, id: Some(id) }
    }

    pub fn optional(field: &'static str, kind: EntityKind, id: Option<Ulid>) -> Self {
        Self { field, kind, id }
    }
}

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Equality filter over an entity's JSON field names, e.g. `{ "bedId": "01H..." }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, String>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(field.into(), value.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let Ok(serde_json::Value::Object(fields)) = record.to_json() else {
            return false;
        };
        self.0
            .iter()
            .all(|(k, v)| fields.get(k).is_some_and(|f| value_matches(f, v)))
    }
}

fn value_matches(field: &serde_json::Value, expected: &str) -> bool {
    match field {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Null => expected == "null",
        other => other.to_string() == expected,
    }
}

/// Behavior shared by every persisted entity.
///
/// The entity struct itself is the canonical create shape; `Patch` is the
/// partial update shape applied on top of a stored value.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    type Patch: DeserializeOwned + Clone + Send + Sync + 'static;

    fn id(&self) -> Ulid;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
    fn apply_patch(&mut self, patch: Self::Patch);
    /// Required-field and length checks. Reference existence is checked by the caller.
    fn validate(&self) -> Vec<FieldError>;
    fn references(&self) -> Vec<Reference>;

    /// The record whose children this entity counts as. Writes hold that record's lock.
    fn guarded_parent(&self) -> Option<Ulid> {
        None
    }
}

/// Any stored entity. This is the unit the store persists and indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Establishment(Establishment),
    Service(Service),
    Bed(Bed),
    Patient(Patient),
    Staff(Staff),
    Equipment(Equipment),
    Transfer(Transfer),
    Reservation(Reservation),
    CareEpisode(CareEpisode),
}

macro_rules! with_entity {
    ($record:expr, $e:ident => $body:expr) => {
        match $record {
            Record::Establishment($e) => $body,
            Record::Service($e) => $body,
            Record::Bed($e) => $body,
            Record::Patient($e) => $body,
            Record::Staff($e) => $body,
            Record::Equipment($e) => $body,
            Record::Transfer($e) => $body,
            Record::Reservation($e) => $body,
            Record::CareEpisode($e) => $body,
        }
    };
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Establishment(_) => EntityKind::Establishment,
            Record::Service(_) => EntityKind::Service,
            Record::Bed(_) => EntityKind::Bed,
            Record::Patient(_) => EntityKind::Patient,
            Record::Staff(_) => EntityKind::Staff,
            Record::Equipment(_) => EntityKind::Equipment,
            Record::Transfer(_) => EntityKind::Transfer,
            Record::Reservation(_) => EntityKind::Reservation,
            Record::CareEpisode(_) => EntityKind::CareEpisode,
        }
    }

    pub fn id(&self) -> Ulid {
        with_entity!(self, e => e.id())
    }

    pub fn references(&self) -> Vec<Reference> {
        with_entity!(self, e => e.references())
    }

    pub fn validate(&self) -> Vec<FieldError> {
        with_entity!(self, e => e.validate())
    }

    pub fn guarded_parent(&self) -> Option<Ulid> {
        with_entity!(self, e => e.guarded_parent())
    }

    /// The entity's JSON object, as served over HTTP and matched by filters.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        with_entity!(self, e => serde_json::to_value(e))
    }

    pub fn as_reservation(&self) -> Option<&Reservation> {
        match self {
            Record::Reservation(r) => Some(r),
            _ => None,
        }
    }
}

/// Store mutations — the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Created(Record),
    Updated(Record),
    Deleted { kind: EntityKind, id: Ulid },
}

impl Event {
    pub fn kind(&self) -> EntityKind {
        match self {
            Event::Created(r) | Event::Updated(r) => r.kind(),
            Event::Deleted { kind, .. } => *kind,
        }
    }
}
