use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::limits::*;

use super::{Entity, EntityKind, FieldError, Record, Reference, Timestamp, Window};

/// Distinguishes an absent patch field (`None`) from an explicit JSON `null` (`Some(None)`).
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn default_bed_status() -> String {
    "Disponible".into()
}

fn default_service_status() -> String {
    "Actif".into()
}

fn default_transfer_status() -> String {
    "Planifié".into()
}

fn default_quantity() -> u32 {
    1
}

#[derive(Default)]
struct Checks(Vec<FieldError>);

impl Checks {
    fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.0.push(FieldError::new(field, "is required"));
        } else if value.len() > MAX_NAME_LEN {
            self.0.push(FieldError::new(
                field,
                format!("must be at most {MAX_NAME_LEN} bytes"),
            ));
        }
        self
    }

    fn short(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        self.max_len(field, value, MAX_NAME_LEN)
    }

    fn long(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        self.max_len(field, value, MAX_TEXT_LEN)
    }

    fn max_len(&mut self, field: &str, value: Option<&str>, limit: usize) -> &mut Self {
        if let Some(v) = value
            && v.len() > limit
        {
            self.0
                .push(FieldError::new(field, format!("must be at most {limit} bytes")));
        }
        self
    }

    fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.0.push(FieldError::new(field, message));
        }
        self
    }

    fn finish(&mut self) -> Vec<FieldError> {
        std::mem::take(&mut self.0)
    }
}

// ── Establishment ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Establishment {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub establishment_type: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishmentPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub establishment_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
}

impl Entity for Establishment {
    const KIND: EntityKind = EntityKind::Establishment;
    type Patch = EstablishmentPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Establishment(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Establishment(e) => Some(e),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: EstablishmentPatch) {
        if let Some(v) = p.name {
            self.name = v;
        }
        if let Some(v) = p.establishment_type {
            self.establishment_type = v;
        }
        if let Some(v) = p.address {
            self.address = v;
        }
        if let Some(v) = p.city {
            self.city = v;
        }
        if let Some(v) = p.phone {
            self.phone = v;
        }
        if let Some(v) = p.email {
            self.email = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .required("name", &self.name)
            .short("establishmentType", self.establishment_type.as_deref())
            .long("address", self.address.as_deref())
            .short("city", self.city.as_deref())
            .short("phone", self.phone.as_deref())
            .short("email", self.email.as_deref())
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}

// ── Service ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub establishment_id: Ulid,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub wing: Option<String>,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default = "default_service_status")]
    pub status: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub head_staff_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub establishment_id: Option<Ulid>,
    #[serde(default, deserialize_with = "double_option")]
    pub floor: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub wing: Option<Option<String>>,
    pub capacity: Option<u32>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub specialty: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub head_staff_id: Option<Option<Ulid>>,
}

impl Entity for Service {
    const KIND: EntityKind = EntityKind::Service;
    type Patch = ServicePatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Service(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Service(s) => Some(s),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: ServicePatch) {
        if let Some(v) = p.name {
            self.name = v;
        }
        if let Some(v) = p.description {
            self.description = v;
        }
        if let Some(v) = p.establishment_id {
            self.establishment_id = v;
        }
        if let Some(v) = p.floor {
            self.floor = v;
        }
        if let Some(v) = p.wing {
            self.wing = v;
        }
        if let Some(v) = p.capacity {
            self.capacity = v;
        }
        if let Some(v) = p.status {
            self.status = v;
        }
        if let Some(v) = p.specialty {
            self.specialty = v;
        }
        if let Some(v) = p.head_staff_id {
            self.head_staff_id = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .required("name", &self.name)
            .long("description", self.description.as_deref())
            .short("floor", self.floor.as_deref())
            .short("wing", self.wing.as_deref())
            .required("status", &self.status)
            .short("specialty", self.specialty.as_deref())
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![
            Reference::required("establishmentId", EntityKind::Establishment, self.establishment_id),
            Reference::optional("headStaffId", EntityKind::Staff, self.head_staff_id),
        ]
    }

    fn guarded_parent(&self) -> Option<Ulid> {
        Some(self.establishment_id)
    }
}

// ── Bed ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bed {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    /// Unique within the owning service.
    pub number: String,
    #[serde(default)]
    pub bed_type: Option<String>,
    /// Free-form; "Disponible", "Occupé", "En maintenance" and "Réservé" are the usual values.
    #[serde(default = "default_bed_status")]
    pub status: String,
    pub service_id: Ulid,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub patient_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedPatch {
    pub number: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub bed_type: Option<Option<String>>,
    pub status: Option<String>,
    pub service_id: Option<Ulid>,
    #[serde(default, deserialize_with = "double_option")]
    pub room: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub floor: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub patient_id: Option<Option<Ulid>>,
}

impl Entity for Bed {
    const KIND: EntityKind = EntityKind::Bed;
    type Patch = BedPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Bed(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Bed(b) => Some(b),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: BedPatch) {
        if let Some(v) = p.number {
            self.number = v;
        }
        if let Some(v) = p.bed_type {
            self.bed_type = v;
        }
        if let Some(v) = p.status {
            self.status = v;
        }
        if let Some(v) = p.service_id {
            self.service_id = v;
        }
        if let Some(v) = p.room {
            self.room = v;
        }
        if let Some(v) = p.floor {
            self.floor = v;
        }
        if let Some(v) = p.patient_id {
            self.patient_id = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .required("number", &self.number)
            .short("bedType", self.bed_type.as_deref())
            .required("status", &self.status)
            .short("room", self.room.as_deref())
            .short("floor", self.floor.as_deref())
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![
            Reference::required("serviceId", EntityKind::Service, self.service_id),
            Reference::optional("patientId", EntityKind::Patient, self.patient_id),
        ]
    }

    fn guarded_parent(&self) -> Option<Ulid> {
        Some(self.service_id)
    }
}

// ── Patient ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub last_name: String,
    pub first_name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub social_security_number: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPatch {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub birth_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sex: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub social_security_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub blood_group: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub allergies: Option<Option<String>>,
}

impl Entity for Patient {
    const KIND: EntityKind = EntityKind::Patient;
    type Patch = PatientPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Patient(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Patient(p) => Some(p),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: PatientPatch) {
        if let Some(v) = p.last_name {
            self.last_name = v;
        }
        if let Some(v) = p.first_name {
            self.first_name = v;
        }
        if let Some(v) = p.birth_date {
            self.birth_date = v;
        }
        if let Some(v) = p.sex {
            self.sex = v;
        }
        if let Some(v) = p.address {
            self.address = v;
        }
        if let Some(v) = p.phone {
            self.phone = v;
        }
        if let Some(v) = p.email {
            self.email = v;
        }
        if let Some(v) = p.social_security_number {
            self.social_security_number = v;
        }
        if let Some(v) = p.blood_group {
            self.blood_group = v;
        }
        if let Some(v) = p.allergies {
            self.allergies = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .required("lastName", &self.last_name)
            .required("firstName", &self.first_name)
            .short("sex", self.sex.as_deref())
            .long("address", self.address.as_deref())
            .short("phone", self.phone.as_deref())
            .short("email", self.email.as_deref())
            .short("socialSecurityNumber", self.social_security_number.as_deref())
            .short("bloodGroup", self.blood_group.as_deref())
            .long("allergies", self.allergies.as_deref())
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}

// ── Staff ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub last_name: String,
    pub first_name: String,
    pub role: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub service_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffPatch {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub specialty: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub service_id: Option<Option<Ulid>>,
}

impl Entity for Staff {
    const KIND: EntityKind = EntityKind::Staff;
    type Patch = StaffPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Staff(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Staff(s) => Some(s),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: StaffPatch) {
        if let Some(v) = p.last_name {
            self.last_name = v;
        }
        if let Some(v) = p.first_name {
            self.first_name = v;
        }
        if let Some(v) = p.role {
            self.role = v;
        }
        if let Some(v) = p.specialty {
            self.specialty = v;
        }
        if let Some(v) = p.phone {
            self.phone = v;
        }
        if let Some(v) = p.email {
            self.email = v;
        }
        if let Some(v) = p.service_id {
            self.service_id = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .required("lastName", &self.last_name)
            .required("firstName", &self.first_name)
            .required("role", &self.role)
            .short("specialty", self.specialty.as_deref())
            .short("phone", self.phone.as_deref())
            .short("email", self.email.as_deref())
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::optional("serviceId", EntityKind::Service, self.service_id)]
    }

    fn guarded_parent(&self) -> Option<Ulid> {
        self.service_id
    }
}

// ── Equipment ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub equipment_type: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default = "default_bed_status")]
    pub status: String,
    #[serde(default)]
    pub service_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub equipment_type: Option<Option<String>>,
    pub quantity: Option<u32>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub service_id: Option<Option<Ulid>>,
}

impl Entity for Equipment {
    const KIND: EntityKind = EntityKind::Equipment;
    type Patch = EquipmentPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Equipment(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Equipment(e) => Some(e),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: EquipmentPatch) {
        if let Some(v) = p.name {
            self.name = v;
        }
        if let Some(v) = p.equipment_type {
            self.equipment_type = v;
        }
        if let Some(v) = p.quantity {
            self.quantity = v;
        }
        if let Some(v) = p.status {
            self.status = v;
        }
        if let Some(v) = p.service_id {
            self.service_id = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .required("name", &self.name)
            .short("equipmentType", self.equipment_type.as_deref())
            .required("status", &self.status)
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::optional("serviceId", EntityKind::Service, self.service_id)]
    }

    fn guarded_parent(&self) -> Option<Ulid> {
        self.service_id
    }
}

// ── Transfer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub patient_id: Ulid,
    pub origin_establishment_id: Ulid,
    pub destination_establishment_id: Ulid,
    pub transfer_date: Timestamp,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_transfer_status")]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPatch {
    pub patient_id: Option<Ulid>,
    pub origin_establishment_id: Option<Ulid>,
    pub destination_establishment_id: Option<Ulid>,
    pub transfer_date: Option<Timestamp>,
    #[serde(default, deserialize_with = "double_option")]
    pub reason: Option<Option<String>>,
    pub status: Option<String>,
}

impl Entity for Transfer {
    const KIND: EntityKind = EntityKind::Transfer;
    type Patch = TransferPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Transfer(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Transfer(t) => Some(t),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: TransferPatch) {
        if let Some(v) = p.patient_id {
            self.patient_id = v;
        }
        if let Some(v) = p.origin_establishment_id {
            self.origin_establishment_id = v;
        }
        if let Some(v) = p.destination_establishment_id {
            self.destination_establishment_id = v;
        }
        if let Some(v) = p.transfer_date {
            self.transfer_date = v;
        }
        if let Some(v) = p.reason {
            self.reason = v;
        }
        if let Some(v) = p.status {
            self.status = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .check(
                self.origin_establishment_id != self.destination_establishment_id,
                "destinationEstablishmentId",
                "must differ from originEstablishmentId",
            )
            .long("reason", self.reason.as_deref())
            .required("status", &self.status)
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![
            Reference::required("patientId", EntityKind::Patient, self.patient_id),
            Reference::required(
                "originEstablishmentId",
                EntityKind::Establishment,
                self.origin_establishment_id,
            ),
            Reference::required(
                "destinationEstablishmentId",
                EntityKind::Establishment,
                self.destination_establishment_id,
            ),
        ]
    }
}

// ── Reservation ──────────────────────────────────────────────────

/// A bed booked for a patient over the inclusive window `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub patient_id: Ulid,
    pub bed_id: Ulid,
    #[serde(alias = "dateDepart")]
    pub start_date: Timestamp,
    #[serde(alias = "dateArrivee")]
    pub end_date: Timestamp,
    #[serde(default)]
    pub destination_establishment_id: Option<Ulid>,
}

impl Reservation {
    pub fn window(&self) -> Window {
        Window::new(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    pub patient_id: Option<Ulid>,
    pub bed_id: Option<Ulid>,
    #[serde(alias = "dateDepart")]
    pub start_date: Option<Timestamp>,
    #[serde(alias = "dateArrivee")]
    pub end_date: Option<Timestamp>,
    #[serde(default, deserialize_with = "double_option")]
    pub destination_establishment_id: Option<Option<Ulid>>,
}

impl Entity for Reservation {
    const KIND: EntityKind = EntityKind::Reservation;
    type Patch = ReservationPatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::Reservation(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Reservation(r) => Some(r),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: ReservationPatch) {
        if let Some(v) = p.patient_id {
            self.patient_id = v;
        }
        if let Some(v) = p.bed_id {
            self.bed_id = v;
        }
        if let Some(v) = p.start_date {
            self.start_date = v;
        }
        if let Some(v) = p.end_date {
            self.end_date = v;
        }
        if let Some(v) = p.destination_establishment_id {
            self.destination_establishment_id = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .check(
                self.window().is_ordered(),
                "endDate",
                "must not precede startDate",
            )
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![
            Reference::required("patientId", EntityKind::Patient, self.patient_id),
            Reference::required("bedId", EntityKind::Bed, self.bed_id),
            Reference::optional(
                "destinationEstablishmentId",
                EntityKind::Establishment,
                self.destination_establishment_id,
            ),
        ]
    }

    fn guarded_parent(&self) -> Option<Ulid> {
        Some(self.bed_id)
    }
}

// ── CareEpisode ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareEpisode {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub patient_id: Ulid,
    #[serde(default)]
    pub staff_id: Option<Ulid>,
    pub started_at: Timestamp,
    #[serde(default)]
    pub ended_at: Option<Timestamp>,
    #[serde(default)]
    pub care_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareEpisodePatch {
    pub patient_id: Option<Ulid>,
    #[serde(default, deserialize_with = "double_option")]
    pub staff_id: Option<Option<Ulid>>,
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "double_option")]
    pub ended_at: Option<Option<Timestamp>>,
    #[serde(default, deserialize_with = "double_option")]
    pub care_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl Entity for CareEpisode {
    const KIND: EntityKind = EntityKind::CareEpisode;
    type Patch = CareEpisodePatch;

    fn id(&self) -> Ulid {
        self.id
    }

    fn into_record(self) -> Record {
        Record::CareEpisode(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::CareEpisode(c) => Some(c),
            _ => None,
        }
    }

    fn apply_patch(&mut self, p: CareEpisodePatch) {
        if let Some(v) = p.patient_id {
            self.patient_id = v;
        }
        if let Some(v) = p.staff_id {
            self.staff_id = v;
        }
        if let Some(v) = p.started_at {
            self.started_at = v;
        }
        if let Some(v) = p.ended_at {
            self.ended_at = v;
        }
        if let Some(v) = p.care_type {
            self.care_type = v;
        }
        if let Some(v) = p.notes {
            self.notes = v;
        }
    }

    fn validate(&self) -> Vec<FieldError> {
        Checks::default()
            .check(
                self.ended_at.is_none_or(|end| end >= self.started_at),
                "endedAt",
                "must not precede startedAt",
            )
            .short("careType", self.care_type.as_deref())
            .long("notes", self.notes.as_deref())
            .finish()
    }

    fn references(&self) -> Vec<Reference> {
        vec![
            Reference::required("patientId", EntityKind::Patient, self.patient_id),
            Reference::optional("staffId", EntityKind::Staff, self.staff_id),
        ]
    }
}

// ── Test fixtures ────────────────────────────────────────────────

#[cfg(test)]
impl Establishment {
    pub fn sample() -> Self {
        Self {
            id: Ulid::new(),
            name: "CHU Nord".into(),
            establishment_type: Some("Hôpital".into()),
            address: None,
            city: Some("Lyon".into()),
            phone: None,
            email: None,
        }
    }
}

#[cfg(test)]
impl Service {
    pub fn sample(establishment_id: Ulid) -> Self {
        Self {
            id: Ulid::new(),
            name: "Cardiologie".into(),
            description: None,
            establishment_id,
            floor: Some("2".into()),
            wing: None,
            capacity: 0,
            status: default_service_status(),
            specialty: None,
            head_staff_id: None,
        }
    }
}

#[cfg(test)]
impl Bed {
    pub fn sample(service_id: Ulid) -> Self {
        Self {
            id: Ulid::new(),
            number: format!("L-{}", Ulid::new()),
            bed_type: None,
            status: default_bed_status(),
            service_id,
            room: Some("204".into()),
            floor: None,
            patient_id: None,
        }
    }
}

#[cfg(test)]
impl Patient {
    pub fn sample() -> Self {
        Self {
            id: Ulid::new(),
            last_name: "Martin".into(),
            first_name: "Claire".into(),
            birth_date: NaiveDate::from_ymd_opt(1980, 4, 12),
            sex: None,
            address: None,
            phone: None,
            email: None,
            social_security_number: None,
            blood_group: None,
            allergies: None,
        }
    }
}

#[cfg(test)]
impl Staff {
    pub fn sample(service_id: Option<Ulid>) -> Self {
        Self {
            id: Ulid::new(),
            last_name: "Durand".into(),
            first_name: "Paul".into(),
            role: "Infirmier".into(),
            specialty: None,
            phone: None,
            email: None,
            service_id,
        }
    }
}

#[cfg(test)]
impl Equipment {
    pub fn sample(service_id: Option<Ulid>) -> Self {
        Self {
            id: Ulid::new(),
            name: "Moniteur cardiaque".into(),
            equipment_type: None,
            quantity: 1,
            status: default_bed_status(),
            service_id,
        }
    }
}

#[cfg(test)]
impl Reservation {
    pub fn sample(patient_id: Ulid, bed_id: Ulid, window: Window) -> Self {
        Self {
            id: Ulid::new(),
            patient_id,
            bed_id,
            start_date: window.start,
            end_date: window.end,
            destination_establishment_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_shape_fills_defaults() {
        let service_id = Ulid::new();
        let bed: Bed = serde_json::from_value(serde_json::json!({
            "number": "12A",
            "serviceId": service_id.to_string(),
        }))
        .unwrap();
        assert_eq!(bed.status, "Disponible");
        assert_eq!(bed.service_id, service_id);
        assert!(bed.patient_id.is_none());
    }

    #[test]
    fn create_shape_requires_parent() {
        let result: Result<Bed, _> = serde_json::from_value(serde_json::json!({ "number": "12A" }));
        assert!(result.is_err());
    }

    #[test]
    fn reservation_accepts_source_date_labels() {
        let r: Reservation = serde_json::from_value(serde_json::json!({
            "patientId": Ulid::new().to_string(),
            "bedId": Ulid::new().to_string(),
            "dateDepart": "2024-01-01T00:00:00Z",
            "dateArrivee": "2024-01-10T00:00:00Z",
        }))
        .unwrap();
        assert!(r.start_date < r.end_date);
        // serialized with the consistent names
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("startDate").is_some());
        assert!(json.get("dateDepart").is_none());
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let mut bed = Bed::sample(Ulid::new());
        bed.room = Some("101".into());
        bed.floor = Some("1".into());

        let patch: BedPatch =
            serde_json::from_value(serde_json::json!({ "room": null, "status": "Occupé" })).unwrap();
        bed.apply_patch(patch);

        assert_eq!(bed.room, None);
        assert_eq!(bed.floor.as_deref(), Some("1"));
        assert_eq!(bed.status, "Occupé");
    }

    #[test]
    fn validate_rejects_blank_required_fields() {
        let mut patient = Patient::sample();
        patient.last_name = "   ".into();
        let errors = patient.validate();
        assert_eq!(errors, vec![FieldError::new("lastName", "is required")]);
    }

    #[test]
    fn validate_rejects_long_text() {
        let mut service = Service::sample(Ulid::new());
        service.description = Some("x".repeat(MAX_TEXT_LEN + 1));
        let errors = service.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "description");
    }

    #[test]
    fn optional_text_limit_is_inclusive() {
        let mut establishment = Establishment::sample();
        establishment.city = Some("c".repeat(MAX_NAME_LEN));
        assert!(establishment.validate().is_empty());

        establishment.city = Some("c".repeat(MAX_NAME_LEN + 1));
        let errors = establishment.validate();
        assert_eq!(
            errors,
            vec![FieldError::new(
                "city",
                format!("must be at most {MAX_NAME_LEN} bytes")
            )]
        );
    }

    #[test]
    fn validate_reservation_window_order() {
        use chrono::TimeZone;
        let start = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let end = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let r = Reservation::sample(Ulid::new(), Ulid::new(), Window::new(start, end));
        let errors = r.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "endDate");

        let ok = Reservation::sample(Ulid::new(), Ulid::new(), Window::new(end, end));
        assert!(ok.validate().is_empty());
    }

    #[test]
    fn transfer_requires_distinct_establishments() {
        use chrono::Utc;
        let est = Ulid::new();
        let t = Transfer {
            id: Ulid::new(),
            patient_id: Ulid::new(),
            origin_establishment_id: est,
            destination_establishment_id: est,
            transfer_date: Utc::now(),
            reason: None,
            status: default_transfer_status(),
        };
        assert_eq!(t.validate()[0].field, "destinationEstablishmentId");
    }

    #[test]
    fn guarded_parents() {
        let service_id = Ulid::new();
        assert_eq!(Bed::sample(service_id).guarded_parent(), Some(service_id));
        assert_eq!(Staff::sample(None).guarded_parent(), None);
        assert_eq!(Patient::sample().guarded_parent(), None);
    }
}
