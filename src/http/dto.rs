use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Timestamp, Window};

/// `GET /beds/{id}/availability?start=&end=&excludeReservationId=`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub exclude_reservation_id: Option<Ulid>,
}

impl AvailabilityQuery {
    pub fn window(&self) -> Window {
        Window::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub bed_id: Ulid,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
}
