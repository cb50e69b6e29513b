//! Base path reservations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive claim of a publishing app over a base path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathReservation {
    pub base_path: String,
    pub publishing_app: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to reserve a base path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub base_path: String,
    pub publishing_app: String,
    #[serde(default)]
    pub override_existing: bool,
}

impl ReservationRequest {
    pub fn new(base_path: impl Into<String>, publishing_app: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            publishing_app: publishing_app.into(),
            override_existing: false,
        }
    }

    pub fn overriding(mut self) -> Self {
        self.override_existing = true;
        self
    }

    /// Decide what reserving does given the current owner of the path.
    ///
    /// Returns `Err(owner)` when another app holds the path and the request
    /// does not override it.
    pub fn resolve(&self, existing: Option<&PathReservation>) -> Result<ReservationOutcome, String> {
        match existing {
            None => Ok(ReservationOutcome::Created),
            Some(r) if r.publishing_app == self.publishing_app => Ok(ReservationOutcome::Unchanged),
            Some(r) if self.override_existing => Ok(ReservationOutcome::Reassigned {
                previous_app: r.publishing_app.clone(),
            }),
            Some(r) => Err(r.publishing_app.clone()),
        }
    }
}

/// What a successful reservation did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Created,
    Unchanged,
    Reassigned { previous_app: String },
}

impl ReservationOutcome {
    /// Apply the outcome to produce the row that should be stored.
    pub fn apply(
        &self,
        request: &ReservationRequest,
        existing: Option<&PathReservation>,
        now: DateTime<Utc>,
    ) -> PathReservation {
        match (self, existing) {
            (ReservationOutcome::Unchanged, Some(r)) => r.clone(),
            (ReservationOutcome::Reassigned { .. }, Some(r)) => PathReservation {
                base_path: r.base_path.clone(),
                publishing_app: request.publishing_app.clone(),
                created_at: r.created_at,
                updated_at: now,
            },
            _ => PathReservation {
                base_path: request.base_path.clone(),
                publishing_app: request.publishing_app.clone(),
                created_at: now,
                updated_at: now,
            },
        }
    }
}
