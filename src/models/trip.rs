use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::{error::AppError, schedule};

pub const DEFAULT_DEPARTURE_LOCATION: &str = "Central office";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TripStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub const ALL: [TripStatus; 4] = [
        TripStatus::Scheduled,
        TripStatus::InProgress,
        TripStatus::Completed,
        TripStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "scheduled",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    /// Scheduled and in-progress trips hold their vehicle.
    pub fn is_active(&self) -> bool {
        matches!(self, TripStatus::Scheduled | TripStatus::InProgress)
    }

    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        use TripStatus::*;
        match (self, next) {
            (current, next) if *current == next => true,
            (Scheduled, InProgress) | (Scheduled, Cancelled) => true,
            (InProgress, Completed) | (InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfirmation {
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmation_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub driver_id: String,
    pub vehicle_id: String,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub departure_date: NaiveDate,
    /// Local wall-clock time, `HH:MM`.
    pub departure_time: String,
    pub return_date: Option<NaiveDate>,
    pub return_time: Option<String>,
    pub destination: String,
    pub purpose: String,
    pub departure_location: String,
    pub observations: Option<String>,
    pub estimated_distance: Option<f64>,
    pub status: TripStatus,
    #[sqlx(flatten)]
    pub driver_confirmation: DriverConfirmation,
    pub reminder_notification_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub auto_started: bool,
    pub auto_started_at: Option<DateTime<Utc>>,
    pub start_notification_sent: bool,
    pub completed_notification_sent: bool,
    pub whatsapp_confirmation_reminder_sent: bool,
    pub whatsapp_pre_trip_reminder_sent: bool,
    pub finished_at: Option<DateTime<Utc>>,
    pub finished_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn from_new(new: NewTrip, created_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            driver_id: new.driver_id,
            vehicle_id: new.vehicle_id,
            created_by: created_by.into(),
            updated_by: None,
            departure_date: new.departure_date,
            departure_time: new.departure_time.trim().to_string(),
            return_date: new.return_date,
            return_time: None,
            destination: new.destination.trim().to_string(),
            purpose: new.purpose.trim().to_string(),
            departure_location: normalize_optional(new.departure_location)
                .unwrap_or_else(|| DEFAULT_DEPARTURE_LOCATION.to_string()),
            observations: normalize_optional(new.observations),
            estimated_distance: new.estimated_distance,
            status: TripStatus::Scheduled,
            driver_confirmation: DriverConfirmation::default(),
            reminder_notification_sent: false,
            reminder_sent_at: None,
            auto_started: false,
            auto_started_at: None,
            start_notification_sent: false,
            completed_notification_sent: false,
            whatsapp_confirmation_reminder_sent: false,
            whatsapp_pre_trip_reminder_sent: false,
            finished_at: None,
            finished_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.driver_confirmation.confirmed
    }

    /// The single place a trip's effective departure instant is computed.
    pub fn departure_instant(&self, tz: Tz) -> Result<DateTime<Utc>, AppError> {
        schedule::departure_instant(&self.departure_date, &self.departure_time, tz)
    }

    /// Fields of `update` that differ from this trip and require the driver to re-confirm.
    pub fn important_changes(&self, update: &TripUpdate) -> Vec<ImportantField> {
        let mut changes = Vec::new();
        if let Some(vehicle_id) = update.vehicle_id.as_deref() {
            if vehicle_id != self.vehicle_id {
                changes.push(ImportantField::Vehicle);
            }
        }
        if let Some(date) = update.departure_date {
            if date != self.departure_date {
                changes.push(ImportantField::DepartureDate);
            }
        }
        if let Some(date) = update.return_date {
            if Some(date) != self.return_date {
                changes.push(ImportantField::ReturnDate);
            }
        }
        if let Some(time) = update.departure_time.as_deref() {
            if time.trim() != self.departure_time {
                changes.push(ImportantField::DepartureTime);
            }
        }
        if let Some(destination) = update.destination.as_deref() {
            if destination.trim() != self.destination {
                changes.push(ImportantField::Destination);
            }
        }
        if let Some(location) = update.departure_location.as_deref() {
            if location.trim() != self.departure_location {
                changes.push(ImportantField::DepartureLocation);
            }
        }
        changes
    }

    /// Whether `update` touches details the driver should hear about but that do
    /// not need a new confirmation.
    pub fn detail_changes(&self, update: &TripUpdate) -> bool {
        let purpose = update
            .purpose
            .as_deref()
            .is_some_and(|purpose| purpose.trim() != self.purpose);
        let observations = update.observations.is_some()
            && normalize_optional(update.observations.clone()) != self.observations;
        let distance = update
            .estimated_distance
            .is_some_and(|distance| Some(distance) != self.estimated_distance);
        purpose || observations || distance
    }

    /// Copies the supplied fields onto the trip. Confirmation and flags are left alone.
    pub fn apply_update(&mut self, update: TripUpdate) {
        if let Some(vehicle_id) = update.vehicle_id {
            self.vehicle_id = vehicle_id;
        }
        if let Some(date) = update.departure_date {
            self.departure_date = date;
        }
        if let Some(date) = update.return_date {
            self.return_date = Some(date);
        }
        if let Some(time) = update.departure_time {
            self.departure_time = time.trim().to_string();
        }
        if let Some(destination) = update.destination {
            self.destination = destination.trim().to_string();
        }
        if let Some(purpose) = update.purpose {
            self.purpose = purpose.trim().to_string();
        }
        if let Some(location) = update.departure_location {
            self.departure_location = location.trim().to_string();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.observations.is_some() {
            self.observations = normalize_optional(update.observations);
        }
        if update.estimated_distance.is_some() {
            self.estimated_distance = update.estimated_distance;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    pub driver_id: String,
    pub vehicle_id: String,
    pub departure_date: NaiveDate,
    pub departure_time: String,
    pub return_date: Option<NaiveDate>,
    pub destination: String,
    pub purpose: String,
    pub departure_location: Option<String>,
    pub observations: Option<String>,
    pub estimated_distance: Option<f64>,
}

/// Partial administrative edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripUpdate {
    pub vehicle_id: Option<String>,
    pub departure_date: Option<NaiveDate>,
    pub departure_time: Option<String>,
    pub return_date: Option<NaiveDate>,
    pub destination: Option<String>,
    pub purpose: Option<String>,
    pub departure_location: Option<String>,
    pub status: Option<TripStatus>,
    pub observations: Option<String>,
    pub estimated_distance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportantField {
    Vehicle,
    DepartureDate,
    ReturnDate,
    DepartureTime,
    Destination,
    DepartureLocation,
}

impl ImportantField {
    pub fn label(&self) -> &'static str {
        match self {
            ImportantField::Vehicle => "vehicle",
            ImportantField::DepartureDate => "departure date",
            ImportantField::ReturnDate => "return date",
            ImportantField::DepartureTime => "departure time",
            ImportantField::Destination => "destination",
            ImportantField::DepartureLocation => "departure location",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripFilter {
    pub driver_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub status: Option<TripStatus>,
    pub destination: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn normalize_optional(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
