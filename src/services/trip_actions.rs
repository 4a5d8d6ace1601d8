//! Actions a front end invokes on behalf of a signed-in user.
//!
//! Authorization happens here, before any store access that mutates state.

use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::{
    auth::Actor,
    clock::Clock,
    db::DbPool,
    error::AppError,
    models::{
        notification::{NotificationKind, NotificationMeta},
        settings::{render_template, MessageTemplates, TemplateContext},
        trip::{
            normalize_optional, DriverConfirmation, NewTrip, Trip, TripFilter, TripStatus,
            TripUpdate,
        },
        user::{Role, User},
        vehicle::{Vehicle, VehicleStatus},
    },
    schedule,
    services::{
        matrix::MessagingGateway,
        notifications::NotificationDispatcher,
        trips::{FinishRecord, TripFlag, TripStore},
        users::UserStore,
        vehicles::VehicleStore,
    },
};

#[derive(Clone)]
pub struct TripService {
    trips: TripStore,
    vehicles: VehicleStore,
    users: UserStore,
    dispatcher: NotificationDispatcher,
    gateway: Arc<dyn MessagingGateway>,
    templates: MessageTemplates,
    tz: Tz,
    clock: Arc<dyn Clock>,
    gateway_timeout: Duration,
}

impl TripService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbPool,
        dispatcher: NotificationDispatcher,
        gateway: Arc<dyn MessagingGateway>,
        templates: MessageTemplates,
        tz: Tz,
        clock: Arc<dyn Clock>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            trips: TripStore::new(db.clone()),
            vehicles: VehicleStore::new(db.clone()),
            users: UserStore::new(db),
            dispatcher,
            gateway,
            templates,
            tz,
            clock,
            gateway_timeout,
        }
    }

    pub async fn create_trip(&self, actor: &Actor, mut new: NewTrip) -> Result<Trip, AppError> {
        actor.require_admin()?;

        new.departure_time = schedule::normalize_hhmm(&new.departure_time)?;
        if new.destination.trim().is_empty() {
            return Err(AppError::BadRequest("destination is required".into()));
        }
        if new.purpose.trim().is_empty() {
            return Err(AppError::BadRequest("purpose is required".into()));
        }
        validate_dates(new.departure_date, new.return_date)?;
        schedule::departure_instant(&new.departure_date, &new.departure_time, self.tz)?;
        if new.estimated_distance.is_some_and(|distance| distance < 0.0) {
            return Err(AppError::BadRequest("estimated distance cannot be negative".into()));
        }

        let driver = self.assignable_driver(&new.driver_id).await?;
        let vehicle = self
            .ensure_vehicle_available(&new.vehicle_id, new.departure_date, new.return_date, None)
            .await?;

        let trip = Trip::from_new(new, actor.id.clone(), self.clock.now());
        self.trips.insert(&trip).await?;
        self.vehicles
            .set_status(&vehicle.id, VehicleStatus::InUse)
            .await?;
        info!(
            trip_id = %trip.id,
            driver = %driver.name,
            vehicle = %vehicle.license_plate,
            created_by = %actor.name,
            "trip created"
        );

        let body = format!(
            "You have been assigned a trip to {} on {} at {} with {}",
            trip.destination,
            schedule::format_local_date(&trip.departure_date),
            trip.departure_time,
            vehicle.label()
        );
        let meta = NotificationMeta::for_trip(NotificationKind::TripAssigned, &trip.id)
            .with("vehicle", vehicle.license_plate.as_str())
            .with("destination", trip.destination.as_str());
        self.notify(&driver.id, "New trip assigned", &body, &meta).await;
        self.send_assignment(&driver, &trip).await;

        Ok(trip)
    }

    pub async fn update_trip(
        &self,
        actor: &Actor,
        trip_id: &str,
        mut update: TripUpdate,
    ) -> Result<Trip, AppError> {
        actor.require_admin()?;
        let mut trip = self.trips.require(trip_id).await?;
        let previous_status = trip.status;
        let previous_vehicle = trip.vehicle_id.clone();
        let previous_dates = (trip.departure_date, trip.return_date);
        let previous_departure = (trip.departure_date, trip.departure_time.clone());

        update.departure_time = update
            .departure_time
            .as_deref()
            .map(schedule::normalize_hhmm)
            .transpose()?;
        if let Some(next) = update.status {
            if !previous_status.can_transition_to(next) {
                return Err(AppError::InvalidTransition {
                    from: previous_status,
                    action: transition_verb(next),
                });
            }
        }

        let changes = trip.important_changes(&update);
        let details_changed = trip.detail_changes(&update);
        trip.apply_update(update);
        validate_dates(trip.departure_date, trip.return_date)?;
        if trip.destination.is_empty() || trip.purpose.is_empty() {
            return Err(AppError::BadRequest("destination and purpose cannot be blank".into()));
        }
        if (trip.departure_date, trip.departure_time.clone()) != previous_departure {
            trip.departure_instant(self.tz)?;
        }

        let vehicle_changed = trip.vehicle_id != previous_vehicle;
        let dates_changed = (trip.departure_date, trip.return_date) != previous_dates;
        if trip.status.is_active() && (vehicle_changed || dates_changed) {
            self.ensure_vehicle_available(
                &trip.vehicle_id,
                trip.departure_date,
                trip.return_date,
                Some(&trip.id),
            )
            .await?;
        }

        if !changes.is_empty() {
            trip.driver_confirmation = DriverConfirmation::default();
        }
        trip.updated_by = Some(actor.id.clone());
        trip.updated_at = self.clock.now();
        if !self.trips.update(&trip, previous_status).await? {
            let current = self.trips.require(trip_id).await?;
            warn!(trip_id, from = %previous_status, now = %current.status, "trip changed during edit");
            return Err(AppError::BadRequest(format!(
                "trip is now {}, reload it before editing",
                current.status
            )));
        }

        if vehicle_changed {
            if previous_status != TripStatus::InProgress {
                self.release_vehicle(&previous_vehicle, &trip.id).await?;
            }
            if trip.status.is_active() {
                self.vehicles
                    .set_status(&trip.vehicle_id, VehicleStatus::InUse)
                    .await?;
            }
        }
        if trip.status != previous_status {
            match trip.status {
                TripStatus::Completed | TripStatus::Cancelled => {
                    self.release_vehicle(&trip.vehicle_id, &trip.id).await?;
                }
                TripStatus::InProgress => {
                    self.vehicles
                        .set_status(&trip.vehicle_id, VehicleStatus::InUse)
                        .await?;
                }
                TripStatus::Scheduled => {}
            }
        }

        info!(
            trip_id = %trip.id,
            actor = %actor.name,
            important = changes.len(),
            status = %trip.status,
            "trip updated"
        );

        if !changes.is_empty() {
            let fields: Vec<&str> = changes.iter().map(|field| field.label()).collect();
            let body = format!(
                "Your trip to {} was changed ({}). Please review and confirm it again.",
                trip.destination,
                fields.join(", ")
            );
            let meta = NotificationMeta::for_trip(NotificationKind::TripEdited, &trip.id)
                .with("changedFields", fields);
            self.notify(&trip.driver_id, "Trip changed", &body, &meta).await;
        } else if details_changed && trip.status.is_active() {
            let body = format!("Details of your trip to {} were updated", trip.destination);
            let meta = NotificationMeta::for_trip(NotificationKind::TripUpdated, &trip.id);
            self.notify(&trip.driver_id, "Trip updated", &body, &meta).await;
        }
        if trip.status == TripStatus::Cancelled && previous_status != TripStatus::Cancelled {
            let body = format!(
                "Your trip to {} on {} was cancelled",
                trip.destination,
                schedule::format_local_date(&trip.departure_date)
            );
            let meta = NotificationMeta::for_trip(NotificationKind::TripCancelled, &trip.id);
            self.notify(&trip.driver_id, "Trip cancelled", &body, &meta).await;
        }

        Ok(trip)
    }

    /// Driver acknowledgement. Never changes the trip status.
    pub async fn confirm_trip(
        &self,
        actor: &Actor,
        trip_id: &str,
        notes: Option<String>,
    ) -> Result<Trip, AppError> {
        let trip = self.trips.require(trip_id).await?;
        actor.require_driver_of(&trip)?;
        if !trip.status.is_active() {
            return Err(AppError::InvalidTransition {
                from: trip.status,
                action: "confirm",
            });
        }
        if trip.is_confirmed() {
            return Err(AppError::BadRequest("trip is already confirmed".into()));
        }

        let notes = normalize_optional(notes);
        if !self
            .trips
            .confirm(trip_id, self.clock.now(), notes.as_deref())
            .await?
        {
            return Err(AppError::BadRequest("trip is already confirmed".into()));
        }
        let trip = self.trips.require(trip_id).await?;
        info!(trip_id = %trip.id, driver = %actor.name, "trip confirmed by driver");

        let body = format!(
            "{} confirmed the trip to {} on {}",
            actor.name,
            trip.destination,
            schedule::format_local_date(&trip.departure_date)
        );
        let mut meta = NotificationMeta::for_trip(NotificationKind::TripConfirmed, &trip.id)
            .with("driverName", actor.name.as_str());
        if let Some(notes) = notes {
            meta = meta.with("notes", notes);
        }
        self.notify(&trip.created_by, "Trip confirmed", &body, &meta)
            .await;

        Ok(trip)
    }

    /// in_progress → completed by the assigned driver.
    pub async fn finish_trip(
        &self,
        actor: &Actor,
        trip_id: &str,
        notes: Option<String>,
    ) -> Result<Trip, AppError> {
        let trip = self.trips.require(trip_id).await?;
        actor.require_driver_of(&trip)?;
        if trip.status != TripStatus::InProgress {
            return Err(AppError::InvalidTransition {
                from: trip.status,
                action: "finish",
            });
        }

        let now = self.clock.now();
        let record = FinishRecord {
            finished_at: now,
            finished_by: actor.id.clone(),
            return_time: schedule::wall_clock_hhmm(now, self.tz),
            observations: append_finish_notes(trip.observations.clone(), notes),
        };
        if !self.trips.finish(trip_id, &record).await? {
            let current = self.trips.require(trip_id).await?;
            return Err(AppError::InvalidTransition {
                from: current.status,
                action: "finish",
            });
        }
        self.release_vehicle(&trip.vehicle_id, &trip.id).await?;
        info!(trip_id = %trip.id, driver = %actor.name, return_time = %record.return_time, "trip finished");

        if self
            .trips
            .claim_flag(trip_id, TripFlag::CompletedNotification, now)
            .await?
        {
            let body = format!(
                "{} finished the trip to {} at {}",
                actor.name, trip.destination, record.return_time
            );
            let meta = NotificationMeta::for_trip(NotificationKind::TripCompleted, &trip.id)
                .with("driverName", actor.name.as_str())
                .with("returnTime", record.return_time.as_str());
            self.notify(&trip.created_by, "Trip completed", &body, &meta)
                .await;
        }

        self.trips.require(trip_id).await
    }

    pub async fn delete_trip(&self, actor: &Actor, trip_id: &str) -> Result<(), AppError> {
        actor.require_admin()?;
        let trip = self.trips.require(trip_id).await?;
        if trip.status.is_active() {
            self.release_vehicle(&trip.vehicle_id, &trip.id).await?;
        }
        if !self.trips.delete(trip_id).await? {
            return Err(AppError::NotFound);
        }
        info!(trip_id, actor = %actor.name, "trip deleted");
        Ok(())
    }

    pub async fn get_trip(&self, actor: &Actor, trip_id: &str) -> Result<Trip, AppError> {
        let trip = self.trips.require(trip_id).await?;
        if !actor.can_view(&trip) {
            return Err(AppError::Forbidden);
        }
        Ok(trip)
    }

    /// Drivers only ever see their own trips, whatever filter they send.
    pub async fn list_trips(&self, actor: &Actor, filter: TripFilter) -> Result<Vec<Trip>, AppError> {
        let filter = match actor.role {
            Role::PrincipalAdmin | Role::Administrative => filter,
            Role::Driver => TripFilter {
                driver_id: Some(actor.id.clone()),
                ..filter
            },
        };
        self.trips.list(&filter).await
    }

    async fn assignable_driver(&self, driver_id: &str) -> Result<User, AppError> {
        match self.users.get(driver_id).await? {
            Some(user) if user.role == Role::Driver && user.is_active => Ok(user),
            Some(_) => Err(AppError::BadRequest(
                "assigned user is not an active driver".into(),
            )),
            None => Err(AppError::BadRequest("driver not found".into())),
        }
    }

    async fn ensure_vehicle_available(
        &self,
        vehicle_id: &str,
        departure: NaiveDate,
        return_date: Option<NaiveDate>,
        exclude_trip: Option<&str>,
    ) -> Result<Vehicle, AppError> {
        let vehicle = self
            .vehicles
            .get(vehicle_id)
            .await?
            .ok_or_else(|| AppError::BadRequest("vehicle not found".into()))?;
        if !vehicle.status.is_assignable() {
            return Err(AppError::BadRequest(format!(
                "vehicle {} is not available for trips",
                vehicle.license_plate
            )));
        }
        if self
            .trips
            .vehicle_has_conflict(vehicle_id, departure, return_date, exclude_trip)
            .await?
        {
            return Err(AppError::BadRequest(format!(
                "vehicle {} already has a trip on those dates",
                vehicle.license_plate
            )));
        }
        Ok(vehicle)
    }

    /// Back to `available` once no other active trip holds the vehicle.
    async fn release_vehicle(&self, vehicle_id: &str, trip_id: &str) -> Result<(), AppError> {
        if self
            .trips
            .active_count_for_vehicle(vehicle_id, Some(trip_id))
            .await?
            > 0
        {
            return Ok(());
        }
        match self.vehicles.get(vehicle_id).await? {
            Some(vehicle) if vehicle.status == VehicleStatus::InUse => {
                self.vehicles
                    .set_status(vehicle_id, VehicleStatus::Available)
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn notify(&self, user_id: &str, title: &str, body: &str, meta: &NotificationMeta) {
        if let Err(err) = self.dispatcher.send_to_user(user_id, title, body, meta).await {
            warn!(user_id, kind = ?meta.kind, error = %err, "could not store notification");
        }
    }

    async fn send_assignment(&self, driver: &User, trip: &Trip) {
        if !self.gateway.is_enabled() {
            return;
        }
        let Some(address) = driver.contact() else {
            debug!(driver = %driver.name, "no contact address, assignment message skipped");
            return;
        };
        let message = render_template(
            &self.templates.assignment,
            &TemplateContext {
                driver: &driver.name,
                destination: &trip.destination,
                date: schedule::format_local_date(&trip.departure_date),
                time: &trip.departure_time,
            },
        );
        match tokio::time::timeout(self.gateway_timeout, self.gateway.send(address, &message)).await
        {
            Ok(Ok(())) => info!(trip_id = %trip.id, "assignment message sent"),
            Ok(Err(err)) => warn!(trip_id = %trip.id, error = %err, "assignment message failed"),
            Err(_) => warn!(trip_id = %trip.id, "assignment message timed out"),
        }
    }
}

fn validate_dates(departure: NaiveDate, return_date: Option<NaiveDate>) -> Result<(), AppError> {
    match return_date {
        Some(return_date) if return_date < departure => Err(AppError::BadRequest(
            "return date cannot be before the departure date".into(),
        )),
        _ => Ok(()),
    }
}

fn transition_verb(next: TripStatus) -> &'static str {
    match next {
        TripStatus::Scheduled => "reschedule",
        TripStatus::InProgress => "start",
        TripStatus::Completed => "complete",
        TripStatus::Cancelled => "cancel",
    }
}

fn append_finish_notes(observations: Option<String>, notes: Option<String>) -> Option<String> {
    match (observations, normalize_optional(notes)) {
        (Some(existing), Some(notes)) => Some(format!("{existing}\n\nFinish notes: {notes}")),
        (None, Some(notes)) => Some(format!("Finish notes: {notes}")),
        (existing, None) => existing,
    }
}
