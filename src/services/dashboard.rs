use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::{
    auth::Actor,
    db::DbPool,
    error::AppError,
    models::{
        trip::{Trip, TripStatus},
        user::Role,
        vehicle::VehicleStatus,
    },
    schedule,
    services::{trips::TripStore, users::UserStore, vehicles::VehicleStore},
};

const UPCOMING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_trips: i64,
    pub active_trips: i64,
    pub vehicles_in_service: i64,
    pub vehicles_in_use: i64,
    pub active_drivers: i64,
    pub scheduled_next_week: i64,
    pub trips_by_status: HashMap<TripStatus, i64>,
}

/// Admin view of the current day.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTrips {
    pub active_trips: Vec<Trip>,
    pub completed_trips: Vec<Trip>,
}

#[derive(Clone)]
pub struct DashboardService {
    trips: TripStore,
    vehicles: VehicleStore,
    users: UserStore,
    tz: Tz,
}

impl DashboardService {
    pub fn new(db: DbPool, tz: Tz) -> Self {
        Self {
            trips: TripStore::new(db.clone()),
            vehicles: VehicleStore::new(db.clone()),
            users: UserStore::new(db),
            tz,
        }
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<DashboardStats, AppError> {
        let mut trips_by_status: HashMap<TripStatus, i64> =
            TripStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for (status, count) in self.trips.count_by_status().await? {
            trips_by_status.insert(status, count);
        }
        let active_trips = trips_by_status
            .iter()
            .filter(|(status, _)| status.is_active())
            .map(|(_, count)| count)
            .sum();

        let (from, to) =
            schedule::local_date_window(now, Duration::days(UPCOMING_WINDOW_DAYS), self.tz);

        Ok(DashboardStats {
            total_trips: self.trips.count().await?,
            active_trips,
            vehicles_in_service: self.vehicles.count_in_service().await?,
            vehicles_in_use: self
                .vehicles
                .count_with_status(VehicleStatus::InUse)
                .await?,
            active_drivers: self.users.count_active_drivers().await?,
            scheduled_next_week: self.trips.count_scheduled_between(from, to).await?,
            trips_by_status,
        })
    }

    pub async fn upcoming_trips(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Trip>, AppError> {
        self.trips
            .upcoming(schedule::local_date(now, self.tz), limit.clamp(1, 100))
            .await
    }

    pub async fn active_trips(&self) -> Result<Vec<Trip>, AppError> {
        self.trips.with_status(TripStatus::InProgress).await
    }

    /// Trips on the road plus trips that departed and finished today.
    pub async fn daily_trips(&self, actor: &Actor, now: DateTime<Utc>) -> Result<DailyTrips, AppError> {
        actor.require_admin()?;
        let today = schedule::local_date(now, self.tz);
        Ok(DailyTrips {
            active_trips: self.active_trips().await?,
            completed_trips: self.trips.completed_between(None, today, today).await?,
        })
    }

    /// A driver's completed trips from Monday to Friday of the current week.
    pub async fn weekly_trips(&self, actor: &Actor, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        match actor.role {
            Role::Driver => {}
            Role::PrincipalAdmin | Role::Administrative => return Err(AppError::Forbidden),
        }
        let (monday, friday) = schedule::work_week(schedule::local_date(now, self.tz));
        self.trips
            .completed_between(Some(&actor.id), monday, friday)
            .await
    }
}
