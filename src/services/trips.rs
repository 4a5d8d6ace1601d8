use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    db::DbPool,
    error::AppError,
    models::trip::{Trip, TripFilter, TripStatus},
};

const DEFAULT_PAGE_SIZE: i64 = 50;

/// One-shot markers on a trip. Each gates a single outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripFlag {
    Reminder,
    StartNotification,
    CompletedNotification,
    ConfirmationReminder,
    PreTripReminder,
}

impl TripFlag {
    fn column(self) -> &'static str {
        match self {
            TripFlag::Reminder => "reminder_notification_sent",
            TripFlag::StartNotification => "start_notification_sent",
            TripFlag::CompletedNotification => "completed_notification_sent",
            TripFlag::ConfirmationReminder => "whatsapp_confirmation_reminder_sent",
            TripFlag::PreTripReminder => "whatsapp_pre_trip_reminder_sent",
        }
    }

    fn sent_at_column(self) -> Option<&'static str> {
        match self {
            TripFlag::Reminder => Some("reminder_sent_at"),
            _ => None,
        }
    }
}

/// Fields written when a driver finishes a trip.
#[derive(Debug, Clone)]
pub struct FinishRecord {
    pub finished_at: DateTime<Utc>,
    pub finished_by: String,
    pub return_time: String,
    pub observations: Option<String>,
}

#[derive(Clone)]
pub struct TripStore {
    db: DbPool,
}

impl TripStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, trip: &Trip) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO trips (
                id, driver_id, vehicle_id, created_by, updated_by,
                departure_date, departure_time, return_date, return_time,
                destination, purpose, departure_location, observations, estimated_distance,
                status, confirmed, confirmed_at, confirmation_notes,
                reminder_notification_sent, reminder_sent_at, auto_started, auto_started_at,
                start_notification_sent, completed_notification_sent,
                whatsapp_confirmation_reminder_sent, whatsapp_pre_trip_reminder_sent,
                finished_at, finished_by, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30
            )"#,
        )
        .bind(&trip.id)
        .bind(&trip.driver_id)
        .bind(&trip.vehicle_id)
        .bind(&trip.created_by)
        .bind(&trip.updated_by)
        .bind(trip.departure_date)
        .bind(&trip.departure_time)
        .bind(trip.return_date)
        .bind(&trip.return_time)
        .bind(&trip.destination)
        .bind(&trip.purpose)
        .bind(&trip.departure_location)
        .bind(&trip.observations)
        .bind(trip.estimated_distance)
        .bind(trip.status)
        .bind(trip.driver_confirmation.confirmed)
        .bind(trip.driver_confirmation.confirmed_at)
        .bind(&trip.driver_confirmation.confirmation_notes)
        .bind(trip.reminder_notification_sent)
        .bind(trip.reminder_sent_at)
        .bind(trip.auto_started)
        .bind(trip.auto_started_at)
        .bind(trip.start_notification_sent)
        .bind(trip.completed_notification_sent)
        .bind(trip.whatsapp_confirmation_reminder_sent)
        .bind(trip.whatsapp_pre_trip_reminder_sent)
        .bind(trip.finished_at)
        .bind(&trip.finished_by)
        .bind(trip.created_at)
        .bind(trip.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(trip)
    }

    pub async fn require(&self, id: &str) -> Result<Trip, AppError> {
        self.get(id).await?.ok_or(AppError::NotFound)
    }

    pub async fn list(&self, filter: &TripFilter) -> Result<Vec<Trip>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM trips WHERE 1 = 1");
        if let Some(driver_id) = &filter.driver_id {
            query.push(" AND driver_id = ").push_bind(driver_id);
        }
        if let Some(vehicle_id) = &filter.vehicle_id {
            query.push(" AND vehicle_id = ").push_bind(vehicle_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(destination) = &filter.destination {
            query
                .push(" AND destination LIKE ")
                .push_bind(format!("%{}%", destination.trim()));
        }
        if let Some(from) = filter.from {
            query.push(" AND departure_date >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND departure_date <= ").push_bind(to);
        }
        query
            .push(" ORDER BY departure_date DESC, departure_time DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));
        let trips = query.build_query_as::<Trip>().fetch_all(&self.db).await?;
        Ok(trips)
    }

    /// Persists an administrative edit. Idempotency flags are never written here.
    /// `false` when the stored status is no longer `expected_status`, e.g. the
    /// engine started the trip while the edit was being prepared.
    pub async fn update(&self, trip: &Trip, expected_status: TripStatus) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET
                vehicle_id = ?2, departure_date = ?3, departure_time = ?4, return_date = ?5,
                destination = ?6, purpose = ?7, departure_location = ?8, observations = ?9,
                estimated_distance = ?10, status = ?11, confirmed = ?12, confirmed_at = ?13,
                confirmation_notes = ?14, updated_by = ?15, updated_at = ?16
            WHERE id = ?1 AND status = ?17"#,
        )
        .bind(&trip.id)
        .bind(&trip.vehicle_id)
        .bind(trip.departure_date)
        .bind(&trip.departure_time)
        .bind(trip.return_date)
        .bind(&trip.destination)
        .bind(&trip.purpose)
        .bind(&trip.departure_location)
        .bind(&trip.observations)
        .bind(trip.estimated_distance)
        .bind(trip.status)
        .bind(trip.driver_confirmation.confirmed)
        .bind(trip.driver_confirmation.confirmed_at)
        .bind(&trip.driver_confirmation.confirmation_notes)
        .bind(&trip.updated_by)
        .bind(trip.updated_at)
        .bind(expected_status)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM trips WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn reminder_candidates(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT * FROM trips
            WHERE status = 'scheduled' AND reminder_notification_sent = 0
              AND departure_date BETWEEN ?1 AND ?2
            ORDER BY departure_date, departure_time"#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    pub async fn confirmation_nudge_candidates(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT * FROM trips
            WHERE status = 'scheduled' AND confirmed = 0
              AND whatsapp_confirmation_reminder_sent = 0
              AND created_at <= ?1
            ORDER BY created_at"#,
        )
        .bind(created_before)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    pub async fn pre_trip_nudge_candidates(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT * FROM trips
            WHERE status = 'scheduled' AND confirmed = 1
              AND whatsapp_pre_trip_reminder_sent = 0
              AND departure_date BETWEEN ?1 AND ?2
            ORDER BY departure_date, departure_time"#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    /// No date filter: "date plus time of day has passed" is decided by the caller.
    pub async fn auto_start_candidates(&self) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT * FROM trips
            WHERE status = 'scheduled' AND auto_started = 0 AND confirmed = 1
            ORDER BY departure_date, departure_time"#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    pub async fn auto_started_in_progress(&self) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE status = 'in_progress' AND auto_started = 1",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    pub async fn with_status(&self, status: TripStatus) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE status = ?1 ORDER BY departure_date, departure_time",
        )
        .bind(status)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    /// Sets `flag` if it is still clear. `true` means this caller owns the send.
    pub async fn claim_flag(
        &self,
        id: &str,
        flag: TripFlag,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let column = flag.column();
        let sql = match flag.sent_at_column() {
            Some(sent_at) => format!(
                "UPDATE trips SET {column} = 1, {sent_at} = ?2, updated_at = ?2 WHERE id = ?1 AND {column} = 0"
            ),
            None => format!(
                "UPDATE trips SET {column} = 1, updated_at = ?2 WHERE id = ?1 AND {column} = 0"
            ),
        };
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Undoes a claim whose send failed before anything was delivered.
    pub async fn release_flag(&self, id: &str, flag: TripFlag) -> Result<(), AppError> {
        let column = flag.column();
        let sql = match flag.sent_at_column() {
            Some(sent_at) => {
                format!("UPDATE trips SET {column} = 0, {sent_at} = NULL WHERE id = ?1")
            }
            None => format!("UPDATE trips SET {column} = 0 WHERE id = ?1"),
        };
        sqlx::query(&sql).bind(id).execute(&self.db).await?;
        Ok(())
    }

    /// scheduled → in_progress for a confirmed trip that was never auto-started.
    pub async fn mark_auto_started(&self, id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET
                status = 'in_progress', auto_started = 1, auto_started_at = ?2,
                start_notification_sent = 1, updated_at = ?2
            WHERE id = ?1 AND status = 'scheduled' AND auto_started = 0 AND confirmed = 1"#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// scheduled → in_progress regardless of confirmation. Start notification is claimed separately.
    pub async fn force_start(&self, id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET
                status = 'in_progress', auto_started = 1, auto_started_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'scheduled'"#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn revert_premature_start(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET
                status = 'scheduled', auto_started = 0, auto_started_at = NULL, updated_at = ?2
            WHERE id = ?1 AND status = 'in_progress' AND auto_started = 1"#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Records the driver's confirmation. Status is deliberately not touched.
    pub async fn confirm(
        &self,
        id: &str,
        now: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET
                confirmed = 1, confirmed_at = ?2, confirmation_notes = ?3, updated_at = ?2
            WHERE id = ?1 AND confirmed = 0 AND status IN ('scheduled', 'in_progress')"#,
        )
        .bind(id)
        .bind(now)
        .bind(notes)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// in_progress → completed. `false` when the trip was not in progress.
    pub async fn finish(&self, id: &str, record: &FinishRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET
                status = 'completed', finished_at = ?2, finished_by = ?3, return_time = ?4,
                observations = ?5, updated_by = ?3, updated_at = ?2
            WHERE id = ?1 AND status = 'in_progress'"#,
        )
        .bind(id)
        .bind(record.finished_at)
        .bind(&record.finished_by)
        .bind(&record.return_time)
        .bind(&record.observations)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Whether another active trip holds `vehicle_id` on overlapping dates.
    /// A trip without a return date occupies its departure day only.
    pub async fn vehicle_has_conflict(
        &self,
        vehicle_id: &str,
        departure: NaiveDate,
        return_date: Option<NaiveDate>,
        exclude_trip: Option<&str>,
    ) -> Result<bool, AppError> {
        let until = return_date.unwrap_or(departure);
        let conflicts: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM trips
            WHERE vehicle_id = ?1
              AND status IN ('scheduled', 'in_progress')
              AND departure_date <= ?3
              AND COALESCE(return_date, departure_date) >= ?2
              AND (?4 IS NULL OR id != ?4)"#,
        )
        .bind(vehicle_id)
        .bind(departure)
        .bind(until)
        .bind(exclude_trip)
        .fetch_one(&self.db)
        .await?;
        Ok(conflicts > 0)
    }

    pub async fn active_count_for_vehicle(
        &self,
        vehicle_id: &str,
        exclude_trip: Option<&str>,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM trips
            WHERE vehicle_id = ?1 AND status IN ('scheduled', 'in_progress')
              AND (?2 IS NULL OR id != ?2)"#,
        )
        .bind(vehicle_id)
        .bind(exclude_trip)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Every trip that ever used the vehicle, whatever its status.
    pub async fn count_for_vehicle(&self, vehicle_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM trips WHERE vehicle_id = ?1")
            .bind(vehicle_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Completed trips departing between `from` and `to`, newest first.
    pub async fn completed_between(
        &self,
        driver_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT * FROM trips
            WHERE status = 'completed' AND departure_date BETWEEN ?1 AND ?2
              AND (?3 IS NULL OR driver_id = ?3)
            ORDER BY departure_date DESC, departure_time DESC"#,
        )
        .bind(from)
        .bind(to)
        .bind(driver_id)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM trips")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(TripStatus, i64)>, AppError> {
        let rows = sqlx::query_as::<_, (TripStatus, i64)>(
            "SELECT status, COUNT(*) FROM trips GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn count_scheduled_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM trips
            WHERE status = 'scheduled' AND departure_date BETWEEN ?1 AND ?2"#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    pub async fn upcoming(&self, from: NaiveDate, limit: i64) -> Result<Vec<Trip>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT * FROM trips
            WHERE status = 'scheduled' AND departure_date >= ?1
            ORDER BY departure_date, departure_time
            LIMIT ?2"#,
        )
        .bind(from)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(trips)
    }
}
