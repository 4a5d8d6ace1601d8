//! Trip lifecycle engine.
//!
//! Every tick runs four independent sweeps over the trip store:
//!
//! * departure reminders broadcast shortly before a trip leaves,
//! * confirmation nudges for drivers that have not confirmed yet,
//! * pre-trip nudges for confirmed trips about to leave,
//! * automatic start of confirmed trips whose departure instant has passed.
//!
//! Each one-time effect is guarded by a flag on the trip that is claimed with a
//! conditional update before the effect happens, so repeated or catch-up ticks
//! never send twice. Ticks themselves never overlap: a tick that finds another
//! one running is skipped.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    auth::Actor,
    clock::Clock,
    config::SchedulerConfig,
    error::AppError,
    models::{
        notification::{NotificationKind, NotificationMeta},
        settings::{render_template, MessageTemplates, TemplateContext},
        trip::{Trip, TripStatus},
    },
    schedule,
    services::{
        matrix::MessagingGateway,
        notifications::NotificationDispatcher,
        trips::{TripFlag, TripStore},
        users::UserStore,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub reminders: SweepOutcome,
    pub confirmation_nudges: SweepOutcome,
    pub pre_trip_nudges: SweepOutcome,
    pub auto_starts: SweepOutcome,
    /// Sweeps aborted by a query-level failure.
    pub failed_sweeps: Vec<&'static str>,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            reminders: SweepOutcome::default(),
            confirmation_nudges: SweepOutcome::default(),
            pre_trip_nudges: SweepOutcome::default(),
            auto_starts: SweepOutcome::default(),
            failed_sweeps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub examined: usize,
    pub reverted: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueReport {
    pub examined: usize,
    pub started: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub tick_interval_secs: u64,
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

#[derive(Debug, Default)]
struct StatusState {
    ticks_run: u64,
    ticks_skipped: u64,
    last_tick_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    last_report: Option<TickReport>,
}

pub struct TripScheduler {
    trips: TripStore,
    users: UserStore,
    dispatcher: NotificationDispatcher,
    gateway: Arc<dyn MessagingGateway>,
    templates: MessageTemplates,
    config: SchedulerConfig,
    tz: Tz,
    clock: Arc<dyn Clock>,
    tick_lock: AsyncMutex<()>,
    started: AtomicBool,
    state: Mutex<StatusState>,
}

/// Owned by whoever started the scheduler; stopping it ends the timer loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!("scheduler loop ended abnormally: {err}");
        }
    }
}

impl TripScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trips: TripStore,
        users: UserStore,
        dispatcher: NotificationDispatcher,
        gateway: Arc<dyn MessagingGateway>,
        templates: MessageTemplates,
        config: SchedulerConfig,
        tz: Tz,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            trips,
            users,
            dispatcher,
            gateway,
            templates,
            config,
            tz,
            clock,
            tick_lock: AsyncMutex::new(()),
            started: AtomicBool::new(false),
            state: Mutex::new(StatusState::default()),
        }
    }

    /// Repairs premature starts once, then ticks on the configured interval until stopped.
    pub async fn start(self: &Arc<Self>) -> Result<SchedulerHandle, AppError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::Config("trip scheduler already started".into()));
        }

        match self.repair_premature_starts(self.clock.now()).await {
            Ok(report) if !report.reverted.is_empty() => {
                warn!(reverted = ?report.reverted, "reverted prematurely started trips");
            }
            Ok(_) => {}
            Err(err) => error!("premature start repair failed: {err}"),
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move { scheduler.run_loop(shutdown_rx).await });
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "trip scheduler started"
        );
        Ok(SchedulerHandle { shutdown, task })
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    let now = self.clock.now();
                    // A panicking tick is contained in its own task.
                    if let Err(err) = tokio::spawn(async move { scheduler.tick(now).await }).await {
                        error!("scheduler tick aborted: {err}");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("scheduler loop: shutdown requested");
                    break;
                }
            }
        }

        self.started.store(false, Ordering::SeqCst);
        info!("trip scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        SchedulerStatus {
            running: self.started.load(Ordering::SeqCst),
            tick_interval_secs: self.config.tick_interval.as_secs(),
            ticks_run: state.ticks_run,
            ticks_skipped: state.ticks_skipped,
            last_tick_at: state.last_tick_at,
            next_run_at: state.next_run_at,
            last_report: state.last_report.clone(),
        }
    }

    /// Runs every sweep for `now`. Returns `None` when another tick is still running.
    pub async fn tick(&self, now: DateTime<Utc>) -> Option<TickReport> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            warn!("previous scheduler tick still running, skipping");
            self.update_state(|state| state.ticks_skipped += 1);
            return None;
        };

        let mut report = TickReport::new(now);
        report.reminders = self
            .guard_sweep("reminder", &mut report.failed_sweeps, self.sweep_reminders(now))
            .await;
        report.confirmation_nudges = self
            .guard_sweep(
                "confirmation_nudge",
                &mut report.failed_sweeps,
                self.sweep_confirmation_nudges(now),
            )
            .await;
        report.pre_trip_nudges = self
            .guard_sweep(
                "pre_trip_nudge",
                &mut report.failed_sweeps,
                self.sweep_pre_trip_nudges(now),
            )
            .await;
        report.auto_starts = self
            .guard_sweep("auto_start", &mut report.failed_sweeps, self.sweep_auto_start(now))
            .await;

        let next_run_at = chrono::Duration::from_std(self.config.tick_interval)
            .ok()
            .map(|interval| now + interval);
        self.update_state(|state| {
            state.ticks_run += 1;
            state.last_tick_at = Some(now);
            state.next_run_at = next_run_at;
            state.last_report = Some(report.clone());
        });
        Some(report)
    }

    async fn guard_sweep(
        &self,
        name: &'static str,
        failed_sweeps: &mut Vec<&'static str>,
        sweep: impl Future<Output = Result<SweepOutcome, AppError>>,
    ) -> SweepOutcome {
        match sweep.await {
            Ok(outcome) => {
                if outcome.done > 0 || outcome.failed > 0 {
                    info!(sweep = name, done = outcome.done, failed = outcome.failed, "sweep finished");
                }
                outcome
            }
            Err(err) => {
                error!(sweep = name, error = %err, "sweep aborted");
                failed_sweeps.push(name);
                SweepOutcome::default()
            }
        }
    }

    fn update_state(&self, apply: impl FnOnce(&mut StatusState)) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut state);
    }

    /// Broadcast reminder for scheduled trips departing inside the tolerance band.
    async fn sweep_reminders(&self, now: DateTime<Utc>) -> Result<SweepOutcome, AppError> {
        let span = self.config.reminder_lead.max(self.config.reminder_band_max);
        let (from, to) = schedule::local_date_window(now, span, self.tz);
        let candidates = self.trips.reminder_candidates(from, to).await?;

        let mut outcome = SweepOutcome::default();
        for trip in candidates {
            match self.remind(&trip, now).await {
                Ok(true) => outcome.done += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(trip_id = %trip.id, error = %err, "departure reminder failed");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn remind(&self, trip: &Trip, now: DateTime<Utc>) -> Result<bool, AppError> {
        let remaining = trip.departure_instant(self.tz)? - now;
        if remaining < self.config.reminder_band_min || remaining > self.config.reminder_band_max {
            return Ok(false);
        }
        if !self.trips.claim_flag(&trip.id, TripFlag::Reminder, now).await? {
            return Ok(false);
        }

        let driver = self.driver_name(&trip.driver_id).await;
        let title = "Trip departing soon";
        let body = format!(
            "{driver}'s trip to {} departs at {}",
            trip.destination, trip.departure_time
        );
        let meta = NotificationMeta::for_trip(NotificationKind::TripReminder, &trip.id)
            .with("destination", trip.destination.as_str())
            .with("departureTime", trip.departure_time.as_str());

        if let Err(err) = self
            .dispatcher
            .send_to_all_except(None, title, &body, &meta)
            .await
        {
            self.trips.release_flag(&trip.id, TripFlag::Reminder).await?;
            return Err(err);
        }
        info!(trip_id = %trip.id, destination = %trip.destination, "departure reminder sent");
        Ok(true)
    }

    /// Out-of-band nudge for trips the driver has left unconfirmed past the grace delay.
    async fn sweep_confirmation_nudges(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, AppError> {
        if !self.gateway.is_enabled() {
            return Ok(SweepOutcome::default());
        }
        let cutoff = now - self.config.confirmation_nudge_delay;
        let candidates = self.trips.confirmation_nudge_candidates(cutoff).await?;

        let mut outcome = SweepOutcome::default();
        for trip in candidates {
            let result = self
                .nudge(
                    &trip,
                    TripFlag::ConfirmationReminder,
                    &self.templates.confirmation_reminder,
                    now,
                )
                .await;
            tally(&mut outcome, &trip, "confirmation nudge", result);
        }
        Ok(outcome)
    }

    /// Out-of-band nudge for confirmed trips departing within the lookahead.
    async fn sweep_pre_trip_nudges(&self, now: DateTime<Utc>) -> Result<SweepOutcome, AppError> {
        if !self.gateway.is_enabled() {
            return Ok(SweepOutcome::default());
        }
        let (from, to) = schedule::local_date_window(now, self.config.pre_trip_lookahead, self.tz);
        let candidates = self.trips.pre_trip_nudge_candidates(from, to).await?;

        let mut outcome = SweepOutcome::default();
        for trip in candidates {
            let remaining = match trip.departure_instant(self.tz) {
                Ok(departure) => departure - now,
                Err(err) => {
                    tally(&mut outcome, &trip, "pre-trip nudge", Err(err));
                    continue;
                }
            };
            if remaining < chrono::Duration::zero() || remaining > self.config.pre_trip_lookahead {
                continue;
            }
            let result = self
                .nudge(
                    &trip,
                    TripFlag::PreTripReminder,
                    &self.templates.pre_trip_reminder,
                    now,
                )
                .await;
            tally(&mut outcome, &trip, "pre-trip nudge", result);
        }
        Ok(outcome)
    }

    async fn nudge(
        &self,
        trip: &Trip,
        flag: TripFlag,
        template: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(driver) = self.users.get(&trip.driver_id).await? else {
            debug!(trip_id = %trip.id, "driver record missing, no nudge");
            return Ok(false);
        };
        let Some(address) = driver.contact() else {
            debug!(trip_id = %trip.id, driver = %driver.name, "driver has no contact address");
            return Ok(false);
        };
        if !self.trips.claim_flag(&trip.id, flag, now).await? {
            return Ok(false);
        }

        let message = render_template(
            template,
            &TemplateContext {
                driver: &driver.name,
                destination: &trip.destination,
                date: schedule::format_local_date(&trip.departure_date),
                time: &trip.departure_time,
            },
        );
        let sent = tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway.send(address, &message),
        )
        .await
        .unwrap_or_else(|_| Err(AppError::Gateway("send timed out".into())));

        match sent {
            Ok(()) => Ok(true),
            Err(err) => {
                self.trips.release_flag(&trip.id, flag).await?;
                Err(err)
            }
        }
    }

    /// scheduled → in_progress for confirmed trips whose departure instant has passed.
    async fn sweep_auto_start(&self, now: DateTime<Utc>) -> Result<SweepOutcome, AppError> {
        let candidates = self.trips.auto_start_candidates().await?;
        if !candidates.is_empty() {
            debug!(count = candidates.len(), "checking confirmed trips for auto-start");
        }

        let mut outcome = SweepOutcome::default();
        for trip in candidates {
            let result = self.auto_start(&trip, now).await;
            tally(&mut outcome, &trip, "auto-start", result);
        }
        Ok(outcome)
    }

    async fn auto_start(&self, trip: &Trip, now: DateTime<Utc>) -> Result<bool, AppError> {
        let departure = trip.departure_instant(self.tz)?;
        if now < departure {
            return Ok(false);
        }
        if !self.trips.mark_auto_started(&trip.id, now).await? {
            return Ok(false);
        }
        info!(trip_id = %trip.id, destination = %trip.destination, %departure, "trip auto-started");
        self.announce_start(trip).await;
        Ok(true)
    }

    async fn announce_start(&self, trip: &Trip) {
        let driver = self.driver_name(&trip.driver_id).await;
        let body = format!("{driver}'s trip to {} has started", trip.destination);
        let meta = NotificationMeta::for_trip(NotificationKind::TripStarted, &trip.id)
            .with("driverName", driver.as_str())
            .with("destination", trip.destination.as_str());
        if let Err(err) = self
            .dispatcher
            .send_to_all_except(None, "Trip started", &body, &meta)
            .await
        {
            error!(trip_id = %trip.id, error = %err, "could not announce trip start");
        }
    }

    /// Reverts auto-started trips whose departure instant is still in the future.
    pub async fn repair_premature_starts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<RepairReport, AppError> {
        let candidates = self.trips.auto_started_in_progress().await?;
        let mut report = RepairReport {
            examined: candidates.len(),
            ..RepairReport::default()
        };
        for trip in candidates {
            let departure = match trip.departure_instant(self.tz) {
                Ok(departure) => departure,
                Err(err) => {
                    warn!(trip_id = %trip.id, error = %err, "cannot check trip for premature start");
                    continue;
                }
            };
            if now < departure && self.trips.revert_premature_start(&trip.id, now).await? {
                warn!(trip_id = %trip.id, %departure, "trip was started early, back to scheduled");
                report.reverted.push(trip.id);
            }
        }
        Ok(report)
    }

    /// Starts every scheduled trip whose departure instant has passed, confirmed or not.
    pub async fn force_start_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<OverdueReport, AppError> {
        let candidates = self.trips.with_status(TripStatus::Scheduled).await?;
        let mut report = OverdueReport {
            examined: candidates.len(),
            ..OverdueReport::default()
        };
        for trip in candidates {
            let departure = match trip.departure_instant(self.tz) {
                Ok(departure) => departure,
                Err(err) => {
                    warn!(trip_id = %trip.id, error = %err, "cannot check overdue trip");
                    continue;
                }
            };
            if now < departure || !self.trips.force_start(&trip.id, now).await? {
                continue;
            }
            info!(trip_id = %trip.id, confirmed = trip.is_confirmed(), "overdue trip started");
            if self
                .trips
                .claim_flag(&trip.id, TripFlag::StartNotification, now)
                .await?
            {
                self.announce_start(&trip).await;
            }
            report.started.push(trip.id);
        }
        Ok(report)
    }

    /// Administrative escape hatch for [`Self::repair_premature_starts`].
    pub async fn repair_premature_starts_as(&self, actor: &Actor) -> Result<RepairReport, AppError> {
        actor.require_admin()?;
        info!(actor = %actor.name, "manual premature start repair");
        self.repair_premature_starts(self.clock.now()).await
    }

    /// Administrative escape hatch for [`Self::force_start_overdue`].
    pub async fn force_start_overdue_as(&self, actor: &Actor) -> Result<OverdueReport, AppError> {
        actor.require_admin()?;
        info!(actor = %actor.name, "manual overdue trip re-check");
        let _guard = self.tick_lock.lock().await;
        self.force_start_overdue(self.clock.now()).await
    }

    async fn driver_name(&self, driver_id: &str) -> String {
        match self.users.get(driver_id).await {
            Ok(Some(driver)) => driver.name,
            Ok(None) => "Unassigned driver".to_string(),
            Err(err) => {
                warn!(driver_id, error = %err, "driver lookup failed");
                "Unknown driver".to_string()
            }
        }
    }
}

fn tally(outcome: &mut SweepOutcome, trip: &Trip, what: &str, result: Result<bool, AppError>) {
    match result {
        Ok(true) => outcome.done += 1,
        Ok(false) => {}
        Err(err) => {
            warn!(trip_id = %trip.id, error = %err, "{what} failed");
            outcome.failed += 1;
        }
    }
}
