#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::File,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use cucumber::{given, then, when, World as _};
use chrono_tz::Tz;
use fleet::{
    auth::Actor,
    clock::{Clock, ManualClock},
    config::{AppConfig, MatrixConfig, SchedulerConfig},
    db::{init_pool, run_migrations},
    error::AppError,
    models::{
        notification::{NotificationKind, NotificationMeta},
        trip::{NewTrip, Trip, TripStatus, TripUpdate},
        user::{NewUser, Role, User, UserUpdate},
        vehicle::{NewVehicle, Vehicle, VehicleStatus, VehicleUpdate},
    },
    scheduler::{SchedulerHandle, TickReport},
    schedule,
    services::{
        matrix::MessagingGateway,
        notifications::{PushChannel, TestNotification},
        trips::TripStore,
    },
    state::AppState,
};
use tempfile::TempDir;
use tokio::sync::{Notify, RwLock};

const TIMEZONE: Tz = chrono_tz::America::Montevideo;

#[derive(Debug, cucumber::World, Default)]
struct FleetWorld {
    state: Option<TestState>,
    users: HashMap<String, User>,
    vehicles: HashMap<String, Vehicle>,
    trips: HashMap<String, String>,
    last_error: Option<String>,
    reports: Vec<Option<TickReport>>,
    timer: Option<SchedulerHandle>,
    stale_edit_saved: Option<bool>,
}

impl FleetWorld {
    fn test_state(&self) -> &TestState {
        self.state.as_ref().expect("state must be initialised first")
    }

    fn app(&self) -> &AppState {
        &self.test_state().app
    }

    fn user(&self, name: &str) -> &User {
        self.users
            .get(name)
            .unwrap_or_else(|| panic!("unknown user {name}"))
    }

    fn actor(&self, name: &str) -> Actor {
        Actor::from(self.user(name))
    }

    fn vehicle_id(&self, plate: &str) -> String {
        self.vehicles
            .get(plate)
            .unwrap_or_else(|| panic!("unknown vehicle {plate}"))
            .id
            .clone()
    }

    fn local(&self, text: &str) -> DateTime<Utc> {
        local(text, self.test_state().tz)
    }

    fn trip_id(&self, label: &str) -> String {
        self.trips
            .get(label)
            .unwrap_or_else(|| panic!("unknown trip {label}"))
            .clone()
    }

    async fn trip(&self, label: &str) -> Trip {
        self.app()
            .trips
            .get_trip(&self.admin(), &self.trip_id(label))
            .await
            .expect("load trip")
    }

    fn admin(&self) -> Actor {
        Actor {
            id: "bdd-observer".into(),
            name: "observer".into(),
            role: Role::PrincipalAdmin,
        }
    }

    fn record<T>(&mut self, result: Result<T, AppError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(err) => {
                self.last_error = Some(err.kind().to_string());
                None
            }
        }
    }
}

struct TestState {
    app: AppState,
    tz: Tz,
    clock: ManualClock,
    gateway: Arc<RecordingGateway>,
    push: Arc<RecordingPush>,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new(tz: Tz) -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            timezone: tz,
            scheduler: SchedulerConfig::default(),
            broadcast_concurrency: 4,
            matrix: MatrixConfig::default(),
        };

        let db = init_pool(&config.database_url).await?;
        run_migrations(&db).await?;

        let clock = ManualClock::new(local("2025-10-06 08:00", tz));
        let gateway = Arc::new(RecordingGateway::default());
        let push = Arc::new(RecordingPush::default());
        let app = AppState::new(
            config,
            db,
            gateway.clone(),
            push.clone(),
            Arc::new(clock.clone()),
        );
        Ok(Self {
            app,
            tz,
            clock,
            gateway,
            push,
            _root: root,
        })
    }
}

/// Messaging gateway double: records messages, fails for chosen addresses.
#[derive(Default)]
struct RecordingGateway {
    disabled: AtomicBool,
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    fn messages_to(&self, address: &str, containing: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, text)| to == address && text.contains(containing))
            .count()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    async fn send(&self, address: &str, message: &str) -> Result<(), AppError> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(AppError::Gateway(format!("{address} unreachable")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), message.to_string()));
        Ok(())
    }
}

/// Push double. While `held` is set, deliveries announce themselves on
/// `entered` and wait for the write side of `gate` to be released.
#[derive(Default)]
struct RecordingPush {
    failing_users: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<(String, NotificationKind)>>,
    held: AtomicBool,
    entered: Notify,
    gate: Arc<RwLock<()>>,
}

#[async_trait]
impl PushChannel for RecordingPush {
    async fn deliver(
        &self,
        user_id: &str,
        _title: &str,
        _body: &str,
        meta: &NotificationMeta,
    ) -> Result<(), AppError> {
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
        }
        let _open = self.gate.read().await;
        if self.failing_users.lock().unwrap().contains(user_id) {
            return Err(AppError::Gateway("device token expired".into()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((user_id.to_string(), meta.kind));
        Ok(())
    }
}

fn local(text: &str, tz: Tz) -> DateTime<Utc> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
        .unwrap_or_else(|_| panic!("bad local time {text}"));
    schedule::resolve_local(naive, tz).expect("resolvable local time")
}

fn date(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap_or_else(|_| panic!("bad date {text}"))
}

fn from_name<T: serde::de::DeserializeOwned>(name: &str) -> T {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .unwrap_or_else(|_| panic!("unknown value {name}"))
}

fn kind_name(kind: NotificationKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

// ---- setup ----

#[given("a fresh fleet")]
async fn given_fresh_fleet(world: &mut FleetWorld) {
    start_fleet(world, TIMEZONE).await;
}

#[given(regex = r#"^a fresh fleet in "([^"]+)"$"#)]
async fn given_fresh_fleet_in(world: &mut FleetWorld, zone: String) {
    let tz: Tz = zone.parse().expect("known time zone");
    start_fleet(world, tz).await;
}

async fn start_fleet(world: &mut FleetWorld, tz: Tz) {
    world.state = Some(TestState::new(tz).await.expect("state"));
    world.users.clear();
    world.vehicles.clear();
    world.trips.clear();
    world.last_error = None;
    world.reports.clear();
    world.timer = None;
    world.stale_edit_saved = None;
}

#[given(regex = r#"^a principal admin "([^"]+)"$"#)]
async fn given_principal_admin(world: &mut FleetWorld, name: String) {
    add_user(world, &name, Role::PrincipalAdmin, None).await;
}

#[given(regex = r#"^an admin "([^"]+)"$"#)]
async fn given_admin(world: &mut FleetWorld, name: String) {
    add_user(world, &name, Role::Administrative, None).await;
}

#[given(regex = r#"^a driver "([^"]+)"$"#)]
async fn given_driver(world: &mut FleetWorld, name: String) {
    add_user(world, &name, Role::Driver, None).await;
}

#[given(regex = r#"^a driver "([^"]+)" reachable at "([^"]+)"$"#)]
async fn given_reachable_driver(world: &mut FleetWorld, name: String, address: String) {
    add_user(world, &name, Role::Driver, Some(address)).await;
}

#[given(regex = r#"^a vehicle "([^"]+)"$"#)]
async fn given_vehicle(world: &mut FleetWorld, plate: String) {
    let vehicle = world
        .app()
        .vehicles
        .create_vehicle(&world.admin(), new_vehicle(&plate))
        .await
        .expect("register vehicle");
    world.vehicles.insert(plate, vehicle);
}

#[given(regex = r#"^vehicle "([^"]+)" is in maintenance$"#)]
async fn given_vehicle_in_maintenance(world: &mut FleetWorld, plate: String) {
    let update = VehicleUpdate {
        status: Some(VehicleStatus::Maintenance),
        ..VehicleUpdate::default()
    };
    world
        .app()
        .vehicles
        .update_vehicle(&world.admin(), &world.vehicle_id(&plate), update)
        .await
        .expect("send vehicle to the workshop");
}

#[given(regex = r#"^the local time is "([^"]+)"$"#)]
async fn given_local_time(world: &mut FleetWorld, at: String) {
    world.test_state().clock.set(world.local(&at));
}

#[when(regex = r#"^the clock reaches "([^"]+)"$"#)]
async fn when_clock_reaches(world: &mut FleetWorld, at: String) {
    world.test_state().clock.set(world.local(&at));
}

#[given(regex = r#"^the gateway cannot reach "([^"]+)"$"#)]
async fn given_failing_address(world: &mut FleetWorld, address: String) {
    world
        .test_state()
        .gateway
        .failing
        .lock()
        .unwrap()
        .insert(address);
}

#[when(regex = r#"^the gateway can reach "([^"]+)" again$"#)]
async fn when_address_recovers(world: &mut FleetWorld, address: String) {
    world
        .test_state()
        .gateway
        .failing
        .lock()
        .unwrap()
        .remove(&address);
}

#[given("the messaging gateway is disabled")]
async fn given_gateway_disabled(world: &mut FleetWorld) {
    world
        .test_state()
        .gateway
        .disabled
        .store(true, Ordering::SeqCst);
}

#[given(regex = r#"^push delivery fails for "([^"]+)"$"#)]
async fn given_push_fails(world: &mut FleetWorld, name: String) {
    let id = world.user(&name).id.clone();
    world
        .test_state()
        .push
        .failing_users
        .lock()
        .unwrap()
        .insert(id);
}

#[given(
    regex = r#"^"([^"]+)" schedules trip "([^"]+)" for "([^"]+)" with "([^"]+)" on "([^"]+)" at "([^"]+)"$"#
)]
async fn schedule_trip(
    world: &mut FleetWorld,
    admin: String,
    label: String,
    driver: String,
    plate: String,
    day: String,
    time: String,
) {
    let actor = world.actor(&admin);
    let new = NewTrip {
        driver_id: world.user(&driver).id.clone(),
        vehicle_id: world.vehicle_id(&plate),
        departure_date: date(&day),
        departure_time: time,
        return_date: None,
        destination: format!("{label} destination"),
        purpose: "Field work".into(),
        departure_location: None,
        observations: None,
        estimated_distance: Some(42.0),
    };
    let result = world.app().trips.create_trip(&actor, new).await;
    if let Some(trip) = world.record(result) {
        world.trips.insert(label, trip.id);
    }
}

#[given(regex = r#"^trip "([^"]+)" was auto-started early$"#)]
async fn given_premature_start(world: &mut FleetWorld, label: String) {
    let id = world.trip_id(&label);
    let now = world.test_state().clock.now();
    sqlx::query(
        "UPDATE trips SET status = 'in_progress', auto_started = 1, auto_started_at = ?2 WHERE id = ?1",
    )
    .bind(&id)
    .bind(now)
    .execute(&world.app().db)
    .await
    .expect("force premature start");
}

// ---- actions ----

#[when(regex = r#"^"([^"]+)" confirms trip "([^"]+)"$"#)]
async fn confirm_trip(world: &mut FleetWorld, name: String, label: String) {
    let actor = world.actor(&name);
    let id = world.trip_id(&label);
    let result = world
        .app()
        .trips
        .confirm_trip(&actor, &id, Some("On my way".into()))
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" finishes trip "([^"]+)"$"#)]
async fn finish_trip(world: &mut FleetWorld, name: String, label: String) {
    let actor = world.actor(&name);
    let id = world.trip_id(&label);
    let result = world
        .app()
        .trips
        .finish_trip(&actor, &id, Some("No incidents".into()))
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" moves the departure of trip "([^"]+)" to "([^"]+)"$"#)]
async fn move_departure(world: &mut FleetWorld, name: String, label: String, time: String) {
    let update = TripUpdate {
        departure_time: Some(time),
        ..TripUpdate::default()
    };
    update_trip(world, &name, &label, update).await;
}

#[when(regex = r#"^"([^"]+)" changes the purpose of trip "([^"]+)" to "([^"]+)"$"#)]
async fn change_purpose(world: &mut FleetWorld, name: String, label: String, purpose: String) {
    let update = TripUpdate {
        purpose: Some(purpose),
        ..TripUpdate::default()
    };
    update_trip(world, &name, &label, update).await;
}

#[when(regex = r#"^"([^"]+)" cancels trip "([^"]+)"$"#)]
async fn cancel_trip(world: &mut FleetWorld, name: String, label: String) {
    let update = TripUpdate {
        status: Some(TripStatus::Cancelled),
        ..TripUpdate::default()
    };
    update_trip(world, &name, &label, update).await;
}

#[when(regex = r#"^"([^"]+)" deletes trip "([^"]+)"$"#)]
async fn delete_trip(world: &mut FleetWorld, name: String, label: String) {
    let actor = world.actor(&name);
    let id = world.trip_id(&label);
    let result = world.app().trips.delete_trip(&actor, &id).await;
    world.record(result);
}

#[when("the scheduler ticks")]
async fn when_tick(world: &mut FleetWorld) {
    let now = world.test_state().clock.now();
    let report = world.app().scheduler.tick(now).await;
    world.reports.push(report);
}

#[when(regex = r#"^the scheduler ticks at "([^"]+)"$"#)]
async fn when_tick_at(world: &mut FleetWorld, at: String) {
    world.test_state().clock.set(world.local(&at));
    when_tick(world).await;
}

#[when("a second tick starts while the first is still broadcasting")]
async fn when_overlapping_ticks(world: &mut FleetWorld) {
    let now = world.test_state().clock.now();
    let push = world.test_state().push.clone();
    let gate = push.gate.clone().write_owned().await;
    push.held.store(true, Ordering::SeqCst);

    let scheduler = world.app().scheduler.clone();
    let first = tokio::spawn(async move { scheduler.tick(now).await });
    push.entered.notified().await;
    let second = world.app().scheduler.tick(now).await;

    push.held.store(false, Ordering::SeqCst);
    drop(gate);
    let first = first.await.expect("first tick task");
    world.reports.push(first);
    world.reports.push(second);
}

#[when("the scheduler is started")]
async fn when_scheduler_started(world: &mut FleetWorld) {
    let result = world.app().scheduler.start().await;
    if let Some(handle) = world.record(result) {
        world.timer = Some(handle);
    }
}

#[when("the scheduler is stopped")]
async fn when_scheduler_stopped(world: &mut FleetWorld) {
    let handle = world.timer.take().expect("a running scheduler");
    handle.stop().await;
}

#[when(regex = r#"^"([^"]+)" runs the premature start repair$"#)]
async fn when_repair_as(world: &mut FleetWorld, name: String) {
    let actor = world.actor(&name);
    let result = world.app().scheduler.repair_premature_starts_as(&actor).await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" moves trip "([^"]+)" to vehicle "([^"]+)"$"#)]
async fn move_vehicle(world: &mut FleetWorld, name: String, label: String, plate: String) {
    let update = TripUpdate {
        vehicle_id: Some(world.vehicle_id(&plate)),
        ..TripUpdate::default()
    };
    update_trip(world, &name, &label, update).await;
}

#[when(regex = r#"^an edit of trip "([^"]+)" prepared before the scheduler ticks at "([^"]+)" is saved$"#)]
async fn when_stale_edit(world: &mut FleetWorld, label: String, at: String) {
    let store = TripStore::new(world.app().db.clone());
    let mut stale = store
        .require(&world.trip_id(&label))
        .await
        .expect("load trip");
    when_tick_at(world, at).await;
    stale.purpose = "Edited from a stale copy".into();
    let saved = store
        .update(&stale, TripStatus::Scheduled)
        .await
        .expect("save edit");
    world.stale_edit_saved = Some(saved);
}

#[when(regex = r#"^"([^"]+)" marks the latest notification of "([^"]+)" as read$"#)]
async fn when_mark_read(world: &mut FleetWorld, name: String, owner: String) {
    let inbox = world
        .app()
        .notifications
        .inbox(&world.actor(&owner), false)
        .await
        .expect("inbox");
    let latest = inbox.notifications.first().expect("a notification").id.clone();
    let result = world
        .app()
        .notifications
        .mark_read(&world.actor(&name), &latest)
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" marks all notifications as read$"#)]
async fn when_mark_all_read(world: &mut FleetWorld, name: String) {
    let result = world
        .app()
        .notifications
        .mark_all_read(&world.actor(&name))
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" sends a test notification to everyone$"#)]
async fn when_test_broadcast(world: &mut FleetWorld, name: String) {
    let request = TestNotification {
        send_to_all: true,
        ..TestNotification::default()
    };
    let result = world
        .app()
        .notifications
        .send_test(&world.actor(&name), request)
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" sends a test notification to "([^"]+)"$"#)]
async fn when_test_to_user(world: &mut FleetWorld, name: String, target: String) {
    let request = TestNotification {
        user_id: Some(world.user(&target).id.clone()),
        ..TestNotification::default()
    };
    let result = world
        .app()
        .notifications
        .send_test(&world.actor(&name), request)
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" registers vehicle "([^"]+)"$"#)]
async fn when_register_vehicle(world: &mut FleetWorld, name: String, plate: String) {
    let result = world
        .app()
        .vehicles
        .create_vehicle(&world.actor(&name), new_vehicle(&plate))
        .await;
    if let Some(vehicle) = world.record(result) {
        world.vehicles.insert(plate, vehicle);
    }
}

#[when(regex = r#"^"([^"]+)" sets vehicle "([^"]+)" to "([^"]+)"$"#)]
async fn when_set_vehicle_status(world: &mut FleetWorld, name: String, plate: String, status: String) {
    let update = VehicleUpdate {
        status: Some(from_name(&status)),
        ..VehicleUpdate::default()
    };
    let result = world
        .app()
        .vehicles
        .update_vehicle(&world.actor(&name), &world.vehicle_id(&plate), update)
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" deletes vehicle "([^"]+)"$"#)]
async fn when_delete_vehicle(world: &mut FleetWorld, name: String, plate: String) {
    let result = world
        .app()
        .vehicles
        .delete_vehicle(&world.actor(&name), &world.vehicle_id(&plate))
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" deactivates "([^"]+)"$"#)]
async fn when_deactivate(world: &mut FleetWorld, name: String, target: String) {
    let target_id = world.user(&target).id.clone();
    let result = world
        .app()
        .users
        .deactivate_user(&world.actor(&name), &target_id)
        .await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" changes the role of "([^"]+)" to "([^"]+)"$"#)]
async fn when_change_role(world: &mut FleetWorld, name: String, target: String, role: String) {
    let target_id = world.user(&target).id.clone();
    let update = UserUpdate {
        role: Some(from_name(&role)),
        ..UserUpdate::default()
    };
    let result = world
        .app()
        .users
        .update_user(&world.actor(&name), &target_id, update)
        .await;
    if let Some(user) = world.record(result) {
        world.users.insert(target, user);
    }
}

#[when(regex = r#"^"([^"]+)" looks up "([^"]+)"$"#)]
async fn when_look_up(world: &mut FleetWorld, name: String, target: String) {
    let target_id = world.user(&target).id.clone();
    let result = world
        .app()
        .users
        .get_user(&world.actor(&name), &target_id)
        .await;
    world.record(result);
}

#[when("the premature start repair runs")]
async fn when_repair(world: &mut FleetWorld) {
    let now = world.test_state().clock.now();
    let result = world.app().scheduler.repair_premature_starts(now).await;
    world.record(result);
}

#[when(regex = r#"^"([^"]+)" forces overdue trips to start$"#)]
async fn when_force_overdue(world: &mut FleetWorld, name: String) {
    let actor = world.actor(&name);
    let result = world.app().scheduler.force_start_overdue_as(&actor).await;
    world.record(result);
}

// ---- assertions ----

#[then(regex = r#"^trip "([^"]+)" has status "([^"]+)"$"#)]
async fn then_status(world: &mut FleetWorld, label: String, status: String) {
    let trip = world.trip(&label).await;
    assert_eq!(trip.status.as_str(), status);
}

#[then(regex = r#"^trip "([^"]+)" has "([^"]+)" set to (true|false)$"#)]
async fn then_flag(world: &mut FleetWorld, label: String, field: String, expected: String) {
    let trip = world.trip(&label).await;
    let json = serde_json::to_value(&trip).expect("serialize trip");
    let value = field
        .split('.')
        .fold(&json, |value, key| &value[key]);
    assert_eq!(
        value.as_bool(),
        Some(expected == "true"),
        "{field} of trip {label}"
    );
}

#[then(regex = r#"^trip "([^"]+)" has return time "([^"]+)"$"#)]
async fn then_return_time(world: &mut FleetWorld, label: String, time: String) {
    let trip = world.trip(&label).await;
    assert_eq!(trip.return_time.as_deref(), Some(time.as_str()));
}

#[then(regex = r#"^trip "([^"]+)" no longer exists$"#)]
async fn then_trip_deleted(world: &mut FleetWorld, label: String) {
    let id = world.trip_id(&label);
    let result = world.app().trips.get_trip(&world.admin(), &id).await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[then(regex = r#"^the last action failed with "([^"]+)"$"#)]
async fn then_failed(world: &mut FleetWorld, kind: String) {
    assert_eq!(world.last_error.as_deref(), Some(kind.as_str()));
}

#[then("the last action succeeded")]
async fn then_succeeded(world: &mut FleetWorld) {
    assert_eq!(world.last_error, None);
}

#[then(regex = r#"^every user has (\d+) "([^"]+)" notifications? for trip "([^"]+)"$"#)]
async fn then_every_user_notified(
    world: &mut FleetWorld,
    expected: usize,
    kind: String,
    label: String,
) {
    let notifications = world
        .app()
        .notifications
        .for_trip(&world.trip_id(&label))
        .await
        .expect("notifications for trip");
    for user in world.users.values() {
        let count = notifications
            .iter()
            .filter(|n| n.user_id == user.id && kind_name(n.kind) == kind)
            .count();
        assert_eq!(count, expected, "{kind} notifications for {}", user.name);
    }
}

#[then(regex = r#"^"([^"]+)" has (\d+) "([^"]+)" notifications? for trip "([^"]+)"$"#)]
async fn then_user_notified(
    world: &mut FleetWorld,
    name: String,
    expected: usize,
    kind: String,
    label: String,
) {
    let user_id = world.user(&name).id.clone();
    let notifications = world
        .app()
        .notifications
        .for_trip(&world.trip_id(&label))
        .await
        .expect("notifications for trip");
    let count = notifications
        .iter()
        .filter(|n| n.user_id == user_id && kind_name(n.kind) == kind)
        .count();
    assert_eq!(count, expected, "{kind} notifications for {name}");
}

#[then(regex = r#"^"([^"]+)" has (\d+) unread notifications?$"#)]
async fn then_unread(world: &mut FleetWorld, name: String, expected: i64) {
    let actor = world.actor(&name);
    let inbox = world
        .app()
        .notifications
        .inbox(&actor, true)
        .await
        .expect("inbox");
    assert_eq!(inbox.unread_count, expected);
}

#[then(regex = r#"^the gateway sent (\d+) messages? to "([^"]+)" containing "([^"]+)"$"#)]
async fn then_gateway_sent(world: &mut FleetWorld, expected: usize, address: String, text: String) {
    assert_eq!(
        world.test_state().gateway.messages_to(&address, &text),
        expected
    );
}

#[then(regex = r#"^vehicle "([^"]+)" is "([^"]+)"$"#)]
async fn then_vehicle_status(world: &mut FleetWorld, plate: String, status: String) {
    let vehicle = world
        .app()
        .vehicles
        .get_vehicle(&world.vehicle_id(&plate))
        .await
        .expect("load vehicle");
    let actual = serde_json::to_value(vehicle.status).expect("serialize status");
    assert_eq!(actual, status.as_str());
}

#[then(regex = r#"^(\d+) of the ticks? ran$"#)]
async fn then_ticks_ran(world: &mut FleetWorld, expected: usize) {
    let ran = world.reports.iter().filter(|report| report.is_some()).count();
    assert_eq!(ran, expected);
}

#[then(regex = r#"^the scheduler skipped (\d+) ticks?$"#)]
async fn then_ticks_skipped(world: &mut FleetWorld, expected: u64) {
    assert_eq!(world.app().scheduler.status().ticks_skipped, expected);
}

#[then(regex = r#"^the scheduler is (running|not running)$"#)]
async fn then_scheduler_running(world: &mut FleetWorld, state: String) {
    let status = world.app().scheduler.status();
    assert_eq!(status.running, state == "running");
    assert_eq!(status.tick_interval_secs, 60);
}

#[then("the stale edit was refused")]
async fn then_stale_edit_refused(world: &mut FleetWorld) {
    assert_eq!(world.stale_edit_saved, Some(false));
}

#[then(regex = r#"^trip "([^"]+)" has departure time "([^"]+)"$"#)]
async fn then_departure_time(world: &mut FleetWorld, label: String, time: String) {
    assert_eq!(world.trip(&label).await.departure_time, time);
}

#[then(regex = r#"^"([^"]+)" has (\d+) "([^"]+)" notifications?$"#)]
async fn then_user_kind_count(world: &mut FleetWorld, name: String, expected: usize, kind: String) {
    let inbox = world
        .app()
        .notifications
        .inbox(&world.actor(&name), false)
        .await
        .expect("inbox");
    let count = inbox
        .notifications
        .iter()
        .filter(|n| kind_name(n.kind) == kind)
        .count();
    assert_eq!(count, expected, "{kind} notifications for {name}");
}

#[then(regex = r#"^the dashboard lists (\d+) upcoming and (\d+) active trips?$"#)]
async fn then_dashboard_lists(world: &mut FleetWorld, upcoming: usize, active: usize) {
    let now = world.test_state().clock.now();
    let dashboard = &world.app().dashboard;
    assert_eq!(dashboard.upcoming_trips(now, 10).await.expect("upcoming").len(), upcoming);
    assert_eq!(dashboard.active_trips().await.expect("active").len(), active);
}

#[then(regex = r#"^"([^"]+)" sees (\d+) active and (\d+) completed trips? today$"#)]
async fn then_daily_view(world: &mut FleetWorld, name: String, active: usize, completed: usize) {
    let now = world.test_state().clock.now();
    let result = world.app().dashboard.daily_trips(&world.actor(&name), now).await;
    if let Some(daily) = world.record(result) {
        assert_eq!(daily.active_trips.len(), active);
        assert_eq!(daily.completed_trips.len(), completed);
    }
}

#[when(regex = r#"^"([^"]+)" opens the weekly view$"#)]
async fn when_weekly_view(world: &mut FleetWorld, name: String) {
    let now = world.test_state().clock.now();
    let result = world.app().dashboard.weekly_trips(&world.actor(&name), now).await;
    world.record(result);
}

#[then(regex = r#"^"([^"]+)" completed (\d+) trips? this week$"#)]
async fn then_weekly_view(world: &mut FleetWorld, name: String, expected: usize) {
    let now = world.test_state().clock.now();
    let trips = world
        .app()
        .dashboard
        .weekly_trips(&world.actor(&name), now)
        .await
        .expect("weekly trips");
    assert_eq!(trips.len(), expected);
}

#[then(regex = r#"^(\d+) vehicles? (?:is|are) available on "([^"]+)"$"#)]
async fn then_available_vehicles(world: &mut FleetWorld, expected: usize, day: String) {
    let vehicles = world
        .app()
        .vehicles
        .available_vehicles(Some(date(&day)), None)
        .await
        .expect("available vehicles");
    assert_eq!(vehicles.len(), expected);
}

#[then(regex = r#"^vehicle "([^"]+)" no longer exists$"#)]
async fn then_vehicle_deleted(world: &mut FleetWorld, plate: String) {
    let result = world
        .app()
        .vehicles
        .get_vehicle(&world.vehicle_id(&plate))
        .await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[then(regex = r#"^"([^"]+)" is (active|inactive)$"#)]
async fn then_user_active(world: &mut FleetWorld, name: String, state: String) {
    let user = world
        .app()
        .users
        .get_user(&world.admin(), &world.user(&name).id)
        .await
        .expect("load user");
    assert_eq!(user.is_active, state == "active");
}

#[then(regex = r#"^"([^"]+)" lists (\d+) drivers?$"#)]
async fn then_lists_drivers(world: &mut FleetWorld, name: String, expected: usize) {
    let drivers = world
        .app()
        .users
        .list_drivers(&world.actor(&name))
        .await
        .expect("list drivers");
    assert_eq!(drivers.len(), expected);
}

#[then(regex = r#"^the scheduler reports (\d+) completed ticks?$"#)]
async fn then_scheduler_status(world: &mut FleetWorld, expected: u64) {
    let status = world.app().scheduler.status();
    assert!(!status.running);
    assert_eq!(status.ticks_run, expected);
    assert_eq!(status.last_tick_at, Some(world.test_state().clock.now()));
    assert!(status.next_run_at > status.last_tick_at);
}

#[then(regex = r#"^the last tick started (\d+) trips?$"#)]
async fn then_tick_started(world: &mut FleetWorld, expected: usize) {
    let report = world
        .reports
        .iter()
        .rev()
        .flatten()
        .next()
        .expect("a completed tick");
    assert_eq!(report.auto_starts.done, expected);
}

#[then(regex = r#"^the last tick reported (\d+) failed (confirmation|pre-trip) nudges?$"#)]
async fn then_tick_nudge_failures(world: &mut FleetWorld, expected: usize, which: String) {
    let report = world
        .reports
        .iter()
        .rev()
        .flatten()
        .next()
        .expect("a completed tick");
    let outcome = match which.as_str() {
        "confirmation" => report.confirmation_nudges,
        _ => report.pre_trip_nudges,
    };
    assert_eq!(outcome.failed, expected);
}

#[then(regex = r#"^"([^"]+)" sees (\d+) trips?$"#)]
async fn then_sees_trips(world: &mut FleetWorld, name: String, expected: usize) {
    let actor = world.actor(&name);
    let trips = world
        .app()
        .trips
        .list_trips(&actor, Default::default())
        .await
        .expect("list trips");
    assert_eq!(trips.len(), expected);
}

#[then(regex = r#"^the dashboard shows (\d+) active trips? and (\d+) vehicles? in use$"#)]
async fn then_dashboard(world: &mut FleetWorld, active: i64, in_use: i64) {
    let now = world.test_state().clock.now();
    let stats = world.app().dashboard.stats(now).await.expect("stats");
    assert_eq!(stats.active_trips, active);
    assert_eq!(stats.vehicles_in_use, in_use);
}

async fn add_user(world: &mut FleetWorld, name: &str, role: Role, contact: Option<String>) {
    let new = NewUser {
        name: name.to_string(),
        email: format!("{}@fleet.test", name.to_lowercase()),
        role,
        contact_address: contact,
    };
    let user = world
        .app()
        .users
        .create_user(&world.admin(), new)
        .await
        .expect("create user");
    world.users.insert(name.to_string(), user);
}

fn new_vehicle(plate: &str) -> NewVehicle {
    NewVehicle {
        license_plate: plate.to_string(),
        brand: "Toyota".into(),
        model: "Hilux".into(),
    }
}

async fn update_trip(world: &mut FleetWorld, name: &str, label: &str, update: TripUpdate) {
    let actor = world.actor(name);
    let id = world.trip_id(label);
    let result = world.app().trips.update_trip(&actor, &id, update).await;
    world.record(result);
}

#[tokio::main]
async fn main() {
    FleetWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
