use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    db::DbPool,
    models::settings::MessageTemplates,
    scheduler::TripScheduler,
    services::{
        dashboard::DashboardService,
        matrix::{MatrixGateway, MessagingGateway},
        notifications::{LogPushChannel, NotificationDispatcher, PushChannel},
        trip_actions::TripService,
        trips::TripStore,
        user_actions::UserService,
        users::UserStore,
        vehicle_actions::VehicleService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub clock: Arc<dyn Clock>,
    pub users: UserService,
    pub vehicles: VehicleService,
    pub trips: TripService,
    pub notifications: NotificationDispatcher,
    pub dashboard: DashboardService,
    pub scheduler: Arc<TripScheduler>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        gateway: Arc<dyn MessagingGateway>,
        push: Arc<dyn PushChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let templates = MessageTemplates::default();
        let users = UserStore::new(db.clone());
        let notifications = NotificationDispatcher::new(
            db.clone(),
            users.clone(),
            push,
            clock.clone(),
            config.broadcast_concurrency,
        );
        let trips = TripService::new(
            db.clone(),
            notifications.clone(),
            gateway.clone(),
            templates.clone(),
            config.timezone,
            clock.clone(),
            config.scheduler.gateway_timeout,
        );
        let scheduler = Arc::new(TripScheduler::new(
            TripStore::new(db.clone()),
            users,
            notifications.clone(),
            gateway,
            templates,
            config.scheduler.clone(),
            config.timezone,
            clock.clone(),
        ));

        Self {
            dashboard: DashboardService::new(db.clone(), config.timezone),
            vehicles: VehicleService::new(db.clone()),
            users: UserService::new(db.clone(), notifications.clone()),
            trips,
            notifications,
            scheduler,
            clock,
            config,
            db,
        }
    }

    /// Production wiring: Matrix gateway, log-only push, wall clock.
    pub fn from_config(config: AppConfig, db: DbPool) -> Self {
        let gateway = Arc::new(MatrixGateway::new(config.matrix.clone()));
        Self::new(
            config,
            db,
            gateway,
            Arc::new(LogPushChannel),
            Arc::new(SystemClock),
        )
    }
}
