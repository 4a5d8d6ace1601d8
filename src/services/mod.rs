pub mod dashboard;
pub mod matrix;
pub mod notifications;
pub mod trip_actions;
pub mod trips;
pub mod user_actions;
pub mod users;
pub mod vehicle_actions;
pub mod vehicles;
