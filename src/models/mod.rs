pub mod notification;
pub mod settings;
pub mod trip;
pub mod user;
pub mod vehicle;
