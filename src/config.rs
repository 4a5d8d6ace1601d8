use std::{env, str::FromStr, time::Duration};

use chrono_tz::Tz;

use crate::error::AppError;

pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_REMINDER_LEAD_MINUTES: i64 = 10;
pub const DEFAULT_REMINDER_BAND_MIN_MINUTES: i64 = 9;
pub const DEFAULT_REMINDER_BAND_MAX_MINUTES: i64 = 11;
pub const DEFAULT_CONFIRMATION_NUDGE_DELAY_MINUTES: i64 = 10;
pub const DEFAULT_PRE_TRIP_LOOKAHEAD_MINUTES: i64 = 15;
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BROADCAST_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub timezone: Tz,
    pub scheduler: SchedulerConfig,
    pub broadcast_concurrency: usize,
    pub matrix: MatrixConfig,
}

/// Timing knobs of the trip lifecycle engine.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// How far ahead of a departure the reminder sweep looks for candidates.
    pub reminder_lead: chrono::Duration,
    /// Reminders fire only while the time left sits inside this band.
    pub reminder_band_min: chrono::Duration,
    pub reminder_band_max: chrono::Duration,
    /// Unconfirmed trips older than this get an out-of-band nudge.
    pub confirmation_nudge_delay: chrono::Duration,
    pub pre_trip_lookahead: chrono::Duration,
    pub gateway_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECS),
            reminder_lead: chrono::Duration::minutes(DEFAULT_REMINDER_LEAD_MINUTES),
            reminder_band_min: chrono::Duration::minutes(DEFAULT_REMINDER_BAND_MIN_MINUTES),
            reminder_band_max: chrono::Duration::minutes(DEFAULT_REMINDER_BAND_MAX_MINUTES),
            confirmation_nudge_delay: chrono::Duration::minutes(
                DEFAULT_CONFIRMATION_NUDGE_DELAY_MINUTES,
            ),
            pre_trip_lookahead: chrono::Duration::minutes(DEFAULT_PRE_TRIP_LOOKAHEAD_MINUTES),
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let config = Self {
            tick_interval: Duration::from_secs(parse_var(
                "SCHEDULER_TICK_SECS",
                DEFAULT_TICK_SECS,
            )?),
            reminder_lead: minutes_var(
                "SCHEDULER_REMINDER_LEAD_MINUTES",
                DEFAULT_REMINDER_LEAD_MINUTES,
            )?,
            reminder_band_min: minutes_var(
                "SCHEDULER_REMINDER_BAND_MIN_MINUTES",
                DEFAULT_REMINDER_BAND_MIN_MINUTES,
            )?,
            reminder_band_max: minutes_var(
                "SCHEDULER_REMINDER_BAND_MAX_MINUTES",
                DEFAULT_REMINDER_BAND_MAX_MINUTES,
            )?,
            confirmation_nudge_delay: minutes_var(
                "SCHEDULER_CONFIRMATION_NUDGE_DELAY_MINUTES",
                DEFAULT_CONFIRMATION_NUDGE_DELAY_MINUTES,
            )?,
            pre_trip_lookahead: minutes_var(
                "SCHEDULER_PRE_TRIP_LOOKAHEAD_MINUTES",
                DEFAULT_PRE_TRIP_LOOKAHEAD_MINUTES,
            )?,
            gateway_timeout: Duration::from_secs(parse_var(
                "SCHEDULER_GATEWAY_TIMEOUT_SECS",
                DEFAULT_GATEWAY_TIMEOUT_SECS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.tick_interval.is_zero() {
            return Err(AppError::Config("SCHEDULER_TICK_SECS must be > 0".into()));
        }
        if self.reminder_band_min > self.reminder_band_max {
            return Err(AppError::Config(
                "reminder band minimum exceeds its maximum".into(),
            ));
        }
        if self.reminder_band_min < chrono::Duration::zero() {
            return Err(AppError::Config("reminder band cannot start in the past".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatrixConfig {
    pub homeserver_url: String,
    pub user_id: String,
    pub device_id: String,
    pub access_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://fleet.db?mode=rwc".to_string());

        let timezone = env::var("APP_TIMEZONE")
            .unwrap_or_else(|_| "America/Montevideo".to_string())
            .parse::<Tz>()
            .map_err(|err| AppError::Config(format!("invalid APP_TIMEZONE: {err}")))?;

        let broadcast_concurrency =
            parse_var("NOTIFY_BROADCAST_CONCURRENCY", DEFAULT_BROADCAST_CONCURRENCY)?.max(1);

        let matrix = MatrixConfig {
            homeserver_url: env::var("MATRIX_HOMESERVER_URL")
                .unwrap_or_else(|_| "https://matrix.org".to_string()),
            user_id: env::var("MATRIX_USER_ID").unwrap_or_default(),
            device_id: env::var("MATRIX_DEVICE_ID").unwrap_or_default(),
            access_token: env::var("MATRIX_ACCESS_TOKEN").unwrap_or_default(),
        };

        Ok(Self {
            database_url,
            timezone,
            scheduler: SchedulerConfig::from_env()?,
            broadcast_concurrency,
            matrix,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {name}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn minutes_var(name: &str, default: i64) -> Result<chrono::Duration, AppError> {
    parse_var(name, default).map(chrono::Duration::minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scheduler_windows_are_consistent() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.reminder_band_min, chrono::Duration::minutes(9));
        assert_eq!(config.pre_trip_lookahead, chrono::Duration::minutes(15));
    }

    #[test]
    fn inverted_reminder_band_is_rejected() {
        let config = SchedulerConfig {
            reminder_band_min: chrono::Duration::minutes(12),
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
