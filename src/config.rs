use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub dispatch_queue_size: usize,
    pub event_buffer_size: usize,
    /// How long a candidate has to answer before the offer lapses.
    pub acceptance_window: Duration,
    /// `None` searches without a distance limit.
    pub match_radius_km: Option<f64>,
    pub outbox_capacity: usize,
    pub email_from: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            dispatch_queue_size: 1024,
            event_buffer_size: 1024,
            acceptance_window: Duration::from_secs(60),
            match_radius_km: Some(5.0),
            outbox_capacity: 64,
            email_from: "dispatch@localhost".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let acceptance_window_secs: u64 = parse_or_default(
            "ACCEPTANCE_WINDOW_SECS",
            defaults.acceptance_window.as_secs(),
        )?;
        if acceptance_window_secs == 0 {
            return Err(AppError::Internal(
                "invalid ACCEPTANCE_WINDOW_SECS: must be > 0".to_string(),
            ));
        }

        let match_radius_km: f64 = parse_or_default("MATCH_RADIUS_KM", 5.0)?;
        if !match_radius_km.is_finite() || match_radius_km < 0.0 {
            return Err(AppError::Internal(format!(
                "invalid MATCH_RADIUS_KM: {match_radius_km}"
            )));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_log_format(env::var("LOG_FORMAT").ok().as_deref())?,
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            acceptance_window: Duration::from_secs(acceptance_window_secs),
            match_radius_km: (match_radius_km > 0.0).then_some(match_radius_km),
            outbox_capacity: parse_or_default("OUTBOX_CAPACITY", defaults.outbox_capacity)?,
            email_from: env::var("EMAIL_FROM").unwrap_or(defaults.email_from),
        })
    }
}

fn parse_log_format(raw: Option<&str>) -> Result<LogFormat, AppError> {
    match raw.map(str::trim) {
        None | Some("") | Some("compact") => Ok(LogFormat::Compact),
        Some("json") => Ok(LogFormat::Json),
        Some(other) => Err(AppError::Internal(format!(
            "invalid LOG_FORMAT: {other}, expected compact or json"
        ))),
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, LogFormat, parse_log_format};

    #[test]
    fn defaults_use_one_minute_window_and_five_km_radius() {
        let config = Config::default();
        assert_eq!(config.acceptance_window, Duration::from_secs(60));
        assert_eq!(config.match_radius_km, Some(5.0));
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(parse_log_format(None).unwrap(), LogFormat::Compact);
        assert_eq!(parse_log_format(Some("json")).unwrap(), LogFormat::Json);
        assert!(parse_log_format(Some("pretty")).is_err());
    }
}
