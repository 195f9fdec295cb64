//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.
//! Every setting has a default, so an empty environment yields a gateway
//! with all four venues and the documented reconnect behaviour.

use std::time::Duration;

use crate::domain::normalizer::TimestampOffset;
use crate::domain::venue::VenueId;

use super::catalog::VenueCatalog;

/// Largest accepted timestamp offset, either direction.
const MAX_OFFSET_HOURS: u64 = 24;

/// Oanda v20 credentials.
#[derive(Clone)]
pub struct OandaCredentials {
    api_token: String,
    account_id: Option<String>,
}

impl OandaCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_token: String, account_id: Option<String>) -> Self {
        Self {
            api_token,
            account_id,
        }
    }

    /// Bearer token for the REST API.
    #[must_use]
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    /// Account used for pricing and instrument discovery.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }
}

impl std::fmt::Debug for OandaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OandaCredentials")
            .field("api_token", &"[REDACTED]")
            .field(
                "account_id",
                &self.account_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Stream connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Reconnect delay multiplier (1.0 = fixed delay).
    pub reconnect_multiplier: f64,
    /// Reconnect jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Replay active subscriptions after a reconnect.
    pub resubscribe_on_reconnect: bool,
    /// Interval between polls for venues without a stream.
    pub poll_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_multiplier: 1.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
            resubscribe_on_reconnect: false,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Venues to register, in order.
    pub venues: Vec<VenueId>,
    /// Offset applied to every emitted timestamp.
    pub timestamp_offset: TimestampOffset,
    /// REST request timeout.
    pub rest_timeout: Duration,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Venue descriptors with URL overrides applied.
    pub catalog: VenueCatalog,
    /// Oanda credentials, when configured.
    pub oanda: Option<OandaCredentials>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            venues: VenueId::ALL.to_vec(),
            timestamp_offset: TimestampOffset::default(),
            rest_timeout: Duration::from_secs(10),
            stream: StreamSettings::default(),
            server: ServerSettings::default(),
            catalog: VenueCatalog::default(),
            oanda: None,
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that cannot be used.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that cannot be used.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = Self::default();

        let venues = match env.get("GATEWAY_VENUES") {
            Some(list) => parse_venues(&list)?,
            None => defaults.venues,
        };

        let timestamp_offset = TimestampOffset::from_hours(env.parse_where(
            "GATEWAY_TIMESTAMP_OFFSET_HOURS",
            TimestampOffset::DEFAULT_HOURS,
            |hours: &i64| hours.unsigned_abs() <= MAX_OFFSET_HOURS,
        )?);

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            reconnect_delay: env.millis(
                "GATEWAY_RECONNECT_DELAY_MS",
                stream_defaults.reconnect_delay,
            )?,
            reconnect_delay_max: env.millis(
                "GATEWAY_RECONNECT_DELAY_MAX_MS",
                stream_defaults.reconnect_delay_max,
            )?,
            reconnect_multiplier: env.parse_where(
                "GATEWAY_RECONNECT_MULTIPLIER",
                stream_defaults.reconnect_multiplier,
                |m| m.is_finite() && *m >= 1.0,
            )?,
            reconnect_jitter: env.parse_where(
                "GATEWAY_RECONNECT_JITTER",
                stream_defaults.reconnect_jitter,
                |j| (0.0..=1.0).contains(j),
            )?,
            max_reconnect_attempts: env.parse(
                "GATEWAY_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            )?,
            resubscribe_on_reconnect: env.flag(
                "GATEWAY_RESUBSCRIBE_ON_RECONNECT",
                stream_defaults.resubscribe_on_reconnect,
            )?,
            poll_interval: env.positive_secs("GATEWAY_POLL_INTERVAL_SECS", stream_defaults.poll_interval)?,
        };

        let server = ServerSettings {
            metrics_port: env.parse("GATEWAY_METRICS_PORT", defaults.server.metrics_port)?,
        };

        let oanda = match env.get("OANDA_API_TOKEN") {
            Some(token) => Some(OandaCredentials::new(token, env.get("OANDA_ACCOUNT_ID"))),
            None => None,
        };

        Ok(Self {
            venues,
            timestamp_offset,
            rest_timeout: env.positive_secs("GATEWAY_REST_TIMEOUT_SECS", defaults.rest_timeout)?,
            stream,
            server,
            catalog: VenueCatalog::default().with_overrides(&lookup),
            oanda,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Venue list names an unknown venue.
    #[error("unknown venue in GATEWAY_VENUES: {0}")]
    UnknownVenue(String),
    /// Venue list is present but empty.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_venues(list: &str) -> Result<Vec<VenueId>, ConfigError> {
    let mut venues = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let venue: VenueId = name.parse().map_err(ConfigError::UnknownVenue)?;
        if !venues.contains(&venue) {
            venues.push(venue);
        }
    }
    if venues.is_empty() {
        return Err(ConfigError::EmptyValue("GATEWAY_VENUES".to_string()));
    }
    Ok(venues)
}

/// Typed access over a variable lookup. Unset and blank values fall back
/// to the default.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }

    /// Like [`Self::parse`], rejecting parsed values that fail `valid`.
    fn parse_where<T: std::str::FromStr>(
        &self,
        key: &str,
        default: T,
        valid: impl Fn(&T) -> bool,
    ) -> Result<T, ConfigError> {
        let value = self.parse(key, default)?;
        if valid(&value) {
            return Ok(value);
        }
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: self.get(key).unwrap_or_default(),
        })
    }

    fn positive_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse_where(key, default.as_secs(), |secs| *secs > 0)
            .map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default_ms).map(Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn config_from(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.venues, VenueId::ALL.to_vec());
        assert_eq!(config.timestamp_offset, TimestampOffset::default());
        assert_eq!(config.rest_timeout, Duration::from_secs(10));
        assert_eq!(config.stream, StreamSettings::default());
        assert_eq!(config.server.metrics_port, 9090);
        assert!(config.oanda.is_none());
    }

    #[test]
    fn venue_list_accepts_aliases_and_dedups() {
        let config = config_from(&[("GATEWAY_VENUES", "okx, binance_future,OKX")]).unwrap();
        assert_eq!(config.venues, vec![VenueId::Okx, VenueId::Binance]);
    }

    #[test]
    fn unknown_venue_is_rejected() {
        let err = config_from(&[("GATEWAY_VENUES", "BINANCE,KRAKEN")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownVenue("KRAKEN".to_string()));
    }

    #[test]
    fn separator_only_venue_list_is_rejected() {
        let err = config_from(&[("GATEWAY_VENUES", " , ")]).unwrap_err();
        assert_eq!(err, ConfigError::EmptyValue("GATEWAY_VENUES".to_string()));
    }

    #[test]
    fn stream_settings_are_read() {
        let config = config_from(&[
            ("GATEWAY_RECONNECT_DELAY_MS", "250"),
            ("GATEWAY_RECONNECT_DELAY_MAX_MS", "8000"),
            ("GATEWAY_RECONNECT_MULTIPLIER", "2"),
            ("GATEWAY_MAX_RECONNECT_ATTEMPTS", "7"),
            ("GATEWAY_RESUBSCRIBE_ON_RECONNECT", "true"),
            ("GATEWAY_POLL_INTERVAL_SECS", "30"),
        ])
        .unwrap();

        assert_eq!(config.stream.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.stream.reconnect_delay_max, Duration::from_secs(8));
        assert!((config.stream.reconnect_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.stream.max_reconnect_attempts, 7);
        assert!(config.stream.resubscribe_on_reconnect);
        assert_eq!(config.stream.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn invalid_number_is_reported_with_its_key() {
        let err = config_from(&[("GATEWAY_METRICS_PORT", "ninety")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "GATEWAY_METRICS_PORT".to_string(),
                value: "ninety".to_string(),
            }
        );
    }

    #[test_case("GATEWAY_POLL_INTERVAL_SECS", "0" ; "zero poll interval")]
    #[test_case("GATEWAY_REST_TIMEOUT_SECS", "0" ; "zero rest timeout")]
    #[test_case("GATEWAY_RECONNECT_JITTER", "NaN" ; "nan jitter")]
    #[test_case("GATEWAY_RECONNECT_JITTER", "1.5" ; "jitter above one")]
    #[test_case("GATEWAY_RECONNECT_JITTER", "-0.1" ; "negative jitter")]
    #[test_case("GATEWAY_RECONNECT_MULTIPLIER", "inf" ; "infinite multiplier")]
    #[test_case("GATEWAY_RECONNECT_MULTIPLIER", "NaN" ; "nan multiplier")]
    #[test_case("GATEWAY_RECONNECT_MULTIPLIER", "0.5" ; "shrinking multiplier")]
    #[test_case("GATEWAY_TIMESTAMP_OFFSET_HOURS", "25" ; "offset beyond a day")]
    #[test_case("GATEWAY_TIMESTAMP_OFFSET_HOURS", "-9223372036854775808" ; "offset at i64 min")]
    fn unusable_values_are_rejected(key: &str, value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }
        );
    }

    #[test]
    fn boundary_values_are_accepted() {
        let config = config_from(&[
            ("GATEWAY_POLL_INTERVAL_SECS", "1"),
            ("GATEWAY_RECONNECT_JITTER", "1"),
            ("GATEWAY_RECONNECT_MULTIPLIER", "1"),
            ("GATEWAY_TIMESTAMP_OFFSET_HOURS", "-24"),
        ])
        .unwrap();
        assert_eq!(config.stream.poll_interval, Duration::from_secs(1));
        assert!((config.stream.reconnect_jitter - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.timestamp_offset, TimestampOffset::from_hours(-24));
    }

    #[test]
    fn offset_can_be_disabled() {
        let config = config_from(&[("GATEWAY_TIMESTAMP_OFFSET_HOURS", "0")]).unwrap();
        assert_eq!(config.timestamp_offset, TimestampOffset::ZERO);
    }

    #[test]
    fn oanda_credentials_are_redacted() {
        let config = config_from(&[
            ("OANDA_API_TOKEN", "secret-token"),
            ("OANDA_ACCOUNT_ID", "101-001-1"),
        ])
        .unwrap();
        let creds = config.oanda.unwrap();
        assert_eq!(creds.api_token(), "secret-token");
        assert_eq!(creds.account_id(), Some("101-001-1"));

        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("101-001-1"));
        assert!(debug.contains("[REDACTED]"));
    }
}
