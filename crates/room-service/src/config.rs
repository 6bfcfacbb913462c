//! Room service configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default so the service starts with no environment at all.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP and WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5001";

/// Default delay between failed worker respawn attempts.
pub const DEFAULT_WORKER_RESPAWN_DELAY_MS: u64 = 1000;

/// Default grace window before an empty room is evicted.
pub const DEFAULT_EMPTY_ROOM_GRACE_SECONDS: u64 = 30;

/// Default interval between server pings.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 25;

/// Default extra silence tolerated after a missed ping.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 20;

/// Default address advertised in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default instance ID prefix.
pub const DEFAULT_SERVICE_ID_PREFIX: &str = "room-service";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP and WebSocket bind address (default: "0.0.0.0:5001").
    pub bind_address: String,

    /// Unique identifier for this instance, used in logs.
    pub service_id: String,

    /// Number of media workers spawned at startup.
    pub num_workers: usize,

    /// Delay between failed respawn attempts of a dead worker.
    pub worker_respawn_delay: Duration,

    /// How long a room must stay empty before it is evicted.
    pub empty_room_grace: Duration,

    /// Interval between WebSocket pings sent to each connection.
    pub heartbeat_interval: Duration,

    /// Silence tolerated on top of `heartbeat_interval` before a connection
    /// is treated as gone.
    pub heartbeat_timeout: Duration,

    /// Address advertised in ICE candidates.
    pub announced_ip: String,

    pub rtc_min_port: u16,
    pub rtc_max_port: u16,

    pub log_format: LogFormat,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("service_id", &self.service_id)
            .field("num_workers", &self.num_workers)
            .field("worker_respawn_delay", &self.worker_respawn_delay)
            .field("empty_room_grace", &self.empty_room_grace)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("announced_ip", &self.announced_ip)
            .field(
                "rtc_port_range",
                &format_args!("{}-{}", self.rtc_min_port, self.rtc_max_port),
            )
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional variable, falling back to `default` when unset.
/// A set but unparsable value is an error rather than a silent default.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} has invalid value '{raw}'"))
        }),
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("ROOM_SERVICE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let num_workers = parse_var(vars, "ROOM_SERVICE_NUM_WORKERS", default_num_workers())?;
        if num_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_SERVICE_NUM_WORKERS must be at least 1".to_string(),
            ));
        }

        let worker_respawn_delay = Duration::from_millis(parse_var(
            vars,
            "ROOM_SERVICE_WORKER_RESPAWN_DELAY_MS",
            DEFAULT_WORKER_RESPAWN_DELAY_MS,
        )?);

        let empty_room_grace = Duration::from_secs(parse_var(
            vars,
            "ROOM_SERVICE_EMPTY_ROOM_GRACE_SECONDS",
            DEFAULT_EMPTY_ROOM_GRACE_SECONDS,
        )?);

        let heartbeat_interval_secs = parse_var(
            vars,
            "ROOM_SERVICE_HEARTBEAT_INTERVAL_SECONDS",
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
        )?;
        if heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_SERVICE_HEARTBEAT_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }

        let heartbeat_timeout = Duration::from_secs(parse_var(
            vars,
            "ROOM_SERVICE_HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
        )?);

        let announced_ip = vars
            .get("ROOM_SERVICE_ANNOUNCED_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ANNOUNCED_IP.to_string());

        let rtc_min_port = parse_var(vars, "ROOM_SERVICE_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "ROOM_SERVICE_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RTC port range is inverted: {rtc_min_port} > {rtc_max_port}"
            )));
        }

        let log_format = match vars.get("ROOM_SERVICE_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "ROOM_SERVICE_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        // Generate instance ID
        let service_id = vars.get("ROOM_SERVICE_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVICE_ID_PREFIX}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            service_id,
            num_workers,
            worker_respawn_delay,
            empty_room_grace,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
            heartbeat_timeout,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            log_format,
        })
    }

    /// Longest silence tolerated from a client before it is disconnected.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_timeout
    }
}
