//! Gateway configuration, loadable from the environment.

use std::time::Duration;

use tapdash_room::RoomConfig;

use crate::TapdashError;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

/// Everything the gateway needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind_addr: String,
    /// Prefix of the join URL handed to displays, e.g.
    /// `http://192.168.1.20:3000`. No trailing slash.
    pub base_url: String,
    /// Connections silent for longer than this are closed and treated as
    /// transport loss.
    pub idle_timeout: Duration,
    /// How often the room sweep runs.
    pub sweep_interval: Duration,
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            base_url: format!("http://localhost:{DEFAULT_PORT}"),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10 * 60),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads `HOST`, `PORT`, `BASE_URL`, `TAPDASH_IDLE_TIMEOUT_SECS`,
    /// `TAPDASH_RECONNECT_GRACE_SECS` and `TAPDASH_SWEEP_INTERVAL_SECS`.
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    /// [`TapdashError::Config`] if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, TapdashError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading from an arbitrary source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, TapdashError> {
        let mut config = Self::default();

        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                TapdashError::Config(format!("PORT={raw:?}: {e}"))
            })?,
            None => DEFAULT_PORT,
        };
        config.bind_addr = format!("{host}:{port}");
        config.base_url = lookup("BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        if let Some(secs) = secs_var(&lookup, "TAPDASH_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = secs;
        }
        if let Some(secs) = secs_var(&lookup, "TAPDASH_RECONNECT_GRACE_SECS")? {
            config.room.reconnect_grace = secs;
        }
        if let Some(secs) = secs_var(&lookup, "TAPDASH_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = secs;
        }

        Ok(config)
    }
}

/// A positive number of seconds.
fn secs_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, TapdashError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(TapdashError::Config(format!("{key} must be positive"))),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(e) => Err(TapdashError::Config(format!("{key}={raw:?}: {e}"))),
    }
}
