//! Server tunables loaded from the environment.
//!
//! Every bound the server enforces lives here so that deployments can be
//! tuned without recompiling. Variables:
//!
//! - `HEARTH_MAX_REQUEST_SIZE` - request buffer cap in bytes (default 50000)
//! - `HEARTH_MAX_REQUEST_AGE_SECS` - seconds a request may stay incomplete (default 30)
//! - `HEARTH_MAX_BUFFER_TRIES` - read attempts before a connection is cut (default 50)
//! - `HEARTH_MAX_SESSION_IDLE_SECS` - seconds before a session expires (default 1800)
//! - `HEARTH_CLEAN_SESSIONS_EVERY` - session creations between table sweeps (default 1000)

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on accumulated request bytes per connection.
    pub max_request_size: usize,
    /// How long a connection may sit with an incomplete request.
    pub max_request_age: Duration,
    /// How many read attempts a connection gets before it is cut off.
    pub max_buffer_tries: u32,
    /// Idle window after which a session token stops resolving.
    pub max_session_idle: Duration,
    /// Number of session creations between idle-session sweeps.
    pub clean_sessions_every: u32,
    /// Readiness wait timeout; stale-connection sweeps run at this cadence.
    pub poll_timeout: Duration,
    /// How long a single socket write may stall before the peer counts as dead.
    pub write_patience: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_request_size: 50_000,
            max_request_age: Duration::from_secs(30),
            max_buffer_tries: 50,
            max_session_idle: Duration::from_secs(30 * 60),
            clean_sessions_every: 1000,
            poll_timeout: Duration::from_secs(5),
            write_patience: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `HEARTH_*` environment variables, falling
    /// back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            max_request_size: env_parse("HEARTH_MAX_REQUEST_SIZE", defaults.max_request_size),
            max_request_age: Duration::from_secs(env_parse(
                "HEARTH_MAX_REQUEST_AGE_SECS",
                defaults.max_request_age.as_secs(),
            )),
            max_buffer_tries: env_parse("HEARTH_MAX_BUFFER_TRIES", defaults.max_buffer_tries),
            max_session_idle: Duration::from_secs(env_parse(
                "HEARTH_MAX_SESSION_IDLE_SECS",
                defaults.max_session_idle.as_secs(),
            )),
            clean_sessions_every: env_parse(
                "HEARTH_CLEAN_SESSIONS_EVERY",
                defaults.clean_sessions_every,
            ),
            poll_timeout: defaults.poll_timeout,
            write_patience: defaults.write_patience,
        }
    }

    /// Every bound must be positive; a zero bound would cut every
    /// connection on its first read.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_request_size > 0, "max_request_size must be positive");
        anyhow::ensure!(
            !self.max_request_age.is_zero(),
            "max_request_age must be positive"
        );
        anyhow::ensure!(self.max_buffer_tries > 0, "max_buffer_tries must be positive");
        anyhow::ensure!(
            !self.max_session_idle.is_zero(),
            "max_session_idle must be positive"
        );
        anyhow::ensure!(
            self.clean_sessions_every > 0,
            "clean_sessions_every must be positive"
        );
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(val) => val.parse().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_bound_rejected() {
        let mut config = ServerConfig::default();
        config.max_buffer_tries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_falls_back_on_junk() {
        env::set_var("HEARTH_TEST_JUNK", "not-a-number");
        assert_eq!(env_parse("HEARTH_TEST_JUNK", 7u32), 7);
        env::remove_var("HEARTH_TEST_JUNK");
    }
}
