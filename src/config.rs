//! Connection, pipeline, and IDLE-loop configuration.

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// IMAP connection configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables.
    ///
    /// Reads from a `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `1143`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "1143".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
        })
    }
}

/// Tunables for the resilient IDLE loop.
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// How long a single IDLE may run before it is torn down and
    /// restarted, independent of server activity (most servers drop
    /// idle connections after ~30 minutes; renewing earlier avoids
    /// racing that timeout).
    pub renewal_interval: Duration,
    /// How often to send a NOOP instead of renewing IDLE, when the
    /// server or network benefits from more frequent liveness checks
    /// than a full re-IDLE.
    pub noop_interval: Duration,
    /// Whether to send one NOOP immediately after an IDLE cycle ends,
    /// before starting the next one.
    pub post_idle_noop_enabled: bool,
    /// Delay before that post-IDLE NOOP, giving the server a moment to
    /// settle after DONE.
    pub post_idle_noop_delay: Duration,
    /// How long to wait for the server to acknowledge DONE before
    /// treating the connection as stuck.
    pub done_timeout: Duration,
    /// Base delay for the first reconnect attempt after a dropped IDLE.
    pub reconnect_base_delay: Duration,
    /// Ceiling on the exponential backoff between reconnect attempts.
    pub reconnect_max_delay: Duration,
    /// Fraction of the computed delay to randomize, in `[0, 1]`.
    pub reconnect_jitter_factor: f64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            renewal_interval: Duration::from_secs(25 * 60),
            noop_interval: Duration::from_secs(5 * 60),
            post_idle_noop_enabled: false,
            post_idle_noop_delay: Duration::from_millis(500),
            done_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_jitter_factor: 0.2,
        }
    }
}

impl IdleConfig {
    /// Validate the invariants this config relies on: the backoff
    /// ceiling must not be below its base, the jitter factor must be a
    /// proportion, and every duration must be positive.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(Error::InvalidArgument(
                "reconnect_max_delay must be >= reconnect_base_delay".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter_factor) {
            return Err(Error::InvalidArgument(
                "reconnect_jitter_factor must be within [0, 1]".into(),
            ));
        }
        let durations = [
            ("renewal_interval", self.renewal_interval),
            ("noop_interval", self.noop_interval),
            ("post_idle_noop_delay", self.post_idle_noop_delay),
            ("done_timeout", self.done_timeout),
            ("reconnect_base_delay", self.reconnect_base_delay),
            ("reconnect_max_delay", self.reconnect_max_delay),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::InvalidArgument(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Limits the wire codec enforces while decoding responses, so a
/// misbehaving or malicious server cannot force unbounded memory use.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Soft cap on the number of buffered untagged responses the
    /// persistent buffer will hold before a caller is expected to
    /// drain it.
    pub buffer_soft_limit: usize,
    /// Maximum number of attributes accepted in a single FETCH
    /// response line.
    pub max_attributes_per_fetch: usize,
    /// Maximum size of a single body-section literal.
    pub max_body_section_bytes: u64,
    /// Maximum size of any literal the codec will accept before
    /// rejecting the response outright.
    pub max_literal_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_soft_limit: 10_000,
            max_attributes_per_fetch: 64,
            max_body_section_bytes: 64 * 1024 * 1024,
            max_literal_bytes: 64 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_soft_limit == 0 {
            return Err(Error::InvalidArgument(
                "buffer_soft_limit must be positive".into(),
            ));
        }
        if self.max_attributes_per_fetch == 0 {
            return Err(Error::InvalidArgument(
                "max_attributes_per_fetch must be positive".into(),
            ));
        }
        if self.max_body_section_bytes == 0 || self.max_literal_bytes == 0 {
            return Err(Error::InvalidArgument(
                "max_body_section_bytes and max_literal_bytes must be positive".into(),
            ));
        }
        if self.max_body_section_bytes > self.max_literal_bytes {
            return Err(Error::InvalidArgument(
                "max_body_section_bytes must not exceed max_literal_bytes".into(),
            ));
        }
        Ok(())
    }
}

/// Per-command timeouts, with overrides for commands whose typical
/// latency differs meaningfully from the default (APPEND and SEARCH
/// routinely run long on large mailboxes; LOGOUT should return fast).
#[derive(Debug, Clone)]
pub struct CommandTimeouts {
    pub default: Duration,
    pub append: Duration,
    pub search: Duration,
    pub logout: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            append: Duration::from_secs(120),
            search: Duration::from_secs(60),
            logout: Duration::from_secs(5),
        }
    }
}

impl CommandTimeouts {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("default", self.default),
            ("append", self.append),
            ("search", self.search),
            ("logout", self.logout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::InvalidArgument(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_config_defaults_are_valid() {
        IdleConfig::default().validate().unwrap();
    }

    #[test]
    fn idle_config_rejects_inverted_backoff_bounds() {
        let mut cfg = IdleConfig::default();
        cfg.reconnect_max_delay = Duration::from_millis(1);
        cfg.reconnect_base_delay = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn idle_config_rejects_out_of_range_jitter() {
        let mut cfg = IdleConfig::default();
        cfg.reconnect_jitter_factor = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pipeline_config_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn pipeline_config_rejects_body_limit_above_literal_limit() {
        let mut cfg = PipelineConfig::default();
        cfg.max_body_section_bytes = cfg.max_literal_bytes + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn command_timeouts_defaults_are_valid() {
        CommandTimeouts::default().validate().unwrap();
    }

    #[test]
    fn command_timeouts_reject_zero_duration() {
        let mut cfg = CommandTimeouts::default();
        cfg.search = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
