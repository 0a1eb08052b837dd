//! Service configuration

use serde::Deserialize;
use tracing::warn;

use engine::TimeControl;

/// Settings for the sessions service, read from `SESSIONS_*` variables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Used when a create request names no time control, e.g. `"10+5"`
    #[serde(default = "default_time_control")]
    pub default_time_control: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

fn default_time_control() -> String {
    TimeControl::RAPID.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_time_control: default_time_control(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix("SESSIONS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap_or_else(|e| {
                warn!("invalid service configuration, using defaults: {}", e);
                Self::default()
            })
    }

    pub fn time_control(&self) -> anyhow::Result<TimeControl> {
        Ok(self.default_time_control.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        unsafe {
            std::env::remove_var("SESSIONS_BIND_ADDR");
            std::env::remove_var("SESSIONS_DEFAULT_TIME_CONTROL");
        }

        let config = ServiceConfig::from_env();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.time_control().unwrap(), TimeControl::RAPID);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        unsafe {
            std::env::set_var("SESSIONS_BIND_ADDR", "127.0.0.1:9000");
            std::env::set_var("SESSIONS_DEFAULT_TIME_CONTROL", "3+2");
        }

        let config = ServiceConfig::from_env();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.time_control().unwrap(), TimeControl::from_minutes(3, 2));

        unsafe {
            std::env::remove_var("SESSIONS_BIND_ADDR");
            std::env::remove_var("SESSIONS_DEFAULT_TIME_CONTROL");
        }
    }

    #[test]
    fn test_bad_time_control_is_reported() {
        let config = ServiceConfig {
            default_time_control: "blitz".to_string(),
            ..ServiceConfig::default()
        };
        assert!(config.time_control().is_err());
    }
}
