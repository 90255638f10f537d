//! # Fastlane Service Configuration
//!
//! Environment-variable configuration for the service binaries. Every knob a
//! service reads goes through these helpers so that defaults, parsing, and
//! the required-key failure mode are uniform: optional keys fall back to a
//! default, required keys return a hard error the binary turns into a
//! non-zero exit.

use base64::Engine;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    Missing { name: String },

    #[error("could not parse {name}={value}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub fn get_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

pub fn get_int(name: &str, default: i64) -> ConfigResult<i64> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.trim().parse().map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            value,
            reason: format!("{e}"),
        }),
    }
}

pub fn get_float(name: &str, default: f64) -> ConfigResult<f64> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.trim().parse().map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            value,
            reason: format!("{e}"),
        }),
    }
}

/// Duration in milliseconds.
pub fn get_duration(name: &str, default: Duration) -> ConfigResult<Duration> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::Invalid {
                name: name.to_string(),
                value,
                reason: format!("{e}"),
            }),
    }
}

/// Optional base64 value; empty vec when unset.
pub fn get_base64(name: &str) -> ConfigResult<Vec<u8>> {
    match std::env::var(name) {
        Err(_) => Ok(Vec::new()),
        Ok(value) => base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|e| ConfigError::Invalid {
                name: name.to_string(),
                value,
                reason: format!("{e}"),
            }),
    }
}

/// Mandatory base64 value; missing or empty is a hard error.
pub fn require_base64(name: &str) -> ConfigResult<Vec<u8>> {
    let value = get_base64(name)?;
    if value.is_empty() {
        return Err(ConfigError::Missing {
            name: name.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env var tests use unique names to avoid cross-test interference.

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(get_string("FASTLANE_TEST_UNSET_STR", "fallback"), "fallback");
        assert_eq!(get_int("FASTLANE_TEST_UNSET_INT", 100).unwrap(), 100);
        assert_eq!(
            get_duration("FASTLANE_TEST_UNSET_DUR", Duration::from_secs(1)).unwrap(),
            Duration::from_secs(1)
        );
        assert!(get_base64("FASTLANE_TEST_UNSET_B64").unwrap().is_empty());
    }

    #[test]
    fn values_parse() {
        std::env::set_var("FASTLANE_TEST_INT", "250");
        assert_eq!(get_int("FASTLANE_TEST_INT", 0).unwrap(), 250);

        std::env::set_var("FASTLANE_TEST_DUR", "1500");
        assert_eq!(
            get_duration("FASTLANE_TEST_DUR", Duration::ZERO).unwrap(),
            Duration::from_millis(1500)
        );

        std::env::set_var("FASTLANE_TEST_B64", "aGVsbG8=");
        assert_eq!(get_base64("FASTLANE_TEST_B64").unwrap(), b"hello");
    }

    #[test]
    fn garbage_is_an_error() {
        std::env::set_var("FASTLANE_TEST_BAD_INT", "not a number");
        assert!(get_int("FASTLANE_TEST_BAD_INT", 0).is_err());
    }

    #[test]
    fn required_key_must_exist() {
        assert!(matches!(
            require_base64("FASTLANE_TEST_REQUIRED_MISSING").unwrap_err(),
            ConfigError::Missing { .. }
        ));
    }
}
