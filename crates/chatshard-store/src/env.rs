//! Environment parsing with warn-and-default semantics.
//!
//! Every tunable of the control plane comes from the environment. A value
//! that is missing or does not parse never aborts startup; it logs a warning
//! and falls back to the stated default. Mandatory variables (`PG_CONN`,
//! `SHADOW`, `APP_ENV`) are handled by the daemon itself.

use std::time::Duration;

use tracing::warn;

/// Read a string variable, falling back to `default` when unset.
pub fn string_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Read an unsigned integer variable.
pub fn u32_or(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default, "could not parse env var; using default");
            default
        }),
        Err(_) => default,
    }
}

/// Read a port number.
pub fn u16_or(name: &str, default: u16) -> u16 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default, "could not parse env var; using default");
            default
        }),
        Err(_) => default,
    }
}

/// Read a duration given in whole milliseconds.
pub fn duration_ms_or(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!(var = name, value = %raw, ?default, "could not parse env var; using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a duration given in whole seconds.
pub fn duration_secs_or(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(var = name, value = %raw, ?default, "could not parse env var; using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name so parallel tests cannot race on
    // the process environment.

    #[test]
    fn unset_uses_default() {
        assert_eq!(u32_or("CHATSHARD_TEST_UNSET_U32", 7), 7);
        assert_eq!(string_or("CHATSHARD_TEST_UNSET_STR", "fallback"), "fallback");
    }

    #[test]
    fn valid_value_is_parsed() {
        std::env::set_var("CHATSHARD_TEST_VALID_U32", "42");
        assert_eq!(u32_or("CHATSHARD_TEST_VALID_U32", 7), 42);
    }

    #[test]
    fn garbage_falls_back() {
        std::env::set_var("CHATSHARD_TEST_GARBAGE_U32", "not-a-number");
        assert_eq!(u32_or("CHATSHARD_TEST_GARBAGE_U32", 7), 7);
    }

    #[test]
    fn durations_parse_units() {
        std::env::set_var("CHATSHARD_TEST_MS", "250");
        assert_eq!(
            duration_ms_or("CHATSHARD_TEST_MS", Duration::from_millis(1)),
            Duration::from_millis(250)
        );
        std::env::set_var("CHATSHARD_TEST_SECS", "3");
        assert_eq!(
            duration_secs_or("CHATSHARD_TEST_SECS", Duration::from_secs(1)),
            Duration::from_secs(3)
        );
    }
}
