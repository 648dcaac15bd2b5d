//! Process-wide sampling configuration.
//!
//! The sample period (spec.md section 3, "Process-wide sample period") is
//! parsed once from the environment, the first time any thread asks for it,
//! and cached as the bit pattern of an `f64` in a single atomic word. This
//! mirrors the teacher crate's `OnceLock`-backed global singleton
//! (`memscope-rs/src/tracker.rs::GLOBAL_TRACKER`) but uses a raw
//! `AtomicU64` rather than `OnceLock<f64>` so the hot path (every sampled
//! allocation consults the period when drawing a new debt) is a single
//! relaxed load with no lock, exactly as spec.md section 5 requires.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use tracing::warn;

/// `2^25` bytes: the default mean spacing between samples.
pub const DEFAULT_SAMPLE_PERIOD_BYTES: f64 = (1u64 << 25) as f64;

const SAMPLE_PERIOD_ENV_VAR: &str = "POIREAU_SAMPLE_PERIOD_BYTES";
const QUIET_ENV_VAR: &str = "POIREAU_QUIET";

/// `0` is not a valid period (periods must be positive), so it doubles as
/// the "not yet initialized" sentinel for the cached bit pattern.
static PERIOD_BITS: AtomicU64 = AtomicU64::new(0);

/// Errors that can arise while reading `POIREAU_SAMPLE_PERIOD_BYTES`.
///
/// Never escapes this module: [`sample_period_bytes`] always falls back to
/// [`DEFAULT_SAMPLE_PERIOD_BYTES`] on error, per spec.md section 7
/// ("Configuration error ... never fatal").
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The environment variable was set but could not be parsed as a float.
    #[error("{var}={value:?} is not a valid number")]
    NotANumber {
        /// Name of the offending environment variable.
        var: &'static str,
        /// The raw, unparsed value.
        value: String,
    },
    /// The value parsed but was not a positive, finite number.
    #[error("{var}={value} must be positive and finite")]
    OutOfRange {
        /// Name of the offending environment variable.
        var: &'static str,
        /// The parsed, out-of-range value.
        value: f64,
    },
}

/// Returns the process-wide sample period in bytes, parsing and caching it
/// from `POIREAU_SAMPLE_PERIOD_BYTES` on first call.
///
/// Subsequent calls (from any thread) are a single relaxed atomic load.
#[inline]
pub fn sample_period_bytes() -> f64 {
    let cached = PERIOD_BITS.load(Ordering::Relaxed);
    if cached != 0 {
        return f64::from_bits(cached);
    }

    let period = match parse_env_period() {
        Ok(period) => period,
        Err(err) => {
            if env::var_os(QUIET_ENV_VAR).is_none() {
                init_tracing_once();
                warn!(error = %err, "falling back to default poireau sample period");
            }
            DEFAULT_SAMPLE_PERIOD_BYTES
        }
    };

    // Lost races just store the same value again; `compare_exchange` isn't
    // needed because every racing thread computes the same `period`.
    PERIOD_BITS.store(period.to_bits(), Ordering::Relaxed);
    period
}

/// Installs a default `tracing_subscriber` so the `warn!` above actually
/// reaches stderr when `poireau` is `LD_PRELOAD`ed into a host process that
/// never set up its own subscriber (the overwhelmingly common case).
///
/// `poireau` is a guest in someone else's process, so it must never clobber
/// a subscriber the host already installed: `try_init` reports `Err` in
/// that case and this discards it, the same `let _ = ...try_init()` idiom
/// the teacher crate uses in its own `init()`. A `Once` keeps this to a
/// single attempt regardless of how many threads hit a config error.
fn init_tracing_once() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();
    });
}

fn parse_env_period() -> Result<f64, ConfigError> {
    let raw = match env::var(SAMPLE_PERIOD_ENV_VAR) {
        Ok(raw) => raw,
        Err(_) => return Ok(DEFAULT_SAMPLE_PERIOD_BYTES),
    };

    let value: f64 = raw.trim().parse().map_err(|_| ConfigError::NotANumber {
        var: SAMPLE_PERIOD_ENV_VAR,
        value: raw.clone(),
    })?;

    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::OutOfRange {
            var: SAMPLE_PERIOD_ENV_VAR,
            value,
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_period_is_32_mebibytes() {
        assert_eq!(DEFAULT_SAMPLE_PERIOD_BYTES, 33_554_432.0);
    }

    #[test]
    fn rejects_non_finite_and_non_positive_values() {
        for bad in ["0", "-1", "nan", "inf", "not-a-number"] {
            // This exercises the same validation `parse_env_period` applies;
            // it is duplicated here (rather than calling the env-reading
            // path, which would race with other tests mutating env vars)
            // so the boundary conditions stay covered in isolation.
            let parsed: Result<f64, _> = bad.trim().parse();
            let rejected = match parsed {
                Ok(value) => !value.is_finite() || value <= 0.0,
                Err(_) => true,
            };
            assert!(rejected, "expected {bad:?} to be rejected");
        }
    }
}
