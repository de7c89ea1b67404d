use std::time::Duration;

use rand::Rng;

/// Reconnect/backoff schedule used by the connection controller.
///
/// The delay before attempt `n` (1-indexed) is `base_delay * 2^(n-1)`. There
/// is no ceiling unless `max_delay` is set; the attempt budget is what bounds
/// the schedule by default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    pub jitter: f64,
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("Reconnect base delay must be > 0".to_string());
        }
        if let Some(max) = self.max_delay
            && max < self.base_delay
        {
            return Err("Max reconnect delay must be >= base reconnect delay".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Delay to wait before reconnect attempt `attempt` (1-indexed).
///
/// Attempt `0` is treated like attempt `1`.
pub fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let base = config.base_delay.as_secs_f64() * f64::from(1u32 << exponent);
    let base = match config.max_delay {
        Some(max) => base.min(max.as_secs_f64()),
        None => base,
    };

    if config.jitter == 0.0 {
        return Duration::try_from_secs_f64(base).unwrap_or(Duration::MAX);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::try_from_secs_f64(blended).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: None,
            jitter: 0.0,
        }
    }

    #[test]
    fn doubles_per_attempt() {
        let cfg = config(1000);
        let delays: Vec<u128> = (1..=5)
            .map(|n| calculate_backoff(cfg, n).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        assert_eq!(
            calculate_backoff(config(250), 0),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn optional_ceiling_caps_delay() {
        let cfg = BackoffConfig {
            max_delay: Some(Duration::from_millis(3000)),
            ..config(1000)
        };
        assert_eq!(calculate_backoff(cfg, 2), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(cfg, 3), Duration::from_millis(3000));
        assert_eq!(calculate_backoff(cfg, 10), Duration::from_millis(3000));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let delay = calculate_backoff(config(1), u32::MAX);
        assert!(delay > Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_base() {
        let cfg = BackoffConfig {
            jitter: 0.5,
            ..config(1000)
        };
        for _ in 0..32 {
            let delay = calculate_backoff(cfg, 2);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(config(0).validate().is_err());
        assert!(
            BackoffConfig {
                max_delay: Some(Duration::from_millis(10)),
                ..config(100)
            }
            .validate()
            .is_err()
        );
        assert!(
            BackoffConfig {
                jitter: 1.5,
                ..config(100)
            }
            .validate()
            .is_err()
        );
        assert!(config(100).validate().is_ok());
    }
}
