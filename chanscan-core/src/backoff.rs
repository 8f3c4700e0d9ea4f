use std::time::Duration;

use crate::store::Tunables;

/// Exponential cooldown with a ceiling, shared by the discovery retry
/// loop and the scraping stage's rate-limit handling.
///
/// `cooldown(attempt) = min(base * multiplier^(attempt - 1), max)`,
/// attempt >= 1. Pure and deterministic; callers decide when to sleep.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    base_secs: u64,
    multiplier: u64,
    max_secs: u64,
}

impl CooldownPolicy {
    pub fn new(base_secs: u64, multiplier: u64, max_secs: u64) -> Self {
        Self {
            base_secs,
            multiplier,
            max_secs,
        }
    }

    pub fn from_tunables(tunables: &Tunables) -> Self {
        Self::new(
            tunables.cooldown_after_failure_secs,
            tunables.cooldown_multiplier,
            tunables.max_cooldown_secs,
        )
    }

    pub fn cooldown(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        let secs = self.base_secs.saturating_mul(factor).min(self.max_secs);
        Duration::from_secs(secs)
    }
}
