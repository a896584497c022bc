use chrono::Duration;
use rand::Rng;

use crate::domain::models::CooldownRange;

/// Source of the wait applied to the next phase after a bot completion.
pub trait CooldownSource: Send + Sync {
    fn draw(&self, range: CooldownRange) -> Duration;
}

/// Uniform draw over the range at minute resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformCooldown;

impl CooldownSource for UniformCooldown {
    fn draw(&self, range: CooldownRange) -> Duration {
        let low = i64::from(range.min_hours.min(range.max_hours)) * 60;
        let high = i64::from(range.max_hours.max(range.min_hours)) * 60;
        Duration::minutes(rand::thread_rng().gen_range(low..=high))
    }
}

/// Always the same wait, whatever the range; for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedCooldown(pub Duration);

impl CooldownSource for FixedCooldown {
    fn draw(&self, _range: CooldownRange) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_cooldown_stays_in_range() {
        let range = CooldownRange::new(15, 24);
        for _ in 0..500 {
            let drawn = UniformCooldown.draw(range);
            assert!(drawn >= Duration::hours(15), "{drawn}");
            assert!(drawn <= Duration::hours(24), "{drawn}");
        }
    }

    #[test]
    fn test_degenerate_range_is_exact() {
        assert_eq!(UniformCooldown.draw(CooldownRange::new(6, 6)), Duration::hours(6));
        assert_eq!(UniformCooldown.draw(CooldownRange::new(0, 0)), Duration::zero());
    }
}
