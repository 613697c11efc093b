//! Retention safety guards.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Guards checked before any deletion. `None` disables a guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protections {
    pub max_days: Option<u32>,
    pub min_remaining: Option<u64>,
}

impl Protections {
    /// Build from config-style values where 0 means "no guard".
    pub fn from_limits(max_days: u32, min_remaining: u64) -> Self {
        Self {
            max_days: (max_days > 0).then_some(max_days),
            min_remaining: (min_remaining > 0).then_some(min_remaining),
        }
    }

    /// Request-level guards win; unset ones fall back to `defaults`.
    pub fn or(self, defaults: Protections) -> Self {
        Self {
            max_days: self.max_days.or(defaults.max_days),
            min_remaining: self.min_remaining.or(defaults.min_remaining),
        }
    }

    pub fn check_window(&self, cutoff: i64, now: i64) -> LedgerResult<()> {
        if let Some(max_days) = self.max_days {
            let days = retention_days(cutoff, now);
            if days > i64::from(max_days) {
                return Err(LedgerError::max_days_exceeded(days, i64::from(max_days)));
            }
        }
        Ok(())
    }

    /// `max_days` against a window requested in whole days.
    pub fn check_days(&self, days: u32) -> LedgerResult<()> {
        match self.max_days {
            Some(max_days) if days > max_days => Err(LedgerError::max_days_exceeded(
                i64::from(days),
                i64::from(max_days),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_remaining(&self, total: u64, matched: u64) -> LedgerResult<()> {
        if let Some(min_remaining) = self.min_remaining {
            let remaining = total.saturating_sub(matched);
            if remaining < min_remaining {
                return Err(LedgerError::min_remaining_violated(remaining, min_remaining));
            }
        }
        Ok(())
    }
}

/// Whole days between `cutoff` and `now`, rounded up. A cutoff in the future
/// is a zero-day window.
pub fn retention_days(cutoff: i64, now: i64) -> i64 {
    let span = now - cutoff;
    if span <= 0 {
        return 0;
    }
    (span + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_days_rounds_up() {
        let now = 10 * SECONDS_PER_DAY;
        assert_eq!(retention_days(now, now), 0);
        assert_eq!(retention_days(now + 5, now), 0);
        assert_eq!(retention_days(now - 1, now), 1);
        assert_eq!(retention_days(now - SECONDS_PER_DAY, now), 1);
        assert_eq!(retention_days(now - SECONDS_PER_DAY - 1, now), 2);
    }

    #[test]
    fn test_max_days_guard() {
        let guards = Protections::from_limits(30, 0);
        let now = 100 * SECONDS_PER_DAY;
        assert!(guards.check_window(now - 30 * SECONDS_PER_DAY, now).is_ok());
        let err = guards
            .check_window(now - 31 * SECONDS_PER_DAY, now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::PolicyViolation(_)));
    }

    #[test]
    fn test_max_days_guard_on_requested_days() {
        let guards = Protections::from_limits(30, 0);
        assert!(guards.check_days(30).is_ok());
        assert!(matches!(
            guards.check_days(31),
            Err(LedgerError::PolicyViolation(_))
        ));
        assert!(Protections::default().check_days(u32::MAX).is_ok());
    }

    #[test]
    fn test_min_remaining_guard() {
        let guards = Protections::from_limits(0, 5);
        assert!(guards.check_remaining(10, 5).is_ok());
        assert!(guards.check_remaining(10, 6).is_err());
        assert!(Protections::default().check_remaining(1, 1).is_ok());
    }

    #[test]
    fn test_request_overrides_defaults() {
        let defaults = Protections::from_limits(90, 100);
        let request = Protections {
            max_days: Some(7),
            min_remaining: None,
        };
        assert_eq!(
            request.or(defaults),
            Protections {
                max_days: Some(7),
                min_remaining: Some(100)
            }
        );
    }
}
