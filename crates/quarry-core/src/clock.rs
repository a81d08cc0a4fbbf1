//! Injectable wall clock.

use std::sync::Arc;

/// Returns the current Unix time in seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Current Unix time in seconds, clamped to zero before the epoch.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub fn system_clock() -> Clock {
    Arc::new(unix_now)
}

/// A clock frozen at `secs`, for tests.
pub fn fixed_clock(secs: u64) -> Clock {
    Arc::new(move || secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2024() {
        assert!(system_clock()() > 1_700_000_000);
    }

    #[test]
    fn fixed_clock_is_fixed() {
        let c = fixed_clock(42);
        assert_eq!(c(), 42);
        assert_eq!(c(), 42);
    }
}
