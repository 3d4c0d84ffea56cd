//! Timing utilities
//!
//! Timestamps on the wire are whole Unix seconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp type (seconds since the Unix epoch)
pub type Timestamp = i64;

/// Get the current Unix timestamp in seconds
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_seconds() {
        let t = now();
        // Past 2020-01-01 and well below a millisecond-scale value
        assert!(t > 1_577_836_800);
        assert!(t < 100_000_000_000);
    }
}
