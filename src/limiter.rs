//! Process-local fixed-window rate limiter, used on the unauthenticated
//! auth endpoints. State is per-process and cleared on restart; a
//! multi-instance deployment would move this into a shared store.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const AUTH_MAX_REQUESTS: u32 = 30;
pub const AUTH_WINDOW: Duration = Duration::from_secs(60);

static WINDOWS: Lazy<Mutex<HashMap<String, (Instant, u32)>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns false once `key` has exceeded `max_requests` inside the current
/// window. The counter resets when the window rolls over.
pub fn check_rate_limit(key: &str, max_requests: u32, window: Duration) -> bool {
    let mut windows = match WINDOWS.lock() {
        Ok(guard) => guard,
        // A poisoned limiter should never take the API down.
        Err(_) => return true,
    };

    let now = Instant::now();
    let entry = windows.entry(key.to_string()).or_insert((now, 0));

    if now.duration_since(entry.0) >= window {
        *entry = (now, 0);
    }

    if entry.1 >= max_requests {
        return false;
    }

    entry.1 += 1;
    true
}

#[cfg(test)]
pub fn reset() {
    if let Ok(mut windows) = WINDOWS.lock() {
        windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_limit_trips_after_max_requests() {
        reset();

        for _ in 0..5 {
            assert!(check_rate_limit("ip:10.0.0.1", 5, Duration::from_secs(60)));
        }
        assert!(!check_rate_limit("ip:10.0.0.1", 5, Duration::from_secs(60)));
    }

    #[test]
    #[serial]
    fn test_keys_are_independent() {
        reset();

        assert!(check_rate_limit("ip:10.0.0.2", 1, Duration::from_secs(60)));
        assert!(!check_rate_limit("ip:10.0.0.2", 1, Duration::from_secs(60)));
        assert!(check_rate_limit("ip:10.0.0.3", 1, Duration::from_secs(60)));
    }

    #[test]
    #[serial]
    fn test_window_rolls_over() {
        reset();

        assert!(check_rate_limit("ip:10.0.0.4", 1, Duration::from_millis(10)));
        assert!(!check_rate_limit("ip:10.0.0.4", 1, Duration::from_millis(10)));

        std::thread::sleep(Duration::from_millis(15));
        assert!(check_rate_limit("ip:10.0.0.4", 1, Duration::from_millis(10)));
    }
}
