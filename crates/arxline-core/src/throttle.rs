//! Minimum-interval throttle for polite API access.
//!
//! Uses `Mutex` from std: callers block until their slot comes up, so
//! concurrent workers sharing one client are serialized at the API's pace.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Enforces a minimum interval between successive calls.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Block until this caller may issue its request.
    pub fn wait(&self) {
        let wait_until = {
            let mut slot = match self.next_slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let start = match *slot {
                Some(t) if t > now => t,
                _ => now,
            };
            *slot = Some(start + self.interval);
            start
        };
        let now = Instant::now();
        if wait_until > now {
            std::thread::sleep(wait_until - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_call_is_immediate() {
        let t = Throttle::new(Duration::from_secs(60));
        let start = Instant::now();
        t.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn spaces_consecutive_calls() {
        let t = Throttle::new(Duration::from_millis(40));
        let start = Instant::now();
        t.wait();
        t.wait();
        t.wait();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn concurrent_callers_get_distinct_slots() {
        let t = Arc::new(Throttle::new(Duration::from_millis(30)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = t.clone();
                std::thread::spawn(move || t.wait())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
