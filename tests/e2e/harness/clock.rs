use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed epoch the test clock starts at, so object ids are reproducible.
const EPOCH: i64 = 1_700_000_000;

/// Controllable time for commit signatures.
///
/// Every imported changeset is stamped with the current time, and the clock
/// moves forward by a minute afterwards. Two scenarios performing the same
/// imports produce the same object ids.
#[derive(Clone)]
pub struct MockClock {
    current: Arc<AtomicI64>,
}

impl MockClock {
    /// Create a new mock clock starting at the fixed epoch
    pub fn new() -> Self {
        Self {
            current: Arc::new(AtomicI64::new(EPOCH)),
        }
    }

    /// Get current timestamp
    pub fn now(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Advance time by duration
    pub fn advance(&self, duration: Duration) {
        let seconds = duration.as_secs() as i64;
        self.current.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Signature line for `who` at the current time, then advance a minute
    pub fn sign(&self, who: &str) -> String {
        let signature = format!("{} {} +0000", who, self.now());
        self.advance(Duration::from_secs(60));
        signature
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}
