//! Local clock of the simulated display.

use lockstep_shared::time::{Clock, now_millis};

/// System clock shifted by a fixed skew, mimicking a device whose clock is
/// not synchronized with the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkewedClock {
    skew_ms: i64,
}

impl SkewedClock {
    pub fn new(skew_ms: i64) -> Self {
        Self { skew_ms }
    }

    pub fn skew_ms(&self) -> i64 {
        self.skew_ms
    }
}

impl Clock for SkewedClock {
    fn now_millis(&self) -> i64 {
        now_millis() + self.skew_ms
    }
}
