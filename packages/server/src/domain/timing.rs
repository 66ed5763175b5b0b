//! Clock estimation and scheduling arithmetic.
//!
//! This module contains pure functions that implement the timing rules of the
//! sync engine without side effects, making them easy to test.

use super::value_object::Timestamp;

/// Weight given to a new latency measurement in the moving average
pub const LATENCY_SMOOTHING: f64 = 0.2;

/// Result of one clock probe round trip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Estimated one-way latency (ms)
    pub latency_ms: f64,
    /// Client clock minus server time at the client (ms)
    pub offset_ms: i64,
}

impl ClockSample {
    /// Derive latency and offset from a completed probe.
    ///
    /// # Arguments
    ///
    /// * `server_sent` - Server time when the probe left
    /// * `client_time` - Client clock reading when it answered
    /// * `received_at` - Server time when the answer arrived
    pub fn from_probe(server_sent: Timestamp, client_time: i64, received_at: Timestamp) -> Self {
        let round_trip = received_at.millis_since(server_sent).max(0);
        let latency_ms = round_trip as f64 / 2.0;
        let server_time_at_client = server_sent.value() as f64 + latency_ms;
        let offset_ms = (client_time as f64 - server_time_at_client).round() as i64;
        Self {
            latency_ms,
            offset_ms,
        }
    }
}

/// Exponential moving average of latency. A zero average means no estimate yet.
pub fn smooth_latency(previous_ms: f64, measured_ms: f64) -> f64 {
    if previous_ms == 0.0 {
        measured_ms
    } else {
        (1.0 - LATENCY_SMOOTHING) * previous_ms + LATENCY_SMOOTHING * measured_ms
    }
}

/// Delay inserted before a coordinated `play`/`seek`.
///
/// `max(preload_buffer, multiplier * average_latency + margin)`
pub fn coordination_buffer_ms(
    average_latency_ms: f64,
    preload_buffer_ms: u64,
    latency_multiplier: f64,
    latency_margin_ms: u64,
) -> u64 {
    let latency_based = (latency_multiplier * average_latency_ms.max(0.0)).ceil() as u64
        + latency_margin_ms;
    preload_buffer_ms.max(latency_based)
}

/// How long to wait for readiness inside a coordination buffer
pub fn readiness_deadline_ms(coordination_buffer_ms: u64, readiness_margin_ms: u64) -> u64 {
    coordination_buffer_ms.saturating_sub(readiness_margin_ms)
}

/// Shift a server instant into the deadline sent to one client:
/// `scheduled + clock_offset - average_latency`.
pub fn adjusted_scheduled_time(
    scheduled: Timestamp,
    clock_offset_ms: i64,
    average_latency_ms: f64,
) -> Timestamp {
    scheduled.plus_millis(clock_offset_ms.saturating_sub(average_latency_ms.round() as i64))
}

/// Server instant at which a client fires a deadline expressed on its own clock
pub fn fire_instant_on_server_clock(adjusted: Timestamp, clock_offset_ms: i64) -> Timestamp {
    adjusted.plus_millis(clock_offset_ms.saturating_neg())
}

/// Average latency across measured clients; unmeasured (zero) estimates are skipped
pub fn average_latency<I>(latencies: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = latencies
        .into_iter()
        .filter(|latency| *latency > 0.0)
        .fold((0.0, 0usize), |(sum, count), latency| (sum + latency, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}
