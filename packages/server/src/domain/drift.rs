//! Cross-client drift evaluation.
//!
//! Positions reported by players are projected to one server instant and
//! compared with the server timeline, which acts as the anchor.

use serde::Serialize;

use super::value_object::{ClientId, Timestamp};

/// A position reported by one client for a drift check
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub client_id: ClientId,
    /// Reported playback position (seconds)
    pub position: f64,
    /// Server instant the position was captured at
    pub captured_at: Timestamp,
}

/// One client's standing in a drift assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDrift {
    pub client_id: ClientId,
    /// Position projected to the evaluation instant (seconds)
    pub projected_position: f64,
    /// Projected minus expected position (ms); `None` without a timeline
    pub deviation_ms: Option<i64>,
}

/// Outcome of comparing one round of position reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftAssessment {
    pub evaluated_at: Timestamp,
    pub expected_position: Option<f64>,
    pub clients: Vec<ClientDrift>,
    /// Largest pairwise difference between projected positions (ms)
    pub max_skew_ms: i64,
    pub within_tolerance: bool,
}

impl DriftAssessment {
    /// Largest absolute deviation from the server timeline (ms)
    pub fn worst_deviation_ms(&self) -> Option<i64> {
        self.clients
            .iter()
            .filter_map(|client| client.deviation_ms)
            .map(i64::abs)
            .max()
    }
}

/// Compare reported positions at a common instant.
///
/// # Arguments
///
/// * `samples` - Position reports collected for one check
/// * `evaluated_at` - Server instant all positions are projected to
/// * `is_playing` - Whether positions advance with wall-clock time
/// * `expected_position` - Server timeline position at `evaluated_at`, if a video is loaded
/// * `tolerance_ms` - Maximum acceptable skew
pub fn assess_drift(
    samples: &[PositionSample],
    evaluated_at: Timestamp,
    is_playing: bool,
    expected_position: Option<f64>,
    tolerance_ms: u64,
) -> DriftAssessment {
    let clients: Vec<ClientDrift> = samples
        .iter()
        .map(|sample| {
            let projected_position = if is_playing {
                sample.position + evaluated_at.millis_since(sample.captured_at) as f64 / 1000.0
            } else {
                sample.position
            };
            ClientDrift {
                client_id: sample.client_id.clone(),
                projected_position,
                deviation_ms: expected_position
                    .map(|expected| ((projected_position - expected) * 1000.0).round() as i64),
            }
        })
        .collect();

    let max_skew_ms = skew_ms(clients.iter().map(|client| client.projected_position));

    DriftAssessment {
        evaluated_at,
        expected_position,
        clients,
        max_skew_ms,
        within_tolerance: max_skew_ms <= tolerance_ms as i64,
    }
}

fn skew_ms<I>(positions: I) -> i64
where
    I: IntoIterator<Item = f64>,
{
    let (min, max) = positions
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), position| {
            (min.min(position), max.max(position))
        });
    if min > max {
        0
    } else {
        ((max - min) * 1000.0).round() as i64
    }
}
