//! Shared vote/decision vocabulary, used by both the scaling math (E) and
//! the decision engine (F).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleDecision {
    Up,
    Down,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "GET")]
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    Records,
    Bytes,
}

impl MetricType {
    pub const ALL: [MetricType; 2] = [MetricType::Records, MetricType::Bytes];
}

#[derive(Debug, Clone, Copy)]
pub struct UtilizationSample {
    pub timestamp_secs: i64,
    pub observed: f64,
    pub capacity: f64,
}

impl UtilizationSample {
    pub fn pct(&self) -> f64 {
        if self.capacity <= 0.0 {
            0.0
        } else {
            self.observed / self.capacity
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    High,
    Low,
    Neutral,
}

/// Classify one datapoint's utilization. `up_threshold_pct`/`down_threshold_pct`
/// are whole-number percentages (e.g. `75` for 75%); comparisons are scaled
/// to avoid float drift per the Design Note on fixed-point arithmetic.
pub fn classify(pct: f64, up_threshold_pct: i64, down_threshold_pct: i64) -> Classification {
    let scaled = (pct * 1e10).round() as i64;
    let up_scaled = up_threshold_pct * 10i64.pow(8); // threshold_pct/100 scaled by 1e10
    let down_scaled = down_threshold_pct * 10i64.pow(8);
    if scaled > up_scaled {
        Classification::High
    } else if scaled < down_scaled {
        Classification::Low
    } else {
        Classification::Neutral
    }
}

/// Decision matrix (4.F.4): any `UP` vote wins; a unanimous set of `DOWN`
/// votes wins; otherwise `NONE`. With a single vote this degenerates to
/// "that vote is the decision", and with two votes it reproduces the
/// GET/PUT decision table exactly. Commutative in its inputs: order never
/// matters, only membership.
pub fn combine_votes(votes: &[ScaleDecision]) -> ScaleDecision {
    if votes.contains(&ScaleDecision::Up) {
        return ScaleDecision::Up;
    }
    if !votes.is_empty() && votes.iter().all(|v| *v == ScaleDecision::Down) {
        return ScaleDecision::Down;
    }
    ScaleDecision::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_any_up_wins() {
        assert_eq!(
            combine_votes(&[ScaleDecision::Down, ScaleDecision::Up]),
            ScaleDecision::Up
        );
    }

    #[test]
    fn matrix_unanimous_down() {
        assert_eq!(
            combine_votes(&[ScaleDecision::Down, ScaleDecision::Down]),
            ScaleDecision::Down
        );
    }

    #[test]
    fn matrix_mixed_down_none_is_none() {
        assert_eq!(
            combine_votes(&[ScaleDecision::Down, ScaleDecision::None]),
            ScaleDecision::None
        );
    }

    #[test]
    fn matrix_single_vote_passthrough() {
        assert_eq!(combine_votes(&[ScaleDecision::Down]), ScaleDecision::Down);
        assert_eq!(combine_votes(&[ScaleDecision::None]), ScaleDecision::None);
    }

    #[test]
    fn matrix_is_commutative_when_equal() {
        let a = combine_votes(&[ScaleDecision::Up, ScaleDecision::Down]);
        let b = combine_votes(&[ScaleDecision::Down, ScaleDecision::Up]);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_data_classifies_low() {
        // No datapoint -> caller treats as observed=0, which classifies Low
        // whenever the down threshold is above zero.
        let c = classify(0.0, 75, 25);
        assert_eq!(c, Classification::Low);
    }
}
