//! Scaling report (§3): the per-iteration outcome surfaced to a listener
//! and, when an action executed, serialized as the notification body.

use crate::decision::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Ok,
    NoActionRequired,
    AlreadyAtMinimum,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingReport {
    pub stream: String,
    pub direction: Option<Direction>,
    pub start_shard_count: i64,
    pub end_shard_count: i64,
    pub operations_executed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub message: Option<String>,
}

pub const SUBJECT_SCALE_UP: &str = "Kinesis Autoscaling - Scale Up";
pub const SUBJECT_SCALE_DOWN: &str = "Kinesis Autoscaling - Scale Down";

impl ScalingReport {
    pub fn subject(&self) -> Option<&'static str> {
        match self.direction {
            Some(Direction::Up) => Some(SUBJECT_SCALE_UP),
            Some(Direction::Down) => Some(SUBJECT_SCALE_DOWN),
            None => None,
        }
    }
}
