//! Per-stream scaling policy, as loaded from the configuration file (§6).

use crate::decision::OperationType;
use crate::error::{AutoscalerError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSpec {
    #[serde(rename = "scaleThresholdPct")]
    pub threshold_pct: i64,
    #[serde(rename = "scaleAfterMins")]
    pub after_mins: i64,
    #[serde(rename = "scaleCount", default)]
    pub count: Option<i64>,
    #[serde(rename = "scalePct", default)]
    pub pct: Option<i64>,
    #[serde(rename = "coolOffMins", default)]
    pub cool_off_mins: i64,
    #[serde(rename = "notificationARN", default)]
    pub notify_target: Option<String>,
}

impl ThresholdSpec {
    /// `count` wins over `pct` when both are present.
    pub fn amount(&self) -> Result<crate::math::Amount> {
        if let Some(count) = self.count {
            Ok(crate::math::Amount::Count(count))
        } else if let Some(pct) = self.pct {
            Ok(crate::math::Amount::Pct(pct))
        } else {
            Err(AutoscalerError::ConfigInvalid(
                "threshold spec has neither scaleCount nor scalePct".into(),
            ))
        }
    }
}

fn default_refresh_mins() -> i64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    #[serde(rename = "streamName")]
    pub stream_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "scaleOnOperation")]
    pub operations: Vec<OperationType>,
    #[serde(rename = "minShards")]
    pub min_shards: i64,
    #[serde(rename = "maxShards")]
    pub max_shards: i64,
    #[serde(
        rename = "refreshShardsNumberAfterMin",
        default = "default_refresh_mins"
    )]
    pub refresh_capacity_after_mins: i64,
    #[serde(rename = "checkInterval")]
    pub check_interval_sec: u64,
    #[serde(rename = "scaleUp")]
    pub up: ThresholdSpec,
    #[serde(rename = "scaleDown")]
    pub down: ThresholdSpec,
}

impl ScalingPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(AutoscalerError::ConfigInvalid("streamName is required".into()));
        }
        if self.min_shards < 1 {
            return Err(AutoscalerError::ConfigInvalid("minShards must be >= 1".into()));
        }
        if self.max_shards < self.min_shards {
            return Err(AutoscalerError::ConfigInvalid(
                "maxShards must be >= minShards".into(),
            ));
        }
        if self.operations.is_empty() {
            return Err(AutoscalerError::ConfigInvalid(
                "scaleOnOperation must name at least one operation".into(),
            ));
        }
        self.up.amount()?;
        self.down.amount()?;
        Ok(())
    }

    pub fn window_minutes(&self) -> i64 {
        self.up.after_mins.max(self.down.after_mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_shape() {
        let json = r#"
        {
            "streamName": "orders",
            "region": "us-east-1",
            "scaleOnOperation": ["PUT", "GET"],
            "minShards": 2,
            "maxShards": 20,
            "checkInterval": 60,
            "scaleUp": { "scaleThresholdPct": 75, "scaleAfterMins": 5, "scalePct": 50, "coolOffMins": 10 },
            "scaleDown": { "scaleThresholdPct": 25, "scaleAfterMins": 10, "scalePct": 25, "coolOffMins": 20 }
        }"#;
        let policy: ScalingPolicy = serde_json::from_str(json).unwrap();
        policy.validate().unwrap();
        assert_eq!(policy.refresh_capacity_after_mins, 10);
        assert_eq!(policy.window_minutes(), 10);
    }

    #[test]
    fn rejects_missing_required_key() {
        let json = r#"{"streamName": "orders"}"#;
        let result: std::result::Result<ScalingPolicy, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn count_wins_over_pct() {
        let spec = ThresholdSpec {
            threshold_pct: 75,
            after_mins: 5,
            count: Some(2),
            pct: Some(50),
            cool_off_mins: 0,
            notify_target: None,
        };
        assert!(matches!(spec.amount().unwrap(), crate::math::Amount::Count(2)));
    }
}
