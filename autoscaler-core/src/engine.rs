//! Decision Engine (component F): the per-stream monitor loop.
//!
//! One `DecisionEngine` is owned by exactly one `tokio` task for exactly
//! one stream - see the Design Note on global state: `last_scale_up`,
//! `last_scale_down`, and the capacity cache live on `self`, never shared.

use crate::control::{wait_for_active, Clock, StreamControl};
use crate::decision::{classify, combine_votes, Classification, Direction, MetricType, OperationType, ScaleDecision};
use crate::error::{AutoscalerError, Result};
use crate::metrics::MetricSource;
use crate::planner::{PlanOutcome, ResizePlanner};
use crate::policy::ScalingPolicy;
use crate::report::{ReportStatus, ScalingReport};
use crate::topology::Topology;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct EngineState {
    last_scale_up: Option<DateTime<Utc>>,
    last_scale_down: Option<DateTime<Utc>>,
    last_capacity_refresh: Option<DateTime<Utc>>,
    capacity: HashMap<(OperationType, MetricType), f64>,
}

#[derive(Debug, Clone)]
pub enum EngineStatus {
    Running,
    Failed(String),
}

pub struct DecisionEngine<M: MetricSource, C: StreamControl> {
    policy: ScalingPolicy,
    metric_source: Arc<M>,
    control: Arc<C>,
    state: EngineState,
}

impl<M: MetricSource, C: StreamControl> DecisionEngine<M, C> {
    /// Construct the engine and load initial capacity. A failure here is
    /// a fatal setup failure (§7): the caller should capture it and never
    /// start the loop. The adapter's own `Clock` (not the engine's) drives
    /// any wait-for-active polling inside `control`.
    pub async fn new(policy: ScalingPolicy, metric_source: Arc<M>, control: Arc<C>) -> Result<Self> {
        let mut engine = Self {
            policy,
            metric_source,
            control,
            state: EngineState::default(),
        };
        engine
            .refresh_capacity()
            .await
            .map_err(|e| AutoscalerError::Fatal(format!("initial capacity load failed: {e}")))?;
        Ok(engine)
    }

    pub fn stream_name(&self) -> &str {
        &self.policy.stream_name
    }

    async fn refresh_capacity(&mut self) -> Result<()> {
        for &op in &self.policy.operations {
            for metric in MetricType::ALL {
                let cap = self
                    .metric_source
                    .per_shard_max(&self.policy.stream_name, op, metric)
                    .await?;
                self.state.capacity.insert((op, metric), cap);
            }
        }
        self.state.last_capacity_refresh = Some(Utc::now());
        Ok(())
    }

    fn should_refresh_capacity(&self, now: DateTime<Utc>) -> bool {
        match self.state.last_capacity_refresh {
            None => true,
            Some(last) => {
                now - last >= ChronoDuration::minutes(self.policy.refresh_capacity_after_mins)
            }
        }
    }

    /// Per-minute classification series for `(op, metric)` over the last
    /// `window_mins` minutes ending at `now`. A missing minute is treated
    /// as zero activity, which classifies Low whenever the down threshold
    /// is above zero (invariant 5: a silent window never votes Up).
    async fn classify_series(
        &self,
        op: OperationType,
        metric: MetricType,
        open_shard_count: i64,
        window_mins: i64,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Classification>, f64)> {
        let per_shard_max = *self
            .state
            .capacity
            .get(&(op, metric))
            .ok_or_else(|| AutoscalerError::Provider("capacity not loaded".into()))?;
        let capacity = per_shard_max * open_shard_count.max(1) as f64;

        let start = now - ChronoDuration::minutes(window_mins);
        let start_minute = start.timestamp() - (start.timestamp() % 60);
        let window_start = DateTime::from_timestamp(start_minute, 0).unwrap_or(start);
        let raw: BTreeMap<i64, f64> = self
            .metric_source
            .samples(&self.policy.stream_name, op, metric, window_start, now)
            .await?;
        let mut classes = Vec::with_capacity(window_mins as usize);
        let mut pct_sum = 0.0f64;
        for i in 0..window_mins {
            let ts = start_minute + i * 60;
            let observed = raw.get(&ts).copied().unwrap_or(0.0);
            let pct = if capacity > 0.0 { observed / capacity } else { 0.0 };
            pct_sum += pct;
            classes.push(classify(pct, self.policy.up.threshold_pct, self.policy.down.threshold_pct));
        }
        let avg_pct = pct_sum / window_mins.max(1) as f64;
        Ok((classes, avg_pct))
    }

    async fn vote_for_operation(
        &self,
        op: OperationType,
        open_shard_count: i64,
        now: DateTime<Utc>,
    ) -> Result<ScaleDecision> {
        let window_mins = self.policy.window_minutes();
        let mut best: Option<(MetricType, Vec<Classification>, f64)> = None;
        for metric in MetricType::ALL {
            let (classes, avg_pct) = self
                .classify_series(op, metric, open_shard_count, window_mins, now)
                .await?;
            let replace = match &best {
                None => true,
                Some((_, _, best_avg)) => avg_pct > *best_avg,
            };
            if replace {
                best = Some((metric, classes, avg_pct));
            }
        }
        let (driving_metric, classes, avg_pct) = best.expect("MetricType::ALL is non-empty");
        let high_count = classes.iter().filter(|c| **c == Classification::High).count() as i64;
        let low_count = classes.iter().filter(|c| **c == Classification::Low).count() as i64;

        let vote = if high_count >= self.policy.up.after_mins {
            ScaleDecision::Up
        } else if low_count >= self.policy.down.after_mins {
            ScaleDecision::Down
        } else {
            ScaleDecision::None
        };
        debug!(
            stream = %self.policy.stream_name,
            ?op,
            ?driving_metric,
            avg_pct,
            high_count,
            low_count,
            ?vote,
            "per-operation vote"
        );
        Ok(vote)
    }

    fn cooled_off(&self, direction: Direction, now: DateTime<Utc>) -> bool {
        let (last, cool_off_mins) = match direction {
            Direction::Up => (self.state.last_scale_up, self.policy.up.cool_off_mins),
            Direction::Down => (self.state.last_scale_down, self.policy.down.cool_off_mins),
        };
        match last {
            None => false,
            Some(last) => now - last < ChronoDuration::minutes(cool_off_mins),
        }
    }

    /// Run one monitor iteration. Never returns an error for a transient
    /// provider failure: those are logged by the caller and the loop
    /// continues, per §7's propagation policy. Returns `None` when the
    /// iteration produced no report (deferred by cool-off).
    pub async fn run_iteration(&mut self, now: DateTime<Utc>) -> Result<Option<ScalingReport>> {
        let description = self.control.describe(&self.policy.stream_name).await?;
        let current = description.open_shard_count as i64;

        let mut votes = Vec::with_capacity(self.policy.operations.len());
        for &op in &self.policy.operations {
            votes.push(self.vote_for_operation(op, current, now).await?);
        }
        let decision = combine_votes(&votes);

        info!(
            stream = %self.policy.stream_name,
            ?decision,
            current,
            "combined scaling decision"
        );

        let direction = match decision {
            ScaleDecision::Up => Some(Direction::Up),
            ScaleDecision::Down => Some(Direction::Down),
            ScaleDecision::None => None,
        };

        let report = if let Some(direction) = direction {
            if self.cooled_off(direction, now) {
                info!(stream = %self.policy.stream_name, ?direction, "deferred: cooling off");
                None
            } else {
                Some(self.execute_direction(direction, current, now).await?)
            }
        } else {
            None
        };

        if self.should_refresh_capacity(now) {
            if let Err(e) = self.refresh_capacity().await {
                warn!(stream = %self.policy.stream_name, error = %e, "periodic capacity refresh failed");
            }
        }

        Ok(report)
    }

    async fn execute_direction(
        &mut self,
        direction: Direction,
        current: i64,
        now: DateTime<Utc>,
    ) -> Result<ScalingReport> {
        let spec = match direction {
            Direction::Up => &self.policy.up,
            Direction::Down => &self.policy.down,
        };
        let amount = spec.amount()?;
        let target = crate::math::new_shard_count(
            current,
            amount,
            direction,
            Some(self.policy.min_shards),
            Some(self.policy.max_shards),
        );

        if direction == Direction::Down && current <= 1 {
            return Ok(self.make_report(
                direction,
                current,
                current,
                0,
                now,
                ReportStatus::AlreadyAtMinimum,
                None,
            ));
        }
        if target == current || target < 1 {
            return Ok(self.make_report(
                direction,
                current,
                current,
                0,
                now,
                ReportStatus::NoActionRequired,
                None,
            ));
        }

        let shards = self.control.list_open_shards(&self.policy.stream_name).await?;
        // hash_space_max is provided by the control plane via describe();
        // in this workspace it is threaded through as the max end of the
        // current shard set, since every deployment's shards already span
        // the full keyspace.
        let hash_space_max = shards.iter().map(|s| s.end).max().unwrap_or(0);
        let topology = Topology::from_raw(shards, hash_space_max);

        let planner = ResizePlanner::new(self.control.as_ref());
        let outcome = planner
            .resize(
                &self.policy.stream_name,
                topology,
                target,
                self.policy.min_shards,
                self.policy.max_shards,
                true,
            )
            .await?;

        let report = match outcome {
            PlanOutcome::NoActionRequired => self.make_report(
                direction,
                current,
                current,
                0,
                now,
                ReportStatus::NoActionRequired,
                None,
            ),
            PlanOutcome::Ok { operations_executed } => {
                match direction {
                    Direction::Up => self.state.last_scale_up = Some(now),
                    Direction::Down => self.state.last_scale_down = Some(now),
                }
                self.make_report(
                    direction,
                    current,
                    target,
                    operations_executed,
                    now,
                    ReportStatus::Ok,
                    None,
                )
            }
            PlanOutcome::Inconsistent(msg) => {
                warn!(stream = %self.policy.stream_name, %msg, "resize plan aborted");
                self.make_report(direction, current, current, 0, now, ReportStatus::Failed, Some(msg))
            }
        };

        if report.status == ReportStatus::Ok {
            if let Some(target_arn) = &spec.notify_target {
                if let Some(subject) = report.subject() {
                    let body = serde_json::to_string(&report).unwrap_or_default();
                    if let Err(e) = self.control.notify(target_arn, subject, &body).await {
                        warn!(stream = %self.policy.stream_name, error = %e, "notification failed");
                    }
                }
            }
        }

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn make_report(
        &self,
        direction: Direction,
        start_count: i64,
        end_count: i64,
        operations_executed: u32,
        finished_at: DateTime<Utc>,
        status: ReportStatus,
        message: Option<String>,
    ) -> ScalingReport {
        ScalingReport {
            stream: self.policy.stream_name.clone(),
            direction: Some(direction),
            start_shard_count: start_count,
            end_shard_count: end_count,
            operations_executed,
            started_at: finished_at,
            finished_at,
            status,
            message,
        }
    }
}

pub async fn wait_for_stream_active<C: StreamControl + ?Sized>(
    control: &C,
    clock: &dyn Clock,
    stream: &str,
) -> Result<()> {
    wait_for_active(control, clock, stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MockStreamControl;
    use crate::metrics::MockMetricSource;
    use crate::shard::Shard;

    fn make_policy(op: OperationType) -> ScalingPolicy {
        ScalingPolicy {
            stream_name: "orders".into(),
            region: "us-east-1".into(),
            operations: vec![op],
            min_shards: 1,
            max_shards: 20,
            refresh_capacity_after_mins: 10,
            check_interval_sec: 60,
            up: crate::policy::ThresholdSpec {
                threshold_pct: 75,
                after_mins: 3,
                count: Some(1),
                pct: None,
                cool_off_mins: 10,
                notify_target: None,
            },
            down: crate::policy::ThresholdSpec {
                threshold_pct: 25,
                after_mins: 3,
                count: Some(1),
                pct: None,
                cool_off_mins: 10,
                notify_target: None,
            },
        }
    }

    #[tokio::test]
    async fn missing_data_window_never_votes_up() {
        let policy = make_policy(OperationType::Put);
        let metrics = Arc::new(
            MockMetricSource::new()
                .with_capacity(OperationType::Put, MetricType::Records, 1000.0)
                .with_capacity(OperationType::Put, MetricType::Bytes, 1000.0),
        );
        let control = Arc::new(MockStreamControl::new(
            "orders",
            vec![Shard::new("a", 0, 99)],
            99,
        ));
        let mut engine = DecisionEngine::new(policy, metrics, control).await.unwrap();

        let now = Utc::now();
        let report = engine.run_iteration(now).await.unwrap();
        // No datapoints at all -> every minute is Low -> DOWN vote, but a
        // single shard can't scale down further.
        let report = report.expect("down vote should produce a report");
        assert_eq!(report.status, ReportStatus::AlreadyAtMinimum);
    }

    #[tokio::test]
    async fn cool_off_defers_second_up_action() {
        let mut policy = make_policy(OperationType::Put);
        policy.up.cool_off_mins = 30;
        let mut series = BTreeMap::new();
        let now = Utc::now();
        // Cover both the first iteration's window and the second (now+5min)
        // one, so the only thing deferring the second UP vote is cool-off,
        // not the high-load window having rolled past the sample data.
        let start = (now - ChronoDuration::minutes(3)).timestamp();
        let start_minute = start - (start % 60);
        for i in 0..8 {
            series.insert(start_minute + i * 60, 5000.0);
        }
        let metrics = Arc::new(
            MockMetricSource::new()
                .with_capacity(OperationType::Put, MetricType::Records, 1000.0)
                .with_capacity(OperationType::Put, MetricType::Bytes, 1000.0)
                .with_series(OperationType::Put, MetricType::Records, series),
        );
        let control = Arc::new(MockStreamControl::new(
            "orders",
            vec![Shard::new("a", 0, 99)],
            99,
        ));
        let mut engine = DecisionEngine::new(policy, metrics, control).await.unwrap();

        let first = engine.run_iteration(now).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, ReportStatus::Ok);

        let second = engine.run_iteration(now + ChronoDuration::minutes(5)).await.unwrap();
        assert!(second.is_none(), "second UP action within cool-off should be deferred");
    }
}
