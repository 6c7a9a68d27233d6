//! Metric Source adapter (component A).

use crate::decision::{MetricType, OperationType};
use crate::error::{AutoscalerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Aggregated sum-per-minute datapoints over `[start, end]`. Gaps are
    /// permitted; callers interpret a missing minute as zero activity.
    async fn samples(
        &self,
        stream: &str,
        op: OperationType,
        metric: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<i64, f64>>;

    /// The provider-published quota per shard for `(op, metric)`.
    async fn per_shard_max(&self, stream: &str, op: OperationType, metric: MetricType) -> Result<f64>;
}

/// `reqwest`-backed adapter hitting a generic JSON metrics API. Grounded
/// on the `paradigm-api`/`paradigm-contributor` use of a shared
/// `reqwest::Client` against a configured base URL.
pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetricSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn op_str(op: OperationType) -> &'static str {
        match op {
            OperationType::Put => "PUT",
            OperationType::Get => "GET",
        }
    }

    fn metric_str(metric: MetricType) -> &'static str {
        match metric {
            MetricType::Records => "Records",
            MetricType::Bytes => "Bytes",
        }
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn samples(
        &self,
        stream: &str,
        op: OperationType,
        metric: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<i64, f64>> {
        let url = format!("{}/samples", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[
                ("stream", stream),
                ("op", Self::op_str(op)),
                ("metric", Self::metric_str(metric)),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
            ])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AutoscalerError::ProviderThrottled);
        }
        if !resp.status().is_success() {
            return Err(AutoscalerError::Provider(format!(
                "metric source returned {}",
                resp.status()
            )));
        }
        let raw: BTreeMap<String, f64> = resp.json().await?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| k.parse::<i64>().ok().map(|ts| (ts, v)))
            .collect())
    }

    async fn per_shard_max(&self, stream: &str, op: OperationType, metric: MetricType) -> Result<f64> {
        let url = format!("{}/capacity", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[
                ("stream", stream),
                ("op", Self::op_str(op)),
                ("metric", Self::metric_str(metric)),
            ])
            .send()
            .await;
        let resp = resp.map_err(|e| AutoscalerError::Fatal(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AutoscalerError::ProviderThrottled);
        }
        if !resp.status().is_success() {
            return Err(AutoscalerError::Fatal(format!(
                "metric source returned {} loading capacity",
                resp.status()
            )));
        }
        #[derive(serde::Deserialize)]
        struct CapacityResponse {
            #[serde(rename = "perShardMax")]
            per_shard_max: f64,
        }
        let parsed: CapacityResponse = resp.json().await.map_err(|e| AutoscalerError::Fatal(e.to_string()))?;
        Ok(parsed.per_shard_max)
    }
}

/// In-memory adapter for tests.
#[derive(Default)]
pub struct MockMetricSource {
    pub capacity: std::collections::HashMap<(OperationType, MetricType), f64>,
    pub series: std::collections::HashMap<(OperationType, MetricType), BTreeMap<i64, f64>>,
}

impl MockMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, op: OperationType, metric: MetricType, cap: f64) -> Self {
        self.capacity.insert((op, metric), cap);
        self
    }

    pub fn with_series(
        mut self,
        op: OperationType,
        metric: MetricType,
        series: BTreeMap<i64, f64>,
    ) -> Self {
        self.series.insert((op, metric), series);
        self
    }
}

#[async_trait]
impl MetricSource for MockMetricSource {
    async fn samples(
        &self,
        _stream: &str,
        op: OperationType,
        metric: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<i64, f64>> {
        let full = self.series.get(&(op, metric)).cloned().unwrap_or_default();
        Ok(full
            .into_iter()
            .filter(|(ts, _)| *ts >= start.timestamp() && *ts <= end.timestamp())
            .collect())
    }

    async fn per_shard_max(&self, _stream: &str, op: OperationType, metric: MetricType) -> Result<f64> {
        self.capacity
            .get(&(op, metric))
            .copied()
            .ok_or_else(|| AutoscalerError::Fatal(format!("no capacity configured for {op:?}/{metric:?}")))
    }
}
