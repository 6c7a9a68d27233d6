//! Stream Control adapter (component B): describe/list/split/merge/notify,
//! plus the shared retry helper called out in Design Note 9.
//!
//! The original source wraps every control-plane call in an anonymous
//! callable to share retry logic ("dynamic dispatch"). Here that collapses
//! into one `retry_with` helper parameterized by a closure and an error
//! classifier, so `split`, `merge`, and `wait_for_active` all share one
//! retry ladder instead of duplicating it.

use crate::error::{AutoscalerError, Result};
use crate::shard::{Shard, ShardId};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const MODIFY_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Updating,
}

#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub status: StreamStatus,
    pub open_shard_count: usize,
}

/// Injectable time source so retry/backoff ladders can be exercised in
/// tests without real wall-clock delays.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, dur: Duration);
}

pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// Test clock: records sleep requests but never actually waits.
#[derive(Default)]
pub struct InstantClock {
    pub sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, dur: Duration) {
        self.sleeps.lock().await.push(dur);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RetryClass {
    FixedDelay(Duration),
    Backoff,
    Terminal,
}

pub fn default_classify(err: &AutoscalerError) -> RetryClass {
    match err {
        AutoscalerError::ShardBusy => RetryClass::FixedDelay(Duration::from_secs(1)),
        AutoscalerError::ProviderThrottled => RetryClass::Backoff,
        _ => RetryClass::Terminal,
    }
}

/// Shared retry helper: a generic retrying wrapper parameterized by a
/// closure returning the operation and a classifier mapping errors to a
/// retry strategy, replacing the per-call-site retry loops of the
/// original design.
pub async fn retry_with<T, F, Fut>(
    clock: &dyn Clock,
    classify: impl Fn(&AutoscalerError) -> RetryClass,
    max_retries: u32,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match classify(&e) {
                RetryClass::Terminal => return Err(e),
                RetryClass::FixedDelay(delay) => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(AutoscalerError::OperationExhausted);
                    }
                    clock.sleep(delay).await;
                }
                RetryClass::Backoff => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(AutoscalerError::OperationExhausted);
                    }
                    let ms = 100u64.saturating_mul(1u64 << attempt.min(20));
                    clock.sleep(Duration::from_millis(ms)).await;
                }
            },
        }
    }
}

/// Poll `describe` until the stream returns to `ACTIVE`: first sleep is
/// 20s, subsequent polls are 1s apart.
pub async fn wait_for_active<C: StreamControl + ?Sized>(
    control: &C,
    clock: &dyn Clock,
    stream: &str,
) -> Result<()> {
    clock.sleep(Duration::from_secs(20)).await;
    loop {
        let desc = control.describe(stream).await?;
        if desc.status == StreamStatus::Active {
            return Ok(());
        }
        clock.sleep(Duration::from_secs(1)).await;
    }
}

#[async_trait]
pub trait StreamControl: Send + Sync {
    async fn describe(&self, stream: &str) -> Result<StreamDescription>;
    async fn list_open_shards(&self, stream: &str) -> Result<Vec<Shard>>;
    /// Splits `shard_id` at `new_starting_hash`, returning the two
    /// resulting open shards `[start, h-1]` and `[h, end]`.
    async fn split(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash: u128,
        wait_for_active: bool,
    ) -> Result<(Shard, Shard)>;
    /// Merges two adjacent shards, returning the resulting open shard.
    async fn merge(
        &self,
        stream: &str,
        lower_id: &str,
        higher_id: &str,
        wait_for_active: bool,
    ) -> Result<Shard>;
    async fn notify(&self, target: &str, subject: &str, body: &str) -> Result<()>;
}

#[derive(serde::Deserialize)]
struct WireShard {
    #[serde(rename = "shardId")]
    shard_id: String,
    #[serde(rename = "startingHashKey")]
    starting_hash_key: String,
    #[serde(rename = "endingHashKey")]
    ending_hash_key: String,
    #[serde(rename = "parentShardId", default)]
    parent_shard_id: Option<String>,
    #[serde(rename = "adjacentParentShardId", default)]
    adjacent_parent_shard_id: Option<String>,
}

impl WireShard {
    fn into_shard(self) -> Result<Shard> {
        let start = self
            .starting_hash_key
            .parse::<u128>()
            .map_err(|_| AutoscalerError::Provider("malformed startingHashKey".into()))?;
        let end = self
            .ending_hash_key
            .parse::<u128>()
            .map_err(|_| AutoscalerError::Provider("malformed endingHashKey".into()))?;
        Ok(Shard {
            id: self.shard_id,
            start,
            end,
            parent: self.parent_shard_id,
            adjacent_parent: self.adjacent_parent_shard_id,
        })
    }
}

#[derive(serde::Deserialize)]
struct DescribeResponse {
    status: String,
    #[serde(rename = "openShardCount")]
    open_shard_count: usize,
}

#[derive(serde::Deserialize)]
struct SplitResponse {
    left: WireShard,
    right: WireShard,
}

#[derive(serde::Deserialize)]
struct MergeResponse {
    shard: WireShard,
}

fn classify_http_status(status: reqwest::StatusCode) -> Option<AutoscalerError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Some(AutoscalerError::ProviderThrottled)
    } else if status == reqwest::StatusCode::CONFLICT {
        Some(AutoscalerError::ShardBusy)
    } else if status == reqwest::StatusCode::NOT_FOUND {
        Some(AutoscalerError::NotFound("resource not found".into()))
    } else if status.is_success() {
        None
    } else {
        Some(AutoscalerError::Provider(format!("control plane returned {status}")))
    }
}

/// `reqwest`-backed adapter talking to a generic REST stream-control API.
/// Every call goes through [`retry_with`] so `ShardBusy`/`Throttled`
/// responses are retried per the discipline in spec.md §4.B instead of
/// each call site re-implementing its own loop.
pub struct HttpStreamControl {
    client: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpStreamControl {
    pub fn new(base_url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            clock,
        }
    }

    async fn maybe_wait_for_active(&self, stream: &str, should_wait: bool) -> Result<()> {
        if should_wait {
            wait_for_active(self, self.clock.as_ref(), stream).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamControl for HttpStreamControl {
    async fn describe(&self, stream: &str) -> Result<StreamDescription> {
        retry_with(self.clock.as_ref(), default_classify, MODIFY_RETRIES, || async {
            let url = format!("{}/streams/{}", self.base_url, stream);
            let resp = self.client.get(&url).send().await?;
            if let Some(e) = classify_http_status(resp.status()) {
                return Err(e);
            }
            let parsed: DescribeResponse = resp.json().await?;
            Ok(StreamDescription {
                status: if parsed.status == "ACTIVE" {
                    StreamStatus::Active
                } else {
                    StreamStatus::Updating
                },
                open_shard_count: parsed.open_shard_count,
            })
        })
        .await
    }

    async fn list_open_shards(&self, stream: &str) -> Result<Vec<Shard>> {
        retry_with(self.clock.as_ref(), default_classify, MODIFY_RETRIES, || async {
            let url = format!("{}/streams/{}/shards", self.base_url, stream);
            let resp = self.client.get(&url).send().await?;
            if let Some(e) = classify_http_status(resp.status()) {
                return Err(e);
            }
            let wire: Vec<WireShard> = resp.json().await?;
            wire.into_iter().map(WireShard::into_shard).collect()
        })
        .await
    }

    async fn split(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash: u128,
        wait_for_active: bool,
    ) -> Result<(Shard, Shard)> {
        let result: (Shard, Shard) = retry_with(self.clock.as_ref(), default_classify, MODIFY_RETRIES, || async {
            let url = format!("{}/streams/{}/split", self.base_url, stream);
            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({
                    "shardId": shard_id,
                    "newStartingHashKey": new_starting_hash.to_string(),
                }))
                .send()
                .await?;
            if let Some(e) = classify_http_status(resp.status()) {
                return Err(e);
            }
            let parsed: SplitResponse = resp.json().await?;
            Ok((parsed.left.into_shard()?, parsed.right.into_shard()?))
        })
        .await?;
        self.maybe_wait_for_active(stream, wait_for_active).await?;
        Ok(result)
    }

    async fn merge(
        &self,
        stream: &str,
        lower_id: &str,
        higher_id: &str,
        wait_for_active: bool,
    ) -> Result<Shard> {
        let result: Shard = retry_with(self.clock.as_ref(), default_classify, MODIFY_RETRIES, || async {
            let url = format!("{}/streams/{}/merge", self.base_url, stream);
            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({
                    "lowerShardId": lower_id,
                    "higherShardId": higher_id,
                }))
                .send()
                .await?;
            if let Some(e) = classify_http_status(resp.status()) {
                return Err(e);
            }
            let parsed: MergeResponse = resp.json().await?;
            parsed.shard.into_shard()
        })
        .await?;
        self.maybe_wait_for_active(stream, wait_for_active).await?;
        Ok(result)
    }

    async fn notify(&self, target: &str, subject: &str, body: &str) -> Result<()> {
        let url = format!("{}/notify", self.base_url);
        let _ = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "target": target, "subject": subject, "body": body }))
            .send()
            .await?;
        Ok(())
    }
}

/// In-memory `StreamControl` used for tests and the scenario table in
/// spec.md §8. Has no retry/backoff behavior of its own - it's the
/// control plane's happy path, not the adapter's retry ladder.
pub struct MockStreamControl {
    stream: String,
    shards: Arc<Mutex<Vec<Shard>>>,
    next_id: AtomicU64,
    ops: AtomicU64,
    pub notifications: Mutex<Vec<(String, String, String)>>,
}

impl MockStreamControl {
    /// `hash_space_max` is accepted for symmetry with the real control
    /// plane's topology but isn't needed by this in-memory double: the
    /// shard set it's handed already defines the keyspace bound.
    pub fn new(stream: impl Into<String>, shards: Vec<Shard>, _hash_space_max: u128) -> Self {
        Self {
            stream: stream.into(),
            shards: Arc::new(Mutex::new(shards)),
            next_id: AtomicU64::new(1000),
            ops: AtomicU64::new(0),
            notifications: Mutex::new(Vec::new()),
        }
    }

    fn next_shard_id(&self) -> ShardId {
        format!("shardId-{:012}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamControl for MockStreamControl {
    async fn describe(&self, stream: &str) -> Result<StreamDescription> {
        if stream != self.stream {
            return Err(AutoscalerError::NotFound(stream.to_string()));
        }
        let shards = self.shards.lock().await;
        Ok(StreamDescription {
            status: StreamStatus::Active,
            open_shard_count: shards.len(),
        })
    }

    async fn list_open_shards(&self, stream: &str) -> Result<Vec<Shard>> {
        if stream != self.stream {
            return Err(AutoscalerError::NotFound(stream.to_string()));
        }
        Ok(self.shards.lock().await.clone())
    }

    async fn split(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash: u128,
        _wait_for_active: bool,
    ) -> Result<(Shard, Shard)> {
        if stream != self.stream {
            return Err(AutoscalerError::NotFound(stream.to_string()));
        }
        let mut shards = self.shards.lock().await;
        let idx = shards
            .iter()
            .position(|s| s.id == shard_id)
            .ok_or_else(|| AutoscalerError::NotFound(shard_id.to_string()))?;
        let parent = shards[idx].clone();
        if new_starting_hash <= parent.start || new_starting_hash > parent.end {
            return Err(AutoscalerError::Inconsistent(
                "split hash out of parent range".into(),
            ));
        }
        let mut left = Shard::new(self.next_shard_id(), parent.start, new_starting_hash - 1);
        left.parent = Some(parent.id.clone());
        let mut right = Shard::new(self.next_shard_id(), new_starting_hash, parent.end);
        right.parent = Some(parent.id.clone());
        shards.splice(idx..=idx, [left.clone(), right.clone()]);
        self.ops.fetch_add(1, Ordering::SeqCst);
        Ok((left, right))
    }

    async fn merge(
        &self,
        stream: &str,
        lower_id: &str,
        higher_id: &str,
        _wait_for_active: bool,
    ) -> Result<Shard> {
        if stream != self.stream {
            return Err(AutoscalerError::NotFound(stream.to_string()));
        }
        let mut shards = self.shards.lock().await;
        let lower_idx = shards
            .iter()
            .position(|s| s.id == lower_id)
            .ok_or_else(|| AutoscalerError::NotFound(lower_id.to_string()))?;
        let higher_idx = shards
            .iter()
            .position(|s| s.id == higher_id)
            .ok_or_else(|| AutoscalerError::NotFound(higher_id.to_string()))?;
        let lower = shards[lower_idx].clone();
        let higher = shards[higher_idx].clone();
        if lower.end + 1 != higher.start {
            return Err(AutoscalerError::Inconsistent(
                "merge requires adjacency".into(),
            ));
        }
        let mut merged = Shard::new(self.next_shard_id(), lower.start, higher.end);
        merged.parent = Some(lower.id.clone());
        merged.adjacent_parent = Some(higher.id.clone());
        let (lo, hi) = if lower_idx < higher_idx {
            (lower_idx, higher_idx)
        } else {
            (higher_idx, lower_idx)
        };
        shards.splice(lo..=hi, [merged.clone()]);
        self.ops.fetch_add(1, Ordering::SeqCst);
        Ok(merged)
    }

    async fn notify(&self, target: &str, subject: &str, body: &str) -> Result<()> {
        self.notifications
            .lock()
            .await
            .push((target.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_with_exhausts_fixed_delay_and_surfaces_operation_exhausted() {
        let clock = InstantClock::default();
        let mut calls = 0u32;
        let result: Result<()> = retry_with(&clock, default_classify, 2, || {
            calls += 1;
            async { Err(AutoscalerError::ShardBusy) }
        })
        .await;
        assert!(matches!(result, Err(AutoscalerError::OperationExhausted)));
        assert_eq!(calls, 3); // initial attempt + 2 retries
    }

    #[tokio::test]
    async fn retry_with_succeeds_after_transient_throttle() {
        let clock = InstantClock::default();
        let mut calls = 0u32;
        let result: Result<i32> = retry_with(&clock, default_classify, 5, || {
            calls += 1;
            async move {
                if calls < 3 {
                    Err(AutoscalerError::ProviderThrottled)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_with_does_not_retry_terminal_errors() {
        let clock = InstantClock::default();
        let mut calls = 0u32;
        let result: Result<()> = retry_with(&clock, default_classify, 5, || {
            calls += 1;
            async { Err(AutoscalerError::NotFound("x".into())) }
        })
        .await;
        assert!(matches!(result, Err(AutoscalerError::NotFound(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn mock_split_produces_disjoint_children() {
        let control = MockStreamControl::new("s", vec![Shard::new("a", 0, 99)], 99);
        let (left, right) = control.split("s", "a", 50, false).await.unwrap();
        assert_eq!(left.end + 1, right.start);
        assert_eq!(left.start, 0);
        assert_eq!(right.end, 99);
    }

    #[tokio::test]
    async fn mock_merge_rejects_non_adjacent() {
        let control = MockStreamControl::new(
            "s",
            vec![Shard::new("a", 0, 9), Shard::new("b", 20, 29)],
            99,
        );
        let result = control.merge("s", "a", "b", false).await;
        assert!(matches!(result, Err(AutoscalerError::Inconsistent(_))));
    }
}
