//! Controller (component G): spawns one Decision Engine per configured
//! stream and surfaces per-engine health.

use crate::control::StreamControl;
use crate::engine::{DecisionEngine, EngineStatus};
use crate::metrics::MetricSource;
use crate::policy::ScalingPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Builds one `StreamControl`/`MetricSource` pair per policy. Kept as a
/// trait so the binary crate can wire concrete HTTP adapters while tests
/// use in-memory doubles, without the controller depending on either.
pub trait AdapterFactory: Send + Sync {
    type Metrics: MetricSource + 'static;
    type Control: StreamControl + 'static;

    fn metric_source(&self, policy: &ScalingPolicy) -> Arc<Self::Metrics>;
    fn stream_control(&self, policy: &ScalingPolicy) -> Arc<Self::Control>;
}

pub struct Controller {
    status: Arc<RwLock<HashMap<String, EngineStatus>>>,
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    suppress_abort_on_fatal: bool,
}

impl Controller {
    pub fn new(suppress_abort_on_fatal: bool) -> Self {
        let (stop_tx, _rx) = watch::channel(false);
        Self {
            status: Arc::new(RwLock::new(HashMap::new())),
            stop_tx,
            tasks: JoinSet::new(),
            suppress_abort_on_fatal,
        }
    }

    pub fn status_handle(&self) -> Arc<RwLock<HashMap<String, EngineStatus>>> {
        self.status.clone()
    }

    /// Start one engine per policy. A policy whose initial capacity load
    /// fails is recorded as `Failed` immediately and never gets a loop.
    pub async fn spawn<F>(&mut self, policies: Vec<ScalingPolicy>, factory: F)
    where
        F: AdapterFactory + 'static,
    {
        let factory = Arc::new(factory);
        for policy in policies {
            let stream = policy.stream_name.clone();
            let metric_source = factory.metric_source(&policy);
            let control = factory.stream_control(&policy);
            let status = self.status.clone();
            let mut stop_rx = self.stop_tx.subscribe();
            let check_interval = policy.check_interval_sec;

            status.write().await.insert(stream.clone(), EngineStatus::Running);

            self.tasks.spawn(async move {
                let engine = DecisionEngine::new(policy, metric_source, control).await;
                let mut engine = match engine {
                    Ok(engine) => engine,
                    Err(e) => {
                        error!(stream = %stream, error = %e, "fatal engine setup failure");
                        status
                            .write()
                            .await
                            .insert(stream.clone(), EngineStatus::Failed(e.to_string()));
                        return;
                    }
                };

                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(check_interval)) => {
                            if let Err(e) = engine.run_iteration(chrono::Utc::now()).await {
                                error!(stream = %stream, error = %e, "iteration failed, continuing");
                            }
                        }
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                info!(stream = %stream, "stop signal received");
                                break;
                            }
                        }
                    }
                }
            });
        }
    }

    pub async fn is_healthy(&self) -> bool {
        if self.suppress_abort_on_fatal {
            return true;
        }
        !self
            .status
            .read()
            .await
            .values()
            .any(|s| matches!(s, EngineStatus::Failed(_)))
    }

    pub async fn engine_statuses(&self) -> HashMap<String, EngineStatus> {
        self.status.read().await.clone()
    }

    /// Signal every engine to stop its inter-iteration sleep promptly and
    /// not start a new plan, then await their exit.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        while self.tasks.join_next().await.is_some() {}
    }
}
