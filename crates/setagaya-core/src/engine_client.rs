use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ControllerError;
use crate::interfaces::ClusterDriver;
use crate::model::metric::parse_jtl_line;
use crate::model::{EngineDataConfig, EngineId, EngineLifecycle, SetagayaMetric};
use crate::retry::retry;

/// A per-engine handle owning a control-plane URL and the long-lived
/// event-source subscription used to drain its metric stream.
///
/// The HTTP transport is a connection-pooling reqwest client builder; the
/// subscribe/read_metrics lifecycle follows the usual long-lived-connection
/// shape (connect, loop reading frames, unblock on a cancel signal),
/// adapted here to server-sent events rather than a bidirectional socket.
pub struct EngineClient {
    pub id: EngineId,
    http: Client,
    base_url: RwLock<Option<String>>,
    lifecycle: RwLock<EngineLifecycle>,
    cancel_token: RwLock<Option<CancellationToken>>,
    run_id: RwLock<Option<i64>>,
}

impl EngineClient {
    pub fn new(id: EngineId) -> Result<Self, ControllerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            id,
            http,
            base_url: RwLock::new(None),
            lifecycle: RwLock::new(EngineLifecycle::Created),
            cancel_token: RwLock::new(None),
            run_id: RwLock::new(None),
        })
    }

    pub async fn lifecycle(&self) -> EngineLifecycle {
        *self.lifecycle.read().await
    }

    async fn transition(&self, next: EngineLifecycle) -> Result<(), ControllerError> {
        let mut current = self.lifecycle.write().await;
        if !current.can_transition_to(next) {
            return Err(ControllerError::Internal(format!(
                "illegal engine lifecycle transition {} -> {next}",
                *current
            )));
        }
        *current = next;
        Ok(())
    }

    /// Asks the driver to provision a pod for this engine. Idempotent at
    /// the driver layer.
    pub async fn deploy(
        &self,
        driver: &dyn ClusterDriver,
        project_id: uuid::Uuid,
        container_spec: &crate::interfaces::cluster_driver::ContainerSpec,
    ) -> Result<(), ControllerError> {
        driver
            .deploy_engine(project_id, self.id.collection_id, self.id.plan_id, self.id.engine_index, container_spec)
            .await?;
        self.transition(EngineLifecycle::Deployed).await
    }

    /// Binds this client to a resolved URL, as produced by the cluster
    /// driver's `FetchEngineUrlsByPlan` (owned by the Plan Controller).
    pub async fn set_url(&self, url: impl Into<String>) {
        *self.base_url.write().await = Some(url.into());
    }

    async fn url(&self, path: &str) -> Result<String, ControllerError> {
        let base = self
            .base_url
            .read()
            .await
            .clone()
            .ok_or_else(|| ControllerError::Internal("engine has no resolved URL".to_string()))?;
        Ok(format!("{base}{path}"))
    }

    /// `POST /start`. `200` is success; `409` (already triggered) is
    /// absorbed as success and logged; `404` fails with the exempt
    /// `FileNotFound`, never retried; any other non-2xx is retryable.
    pub async fn trigger(&self, config: &EngineDataConfig) -> Result<(), ControllerError> {
        let url = self.url("/start").await?;
        retry(|| async {
            let response = self.http.post(&url).json(config).send().await?;
            match response.status().as_u16() {
                200 => Ok(()),
                409 => {
                    tracing::info!(engine = ?self.id, "engine already triggered, treating as success");
                    Ok(())
                }
                404 => Err(ControllerError::FileNotFound(format!(
                    "test artifact missing for engine {:?}",
                    self.id
                ))),
                status => Err(ControllerError::Transient(format!("engine /start returned {status}"))),
            }
        })
        .await?;
        self.transition(EngineLifecycle::Triggered).await
    }

    /// Opens the long-lived `/stream` connection, binding this engine to
    /// `run_id`. The cancel handle is stored so `terminate` can unblock the
    /// drain task started by `read_metrics`.
    pub async fn subscribe(&self, run_id: i64) -> Result<(), ControllerError> {
        *self.run_id.write().await = Some(run_id);
        *self.cancel_token.write().await = Some(CancellationToken::new());
        self.transition(EngineLifecycle::Subscribed).await
    }

    /// `GET /progress`; `200` means running, anything else (including
    /// `404` idle) means not running. Retried transiently — a dead
    /// connection to a still-running engine should not read as
    /// "finished".
    pub async fn progress(&self) -> Result<bool, ControllerError> {
        let url = self.url("/progress").await?;
        retry(|| async {
            let response = self.http.get(&url).send().await?;
            Ok(response.status().as_u16() == 200)
        })
        .await
    }

    /// `force` (purge path) skips the remote call and only closes the
    /// stream; otherwise `POST /stop` is attempted first.
    pub async fn terminate(&self, force: bool) -> Result<(), ControllerError> {
        if !force {
            if let Ok(url) = self.url("/stop").await {
                let _ = self.http.post(&url).send().await;
            }
        }
        if let Some(token) = self.cancel_token.write().await.take() {
            token.cancel();
        }
        self.transition(EngineLifecycle::Terminated).await
    }

    pub async fn reachable(&self, driver: &dyn ClusterDriver) -> Result<bool, ControllerError> {
        let url = self.url("").await?;
        driver.service_reachable(&url).await
    }

    /// Produces a finite, lazy, single-producer sequence of parsed metrics
    /// drawn from the event-source. Not restartable: once the receiver is
    /// exhausted (stream closed or cancelled) a new `subscribe` is needed.
    pub async fn read_metrics(&self) -> Result<mpsc::Receiver<SetagayaMetric>, ControllerError> {
        let url = self.url("/stream").await?;
        let run_id = self
            .run_id
            .read()
            .await
            .ok_or_else(|| ControllerError::Internal("read_metrics called before subscribe".to_string()))?;
        let cancel_token = self
            .cancel_token
            .read()
            .await
            .clone()
            .ok_or_else(|| ControllerError::Internal("read_metrics called before subscribe".to_string()))?;

        let (tx, rx) = mpsc::channel(1024);
        let http = self.http.clone();
        let engine_id = self.id.clone();
        let collection_id = engine_id.collection_id;
        let plan_id = engine_id.plan_id;

        tokio::spawn(async move {
            let response = match http.get(&url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(error = %err, "failed to open engine stream");
                    return;
                }
            };
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    chunk = stream.next() => {
                        let Some(chunk) = chunk else { break };
                        let Ok(chunk) = chunk else { break };
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim_end_matches('\r').to_string();
                            buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            match parse_jtl_line(&line, collection_id, plan_id, engine_id.clone(), run_id) {
                                Some(metric) => {
                                    if tx.send(metric).await.is_err() {
                                        return;
                                    }
                                }
                                None => warn!(%line, "dropped malformed metric line"),
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
