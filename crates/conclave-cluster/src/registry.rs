//! Top-level registry over many clusters: `start`, `stop`, `kill`, `killAll`, `resume`,
//! `listClusters`, `getStatus`, `export`. Cluster ids are globally unique by construction (each
//! is a fresh UUID); `close` makes every subsequent persistence write a no-op so a shutdown race
//! can never resurrect a record the registry already considers gone.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_config::ValidationReport;
use conclave_runner::TaskRunner;
use conclave_types::{ClusterConfig, ClusterState, InputSource, Settings};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::controller::ClusterController;
use crate::export::{self, ExportFormat};
use crate::storage::ClusterStorage;

pub struct ClusterRegistry<R> {
    storage: Arc<ClusterStorage>,
    runner: Arc<R>,
    settings: Settings,
    max_parallel: usize,
    clusters: RwLock<HashMap<String, Arc<ClusterController<R>>>>,
}

impl<R: TaskRunner + 'static> ClusterRegistry<R> {
    pub fn new(storage: Arc<ClusterStorage>, runner: Arc<R>, settings: Settings, max_parallel: usize) -> Self {
        Self { storage, runner, settings, max_parallel, clusters: RwLock::new(HashMap::new()) }
    }

    pub async fn start(&self, raw_config: &Value, config: ClusterConfig, input: InputSource, now_ms: i64) -> Result<String, ValidationReport> {
        let controller = ClusterController::start(raw_config, config, input, self.runner.clone(), self.settings.clone(), self.storage.clone(), self.max_parallel, now_ms).await?;
        let id = controller.id.clone();
        self.clusters.write().await.insert(id.clone(), controller);
        Ok(id)
    }

    pub async fn stop(&self, cluster_id: &str) -> anyhow::Result<()> {
        let controller = self.get(cluster_id).await?;
        controller.stop().await
    }

    pub async fn kill(&self, cluster_id: &str) -> anyhow::Result<()> {
        let controller = self.get(cluster_id).await?;
        controller.kill().await?;
        self.clusters.write().await.remove(cluster_id);
        Ok(())
    }

    pub async fn kill_all(&self) -> anyhow::Result<()> {
        let ids: Vec<String> = self.clusters.read().await.keys().cloned().collect();
        for id in ids {
            self.kill(&id).await?;
        }
        Ok(())
    }

    pub async fn resume(&self, cluster_id: &str) -> anyhow::Result<()> {
        let controller = ClusterController::resume(cluster_id, self.runner.clone(), self.settings.clone(), self.storage.clone(), self.max_parallel).await?;
        self.clusters.write().await.insert(cluster_id.to_string(), controller);
        Ok(())
    }

    pub async fn list_clusters(&self) -> Vec<(String, ClusterState)> {
        let mut out = Vec::new();
        for record in self.storage.list().await {
            out.push((record.id, record.state));
        }
        out
    }

    pub async fn get_status(&self, cluster_id: &str) -> Option<ClusterState> {
        self.storage.get(cluster_id).await.map(|record| record.state)
    }

    pub async fn export(&self, cluster_id: &str, format: ExportFormat) -> anyhow::Result<String> {
        let record = self.storage.get(cluster_id).await.ok_or_else(|| anyhow::anyhow!("no such cluster {cluster_id}"))?;
        let messages = match self.clusters.read().await.get(cluster_id) {
            Some(controller) => controller.bus().await.ledger().snapshot().await,
            None => self.storage.load_ledger(cluster_id).await?.unwrap_or_default(),
        };
        Ok(match format {
            ExportFormat::Json => export::render_json(cluster_id, record.state, record.created_at, &messages).to_string(),
            ExportFormat::Markdown => export::render_markdown(cluster_id, record.state, record.created_at, &messages),
        })
    }

    pub fn close(&self) {
        self.storage.close();
    }

    async fn get(&self, cluster_id: &str) -> anyhow::Result<Arc<ClusterController<R>>> {
        self.clusters
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("cluster {cluster_id} is not running in this process"))
    }
}
