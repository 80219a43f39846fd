//! Persists `clusters.json` (one record per cluster) and a per-cluster Ledger dump under a
//! storage directory. Writes pass through an advisory file lock held for the duration of the
//! write; a missing or corrupted `clusters.json` degrades to an empty list with a warning rather
//! than failing startup.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use conclave_types::{ClusterRecord, Message};
use fs2::FileExt;
use tokio::fs;
use tokio::sync::RwLock;

fn clusters_json_path(base: &Path) -> PathBuf {
    base.join("clusters.json")
}

fn ledger_path(base: &Path, cluster_id: &str) -> PathBuf {
    base.join(format!("ledger-{cluster_id}.jsonl"))
}

/// Runs `f` while holding an advisory lock on `lock_path`, on a blocking thread so the async
/// executor is never stalled waiting on the filesystem.
async fn with_file_lock<T: Send + 'static>(
    lock_path: PathBuf,
    exclusive: bool,
    f: impl FnOnce() -> anyhow::Result<T> + Send + 'static,
) -> anyhow::Result<T> {
    tokio::task::spawn_blocking(move || {
        let file = File::create(&lock_path).context("opening lock file")?;
        if exclusive {
            file.lock_exclusive().context("acquiring exclusive lock")?;
        } else {
            file.lock_shared().context("acquiring shared lock")?;
        }
        let result = f();
        FileExt::unlock(&file).ok();
        result
    })
    .await
    .context("lock task panicked")?
}

pub struct ClusterStorage {
    base: PathBuf,
    records: RwLock<HashMap<String, ClusterRecord>>,
    closed: AtomicBool,
}

impl ClusterStorage {
    /// Loads `clusters.json` if present. A corrupted or unreadable file yields an empty
    /// registry with a logged warning rather than aborting startup.
    pub async fn open(base: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base).await.context("creating storage directory")?;
        let records = Self::load_records(&base).await;
        Ok(Self {
            base,
            records: RwLock::new(records),
            closed: AtomicBool::new(false),
        })
    }

    async fn load_records(base: &Path) -> HashMap<String, ClusterRecord> {
        let path = clusters_json_path(base);
        let Ok(raw) = fs::read_to_string(&path).await else {
            return HashMap::new();
        };
        match serde_json::from_str::<HashMap<String, ClusterRecord>>(&raw) {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "clusters.json is corrupted, starting with an empty registry");
                HashMap::new()
            }
        }
    }

    /// Sets the closed flag; every subsequent save becomes a no-op so a shutdown race cannot
    /// resurrect a record after `close` was called.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn list(&self) -> Vec<ClusterRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, cluster_id: &str) -> Option<ClusterRecord> {
        self.records.read().await.get(cluster_id).cloned()
    }

    pub async fn upsert(&self, record: ClusterRecord) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.records.write().await.insert(record.id.clone(), record);
        self.flush_records().await
    }

    /// Removes both the `clusters.json` entry and the per-cluster ledger file (used by `kill`).
    pub async fn remove(&self, cluster_id: &str) -> anyhow::Result<()> {
        self.records.write().await.remove(cluster_id);
        if !self.is_closed() {
            self.flush_records().await?;
        }
        let ledger_file = ledger_path(&self.base, cluster_id);
        if fs::try_exists(&ledger_file).await.unwrap_or(false) {
            fs::remove_file(&ledger_file).await.context("removing ledger file")?;
        }
        Ok(())
    }

    async fn flush_records(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let snapshot = self.records.read().await.clone();
        let payload = serde_json::to_string_pretty(&snapshot)?;
        let lock_path = clusters_json_path(&self.base);
        let target = lock_path.clone();
        with_file_lock(lock_path, true, move || {
            std::fs::write(&target, payload).context("writing clusters.json")
        })
        .await
    }

    /// Appends the cluster's current message snapshot to its ledger file, one JSON object per
    /// line, overwriting any previous dump. Held under an exclusive lock so a concurrent reader
    /// never observes a half-written file.
    pub async fn save_ledger(&self, cluster_id: &str, messages: Vec<Message>) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let path = ledger_path(&self.base, cluster_id);
        let lock_path = path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let file = File::create(&lock_path).context("opening ledger lock file")?;
            file.lock_exclusive().context("acquiring exclusive ledger lock")?;
            let mut buffer = String::new();
            for message in &messages {
                buffer.push_str(&serde_json::to_string(message)?);
                buffer.push('\n');
            }
            std::fs::write(&path, buffer).context("writing ledger dump")?;
            FileExt::unlock(&file).ok();
            Ok(())
        })
        .await
        .context("ledger save task panicked")?
    }

    /// Reconstructs a cluster's message history from disk. A missing ledger file for a record
    /// still listed in `clusters.json` is an orphaned entry; the caller prunes it.
    pub async fn load_ledger(&self, cluster_id: &str) -> anyhow::Result<Option<Vec<Message>>> {
        let path = ledger_path(&self.base, cluster_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = with_file_lock(path, false, {
            let base = self.base.clone();
            let cluster_id = cluster_id.to_string();
            move || std::fs::read_to_string(ledger_path(&base, &cluster_id)).context("reading ledger dump")
        })
        .await?;
        let messages = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Message>)
            .collect::<Result<Vec<_>, _>>()
            .context("parsing ledger dump")?;
        Ok(Some(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_types::{ClusterConfig, ClusterState, MessageContent};

    fn record(id: &str) -> ClusterRecord {
        ClusterRecord {
            id: id.to_string(),
            config: ClusterConfig::default(),
            state: ClusterState::Running,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn round_trips_a_record_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClusterStorage::open(dir.path()).await.unwrap();
        storage.upsert(record("c1")).await.unwrap();

        let reopened = ClusterStorage::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().await.len(), 1);
        assert_eq!(reopened.get("c1").await.unwrap().state, ClusterState::Running);
    }

    #[tokio::test]
    async fn corrupted_clusters_json_degrades_to_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("clusters.json"), b"{not json").await.unwrap();
        let storage = ClusterStorage::open(dir.path()).await.unwrap();
        assert!(storage.list().await.is_empty());
    }

    #[tokio::test]
    async fn save_and_load_ledger_round_trips_messages() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClusterStorage::open(dir.path()).await.unwrap();
        let messages = vec![Message {
            id: 1,
            cluster_id: "c1".to_string(),
            topic: "ISSUE_OPENED".to_string(),
            sender: "system".to_string(),
            timestamp: 0,
            content: MessageContent::text("hello"),
        }];
        storage.save_ledger("c1", messages.clone()).await.unwrap();
        let loaded = storage.load_ledger("c1").await.unwrap().unwrap();
        assert_eq!(loaded, messages);
    }

    #[tokio::test]
    async fn closing_storage_makes_subsequent_saves_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClusterStorage::open(dir.path()).await.unwrap();
        storage.close();
        storage.upsert(record("c1")).await.unwrap();
        assert!(storage.list().await.is_empty());

        let reopened = ClusterStorage::open(dir.path()).await.unwrap();
        assert!(reopened.list().await.is_empty());
    }
}
