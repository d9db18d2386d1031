use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use flexstat_common::{RestoredState, RuntimeConfig, Snapshot};

/// JSON files under the data directory: `runtime.json` holds configuration,
/// `state.json` the snapshot restored on the next start.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    snapshot_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Serialize)]
struct StoredSnapshot<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FLEXSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.flexstat"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            snapshot_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let raw = {
            let _guard = self.lock.lock().await;
            match tokio::fs::read(self.runtime_path.as_ref()).await {
                Ok(raw) => Some(raw),
                Err(err) if err.kind() == ErrorKind::NotFound => None,
                Err(err) => return Err(err.into()),
            }
        };

        match raw {
            Some(raw) => serde_json::from_slice(&raw).with_context(|| {
                format!("malformed config at {}", self.runtime_path.display())
            }),
            None => {
                let runtime = RuntimeConfig::default();
                self.save_runtime_config(&runtime).await?;
                info!(
                    "wrote default config to {}",
                    self.runtime_path.display()
                );
                Ok(runtime)
            }
        }
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let payload = serde_json::to_vec_pretty(runtime)?;
        self.write(self.runtime_path.as_ref(), payload).await
    }

    pub async fn load_snapshot(&self) -> anyhow::Result<Option<RestoredState>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.snapshot_path.as_ref()).await {
            Ok(raw) => {
                let restored = serde_json::from_slice(&raw).with_context(|| {
                    format!("malformed snapshot at {}", self.snapshot_path.display())
                })?;
                Ok(Some(restored))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let payload = serde_json::to_vec_pretty(&StoredSnapshot {
            snapshot,
            saved_at: Utc::now(),
        })?;
        self.write(self.snapshot_path.as_ref(), payload).await
    }

    async fn write(&self, path: &Path, payload: Vec<u8>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Readers only ever see a complete file.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}
