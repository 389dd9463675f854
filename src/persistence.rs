use crate::data::{Snapshot, SnapshotDocument};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Holds the most recent successful extraction result. Single writer (the
/// scheduler), many readers (web handlers). A reader sees either the old or
/// the new snapshot in full, never a mix.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomically replaces the current snapshot.
    async fn put(&self, snapshot: Snapshot) -> anyhow::Result<()>;

    async fn get(&self) -> Option<Arc<Snapshot>>;

    fn update_count(&self) -> u64;

    /// The persisted/legacy document form of the current snapshot.
    async fn document(&self) -> Option<SnapshotDocument> {
        let snapshot = self.get().await?;
        Some(SnapshotDocument {
            data: snapshot.records.clone(),
            count: snapshot.count,
            last_updated: snapshot.collected_at,
            update_count: self.update_count(),
        })
    }
}

/// In-memory cell with an optional JSON file mirror. The cell is the source
/// of truth; the file write is best-effort so a full disk never stops the
/// API from serving fresh data. A deployment that needs durable saves to
/// gate the cycle would use a different `SnapshotStore` impl.
pub struct CachedFileStore {
    cell: RwLock<Option<Arc<Snapshot>>>,
    update_count: AtomicU64,
    data_file: Option<PathBuf>,
}

impl CachedFileStore {
    pub fn new(data_file: Option<PathBuf>) -> Self {
        Self {
            cell: RwLock::new(None),
            update_count: AtomicU64::new(0),
            data_file,
        }
    }

    /// Reloads the last mirrored document so the API can serve data across
    /// restarts, before the first scrape of this process lands.
    pub async fn restore(&self) {
        let Some(path) = &self.data_file else {
            return;
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("no snapshot to restore from {}: {e}", path.display());
                return;
            }
        };

        match serde_json::from_slice::<SnapshotDocument>(&bytes) {
            Ok(doc) => {
                info!(
                    "restored snapshot of {} records (update #{}) from {}",
                    doc.count,
                    doc.update_count,
                    path.display()
                );
                self.update_count.store(doc.update_count, Ordering::SeqCst);
                let snapshot = Snapshot::new(doc.data, doc.last_updated);
                *self.cell.write().await = Some(Arc::new(snapshot));
            }
            Err(e) => warn!("ignoring unreadable snapshot file {}: {e}", path.display()),
        }
    }

    async fn mirror_to_file(&self, document: &SnapshotDocument) {
        let Some(path) = &self.data_file else {
            return;
        };

        let result = async {
            let bytes = serde_json::to_vec_pretty(document)?;
            tokio::fs::write(path, bytes).await?;
            anyhow::Ok(())
        }
        .await;

        match result {
            Ok(()) => debug!("snapshot mirrored to {}", path.display()),
            Err(e) => warn!("could not mirror snapshot to {}: {e}", path.display()),
        }
    }
}

#[async_trait]
impl SnapshotStore for CachedFileStore {
    async fn put(&self, snapshot: Snapshot) -> anyhow::Result<()> {
        let update = self.update_count.fetch_add(1, Ordering::SeqCst) + 1;
        let document = SnapshotDocument {
            data: snapshot.records.clone(),
            count: snapshot.count,
            last_updated: snapshot.collected_at,
            update_count: update,
        };

        *self.cell.write().await = Some(Arc::new(snapshot));
        debug!("snapshot replaced (update #{update})");

        self.mirror_to_file(&document).await;

        Ok(())
    }

    async fn get(&self) -> Option<Arc<Snapshot>> {
        self.cell.read().await.clone()
    }

    fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CoinRecord;
    use chrono::Utc;

    fn record(name: &str) -> CoinRecord {
        CoinRecord {
            name: name.to_string(),
            symbol: name.split_whitespace().last().unwrap().to_string(),
            image: None,
            price: None,
            change_percent_1h: None,
            market_cap: None,
            volume_24h: None,
            fetched_at: Utc::now(),
        }
    }

    fn snapshot_of(n: usize) -> Snapshot {
        let records = (0..n).map(|i| record(&format!("Coin C{i}"))).collect();
        Snapshot::new(records, Utc::now())
    }

    #[tokio::test]
    async fn empty_store_reads_as_absent() {
        let store = CachedFileStore::new(None);
        assert!(store.get().await.is_none());
        assert!(store.document().await.is_none());
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test]
    async fn put_replaces_and_counts_updates() {
        let store = CachedFileStore::new(None);

        store.put(snapshot_of(3)).await.unwrap();
        assert_eq!(store.update_count(), 1);
        assert_eq!(store.get().await.unwrap().count, 3);

        store.put(snapshot_of(5)).await.unwrap();
        assert_eq!(store.update_count(), 2);
        assert_eq!(store.get().await.unwrap().count, 5);
    }

    #[tokio::test]
    async fn readers_never_see_count_out_of_sync_with_records() {
        let store = Arc::new(CachedFileStore::new(None));
        store.put(snapshot_of(2)).await.unwrap();

        let reader_store = store.clone();
        let reader = tokio::spawn(async move {
            for _ in 0..200 {
                if let Some(snapshot) = reader_store.get().await {
                    assert_eq!(snapshot.count, snapshot.records.len());
                }
                tokio::task::yield_now().await;
            }
        });

        for i in 0..50 {
            store.put(snapshot_of(if i % 2 == 0 { 1 } else { 30 })).await.unwrap();
            tokio::task::yield_now().await;
        }

        reader.await.unwrap();
    }

    #[tokio::test]
    async fn mirrors_to_file_and_restores_across_instances() {
        let path = std::env::temp_dir().join(format!(
            "coin_table_store_test_{}.json",
            std::process::id()
        ));
        let _ = tokio::fs::remove_file(&path).await;

        let store = CachedFileStore::new(Some(path.clone()));
        store.put(snapshot_of(4)).await.unwrap();
        store.put(snapshot_of(6)).await.unwrap();

        let fresh = CachedFileStore::new(Some(path.clone()));
        fresh.restore().await;
        let restored = fresh.get().await.unwrap();
        assert_eq!(restored.count, 6);
        assert_eq!(fresh.update_count(), 2);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn file_trouble_does_not_fail_put() {
        // Points at a directory, so every mirror write fails.
        let store = CachedFileStore::new(Some(std::env::temp_dir()));
        store.put(snapshot_of(2)).await.unwrap();
        assert_eq!(store.get().await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn document_carries_consumer_fields() {
        let store = CachedFileStore::new(None);
        store.put(snapshot_of(3)).await.unwrap();

        let doc = store.document().await.unwrap();
        assert_eq!(doc.count, 3);
        assert_eq!(doc.data.len(), 3);
        assert_eq!(doc.update_count, 1);
    }
}
