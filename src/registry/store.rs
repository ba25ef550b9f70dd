use std::sync::Arc;

use parking_lot::RwLock;

use crate::registry::error::{RegistryError, RegistryResult};
use crate::registry::persistence::RegistryPersistence;
use crate::registry::types::TransferRecord;

/// Bounded, most-recent-first history of completed transfers.
///
/// Reads are served from memory. Mutations are serialized and only become
/// visible once the persistence port has stored them.
pub struct TransferRegistry {
    records: Arc<RwLock<Vec<TransferRecord>>>,
    capacity: usize,
    persistence: Arc<dyn RegistryPersistence>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Clone for TransferRegistry {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            capacity: self.capacity,
            persistence: Arc::clone(&self.persistence),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

impl TransferRegistry {
    /// Load the stored history, truncating it to `capacity` if it grew past it
    pub async fn open(
        persistence: Arc<dyn RegistryPersistence>,
        capacity: usize,
    ) -> RegistryResult<Self> {
        if capacity == 0 {
            return Err(RegistryError::InvalidCapacity(capacity));
        }

        let mut records = persistence.load().await?;
        let over_capacity = records.len() > capacity;
        if over_capacity {
            records.truncate(capacity);
            persistence.save(&records).await?;
        }
        tracing::debug!(count = records.len(), capacity, "transfer registry loaded");

        Ok(Self {
            records: Arc::new(RwLock::new(records)),
            capacity,
            persistence,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of all records, most recent first
    pub fn list(&self) -> Vec<TransferRecord> {
        self.records.read().clone()
    }

    pub fn get(&self, transfer_id: &str) -> Option<TransferRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.transfer_id == transfer_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Insert at the front, evicting the oldest records beyond capacity.
    ///
    /// A record with the same transfer id is replaced rather than duplicated.
    pub async fn append(&self, record: TransferRecord) -> RegistryResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.list();
        next.retain(|r| r.transfer_id != record.transfer_id);
        next.insert(0, record);
        next.truncate(self.capacity);
        self.commit(next).await
    }

    /// Returns whether a record was removed
    pub async fn remove_by_transfer_id(&self, transfer_id: &str) -> RegistryResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.list();
        let before = next.len();
        next.retain(|r| r.transfer_id != transfer_id);
        if next.len() == before {
            return Ok(false);
        }
        self.commit(next).await?;
        Ok(true)
    }

    /// Keep only the `n` most recent records
    pub async fn keep_last_n(&self, n: usize) -> RegistryResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.list();
        next.truncate(n);
        self.commit(next).await
    }

    pub async fn clear_all(&self) -> RegistryResult<()> {
        let _guard = self.write_lock.lock().await;
        self.persistence.clear().await?;
        self.records.write().clear();
        Ok(())
    }

    /// Persist `next`, then make it visible. Caller holds `write_lock`.
    async fn commit(&self, next: Vec<TransferRecord>) -> RegistryResult<()> {
        self.persistence.save(&next).await?;
        *self.records.write() = next;
        Ok(())
    }
}
