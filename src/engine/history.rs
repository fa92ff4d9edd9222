use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::FusedSignalRecord;
use crate::error::Result;

/// Append-only destination for fused signals (calibration history).
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn record(&self, record: FusedSignalRecord) -> Result<()>;
}

/// In-process history, optionally bounded to the most recent `capacity` rows
#[derive(Debug, Default)]
pub struct MemorySignalLog {
    records: RwLock<Vec<FusedSignalRecord>>,
    capacity: Option<usize>,
}

impl MemorySignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Vec::with_capacity(capacity)),
            capacity: Some(capacity.max(1)),
        }
    }

    pub async fn records(&self) -> Vec<FusedSignalRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn for_condition(&self, condition_id: &str) -> Vec<FusedSignalRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.condition_id == condition_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SignalSink for MemorySignalLog {
    async fn record(&self, record: FusedSignalRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.push(record);
        if let Some(cap) = self.capacity {
            if records.len() > cap {
                let overflow = records.len() - cap;
                records.drain(..overflow);
            }
        }
        Ok(())
    }
}
