use std::sync::{Arc, Mutex, MutexGuard};

use super::{FrameRecord, FrameSink, SinkError};

/// Shared in-memory sink. Clones see the same records.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<FrameRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn records(&self) -> Vec<FrameRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FrameRecord>> {
        // Pushes are atomic, so a poisoned lock still guards a whole Vec.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for MemorySink {
    async fn write(&mut self, record: &FrameRecord) -> Result<(), SinkError> {
        self.lock().push(record.clone());
        Ok(())
    }
}
