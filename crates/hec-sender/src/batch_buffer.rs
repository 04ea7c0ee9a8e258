// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, MutexGuard};

use crate::errors::SendError;
use crate::event::EventRecord;

/// Count and size thresholds that trigger a flush.
///
/// A zero on one axis means "unbounded" as long as the other axis is set. When both are zero
/// every append crosses the count threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    max_count: usize,
    max_size: usize,
}

impl BatchLimits {
    pub fn new(max_count: usize, max_size: usize) -> Self {
        let (max_count, max_size) = match (max_count, max_size) {
            (0, size) if size > 0 => (usize::MAX, size),
            (count, 0) if count > 0 => (count, usize::MAX),
            other => other,
        };
        BatchLimits {
            max_count,
            max_size,
        }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn crossed(&self, count: usize, size: usize) -> bool {
        count >= self.max_count || size > self.max_size
    }
}

#[derive(Default)]
struct Pending {
    records: Vec<EventRecord>,
    size: usize,
    sealed: bool,
}

/// Shared accumulator of events waiting for the next flush.
///
/// Draining swaps the pending records out for a fresh empty vector under the lock, so a batch that
/// has been handed off is never touched again by producers.
pub struct BatchBuffer {
    limits: BatchLimits,
    pending: Mutex<Pending>,
}

impl BatchBuffer {
    pub fn new(limits: BatchLimits) -> Self {
        BatchBuffer {
            limits,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Appends a record and reports whether a flush threshold is now crossed.
    pub fn append(&self, record: EventRecord) -> Result<bool, SendError> {
        let mut pending = self.lock();
        if pending.sealed {
            return Err(SendError::Closed);
        }
        pending.size += record.estimated_size();
        pending.records.push(record);
        Ok(self.limits.crossed(pending.records.len(), pending.size))
    }

    /// Takes every pending record, leaving the buffer empty.
    pub fn drain(&self) -> Vec<EventRecord> {
        let mut pending = self.lock();
        pending.size = 0;
        std::mem::take(&mut pending.records)
    }

    /// Drains and refuses any further appends.
    pub fn seal(&self) -> Vec<EventRecord> {
        let mut pending = self.lock();
        pending.sealed = true;
        pending.size = 0;
        std::mem::take(&mut pending.records)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Running size estimate of the pending records
    pub fn estimated_size(&self) -> usize {
        self.lock().size
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // A panic while holding the lock cannot leave `Pending` half updated, so keep going
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
