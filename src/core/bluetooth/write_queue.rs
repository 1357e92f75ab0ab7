//! Serialized write queue towards the data characteristic
//! Commands are coalesced per device so only the newest one is ever sent, and
//! transient failures are retried a bounded number of times.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::commands::PlejdCommand;
use crate::core::bluetooth::constants::MAX_RETRY_COUNT;
use crate::error::Result;

/// Writes one plain-text payload to the mesh
#[async_trait]
pub trait PayloadWriter: Send + Sync {
    async fn write_payload(&self, payload: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteQueueItem {
    pub device_id: u8,
    pub payload: Vec<u8>,
    pub should_retry: bool,
    pub retry_count: u32,
    pub label: String,
}

impl WriteQueueItem {
    pub fn new(command: PlejdCommand, should_retry: bool) -> Self {
        Self {
            device_id: command.device_id(),
            payload: command.to_bytes(),
            should_retry,
            retry_count: 0,
            label: command.label(),
        }
    }
}

/// Counters of a single drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub sent: usize,
    pub superseded: usize,
    pub failed: usize,
    pub dropped: usize,
    pub requeued: usize,
}

#[derive(Default)]
pub struct WriteQueue {
    items: Mutex<VecDeque<WriteQueueItem>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<WriteQueueItem>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues a command behind everything already pending
    pub fn push(&self, item: WriteQueueItem) {
        trace!("Queueing {} for device {}", item.label, item.device_id);
        self.items().push_back(item);
    }

    pub fn clear(&self) {
        self.items().clear();
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Takes the oldest item. The flag is true when a newer item for the
    /// same device is still queued, in which case the item must not be sent.
    fn pop_next(&self) -> Option<(WriteQueueItem, bool)> {
        let mut items = self.items();
        let item = items.pop_front()?;
        let superseded = items.iter().any(|other| other.device_id == item.device_id);
        Some((item, superseded))
    }

    /// Runs one drain pass.
    ///
    /// The first retry of an item happens within the same pass; any later
    /// retry, or dropping an item that ran out of retries, ends the pass.
    /// When `cancel` fires during a write, the item goes back to the front of
    /// the queue and the pass ends.
    pub async fn drain(
        &self,
        writer: &dyn PayloadWriter,
        cancel: &CancellationToken,
    ) -> DrainSummary {
        let mut summary = DrainSummary::default();

        while !cancel.is_cancelled() {
            let Some((mut item, superseded)) = self.pop_next() else {
                break;
            };
            if superseded {
                debug!(
                    "Skipping {} for device {} due to more recent command in queue",
                    item.label, item.device_id
                );
                summary.superseded += 1;
                continue;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                outcome = writer.write_payload(&item.payload) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                debug!(
                    "Write of {} to device {} interrupted, requeued",
                    item.label, item.device_id
                );
                summary.requeued += 1;
                self.items().push_front(item);
                break;
            };

            match outcome {
                Ok(()) => {
                    summary.sent += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    if !item.should_retry {
                        debug!("Write of {} to device {} failed: {}", item.label, item.device_id, e);
                        continue;
                    }

                    item.retry_count += 1;
                    if item.retry_count > MAX_RETRY_COUNT {
                        error!(
                            "Write of {} to device {} failed, retry count exceeded: {}",
                            item.label, item.device_id, e
                        );
                        summary.dropped += 1;
                        break;
                    }

                    warn!(
                        "Write of {} to device {} failed, retry {}/{}: {}",
                        item.label, item.device_id, item.retry_count, MAX_RETRY_COUNT, e
                    );
                    let retry_count = item.retry_count;
                    self.items().push_front(item);
                    if retry_count > 1 {
                        break;
                    }
                }
            }
        }

        summary
    }

    /// Drains the queue every `interval` until `cancel` fires
    pub async fn run(
        self: Arc<Self>,
        writer: Arc<dyn PayloadWriter>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        info!("Write queue started, interval {:?}", interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let summary = self.drain(writer.as_ref(), &cancel).await;
            if summary != DrainSummary::default() {
                trace!("Write queue pass: {:?}", summary);
            }
        }
        info!("Write queue stopped");
    }
}
