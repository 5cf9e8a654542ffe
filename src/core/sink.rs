//! Per-connection dispatch sink
//!
//! Decouples stream parsing from persistence: the connection worker enqueues
//! decoded items onto a bounded channel and a single consumer task drains
//! them to the `DeviceStore`. A full queue blocks the worker (backpressure,
//! never a silent drop); a single consumer keeps per-connection order.
//!
//! Store failures are logged and counted, not propagated; one bad write must
//! not kill a live device connection.

use crate::core::error::GatewayError;
use crate::core::status::{CanonicalStatusRecord, DeviceResponse};
use crate::core::store::DeviceStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// One unit of work for the consumer
#[derive(Debug)]
pub enum SinkItem {
    /// Decoded telemetry record
    Status(Box<CanonicalStatusRecord>),
    /// Device command response
    Response(Box<DeviceResponse>),
}

/// Consumer-side counters, returned when the sink closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Items persisted
    pub saved: u64,
    /// Items the store rejected
    pub failed: u64,
}

/// Producer handle plus the consumer task it feeds
pub struct DispatchSink {
    tx: mpsc::Sender<SinkItem>,
    consumer: JoinHandle<SinkStats>,
}

impl DispatchSink {
    /// Spawn the consumer task over a bounded queue of `capacity` items
    pub fn spawn(store: Arc<dyn DeviceStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let consumer = tokio::spawn(consume(store, rx));
        Self { tx, consumer }
    }

    /// Enqueue one telemetry record, waiting while the queue is full
    pub async fn enqueue_status(
        &self,
        record: CanonicalStatusRecord,
    ) -> Result<(), GatewayError> {
        self.tx
            .send(SinkItem::Status(Box::new(record)))
            .await
            .map_err(|_| GatewayError::QueueClosed)
    }

    /// Enqueue one command response, waiting while the queue is full
    pub async fn enqueue_response(&self, response: DeviceResponse) -> Result<(), GatewayError> {
        self.tx
            .send(SinkItem::Response(Box::new(response)))
            .await
            .map_err(|_| GatewayError::QueueClosed)
    }

    /// Close the queue and wait for the consumer to drain the remainder
    pub async fn close(self) -> SinkStats {
        drop(self.tx);
        match self.consumer.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "sink consumer panicked");
                SinkStats::default()
            }
        }
    }
}

async fn consume(store: Arc<dyn DeviceStore>, mut rx: mpsc::Receiver<SinkItem>) -> SinkStats {
    let mut stats = SinkStats::default();
    while let Some(item) = rx.recv().await {
        let result = match &item {
            SinkItem::Status(record) => store.save_status(record).await,
            SinkItem::Response(response) => store.save_response(response).await,
        };
        match result {
            Ok(()) => stats.saved += 1,
            Err(e) => {
                stats.failed += 1;
                error!(error = %e, "store write failed");
            }
        }
    }
    debug!(saved = stats.saved, failed = stats.failed, "sink drained");
    stats
}
