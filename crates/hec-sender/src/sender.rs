// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public entry point: accepts events, batches them, and hands full batches to the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::batch_buffer::BatchBuffer;
use crate::config::SenderConfig;
use crate::delivery::{Batch, DeliveryReport, Dispatcher, DispatcherHandle};
use crate::errors::{Creation, SendError};
use crate::event::EventRecord;
use crate::scheduler::Heartbeat;
use crate::transport::{Deliver, HttpDeliverer};

struct Inner {
    buffer: BatchBuffer,
    // Held across drain and submit so batches reach the dispatcher in drain order
    dispatch: Mutex<Option<DispatcherHandle>>,
    next_batch_id: AtomicU64,
}

impl Inner {
    fn lock_dispatch(&self) -> MutexGuard<'_, Option<DispatcherHandle>> {
        self.dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush(&self) {
        let dispatch = self.lock_dispatch();
        let Some(handle) = dispatch.as_ref() else {
            return;
        };
        let records = self.buffer.drain();
        self.submit(handle, records);
    }

    /// Seals the buffer, submits what is left and tells the dispatcher to stop.
    fn shutdown_dispatch(&self) {
        let mut dispatch = self.lock_dispatch();
        let records = self.buffer.seal();
        if let Some(handle) = dispatch.take() {
            self.submit(&handle, records);
            if handle.shutdown().is_err() {
                error!("Dispatcher already stopped");
            }
        }
    }

    fn submit(&self, handle: &DispatcherHandle, records: Vec<EventRecord>) {
        if records.is_empty() {
            return;
        }
        let batch = Batch {
            id: self.next_batch_id.fetch_add(1, Ordering::Relaxed),
            records,
        };
        if let Err(e) = handle.submit(batch) {
            error!("Dispatcher stopped, dropping batch: {e}");
        }
    }
}

/// Batching event sender.
///
/// `send` and `flush` never wait on the network; delivery results are only observable through
/// logs and the optional report channel. After [`Sender::close`] every `send` fails with
/// [`SendError::Closed`].
pub struct Sender {
    inner: Arc<Inner>,
    heartbeat: Option<Heartbeat>,
    dispatcher_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Sender {
    /// Creates a sender that posts to the configured collector. Must be called from within a
    /// tokio runtime.
    pub fn new(config: SenderConfig) -> Result<Self, Creation> {
        let deliverer = Arc::new(HttpDeliverer::new(&config)?);
        Self::with_deliverer(config, deliverer, None)
    }

    /// Like [`Sender::new`], also sending one [`DeliveryReport`] per batch to `reports`.
    pub fn with_reports(
        config: SenderConfig,
        reports: mpsc::UnboundedSender<DeliveryReport>,
    ) -> Result<Self, Creation> {
        let deliverer = Arc::new(HttpDeliverer::new(&config)?);
        Self::with_deliverer(config, deliverer, Some(reports))
    }

    pub fn with_deliverer(
        config: SenderConfig,
        deliverer: Arc<dyn Deliver>,
        reports: Option<mpsc::UnboundedSender<DeliveryReport>>,
    ) -> Result<Self, Creation> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Creation::NoRuntime)?;

        let (dispatcher, handle) = Dispatcher::new(
            deliverer,
            config.metadata.clone(),
            config.retry_strategy,
            config.send_mode.max_in_flight(),
            reports,
        );
        let dispatcher_task = runtime.spawn(dispatcher.run());

        let inner = Arc::new(Inner {
            buffer: BatchBuffer::new(config.limits),
            dispatch: Mutex::new(Some(handle)),
            next_batch_id: AtomicU64::new(0),
        });

        // A zero interval disables the heartbeat, same as a zero `flush_interval_ms`
        let heartbeat = config
            .flush_interval
            .filter(|period| !period.is_zero())
            .map(|period| {
                let inner = Arc::clone(&inner);
                Heartbeat::start(period, move || inner.flush())
            });

        debug!(
            "Event sender started for {} in {} mode",
            config.endpoint, config.send_mode
        );
        Ok(Sender {
            inner,
            heartbeat,
            dispatcher_task: AsyncMutex::new(Some(dispatcher_task)),
        })
    }

    /// Queues one event, flushing if the batch thresholds are reached.
    pub fn send(&self, severity: &str, message: &str) -> Result<(), SendError> {
        trace!("Queueing {severity} event");
        let record = EventRecord::new(severity, message);
        if self.inner.buffer.append(record)? {
            self.inner.flush();
        }
        Ok(())
    }

    /// Hands every pending event to the dispatcher. No-op when nothing is pending.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Stops the heartbeat, flushes what is pending and waits for every delivery to finish.
    /// Concurrent callers all wait for the same shutdown; calling it after it completed is a
    /// no-op.
    pub async fn close(&self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.stop().await;
        }
        self.inner.shutdown_dispatch();

        // Held across the join so a concurrent caller waits instead of seeing an empty slot
        let mut task = self.dispatcher_task.lock().await;
        if let Some(task) = task.take() {
            if let Err(e) = task.await {
                error!("Dispatcher task failed: {e}");
            }
            debug!("Event sender closed");
        }
    }

    /// Number of events waiting for the next flush
    pub fn pending(&self) -> usize {
        self.inner.buffer.len()
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        // Without close() the remaining batch is still submitted; the dispatcher finishes it in the
        // background as long as the runtime is alive.
        self.inner.shutdown_dispatch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::metadata::Metadata;
    use crate::transport::PostResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingDeliverer {
        payloads: Mutex<Vec<String>>,
    }

    impl CollectingDeliverer {
        fn messages(&self) -> Vec<Vec<String>> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .map(|payload| {
                    serde_json::Deserializer::from_str(payload)
                        .into_iter::<serde_json::Value>()
                        .map(|v| v.unwrap()["event"]["message"].as_str().unwrap().to_string())
                        .collect()
                })
                .collect()
        }
    }

    #[async_trait]
    impl Deliver for CollectingDeliverer {
        async fn post(&self, payload: Bytes) -> Result<PostResponse, TransportError> {
            self.payloads
                .lock()
                .unwrap()
                .push(String::from_utf8(payload.to_vec()).unwrap());
            Ok(PostResponse {
                status: StatusCode::OK,
                body: String::new(),
            })
        }
    }

    fn config(flush_interval_ms: u64, max_count: usize, max_size: usize) -> SenderConfig {
        SenderConfig::new(
            "http://127.0.0.1:8088",
            "token",
            flush_interval_ms,
            max_count,
            max_size,
            0,
            "sequential",
            Metadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_requires_runtime() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        assert!(matches!(
            Sender::with_deliverer(config(0, 1, 0), deliverer, None),
            Err(Creation::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_count_threshold_flushes() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        let sender = Sender::with_deliverer(config(0, 2, 0), deliverer.clone(), None).unwrap();

        sender.send("INFO", "one").unwrap();
        assert_eq!(sender.pending(), 1);
        sender.send("INFO", "two").unwrap();
        assert_eq!(sender.pending(), 0);
        sender.send("INFO", "three").unwrap();

        sender.close().await;
        assert_eq!(
            deliverer.messages(),
            vec![
                vec!["one".to_string(), "two".to_string()],
                vec!["three".to_string()]
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_on_empty_buffer_is_a_noop() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        let sender = Sender::with_deliverer(config(0, 10, 0), deliverer.clone(), None).unwrap();
        sender.flush();
        sender.close().await;
        assert!(deliverer.messages().is_empty());
    }

    #[tokio::test]
    async fn test_close_flushes_pending_and_rejects_later_sends() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        let sender = Sender::with_deliverer(config(0, 100, 0), deliverer.clone(), None).unwrap();

        sender.send("INFO", "pending").unwrap();
        sender.close().await;
        assert_eq!(deliverer.messages(), vec![vec!["pending".to_string()]]);

        assert_eq!(sender.send("INFO", "late"), Err(SendError::Closed));
        sender.close().await;
        assert_eq!(deliverer.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_flushes_below_thresholds() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        let sender = Sender::with_deliverer(config(100, 100, 0), deliverer.clone(), None).unwrap();

        sender.send("INFO", "tick").unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sender.pending(), 0);

        sender.close().await;
        assert_eq!(deliverer.messages(), vec![vec!["tick".to_string()]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_lose_nothing() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        let sender = Arc::new(
            Sender::with_deliverer(config(1, 7, 0), deliverer.clone(), None).unwrap(),
        );

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let sender = Arc::clone(&sender);
                tokio::task::spawn_blocking(move || {
                    for i in 0..200 {
                        sender.send("INFO", &format!("{p}-{i}")).unwrap();
                        if i % 50 == 0 {
                            sender.flush();
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        sender.close().await;

        let mut all: Vec<String> = deliverer.messages().into_iter().flatten().collect();
        assert_eq!(all.len(), 800);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 800);
    }

    struct SlowDeliverer {
        delivered: AtomicU64,
    }

    #[async_trait]
    impl Deliver for SlowDeliverer {
        async fn post(&self, _payload: Bytes) -> Result<PostResponse, TransportError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(PostResponse {
                status: StatusCode::OK,
                body: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_close_waits_for_delivery() {
        let deliverer = Arc::new(SlowDeliverer {
            delivered: AtomicU64::new(0),
        });
        let sender = Arc::new(
            Sender::with_deliverer(config(0, 100, 0), deliverer.clone(), None).unwrap(),
        );
        sender.send("INFO", "pending").unwrap();

        let first = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        sender.close().await;
        assert_eq!(deliverer.delivered.load(Ordering::SeqCst), 1);
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_flush_interval_disables_heartbeat() {
        let deliverer = Arc::new(CollectingDeliverer::default());
        let mut settings = config(0, 100, 0);
        settings.flush_interval = Some(Duration::ZERO);
        let sender = Sender::with_deliverer(settings, deliverer.clone(), None).unwrap();
        assert!(sender.heartbeat.is_none());

        sender.send("INFO", "only").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sender.pending(), 1);

        sender.close().await;
        assert_eq!(deliverer.messages(), vec![vec!["only".to_string()]]);
    }
}
