// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry state machine and the background service that runs deliveries.
//!
//! Producers hand drained batches to a [`DispatcherHandle`]; the [`Dispatcher`] serializes each
//! batch and drives it through `Pending -> InFlight -> {Delivered, RetryScheduled, Abandoned}`.
//! The number of deliveries in flight is capped by a semaphore sized from the send mode, so with a
//! single permit batches complete in exactly the order they were submitted.
//!
//! The queue between handle and dispatcher is unbounded so producers never block. When the
//! collector stalls, drained batches accumulate there; a warning is logged each time the number of
//! waiting batches reaches [`QUEUE_DEPTH_WARNING`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

use crate::config::RetryStrategy;
use crate::constants::QUEUE_DEPTH_WARNING;
use crate::event::EventRecord;
use crate::metadata::Metadata;
use crate::serializer;
use crate::transport::Deliver;

/// Ordered group of records flushed together
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: u64,
    pub records: Vec<EventRecord>,
}

/// Final outcome of one batch. Exactly one report is produced per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    Delivered {
        batch_id: u64,
        events: usize,
        attempts: u32,
    },
    /// The collector answered with something other than 200. Not retried.
    Rejected {
        batch_id: u64,
        events: usize,
        status: StatusCode,
        body: String,
    },
    /// Every attempt failed at the transport level and the batch was dropped.
    Abandoned {
        batch_id: u64,
        events: usize,
        attempts: u32,
        error: String,
    },
}

impl DeliveryReport {
    pub fn batch_id(&self) -> u64 {
        match self {
            DeliveryReport::Delivered { batch_id, .. }
            | DeliveryReport::Rejected { batch_id, .. }
            | DeliveryReport::Abandoned { batch_id, .. } => *batch_id,
        }
    }
}

#[derive(Debug)]
enum DeliveryState {
    Pending,
    InFlight,
    RetryScheduled,
    Done(Outcome),
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Rejected { status: StatusCode, body: String },
    Abandoned { error: String },
}

/// Delivers one payload, retrying transport failures up to the strategy's limit. Returns the
/// outcome and the number of attempts made.
async fn run_delivery(
    deliverer: &dyn Deliver,
    payload: Bytes,
    retry_strategy: RetryStrategy,
) -> (Outcome, u32) {
    let mut attempts: u32 = 0;
    let mut state = DeliveryState::Pending;
    loop {
        state = match state {
            DeliveryState::Pending => DeliveryState::InFlight,
            DeliveryState::InFlight => {
                attempts += 1;
                match deliverer.post(payload.clone()).await {
                    Ok(response) if response.is_success() => {
                        DeliveryState::Done(Outcome::Delivered)
                    }
                    Ok(response) => DeliveryState::Done(Outcome::Rejected {
                        status: response.status,
                        body: response.body,
                    }),
                    Err(e) => {
                        let retries = attempts - 1;
                        if retries < retry_strategy.retry_limit() {
                            warn!(
                                "Transport error on attempt {attempts}, retrying: {e}"
                            );
                            DeliveryState::RetryScheduled
                        } else {
                            DeliveryState::Done(Outcome::Abandoned {
                                error: e.to_string(),
                            })
                        }
                    }
                }
            }
            DeliveryState::RetryScheduled => {
                let delay = retry_strategy.delay_before(attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                DeliveryState::InFlight
            }
            DeliveryState::Done(outcome) => return (outcome, attempts),
        }
    }
}

/// Shared state for every delivery run by the dispatcher
struct DeliveryContext {
    deliverer: Arc<dyn Deliver>,
    metadata: Metadata,
    retry_strategy: RetryStrategy,
    reports: Option<mpsc::UnboundedSender<DeliveryReport>>,
}

impl DeliveryContext {
    async fn deliver(&self, batch: Batch) {
        let events = batch.records.len();
        let payload = Bytes::from(serializer::serialize_batch(&batch.records, &self.metadata));
        debug!(
            "Flushing batch {} with {events} events ({} bytes)",
            batch.id,
            payload.len()
        );

        let (outcome, attempts) =
            run_delivery(self.deliverer.as_ref(), payload, self.retry_strategy).await;
        let report = match outcome {
            Outcome::Delivered => {
                debug!("Successfully delivered batch {}", batch.id);
                DeliveryReport::Delivered {
                    batch_id: batch.id,
                    events,
                    attempts,
                }
            }
            Outcome::Rejected { status, body } => {
                error!("{status}: Collector rejected batch {}: {body:?}", batch.id);
                DeliveryReport::Rejected {
                    batch_id: batch.id,
                    events,
                    status,
                    body,
                }
            }
            Outcome::Abandoned { error } => {
                error!(
                    "Failed to deliver batch {} after {attempts} attempts, {events} events dropped: {error}",
                    batch.id
                );
                DeliveryReport::Abandoned {
                    batch_id: batch.id,
                    events,
                    attempts,
                    error,
                }
            }
        };

        if let Some(reports) = &self.reports {
            if reports.send(report).is_err() {
                debug!("Delivery report receiver dropped");
            }
        }
    }
}

#[derive(Debug)]
pub enum DispatchCommand {
    Deliver(Batch),
    Shutdown,
}

#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
    queued: Arc<AtomicUsize>,
}

impl DispatcherHandle {
    pub fn submit(&self, batch: Batch) -> Result<(), mpsc::error::SendError<DispatchCommand>> {
        let depth = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if depth == QUEUE_DEPTH_WARNING {
            warn!("{depth} batches waiting for delivery, the collector is not keeping up");
        }
        self.tx.send(DispatchCommand::Deliver(batch)).map_err(|e| {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            e
        })
    }

    /// Batches submitted but not yet picked up by the dispatcher
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<DispatchCommand>> {
        self.tx.send(DispatchCommand::Shutdown)
    }
}

pub struct Dispatcher {
    context: Arc<DeliveryContext>,
    max_in_flight: usize,
    rx: mpsc::UnboundedReceiver<DispatchCommand>,
    queued: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        deliverer: Arc<dyn Deliver>,
        metadata: Metadata,
        retry_strategy: RetryStrategy,
        max_in_flight: usize,
        reports: Option<mpsc::UnboundedSender<DeliveryReport>>,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let context = Arc::new(DeliveryContext {
            deliverer,
            metadata,
            retry_strategy,
            reports,
        });
        let dispatcher = Dispatcher {
            context,
            max_in_flight: max_in_flight.max(1),
            rx,
            queued: Arc::clone(&queued),
        };
        (dispatcher, DispatcherHandle { tx, queued })
    }

    /// Runs until shut down, then waits for every delivery still in flight.
    pub async fn run(mut self) {
        debug!("Dispatcher started with {} delivery slots", self.max_in_flight);
        let slots = Arc::new(Semaphore::new(self.max_in_flight));

        while let Some(command) = self.rx.recv().await {
            match command {
                DispatchCommand::Deliver(batch) => {
                    // Permits are handed out in submission order
                    let permit = match Arc::clone(&slots).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            self.queued.fetch_sub(1, Ordering::Relaxed);
                            error!("Delivery slots closed, dropping batch {}: {e}", batch.id);
                            continue;
                        }
                    };
                    self.queued.fetch_sub(1, Ordering::Relaxed);
                    let context = Arc::clone(&self.context);
                    tokio::spawn(async move {
                        context.deliver(batch).await;
                        drop(permit);
                    });
                }
                DispatchCommand::Shutdown => {
                    debug!("Dispatcher shutting down");
                    break;
                }
            }
        }

        // Holding every permit means nothing is in flight anymore
        let all = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        if let Err(e) = slots.acquire_many(all).await {
            error!("Failed to wait for in-flight deliveries: {e}");
        }
        debug!("Dispatcher stopped");
    }
}
