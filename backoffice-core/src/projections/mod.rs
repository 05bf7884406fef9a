//! Projection engine: long-running consumers that materialize read
//! models from the event stream.
//!
//! One worker per domain, each on a wildcard subscription with a buffer
//! of 1000. Handler failures are logged and never stop the worker; a
//! shutdown signal drains the current event, releases the subscription,
//! and exits. Because the bus drops on full queues, handlers use UPSERT
//! semantics and never derive state purely from counts of seen events.

mod compliance;
mod ems;
mod oms;
mod pms;

pub use compliance::ComplianceProjection;
pub use ems::EmsProjection;
pub use oms::OmsProjection;
pub use pms::PmsProjection;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use backoffice_common::error::CoreResult;
use backoffice_common::events::Event;

use crate::bus::EventBus;

/// A consumer of bus events. Implementations dispatch on event type and
/// ignore everything they do not handle.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Display name for logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> CoreResult<()>;
}

/// Handle to a spawned consumer task.
pub struct WorkerHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the worker to exit its loop.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            warn!(worker = self.name, "worker task join failed: {err}");
        }
    }
}

/// Spawn a consumer on `topic` with the given queue depth.
///
/// The worker exits when the shutdown signal fires or the bus closes
/// its endpoint, unsubscribing on the way out.
pub fn spawn_consumer(
    bus: Arc<EventBus>,
    topic: &str,
    buffer: usize,
    consumer: Arc<dyn EventConsumer>,
) -> WorkerHandle {
    let (mut rx, subscription) = bus.subscribe(topic, buffer);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let name = consumer.name();

    let join = tokio::spawn(async move {
        info!(worker = name, "worker started");
        loop {
            tokio::select! {
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => {
                        if let Err(err) = consumer.handle(&event).await {
                            warn!(
                                worker = name,
                                event_type = %event.event_type,
                                event_id = %event.event_id,
                                "handler error: {err}"
                            );
                        }
                    }
                    // Bus closed the endpoint
                    None => break,
                },
                _ = shutdown_rx.changed() => break,
            }
        }
        bus.unsubscribe(subscription);
        info!(worker = name, "worker stopped");
    });

    WorkerHandle {
        name,
        shutdown_tx,
        join,
    }
}
