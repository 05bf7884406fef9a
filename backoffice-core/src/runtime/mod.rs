//! Process assembly: wires the stores, bus, engines, projections, and
//! listeners, and owns the shutdown ordering.
//!
//! The bus registry is owned here and handed to engines by reference at
//! construction; there are no process-wide singletons. Engines never
//! call each other directly — coordination is entirely through events,
//! with the one deliberate exception of the OMS invoking pre-trade
//! compliance synchronously.

use std::sync::Arc;

use tracing::info;

use crate::api::CommandRouter;
use crate::bus::{EventBus, WILDCARD};
use crate::compliance::ComplianceService;
use crate::ems::EmsService;
use crate::oms::OmsService;
use crate::pms::PmsService;
use crate::projections::{
    spawn_consumer, ComplianceProjection, EmsProjection, OmsProjection, PmsProjection,
    WorkerHandle,
};
use crate::readmodel::ReadModelStore;
use crate::store::{EventPipeline, EventStore};

use backoffice_common::events::EventType;

/// The assembled back-office core.
pub struct BackofficeRuntime {
    pub bus: Arc<EventBus>,
    pub events: Arc<dyn EventStore>,
    pub read: Arc<dyn ReadModelStore>,
    pub oms: Arc<OmsService>,
    pub ems: Arc<EmsService>,
    pub compliance: Arc<ComplianceService>,
    pub pms: Arc<PmsService>,
    listeners: Vec<WorkerHandle>,
    projections: Vec<WorkerHandle>,
}

impl BackofficeRuntime {
    /// Build the engines and spawn every worker. Must run inside a
    /// tokio runtime.
    pub fn start(
        events: Arc<dyn EventStore>,
        read: Arc<dyn ReadModelStore>,
        consumer_buffer: usize,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let pipeline = EventPipeline::new(events.clone(), bus.clone());

        let compliance = Arc::new(ComplianceService::new(pipeline.clone(), read.clone()));
        let oms = Arc::new(OmsService::new(
            pipeline.clone(),
            read.clone(),
            compliance.clone(),
        ));
        let ems = Arc::new(EmsService::new(pipeline.clone(), read.clone()));
        let pms = Arc::new(PmsService::new(pipeline, read.clone()));

        let projections = vec![
            spawn_consumer(
                bus.clone(),
                WILDCARD,
                consumer_buffer,
                Arc::new(OmsProjection::new(read.clone())),
            ),
            spawn_consumer(
                bus.clone(),
                WILDCARD,
                consumer_buffer,
                Arc::new(EmsProjection::new(read.clone())),
            ),
            spawn_consumer(
                bus.clone(),
                WILDCARD,
                consumer_buffer,
                Arc::new(PmsProjection::new(read.clone())),
            ),
            spawn_consumer(
                bus.clone(),
                WILDCARD,
                consumer_buffer,
                Arc::new(ComplianceProjection::new(read.clone())),
            ),
        ];

        let listeners = vec![
            spawn_consumer(
                bus.clone(),
                EventType::OrderSentToEMS.as_str(),
                consumer_buffer,
                ems.clone(),
            ),
            spawn_consumer(bus.clone(), WILDCARD, consumer_buffer, compliance.clone()),
        ];

        info!("back-office runtime started");

        Self {
            bus,
            events,
            read,
            oms,
            ems,
            compliance,
            pms,
            listeners,
            projections,
        }
    }

    /// The command dispatch surface for the external transport.
    pub fn router(&self) -> CommandRouter {
        CommandRouter::new(
            self.oms.clone(),
            self.ems.clone(),
            self.compliance.clone(),
            self.pms.clone(),
        )
    }

    /// Stop in dependency order: domain listeners first, then
    /// projections, then close the bus. The event store closes with its
    /// pool when dropped.
    pub async fn shutdown(self) {
        for listener in self.listeners {
            listener.stop().await;
        }
        for projection in self.projections {
            projection.stop().await;
        }
        self.bus.close();
        info!("back-office runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readmodel::MemoryReadModels;
    use crate::store::MemoryEventStore;

    #[tokio::test]
    async fn test_runtime_starts_and_stops_cleanly() {
        let runtime = BackofficeRuntime::start(
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryReadModels::new()),
            1000,
        );

        // Four projections on the wildcard plus the compliance listener
        assert_eq!(runtime.bus.subscriber_count(WILDCARD), 5);
        assert_eq!(runtime.bus.subscriber_count("OrderSentToEMS"), 1);

        runtime.shutdown().await;
    }
}
