//! Test harness: a fully wired back-office over in-memory backends,
//! plus polling helpers for the eventually consistent read models.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use backoffice_common::events::Event;
use backoffice_common::instruments::{Account, Household, Instrument};
use backoffice_common::portfolio::Position;
use backoffice_core::readmodel::{MemoryReadModels, ReadModelStore};
use backoffice_core::runtime::BackofficeRuntime;
use backoffice_core::store::{EventStore, MemoryEventStore};

/// Default deadline for read-model convergence.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// A running back-office with direct handles to its memory backends.
pub struct TestBackoffice {
    pub runtime: BackofficeRuntime,
    pub events: Arc<MemoryEventStore>,
    pub read: Arc<MemoryReadModels>,
}

impl TestBackoffice {
    /// Assemble and start every engine and worker.
    pub fn start() -> Self {
        let events = Arc::new(MemoryEventStore::new());
        let read = Arc::new(MemoryReadModels::new());
        let runtime = BackofficeRuntime::start(events.clone(), read.clone(), 1000);
        Self {
            runtime,
            events,
            read,
        }
    }

    /// Seed an instrument with the given years to maturity.
    pub async fn seed_instrument(
        &self,
        cusip: &str,
        years_to_maturity: i64,
        ask_price: Decimal,
        duration: Decimal,
    ) {
        self.read
            .upsert_instrument(Instrument {
                cusip: cusip.to_string(),
                name: format!("UST {years_to_maturity}Y"),
                maturity_date: Utc::now() + chrono::Duration::days(365 * years_to_maturity),
                ask_price: Some(ask_price),
                ask_modified_duration: Some(duration),
                coupon: None,
                coupon_frequency: None,
            })
            .await
            .expect("seed instrument");
    }

    /// Seed an account, creating the household row when referenced.
    pub async fn seed_account(&self, account_id: &str, household_id: Option<&str>) {
        if let Some(household_id) = household_id {
            self.read
                .upsert_household(Household {
                    household_id: household_id.to_string(),
                    name: format!("Household {household_id}"),
                })
                .await
                .expect("seed household");
        }
        self.read
            .upsert_account(Account {
                account_id: account_id.to_string(),
                household_id: household_id.map(str::to_string),
                name: format!("Account {account_id}"),
            })
            .await
            .expect("seed account");
    }

    /// Seed a pre-existing position (prior state for the scenarios).
    pub async fn seed_position(
        &self,
        account_id: &str,
        instrument_id: &str,
        quantity: Decimal,
        price: Decimal,
        duration: Decimal,
    ) {
        let market_value = quantity * price;
        self.read
            .upsert_position(Position {
                account_id: account_id.to_string(),
                instrument_id: instrument_id.to_string(),
                quantity,
                avg_cost: price,
                market_value,
                duration,
                dv01: market_value * duration * Decimal::new(1, 4),
                updated_at: Utc::now(),
            })
            .await
            .expect("seed position");
    }

    /// Every event of one flow, in occurred_at order.
    pub async fn correlation_events(&self, correlation_id: Uuid) -> Vec<Event> {
        self.events
            .by_correlation(correlation_id)
            .await
            .expect("query correlation")
    }

    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
    }
}

/// Poll until the condition holds or the deadline passes.
pub async fn wait_until<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Check the universal causation invariant over one correlation: every
/// causation id references an event that exists, was appended no later,
/// and shares the correlation.
pub fn assert_causation_closure(events: &[Event]) {
    for event in events {
        if let Some(causation_id) = event.causation_id {
            let parent = events
                .iter()
                .find(|candidate| candidate.event_id == causation_id)
                .unwrap_or_else(|| {
                    panic!(
                        "event {} cites causation {causation_id} outside its correlation",
                        event.event_id
                    )
                });
            assert!(
                parent.occurred_at <= event.occurred_at,
                "causation parent appended after child"
            );
            assert_eq!(parent.correlation_id, event.correlation_id);
        }
    }
}

/// Events must arrive in non-decreasing occurred_at order.
pub fn assert_ascending(events: &[Event]) {
    assert!(
        events
            .windows(2)
            .all(|pair| pair[0].occurred_at <= pair[1].occurred_at),
        "events not in occurred_at order"
    );
}
