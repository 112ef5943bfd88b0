//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply history; derived totals are recomputed on the way)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus
//! ```
//!
//! The dispatcher contains no IO itself; it composes `EventStore` and `EventBus`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use tillerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, TenantId};
use tillerp_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale document version (another writer appended first).
    #[error("optimistic concurrency failure: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Rejected user input; the message is meant for the user.
    #[error("{0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Historical payload no longer matches the aggregate event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced documents.
///
/// Events are persisted before publication: if the append fails nothing is published.
/// If publication fails after the append, `DispatchError::Publish` is returned and the
/// events stay committed.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate a document from its stream.
    ///
    /// An unknown stream yields the fresh instance from `make_aggregate`; callers check
    /// whether it was ever created.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline and return the committed events.
    ///
    /// A command that decides no events (e.g. re-syncing an unchanged payment) appends
    /// and publishes nothing.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: tillerp_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();

        // 1-2) Load + rehydrate
        let aggregate = self.load(tenant_id, aggregate_id, make_aggregate)?;
        let expected = ExpectedVersion::Exact(aggregate.version());

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(|e| {
            tracing::debug!(%tenant_id, %aggregate_id, %aggregate_type, error = %e, "command rejected");
            DispatchError::from(e)
        })?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus.publish(stored.to_envelope()).map_err(|e| {
                tracing::warn!(event_id = %stored.event_id, error = ?e, "publish failed after append");
                DispatchError::Publish(format!("{e:?}"))
            })?;
        }

        tracing::info!(
            %tenant_id,
            %aggregate_id,
            %aggregate_type,
            events = committed.len(),
            version = committed.last().map(StoredEvent::stream_version).unwrap_or_default(),
            "command dispatched"
        );

        Ok(committed)
    }
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = stored
            .decode()
            .map_err(|e| DispatchError::Deserialize(format!("{} #{}: {e}", stored.event_type, stored.sequence_number)))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tillerp_accounting::{
        CreatePayment, JournalId, Payment, PaymentCommand, PaymentId, PaymentStatus, PostPayment,
    };
    use tillerp_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn create(tenant_id: TenantId, payment_id: PaymentId) -> PaymentCommand {
        PaymentCommand::CreatePayment(CreatePayment {
            tenant_id,
            payment_id,
            journal_id: JournalId::new(AggregateId::new()),
            amount: dec!(25),
            transaction_id: Some("TX1".to_string()),
            occurred_at: Utc::now(),
        })
    }

    fn make_payment(_: TenantId, id: AggregateId) -> Payment {
        Payment::empty(PaymentId::new(id))
    }

    #[test]
    fn dispatch_persists_publishes_and_rehydrates() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());

        let committed = d
            .dispatch(tenant_id, payment_id.0, "accounting.payment", create(tenant_id, payment_id), make_payment)
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].event_type, "accounting.payment.created");

        d.dispatch(
            tenant_id,
            payment_id.0,
            "accounting.payment",
            PaymentCommand::PostPayment(PostPayment {
                tenant_id,
                payment_id,
                occurred_at: Utc::now(),
            }),
            make_payment,
        )
        .unwrap();

        let payment = d.load(tenant_id, payment_id.0, make_payment).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Posted);
        assert_eq!(payment.transaction_id(), Some("TX1"));
        assert_eq!(payment.version(), 2);

        let published = sub.drain();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].sequence_number(), 2);
    }

    #[test]
    fn domain_errors_are_mapped_and_nothing_is_stored() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());

        let err = d
            .dispatch(
                tenant_id,
                payment_id.0,
                "accounting.payment",
                PaymentCommand::PostPayment(PostPayment {
                    tenant_id,
                    payment_id,
                    occurred_at: Utc::now(),
                }),
                make_payment,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
        assert!(d.store().load_stream(tenant_id, payment_id.0).unwrap().is_empty());
    }

    #[test]
    fn duplicate_creation_is_a_conflict() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());

        d.dispatch(tenant_id, payment_id.0, "accounting.payment", create(tenant_id, payment_id), make_payment)
            .unwrap();
        let err = d
            .dispatch(tenant_id, payment_id.0, "accounting.payment", create(tenant_id, payment_id), make_payment)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }
}
