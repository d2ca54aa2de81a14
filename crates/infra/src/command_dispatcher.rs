//! Command execution against an event-sourced request stream.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the stream (tenant-scoped) and validate it
//!   ↓
//! 2. Rehydrate the aggregate from history
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append with an exact expected version
//!   ↓
//! 5. Apply the events to the aggregate
//! ```
//!
//! Dispatch runs inside an open transaction; publication happens separately,
//! after the unit of work commits (see [`publish`]).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockflow_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use stockflow_events::{Event, EventBus, EventEnvelope};

use crate::error::{WorkflowError, WorkflowResult};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Outcome of a dispatched command: the evolved aggregate plus what was decided.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub committed: Vec<StoredEvent>,
}

pub fn dispatch<A, S>(
    store: &mut S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    command: &A::Command,
    make_aggregate: impl FnOnce(AggregateId) -> A,
) -> WorkflowResult<Dispatched<A>>
where
    S: EventStore,
    A: Aggregate<Error = DomainError>,
    A::Event: Event + Serialize + DeserializeOwned,
{
    let history = load_stream(store, tenant_id, aggregate_id)?;
    let expected = ExpectedVersion::Exact(stream_version(&history));

    let mut aggregate = make_aggregate(aggregate_id);
    apply_history(&mut aggregate, &history)?;

    let events = aggregate.handle(command)?;
    if events.is_empty() {
        return Ok(Dispatched {
            aggregate,
            events,
            committed: vec![],
        });
    }

    let uncommitted = events
        .iter()
        .map(|ev| UncommittedEvent::from_typed(tenant_id, aggregate_id, aggregate_type, Uuid::now_v7(), ev))
        .collect::<Result<Vec<_>, _>>()?;
    let committed = store.append(uncommitted, expected)?;

    for ev in &events {
        aggregate.apply(ev);
    }

    Ok(Dispatched {
        aggregate,
        events,
        committed,
    })
}

/// Load and validate a stream, e.g. to expose it as an audit trail.
pub fn load_stream<S: EventStore>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> WorkflowResult<Vec<StoredEvent>> {
    let history = store.load_stream(tenant_id, aggregate_id)?;
    validate_loaded_stream(tenant_id, aggregate_id, &history)?;
    Ok(history)
}

/// Publish committed events. Call only after the unit of work has committed.
pub fn publish<B>(bus: &B, committed: &[StoredEvent]) -> WorkflowResult<()>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    for stored in committed {
        bus.publish(stored.to_envelope())
            .map_err(|e| WorkflowError::Publish(format!("{e:?}")))?;
    }
    Ok(())
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> WorkflowResult<()> {
    // Enforce tenant isolation even if a backend returns foreign rows.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(WorkflowError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(WorkflowError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(WorkflowError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> WorkflowResult<()>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| WorkflowError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
