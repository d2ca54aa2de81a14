use std::collections::HashMap;

use stockflow_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Between `begin` and `commit` the length of every
/// appended stream is journaled so `rollback` can truncate it again.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    checkpoint: Option<HashMap<StreamKey, usize>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        self.checkpoint.get_or_insert_with(HashMap::new);
    }

    pub fn commit(&mut self) {
        self.checkpoint = None;
    }

    /// Drop every event appended since `begin`.
    pub fn rollback(&mut self) {
        let Some(lengths) = self.checkpoint.take() else {
            return;
        };
        for (key, len) in lengths {
            if len == 0 {
                self.streams.remove(&key);
            } else if let Some(stream) = self.streams.get_mut(&key) {
                stream.truncate(len);
            }
        }
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &mut self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };

        // All events must target the same tenant + aggregate stream.
        let tenant_id = first.tenant_id;
        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };
        let stream = self.streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        if let Some(lengths) = self.checkpoint.as_mut() {
            lengths.entry(key).or_insert(stream.len());
        }

        let mut committed = Vec::with_capacity(events.len());
        for (offset, e) in (1u64..).zip(events) {
            let stored = StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: current + offset,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };
        Ok(self.streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId, event_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: "transfers.request".to_string(),
            event_type: event_type.to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn sequence_numbers_continue_across_appends() {
        let mut store = InMemoryEventStore::new();
        let (tenant, id) = (TenantId::new(), AggregateId::new());

        store
            .append(vec![event(tenant, id, "a"), event(tenant, id, "b")], ExpectedVersion::Exact(0))
            .unwrap();
        let committed = store
            .append(vec![event(tenant, id, "c")], ExpectedVersion::Exact(2))
            .unwrap();

        assert_eq!(committed[0].sequence_number, 3);
        let seqs: Vec<u64> = store
            .load_stream(tenant, id)
            .unwrap()
            .iter()
            .map(StoredEvent::stream_version)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let mut store = InMemoryEventStore::new();
        let (tenant, id) = (TenantId::new(), AggregateId::new());
        store
            .append(vec![event(tenant, id, "a")], ExpectedVersion::Exact(0))
            .unwrap();

        assert!(matches!(
            store.append(vec![event(tenant, id, "b")], ExpectedVersion::Exact(0)),
            Err(EventStoreError::Concurrency(_))
        ));
    }

    #[test]
    fn mixed_tenant_batch_is_rejected() {
        let mut store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let batch = vec![event(TenantId::new(), id, "a"), event(TenantId::new(), id, "b")];
        assert!(matches!(
            store.append(batch, ExpectedVersion::Any),
            Err(EventStoreError::TenantIsolation(_))
        ));
    }

    #[test]
    fn rollback_truncates_streams_appended_since_begin() {
        let mut store = InMemoryEventStore::new();
        let (tenant, id) = (TenantId::new(), AggregateId::new());
        store
            .append(vec![event(tenant, id, "a")], ExpectedVersion::Exact(0))
            .unwrap();

        store.begin();
        store
            .append(vec![event(tenant, id, "b")], ExpectedVersion::Exact(1))
            .unwrap();
        let fresh = AggregateId::new();
        store
            .append(vec![event(tenant, fresh, "c")], ExpectedVersion::Exact(0))
            .unwrap();
        store.rollback();

        assert_eq!(store.load_stream(tenant, id).unwrap().len(), 1);
        assert!(store.load_stream(tenant, fresh).unwrap().is_empty());
        store
            .append(vec![event(tenant, id, "b")], ExpectedVersion::Exact(1))
            .unwrap();
    }

    #[test]
    fn streams_are_tenant_scoped() {
        let mut store = InMemoryEventStore::new();
        let (tenant, id) = (TenantId::new(), AggregateId::new());
        store
            .append(vec![event(tenant, id, "a")], ExpectedVersion::Exact(0))
            .unwrap();
        assert!(store.load_stream(TenantId::new(), id).unwrap().is_empty());
    }
}
