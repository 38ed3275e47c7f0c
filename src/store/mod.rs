mod error;
mod repository;

pub use error::StoreError;
pub use repository::{EntityRepository, exists, get, list};

use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the writer wakes up is
/// committed with a single fsync; control commands flush the pending batch first.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Vec<PendingAppend> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => pending.push((event, response)),
                WalCommand::Compact { snapshot, response } => {
                    commit_batch(&mut wal, &mut pending);
                    let _ = response.send(wal.compact(&snapshot));
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit_batch(&mut wal, &mut pending);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
            next = rx.try_recv().ok();
        }
        commit_batch(&mut wal, &mut pending);
    }
}

fn commit_batch(wal: &mut Wal, pending: &mut Vec<PendingAppend>) {
    if pending.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(pending.len() as f64);
    let started = std::time::Instant::now();

    // A batch is durable as a whole or not at all: every sender is told the same outcome.
    let outcome = wal.mark().and_then(|mark| {
        let written = pending
            .iter()
            .try_for_each(|(event, _)| wal.append_buffered(event))
            .and_then(|()| wal.flush_sync());
        if let Err(e) = &written
            && let Err(rollback) = wal.rollback(mark)
        {
            tracing::error!("WAL rollback after failed batch ({e}) failed: {rollback}");
        }
        written
    });

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, response) in pending.drain(..) {
        let result = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(result);
    }
}

/// Reference index key: (referencing kind, JSON field, referenced id).
type RefKey = (EntityKind, &'static str, Ulid);

/// WAL-backed in-memory entity store.
///
/// Writes are serialized by `write_gate`, logged, then applied. Two constraints are
/// enforced under the gate: ids are unique per kind, and no two reservations on the
/// same bed may have overlapping windows.
pub struct Store {
    tables: [DashMap<Ulid, Record>; EntityKind::ALL.len()],
    refs: DashMap<RefKey, Vec<Ulid>>,
    write_gate: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::recover(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            tables: std::array::from_fn(|_| DashMap::new()),
            refs: DashMap::new(),
            write_gate: Mutex::new(()),
            wal_tx,
        };
        for event in &events {
            store.apply(event);
        }
        for kind in EntityKind::ALL {
            store.publish_count(kind);
        }
        tracing::info!("store opened: {} events replayed from {}", events.len(), wal_path.display());
        Ok(store)
    }

    fn table(&self, kind: EntityKind) -> &DashMap<Ulid, Record> {
        &self.tables[kind as usize]
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.table(kind).len()
    }

    fn publish_count(&self, kind: EntityKind) {
        metrics::gauge!(observability::RECORDS, "kind" => kind.as_str())
            .set(self.len(kind) as f64);
    }

    // ── Event application ────────────────────────────────────

    fn apply(&self, event: &Event) {
        match event {
            Event::Created(record) | Event::Updated(record) => {
                let previous = self.table(record.kind()).insert(record.id(), record.clone());
                if let Some(old) = previous {
                    self.unindex(&old);
                }
                self.index(record);
            }
            Event::Deleted { kind, id } => {
                if let Some((_, old)) = self.table(*kind).remove(id) {
                    self.unindex(&old);
                }
            }
        }
    }

    fn index(&self, record: &Record) {
        for reference in record.references() {
            if let Some(target) = reference.id {
                self.refs
                    .entry((record.kind(), reference.field, target))
                    .or_default()
                    .push(record.id());
            }
        }
    }

    fn unindex(&self, record: &Record) {
        let id = record.id();
        for reference in record.references() {
            let Some(target) = reference.id else { continue };
            let key = (record.kind(), reference.field, target);
            if let Some(mut ids) = self.refs.get_mut(&key) {
                ids.retain(|r| *r != id);
            }
            self.refs.remove_if(&key, |_, ids| ids.is_empty());
        }
    }

    /// Ids of `kind` records whose `field` references `target`.
    fn referencing(&self, kind: EntityKind, field: &'static str, target: Ulid) -> Vec<Ulid> {
        self.refs
            .get(&(kind, field, target))
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    /// Records to test against `filter`: narrowed through the reference index when the
    /// filter pins a reference field, otherwise the whole table.
    fn candidates(&self, kind: EntityKind, filter: &Filter) -> Vec<Record> {
        let table = self.table(kind);
        let pinned = filter.iter().find_map(|(field, value)| {
            let field = kind.reference_fields().iter().find(|f| **f == field)?;
            Some((*field, value.parse::<Ulid>().ok()?))
        });
        match pinned {
            Some((field, target)) => self
                .referencing(kind, field, target)
                .iter()
                .filter_map(|id| table.get(id).map(|e| e.value().clone()))
                .collect(),
            None => table.iter().map(|e| e.value().clone()).collect(),
        }
    }

    fn check_exclusion(&self, record: &Record) -> Result<(), StoreError> {
        let Some(proposed) = record.as_reservation() else {
            return Ok(());
        };
        let table = self.table(EntityKind::Reservation);
        let window = proposed.window();
        for id in self.referencing(EntityKind::Reservation, "bedId", proposed.bed_id) {
            if id == proposed.id {
                continue;
            }
            let overlaps = table
                .get(&id)
                .and_then(|e| e.value().as_reservation().map(|r| window.overlaps(&r.window())))
                .unwrap_or(false);
            if overlaps {
                return Err(StoreError::ExclusionViolation {
                    bed_id: proposed.bed_id,
                    conflicting: id,
                });
            }
        }
        Ok(())
    }

    // ── WAL ──────────────────────────────────────────────────

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Log, apply, publish. Caller holds the write gate.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply(&event);
        self.publish_count(event.kind());
        Ok(())
    }

    /// Rewrite the WAL as one `Created` event per live record.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let rx = {
            let _gate = self.write_gate.lock().await;
            let mut snapshot = Vec::new();
            for kind in EntityKind::ALL {
                let mut records: Vec<Record> =
                    self.table(kind).iter().map(|e| e.value().clone()).collect();
                records.sort_by_key(Record::id);
                snapshot.extend(records.into_iter().map(Event::Created));
            }
            let (tx, rx) = oneshot::channel();
            self.wal_tx
                .send(WalCommand::Compact { snapshot, response: tx })
                .await
                .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
            rx
        };
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl EntityRepository for Store {
    async fn find_by_id(&self, kind: EntityKind, id: Ulid) -> Result<Option<Record>, StoreError> {
        Ok(self.table(kind).get(&id).map(|e| e.value().clone()))
    }

    async fn find_many(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        if filter.len() > MAX_FILTER_TERMS {
            return Err(StoreError::LimitExceeded("too many filter terms"));
        }
        let mut found: Vec<Record> = self
            .candidates(kind, filter)
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        found.sort_by_key(Record::id);
        Ok(found)
    }

    async fn count(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError> {
        if filter.is_empty() {
            return Ok(self.len(kind));
        }
        Ok(self.find_many(kind, filter).await?.len())
    }

    async fn create(&self, record: Record) -> Result<Record, StoreError> {
        let _gate = self.write_gate.lock().await;
        let (kind, id) = (record.kind(), record.id());
        if self.table(kind).contains_key(&id) {
            return Err(StoreError::AlreadyExists { kind, id });
        }
        if self.len(kind) >= MAX_RECORDS_PER_KIND {
            return Err(StoreError::LimitExceeded("too many records"));
        }
        self.check_exclusion(&record)?;
        self.persist_and_apply(Event::Created(record.clone())).await?;
        Ok(record)
    }

    async fn update(&self, record: Record) -> Result<Record, StoreError> {
        let _gate = self.write_gate.lock().await;
        let (kind, id) = (record.kind(), record.id());
        if !self.table(kind).contains_key(&id) {
            return Err(StoreError::NotFound { kind, id });
        }
        self.check_exclusion(&record)?;
        self.persist_and_apply(Event::Updated(record.clone())).await?;
        Ok(record)
    }

    async fn delete(&self, kind: EntityKind, id: Ulid) -> Result<Record, StoreError> {
        let _gate = self.write_gate.lock().await;
        let existing = self
            .table(kind)
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound { kind, id })?;
        self.persist_and_apply(Event::Deleted { kind, id }).await?;
        Ok(existing)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.wal_tx.is_closed() {
            return Err(StoreError::Wal("WAL writer shut down".into()));
        }
        Ok(())
    }
}
