//! Collection mirror
//!
//! An ordered local copy of a remote collection, folded from the delta stream:
//! insert-or-replace on added/modified, remove on removed. Order is re-derived once per
//! batch from the authoritative timestamp field, newest first.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::delta::{BatchSummary, Delta, DeltaBatch};
use super::subscription::{Subscription, SubscriptionEvent};
use crate::backend::StoreError;
use crate::record::Record;

/// Ordered, id-unique copy of a remote collection
#[derive(Debug, Clone)]
pub struct Mirror {
    order_field: String,
    records: Vec<Record>,
    index: HashMap<String, usize>,
    generation: u64,
}

impl Mirror {
    pub fn new(order_field: impl Into<String>) -> Self {
        Self {
            order_field: order_field.into(),
            records: Vec::new(),
            index: HashMap::new(),
            generation: 0,
        }
    }

    pub fn order_field(&self) -> &str {
        &self.order_field
    }

    /// Apply every delta in the batch, then re-derive order once.
    pub fn apply_batch(&mut self, batch: DeltaBatch) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for delta in batch {
            match delta {
                Delta::Added(record) => {
                    summary.added.push(record.id.clone());
                    self.upsert(record);
                }
                Delta::Modified(record) => {
                    summary.modified.push(record.id.clone());
                    self.upsert(record);
                }
                Delta::Removed(id) => {
                    self.remove(&id);
                    summary.removed.push(id);
                }
            }
        }

        self.resort();
        self.generation += 1;
        debug!(
            added = summary.added.len(),
            modified = summary.modified.len(),
            removed = summary.removed.len(),
            size = self.records.len(),
            "Applied delta batch"
        );
        summary
    }

    /// Seed from a one-shot query result. Equivalent to applying it as a snapshot batch.
    pub fn seed(&mut self, records: Vec<Record>) -> BatchSummary {
        self.apply_batch(DeltaBatch::snapshot(records))
    }

    /// Replace the whole contents with `snapshot`.
    ///
    /// Records absent from the snapshot are removed and reported in the summary.
    pub fn reset_to(&mut self, snapshot: DeltaBatch) -> BatchSummary {
        let incoming: HashSet<String> = snapshot
            .iter()
            .filter_map(|delta| match delta {
                Delta::Added(r) | Delta::Modified(r) => Some(r.id.clone()),
                Delta::Removed(_) => None,
            })
            .collect();

        let mut deltas: Vec<Delta> = self
            .records
            .iter()
            .filter(|r| !incoming.contains(&r.id))
            .map(|r| Delta::Removed(r.id.clone()))
            .collect();
        if !deltas.is_empty() {
            debug!(stale = deltas.len(), "Snapshot drops seeded records");
        }
        deltas.extend(snapshot);
        self.apply_batch(DeltaBatch::new(deltas))
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
        self.generation += 1;
    }

    /// Records sorted newest first
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Incremented once per applied batch and on clear
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn upsert(&mut self, record: Record) {
        match self.index.get(&record.id) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn remove(&mut self, id: &str) {
        if let Some(i) = self.index.remove(id) {
            self.records.swap_remove(i);
            if let Some(moved) = self.records.get(i) {
                self.index.insert(moved.id.clone(), i);
            }
        }
    }

    fn resort(&mut self) {
        let field = self.order_field.as_str();
        self.records.sort_by(|a, b| {
            newest_first(a.timestamp(field), b.timestamp(field)).then_with(|| a.id.cmp(&b.id))
        });
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }
}

/// Descending by timestamp, records without one last
fn newest_first(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Result of pumping one event from a live mirror
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    /// A batch was applied; derived views must be recomputed once
    Changed(BatchSummary),
    /// The listener reported an error; the subscription stays open
    ListenerError(StoreError),
}

/// A mirror bound to at most one live subscription.
///
/// Replacing the subscription always cancels the old one before the mirror is cleared,
/// so no stale batch can land in the new state. The first batch of a new subscription is
/// its snapshot and replaces whatever was seeded in between.
#[derive(Debug)]
pub struct LiveMirror {
    mirror: Mirror,
    subscription: Option<Subscription>,
    awaiting_snapshot: bool,
}

impl LiveMirror {
    pub fn new(order_field: impl Into<String>) -> Self {
        Self {
            mirror: Mirror::new(order_field),
            subscription: None,
            awaiting_snapshot: false,
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|s| !s.is_cancelled())
    }

    /// Cancel the current subscription, clear the mirror, then adopt `subscription`.
    pub fn replace(&mut self, subscription: Subscription) {
        self.stop();
        self.mirror.clear();
        self.subscription = Some(subscription);
        self.awaiting_snapshot = true;
    }

    /// Cancel the current subscription. The mirror keeps its last state.
    pub fn stop(&mut self) {
        if let Some(mut old) = self.subscription.take() {
            old.cancel();
            debug!("Cancelled live subscription");
        }
        self.awaiting_snapshot = false;
    }

    /// Cancel and forget everything
    pub fn reset(&mut self) {
        self.stop();
        self.mirror.clear();
    }

    /// Seed the mirror from a one-shot query before live deltas arrive.
    pub fn seed(&mut self, records: Vec<Record>) -> BatchSummary {
        self.mirror.seed(records)
    }

    /// Apply a locally reconciled change (e.g. after a confirmed remote delete)
    pub fn apply_local(&mut self, batch: DeltaBatch) -> BatchSummary {
        self.mirror.apply_batch(batch)
    }

    /// Wait for the next subscription event and apply it.
    ///
    /// Returns `None` when there is no live subscription or the transport hung up.
    pub async fn next_change(&mut self) -> Option<MirrorEvent> {
        let event = match self.subscription.as_mut() {
            Some(sub) => sub.next_event().await,
            None => return None,
        };

        match event {
            Some(SubscriptionEvent::Batch(batch)) if self.awaiting_snapshot => {
                self.awaiting_snapshot = false;
                Some(MirrorEvent::Changed(self.mirror.reset_to(batch)))
            }
            Some(SubscriptionEvent::Batch(batch)) => {
                Some(MirrorEvent::Changed(self.mirror.apply_batch(batch)))
            }
            Some(SubscriptionEvent::Error(e)) => {
                warn!(error = %e, "Live subscription reported an error");
                Some(MirrorEvent::ListenerError(e))
            }
            None => {
                self.subscription = None;
                None
            }
        }
    }
}
