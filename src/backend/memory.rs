//! In-process identity provider and document store
//!
//! Implements the backend traits over in-memory collections. Live subscriptions are
//! served by re-evaluating each subscriber's query after every write and diffing against
//! the result it last saw, which yields the same added/modified/removed stream a hosted
//! store produces.
//!
//! Test controls:
//! - per-operation failure injection ([`MemoryBackend::fail`])
//! - scripted sign-in failures ([`MemoryBackend::script_sign_in_failures`])
//! - held deliveries that are flushed later, even to subscriptions cancelled meanwhile
//! - an artificial read delay for timeout paths

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    is_server_timestamp, AuthError, DocumentStore, Identity, IdentityProvider, Query,
    ReadSource, StoreError, WriteOp,
};
use crate::record::Record;
use crate::sync::{Delta, DeltaBatch, Subscription, SubscriptionEvent, SubscriptionSender};

/// Backend operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Add,
    Update,
    Delete,
    Batch,
    Query,
    Subscribe,
    SignOut,
}

#[derive(Debug, Clone)]
struct UserAccount {
    identity: Identity,
    password: String,
    disabled: bool,
}

struct Subscriber {
    query: Query,
    sender: SubscriptionSender,
    last: HashMap<String, Record>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Record>>,
    subscribers: Vec<Subscriber>,
    failures: HashMap<Operation, StoreError>,
    held: Option<Vec<(SubscriptionSender, SubscriptionEvent)>>,
    users: HashMap<String, UserAccount>,
    sign_in_script: VecDeque<AuthError>,
    sign_in_attempts: usize,
    read_delay: Option<Duration>,
    clock: i64,
}

/// In-memory backend implementing both [`IdentityProvider`] and [`DocumentStore`]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    auth_state: watch::Sender<Option<Identity>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (auth_state, _) = watch::channel(None);
        Self {
            inner: Mutex::new(Inner::default()),
            auth_state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------

    /// Insert or replace a document without failure injection. Subscribers are notified.
    pub fn insert(&self, collection: &str, record: Record) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        inner.notify(&[collection]);
    }

    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Record> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|c| c.get(id).cloned())
    }

    /// Live (not cancelled, not dropped) subscriptions on a collection
    pub fn subscriber_count(&self, collection: &str) -> usize {
        let mut inner = self.lock();
        inner.prune();
        inner
            .subscribers
            .iter()
            .filter(|s| s.query.collection == collection)
            .count()
    }

    // ------------------------------------------------------------------
    // Failure injection and delivery control
    // ------------------------------------------------------------------

    /// Make `op` fail with `error` until [`MemoryBackend::recover`] is called
    pub fn fail(&self, op: Operation, error: StoreError) {
        self.lock().failures.insert(op, error);
    }

    pub fn recover(&self, op: Operation) {
        self.lock().failures.remove(&op);
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().read_delay = delay;
    }

    /// Queue deliveries instead of sending them
    pub fn hold_deliveries(&self) {
        let mut inner = self.lock();
        if inner.held.is_none() {
            inner.held = Some(Vec::new());
        }
    }

    /// Flush queued deliveries to their original subscriptions, cancelled or not
    pub fn release_deliveries(&self) -> usize {
        let held = self.lock().held.take().unwrap_or_default();
        let count = held.len();
        for (sender, event) in held {
            sender.send(event);
        }
        debug!(count, "Released held deliveries");
        count
    }

    /// Report a listener error to every subscriber of `collection`
    pub fn push_listener_error(&self, collection: &str, error: StoreError) {
        let mut inner = self.lock();
        inner.prune();
        let senders: Vec<_> = inner
            .subscribers
            .iter()
            .filter(|s| s.query.collection == collection)
            .map(|s| s.sender.clone())
            .collect();
        for sender in senders {
            inner.deliver(sender, SubscriptionEvent::Error(error.clone()));
        }
    }

    // ------------------------------------------------------------------
    // Identity controls
    // ------------------------------------------------------------------

    pub fn add_user(&self, uid: &str, email: &str, password: &str) {
        self.lock().users.insert(
            email.to_lowercase(),
            UserAccount {
                identity: Identity {
                    uid: uid.to_string(),
                    email: email.to_string(),
                },
                password: password.to_string(),
                disabled: false,
            },
        );
    }

    pub fn disable_user(&self, email: &str) {
        if let Some(account) = self.lock().users.get_mut(&email.to_lowercase()) {
            account.disabled = true;
        }
    }

    /// Errors returned by the next sign-in calls, one per call, before normal checks
    pub fn script_sign_in_failures(&self, errors: Vec<AuthError>) {
        self.lock().sign_in_script.extend(errors);
    }

    pub fn sign_in_attempts(&self) -> usize {
        self.lock().sign_in_attempts
    }

    /// Drive the auth state directly (session restored, token revoked, ...)
    pub fn set_signed_in(&self, identity: Option<Identity>) {
        self.auth_state.send_replace(identity);
    }

    fn check(&self, op: Operation) -> Result<(), StoreError> {
        match self.lock().failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn tick(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn resolve_sentinels(&mut self, mut fields: Map<String, JsonValue>) -> Map<String, JsonValue> {
        let needs_clock = fields.values().any(is_server_timestamp);
        if needs_clock {
            let now = JsonValue::from(self.tick());
            for value in fields.values_mut() {
                if is_server_timestamp(value) {
                    *value = now.clone();
                }
            }
        }
        fields
    }

    fn evaluate(&self, query: &Query) -> Vec<Record> {
        let mut result: Vec<Record> = self
            .collections
            .get(&query.collection)
            .map(|c| c.values().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            result.sort_by(|a, b| {
                let ord = match (a.timestamp(&order.field), b.timestamp(&order.field)) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ord = if order.descending { ord.reverse() } else { ord };
                ord.then_with(|| a.id.cmp(&b.id))
            });
        }
        if let Some(limit) = query.limit {
            result.truncate(limit);
        }
        result
    }

    fn prune(&mut self) {
        self.subscribers
            .retain(|s| !s.sender.is_cancelled() && !s.sender.is_closed());
    }

    fn deliver(&mut self, sender: SubscriptionSender, event: SubscriptionEvent) {
        match self.held.as_mut() {
            Some(queue) => queue.push((sender, event)),
            None => {
                sender.send(event);
            }
        }
    }

    /// Diff every affected subscriber's result set and push the deltas.
    fn notify(&mut self, collections: &[&str]) {
        self.prune();
        let touched: HashSet<&str> = collections.iter().copied().collect();

        let mut outgoing = Vec::new();
        for i in 0..self.subscribers.len() {
            if !touched.contains(self.subscribers[i].query.collection.as_str()) {
                continue;
            }
            let current = self.evaluate(&self.subscribers[i].query);
            let sub = &mut self.subscribers[i];

            let mut deltas = Vec::new();
            let mut next = HashMap::with_capacity(current.len());
            for record in current {
                match sub.last.get(&record.id) {
                    None => deltas.push(Delta::Added(record.clone())),
                    Some(prev) if prev != &record => deltas.push(Delta::Modified(record.clone())),
                    Some(_) => {}
                }
                next.insert(record.id.clone(), record);
            }
            let mut removed: Vec<_> = sub
                .last
                .keys()
                .filter(|id| !next.contains_key(*id))
                .cloned()
                .collect();
            removed.sort();
            deltas.extend(removed.into_iter().map(Delta::Removed));
            sub.last = next;

            if !deltas.is_empty() {
                outgoing.push((sub.sender.clone(), DeltaBatch::new(deltas)));
            }
        }

        for (sender, batch) in outgoing {
            self.deliver(sender, SubscriptionEvent::Batch(batch));
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get(
        &self,
        collection: &str,
        id: &str,
        _source: ReadSource,
    ) -> Result<Option<Record>, StoreError> {
        let delay = self.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(Operation::Get)?;
        Ok(self.document(collection, id))
    }

    async fn add(
        &self,
        collection: &str,
        fields: Map<String, JsonValue>,
    ) -> Result<String, StoreError> {
        self.check(Operation::Add)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut inner = self.lock();
        let fields = inner.resolve_sentinels(fields);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), Record::new(id.clone(), fields));
        inner.notify(&[collection]);
        debug!(collection, id, "Document added");
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, JsonValue>,
    ) -> Result<(), StoreError> {
        self.check(Operation::Update)?;
        let mut inner = self.lock();
        let fields = inner.resolve_sentinels(fields);
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
        doc.fields.extend(fields);
        inner.notify(&[collection]);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check(Operation::Delete)?;
        let mut inner = self.lock();
        if let Some(c) = inner.collections.get_mut(collection) {
            c.remove(id);
        }
        inner.notify(&[collection]);
        Ok(())
    }

    async fn commit_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.check(Operation::Batch)?;
        let mut inner = self.lock();

        // All-or-nothing: validate every target before touching anything
        for op in &ops {
            if let WriteOp::Update { collection, id, .. } = op {
                let exists = inner
                    .collections
                    .get(collection)
                    .is_some_and(|c| c.contains_key(id));
                if !exists {
                    return Err(StoreError::NotFound(format!("{}/{}", collection, id)));
                }
            }
        }

        let mut touched: Vec<String> = Vec::new();
        for op in ops {
            match op {
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                } => {
                    let fields = inner.resolve_sentinels(fields);
                    if let Some(doc) = inner
                        .collections
                        .get_mut(&collection)
                        .and_then(|c| c.get_mut(&id))
                    {
                        doc.fields.extend(fields);
                    }
                    touched.push(collection);
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(c) = inner.collections.get_mut(&collection) {
                        c.remove(&id);
                    }
                    touched.push(collection);
                }
            }
        }

        let touched: Vec<&str> = touched.iter().map(String::as_str).collect();
        inner.notify(&touched);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        self.check(Operation::Query)?;
        Ok(self.lock().evaluate(query))
    }

    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError> {
        self.check(Operation::Subscribe)?;
        let (sender, subscription) = Subscription::channel();

        let mut inner = self.lock();
        let snapshot = inner.evaluate(query);
        let last = snapshot
            .iter()
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        inner.deliver(
            sender.clone(),
            SubscriptionEvent::Batch(DeltaBatch::snapshot(snapshot)),
        );
        inner.subscribers.push(Subscriber {
            query: query.clone(),
            sender,
            last,
        });
        debug!(collection = %query.collection, "Live subscription started");
        Ok(subscription)
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = {
            let mut inner = self.lock();
            inner.sign_in_attempts += 1;
            if let Some(error) = inner.sign_in_script.pop_front() {
                return Err(error);
            }
            let account = inner
                .users
                .get(&email.to_lowercase())
                .ok_or(AuthError::UserNotFound)?;
            if account.disabled {
                return Err(AuthError::UserDisabled);
            }
            if account.password != password {
                return Err(AuthError::WrongPassword);
            }
            account.identity.clone()
        };

        info!(uid = %identity.uid, "Signed in");
        self.auth_state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Err(e) = self.check(Operation::SignOut) {
            return Err(AuthError::Internal(e.to_string()));
        }
        self.auth_state.send_replace(None);
        Ok(())
    }

    fn current(&self) -> Option<Identity> {
        self.auth_state.borrow().clone()
    }

    fn auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.auth_state.subscribe()
    }
}
