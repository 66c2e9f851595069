//! Cancellable live subscriptions
//!
//! A transport pushes [`SubscriptionEvent`]s through a [`SubscriptionSender`]; the owner
//! reads them from the [`Subscription`]. Cancelling the [`SubscriptionHandle`] stops
//! delivery immediately: anything still queued, or pushed late by the transport, is dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::delta::DeltaBatch;
use crate::backend::StoreError;

/// Events delivered on a live subscription
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Batch(DeltaBatch),
    /// Listener error. The transport keeps the subscription open and reconnects itself.
    Error(StoreError),
}

/// Cancellation token shared between a subscription, its transport and its owner.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancelled: Arc<watch::Sender<bool>>,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
        }
    }

    /// Stop delivery. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.cancelled.subscribe()
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport side of a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
    handle: SubscriptionHandle,
}

impl SubscriptionSender {
    /// Push a batch. Returns false once the subscription is gone.
    pub fn send_batch(&self, batch: DeltaBatch) -> bool {
        self.send(SubscriptionEvent::Batch(batch))
    }

    pub fn send_error(&self, error: StoreError) -> bool {
        self.send(SubscriptionEvent::Error(error))
    }

    /// Pushes even after cancellation, as a transport with the event already in flight
    /// would. The receiving side discards it.
    pub fn send(&self, event: SubscriptionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner side of a live subscription
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<SubscriptionEvent>,
    handle: SubscriptionHandle,
    cancelled: watch::Receiver<bool>,
}

impl Subscription {
    /// Create a connected sender/subscription pair
    pub fn channel() -> (SubscriptionSender, Subscription) {
        let (tx, receiver) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();
        let sender = SubscriptionSender {
            tx,
            handle: handle.clone(),
        };
        let cancelled = handle.watch();
        (
            sender,
            Subscription {
                receiver,
                handle,
                cancelled,
            },
        )
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn cancel(&mut self) {
        self.handle.cancel();
        self.receiver.close();
    }

    /// Next event, or `None` once cancelled or once the transport hung up.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        if self.handle.is_cancelled() {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.cancelled.wait_for(|c| *c) => None,
            event = self.receiver.recv() => event,
        };

        if self.handle.is_cancelled() {
            debug!("Dropping event from cancelled subscription");
            return None;
        }
        event
    }
}
