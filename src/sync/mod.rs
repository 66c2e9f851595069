//! Live collection sync
//!
//! Handles:
//! - Delta batches delivered by a live subscription
//! - Cancellation handles that stop delivery, including batches already in flight
//! - The mirror: an ordered local copy of a remote collection

pub mod delta;
pub mod mirror;
pub mod subscription;

// Re-exports
pub use delta::{BatchSummary, Delta, DeltaBatch};
pub use mirror::{LiveMirror, Mirror, MirrorEvent};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionHandle, SubscriptionSender};
