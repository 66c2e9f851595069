//! Delta types for live subscriptions

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// One unit of change to a mirrored collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delta {
    /// Document entered the query result
    Added(Record),

    /// Document changed while staying in the result
    Modified(Record),

    /// Document left the result (deleted or no longer matching)
    Removed(String),
}

impl Delta {
    pub fn id(&self) -> &str {
        match self {
            Delta::Added(r) | Delta::Modified(r) => &r.id,
            Delta::Removed(id) => id,
        }
    }
}

/// All deltas bundled in one subscription update. Applied as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaBatch(pub Vec<Delta>);

impl DeltaBatch {
    pub fn new(deltas: Vec<Delta>) -> Self {
        Self(deltas)
    }

    /// Initial snapshot: every currently matching document as `Added`
    pub fn snapshot(records: impl IntoIterator<Item = Record>) -> Self {
        Self(records.into_iter().map(Delta::Added).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delta> {
        self.0.iter()
    }
}

impl IntoIterator for DeltaBatch {
    type Item = Delta;
    type IntoIter = std::vec::IntoIter<Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Ids touched by an applied batch, by delta kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl BatchSummary {
    pub fn touched(&self) -> impl Iterator<Item = &String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
