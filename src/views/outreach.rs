//! Outreach department view over student incident reports

use super::{GroupDef, Predicate, StatDef, ViewSpec};
use crate::record::Record;
use crate::session::Department;

/// Status assumed for reports that have never been triaged
pub const DEFAULT_STATUS: &str = "submitted";

fn status(r: &Record) -> &str {
    r.text("status")
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STATUS)
}

fn priority_is(r: &Record, wanted: &str) -> bool {
    r.text("priority") == Some(wanted)
}

fn any(_: &Record) -> bool {
    true
}
fn pending(r: &Record) -> bool {
    status(r) == "submitted"
}
fn investigating(r: &Record) -> bool {
    status(r) == "under investigation"
}
fn assigned(r: &Record) -> bool {
    status(r) == "assigned"
}
fn in_progress(r: &Record) -> bool {
    status(r) == "in progress"
}
fn resolved(r: &Record) -> bool {
    status(r) == "resolved"
}
fn high(r: &Record) -> bool {
    priority_is(r, "high")
}
fn urgent(r: &Record) -> bool {
    priority_is(r, "urgent")
}
fn medium(r: &Record) -> bool {
    priority_is(r, "medium")
}
fn low(r: &Record) -> bool {
    priority_is(r, "low")
}
fn high_priority(r: &Record) -> bool {
    high(r) || urgent(r)
}

/// Outreach dashboard definition
pub struct OutreachView {
    collection: String,
    order_field: String,
    recent_limit: usize,
    stats: Vec<StatDef>,
    groupings: Vec<GroupDef>,
}

impl OutreachView {
    pub const COLLECTION: &'static str = "reports";
    pub const ORDER_FIELD: &'static str = "timestamp";

    pub fn new() -> Self {
        Self {
            collection: Self::COLLECTION.to_string(),
            order_field: Self::ORDER_FIELD.to_string(),
            recent_limit: 5,
            stats: vec![
                StatDef {
                    key: "total",
                    label: "Total Reports",
                    predicate: any,
                },
                StatDef {
                    key: "pending",
                    label: "Pending",
                    predicate: pending,
                },
                StatDef {
                    key: "resolved",
                    label: "Resolved",
                    predicate: resolved,
                },
                StatDef {
                    key: "high_priority",
                    label: "High Priority",
                    predicate: high_priority,
                },
            ],
            groupings: vec![
                GroupDef::ByField {
                    name: "categories",
                    field: "category",
                    missing: "Uncategorized",
                },
                GroupDef::Fixed {
                    name: "status",
                    buckets: vec![
                        ("Submitted", pending as Predicate),
                        ("Investigation", investigating),
                        ("Assigned", assigned),
                        ("In Progress", in_progress),
                        ("Resolved", resolved),
                    ],
                },
                GroupDef::Fixed {
                    name: "priority",
                    buckets: vec![
                        ("High", high as Predicate),
                        ("Urgent", urgent),
                        ("Medium", medium),
                        ("Low", low),
                    ],
                },
            ],
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_order_field(mut self, field: impl Into<String>) -> Self {
        self.order_field = field.into();
        self
    }

    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }
}

impl Default for OutreachView {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewSpec for OutreachView {
    fn department(&self) -> Department {
        Department::Outreach
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn order_field(&self) -> &str {
        &self.order_field
    }

    fn stats(&self) -> &[StatDef] {
        &self.stats
    }

    fn groupings(&self) -> &[GroupDef] {
        &self.groupings
    }

    fn search_fields(&self) -> &[&'static str] {
        &["title", "description", "location"]
    }

    // Outreach filters by status/priority/category, not concern
    fn concern(&self, _key: &str) -> Option<Predicate> {
        None
    }

    fn default_status(&self) -> Option<&'static str> {
        Some(DEFAULT_STATUS)
    }

    fn recent_limit(&self) -> usize {
        self.recent_limit
    }
}
