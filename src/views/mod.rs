//! Derived views - statistics, filtered table rows and breakdowns
//!
//! [`recompute`] is a pure function of the mirror and the filter state. It never mutates
//! either, and identical inputs always produce identical output. Department dashboards
//! plug in through [`ViewSpec`], which declares:
//! - stats: independent predicates counted over the whole mirror (they may overlap)
//! - groupings: partitions of the mirror into labelled buckets
//! - the concern keys and search fields the table filter understands

pub mod health;
pub mod outreach;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DashboardConfig;
use crate::record::Record;
use crate::session::Department;
use crate::sync::Mirror;

pub use health::HealthView;
pub use outreach::OutreachView;

/// Record predicate used by stats, buckets and concern filters
pub type Predicate = fn(&Record) -> bool;

/// Table filter. Every set field must hold (logical AND); unset or empty fields are
/// vacuously true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Substring of the record's category
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Department-defined concern key (e.g. "mental")
    #[serde(default)]
    pub concern: Option<String>,
    /// Case-insensitive free text over the department's search fields
    #[serde(default)]
    pub search: Option<String>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        active(&self.status).is_none()
            && active(&self.priority).is_none()
            && active(&self.category).is_none()
            && active(&self.gender).is_none()
            && active(&self.location).is_none()
            && active(&self.concern).is_none()
            && active(&self.search).is_none()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_concern(mut self, concern: impl Into<String>) -> Self {
        self.concern = Some(concern.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

fn active(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// A counted statistic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub key: &'static str,
    pub label: &'static str,
    pub count: usize,
}

/// Statistic definition
pub struct StatDef {
    pub key: &'static str,
    pub label: &'static str,
    pub predicate: Predicate,
}

/// One labelled bucket of a grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub label: String,
    pub count: usize,
}

/// Non-empty buckets sorted by count descending, ties in definition order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grouping {
    pub name: &'static str,
    pub buckets: Vec<Bucket>,
}

impl Grouping {
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum()
    }

    pub fn count(&self, label: &str) -> usize {
        self.buckets
            .iter()
            .find(|b| b.label == label)
            .map_or(0, |b| b.count)
    }
}

/// Grouping definition. Each record lands in at most one bucket.
pub enum GroupDef {
    /// Fixed buckets; a record goes to the first bucket whose predicate holds
    Fixed {
        name: &'static str,
        buckets: Vec<(&'static str, Predicate)>,
    },
    /// One bucket per distinct field value, in first-seen mirror order
    ByField {
        name: &'static str,
        field: &'static str,
        missing: &'static str,
    },
}

/// Everything a dashboard renders from one mirror state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedView {
    pub stats: Vec<Stat>,
    pub table_rows: Vec<Record>,
    pub groupings: Vec<Grouping>,
    /// Newest records for the activity list
    pub recent: Vec<Record>,
}

impl DerivedView {
    pub fn stat(&self, key: &str) -> Option<usize> {
        self.stats.iter().find(|s| s.key == key).map(|s| s.count)
    }

    pub fn grouping(&self, name: &str) -> Option<&Grouping> {
        self.groupings.iter().find(|g| g.name == name)
    }
}

/// Department-specific view definition
pub trait ViewSpec: Send + Sync {
    fn department(&self) -> Department;

    /// Mirrored collection
    fn collection(&self) -> &str;

    /// Server timestamp field used for ordering
    fn order_field(&self) -> &str;

    fn stats(&self) -> &[StatDef];

    fn groupings(&self) -> &[GroupDef];

    /// Fields searched by the free-text filter
    fn search_fields(&self) -> &[&'static str];

    /// Predicate behind a concern filter key. Unknown keys match nothing.
    fn concern(&self, key: &str) -> Option<Predicate>;

    /// Status assumed for records without one
    fn default_status(&self) -> Option<&'static str> {
        None
    }

    /// Records shown in the recent activity list
    fn recent_limit(&self) -> usize {
        5
    }

    /// Does `record` satisfy every active predicate of `filter`?
    fn matches(&self, record: &Record, filter: &FilterState) -> bool {
        if let Some(status) = active(&filter.status) {
            let record_status = record
                .text("status")
                .filter(|s| !s.is_empty())
                .or(self.default_status());
            if record_status != Some(status) {
                return false;
            }
        }
        if let Some(priority) = active(&filter.priority) {
            if record.text("priority") != Some(priority) {
                return false;
            }
        }
        if let Some(category) = active(&filter.category) {
            if !record.text("category").is_some_and(|c| c.contains(category)) {
                return false;
            }
        }
        if let Some(gender) = active(&filter.gender) {
            if record.text("gender") != Some(gender) {
                return false;
            }
        }
        if let Some(location) = active(&filter.location) {
            if record.text("location") != Some(location) {
                return false;
            }
        }
        if let Some(concern) = active(&filter.concern) {
            match self.concern(concern) {
                Some(predicate) if predicate(record) => {}
                _ => return false,
            }
        }
        if let Some(search) = active(&filter.search) {
            let needle = search.to_lowercase();
            if !self
                .search_fields()
                .iter()
                .any(|field| record.contains_ci(field, &needle))
            {
                return false;
            }
        }
        true
    }
}

impl<T: ViewSpec + ?Sized> ViewSpec for Box<T> {
    fn department(&self) -> Department {
        (**self).department()
    }

    fn collection(&self) -> &str {
        (**self).collection()
    }

    fn order_field(&self) -> &str {
        (**self).order_field()
    }

    fn stats(&self) -> &[StatDef] {
        (**self).stats()
    }

    fn groupings(&self) -> &[GroupDef] {
        (**self).groupings()
    }

    fn search_fields(&self) -> &[&'static str] {
        (**self).search_fields()
    }

    fn concern(&self, key: &str) -> Option<Predicate> {
        (**self).concern(key)
    }

    fn default_status(&self) -> Option<&'static str> {
        (**self).default_status()
    }

    fn recent_limit(&self) -> usize {
        (**self).recent_limit()
    }

    fn matches(&self, record: &Record, filter: &FilterState) -> bool {
        (**self).matches(record, filter)
    }
}

/// Recompute stats, table rows and groupings from the mirror and the current filter.
pub fn recompute<V: ViewSpec + ?Sized>(
    spec: &V,
    mirror: &Mirror,
    filter: &FilterState,
) -> DerivedView {
    let records = mirror.records();

    let stats = spec
        .stats()
        .iter()
        .map(|def| Stat {
            key: def.key,
            label: def.label,
            count: records.iter().filter(|r| (def.predicate)(r)).count(),
        })
        .collect();

    let table_rows = records
        .iter()
        .filter(|r| spec.matches(r, filter))
        .cloned()
        .collect();

    let groupings = spec
        .groupings()
        .iter()
        .map(|def| group(def, records))
        .collect();

    let recent = records.iter().take(spec.recent_limit()).cloned().collect();

    DerivedView {
        stats,
        table_rows,
        groupings,
        recent,
    }
}

fn group(def: &GroupDef, records: &[Record]) -> Grouping {
    let (name, counted) = match def {
        GroupDef::Fixed { name, buckets } => {
            let mut counts = vec![0usize; buckets.len()];
            for record in records {
                if let Some(i) = buckets.iter().position(|(_, p)| p(record)) {
                    counts[i] += 1;
                }
            }
            let counted: Vec<(String, usize)> = buckets
                .iter()
                .zip(counts)
                .map(|((label, _), count)| (label.to_string(), count))
                .collect();
            (*name, counted)
        }
        GroupDef::ByField {
            name,
            field,
            missing,
        } => {
            let mut order: Vec<String> = Vec::new();
            let mut counts: HashMap<String, usize> = HashMap::new();
            for record in records {
                let label = record
                    .text(field)
                    .filter(|v| !v.is_empty())
                    .unwrap_or(*missing)
                    .to_string();
                let slot = counts.entry(label.clone()).or_insert(0);
                if *slot == 0 {
                    order.push(label);
                }
                *slot += 1;
            }
            let counted = order
                .into_iter()
                .map(|label| {
                    let count = counts.get(&label).copied().unwrap_or(0);
                    (label, count)
                })
                .collect();
            (*name, counted)
        }
    };

    let mut buckets: Vec<Bucket> = counted
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(label, count)| Bucket { label, count })
        .collect();
    // Stable: ties keep definition order
    buckets.sort_by(|a, b| b.count.cmp(&a.count));

    Grouping { name, buckets }
}

/// Build the view for a department
pub fn for_department(department: Department) -> Option<Box<dyn ViewSpec>> {
    match department {
        Department::Health => Some(Box::new(HealthView::new())),
        Department::Outreach => Some(Box::new(OutreachView::new())),
        _ => None,
    }
}

/// Build the configured department's view with any collection, ordering or
/// recent-list overrides applied.
pub fn from_config(config: &DashboardConfig) -> Option<Box<dyn ViewSpec>> {
    macro_rules! configured {
        ($view:expr) => {{
            let mut view = $view;
            if let Some(collection) = &config.collection {
                view = view.with_collection(collection);
            }
            if let Some(field) = &config.order_field {
                view = view.with_order_field(field);
            }
            if let Some(limit) = config.recent_limit {
                view = view.with_recent_limit(limit);
            }
            Some(Box::new(view) as Box<dyn ViewSpec>)
        }};
    }

    match config.department {
        Department::Health => configured!(HealthView::new()),
        Department::Outreach => configured!(OutreachView::new()),
        _ => None,
    }
}
