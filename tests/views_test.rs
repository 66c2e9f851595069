//! Derived view integration tests
//!
//! Covers recomputation properties over realistic department data:
//! - Determinism and no mutation of inputs
//! - Filter AND-composition
//! - Grouping totals and ordering
//! - Health and outreach statistics

use serde_json::json;

use campus_dashboards::config::DashboardConfig;
use campus_dashboards::session::Department;
use campus_dashboards::views::{self, recompute, FilterState, HealthView, OutreachView, ViewSpec};
use campus_dashboards::{Mirror, Record};

fn health_mirror() -> Mirror {
    let mut mirror = Mirror::new(HealthView::ORDER_FIELD);
    mirror.seed(vec![
        Record::from_json(
            "h1",
            json!({
                "submissionTimestamp": 1_700_000_000_000i64,
                "gender": "Female",
                "location": "Main Campus",
                "menstrualPain": true,
                "stress": true,
                "registrationNumber": "EDU/2021/001",
                "email": "amina@students.uoe.ac.ke",
                "mainComplaint": "Severe cramps before exams"
            }),
        ),
        Record::from_json(
            "h2",
            json!({
                "submissionTimestamp": 1_700_000_100_000i64,
                "gender": "Male",
                "location": "Town Campus",
                "sportsInjury": true,
                "mainComplaint": "Twisted ankle at practice"
            }),
        ),
        Record::from_json(
            "h3",
            json!({
                "submissionTimestamp": 1_700_000_200_000i64,
                "gender": "Male",
                "location": "Main Campus",
                "academicPressure": true,
                "sleepIssues": true,
                "email": "otieno@students.uoe.ac.ke"
            }),
        ),
        Record::from_json(
            "h4",
            json!({
                "submissionTimestamp": 1_700_000_300_000i64,
                "gender": "Other",
                "location": "Town Campus",
                "flu": true
            }),
        ),
        Record::from_json("h5", json!({ "gender": "Female" })),
    ]);
    mirror
}

fn outreach_mirror() -> Mirror {
    let mut mirror = Mirror::new(OutreachView::ORDER_FIELD);
    mirror.seed(vec![
        Record::from_json(
            "r1",
            json!({"timestamp": 10, "title": "Broken street light", "category": "Lighting",
                   "priority": "medium", "location": "Hostel B"}),
        ),
        Record::from_json(
            "r2",
            json!({"timestamp": 20, "title": "Phone stolen", "category": "Theft",
                   "priority": "urgent", "status": "under investigation"}),
        ),
        Record::from_json(
            "r3",
            json!({"timestamp": 30, "title": "Laptop stolen", "category": "Theft",
                   "priority": "high", "status": "resolved", "description": "Taken from library"}),
        ),
        Record::from_json(
            "r4",
            json!({"timestamp": 40, "title": "Noise at night", "priority": "low",
                   "status": "submitted"}),
        ),
        Record::from_json(
            "r5",
            json!({"timestamp": 50, "title": "Leaking roof", "category": "Facilities",
                   "status": "in progress"}),
        ),
    ]);
    mirror
}

fn sample_filters() -> Vec<FilterState> {
    vec![
        FilterState::default(),
        FilterState::default().with_gender("Male"),
        FilterState::default().with_location("Main Campus"),
        FilterState::default().with_gender("Female").with_location("Main Campus"),
        FilterState::default().with_concern("mental"),
        FilterState::default().with_concern("general").with_gender("Male"),
        FilterState::default().with_search("students.uoe"),
        FilterState::default().with_search("ANKLE").with_location("Town Campus"),
        FilterState::default().with_status("submitted"),
        FilterState::default().with_status("resolved").with_priority("high"),
        FilterState::default().with_category("The"),
        FilterState::default().with_search("stolen").with_priority("urgent"),
    ]
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_recompute_is_referentially_transparent() {
    let view = HealthView::new();
    let mirror = health_mirror();
    let before = mirror.clone();

    for filter in sample_filters() {
        let filter_before = filter.clone();
        let first = recompute(&view, &mirror, &filter);
        let second = recompute(&view, &mirror, &filter);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(filter, filter_before);
    }

    assert_eq!(mirror.records(), before.records());
    assert_eq!(mirror.generation(), before.generation());
}

// =============================================================================
// Filter composition
// =============================================================================

fn satisfies_all(view: &dyn ViewSpec, record: &Record, filter: &FilterState) -> bool {
    let parts = [
        filter.status.clone().map(|v| FilterState::default().with_status(v)),
        filter.priority.clone().map(|v| FilterState::default().with_priority(v)),
        filter.category.clone().map(|v| FilterState::default().with_category(v)),
        filter.gender.clone().map(|v| FilterState::default().with_gender(v)),
        filter.location.clone().map(|v| FilterState::default().with_location(v)),
        filter.concern.clone().map(|v| FilterState::default().with_concern(v)),
        filter.search.clone().map(|v| FilterState::default().with_search(v)),
    ];
    parts
        .iter()
        .flatten()
        .all(|single| view.matches(record, single))
}

#[test]
fn test_table_rows_are_and_of_active_filters() {
    let cases: Vec<(Box<dyn ViewSpec>, Mirror)> = vec![
        (Box::new(HealthView::new()), health_mirror()),
        (Box::new(OutreachView::new()), outreach_mirror()),
    ];

    for (view, mirror) in &cases {
        for filter in sample_filters() {
            let derived = recompute(view, mirror, &filter);
            let expected: Vec<&str> = mirror
                .records()
                .iter()
                .filter(|r| satisfies_all(&**view, r, &filter))
                .map(|r| r.id.as_str())
                .collect();
            let actual: Vec<&str> = derived.table_rows.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(actual, expected, "filter {:?}", filter);
        }
    }
}

#[test]
fn test_combined_filters_narrow() {
    let view = HealthView::new();
    let mirror = health_mirror();

    let male = recompute(&view, &mirror, &FilterState::default().with_gender("Male"));
    assert_eq!(male.table_rows.len(), 2);

    let male_town = recompute(
        &view,
        &mirror,
        &FilterState::default().with_gender("Male").with_location("Town Campus"),
    );
    let ids: Vec<_> = male_town.table_rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["h2"]);
}

#[test]
fn test_table_rows_keep_mirror_order() {
    let view = OutreachView::new();
    let derived = recompute(&view, &outreach_mirror(), &FilterState::default());
    let ids: Vec<_> = derived.table_rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r5", "r4", "r3", "r2", "r1"]);
    assert_eq!(derived.recent.len(), 5);
}

// =============================================================================
// Groupings
// =============================================================================

#[test]
fn test_grouping_totals_bounded_and_sorted() {
    let cases: Vec<(Box<dyn ViewSpec>, Mirror)> = vec![
        (Box::new(HealthView::new()), health_mirror()),
        (Box::new(OutreachView::new()), outreach_mirror()),
    ];

    for (view, mirror) in &cases {
        let derived = recompute(view, mirror, &FilterState::default());
        assert_eq!(derived.groupings.len(), view.groupings().len());
        for grouping in &derived.groupings {
            assert!(grouping.total() <= mirror.len(), "{}", grouping.name);
            assert!(grouping.buckets.iter().all(|b| b.count > 0));
            assert!(
                grouping.buckets.windows(2).all(|w| w[0].count >= w[1].count),
                "{} not sorted",
                grouping.name
            );
        }
    }
}

#[test]
fn test_outreach_groupings() {
    let derived = recompute(&OutreachView::new(), &outreach_mirror(), &FilterState::default());

    let categories = derived.grouping("categories").unwrap();
    let labels: Vec<_> = categories.buckets.iter().map(|b| b.label.as_str()).collect();
    // Ties keep first-seen mirror order (newest first)
    assert_eq!(labels, vec!["Theft", "Facilities", "Uncategorized", "Lighting"]);
    assert_eq!(categories.count("Theft"), 2);

    let status = derived.grouping("status").unwrap();
    assert_eq!(status.count("Submitted"), 2);
    assert_eq!(status.count("In Progress"), 1);
    assert_eq!(status.total(), 5);

    let priority = derived.grouping("priority").unwrap();
    assert_eq!(priority.total(), 4);
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_health_scenario_three_records() {
    let mut mirror = Mirror::new(HealthView::ORDER_FIELD);
    mirror.seed(vec![
        Record::from_json("A", json!({ "depression": true })),
        Record::from_json("B", json!({ "gender": "Female", "menstrualPain": true })),
        Record::from_json("C", json!({ "gender": "Male", "notes": "routine check" })),
    ]);
    let view = HealthView::new();
    let derived = recompute(&view, &mirror, &FilterState::default());

    assert_eq!(derived.stat("total"), Some(3));
    assert_eq!(derived.stat("mental_health"), Some(1));
    assert_eq!(derived.stat("womens_health"), Some(1));
    assert_eq!(derived.stat("general_health"), Some(0));

    let without_c = {
        let mut m = Mirror::new(HealthView::ORDER_FIELD);
        m.seed(mirror.records()[..].iter().filter(|r| r.id != "C").cloned().collect());
        recompute(&view, &m, &FilterState::default())
    };
    assert_eq!(without_c.stat("general_health"), derived.stat("general_health"));
    assert_eq!(without_c.stat("mental_health"), derived.stat("mental_health"));
}

#[test]
fn test_health_stats_overlap() {
    let derived = recompute(&HealthView::new(), &health_mirror(), &FilterState::default());
    // h1 counts toward both mental and women's health
    assert_eq!(derived.stat("mental_health"), Some(2));
    assert_eq!(derived.stat("womens_health"), Some(1));
    assert_eq!(derived.stat("mens_health"), Some(1));
    assert_eq!(derived.stat("general_health"), Some(2));
    assert_eq!(derived.recent.len(), 5);
}

#[test]
fn test_outreach_stats() {
    let derived = recompute(&OutreachView::new(), &outreach_mirror(), &FilterState::default());
    assert_eq!(derived.stat("total"), Some(5));
    assert_eq!(derived.stat("pending"), Some(2));
    assert_eq!(derived.stat("resolved"), Some(1));
    assert_eq!(derived.stat("high_priority"), Some(2));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_view_from_config_overrides() {
    let config = DashboardConfig {
        department: Department::Outreach,
        collection: Some("reports_archive".into()),
        recent_limit: Some(2),
        ..Default::default()
    };
    let view = views::from_config(&config).unwrap();
    assert_eq!(view.department(), Department::Outreach);
    assert_eq!(view.collection(), "reports_archive");
    assert_eq!(view.order_field(), "timestamp");

    let derived = recompute(&view, &outreach_mirror(), &FilterState::default());
    assert_eq!(derived.recent.len(), 2);

    let estate = DashboardConfig {
        department: Department::Estate,
        ..Default::default()
    };
    assert!(views::from_config(&estate).is_none());
}
