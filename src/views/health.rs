//! Health department view
//!
//! Student health submissions carry boolean concern flags plus `gender`, `location`,
//! `registrationNumber`, `email` and `mainComplaint`.

use super::{GroupDef, Predicate, StatDef, ViewSpec};
use crate::record::Record;
use crate::session::Department;

const MENTAL_HEALTH_STAT: &[&str] = &["depression", "stress", "mentalStigma", "academicPressure"];
const MENTAL_HEALTH: &[&str] = &["depression", "stress", "mentalStigma"];
const WOMENS_HEALTH_STAT: &[&str] = &[
    "contraception",
    "irregularPeriods",
    "menstrualPain",
    "pregnancyConcerns",
    "sanitaryAccess",
    "harassment",
    "needSafeSpace",
];
const WOMENS_HEALTH: &[&str] = &["contraception", "irregularPeriods", "menstrualPain"];
const MENS_HEALTH: &[&str] = &["sexualHealthMale", "sportsInjury"];
const GENERAL_HEALTH: &[&str] = &["flu", "stomachIssues", "sportsInjury"];

fn any(_: &Record) -> bool {
    true
}
fn mental_health_case(r: &Record) -> bool {
    r.any_flag(MENTAL_HEALTH_STAT)
}
fn womens_health_case(r: &Record) -> bool {
    r.text("gender") == Some("Female") && r.any_flag(WOMENS_HEALTH_STAT)
}
fn mens_health_case(r: &Record) -> bool {
    r.text("gender") == Some("Male") && r.any_flag(MENS_HEALTH)
}
fn mental(r: &Record) -> bool {
    r.any_flag(MENTAL_HEALTH)
}
fn academic(r: &Record) -> bool {
    r.flag("academicPressure")
}
fn sleep(r: &Record) -> bool {
    r.flag("sleepIssues")
}
fn womens(r: &Record) -> bool {
    r.any_flag(WOMENS_HEALTH)
}
fn general(r: &Record) -> bool {
    r.any_flag(GENERAL_HEALTH)
}
fn stress(r: &Record) -> bool {
    r.flag("stress")
}
fn depression(r: &Record) -> bool {
    r.flag("depression")
}
fn sanitary_access(r: &Record) -> bool {
    r.flag("sanitaryAccess")
}
fn harassment(r: &Record) -> bool {
    r.flag("harassment")
}
fn male(r: &Record) -> bool {
    r.text("gender") == Some("Male")
}
fn female(r: &Record) -> bool {
    r.text("gender") == Some("Female")
}

/// Health dashboard definition
pub struct HealthView {
    collection: String,
    order_field: String,
    recent_limit: usize,
    stats: Vec<StatDef>,
    groupings: Vec<GroupDef>,
}

impl HealthView {
    pub const COLLECTION: &'static str = "health";
    pub const ORDER_FIELD: &'static str = "submissionTimestamp";

    pub fn new() -> Self {
        Self {
            collection: Self::COLLECTION.to_string(),
            order_field: Self::ORDER_FIELD.to_string(),
            recent_limit: 6,
            stats: vec![
                StatDef {
                    key: "total",
                    label: "Total Records",
                    predicate: any,
                },
                StatDef {
                    key: "mental_health",
                    label: "Mental Health Cases",
                    predicate: mental_health_case,
                },
                StatDef {
                    key: "womens_health",
                    label: "Women's Health",
                    predicate: womens_health_case,
                },
                StatDef {
                    key: "mens_health",
                    label: "Men's Health",
                    predicate: mens_health_case,
                },
                StatDef {
                    key: "general_health",
                    label: "General Health",
                    predicate: general,
                },
                StatDef {
                    key: "academic_health",
                    label: "Academic Health",
                    predicate: academic,
                },
                StatDef {
                    key: "stress",
                    label: "Stress/Anxiety",
                    predicate: stress,
                },
                StatDef {
                    key: "depression",
                    label: "Depression",
                    predicate: depression,
                },
                StatDef {
                    key: "sleep_issues",
                    label: "Sleep Issues",
                    predicate: sleep,
                },
                StatDef {
                    key: "sanitary_access",
                    label: "Sanitary Access",
                    predicate: sanitary_access,
                },
                StatDef {
                    key: "harassment",
                    label: "Harassment",
                    predicate: harassment,
                },
            ],
            groupings: vec![
                GroupDef::Fixed {
                    name: "categories",
                    buckets: vec![
                        ("Mental Health", mental as Predicate),
                        ("Academic Pressure", academic),
                        ("Sleep Issues", sleep),
                        ("Physical Health", general),
                        ("Women's Health", womens),
                    ],
                },
                GroupDef::Fixed {
                    name: "concerns",
                    buckets: vec![
                        ("Stress/Anxiety", stress as Predicate),
                        ("Depression", depression),
                        ("Sleep Issues", sleep),
                        ("Academic Pressure", academic),
                        ("Sanitary Access", sanitary_access),
                        ("Harassment", harassment),
                    ],
                },
                GroupDef::Fixed {
                    name: "gender",
                    buckets: vec![
                        ("Male", male as Predicate),
                        ("Female", female),
                        ("Other", any),
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

impl Default for HealthView {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewSpec for HealthView {
    fn department(&self) -> Department {
        Department::Health
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
        &["registrationNumber", "email", "mainComplaint"]
    }

    fn concern(&self, key: &str) -> Option<Predicate> {
        match key {
            "mental" => Some(mental),
            "academic" => Some(academic),
            "womens" => Some(womens),
            "general" => Some(general),
            _ => None,
        }
    }

    fn recent_limit(&self) -> usize {
        self.recent_limit
    }
}
