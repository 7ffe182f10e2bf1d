//! Membership history reconciliation: folds a student's append-only
//! condition log for one group into the timestamps the aggregator
//! bounds attendance with.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Active,
    Archived,
}

impl Condition {
    pub fn parse(raw: &str) -> Option<Condition> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Condition::Active),
            "archived" => Some(Condition::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Active => "active",
            Condition::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    pub student_id: String,
    pub condition: Condition,
    pub created_at: NaiveDateTime,
}

/// Derived standing of one student in one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipStanding {
    /// When the student first appeared in the group, in any condition.
    /// Minimum eligible date for attendance display, inclusive.
    pub added_at: NaiveDateTime,
    /// Most recent activation, if the student was ever activated.
    pub activated_at: Option<NaiveDateTime>,
    /// Condition of the most recent record.
    pub condition: Condition,
}

/// Reconciles the record log of a single student. `None` when the log
/// is empty: the student simply does not participate in aggregation.
pub fn reconcile(records: &[MembershipRecord]) -> Option<MembershipStanding> {
    let mut added_at: Option<NaiveDateTime> = None;
    let mut activated_at: Option<NaiveDateTime> = None;
    let mut latest: Option<&MembershipRecord> = None;

    for record in records {
        if added_at.map(|ts| record.created_at < ts).unwrap_or(true) {
            added_at = Some(record.created_at);
        }
        if record.condition == Condition::Active
            && activated_at.map(|ts| record.created_at >= ts).unwrap_or(true)
        {
            activated_at = Some(record.created_at);
        }
        // >= so that on equal timestamps the later appended row wins.
        if latest.map(|r| record.created_at >= r.created_at).unwrap_or(true) {
            latest = Some(record);
        }
    }

    Some(MembershipStanding {
        added_at: added_at?,
        activated_at,
        condition: latest?.condition,
    })
}

/// Reconciles a whole group's history, keyed by student id.
pub fn reconcile_group(records: &[MembershipRecord]) -> BTreeMap<String, MembershipStanding> {
    let mut by_student: BTreeMap<String, Vec<MembershipRecord>> = BTreeMap::new();
    for record in records {
        by_student
            .entry(record.student_id.clone())
            .or_default()
            .push(record.clone());
    }

    by_student
        .into_iter()
        .filter_map(|(student_id, log)| reconcile(&log).map(|s| (student_id, s)))
        .collect()
}
