//! Attendance engine: mutation guard and read aggregator over narrow
//! capability interfaces. The SQLite adapter lives in `store`; tests
//! run against in-memory fakes with a fixed clock.

use crate::membership::{self, MembershipRecord, MembershipStanding};
use crate::schedule::{self, GroupDays, LessonSlot, LessonTransfer, ScheduleError};
use chrono::{NaiveDate, NaiveDateTime, Timelike, Weekday};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Marks for the previous day are locked out from this hour on,
/// server-local.
pub const PRIOR_DAY_CUTOFF_HOUR: u32 = 12;

pub type AttendanceResult<T> = Result<T, AttendanceError>;

#[derive(Debug)]
pub enum AttendanceError {
    InvalidArgument(String),
    FutureDateRejected(NaiveDate),
    NotAGroupDay(NaiveDate),
    CutoffExceeded(NaiveDate),
    NotFound(String),
    DeadlineExceeded(&'static str),
    Internal(String),
}

impl Display for AttendanceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "{}", message),
            Self::FutureDateRejected(date) => {
                write!(f, "attendance cannot be created for a future date: {}", date)
            }
            Self::NotAGroupDay(date) => write!(
                f,
                "attendance cannot be created today ({}); group is not active",
                date
            ),
            Self::CutoffExceeded(date) => write!(
                f,
                "attendance cannot be set for yesterday ({}) after the cutoff",
                date
            ),
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::DeadlineExceeded(op) => write!(f, "request deadline exceeded during {}", op),
            Self::Internal(message) => write!(f, "{}", message),
        }
    }
}

impl Error for AttendanceError {}

impl From<ScheduleError> for AttendanceError {
    fn from(err: ScheduleError) -> Self {
        // Bad weekday configuration is server-side data damage for that
        // group, not caller input.
        AttendanceError::Internal(err.to_string())
    }
}

/// Per-request execution context: the clock snapshot business rules are
/// evaluated against, plus the deadline every storage/collaborator call
/// is gated on.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub now: NaiveDateTime,
    deadline: Option<Instant>,
}

impl RequestCtx {
    pub fn new(now: NaiveDateTime, budget: Option<Duration>) -> Self {
        Self {
            now,
            deadline: budget.map(|b| Instant::now() + b),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    /// Checked before every blocking call so an expired request aborts
    /// promptly with a condition callers can tell apart from an
    /// internal failure.
    pub fn check_deadline(&self, op: &'static str) -> AttendanceResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(AttendanceError::DeadlineExceeded(op))
            }
            _ => Ok(()),
        }
    }
}

/// Static recurrence metadata of a group, owned by the group registry.
#[derive(Debug, Clone)]
pub struct GroupSchedule {
    pub weekdays: Vec<Weekday>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lesson_start_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentProfile {
    pub student_id: String,
    pub last_name: String,
    pub first_name: String,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStatus {
    Absent,
    Present,
}

impl MarkStatus {
    pub fn from_code(code: i64) -> Option<MarkStatus> {
        match code {
            0 => Some(MarkStatus::Absent),
            1 => Some(MarkStatus::Present),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            MarkStatus::Absent => 0,
            MarkStatus::Present => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceMark {
    pub student_id: String,
    pub attend_date: NaiveDate,
    pub status: MarkStatus,
    pub teacher_id: String,
}

/// A guarded write about to hit the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMark {
    pub group_id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub attend_date: NaiveDate,
    pub status: MarkStatus,
    pub recorded_at: NaiveDateTime,
}

pub trait GroupSource {
    fn group_schedule(&self, group_id: &str) -> AttendanceResult<Option<GroupSchedule>>;
    fn transfers(
        &self,
        group_id: &str,
        from: NaiveDate,
        till: NaiveDate,
    ) -> AttendanceResult<Vec<LessonTransfer>>;
}

pub trait MembershipSource {
    fn history(&self, group_id: &str) -> AttendanceResult<Vec<MembershipRecord>>;
}

pub trait StudentSource {
    fn profiles(&self, student_ids: &[String]) -> AttendanceResult<Vec<StudentProfile>>;
}

pub trait MarkStore {
    /// Single atomic keyed write; last writer wins on status/teacher.
    fn upsert(&self, mark: &NewMark) -> AttendanceResult<()>;
    fn query(
        &self,
        group_id: &str,
        from: NaiveDate,
        till: NaiveDate,
    ) -> AttendanceResult<Vec<AttendanceMark>>;
}

/// Wire-level write request, dates still raw so the guard owns every
/// validation step in order.
#[derive(Debug, Clone)]
pub struct MarkRequest {
    pub group_id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub attend_date: String,
    pub status: MarkStatus,
}

/// Mutation guard: every check runs in order and the first failure
/// aborts with its own reason. On success the mark is upserted.
pub fn record_mark(
    ctx: &RequestCtx,
    groups: &impl GroupSource,
    marks: &impl MarkStore,
    req: &MarkRequest,
) -> AttendanceResult<()> {
    for (field, value) in [
        ("groupId", &req.group_id),
        ("studentId", &req.student_id),
        ("teacherId", &req.teacher_id),
    ] {
        if value.trim().is_empty() {
            return Err(AttendanceError::InvalidArgument(format!(
                "missing {}",
                field
            )));
        }
    }

    let attend_date = schedule::parse_day(&req.attend_date).ok_or_else(|| {
        AttendanceError::InvalidArgument(format!(
            "attendDate must be YYYY-MM-DD, got {:?}",
            req.attend_date
        ))
    })?;

    let today = ctx.today();
    if attend_date > today {
        return Err(AttendanceError::FutureDateRejected(attend_date));
    }

    ctx.check_deadline("group lookup")?;
    let group = groups
        .group_schedule(&req.group_id)?
        .ok_or_else(|| AttendanceError::NotFound(format!("group {}", req.group_id)))?;

    // The activity check is against the current day, not the submitted
    // date: marks may only be entered on days the group actually meets.
    if !meets_on(&group, today) {
        return Err(AttendanceError::NotAGroupDay(today));
    }

    let yesterday = today.pred_opt();
    if yesterday == Some(attend_date) && ctx.now.hour() >= PRIOR_DAY_CUTOFF_HOUR {
        return Err(AttendanceError::CutoffExceeded(attend_date));
    }

    ctx.check_deadline("attendance upsert")?;
    marks.upsert(&NewMark {
        group_id: req.group_id.clone(),
        student_id: req.student_id.clone(),
        teacher_id: req.teacher_id.trim().to_string(),
        attend_date,
        status: req.status,
        recorded_at: ctx.now,
    })
}

fn meets_on(group: &GroupSchedule, day: NaiveDate) -> bool {
    let mut days = GroupDays::new(
        &group.weekdays,
        group.start_date,
        group.end_date,
        day,
        day,
    );
    days.next().is_some()
}

/// One row of the aggregated sheet.
#[derive(Debug, Clone)]
pub struct StudentAttendance {
    pub profile: StudentProfile,
    pub standing: MembershipStanding,
    pub marks: Vec<AttendanceMark>,
}

/// The aggregated read model: day axis plus per-student bounded marks.
#[derive(Debug, Clone)]
pub struct AttendanceSheet {
    pub days: Vec<LessonSlot>,
    pub students: Vec<StudentAttendance>,
}

/// Read-side aggregation. All-or-nothing: any collaborator failure
/// surfaces as an error, never partial data.
pub fn read_attendance(
    ctx: &RequestCtx,
    groups: &impl GroupSource,
    members: &impl MembershipSource,
    students: &impl StudentSource,
    marks: &impl MarkStore,
    group_id: &str,
    from_raw: &str,
    till_raw: &str,
) -> AttendanceResult<AttendanceSheet> {
    if group_id.trim().is_empty() {
        return Err(AttendanceError::InvalidArgument("missing groupId".to_string()));
    }
    let from = schedule::parse_day(from_raw).ok_or_else(|| {
        AttendanceError::InvalidArgument(format!("from must be YYYY-MM-DD, got {:?}", from_raw))
    })?;
    let till = schedule::parse_day(till_raw).ok_or_else(|| {
        AttendanceError::InvalidArgument(format!("till must be YYYY-MM-DD, got {:?}", till_raw))
    })?;
    if till < from {
        return Err(AttendanceError::InvalidArgument(format!(
            "till {} is before from {}",
            till, from
        )));
    }

    ctx.check_deadline("group lookup")?;
    let group = groups
        .group_schedule(group_id)?
        .ok_or_else(|| AttendanceError::NotFound(format!("group {}", group_id)))?;

    ctx.check_deadline("transfer query")?;
    let transfers = groups.transfers(group_id, from, till)?;
    let axis = schedule::overlay_transfers(
        GroupDays::new(&group.weekdays, group.start_date, group.end_date, from, till),
        &transfers,
    );
    let axis_dates: HashSet<NaiveDate> = axis.iter().map(|slot| slot.date).collect();

    ctx.check_deadline("membership query")?;
    let history = members.history(group_id)?;
    let standings = membership::reconcile_group(&history);

    ctx.check_deadline("attendance query")?;
    let all_marks = marks.query(group_id, from, till)?;

    let member_ids: Vec<String> = standings.keys().cloned().collect();
    ctx.check_deadline("student directory")?;
    let profiles = students.profiles(&member_ids)?;

    let today = ctx.today();
    let mut rows = Vec::new();
    for profile in profiles {
        let Some(standing) = standings.get(&profile.student_id) else {
            continue;
        };
        let window_start = from.max(standing.added_at.date());
        let window_end = till.min(today);
        let student_marks: Vec<AttendanceMark> = all_marks
            .iter()
            .filter(|mark| {
                mark.student_id == profile.student_id
                    && axis_dates.contains(&mark.attend_date)
                    && mark.attend_date >= window_start
                    && mark.attend_date <= window_end
            })
            .cloned()
            .collect();
        rows.push(StudentAttendance {
            standing: standing.clone(),
            profile,
            marks: student_marks,
        });
    }
    rows.sort_by(|a, b| {
        (&a.profile.last_name, &a.profile.first_name, &a.profile.student_id).cmp(&(
            &b.profile.last_name,
            &b.profile.first_name,
            &b.profile.student_id,
        ))
    });

    Ok(AttendanceSheet {
        days: axis,
        students: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Condition;
    use std::cell::RefCell;

    fn day(raw: &str) -> NaiveDate {
        schedule::parse_day(raw).expect("test date")
    }

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").expect("test timestamp")
    }

    fn ctx_at(raw: &str) -> RequestCtx {
        RequestCtx::new(ts(raw), None)
    }

    #[derive(Default)]
    struct FakeBackend {
        group: Option<GroupSchedule>,
        transfers: Vec<LessonTransfer>,
        history: Vec<MembershipRecord>,
        profiles: Vec<StudentProfile>,
        marks: RefCell<Vec<NewMark>>,
    }

    impl FakeBackend {
        fn with_group(weekdays: &[Weekday], start: &str, end: &str) -> Self {
            Self {
                group: Some(GroupSchedule {
                    weekdays: weekdays.to_vec(),
                    start_date: day(start),
                    end_date: day(end),
                    lesson_start_time: "10:00".to_string(),
                }),
                ..Self::default()
            }
        }

        fn push_mark(&self, student: &str, date: &str, status: MarkStatus, teacher: &str) {
            self.marks.borrow_mut().push(NewMark {
                group_id: "g1".to_string(),
                student_id: student.to_string(),
                teacher_id: teacher.to_string(),
                attend_date: day(date),
                status,
                recorded_at: ts("2024-01-01 10:00:00"),
            });
        }

        fn profile(mut self, id: &str, last: &str, first: &str) -> Self {
            self.profiles.push(StudentProfile {
                student_id: id.to_string(),
                last_name: last.to_string(),
                first_name: first.to_string(),
                phone: None,
                birth_date: None,
            });
            self
        }

        fn member_since(mut self, id: &str, created_at: &str) -> Self {
            self.history.push(MembershipRecord {
                student_id: id.to_string(),
                condition: Condition::Active,
                created_at: ts(created_at),
            });
            self
        }
    }

    impl GroupSource for FakeBackend {
        fn group_schedule(&self, _group_id: &str) -> AttendanceResult<Option<GroupSchedule>> {
            Ok(self.group.clone())
        }

        fn transfers(
            &self,
            _group_id: &str,
            _from: NaiveDate,
            _till: NaiveDate,
        ) -> AttendanceResult<Vec<LessonTransfer>> {
            Ok(self.transfers.clone())
        }
    }

    impl MembershipSource for FakeBackend {
        fn history(&self, _group_id: &str) -> AttendanceResult<Vec<MembershipRecord>> {
            Ok(self.history.clone())
        }
    }

    impl StudentSource for FakeBackend {
        fn profiles(&self, student_ids: &[String]) -> AttendanceResult<Vec<StudentProfile>> {
            Ok(self
                .profiles
                .iter()
                .filter(|p| student_ids.contains(&p.student_id))
                .cloned()
                .collect())
        }
    }

    impl MarkStore for FakeBackend {
        fn upsert(&self, mark: &NewMark) -> AttendanceResult<()> {
            let mut marks = self.marks.borrow_mut();
            marks.retain(|m| {
                !(m.group_id == mark.group_id
                    && m.student_id == mark.student_id
                    && m.attend_date == mark.attend_date)
            });
            marks.push(mark.clone());
            Ok(())
        }

        fn query(
            &self,
            _group_id: &str,
            from: NaiveDate,
            till: NaiveDate,
        ) -> AttendanceResult<Vec<AttendanceMark>> {
            Ok(self
                .marks
                .borrow()
                .iter()
                .filter(|m| m.attend_date >= from && m.attend_date <= till)
                .map(|m| AttendanceMark {
                    student_id: m.student_id.clone(),
                    attend_date: m.attend_date,
                    status: m.status,
                    teacher_id: m.teacher_id.clone(),
                })
                .collect())
        }
    }

    fn all_weekdays() -> Vec<Weekday> {
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
    }

    fn mark_request(date: &str) -> MarkRequest {
        MarkRequest {
            group_id: "g1".to_string(),
            student_id: "s1".to_string(),
            teacher_id: "t1".to_string(),
            attend_date: date.to_string(),
            status: MarkStatus::Present,
        }
    }

    #[test]
    fn missing_teacher_fails_before_date_checks() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        let ctx = ctx_at("2024-06-14 10:00:00");
        let mut req = mark_request("not-even-a-date");
        req.teacher_id = "  ".to_string();
        match record_mark(&ctx, &backend, &backend, &req) {
            Err(AttendanceError::InvalidArgument(message)) => {
                assert!(message.contains("teacherId"), "got {}", message)
            }
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn unparseable_date_is_invalid_argument() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        let ctx = ctx_at("2024-06-14 10:00:00");
        let result = record_mark(&ctx, &backend, &backend, &mark_request("14.06.2024"));
        assert!(matches!(result, Err(AttendanceError::InvalidArgument(_))));
    }

    #[test]
    fn tomorrow_is_rejected_as_future_at_any_hour() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        for now in ["2024-06-14 00:01:00", "2024-06-14 23:59:00"] {
            let result = record_mark(&ctx_at(now), &backend, &backend, &mark_request("2024-06-15"));
            assert!(
                matches!(result, Err(AttendanceError::FutureDateRejected(d)) if d == day("2024-06-15")),
                "now={}",
                now
            );
        }
    }

    #[test]
    fn unknown_group_is_not_found() {
        let backend = FakeBackend::default();
        let ctx = ctx_at("2024-06-14 10:00:00");
        let result = record_mark(&ctx, &backend, &backend, &mark_request("2024-06-14"));
        assert!(matches!(result, Err(AttendanceError::NotFound(_))));
    }

    #[test]
    fn group_not_meeting_today_rejects_even_valid_dates() {
        // 2024-06-14 is a Friday; the group only meets Mondays.
        let backend = FakeBackend::with_group(&[Weekday::Mon], "2020-01-01", "2030-12-31");
        let ctx = ctx_at("2024-06-14 10:00:00");
        let result = record_mark(&ctx, &backend, &backend, &mark_request("2024-06-10"));
        assert!(
            matches!(result, Err(AttendanceError::NotAGroupDay(d)) if d == day("2024-06-14"))
        );
    }

    #[test]
    fn yesterday_is_writable_before_noon_and_locked_after() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        let req = mark_request("2024-06-13");

        record_mark(&ctx_at("2024-06-14 11:59:00"), &backend, &backend, &req)
            .expect("before cutoff");

        let result = record_mark(&ctx_at("2024-06-14 12:01:00"), &backend, &backend, &req);
        assert!(
            matches!(result, Err(AttendanceError::CutoffExceeded(d)) if d == day("2024-06-13"))
        );
    }

    #[test]
    fn same_day_is_never_subject_to_cutoff() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        record_mark(
            &ctx_at("2024-06-14 23:59:00"),
            &backend,
            &backend,
            &mark_request("2024-06-14"),
        )
        .expect("today is writable until midnight");
    }

    #[test]
    fn backdating_older_than_yesterday_is_permitted() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        record_mark(
            &ctx_at("2024-06-14 15:00:00"),
            &backend,
            &backend,
            &mark_request("2024-06-01"),
        )
        .expect("older backdating is not cutoff-guarded");
    }

    #[test]
    fn second_write_for_same_key_overwrites_status_and_teacher() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        let ctx = ctx_at("2024-06-14 10:00:00");
        record_mark(&ctx, &backend, &backend, &mark_request("2024-06-14")).expect("first write");

        let mut correction = mark_request("2024-06-14");
        correction.status = MarkStatus::Absent;
        correction.teacher_id = "t2".to_string();
        record_mark(&ctx, &backend, &backend, &correction).expect("overwrite");

        let marks = backend.marks.borrow();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].status, MarkStatus::Absent);
        assert_eq!(marks[0].teacher_id, "t2");
    }

    #[test]
    fn expired_deadline_surfaces_distinctly() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        let ctx = RequestCtx::new(ts("2024-06-14 10:00:00"), Some(Duration::ZERO));
        let result = record_mark(&ctx, &backend, &backend, &mark_request("2024-06-14"));
        assert!(matches!(result, Err(AttendanceError::DeadlineExceeded(_))));

        let read = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-06-01", "2024-06-14",
        );
        assert!(matches!(read, Err(AttendanceError::DeadlineExceeded(_))));
    }

    #[test]
    fn inverted_read_window_is_invalid_argument() {
        let backend = FakeBackend::with_group(&all_weekdays(), "2020-01-01", "2030-12-31");
        let ctx = ctx_at("2024-06-14 10:00:00");
        let result = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-06-14", "2024-06-01",
        );
        assert!(matches!(result, Err(AttendanceError::InvalidArgument(_))));
    }

    #[test]
    fn marks_before_join_date_are_hidden_and_filtering_is_idempotent() {
        // Group meets Mon/Wed through January 2024; the student joined
        // Wednesday the 3rd. A stray ledger row from the 1st must stay
        // invisible.
        let backend = FakeBackend::with_group(
            &[Weekday::Mon, Weekday::Wed],
            "2024-01-01",
            "2024-01-31",
        )
        .profile("s1", "Quinn", "Ada")
        .member_since("s1", "2024-01-03 08:00:00");
        backend.push_mark("s1", "2024-01-01", MarkStatus::Present, "t1");
        backend.push_mark("s1", "2024-01-03", MarkStatus::Present, "t1");
        backend.push_mark("s1", "2024-01-08", MarkStatus::Absent, "t1");

        let ctx = ctx_at("2024-06-14 10:00:00");
        let sheet = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-01-01", "2024-01-10",
        )
        .expect("aggregate");

        let axis: Vec<NaiveDate> = sheet.days.iter().map(|slot| slot.date).collect();
        assert_eq!(
            axis,
            vec![
                day("2024-01-01"),
                day("2024-01-03"),
                day("2024-01-08"),
                day("2024-01-10"),
            ]
        );

        assert_eq!(sheet.students.len(), 1);
        let row = &sheet.students[0];
        let dates: Vec<NaiveDate> = row.marks.iter().map(|m| m.attend_date).collect();
        assert_eq!(dates, vec![day("2024-01-03"), day("2024-01-08")]);

        let again = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-01-01", "2024-01-10",
        )
        .expect("aggregate again");
        let dates_again: Vec<NaiveDate> =
            again.students[0].marks.iter().map(|m| m.attend_date).collect();
        assert_eq!(dates, dates_again);
    }

    #[test]
    fn marks_after_today_are_never_fabricated_into_the_sheet() {
        let backend =
            FakeBackend::with_group(&all_weekdays(), "2024-01-01", "2024-12-31")
                .profile("s1", "Quinn", "Ada")
                .member_since("s1", "2024-01-01 08:00:00");
        backend.push_mark("s1", "2024-06-13", MarkStatus::Present, "t1");
        backend.push_mark("s1", "2024-06-20", MarkStatus::Present, "t1");

        // "Today" sits mid-window; the later ledger row is out of bounds.
        let ctx = ctx_at("2024-06-14 10:00:00");
        let sheet = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-06-01", "2024-06-30",
        )
        .expect("aggregate");
        let dates: Vec<NaiveDate> =
            sheet.students[0].marks.iter().map(|m| m.attend_date).collect();
        assert_eq!(dates, vec![day("2024-06-13")]);
    }

    #[test]
    fn transfer_annotations_ride_the_axis_without_changing_it() {
        let mut backend = FakeBackend::with_group(
            &[Weekday::Mon, Weekday::Wed],
            "2024-01-01",
            "2024-01-31",
        );
        backend.transfers.push(LessonTransfer {
            original_date: day("2024-01-08"),
            real_date: day("2024-01-09"),
            created_at: ts("2024-01-02 10:00:00"),
        });

        let ctx = ctx_at("2024-06-14 10:00:00");
        let sheet = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-01-01", "2024-01-10",
        )
        .expect("aggregate");

        assert_eq!(sheet.days.len(), 4);
        let slot = sheet
            .days
            .iter()
            .find(|slot| slot.date == day("2024-01-08"))
            .expect("transferred slot present");
        assert_eq!(slot.transfer_date, Some(day("2024-01-09")));
    }

    #[test]
    fn students_without_history_stay_out_and_rows_sort_by_name() {
        let backend =
            FakeBackend::with_group(&all_weekdays(), "2024-01-01", "2024-12-31")
                .profile("s1", "Zimmer", "Rae")
                .profile("s2", "Abbot", "Lee")
                .profile("s3", "Nowhere", "Nobody")
                .member_since("s1", "2024-01-01 08:00:00")
                .member_since("s2", "2024-01-02 08:00:00");

        let ctx = ctx_at("2024-06-14 10:00:00");
        let sheet = read_attendance(
            &ctx, &backend, &backend, &backend, &backend, "g1", "2024-06-01", "2024-06-14",
        )
        .expect("aggregate");

        let ids: Vec<&str> = sheet
            .students
            .iter()
            .map(|row| row.profile.student_id.as_str())
            .collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }
}
