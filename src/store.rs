//! SQLite adapter behind the attendance capability interfaces. All SQL
//! for the engine's reads and the ledger write lives here; handlers and
//! the engine never touch the connection directly.

use crate::attendance::{
    AttendanceError, AttendanceMark, AttendanceResult, GroupSchedule, GroupSource, MarkStatus,
    MarkStore, MembershipSource, NewMark, StudentProfile, StudentSource,
};
use crate::db;
use crate::membership::{Condition, MembershipRecord};
use crate::schedule::{self, LessonTransfer};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

pub struct SqliteStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

fn storage_error(op: &str, keys: String, err: impl std::fmt::Display) -> AttendanceError {
    AttendanceError::Internal(format!("{} ({}): {}", op, keys, err))
}

fn bad_row(table: &str, keys: String, what: &str) -> AttendanceError {
    AttendanceError::Internal(format!("{} row ({}) has invalid {}", table, keys, what))
}

impl GroupSource for SqliteStore<'_> {
    fn group_schedule(&self, group_id: &str) -> AttendanceResult<Option<GroupSchedule>> {
        let row: Option<(String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT weekdays, start_date, end_date, lesson_start_time
                 FROM groups WHERE id = ?",
                [group_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()
            .map_err(|e| storage_error("group lookup", format!("group_id={}", group_id), e))?;

        let Some((weekdays_raw, start_raw, end_raw, lesson_start_time)) = row else {
            return Ok(None);
        };

        let weekdays = schedule::parse_weekday_list(&weekdays_raw)?;
        let start_date = schedule::parse_day(&start_raw)
            .ok_or_else(|| bad_row("groups", format!("group_id={}", group_id), "start_date"))?;
        let end_date = schedule::parse_day(&end_raw)
            .ok_or_else(|| bad_row("groups", format!("group_id={}", group_id), "end_date"))?;

        Ok(Some(GroupSchedule {
            weekdays,
            start_date,
            end_date,
            lesson_start_time,
        }))
    }

    fn transfers(
        &self,
        group_id: &str,
        from: NaiveDate,
        till: NaiveDate,
    ) -> AttendanceResult<Vec<LessonTransfer>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT original_date, real_date, created_at
                 FROM lesson_transfers
                 WHERE group_id = ? AND original_date BETWEEN ? AND ?
                 ORDER BY original_date",
            )
            .map_err(|e| storage_error("transfer query", format!("group_id={}", group_id), e))?;
        let rows = stmt
            .query_map(
                (group_id, schedule::format_day(from), schedule::format_day(till)),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| storage_error("transfer query", format!("group_id={}", group_id), e))?;

        let mut transfers = Vec::with_capacity(rows.len());
        for (original_raw, real_raw, created_raw) in rows {
            let keys = format!("group_id={} original_date={}", group_id, original_raw);
            transfers.push(LessonTransfer {
                original_date: schedule::parse_day(&original_raw)
                    .ok_or_else(|| bad_row("lesson_transfers", keys.clone(), "original_date"))?,
                real_date: schedule::parse_day(&real_raw)
                    .ok_or_else(|| bad_row("lesson_transfers", keys.clone(), "real_date"))?,
                created_at: db::parse_timestamp(&created_raw)
                    .ok_or_else(|| bad_row("lesson_transfers", keys, "created_at"))?,
            });
        }
        Ok(transfers)
    }
}

impl MembershipSource for SqliteStore<'_> {
    fn history(&self, group_id: &str) -> AttendanceResult<Vec<MembershipRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, condition, created_at
                 FROM membership_history
                 WHERE group_id = ?
                 ORDER BY created_at",
            )
            .map_err(|e| storage_error("membership query", format!("group_id={}", group_id), e))?;
        let rows = stmt
            .query_map([group_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| storage_error("membership query", format!("group_id={}", group_id), e))?;

        let mut records = Vec::with_capacity(rows.len());
        for (student_id, condition_raw, created_raw) in rows {
            let keys = format!("group_id={} student_id={}", group_id, student_id);
            records.push(MembershipRecord {
                condition: Condition::parse(&condition_raw)
                    .ok_or_else(|| bad_row("membership_history", keys.clone(), "condition"))?,
                created_at: db::parse_timestamp(&created_raw)
                    .ok_or_else(|| bad_row("membership_history", keys, "created_at"))?,
                student_id,
            });
        }
        Ok(records)
    }
}

impl StudentSource for SqliteStore<'_> {
    fn profiles(&self, student_ids: &[String]) -> AttendanceResult<Vec<StudentProfile>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; student_ids.len()].join(",");
        let sql = format!(
            "SELECT id, last_name, first_name, phone, birth_date
             FROM students
             WHERE id IN ({})
             ORDER BY last_name, first_name",
            placeholders
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| storage_error("student directory", format!("ids={}", student_ids.len()), e))?;
        stmt.query_map(params_from_iter(student_ids.iter()), |r| {
            let birth_raw: Option<String> = r.get(4)?;
            Ok(StudentProfile {
                student_id: r.get(0)?,
                last_name: r.get(1)?,
                first_name: r.get(2)?,
                phone: r.get(3)?,
                birth_date: birth_raw.as_deref().and_then(schedule::parse_day),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| storage_error("student directory", format!("ids={}", student_ids.len()), e))
    }
}

impl MarkStore for SqliteStore<'_> {
    fn upsert(&self, mark: &NewMark) -> AttendanceResult<()> {
        // created_at keeps its first value; a correction only replaces
        // status and teacher.
        self.conn
            .execute(
                "INSERT INTO attendance(group_id, student_id, attend_date, status, teacher_id, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(group_id, student_id, attend_date) DO UPDATE SET
                   status = excluded.status,
                   teacher_id = excluded.teacher_id",
                (
                    &mark.group_id,
                    &mark.student_id,
                    schedule::format_day(mark.attend_date),
                    mark.status.code(),
                    &mark.teacher_id,
                    db::format_timestamp(mark.recorded_at),
                ),
            )
            .map_err(|e| {
                storage_error(
                    "attendance upsert",
                    format!(
                        "group_id={} student_id={} attend_date={}",
                        mark.group_id, mark.student_id, mark.attend_date
                    ),
                    e,
                )
            })?;
        Ok(())
    }

    fn query(
        &self,
        group_id: &str,
        from: NaiveDate,
        till: NaiveDate,
    ) -> AttendanceResult<Vec<AttendanceMark>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, attend_date, status, teacher_id
                 FROM attendance
                 WHERE group_id = ? AND attend_date BETWEEN ? AND ?
                 ORDER BY attend_date, student_id",
            )
            .map_err(|e| storage_error("attendance query", format!("group_id={}", group_id), e))?;
        let rows = stmt
            .query_map(
                (group_id, schedule::format_day(from), schedule::format_day(till)),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| storage_error("attendance query", format!("group_id={}", group_id), e))?;

        let mut marks = Vec::with_capacity(rows.len());
        for (student_id, date_raw, status_code, teacher_id) in rows {
            let keys = format!(
                "group_id={} student_id={} attend_date={}",
                group_id, student_id, date_raw
            );
            marks.push(AttendanceMark {
                attend_date: schedule::parse_day(&date_raw)
                    .ok_or_else(|| bad_row("attendance", keys.clone(), "attend_date"))?,
                status: MarkStatus::from_code(status_code)
                    .ok_or_else(|| bad_row("attendance", keys, "status"))?,
                student_id,
                teacher_id,
            });
        }
        Ok(marks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn day(raw: &str) -> NaiveDate {
        schedule::parse_day(raw).expect("test date")
    }

    fn ts(raw: &str) -> NaiveDateTime {
        db::parse_timestamp(raw).expect("test timestamp")
    }

    fn seed_group(conn: &Connection, id: &str, weekdays: &str) {
        conn.execute(
            "INSERT INTO groups(id, name, weekdays, start_date, end_date, lesson_start_time, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                id,
                "Algebra A",
                weekdays,
                "2024-01-01",
                "2024-12-31",
                "10:00",
                "2024-01-01 00:00:00",
            ),
        )
        .expect("seed group");
    }

    #[test]
    fn group_schedule_parses_stored_row() {
        let workspace = temp_workspace("rollbook-store-group");
        let conn = db::open_db(&workspace).expect("open db");
        seed_group(&conn, "g1", "mon, wed");

        let store = SqliteStore::new(&conn);
        let schedule = store
            .group_schedule("g1")
            .expect("lookup")
            .expect("group exists");
        assert_eq!(schedule.weekdays, vec![chrono::Weekday::Mon, chrono::Weekday::Wed]);
        assert_eq!(schedule.start_date, day("2024-01-01"));
        assert_eq!(schedule.lesson_start_time, "10:00");

        assert!(store.group_schedule("missing").expect("lookup").is_none());

        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn group_schedule_signals_damaged_weekdays() {
        let workspace = temp_workspace("rollbook-store-badweekday");
        let conn = db::open_db(&workspace).expect("open db");
        seed_group(&conn, "g1", "mon, funday");

        let store = SqliteStore::new(&conn);
        let result = store.group_schedule("g1");
        assert!(matches!(result, Err(AttendanceError::Internal(_))));

        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn upsert_keeps_one_row_per_key_with_latest_status() {
        let workspace = temp_workspace("rollbook-store-upsert");
        let conn = db::open_db(&workspace).expect("open db");
        seed_group(&conn, "g1", "mon");
        conn.execute(
            "INSERT INTO students(id, last_name, first_name, created_at)
             VALUES('s1', 'Quinn', 'Ada', '2024-01-01 00:00:00')",
            [],
        )
        .expect("seed student");

        let store = SqliteStore::new(&conn);
        let mut mark = NewMark {
            group_id: "g1".to_string(),
            student_id: "s1".to_string(),
            teacher_id: "t1".to_string(),
            attend_date: day("2024-06-10"),
            status: MarkStatus::Present,
            recorded_at: ts("2024-06-10 10:00:00"),
        };
        store.upsert(&mark).expect("first write");

        mark.status = MarkStatus::Absent;
        mark.teacher_id = "t2".to_string();
        mark.recorded_at = ts("2024-06-10 11:00:00");
        store.upsert(&mark).expect("overwrite");

        let marks = store
            .query("g1", day("2024-06-01"), day("2024-06-30"))
            .expect("query");
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].status, MarkStatus::Absent);
        assert_eq!(marks[0].teacher_id, "t2");

        // The original created_at survives the correction.
        let created: String = conn
            .query_row(
                "SELECT created_at FROM attendance
                 WHERE group_id = 'g1' AND student_id = 's1' AND attend_date = '2024-06-10'",
                [],
                |r| r.get(0),
            )
            .expect("created_at");
        assert_eq!(created, "2024-06-10 10:00:00");

        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn query_is_bounded_by_window() {
        let workspace = temp_workspace("rollbook-store-window");
        let conn = db::open_db(&workspace).expect("open db");
        seed_group(&conn, "g1", "mon");
        conn.execute(
            "INSERT INTO students(id, last_name, first_name, created_at)
             VALUES('s1', 'Quinn', 'Ada', '2024-01-01 00:00:00')",
            [],
        )
        .expect("seed student");

        let store = SqliteStore::new(&conn);
        for date in ["2024-06-03", "2024-06-10", "2024-06-17"] {
            store
                .upsert(&NewMark {
                    group_id: "g1".to_string(),
                    student_id: "s1".to_string(),
                    teacher_id: "t1".to_string(),
                    attend_date: day(date),
                    status: MarkStatus::Present,
                    recorded_at: ts("2024-06-17 10:00:00"),
                })
                .expect("seed mark");
        }

        let marks = store
            .query("g1", day("2024-06-04"), day("2024-06-16"))
            .expect("query");
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].attend_date, day("2024-06-10"));

        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn profiles_resolve_only_requested_ids() {
        let workspace = temp_workspace("rollbook-store-profiles");
        let conn = db::open_db(&workspace).expect("open db");
        for (id, last, first) in [("s1", "Quinn", "Ada"), ("s2", "Abbot", "Lee")] {
            conn.execute(
                "INSERT INTO students(id, last_name, first_name, phone, birth_date, created_at)
                 VALUES(?, ?, ?, '555-0101', '2010-09-01', '2024-01-01 00:00:00')",
                (id, last, first),
            )
            .expect("seed student");
        }

        let store = SqliteStore::new(&conn);
        let profiles = store
            .profiles(&["s1".to_string()])
            .expect("profiles");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].last_name, "Quinn");
        assert_eq!(profiles[0].phone.as_deref(), Some("555-0101"));
        assert_eq!(profiles[0].birth_date, Some(day("2010-09-01")));

        assert!(store.profiles(&[]).expect("empty").is_empty());

        let _ = std::fs::remove_dir_all(workspace);
    }
}
