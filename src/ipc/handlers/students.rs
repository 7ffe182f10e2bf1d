use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::membership::Condition;
use crate::schedule;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn row_exists(
    conn: &Connection,
    req: &Request,
    sql: &str,
    id: &str,
) -> Result<bool, serde_json::Value> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let phone = optional_str(req, "phone");
    let birth_date = match optional_str(req, "birthDate") {
        Some(raw) => match schedule::parse_day(&raw) {
            Some(day) => Some(schedule::format_day(day)),
            None => return err(&req.id, "bad_params", "birthDate must be YYYY-MM-DD", None),
        },
        None => None,
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, last_name, first_name, phone, birth_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &last_name,
            &first_name,
            &phone,
            &birth_date,
            db::now_stamp(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, phone, birth_date
         FROM students
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "phone": r.get::<_, Option<String>>(3)?,
                "birthDate": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_membership_append(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let condition_raw = match required_str(req, "condition") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(condition) = Condition::parse(&condition_raw) else {
        return err(
            &req.id,
            "bad_params",
            "condition must be active or archived",
            None,
        );
    };

    // Explicit createdAt is for history backfill (imports); normal
    // appends stamp the server clock.
    let created_at = match optional_str(req, "createdAt") {
        Some(raw) => {
            let parsed = db::parse_timestamp(&raw)
                .or_else(|| schedule::parse_day(&raw).and_then(|d| d.and_hms_opt(0, 0, 0)));
            match parsed {
                Some(ts) => db::format_timestamp(ts),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "createdAt must be YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
                        None,
                    )
                }
            }
        }
        None => db::now_stamp(),
    };

    match row_exists(conn, req, "SELECT 1 FROM groups WHERE id = ?", &group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "group not found", None),
        Err(resp) => return resp,
    }
    match row_exists(conn, req, "SELECT 1 FROM students WHERE id = ?", &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(resp) => return resp,
    }

    let record_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO membership_history(id, group_id, student_id, condition, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &record_id,
            &group_id,
            &student_id,
            condition.as_str(),
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "membership_history" })),
        );
    }

    ok(
        &req.id,
        json!({
            "recordId": record_id,
            "condition": condition.as_str(),
            "createdAt": created_at,
        }),
    )
}

fn handle_membership_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_filter = optional_str(req, "studentId");

    let mut sql = String::from(
        "SELECT student_id, condition, created_at
         FROM membership_history
         WHERE group_id = ?",
    );
    if student_filter.is_some() {
        sql.push_str(" AND student_id = ?");
    }
    sql.push_str(" ORDER BY created_at");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "studentId": r.get::<_, String>(0)?,
            "condition": r.get::<_, String>(1)?,
            "createdAt": r.get::<_, String>(2)?,
        }))
    };
    let rows = match &student_filter {
        Some(student_id) => stmt
            .query_map((&group_id, student_id), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([&group_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "membership.append" => Some(handle_membership_append(state, req)),
        "membership.history" => Some(handle_membership_history(state, req)),
        _ => None,
    }
}
