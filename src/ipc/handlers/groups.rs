use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
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

fn required_day(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = required_str(req, key)?;
    match schedule::parse_day(&raw) {
        Some(day) => Ok(schedule::format_day(day)),
        None => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            None,
        )),
    }
}

fn group_exists(conn: &Connection, req: &Request, group_id: &str) -> Result<bool, serde_json::Value> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Accepts either a JSON array of weekday tokens or a comma-separated
/// string; every token must resolve in the weekday table.
fn parse_weekdays_param(req: &Request) -> Result<String, serde_json::Value> {
    let tokens: Vec<String> = match req.params.get("weekdays") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(serde_json::Value::String(raw)) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if tokens.is_empty() {
        return Err(err(&req.id, "bad_params", "missing weekdays", None));
    }
    for token in &tokens {
        if let Err(e) = schedule::parse_weekday_token(token) {
            return Err(err(&req.id, "bad_params", e.to_string(), None));
        }
    }
    Ok(tokens.join(",").to_ascii_lowercase())
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weekdays = match parse_weekdays_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let start_date = match required_day(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_date = match required_day(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if end_date < start_date {
        return err(&req.id, "bad_params", "endDate is before startDate", None);
    }
    let lesson_start_time = match required_str(req, "lessonStartTime") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if chrono::NaiveTime::parse_from_str(&lesson_start_time, "%H:%M").is_err() {
        return err(&req.id, "bad_params", "lessonStartTime must be HH:MM", None);
    }

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, name, weekdays, start_date, end_date, lesson_start_time, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &group_id,
            &name,
            &weekdays,
            &start_date,
            &end_date,
            &lesson_start_time,
            db::now_stamp(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    ok(&req.id, json!({ "groupId": group_id, "name": name }))
}

fn group_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let name: String = r.get(1)?;
    let weekdays: String = r.get(2)?;
    let start_date: String = r.get(3)?;
    let end_date: String = r.get(4)?;
    let lesson_start_time: String = r.get(5)?;
    Ok(json!({
        "id": id,
        "name": name,
        "weekdays": weekdays.split(',').collect::<Vec<_>>(),
        "startDate": start_date,
        "endDate": end_date,
        "lessonStartTime": lesson_start_time,
    }))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };

    // Member count via a correlated subquery so joined history rows
    // cannot double-count.
    let mut stmt = match conn.prepare(
        "SELECT
           g.id, g.name, g.weekdays, g.start_date, g.end_date, g.lesson_start_time,
           (SELECT COUNT(DISTINCT m.student_id)
            FROM membership_history m WHERE m.group_id = g.id) AS member_count
         FROM groups g
         ORDER BY g.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            let mut v = group_row_json(r)?;
            v["memberCount"] = json!(r.get::<_, i64>(6)?);
            Ok(v)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row = conn
        .query_row(
            "SELECT id, name, weekdays, start_date, end_date, lesson_start_time
             FROM groups WHERE id = ?",
            [&group_id],
            |r| group_row_json(r),
        )
        .optional();
    match row {
        Ok(Some(group)) => ok(&req.id, json!({ "group": group })),
        Ok(None) => err(&req.id, "not_found", "group not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM attendance WHERE group_id = ?",
        "DELETE FROM membership_history WHERE group_id = ?",
        "DELETE FROM lesson_transfers WHERE group_id = ?",
        "DELETE FROM groups WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&group_id]) {
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_transfers_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let original_date = match required_day(req, "originalDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let real_date = match required_day(req, "realDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match group_exists(conn, req, &group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "group not found", None),
        Err(resp) => return resp,
    }

    // One transfer per original date: duplicates are rejected here, not
    // resolved later at read time.
    let existing = conn
        .query_row(
            "SELECT real_date FROM lesson_transfers WHERE group_id = ? AND original_date = ?",
            (&group_id, &original_date),
            |r| r.get::<_, String>(0),
        )
        .optional();
    match existing {
        Ok(Some(current)) => {
            return err(
                &req.id,
                "transfer_exists",
                format!(
                    "lesson on {} is already transferred to {}; delete it first",
                    original_date, current
                ),
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO lesson_transfers(group_id, original_date, real_date, created_at)
         VALUES(?, ?, ?, ?)",
        (&group_id, &original_date, &real_date, db::now_stamp()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lesson_transfers" })),
        );
    }

    ok(
        &req.id,
        json!({ "groupId": group_id, "originalDate": original_date, "realDate": real_date }),
    )
}

fn handle_transfers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let original_date = match required_day(req, "originalDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute(
        "DELETE FROM lesson_transfers WHERE group_id = ? AND original_date = ?",
        (&group_id, &original_date),
    ) {
        Ok(0) => err(&req.id, "not_found", "transfer not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_transfers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT original_date, real_date, created_at
         FROM lesson_transfers
         WHERE group_id = ?
         ORDER BY original_date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "originalDate": r.get::<_, String>(0)?,
                "realDate": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(transfers) => ok(&req.id, json!({ "transfers": transfers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.get" => Some(handle_groups_get(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        "transfers.set" => Some(handle_transfers_set(state, req)),
        "transfers.delete" => Some(handle_transfers_delete(state, req)),
        "transfers.list" => Some(handle_transfers_list(state, req)),
        _ => None,
    }
}
