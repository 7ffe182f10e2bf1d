use crate::attendance::{
    read_attendance, record_mark, AttendanceError, AttendanceSheet, MarkRequest, MarkStatus,
    RequestCtx,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use crate::store::SqliteStore;
use serde_json::json;
use std::time::Duration;

/// Per-request budget for storage and collaborator calls.
const REQUEST_BUDGET: Duration = Duration::from_secs(5);

fn request_ctx() -> RequestCtx {
    RequestCtx::new(chrono::Local::now().naive_local(), Some(REQUEST_BUDGET))
}

fn str_param(req: &Request, key: &str) -> String {
    // Missing and empty are equivalent here: the engine owns required-
    // field rejection so its check order stays authoritative.
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn engine_err(req: &Request, error: AttendanceError) -> serde_json::Value {
    let (code, details) = match &error {
        AttendanceError::InvalidArgument(_) => ("bad_params", None),
        AttendanceError::FutureDateRejected(date) => (
            "future_date_rejected",
            Some(json!({ "attendDate": schedule::format_day(*date) })),
        ),
        AttendanceError::NotAGroupDay(date) => (
            "not_a_group_day",
            Some(json!({ "serverDay": schedule::format_day(*date) })),
        ),
        AttendanceError::CutoffExceeded(date) => (
            "cutoff_exceeded",
            Some(json!({ "attendDate": schedule::format_day(*date) })),
        ),
        AttendanceError::NotFound(_) => ("not_found", None),
        AttendanceError::DeadlineExceeded(_) => ("deadline_exceeded", None),
        AttendanceError::Internal(_) => ("internal_error", None),
    };
    if matches!(error, AttendanceError::Internal(_)) {
        log::error!("{}: {}", req.method, error);
        // Opaque to the caller; the detail stays in the server log.
        return err(&req.id, code, "internal error", None);
    }
    err(&req.id, code, error.to_string(), details)
}

fn sheet_json(sheet: &AttendanceSheet) -> serde_json::Value {
    let days: Vec<serde_json::Value> = sheet
        .days
        .iter()
        .map(|slot| {
            json!({
                "date": schedule::format_day(slot.date),
                "transferDate": slot.transfer_date.map(schedule::format_day),
            })
        })
        .collect();

    let students: Vec<serde_json::Value> = sheet
        .students
        .iter()
        .map(|row| {
            let marks: Vec<serde_json::Value> = row
                .marks
                .iter()
                .map(|mark| {
                    json!({
                        "date": schedule::format_day(mark.attend_date),
                        "status": mark.status.code(),
                        "teacherId": mark.teacher_id,
                    })
                })
                .collect();
            json!({
                "studentId": row.profile.student_id,
                "displayName": format!("{}, {}", row.profile.last_name, row.profile.first_name),
                "lastName": row.profile.last_name,
                "firstName": row.profile.first_name,
                "phone": row.profile.phone,
                "birthDate": row.profile.birth_date.map(schedule::format_day),
                "condition": row.standing.condition.as_str(),
                "addedAt": db::format_timestamp(row.standing.added_at),
                "activatedAt": row.standing.activated_at.map(db::format_timestamp),
                "attendance": marks,
            })
        })
        .collect();

    json!({ "days": days, "students": students })
}

fn handle_attendance_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let store = SqliteStore::new(conn);
    let ctx = request_ctx();

    let group_id = str_param(req, "groupId");
    let from = str_param(req, "from");
    let till = str_param(req, "till");

    match read_attendance(&ctx, &store, &store, &store, &store, &group_id, &from, &till) {
        Ok(sheet) => ok(&req.id, sheet_json(&sheet)),
        Err(error) => engine_err(req, error),
    }
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let status = match req.params.get("status").and_then(|v| v.as_i64()) {
        Some(code) => match MarkStatus::from_code(code) {
            Some(status) => status,
            None => return err(&req.id, "bad_params", "status must be 0 or 1", None),
        },
        None => return err(&req.id, "bad_params", "missing status", None),
    };

    let mark = MarkRequest {
        group_id: str_param(req, "groupId"),
        student_id: str_param(req, "studentId"),
        teacher_id: str_param(req, "teacherId"),
        attend_date: str_param(req, "attendDate"),
        status,
    };

    let store = SqliteStore::new(conn);
    let ctx = request_ctx();
    match record_mark(&ctx, &store, &store, &mark) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(error) => engine_err(req, error),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.read" => Some(handle_attendance_read(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        _ => None,
    }
}
