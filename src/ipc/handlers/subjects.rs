use crate::calc::{SubjectKind, CREDIT_RANGE};
use crate::db::count_rows;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    exists, get_i64_in, get_positive_i64, get_str, opt_i64, opt_str, require_department,
    require_login, respond, write_err, Patch,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use tracing::info;

const SUBJECT_COLUMNS: &str = "subject_code, subject_name, credits, semester, department,
     subject_type, max_marks, min_pass_marks, teaching_hours";

fn subject_json(row: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "subjectCode": row.get::<_, String>(0)?,
        "subjectName": row.get::<_, String>(1)?,
        "credits": row.get::<_, i64>(2)?,
        "semester": row.get::<_, i64>(3)?,
        "department": row.get::<_, String>(4)?,
        "subjectType": row.get::<_, String>(5)?,
        "maxMarks": row.get::<_, i64>(6)?,
        "minPassMarks": row.get::<_, i64>(7)?,
        "teachingHours": row.get::<_, Option<i64>>(8)?,
    }))
}

fn parse_kind(raw: &str) -> Result<SubjectKind, HandlerErr> {
    SubjectKind::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("subjectType must be Theory or Practical")
            .with_details(json!({ "subjectType": raw }))
    })
}

fn grade_counts(conn: &Connection, subject_code: &str) -> Result<(i64, i64), HandlerErr> {
    let theory = count_rows(
        conn,
        "SELECT COUNT(*) FROM theory_grades WHERE subject_code = ?",
        subject_code,
    )?;
    let practical = count_rows(
        conn,
        "SELECT COUNT(*) FROM practical_grades WHERE subject_code = ?",
        subject_code,
    )?;
    Ok((theory, practical))
}

fn not_found(subject_code: &str) -> HandlerErr {
    HandlerErr::not_found("subject not found").with_details(json!({ "subjectCode": subject_code }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let department = opt_str(&req.params, "department")?;
    let semester = opt_i64(&req.params, "semester")?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBJECT_COLUMNS}
         FROM subjects
         WHERE (?1 IS NULL OR department = ?1)
           AND (?2 IS NULL OR semester = ?2)
         ORDER BY department, semester, subject_code"
    ))?;
    let subjects = stmt
        .query_map((&department, semester), subject_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn handle_subjects_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let subject_code = get_str(&req.params, "subjectCode")?;
    let subject = conn
        .query_row(
            &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE subject_code = ?"),
            [&subject_code],
            subject_json,
        )
        .optional()?
        .ok_or_else(|| not_found(&subject_code))?;
    Ok(json!({ "subject": subject }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let subject_code = get_str(&req.params, "subjectCode")?;
    let subject_name = get_str(&req.params, "subjectName")?;
    let credits = get_i64_in(&req.params, "credits", CREDIT_RANGE)?;
    let semester = get_positive_i64(&req.params, "semester")?;
    let department = get_str(&req.params, "department")?;
    let kind = parse_kind(&get_str(&req.params, "subjectType")?)?;
    let max_marks = opt_i64(&req.params, "maxMarks")?.unwrap_or(100);
    let min_pass_marks = opt_i64(&req.params, "minPassMarks")?.unwrap_or(40);
    let teaching_hours = opt_i64(&req.params, "teachingHours")?;
    require_department(conn, &department)?;

    conn.execute(
        "INSERT INTO subjects(subject_code, subject_name, credits, semester, department,
                              subject_type, max_marks, min_pass_marks, teaching_hours)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &subject_code,
            &subject_name,
            credits,
            semester,
            &department,
            kind.as_str(),
            max_marks,
            min_pass_marks,
            teaching_hours,
        ),
    )
    .map_err(|e| write_err(e, "subject code").with_details(json!({ "subjectCode": subject_code })))?;
    info!(%subject_code, kind = kind.as_str(), "subject created");

    Ok(json!({ "subjectCode": subject_code, "subjectType": kind }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let subject_code = get_str(&req.params, "subjectCode")?;
    let mut patch = Patch::from_params(&req.params)?;
    patch.text("subjectName", "subject_name")?;
    patch.int_in("credits", "credits", CREDIT_RANGE)?;
    patch.positive_int("semester", "semester")?;
    patch.text("department", "department")?;
    patch.positive_int("maxMarks", "max_marks")?;
    patch.positive_int("minPassMarks", "min_pass_marks")?;
    patch.nullable_int("teachingHours", "teaching_hours")?;

    let current: String = conn
        .query_row(
            "SELECT subject_type FROM subjects WHERE subject_code = ?",
            [&subject_code],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| not_found(&subject_code))?;

    if let Some(raw) = patch.get("subjectType") {
        let raw = raw
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("patch.subjectType must be a string"))?;
        let kind = parse_kind(raw.trim())?;
        if kind.as_str() != current {
            // Existing grade rows were computed with the other calculator.
            let (theory, practical) = grade_counts(conn, &subject_code)?;
            if theory + practical > 0 {
                return Err(HandlerErr::has_dependents(
                    "cannot change the type of a subject that has grades",
                )
                .with_details(json!({
                    "subjectCode": subject_code,
                    "theoryGrades": theory,
                    "practicalGrades": practical,
                })));
            }
        }
        patch.set("subject_type", SqlValue::Text(kind.as_str().to_string()));
    }
    if let Some(dept) = patch.get("department").and_then(|v| v.as_str()) {
        require_department(conn, dept.trim())?;
    }

    patch.apply(conn, "subjects", "subject_code", SqlValue::Text(subject_code.clone()))?;
    Ok(json!({ "subjectCode": subject_code }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let subject_code = get_str(&req.params, "subjectCode")?;
    if !exists(conn, "SELECT 1 FROM subjects WHERE subject_code = ?", &subject_code)? {
        return Err(not_found(&subject_code));
    }

    let (theory, practical) = grade_counts(conn, &subject_code)?;
    if theory + practical > 0 {
        return Err(HandlerErr::has_dependents("subject still has grade records").with_details(
            json!({
                "subjectCode": subject_code,
                "theoryGrades": theory,
                "practicalGrades": practical,
            }),
        ));
    }

    conn.execute("DELETE FROM subjects WHERE subject_code = ?", [&subject_code])?;
    info!(%subject_code, "subject deleted");
    Ok(json!({ "subjectCode": subject_code, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.get" => handle_subjects_get(state, req),
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.update" => handle_subjects_update(state, req),
        "subjects.delete" => handle_subjects_delete(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
