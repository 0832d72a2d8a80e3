use crate::calc::CalcContext;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_positive_i64, get_str, require_login, respond};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn student_not_found(student_id: &str) -> HandlerErr {
    HandlerErr::not_found("student not found").with_details(json!({ "studentId": student_id }))
}

fn handle_reports_sgpa(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let student_id = get_str(&req.params, "studentId")?;
    let semester = get_positive_i64(&req.params, "semester")?;

    let ctx = CalcContext::new(conn, &student_id);
    let student = ctx
        .student_info()?
        .ok_or_else(|| student_not_found(&student_id))?;
    let summary = ctx.semester_summary(semester)?;
    Ok(json!({
        "student": student,
        "semester": summary.semester,
        "sgpa": summary.sgpa,
        "passedCredits": summary.passed_credits,
        "rows": summary.rows,
    }))
}

fn handle_reports_transcript(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let student_id = get_str(&req.params, "studentId")?;
    let transcript = CalcContext::new(conn, &student_id)
        .transcript()?
        .ok_or_else(|| student_not_found(&student_id))?;
    Ok(json!({
        "student": transcript.student,
        "semesters": transcript.semesters,
        "cgpa": transcript.cumulative.gpa,
        "totalPassedCredits": transcript.cumulative.passed_credits,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "reports.sgpa" => handle_reports_sgpa(state, req),
        "reports.transcript" => handle_reports_transcript(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
