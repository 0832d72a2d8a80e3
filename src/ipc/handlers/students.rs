use crate::db::count_rows;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    exists, get_positive_i64, get_str, opt_bool, opt_i64, opt_str, require_department,
    require_login, respond, write_err, Patch,
};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn require_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    if !exists(conn, "SELECT 1 FROM students WHERE student_id = ?", student_id)? {
        return Err(HandlerErr::not_found("student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    Ok(())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let department = opt_str(&req.params, "department")?;

    let mut stmt = conn.prepare(
        "SELECT student_id, name, department, batch, current_semester, section,
                email, phone, address, blood_group, admission_date, status
         FROM students
         WHERE ?1 IS NULL OR department = ?1
         ORDER BY student_id",
    )?;
    let students = stmt
        .query_map([&department], |row| {
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "department": row.get::<_, String>(2)?,
                "batch": row.get::<_, i64>(3)?,
                "currentSemester": row.get::<_, i64>(4)?,
                "section": row.get::<_, Option<String>>(5)?,
                "email": row.get::<_, Option<String>>(6)?,
                "phone": row.get::<_, Option<String>>(7)?,
                "address": row.get::<_, Option<String>>(8)?,
                "bloodGroup": row.get::<_, Option<String>>(9)?,
                "admissionDate": row.get::<_, Option<String>>(10)?,
                "status": row.get::<_, String>(11)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let p = &req.params;
    let student_id = get_str(p, "studentId")?;
    let name = get_str(p, "name")?;
    let department = get_str(p, "department")?;
    let batch = get_positive_i64(p, "batch")?;
    let current_semester = match opt_i64(p, "currentSemester")? {
        None => 1,
        Some(n) if n > 0 => n,
        Some(_) => return Err(HandlerErr::bad_params("currentSemester must be > 0")),
    };
    let section = opt_str(p, "section")?;
    let email = opt_str(p, "email")?;
    let phone = opt_str(p, "phone")?;
    let address = opt_str(p, "address")?;
    let blood_group = opt_str(p, "bloodGroup")?;
    let admission_date = opt_str(p, "admissionDate")?
        .unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string());
    let status = opt_str(p, "status")?.unwrap_or_else(|| "Active".to_string());
    require_department(conn, &department)?;

    conn.execute(
        "INSERT INTO students(student_id, name, department, batch, current_semester, section,
                              email, phone, address, blood_group, admission_date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student_id,
            name,
            department,
            batch,
            current_semester,
            section,
            email,
            phone,
            address,
            blood_group,
            admission_date,
            status,
        ],
    )
    .map_err(|e| write_err(e, "student id").with_details(json!({ "studentId": student_id })))?;
    info!(%student_id, %department, "student created");

    Ok(json!({
        "studentId": student_id,
        "admissionDate": admission_date,
        "status": status,
    }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let student_id = get_str(&req.params, "studentId")?;
    let mut patch = Patch::from_params(&req.params)?;
    patch.text("name", "name")?;
    patch.text("department", "department")?;
    patch.positive_int("batch", "batch")?;
    patch.positive_int("currentSemester", "current_semester")?;
    patch.nullable_text("section", "section")?;
    patch.nullable_text("email", "email")?;
    patch.nullable_text("phone", "phone")?;
    patch.nullable_text("address", "address")?;
    patch.nullable_text("bloodGroup", "blood_group")?;
    patch.nullable_text("admissionDate", "admission_date")?;
    patch.text("status", "status")?;

    require_student(conn, &student_id)?;
    if let Some(dept) = patch.get("department").and_then(|v| v.as_str()) {
        require_department(conn, dept.trim())?;
    }
    patch.apply(conn, "students", "student_id", SqlValue::Text(student_id.clone()))?;
    Ok(json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let student_id = get_str(&req.params, "studentId")?;
    let cascade = opt_bool(&req.params, "cascadeGrades")?.unwrap_or(false);
    require_student(conn, &student_id)?;

    let theory = count_rows(
        conn,
        "SELECT COUNT(*) FROM theory_grades WHERE student_id = ?",
        &student_id,
    )?;
    let practical = count_rows(
        conn,
        "SELECT COUNT(*) FROM practical_grades WHERE student_id = ?",
        &student_id,
    )?;
    if theory + practical > 0 && !cascade {
        return Err(HandlerErr::has_dependents(
            "student has grade records; pass cascadeGrades to delete them too",
        )
        .with_details(json!({
            "studentId": student_id,
            "theoryGrades": theory,
            "practicalGrades": practical,
        })));
    }

    let tx = conn.unchecked_transaction()?;
    // No ON DELETE CASCADE; remove grades first.
    tx.execute("DELETE FROM theory_grades WHERE student_id = ?", [&student_id])?;
    tx.execute("DELETE FROM practical_grades WHERE student_id = ?", [&student_id])?;
    tx.execute("DELETE FROM students WHERE student_id = ?", [&student_id])?;
    tx.commit()?;
    info!(%student_id, theory, practical, "student deleted");

    Ok(json!({
        "studentId": student_id,
        "deleted": true,
        "gradesDeleted": theory + practical,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
