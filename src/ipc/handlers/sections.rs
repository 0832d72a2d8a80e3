use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_i64, get_positive_i64, get_str, opt_str, require_department, require_login, respond,
    write_err, Patch,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;

/// A student sits in a section when name, department, batch and current semester all match.
struct SectionKey {
    name: String,
    department: String,
    semester: i64,
    batch: i64,
}

fn load_section(conn: &Connection, section_id: i64) -> Result<SectionKey, HandlerErr> {
    conn.query_row(
        "SELECT section_name, department, semester, batch FROM sections WHERE section_id = ?",
        [section_id],
        |r| {
            Ok(SectionKey {
                name: r.get(0)?,
                department: r.get(1)?,
                semester: r.get(2)?,
                batch: r.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| {
        HandlerErr::not_found("section not found").with_details(json!({ "sectionId": section_id }))
    })
}

fn handle_sections_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let department = opt_str(&req.params, "department")?;

    let mut stmt = conn.prepare(
        "SELECT
           sc.section_id,
           sc.section_name,
           sc.department,
           sc.semester,
           sc.batch,
           sc.class_teacher,
           sc.room_number,
           (SELECT COUNT(*) FROM students s
             WHERE s.section = sc.section_name
               AND s.department = sc.department
               AND s.batch = sc.batch
               AND s.current_semester = sc.semester) AS student_count
         FROM sections sc
         WHERE ?1 IS NULL OR sc.department = ?1
         ORDER BY sc.department, sc.semester, sc.section_name",
    )?;
    let sections = stmt
        .query_map([&department], |row| {
            Ok(json!({
                "sectionId": row.get::<_, i64>(0)?,
                "sectionName": row.get::<_, String>(1)?,
                "department": row.get::<_, String>(2)?,
                "semester": row.get::<_, i64>(3)?,
                "batch": row.get::<_, i64>(4)?,
                "classTeacher": row.get::<_, Option<String>>(5)?,
                "roomNumber": row.get::<_, Option<String>>(6)?,
                "studentCount": row.get::<_, i64>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sections": sections }))
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let section_name = get_str(&req.params, "sectionName")?;
    let department = get_str(&req.params, "department")?;
    let semester = get_positive_i64(&req.params, "semester")?;
    let batch = get_positive_i64(&req.params, "batch")?;
    let class_teacher = opt_str(&req.params, "classTeacher")?;
    let room_number = opt_str(&req.params, "roomNumber")?;
    require_department(conn, &department)?;

    conn.execute(
        "INSERT INTO sections(section_name, department, semester, batch, class_teacher, room_number)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &section_name,
            &department,
            semester,
            batch,
            &class_teacher,
            &room_number,
        ),
    )
    .map_err(|e| {
        write_err(e, "section").with_details(json!({
            "sectionName": section_name,
            "department": department,
            "semester": semester,
            "batch": batch,
        }))
    })?;
    let section_id = conn.last_insert_rowid();
    info!(section_id, %section_name, %department, "section created");

    Ok(json!({ "sectionId": section_id, "sectionName": section_name }))
}

fn handle_sections_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let section_id = get_i64(&req.params, "sectionId")?;
    let mut patch = Patch::from_params(&req.params)?;
    patch.text("sectionName", "section_name")?;
    patch.text("department", "department")?;
    patch.positive_int("semester", "semester")?;
    patch.positive_int("batch", "batch")?;
    patch.nullable_text("classTeacher", "class_teacher")?;
    patch.nullable_text("roomNumber", "room_number")?;

    load_section(conn, section_id)?;
    if let Some(dept) = patch.get("department").and_then(|v| v.as_str()) {
        require_department(conn, dept.trim())?;
    }
    patch
        .apply(conn, "sections", "section_id", SqlValue::Integer(section_id))
        .map_err(|e| write_err(e, "section"))?;
    Ok(json!({ "sectionId": section_id }))
}

fn handle_sections_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let section_id = get_i64(&req.params, "sectionId")?;
    let key = load_section(conn, section_id)?;

    let students: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students
         WHERE section = ? AND department = ? AND batch = ? AND current_semester = ?",
        (&key.name, &key.department, key.batch, key.semester),
        |r| r.get(0),
    )?;
    if students > 0 {
        return Err(HandlerErr::has_dependents(format!(
            "cannot delete section; {} students are assigned to it",
            students
        ))
        .with_details(json!({ "sectionId": section_id, "students": students })));
    }

    conn.execute("DELETE FROM sections WHERE section_id = ?", [section_id])?;
    info!(section_id, "section deleted");
    Ok(json!({ "sectionId": section_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "sections.list" => handle_sections_list(state, req),
        "sections.create" => handle_sections_create(state, req),
        "sections.update" => handle_sections_update(state, req),
        "sections.delete" => handle_sections_delete(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
