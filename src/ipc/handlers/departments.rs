use crate::db::count_rows;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_str, opt_i64, opt_str, require_department, require_login, respond, write_err, Patch,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};
use tracing::info;

fn handle_departments_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;

    // Correlated subquery keeps the count live without double-counting joins.
    let mut stmt = conn.prepare(
        "SELECT
           d.dept_id,
           d.dept_name,
           d.hod_name,
           d.established_year,
           (SELECT COUNT(*) FROM students s WHERE s.department = d.dept_id) AS student_count
         FROM departments d
         ORDER BY d.dept_id",
    )?;
    let departments = stmt
        .query_map([], |row| {
            Ok(json!({
                "deptId": row.get::<_, String>(0)?,
                "deptName": row.get::<_, String>(1)?,
                "hodName": row.get::<_, Option<String>>(2)?,
                "establishedYear": row.get::<_, Option<i64>>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "departments": departments }))
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let dept_id = get_str(&req.params, "deptId")?;
    let dept_name = get_str(&req.params, "deptName")?;
    let hod_name = opt_str(&req.params, "hodName")?;
    let established_year = opt_i64(&req.params, "establishedYear")?;

    conn.execute(
        "INSERT INTO departments(dept_id, dept_name, hod_name, established_year)
         VALUES(?, ?, ?, ?)",
        (&dept_id, &dept_name, &hod_name, established_year),
    )
    .map_err(|e| write_err(e, "department").with_details(json!({ "deptId": dept_id })))?;
    info!(%dept_id, "department created");

    Ok(json!({ "deptId": dept_id, "deptName": dept_name }))
}

fn handle_departments_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let dept_id = get_str(&req.params, "deptId")?;
    let mut patch = Patch::from_params(&req.params)?;
    patch.text("deptName", "dept_name")?;
    patch.nullable_text("hodName", "hod_name")?;
    patch.nullable_int("establishedYear", "established_year")?;

    require_department(conn, &dept_id)?;
    patch.apply(conn, "departments", "dept_id", SqlValue::Text(dept_id.clone()))?;
    Ok(json!({ "deptId": dept_id }))
}

fn handle_departments_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let dept_id = get_str(&req.params, "deptId")?;
    require_department(conn, &dept_id)?;

    let students = count_rows(conn, "SELECT COUNT(*) FROM students WHERE department = ?", &dept_id)?;
    let sections = count_rows(conn, "SELECT COUNT(*) FROM sections WHERE department = ?", &dept_id)?;
    let subjects = count_rows(conn, "SELECT COUNT(*) FROM subjects WHERE department = ?", &dept_id)?;
    if students + sections + subjects > 0 {
        return Err(
            HandlerErr::has_dependents("department still has students, sections or subjects")
                .with_details(json!({
                    "deptId": dept_id,
                    "students": students,
                    "sections": sections,
                    "subjects": subjects,
                })),
        );
    }

    conn.execute("DELETE FROM departments WHERE dept_id = ?", [&dept_id])?;
    info!(%dept_id, "department deleted");
    Ok(json!({ "deptId": dept_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "departments.list" => handle_departments_list(state, req),
        "departments.create" => handle_departments_create(state, req),
        "departments.update" => handle_departments_update(state, req),
        "departments.delete" => handle_departments_delete(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
