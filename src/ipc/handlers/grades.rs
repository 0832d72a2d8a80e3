use crate::calc::{
    calculate_practical, calculate_theory, CalcContext, PracticalMarks, SubjectKind, TheoryMarks,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{exists, get_positive_i64, get_str, opt_i64, opt_str, require_login, respond};
use crate::ipc::types::{AppState, Request};
use crate::security::timestamp;
use chrono::{Datelike, Local, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::{debug, info};

fn marks_param(req: &Request) -> Result<&Value, HandlerErr> {
    req.params
        .get("marks")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params("missing marks object"))
}

fn default_academic_year() -> String {
    let y = Local::now().year();
    format!("{}-{}", y, y + 1)
}

/// Common target of a grade save: the student/subject/semester triple plus academic year.
struct GradeTarget {
    student_id: String,
    subject_code: String,
    semester: i64,
    academic_year: String,
}

impl GradeTarget {
    fn from_params(conn: &Connection, params: &Value, kind: SubjectKind) -> Result<Self, HandlerErr> {
        let student_id = get_str(params, "studentId")?;
        let subject_code = get_str(params, "subjectCode")?;
        let semester = get_positive_i64(params, "semester")?;
        let academic_year = opt_str(params, "academicYear")?.unwrap_or_else(default_academic_year);

        if !exists(conn, "SELECT 1 FROM students WHERE student_id = ?", &student_id)? {
            return Err(HandlerErr::not_found("student not found")
                .with_details(json!({ "studentId": student_id })));
        }
        let subject_type: String = conn
            .query_row(
                "SELECT subject_type FROM subjects WHERE subject_code = ?",
                [&subject_code],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                HandlerErr::not_found("subject not found")
                    .with_details(json!({ "subjectCode": subject_code }))
            })?;
        if subject_type != kind.as_str() {
            return Err(HandlerErr::bad_params(format!(
                "subject {} is a {} subject",
                subject_code, subject_type
            ))
            .with_details(json!({
                "subjectCode": subject_code,
                "subjectType": subject_type,
                "expected": kind,
            })));
        }

        Ok(Self {
            student_id,
            subject_code,
            semester,
            academic_year,
        })
    }

    /// Save response with the semester summary read back after the write.
    fn saved(
        &self,
        conn: &Connection,
        kind: SubjectKind,
        result: Value,
        out_of_range: Vec<&str>,
    ) -> Result<Value, HandlerErr> {
        let summary = CalcContext::new(conn, &self.student_id).semester_summary(self.semester)?;
        Ok(json!({
            "studentId": self.student_id,
            "subjectCode": self.subject_code,
            "semester": self.semester,
            "academicYear": self.academic_year,
            "kind": kind,
            "result": result,
            "outOfRange": out_of_range,
            "semesterSummary": summary,
        }))
    }
}

fn handle_theory_calculate(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_login(state)?;
    let marks = TheoryMarks::from_params(marks_param(req)?)?;
    let calc = calculate_theory(&marks);
    Ok(json!({
        "result": calc,
        "outOfRange": marks.out_of_range(),
    }))
}

fn handle_theory_save(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, actor) = require_login(state)?;
    let target = GradeTarget::from_params(conn, &req.params, SubjectKind::Theory)?;
    let marks = TheoryMarks::from_params(marks_param(req)?)?;
    let calc = calculate_theory(&marks);
    let o = &calc.outcome;

    conn.execute(
        "INSERT INTO theory_grades(
            student_id, subject_code, semester, academic_year,
            internal1_marks, internal2_marks, presentation_marks,
            assignment1_marks, assignment2_marks, external_marks,
            internal_total, total_marks, grade, grade_point, result_status, back_paper,
            updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_code, semester) DO UPDATE SET
            academic_year = excluded.academic_year,
            internal1_marks = excluded.internal1_marks,
            internal2_marks = excluded.internal2_marks,
            presentation_marks = excluded.presentation_marks,
            assignment1_marks = excluded.assignment1_marks,
            assignment2_marks = excluded.assignment2_marks,
            external_marks = excluded.external_marks,
            internal_total = excluded.internal_total,
            total_marks = excluded.total_marks,
            grade = excluded.grade,
            grade_point = excluded.grade_point,
            result_status = excluded.result_status,
            back_paper = excluded.back_paper,
            updated_at = excluded.updated_at",
        rusqlite::params![
            target.student_id,
            target.subject_code,
            target.semester,
            target.academic_year,
            marks.internal1,
            marks.internal2,
            marks.presentation,
            marks.assignment1,
            marks.assignment2,
            marks.external,
            calc.internal_total,
            o.total,
            o.grade.as_str(),
            o.grade_point,
            o.status.as_str(),
            o.back_paper,
            timestamp(Utc::now()),
        ],
    )?;
    info!(
        actor,
        student_id = %target.student_id,
        subject_code = %target.subject_code,
        semester = target.semester,
        total = o.total,
        grade = o.grade.as_str(),
        "theory grade saved"
    );

    target.saved(conn, SubjectKind::Theory, json!(calc), marks.out_of_range())
}

fn handle_practical_calculate(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_login(state)?;
    let marks = PracticalMarks::from_params(marks_param(req)?)?;
    Ok(json!({
        "result": calculate_practical(&marks),
        "outOfRange": marks.out_of_range(),
    }))
}

fn handle_practical_save(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, actor) = require_login(state)?;
    let target = GradeTarget::from_params(conn, &req.params, SubjectKind::Practical)?;
    let marks = PracticalMarks::from_params(marks_param(req)?)?;
    let o = calculate_practical(&marks);

    conn.execute(
        "INSERT INTO practical_grades(
            student_id, subject_code, semester, academic_year,
            lab_copies_marks, viva_marks, practical_exam_marks,
            total_marks, grade, grade_point, result_status, back_paper, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_code, semester) DO UPDATE SET
            academic_year = excluded.academic_year,
            lab_copies_marks = excluded.lab_copies_marks,
            viva_marks = excluded.viva_marks,
            practical_exam_marks = excluded.practical_exam_marks,
            total_marks = excluded.total_marks,
            grade = excluded.grade,
            grade_point = excluded.grade_point,
            result_status = excluded.result_status,
            back_paper = excluded.back_paper,
            updated_at = excluded.updated_at",
        rusqlite::params![
            target.student_id,
            target.subject_code,
            target.semester,
            target.academic_year,
            marks.lab_copies,
            marks.viva,
            marks.practical_exam,
            o.total,
            o.grade.as_str(),
            o.grade_point,
            o.status.as_str(),
            o.back_paper,
            timestamp(Utc::now()),
        ],
    )?;
    info!(
        actor,
        student_id = %target.student_id,
        subject_code = %target.subject_code,
        semester = target.semester,
        total = o.total,
        grade = o.grade.as_str(),
        "practical grade saved"
    );

    target.saved(conn, SubjectKind::Practical, json!(o), marks.out_of_range())
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let student_id = get_str(&req.params, "studentId")?;
    let semester = opt_i64(&req.params, "semester")?;
    if !exists(conn, "SELECT 1 FROM students WHERE student_id = ?", &student_id)? {
        return Err(HandlerErr::not_found("student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    let rows = CalcContext::new(conn, &student_id).grade_rows(semester)?;
    debug!(%student_id, count = rows.len(), "grades listed");
    Ok(json!({ "studentId": student_id, "grades": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "grades.theory.calculate" => handle_theory_calculate(state, req),
        "grades.theory.save" => handle_theory_save(state, req),
        "grades.practical.calculate" => handle_practical_calculate(state, req),
        "grades.practical.save" => handle_practical_save(state, req),
        "grades.list" => handle_grades_list(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
