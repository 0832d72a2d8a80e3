use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Pass threshold on the total mark. Kept separate from the grade table even though
/// it currently coincides with the start of the F band.
pub const PASS_MARK: f64 = 40.0;

/// Accepted credit weight for a subject, inclusive.
pub const CREDIT_RANGE: std::ops::RangeInclusive<i64> = 1..=40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    O,
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    P,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::O => "O",
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::P => "P",
            Grade::F => "F",
        }
    }
}

/// Lower bound (inclusive), letter, point. Highest band first.
///
/// The two P bands are deliberately listed separately; both are the lowest passing tier.
const GRADE_BANDS: [(f64, Grade, f64); 8] = [
    (90.0, Grade::O, 10.0),
    (80.0, Grade::APlus, 9.0),
    (70.0, Grade::A, 8.0),
    (60.0, Grade::BPlus, 7.0),
    (55.0, Grade::B, 6.0),
    (50.0, Grade::C, 5.0),
    (45.0, Grade::P, 4.0),
    (40.0, Grade::P, 4.0),
];

pub fn grade_for(total: f64) -> (Grade, f64) {
    for &(floor, grade, point) in GRADE_BANDS.iter() {
        if total >= floor {
            return (grade, point);
        }
    }
    (Grade::F, 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Pass,
    Fail,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pass => "Pass",
            ResultStatus::Fail => "Fail",
        }
    }
}

pub fn result_status(total: f64) -> ResultStatus {
    if total >= PASS_MARK {
        ResultStatus::Pass
    } else {
        ResultStatus::Fail
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    Theory,
    Practical,
}

impl SubjectKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "theory" => Some(Self::Theory),
            "practical" => Some(Self::Practical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Theory => "Theory",
            SubjectKind::Practical => "Practical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Reads one mark component from a params object.
///
/// Missing, null and blank values count as 0. Numeric strings are accepted because the
/// desktop form submits raw entry text.
pub fn parse_mark(obj: &serde_json::Value, key: &str) -> Result<f64, CalcError> {
    let v = match obj.get(key) {
        None => return Ok(0.0),
        Some(v) if v.is_null() => return Ok(0.0),
        Some(v) => v,
    };
    let parsed = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if s.trim().is_empty() => Some(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(x) if x.is_finite() => Ok(x),
        _ => Err(
            CalcError::new("bad_params", format!("{} must be a numeric mark", key))
                .with_details(json!({ "field": key, "value": v })),
        ),
    }
}

fn collect_out_of_range(components: &[(&'static str, f64, f64)]) -> Vec<&'static str> {
    components
        .iter()
        .filter(|(_, value, max)| *value < 0.0 || *value > *max)
        .map(|(name, _, _)| *name)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TheoryMarks {
    pub internal1: f64,
    pub internal2: f64,
    pub presentation: f64,
    pub assignment1: f64,
    pub assignment2: f64,
    pub external: f64,
}

impl TheoryMarks {
    pub const MAX_INTERNAL: f64 = 20.0;
    pub const MAX_PRESENTATION: f64 = 10.0;
    pub const MAX_ASSIGNMENT: f64 = 5.0;
    pub const MAX_EXTERNAL: f64 = 60.0;

    pub fn from_params(marks: &serde_json::Value) -> Result<Self, CalcError> {
        Ok(Self {
            internal1: parse_mark(marks, "internal1")?,
            internal2: parse_mark(marks, "internal2")?,
            presentation: parse_mark(marks, "presentation")?,
            assignment1: parse_mark(marks, "assignment1")?,
            assignment2: parse_mark(marks, "assignment2")?,
            external: parse_mark(marks, "external")?,
        })
    }

    /// Components outside their nominal bounds. Advisory only.
    pub fn out_of_range(&self) -> Vec<&'static str> {
        collect_out_of_range(&[
            ("internal1", self.internal1, Self::MAX_INTERNAL),
            ("internal2", self.internal2, Self::MAX_INTERNAL),
            ("presentation", self.presentation, Self::MAX_PRESENTATION),
            ("assignment1", self.assignment1, Self::MAX_ASSIGNMENT),
            ("assignment2", self.assignment2, Self::MAX_ASSIGNMENT),
            ("external", self.external, Self::MAX_EXTERNAL),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticalMarks {
    pub lab_copies: f64,
    pub viva: f64,
    pub practical_exam: f64,
}

impl PracticalMarks {
    pub const MAX_LAB_COPIES: f64 = 20.0;
    pub const MAX_VIVA: f64 = 20.0;
    pub const MAX_PRACTICAL_EXAM: f64 = 60.0;

    pub fn from_params(marks: &serde_json::Value) -> Result<Self, CalcError> {
        Ok(Self {
            lab_copies: parse_mark(marks, "labCopies")?,
            viva: parse_mark(marks, "viva")?,
            practical_exam: parse_mark(marks, "practicalExam")?,
        })
    }

    pub fn out_of_range(&self) -> Vec<&'static str> {
        collect_out_of_range(&[
            ("labCopies", self.lab_copies, Self::MAX_LAB_COPIES),
            ("viva", self.viva, Self::MAX_VIVA),
            ("practicalExam", self.practical_exam, Self::MAX_PRACTICAL_EXAM),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub total: f64,
    pub grade: Grade,
    pub grade_point: f64,
    pub status: ResultStatus,
    pub back_paper: bool,
}

impl GradeOutcome {
    pub fn from_total(total: f64) -> Self {
        let (grade, grade_point) = grade_for(total);
        let status = result_status(total);
        Self {
            total,
            grade,
            grade_point,
            status,
            back_paper: status == ResultStatus::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TheoryOutcome {
    pub internal_total: f64,
    #[serde(flatten)]
    pub outcome: GradeOutcome,
}

pub fn calculate_theory(m: &TheoryMarks) -> TheoryOutcome {
    let internal_avg = (m.internal1 + m.internal2) / 2.0;
    let internal_total = internal_avg + m.presentation + m.assignment1 + m.assignment2;
    let total = internal_total + m.external;
    TheoryOutcome {
        internal_total,
        outcome: GradeOutcome::from_total(total),
    }
}

pub fn calculate_practical(m: &PracticalMarks) -> GradeOutcome {
    GradeOutcome::from_total(m.lab_copies + m.viva + m.practical_exam)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditedResult {
    pub credits: i64,
    pub grade_point: f64,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaSummary {
    pub passed_credits: i64,
    pub gpa: f64,
}

/// Credit-weighted grade point average over passing results. Failing results contribute
/// to neither numerator nor denominator; no passing credits yields 0.0.
fn weighted_gpa<'a, I>(records: I) -> GpaSummary
where
    I: IntoIterator<Item = &'a CreditedResult>,
{
    let mut credits: i64 = 0;
    let mut weight: f64 = 0.0;
    let mut weighted: f64 = 0.0;
    for r in records {
        if r.status != ResultStatus::Pass {
            continue;
        }
        // Stored credits are not range-checked here.
        credits = credits.saturating_add(r.credits);
        weight += r.credits as f64;
        weighted += (r.credits as f64) * r.grade_point;
    }
    let gpa = if weight > 0.0 { weighted / weight } else { 0.0 };
    GpaSummary {
        passed_credits: credits,
        gpa,
    }
}

pub fn compute_sgpa(records: &[CreditedResult]) -> GpaSummary {
    weighted_gpa(records)
}

/// Recomputed over the union of every semester's results, never an average of SGPAs.
pub fn compute_cgpa(semesters: &[Vec<CreditedResult>]) -> GpaSummary {
    weighted_gpa(semesters.iter().flatten())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub kind: SubjectKind,
    pub subject_code: String,
    pub subject_name: String,
    pub semester: i64,
    pub academic_year: Option<String>,
    pub credits: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theory: Option<TheoryMarks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practical: Option<PracticalMarks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_total: Option<f64>,
    #[serde(flatten)]
    pub outcome: GradeOutcome,
}

impl GradeRow {
    pub fn credited(&self) -> CreditedResult {
        CreditedResult {
            credits: self.credits,
            grade_point: self.outcome.grade_point,
            status: self.outcome.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSummary {
    pub semester: i64,
    pub rows: Vec<GradeRow>,
    pub passed_credits: i64,
    pub sgpa: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub department_name: Option<String>,
    pub batch: i64,
    pub current_semester: i64,
    pub section: Option<String>,
    pub class_teacher: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub student: StudentInfo,
    pub semesters: Vec<SemesterSummary>,
    pub cumulative: GpaSummary,
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub student_id: &'a str,
}

impl<'a> CalcContext<'a> {
    pub fn new(conn: &'a Connection, student_id: &'a str) -> Self {
        Self { conn, student_id }
    }

    /// Loads grade rows with derived fields recomputed from the stored components.
    /// Persisted totals and grades are a cache; they are not trusted here.
    pub fn grade_rows(&self, semester: Option<i64>) -> anyhow::Result<Vec<GradeRow>> {
        let mut rows = Vec::new();

        let mut theory_stmt = self.conn.prepare(
            "SELECT t.subject_code, s.subject_name, t.semester, t.academic_year, s.credits,
                    t.internal1_marks, t.internal2_marks, t.presentation_marks,
                    t.assignment1_marks, t.assignment2_marks, t.external_marks
             FROM theory_grades t
             JOIN subjects s ON s.subject_code = t.subject_code
             WHERE t.student_id = ?1 AND (?2 IS NULL OR t.semester = ?2)
             ORDER BY t.semester, t.subject_code",
        )?;
        let theory = theory_stmt
            .query_map((self.student_id, semester), |r| {
                let marks = TheoryMarks {
                    internal1: r.get(5)?,
                    internal2: r.get(6)?,
                    presentation: r.get(7)?,
                    assignment1: r.get(8)?,
                    assignment2: r.get(9)?,
                    external: r.get(10)?,
                };
                let calc = calculate_theory(&marks);
                Ok(GradeRow {
                    kind: SubjectKind::Theory,
                    subject_code: r.get(0)?,
                    subject_name: r.get(1)?,
                    semester: r.get(2)?,
                    academic_year: r.get(3)?,
                    credits: r.get(4)?,
                    theory: Some(marks),
                    practical: None,
                    internal_total: Some(calc.internal_total),
                    outcome: calc.outcome,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.extend(theory);

        let mut practical_stmt = self.conn.prepare(
            "SELECT p.subject_code, s.subject_name, p.semester, p.academic_year, s.credits,
                    p.lab_copies_marks, p.viva_marks, p.practical_exam_marks
             FROM practical_grades p
             JOIN subjects s ON s.subject_code = p.subject_code
             WHERE p.student_id = ?1 AND (?2 IS NULL OR p.semester = ?2)
             ORDER BY p.semester, p.subject_code",
        )?;
        let practical = practical_stmt
            .query_map((self.student_id, semester), |r| {
                let marks = PracticalMarks {
                    lab_copies: r.get(5)?,
                    viva: r.get(6)?,
                    practical_exam: r.get(7)?,
                };
                Ok(GradeRow {
                    kind: SubjectKind::Practical,
                    subject_code: r.get(0)?,
                    subject_name: r.get(1)?,
                    semester: r.get(2)?,
                    academic_year: r.get(3)?,
                    credits: r.get(4)?,
                    theory: None,
                    practical: Some(marks),
                    internal_total: None,
                    outcome: calculate_practical(&marks),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.extend(practical);

        // Theory before practical within a semester, stable by subject code.
        rows.sort_by(|a, b| {
            a.semester
                .cmp(&b.semester)
                .then_with(|| (a.kind == SubjectKind::Practical).cmp(&(b.kind == SubjectKind::Practical)))
                .then_with(|| a.subject_code.cmp(&b.subject_code))
        });
        Ok(rows)
    }

    pub fn semester_summary(&self, semester: i64) -> anyhow::Result<SemesterSummary> {
        let rows = self.grade_rows(Some(semester))?;
        Ok(summarize_semester(semester, rows))
    }

    pub fn student_info(&self) -> anyhow::Result<Option<StudentInfo>> {
        let info = self
            .conn
            .query_row(
                "SELECT s.student_id, s.name, s.department, d.dept_name, s.batch,
                        s.current_semester, s.section, sec.class_teacher, s.status
                 FROM students s
                 LEFT JOIN departments d ON d.dept_id = s.department
                 LEFT JOIN sections sec ON sec.section_name = s.section
                                       AND sec.department = s.department
                                       AND sec.batch = s.batch
                                       AND sec.semester = s.current_semester
                 WHERE s.student_id = ?",
                [self.student_id],
                |r| {
                    Ok(StudentInfo {
                        student_id: r.get(0)?,
                        name: r.get(1)?,
                        department: r.get(2)?,
                        department_name: r.get(3)?,
                        batch: r.get(4)?,
                        current_semester: r.get(5)?,
                        section: r.get(6)?,
                        class_teacher: r.get(7)?,
                        status: r.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    pub fn transcript(&self) -> anyhow::Result<Option<Transcript>> {
        let Some(student) = self.student_info()? else {
            return Ok(None);
        };

        let mut by_semester: BTreeMap<i64, Vec<GradeRow>> = BTreeMap::new();
        for row in self.grade_rows(None)? {
            by_semester.entry(row.semester).or_default().push(row);
        }

        let credited: Vec<Vec<CreditedResult>> = by_semester
            .values()
            .map(|rows| rows.iter().map(GradeRow::credited).collect())
            .collect();
        let cumulative = compute_cgpa(&credited);

        let semesters = by_semester
            .into_iter()
            .map(|(semester, rows)| summarize_semester(semester, rows))
            .collect();

        Ok(Some(Transcript {
            student,
            semesters,
            cumulative,
        }))
    }
}

fn summarize_semester(semester: i64, rows: Vec<GradeRow>) -> SemesterSummary {
    let credited: Vec<CreditedResult> = rows.iter().map(GradeRow::credited).collect();
    let summary = compute_sgpa(&credited);
    SemesterSummary {
        semester,
        rows,
        passed_credits: summary.passed_credits,
        sgpa: summary.gpa,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn passed(credits: i64, grade_point: f64) -> CreditedResult {
        CreditedResult {
            credits,
            grade_point,
            status: ResultStatus::Pass,
        }
    }

    fn failed(credits: i64) -> CreditedResult {
        CreditedResult {
            credits,
            grade_point: 0.0,
            status: ResultStatus::Fail,
        }
    }

    #[test_case(100.0, Grade::O, 10.0 ; "full marks")]
    #[test_case(90.0, Grade::O, 10.0 ; "o floor")]
    #[test_case(89.99, Grade::APlus, 9.0 ; "just below o")]
    #[test_case(80.0, Grade::APlus, 9.0 ; "a plus floor")]
    #[test_case(70.0, Grade::A, 8.0 ; "a floor")]
    #[test_case(60.0, Grade::BPlus, 7.0 ; "b plus floor")]
    #[test_case(55.0, Grade::B, 6.0 ; "b floor")]
    #[test_case(50.0, Grade::C, 5.0 ; "c floor")]
    #[test_case(47.5, Grade::P, 4.0 ; "upper p band")]
    #[test_case(42.0, Grade::P, 4.0 ; "lower p band")]
    #[test_case(40.0, Grade::P, 4.0 ; "pass floor")]
    #[test_case(39.999999, Grade::F, 0.0 ; "just below pass")]
    #[test_case(0.0, Grade::F, 0.0 ; "zero")]
    fn grade_table_bands(total: f64, grade: Grade, point: f64) {
        assert_eq!(grade_for(total), (grade, point));
    }

    #[test]
    fn grade_point_is_monotonic_across_sweep() {
        let mut prev = grade_for(0.0).1;
        for i in 0..=10_000 {
            let t = i as f64 / 100.0;
            let point = grade_for(t).1;
            assert!(point >= prev, "grade point dropped at {}", t);
            prev = point;
        }
    }

    #[test]
    fn status_follows_threshold_not_letter() {
        for i in 0..=10_000 {
            let t = i as f64 / 100.0;
            assert_eq!(result_status(t) == ResultStatus::Pass, t >= 40.0, "t={}", t);
        }
    }

    #[test]
    fn theory_scenario_lands_in_a_band() {
        let marks = TheoryMarks {
            internal1: 18.0,
            internal2: 16.0,
            presentation: 8.0,
            assignment1: 5.0,
            assignment2: 4.0,
            external: 45.0,
        };
        let out = calculate_theory(&marks);
        assert_eq!(out.internal_total, 34.0);
        assert_eq!(out.outcome.total, 79.0);
        assert_eq!(out.outcome.grade, Grade::A);
        assert_eq!(out.outcome.grade_point, 8.0);
        assert_eq!(out.outcome.status, ResultStatus::Pass);
        assert!(!out.outcome.back_paper);
    }

    #[test]
    fn theory_total_matches_formula_exactly() {
        let cases = [
            (13.5, 17.25, 7.5, 3.0, 4.5, 41.75),
            (0.1, 0.2, 0.3, 0.4, 0.5, 0.6),
            (20.0, 19.0, 10.0, 5.0, 5.0, 60.0),
        ];
        for (i1, i2, p, a1, a2, e) in cases {
            let marks = TheoryMarks {
                internal1: i1,
                internal2: i2,
                presentation: p,
                assignment1: a1,
                assignment2: a2,
                external: e,
            };
            let expected = ((i1 + i2) / 2.0 + p + a1 + a2) + e;
            assert_eq!(calculate_theory(&marks).outcome.total, expected);
        }
    }

    #[test]
    fn theory_just_under_pass_is_back_paper() {
        let marks = TheoryMarks {
            external: 39.999999,
            ..Default::default()
        };
        let out = calculate_theory(&marks).outcome;
        assert_eq!(out.grade, Grade::F);
        assert_eq!(out.grade_point, 0.0);
        assert_eq!(out.status, ResultStatus::Fail);
        assert!(out.back_paper);
    }

    #[test]
    fn practical_scenario_is_c() {
        let out = calculate_practical(&PracticalMarks {
            lab_copies: 20.0,
            viva: 20.0,
            practical_exam: 10.0,
        });
        assert_eq!(out.total, 50.0);
        assert_eq!(out.grade, Grade::C);
        assert_eq!(out.grade_point, 5.0);
        assert_eq!(out.status, ResultStatus::Pass);
    }

    #[test]
    fn out_of_range_components_are_accepted_and_reported() {
        let marks = TheoryMarks {
            internal1: 25.0,
            external: -1.0,
            ..Default::default()
        };
        assert_eq!(marks.out_of_range(), vec!["internal1", "external"]);
        assert_eq!(calculate_theory(&marks).outcome.total, 11.5);
    }

    #[test]
    fn parse_mark_accepts_blank_and_numeric_strings() {
        let raw = json!({ "a": "", "b": " 12.5 ", "c": null, "d": 7 });
        assert_eq!(parse_mark(&raw, "a").unwrap(), 0.0);
        assert_eq!(parse_mark(&raw, "b").unwrap(), 12.5);
        assert_eq!(parse_mark(&raw, "c").unwrap(), 0.0);
        assert_eq!(parse_mark(&raw, "d").unwrap(), 7.0);
        assert_eq!(parse_mark(&raw, "missing").unwrap(), 0.0);
    }

    #[test]
    fn parse_mark_rejects_text_and_non_finite() {
        let raw = json!({ "a": "abc", "b": "NaN", "c": true, "d": "inf" });
        for key in ["a", "b", "c", "d"] {
            let e = parse_mark(&raw, key).unwrap_err();
            assert_eq!(e.code, "bad_params");
        }
    }

    #[test]
    fn sgpa_of_nothing_is_zero() {
        assert_eq!(compute_sgpa(&[]), GpaSummary::default());
        let all_failed = compute_sgpa(&[failed(4), failed(2)]);
        assert_eq!(all_failed.gpa, 0.0);
        assert_eq!(all_failed.passed_credits, 0);
    }

    #[test]
    fn sgpa_ignores_failing_credits() {
        let with_fail = [passed(4, 8.0), passed(2, 5.0), failed(4)];
        let without = [passed(4, 8.0), passed(2, 5.0)];
        assert_eq!(compute_sgpa(&with_fail), compute_sgpa(&without));
        assert_eq!(compute_sgpa(&without).gpa, (4.0 * 8.0 + 2.0 * 5.0) / 6.0);
        assert_eq!(compute_sgpa(&with_fail).passed_credits, 6);
    }

    #[test]
    fn cgpa_equals_sgpa_over_flattened_union() {
        let semesters = vec![
            vec![passed(4, 10.0), passed(2, 4.0), failed(4)],
            vec![passed(3, 7.0)],
            vec![passed(4, 9.0), passed(4, 6.0), passed(2, 5.0)],
        ];
        let flat: Vec<CreditedResult> = semesters.iter().flatten().copied().collect();
        assert_eq!(compute_cgpa(&semesters), compute_sgpa(&flat));

        let sgpa_mean = semesters.iter().map(|s| compute_sgpa(s).gpa).sum::<f64>() / 3.0;
        assert!((compute_cgpa(&semesters).gpa - sgpa_mean).abs() > 1e-6);
    }

    #[test]
    fn huge_credit_weights_do_not_overflow() {
        let big = i64::MAX / 2 + 1;
        let summary = compute_sgpa(&[passed(big, 8.0), passed(big, 8.0)]);
        assert_eq!(summary.passed_credits, i64::MAX);
        assert!((summary.gpa - 8.0).abs() < 1e-9);

        let cgpa = compute_cgpa(&[vec![passed(big, 10.0)], vec![passed(big, 6.0)]]);
        assert!((cgpa.gpa - 8.0).abs() < 1e-9);
    }
}
