use crate::access::Actor;
use crate::db::now_rfc3339;
use crate::outcome::PageError;
use crate::transition::{Status, TransitionOutcome};
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct GradeTarget {
    pub submission_id: i64,
    pub activity_id: i64,
    pub total_marks: f64,
}

/// Loads a submission only if its activity belongs to the actor and the actor's school.
pub fn load_target(
    conn: &Connection,
    actor: &Actor,
    submission_id: i64,
) -> rusqlite::Result<Option<GradeTarget>> {
    conn.query_row(
        "SELECT s.id, a.id, a.total_marks
         FROM submissions s
         JOIN activities a ON a.id = s.activity_id
         WHERE s.id = ? AND a.owner_id = ? AND a.school_id = ?",
        (submission_id, actor.user_id, actor.tenant_id),
        |r| {
            Ok(GradeTarget {
                submission_id: r.get(0)?,
                activity_id: r.get(1)?,
                total_marks: r.get(2)?,
            })
        },
    )
    .optional()
}

pub fn validate_marks(marks: f64, total_marks: f64) -> Result<(), PageError> {
    if !marks.is_finite() || marks < 0.0 || marks > total_marks {
        return Err(PageError::Validation(format!(
            "Marks must be between 0 and {}.",
            format_marks(total_marks)
        )));
    }
    Ok(())
}

fn format_marks(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Validates and records a grade. Nothing is written when validation fails.
///
/// Re-grading a graded submission is allowed. The write repeats the ownership
/// join, so a submission moved out of the actor's activities between the read and
/// the write is not touched.
pub fn grade(
    conn: &Connection,
    actor: &Actor,
    submission_id: i64,
    marks: f64,
    feedback: Option<&str>,
) -> Result<TransitionOutcome, PageError> {
    let Some(target) = load_target(conn, actor, submission_id)? else {
        return Ok(TransitionOutcome::NotApplied);
    };
    validate_marks(marks, target.total_marks)?;

    let affected = conn.execute(
        "UPDATE submissions
         SET marks_obtained = ?, feedback = ?, status = ?, graded_by = ?, graded_at = ?
         WHERE id = ?
           AND status IN (?, ?)
           AND activity_id IN (
             SELECT id FROM activities WHERE owner_id = ? AND school_id = ?
           )",
        (
            marks,
            feedback,
            Status::Graded.as_str(),
            actor.user_id,
            now_rfc3339(),
            target.submission_id,
            Status::Submitted.as_str(),
            Status::Graded.as_str(),
            actor.user_id,
            actor.tenant_id,
        ),
    )?;
    let outcome = TransitionOutcome::from_count(affected);
    tracing::debug!(
        submission = submission_id,
        activity = target.activity_id,
        actor = actor.user_id,
        marks,
        ?outcome,
        "grade recorded"
    );
    Ok(outcome)
}
