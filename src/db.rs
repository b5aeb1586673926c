use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{is_unique_violation, AppError};
use crate::models::{Intervention, Student, StudentStatus, StudentSummary};
use crate::status;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@studytrack.dev",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@studytrack.dev",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@studytrack.dev",
        ),
    ];

    for (id, name, email) in students {
        sqlx::query(
            r#"
            INSERT INTO studytrack.students (id, name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let logs = vec![
        (
            Uuid::parse_str("7b1f8f20-51f2-4d55-9f57-24c8c1a1d001")?,
            "avery.lee@studytrack.dev",
            9,
            75,
        ),
        (
            Uuid::parse_str("7b1f8f20-51f2-4d55-9f57-24c8c1a1d002")?,
            "jules.moreno@studytrack.dev",
            5,
            30,
        ),
        (
            Uuid::parse_str("7b1f8f20-51f2-4d55-9f57-24c8c1a1d003")?,
            "kiara.patel@studytrack.dev",
            8,
            90,
        ),
    ];

    for (id, email, quiz_score, focus_minutes) in logs {
        let student_id: Uuid =
            sqlx::query("SELECT id FROM studytrack.students WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .get("id");

        sqlx::query(
            r#"
            INSERT INTO studytrack.daily_logs (id, student_id, quiz_score, focus_minutes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(student_id)
        .bind(quiz_score)
        .bind(focus_minutes)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn parse_status(value: String) -> Result<StudentStatus, sqlx::Error> {
    value
        .parse()
        .map_err(|err: anyhow::Error| sqlx::Error::Decode(err.into()))
}

fn student_from_row(row: &PgRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        status: parse_status(row.get("status"))?,
        last_checkin: row.get("last_checkin"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn intervention_from_row(row: &PgRow) -> Result<Intervention, sqlx::Error> {
    Ok(Intervention {
        id: row.get("id"),
        student_id: row.get("student_id"),
        task: row.get("task"),
        assigned_by: row.get("assigned_by"),
        assigned_at: row.get("assigned_at"),
        completed: row.get("completed"),
        completed_at: row.get("completed_at"),
    })
}

pub async fn find_student(pool: &PgPool, id: Uuid) -> Result<Option<Student>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, status, last_checkin, created_at, updated_at
        FROM studytrack.students
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(student_from_row).transpose()
}

pub async fn create_student(
    pool: &PgPool,
    name: &str,
    email: &str,
) -> Result<Student, AppError> {
    let row = sqlx::query(
        r#"
        INSERT INTO studytrack.students (id, name, email)
        VALUES ($1, $2, $3)
        RETURNING id, name, email, status, last_checkin, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::DuplicateEmail
        } else {
            AppError::Database(err)
        }
    })?;

    Ok(student_from_row(&row)?)
}

pub async fn list_students(pool: &PgPool) -> Result<Vec<StudentSummary>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.name, s.email, s.status, s.last_checkin, s.created_at,
               COUNT(dl.id) AS total_checkins,
               (SELECT COUNT(*) FROM studytrack.interventions i
                WHERE i.student_id = s.id) AS total_interventions
        FROM studytrack.students s
        LEFT JOIN studytrack.daily_logs dl ON dl.student_id = s.id
        GROUP BY s.id
        ORDER BY s.created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in &rows {
        summaries.push(StudentSummary {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            status: parse_status(row.get("status"))?,
            last_checkin: row.get("last_checkin"),
            created_at: row.get("created_at"),
            total_checkins: row.get("total_checkins"),
            total_interventions: row.get("total_interventions"),
        });
    }

    Ok(summaries)
}

/// Append the daily log and move the student to the computed status as a
/// single transaction, so a concurrent sweep cannot observe the log
/// without the status change.
pub async fn record_checkin(
    pool: &PgPool,
    student_id: Uuid,
    quiz_score: i32,
    focus_minutes: i32,
    new_status: StudentStatus,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO studytrack.daily_logs (id, student_id, quiz_score, focus_minutes)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(quiz_score)
    .bind(focus_minutes)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE studytrack.students
        SET last_checkin = now(), status = $1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(new_status.as_str())
    .bind(student_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

pub async fn active_intervention(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<Option<Intervention>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, student_id, task, assigned_by, assigned_at, completed, completed_at
        FROM studytrack.interventions
        WHERE student_id = $1 AND NOT completed
        ORDER BY assigned_at DESC
        LIMIT 1
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(intervention_from_row).transpose()
}

/// Outcome of an assignment request. `Existing` means the student already
/// held an active intervention and no row was created.
pub enum Assignment {
    Created(Intervention),
    Existing(Intervention),
}

pub async fn assign_intervention(
    pool: &PgPool,
    student_id: Uuid,
    task: &str,
    assigned_by: &str,
) -> Result<Assignment, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Serialize all intervention writers for this student. Locking only
    // the active row is not enough: when none exists there is nothing to
    // lock and two concurrent assigns would both insert.
    lock_student_tx(&mut tx, student_id).await?;

    let existing = sqlx::query(
        r#"
        SELECT id, student_id, task, assigned_by, assigned_at, completed, completed_at
        FROM studytrack.interventions
        WHERE student_id = $1 AND NOT completed
        ORDER BY assigned_at DESC
        LIMIT 1
        "#,
    )
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        let intervention = intervention_from_row(&row)?;
        set_status_tx(&mut tx, student_id, StudentStatus::Remedial).await?;
        tx.commit().await?;
        return Ok(Assignment::Existing(intervention));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO studytrack.interventions (id, student_id, task, assigned_by)
        VALUES ($1, $2, $3, $4)
        RETURNING id, student_id, task, assigned_by, assigned_at, completed, completed_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(task)
    .bind(assigned_by)
    .fetch_one(&mut *tx)
    .await?;
    let intervention = intervention_from_row(&row)?;

    set_status_tx(&mut tx, student_id, StudentStatus::Remedial).await?;
    tx.commit().await?;

    Ok(Assignment::Created(intervention))
}

/// Close out every active intervention for the student and drop them back
/// to `normal`. Returns the completed rows; empty means there was nothing
/// active and nothing was changed.
pub async fn complete_interventions(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<Vec<Intervention>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query(
        r#"
        UPDATE studytrack.interventions
        SET completed = true, completed_at = now()
        WHERE student_id = $1 AND NOT completed
        RETURNING id, student_id, task, assigned_by, assigned_at, completed, completed_at
        "#,
    )
    .bind(student_id)
    .fetch_all(&mut *tx)
    .await?;

    if rows.is_empty() {
        tx.rollback().await?;
        return Ok(Vec::new());
    }

    let mut completed = Vec::with_capacity(rows.len());
    for row in &rows {
        completed.push(intervention_from_row(row)?);
    }

    set_status_tx(&mut tx, student_id, StudentStatus::Normal).await?;
    tx.commit().await?;

    Ok(completed)
}

pub async fn stale_needs_intervention(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Student>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, email, status, last_checkin, created_at, updated_at
        FROM studytrack.students
        WHERE status = 'needs_intervention' AND updated_at < $1
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut students = Vec::with_capacity(rows.len());
    for row in &rows {
        students.push(student_from_row(row)?);
    }

    Ok(students)
}

/// Fail-safe escalation for one stuck student. Creates the placeholder
/// intervention only when none is active; either way the student ends up
/// `remedial`. Returns the created row, or `None` when an active
/// intervention already covered them.
pub async fn escalate_stale(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<Option<Intervention>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    lock_student_tx(&mut tx, student_id).await?;

    let existing = sqlx::query(
        r#"
        SELECT id FROM studytrack.interventions
        WHERE student_id = $1 AND NOT completed
        LIMIT 1
        "#,
    )
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?;

    if existing.is_some() {
        set_status_tx(&mut tx, student_id, StudentStatus::Remedial).await?;
        tx.commit().await?;
        return Ok(None);
    }

    let row = sqlx::query(
        r#"
        INSERT INTO studytrack.interventions (id, student_id, task, assigned_by)
        VALUES ($1, $2, $3, $4)
        RETURNING id, student_id, task, assigned_by, assigned_at, completed, completed_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(status::FAILSAFE_TASK)
    .bind(status::FAILSAFE_ASSIGNER)
    .fetch_one(&mut *tx)
    .await?;
    let intervention = intervention_from_row(&row)?;

    set_status_tx(&mut tx, student_id, StudentStatus::Remedial).await?;
    tx.commit().await?;

    Ok(Some(intervention))
}

async fn lock_student_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    student_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT id FROM studytrack.students WHERE id = $1 FOR UPDATE")
        .bind(student_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(())
}

async fn set_status_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    student_id: Uuid,
    status: StudentStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE studytrack.students SET status = $1, updated_at = now() WHERE id = $2",
    )
    .bind(status.as_str())
    .bind(student_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn active_count(pool: &PgPool, student_id: Uuid) -> i64 {
        sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM studytrack.interventions
            WHERE student_id = $1 AND NOT completed
            "#,
        )
        .bind(student_id)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("count")
    }

    async fn backdate_student(pool: &PgPool, student_id: Uuid) {
        sqlx::query(
            "UPDATE studytrack.students SET updated_at = now() - interval '13 hours' WHERE id = $1",
        )
        .bind(student_id)
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test]
    async fn new_students_start_normal(pool: PgPool) {
        let student = create_student(&pool, "Avery Lee", "avery.lee@studytrack.dev")
            .await
            .unwrap();
        assert_eq!(student.status, StudentStatus::Normal);
        assert!(student.last_checkin.is_none());
    }

    #[sqlx::test]
    async fn duplicate_email_conflicts_and_leaves_first_row_intact(pool: PgPool) {
        let first = create_student(&pool, "Avery Lee", "avery.lee@studytrack.dev")
            .await
            .unwrap();

        let second = create_student(&pool, "Someone Else", "avery.lee@studytrack.dev").await;
        assert!(matches!(second, Err(AppError::DuplicateEmail)));

        let kept = find_student(&pool, first.id).await.unwrap().unwrap();
        assert_eq!(kept.name, "Avery Lee");
    }

    #[sqlx::test]
    async fn reassigning_over_active_does_not_duplicate(pool: PgPool) {
        let student = create_student(&pool, "Jules Moreno", "jules.moreno@studytrack.dev")
            .await
            .unwrap();

        let first = assign_intervention(&pool, student.id, "Redo the chapter 3 quiz", "mentor")
            .await
            .unwrap();
        assert!(matches!(first, Assignment::Created(_)));

        let second = assign_intervention(&pool, student.id, "A different task", "mentor")
            .await
            .unwrap();
        match second {
            Assignment::Existing(intervention) => {
                // The stored task is kept, not silently replaced.
                assert_eq!(intervention.task, "Redo the chapter 3 quiz");
            }
            Assignment::Created(_) => panic!("second assign created a duplicate row"),
        }

        assert_eq!(active_count(&pool, student.id).await, 1);
        let student = find_student(&pool, student.id).await.unwrap().unwrap();
        assert_eq!(student.status, StudentStatus::Remedial);
    }

    #[sqlx::test]
    async fn concurrent_assigns_keep_at_most_one_active(pool: PgPool) {
        let student = create_student(&pool, "Kiara Patel", "kiara.patel@studytrack.dev")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            assign_intervention(&pool, student.id, "Task A", "mentor"),
            assign_intervention(&pool, student.id, "Task B", "mentor"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(active_count(&pool, student.id).await, 1);
    }

    #[sqlx::test]
    async fn completing_with_nothing_active_changes_nothing(pool: PgPool) {
        let student = create_student(&pool, "Avery Lee", "avery.lee@studytrack.dev")
            .await
            .unwrap();
        record_checkin(&pool, student.id, 3, 10, StudentStatus::NeedsIntervention)
            .await
            .unwrap();

        let completed = complete_interventions(&pool, student.id).await.unwrap();
        assert!(completed.is_empty());

        let student = find_student(&pool, student.id).await.unwrap().unwrap();
        assert_eq!(student.status, StudentStatus::NeedsIntervention);
    }

    #[sqlx::test]
    async fn completion_returns_student_to_normal(pool: PgPool) {
        let student = create_student(&pool, "Jules Moreno", "jules.moreno@studytrack.dev")
            .await
            .unwrap();
        assign_intervention(&pool, student.id, "Redo the chapter 3 quiz", "mentor")
            .await
            .unwrap();

        let completed = complete_interventions(&pool, student.id).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].completed);
        assert!(completed[0].completed_at.is_some());

        let student = find_student(&pool, student.id).await.unwrap().unwrap();
        assert_eq!(student.status, StudentStatus::Normal);
        assert!(active_intervention(&pool, student.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn sweep_escalates_stale_students_exactly_once(pool: PgPool) {
        let student = create_student(&pool, "Kiara Patel", "kiara.patel@studytrack.dev")
            .await
            .unwrap();
        record_checkin(&pool, student.id, 2, 5, StudentStatus::NeedsIntervention)
            .await
            .unwrap();
        backdate_student(&pool, student.id).await;

        let cutoff = status::stale_cutoff(chrono::Utc::now());
        let stale = stale_needs_intervention(&pool, cutoff).await.unwrap();
        assert!(stale.iter().any(|s| s.id == student.id));

        let created = escalate_stale(&pool, student.id).await.unwrap();
        let intervention = created.expect("escalation should create an intervention");
        assert_eq!(intervention.assigned_by, status::FAILSAFE_ASSIGNER);
        assert_eq!(intervention.task, status::FAILSAFE_TASK);
        assert_eq!(active_count(&pool, student.id).await, 1);

        let student = find_student(&pool, student.id).await.unwrap().unwrap();
        assert_eq!(student.status, StudentStatus::Remedial);

        // A second pass finds the active row and forces status only.
        let again = escalate_stale(&pool, student.id).await.unwrap();
        assert!(again.is_none());
        assert_eq!(active_count(&pool, student.id).await, 1);
    }

    #[sqlx::test]
    async fn fresh_students_are_not_swept(pool: PgPool) {
        let student = create_student(&pool, "Avery Lee", "avery.lee@studytrack.dev")
            .await
            .unwrap();
        record_checkin(&pool, student.id, 2, 5, StudentStatus::NeedsIntervention)
            .await
            .unwrap();

        let cutoff = status::stale_cutoff(chrono::Utc::now());
        let stale = stale_needs_intervention(&pool, cutoff).await.unwrap();
        assert!(stale.iter().all(|s| s.id != student.id));
    }
}
