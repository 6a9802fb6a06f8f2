use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::db::{self, InboxEntry, Submission};
use crate::domain::deadline;
use crate::domain::models::{InboxPayload, SubmissionKind, SubmissionStatus};

/// Result of an approve or reject. Repeating the same verdict is a no-op
/// that still reports success, so admins can retry freely.
#[derive(Debug)]
pub enum ModerationOutcome {
    Applied {
        submission: Submission,
        task_title: String,
    },
    Missing,
}

pub async fn approve(pool: &SqlitePool, submission_id: i64) -> Result<ModerationOutcome> {
    apply_verdict(pool, submission_id, SubmissionStatus::Approved).await
}

pub async fn reject(pool: &SqlitePool, submission_id: i64) -> Result<ModerationOutcome> {
    apply_verdict(pool, submission_id, SubmissionStatus::Rejected).await
}

async fn apply_verdict(
    pool: &SqlitePool,
    submission_id: i64,
    status: SubmissionStatus,
) -> Result<ModerationOutcome> {
    let Some(mut submission) = db::get_submission(pool, submission_id).await? else {
        return Ok(ModerationOutcome::Missing);
    };
    db::set_submission_status(pool, submission_id, status).await?;
    submission.status = status;
    let task_title = db::get_task(pool, submission.task_id)
        .await?
        .map(|task| task.title)
        .unwrap_or_else(|| format!("#{}", submission.task_id));
    tracing::info!(submission_id, status = ?status, "verdict applied");
    Ok(ModerationOutcome::Applied {
        submission,
        task_title,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub enum PromoteOutcome {
    Promoted {
        submission_id: i64,
        user_id: i64,
        task_title: String,
        on_time: bool,
    },
    EntryMissing,
    AlreadyProcessed,
    TaskMissing,
}

/// Turns a rescued inbox entry into an already-approved submission for the
/// given task. Claiming the entry and inserting the submission happen in
/// one transaction, so the promotion either fully lands or leaves the entry
/// untouched for another try. The lateness flag is computed against `now`,
/// the moment the admin decided, not against the original message.
pub async fn promote_entry(
    pool: &SqlitePool,
    entry_id: i64,
    task_id: i64,
    now: DateTime<Utc>,
) -> Result<PromoteOutcome> {
    let mut tx = pool.begin().await?;

    let entry = sqlx::query_as::<_, InboxEntry>(
        r#"
        SELECT id, user_id, kind, payload, processed, received_at
        FROM inbox_entries
        WHERE id = ?1
        "#,
    )
    .bind(entry_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(entry) = entry else {
        return Ok(PromoteOutcome::EntryMissing);
    };

    // The guarded update is the claim. A concurrent promotion of the same
    // entry loses here instead of producing a second submission.
    let claimed = sqlx::query(
        "UPDATE inbox_entries SET processed = TRUE WHERE id = ?1 AND processed = FALSE",
    )
    .bind(entry_id)
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() == 0 {
        return Ok(PromoteOutcome::AlreadyProcessed);
    }

    let task = sqlx::query_as::<_, db::Task>(
        r#"
        SELECT id, title, description, link, is_open, week_number, opens_at, deadline_at, created_at
        FROM tasks
        WHERE id = ?1
        "#,
    )
    .bind(task_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(task) = task else {
        tx.rollback().await?;
        return Ok(PromoteOutcome::TaskMissing);
    };

    let Json(payload): Json<InboxPayload> = entry.payload;
    let kind = payload.media.unwrap_or(SubmissionKind::Text);
    let on_time = deadline::is_on_time(task.deadline_at, now);
    let submission_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO submissions
            (user_id, task_id, kind, content, file_id, file_path, status, is_on_time, submitted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        RETURNING id
        "#,
    )
    .bind(entry.user_id)
    .bind(task_id)
    .bind(kind)
    .bind(&payload.text)
    .bind(&payload.file_id)
    .bind(&payload.file_path)
    .bind(SubmissionStatus::Approved)
    .bind(on_time)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(entry_id, task_id, submission_id, "inbox entry promoted");
    Ok(PromoteOutcome::Promoted {
        submission_id,
        user_id: entry.user_id,
        task_title: task.title,
        on_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_task, seed_user, test_pool};
    use crate::domain::models::InboxKind;
    use chrono::Duration;

    async fn file_report_entry(pool: &SqlitePool, user_id: i64, text: &str) -> i64 {
        let payload = InboxPayload {
            text: Some(text.to_string()),
            media: None,
            file_id: None,
            file_path: None,
        };
        db::insert_inbox_entry(pool, user_id, InboxKind::PotentialReport, &payload, Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn promotion_creates_an_approved_submission_once() {
        let pool = test_pool().await;
        seed_user(&pool, 1).await;
        let task = seed_task(&pool, Some(Utc::now() + Duration::days(3))).await;
        let entry_id = file_report_entry(&pool, 1, "Посадил три дерева сегодня").await;

        let outcome = promote_entry(&pool, entry_id, task.id, Utc::now())
            .await
            .unwrap();
        let PromoteOutcome::Promoted {
            submission_id,
            user_id,
            on_time,
            ..
        } = outcome
        else {
            panic!("expected a promotion, got {outcome:?}");
        };
        assert_eq!(user_id, 1);
        assert!(on_time);

        let stored = db::get_submission(&pool, submission_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Approved);
        assert_eq!(stored.content.as_deref(), Some("Посадил три дерева сегодня"));
        let entry = db::get_inbox_entry(&pool, entry_id).await.unwrap().unwrap();
        assert!(entry.processed);

        // A repeated promotion finds the entry claimed and adds nothing.
        let again = promote_entry(&pool, entry_id, task.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, PromoteOutcome::AlreadyProcessed);
        let stats = db::user_submission_stats(&pool, 1).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.approved, 1);
    }

    #[tokio::test]
    async fn promotion_to_a_missing_task_leaves_the_entry_unprocessed() {
        let pool = test_pool().await;
        seed_user(&pool, 1).await;
        let entry_id = file_report_entry(&pool, 1, "Отчет без задания").await;

        let outcome = promote_entry(&pool, entry_id, 777, Utc::now()).await.unwrap();
        assert_eq!(outcome, PromoteOutcome::TaskMissing);

        let entry = db::get_inbox_entry(&pool, entry_id).await.unwrap().unwrap();
        assert!(!entry.processed, "failed promotion must not claim the entry");
        let stats = db::user_submission_stats(&pool, 1).await.unwrap();
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn promotion_of_an_unknown_entry_reports_it() {
        let pool = test_pool().await;
        seed_user(&pool, 1).await;
        let task = seed_task(&pool, None).await;
        let outcome = promote_entry(&pool, 555, task.id, Utc::now()).await.unwrap();
        assert_eq!(outcome, PromoteOutcome::EntryMissing);
    }

    #[tokio::test]
    async fn verdicts_are_idempotent_and_reversible() {
        let pool = test_pool().await;
        seed_user(&pool, 1).await;
        let task = seed_task(&pool, None).await;
        let submission_id = db::insert_submission(
            &pool,
            &db::NewSubmission {
                user_id: 1,
                task_id: task.id,
                kind: SubmissionKind::Text,
                content: Some("сделано".to_string()),
                file_id: None,
                file_path: None,
                status: SubmissionStatus::Pending,
                is_on_time: true,
                submitted_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        for _ in 0..2 {
            let outcome = approve(&pool, submission_id).await.unwrap();
            let ModerationOutcome::Applied { submission, .. } = outcome else {
                panic!("expected the verdict to apply");
            };
            assert_eq!(submission.status, SubmissionStatus::Approved);
        }

        // The last verdict wins when admins change their mind.
        let outcome = reject(&pool, submission_id).await.unwrap();
        let ModerationOutcome::Applied { submission, .. } = outcome else {
            panic!("expected the verdict to apply");
        };
        assert_eq!(submission.status, SubmissionStatus::Rejected);

        let stored = db::get_submission(&pool, submission_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Rejected);
    }

    #[tokio::test]
    async fn verdict_on_an_unknown_submission_reports_it() {
        let pool = test_pool().await;
        let outcome = approve(&pool, 404).await.unwrap();
        assert!(matches!(outcome, ModerationOutcome::Missing));
    }
}
