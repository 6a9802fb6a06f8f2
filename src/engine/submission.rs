use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{self, NewSubmission, Task, User};
use crate::domain::deadline;
use crate::domain::models::{SubmissionKind, SubmissionStatus};
use crate::engine::conversation::{self, StepInput, ValidationError};
use crate::engine::reply::{Keyboard, Reply};
use crate::time_utils;

/// Terminal step of the submit flow. Checks the task is still there and not
/// already answered, stamps the lateness flag with the moment the event was
/// received and stores the report as pending. The step is cleared only
/// after the insert succeeded, so a crash in between replays the step.
pub async fn handle_report(
    pool: &SqlitePool,
    user: &User,
    task_id: i64,
    input: StepInput<'_>,
    received_at: DateTime<Utc>,
    admin_targets: &[i64],
) -> Result<Vec<Reply>> {
    let user_id = user.user_id;

    let Some(task) = db::get_task(pool, task_id).await? else {
        db::clear_conversation(pool, user_id).await?;
        tracing::warn!(user_id, task_id, "submit flow pointed at a deleted task");
        return Ok(vec![Reply::with_keyboard(
            user_id,
            "⚠️ Это задание больше недоступно. Выберите другое в банке заданий.",
            Keyboard::MainMenu,
        )]);
    };

    if db::has_submission(pool, user_id, task_id).await? {
        db::clear_conversation(pool, user_id).await?;
        return Ok(vec![Reply::with_keyboard(
            user_id,
            format!("Вы уже отправляли отчет по заданию «{}». Повторная сдача не нужна.", task.title),
            Keyboard::MainMenu,
        )]);
    }

    let draft = match draft_from_input(&input) {
        Ok(draft) => draft,
        Err(err) => return conversation::reject(pool, user_id, err, received_at).await,
    };

    let on_time = deadline::is_on_time(task.deadline_at, received_at);
    let submission_id = db::insert_submission(
        pool,
        &NewSubmission {
            user_id,
            task_id,
            kind: draft.kind,
            content: draft.content,
            file_id: draft.file_id,
            file_path: draft.file_path,
            status: SubmissionStatus::Pending,
            is_on_time: on_time,
            submitted_at: received_at,
        },
    )
    .await?;
    db::clear_conversation(pool, user_id).await?;
    tracing::info!(user_id, task_id, submission_id, on_time, "report stored");

    let mut replies = vec![Reply::with_keyboard(
        user_id,
        accepted_text(&task, on_time),
        Keyboard::MainMenu,
    )];
    for &admin in admin_targets {
        replies.push(Reply::text(
            admin,
            format!(
                "📥 Новый отчет #{submission_id} по заданию «{}» от {}.\nПроверить: /pending",
                task.title,
                user.display_name()
            ),
        ));
    }
    Ok(replies)
}

struct Draft {
    kind: SubmissionKind,
    content: Option<String>,
    file_id: Option<String>,
    file_path: Option<String>,
}

fn draft_from_input(input: &StepInput<'_>) -> Result<Draft, ValidationError> {
    match input {
        StepInput::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(ValidationError::EmptyText);
            }
            Ok(Draft {
                kind: SubmissionKind::Text,
                content: Some(text.to_string()),
                file_id: None,
                file_path: None,
            })
        }
        StepInput::Media {
            kind,
            caption,
            attachment,
        } => Ok(Draft {
            kind: *kind,
            content: caption
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            file_id: Some(attachment.file_id.clone()),
            file_path: attachment.stored_path.clone(),
        }),
    }
}

fn accepted_text(task: &Task, on_time: bool) -> String {
    let mut text = format!(
        "✅ Отчет по заданию «{}» принят и передан на проверку!",
        task.title
    );
    if on_time {
        text.push_str("\n⏰ Отправлено в срок.");
    } else if let Some(deadline_at) = task.deadline_at {
        text.push_str(&format!(
            "\n⚠️ Дедлайн был {} и уже прошел, отчет отмечен как поздний.",
            time_utils::format_program_datetime(deadline_at)
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_task, seed_user, test_pool};
    use crate::domain::event::AttachmentRef;
    use crate::engine::conversation::ConversationState;
    use chrono::Duration;

    async fn put_in_submit_step(pool: &SqlitePool, user_id: i64, task_id: i64) {
        db::save_conversation(
            pool,
            user_id,
            &ConversationState::SubmitReport { task_id },
            Utc::now(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn report_at_the_exact_deadline_is_on_time() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let deadline = Utc::now() + Duration::hours(1);
        let task = seed_task(&pool, Some(deadline)).await;
        put_in_submit_step(&pool, 1, task.id).await;

        let replies = handle_report(
            &pool,
            &user,
            task.id,
            StepInput::Text("Посадил яблоню во дворе"),
            deadline,
            &[],
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("в срок"));

        let stored = db::get_submission(&pool, 1).await.unwrap().unwrap();
        assert!(stored.is_on_time);
        assert_eq!(stored.status, SubmissionStatus::Pending);
        assert_eq!(stored.submitted_at, deadline);
    }

    #[tokio::test]
    async fn report_after_the_deadline_is_flagged_late_but_kept() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let deadline = Utc::now() - Duration::hours(2);
        let task = seed_task(&pool, Some(deadline)).await;
        put_in_submit_step(&pool, 1, task.id).await;

        let replies = handle_report(
            &pool,
            &user,
            task.id,
            StepInput::Text("Посадил яблоню во дворе"),
            deadline + Duration::microseconds(1),
            &[],
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("поздний"));

        let stored = db::get_submission(&pool, 1).await.unwrap().unwrap();
        assert!(!stored.is_on_time);
        assert_eq!(stored.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn lateness_flag_survives_a_later_deadline_change() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let deadline = Utc::now() + Duration::days(1);
        let task = seed_task(&pool, Some(deadline)).await;
        put_in_submit_step(&pool, 1, task.id).await;

        handle_report(
            &pool,
            &user,
            task.id,
            StepInput::Text("Собрал макулатуру"),
            Utc::now(),
            &[],
        )
        .await
        .unwrap();

        // Tightening the deadline afterwards does not re-evaluate the flag.
        db::set_task_deadline(&pool, task.id, Some(Utc::now() - Duration::days(30)))
            .await
            .unwrap();
        let stored = db::get_submission(&pool, 1).await.unwrap().unwrap();
        assert!(stored.is_on_time);
    }

    #[tokio::test]
    async fn second_report_for_the_same_task_is_turned_away() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let task = seed_task(&pool, None).await;
        put_in_submit_step(&pool, 1, task.id).await;

        handle_report(&pool, &user, task.id, StepInput::Text("Готово"), Utc::now(), &[])
            .await
            .unwrap();
        put_in_submit_step(&pool, 1, task.id).await;
        let replies = handle_report(
            &pool,
            &user,
            task.id,
            StepInput::Text("Еще раз готово"),
            Utc::now(),
            &[],
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("уже отправляли"));

        let stats = db::user_submission_stats(&pool, 1).await.unwrap();
        assert_eq!(stats.total, 1);
        let (state, _) = db::load_conversation(&pool, 1).await.unwrap();
        assert_eq!(state, ConversationState::Idle);
    }

    #[tokio::test]
    async fn vanished_task_ends_the_flow_with_an_explanation() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let task = seed_task(&pool, None).await;
        put_in_submit_step(&pool, 1, task.id).await;
        db::delete_task_cascade(&pool, task.id).await.unwrap();

        let replies = handle_report(
            &pool,
            &user,
            task.id,
            StepInput::Text("Отчет в пустоту"),
            Utc::now(),
            &[],
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("недоступно"));
        let (state, _) = db::load_conversation(&pool, 1).await.unwrap();
        assert_eq!(state, ConversationState::Idle);
    }

    #[tokio::test]
    async fn media_report_keeps_file_reference_even_without_local_copy() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let task = seed_task(&pool, None).await;
        put_in_submit_step(&pool, 1, task.id).await;

        let attachment = AttachmentRef {
            file_id: "tg-file-9".to_string(),
            stored_path: None,
        };
        handle_report(
            &pool,
            &user,
            task.id,
            StepInput::Media {
                kind: SubmissionKind::Photo,
                caption: Some("  "),
                attachment: &attachment,
            },
            Utc::now(),
            &[99],
        )
        .await
        .unwrap();

        let stored = db::get_submission(&pool, 1).await.unwrap().unwrap();
        assert_eq!(stored.kind, SubmissionKind::Photo);
        assert_eq!(stored.file_id.as_deref(), Some("tg-file-9"));
        assert!(stored.file_path.is_none());
        assert!(stored.content.is_none());
    }

    #[tokio::test]
    async fn empty_text_report_is_rejected_and_step_survives() {
        let pool = test_pool().await;
        let user = seed_user(&pool, 1).await;
        let task = seed_task(&pool, None).await;
        put_in_submit_step(&pool, 1, task.id).await;

        let replies = handle_report(&pool, &user, task.id, StepInput::Text("   "), Utc::now(), &[])
            .await
            .unwrap();
        assert!(replies[0].text.contains("пустым"));
        let (state, _) = db::load_conversation(&pool, 1).await.unwrap();
        assert_eq!(state, ConversationState::SubmitReport { task_id: task.id });
    }
}
