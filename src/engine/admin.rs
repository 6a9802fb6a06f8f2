use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{self, NewTask};
use crate::domain::event::AdminCommand;
use crate::domain::models::InboxKind;
use crate::engine::reply::Reply;
use crate::services::moderation::{self, ModerationOutcome, PromoteOutcome};
use crate::services::retention;
use crate::state::AppState;
use crate::time_utils;

const HELP_TEXT: &str = "🛠 Команды организатора\n\n\
Проверка отчетов:\n\
/pending - отчеты в очереди\n\
/approve <id> - зачесть отчет\n\
/reject <id> - отклонить отчет\n\n\
Входящие вне режима сдачи:\n\
/inbox - неразобранные сообщения\n\
/assign <id записи> <id задания> - зачесть сообщение как отчет\n\
/done <id записи> - пометить разобранным\n\
/drop <id записи> - удалить запись\n\n\
Задания:\n\
/tasks - все задания\n\
/newtask Название | Описание | Ссылка | Открытие | Дедлайн\n\
/set_title <id> <текст>\n\
/set_desc <id> <текст>\n\
/set_link <id> <ссылка или «нет»>\n\
/set_deadline <id> <ДД.ММ.ГГГГ ЧЧ:ММ или «нет»>\n\
/toggle_task <id> - открыть или закрыть\n\
/del_task <id> - удалить вместе с отчетами\n\n\
Прочее:\n\
/close_support <id> - закрыть обращение\n\
/sweep - запустить очистку хранилища";

fn denied(actor: i64) -> Reply {
    Reply::text(actor, "❌ Команда доступна только организаторам.")
}

/// Correction for a recognized admin command with broken arguments.
pub fn usage_reply(state: &AppState, actor: i64, usage: &str) -> Vec<Reply> {
    if !state.config.admin_ids.allows(actor) {
        return vec![denied(actor)];
    }
    vec![Reply::text(actor, format!("Формат: {usage}"))]
}

/// Staff commands. The allow-list check sits here so every admin entry
/// point goes through the same gate.
pub async fn handle(state: &AppState, actor: i64, command: &AdminCommand) -> Result<Vec<Reply>> {
    if !state.config.admin_ids.allows(actor) {
        return Ok(vec![denied(actor)]);
    }
    let pool = &state.pool;
    match command {
        AdminCommand::Help => Ok(vec![Reply::text(actor, HELP_TEXT)]),
        AdminCommand::Pending => list_pending(pool, actor).await,
        AdminCommand::Approve(submission_id) => {
            verdict_replies(pool, actor, *submission_id, true).await
        }
        AdminCommand::Reject(submission_id) => {
            verdict_replies(pool, actor, *submission_id, false).await
        }
        AdminCommand::Inbox => list_inbox(pool, actor).await,
        AdminCommand::Assign { entry_id, task_id } => {
            assign_entry(pool, actor, *entry_id, *task_id, Utc::now()).await
        }
        AdminCommand::Done(entry_id) => {
            let text = if db::mark_inbox_processed(pool, *entry_id).await? {
                format!("✅ Запись #{entry_id} помечена разобранной.")
            } else {
                format!("Запись #{entry_id} не найдена.")
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::Drop(entry_id) => {
            let text = if db::delete_inbox_entry(pool, *entry_id).await? {
                format!("🗑 Запись #{entry_id} удалена.")
            } else {
                format!("Запись #{entry_id} не найдена.")
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::Tasks => list_tasks(pool, actor).await,
        AdminCommand::NewTask(args) => create_task(pool, actor, args).await,
        AdminCommand::SetTitle { task_id, value } => {
            let text = if db::set_task_title(pool, *task_id, value).await? {
                format!("✏️ Название задания #{task_id} обновлено.")
            } else {
                format!("Задание #{task_id} не найдено.")
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::SetDescription { task_id, value } => {
            let text = if db::set_task_description(pool, *task_id, value).await? {
                format!("✏️ Описание задания #{task_id} обновлено.")
            } else {
                format!("Задание #{task_id} не найдено.")
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::SetLink { task_id, value } => {
            let link = cleared_value(value);
            let text = if db::set_task_link(pool, *task_id, link).await? {
                match link {
                    Some(_) => format!("✏️ Ссылка задания #{task_id} обновлена."),
                    None => format!("✏️ Ссылка задания #{task_id} убрана."),
                }
            } else {
                format!("Задание #{task_id} не найдено.")
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::SetDeadline { task_id, value } => {
            set_deadline(pool, actor, *task_id, value).await
        }
        AdminCommand::ToggleTask(task_id) => {
            let Some(task) = db::get_task(pool, *task_id).await? else {
                return Ok(vec![Reply::text(
                    actor,
                    format!("Задание #{task_id} не найдено."),
                )]);
            };
            db::set_task_open(pool, *task_id, !task.is_open).await?;
            let text = if task.is_open {
                format!("🔒 Задание #{task_id} «{}» закрыто для сдачи.", task.title)
            } else {
                format!("🔓 Задание #{task_id} «{}» открыто для сдачи.", task.title)
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::DelTask(task_id) => {
            let text = match db::delete_task_cascade(pool, *task_id).await? {
                Some(submissions) => format!(
                    "🗑 Задание #{task_id} удалено вместе с отчетами ({submissions} шт.)."
                ),
                None => format!("Задание #{task_id} не найдено."),
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::CloseSupport(request_id) => {
            let text = if db::close_support_request(pool, *request_id).await? {
                format!("✅ Обращение #{request_id} закрыто.")
            } else {
                format!("Обращение #{request_id} не найдено.")
            };
            Ok(vec![Reply::text(actor, text)])
        }
        AdminCommand::Sweep => {
            let report = retention::run_sweep(pool, &state.config.retention, Utc::now()).await?;
            Ok(vec![Reply::text(
                actor,
                format!(
                    "🧹 Очистка завершена: удалено входящих {}, обращений в архив {}, брошенных сценариев {}.",
                    report.inbox_purged, report.support_archived, report.conversations_cleared
                ),
            )])
        }
    }
}

async fn list_pending(pool: &SqlitePool, actor: i64) -> Result<Vec<Reply>> {
    let pending = db::list_pending_submissions(pool, 10).await?;
    if pending.is_empty() {
        return Ok(vec![Reply::text(actor, "Очередь проверки пуста 🎉")]);
    }
    let mut lines = vec!["📥 Отчеты на проверке:".to_string()];
    for submission in &pending {
        lines.push(format!(
            "#{} · задание {} · {} · от {} · {}",
            submission.id,
            submission.task_id,
            submission.kind.label_ru(),
            submission.user_id,
            snippet(submission.content.as_deref())
        ));
    }
    lines.push("\nЗачесть: /approve <id> · Отклонить: /reject <id>".to_string());
    Ok(vec![Reply::text(actor, lines.join("\n"))])
}

async fn verdict_replies(
    pool: &SqlitePool,
    actor: i64,
    submission_id: i64,
    approve: bool,
) -> Result<Vec<Reply>> {
    let outcome = if approve {
        moderation::approve(pool, submission_id).await?
    } else {
        moderation::reject(pool, submission_id).await?
    };
    match outcome {
        ModerationOutcome::Missing => Ok(vec![Reply::text(
            actor,
            format!("Отчет #{submission_id} не найден."),
        )]),
        ModerationOutcome::Applied {
            submission,
            task_title,
        } => {
            let (admin_note, user_note) = if approve {
                (
                    format!("✅ Отчет #{submission_id} зачтен."),
                    format!("🎉 Ваш отчет по заданию «{task_title}» зачтен!"),
                )
            } else {
                (
                    format!("❌ Отчет #{submission_id} отклонен."),
                    format!(
                        "😔 Ваш отчет по заданию «{task_title}» отклонен. \
                         Если есть вопросы, напишите нам через «💬 Поддержка»."
                    ),
                )
            };
            Ok(vec![
                Reply::text(actor, admin_note),
                Reply::text(submission.user_id, user_note),
            ])
        }
    }
}

async fn list_inbox(pool: &SqlitePool, actor: i64) -> Result<Vec<Reply>> {
    let entries = db::list_unprocessed_inbox(pool, 10).await?;
    if entries.is_empty() {
        return Ok(vec![Reply::text(actor, "Входящие разобраны 🎉")]);
    }
    let mut lines = vec!["📨 Неразобранные сообщения:".to_string()];
    for entry in &entries {
        let content = match (&entry.payload.text, entry.payload.media) {
            (Some(text), _) => snippet(Some(text)),
            (None, Some(kind)) => format!("[{}]", kind.label_ru()),
            (None, None) => "без содержимого".to_string(),
        };
        lines.push(format!(
            "#{} · {} · от {} · {}",
            entry.id,
            inbox_kind_label(entry.kind),
            entry.user_id,
            content
        ));
    }
    lines.push(
        "\nЗачесть: /assign <id записи> <id задания> · Разобрано: /done <id> · Удалить: /drop <id>"
            .to_string(),
    );
    Ok(vec![Reply::text(actor, lines.join("\n"))])
}

async fn assign_entry(
    pool: &SqlitePool,
    actor: i64,
    entry_id: i64,
    task_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    match moderation::promote_entry(pool, entry_id, task_id, now).await? {
        PromoteOutcome::Promoted {
            submission_id,
            user_id,
            task_title,
            on_time,
        } => {
            let mut admin_note = format!(
                "✅ Запись #{entry_id} зачтена как отчет #{submission_id} по заданию «{task_title}»."
            );
            if !on_time {
                admin_note.push_str(" Отмечен как поздний.");
            }
            Ok(vec![
                Reply::text(actor, admin_note),
                Reply::text(
                    user_id,
                    format!(
                        "🎉 Организаторы зачли ваше сообщение как отчет по заданию «{task_title}»!"
                    ),
                ),
            ])
        }
        PromoteOutcome::AlreadyProcessed => Ok(vec![Reply::text(
            actor,
            format!("Запись #{entry_id} уже разобрана."),
        )]),
        PromoteOutcome::EntryMissing => Ok(vec![Reply::text(
            actor,
            format!("Запись #{entry_id} не найдена."),
        )]),
        PromoteOutcome::TaskMissing => Ok(vec![Reply::text(
            actor,
            format!("Задание #{task_id} не найдено, запись не тронута."),
        )]),
    }
}

async fn list_tasks(pool: &SqlitePool, actor: i64) -> Result<Vec<Reply>> {
    let tasks = db::list_all_tasks(pool).await?;
    if tasks.is_empty() {
        return Ok(vec![Reply::text(
            actor,
            "Заданий пока нет. Создать: /newtask",
        )]);
    }
    let mut lines = vec!["📚 Все задания:".to_string()];
    for task in &tasks {
        let deadline = task
            .deadline_at
            .map(time_utils::format_program_datetime)
            .unwrap_or_else(|| "нет".to_string());
        lines.push(format!(
            "#{} «{}» · {} · дедлайн: {}",
            task.id,
            task.title,
            if task.is_open { "открыто" } else { "закрыто" },
            deadline
        ));
    }
    Ok(vec![Reply::text(actor, lines.join("\n"))])
}

async fn create_task(pool: &SqlitePool, actor: i64, args: &str) -> Result<Vec<Reply>> {
    let fields: Vec<&str> = args.split('|').map(str::trim).collect();
    let title = fields.first().copied().unwrap_or("");
    if title.is_empty() {
        return Ok(vec![Reply::text(
            actor,
            "Формат: /newtask Название | Описание | Ссылка | Открытие | Дедлайн\n\
             Поля после названия можно оставлять пустыми. Даты: ДД.ММ.ГГГГ ЧЧ:ММ, время московское.",
        )]);
    }
    let opens_at = match field_opt(&fields, 3) {
        Some(raw) => match time_utils::parse_program_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => return Ok(vec![date_error(actor, raw)]),
        },
        None => None,
    };
    let deadline_at = match field_opt(&fields, 4) {
        Some(raw) => match time_utils::parse_program_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => return Ok(vec![date_error(actor, raw)]),
        },
        None => None,
    };
    let task_id = db::create_task(
        pool,
        &NewTask {
            title: title.to_string(),
            description: field_opt(&fields, 1).map(str::to_string),
            link: field_opt(&fields, 2).map(str::to_string),
            opens_at,
            deadline_at,
        },
        Utc::now(),
    )
    .await?;
    tracing::info!(task_id, "task created");
    Ok(vec![Reply::text(
        actor,
        format!("✅ Задание #{task_id} «{title}» создано."),
    )])
}

async fn set_deadline(
    pool: &SqlitePool,
    actor: i64,
    task_id: i64,
    value: &str,
) -> Result<Vec<Reply>> {
    let deadline_at = match cleared_value(value) {
        None => None,
        Some(raw) => match time_utils::parse_program_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => return Ok(vec![date_error(actor, raw)]),
        },
    };
    let text = if db::set_task_deadline(pool, task_id, deadline_at).await? {
        match deadline_at {
            Some(parsed) => format!(
                "⏰ Дедлайн задания #{task_id}: {}. Уже выставленные отметки о сроке не меняются.",
                time_utils::format_program_datetime(parsed)
            ),
            None => format!("⏰ Дедлайн задания #{task_id} снят."),
        }
    } else {
        format!("Задание #{task_id} не найдено.")
    };
    Ok(vec![Reply::text(actor, text)])
}

/// Empty markers admins type to clear an optional field.
fn cleared_value(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() || value == "-" || value.eq_ignore_ascii_case("none") {
        return None;
    }
    let lowered = value.to_lowercase();
    if lowered == "нет" {
        return None;
    }
    Some(value)
}

fn field_opt<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields
        .get(index)
        .copied()
        .filter(|field| !field.is_empty() && *field != "-")
}

fn date_error(actor: i64, raw: &str) -> Reply {
    Reply::text(
        actor,
        format!("Не понял дату «{raw}». Формат: ДД.ММ.ГГГГ ЧЧ:ММ, время московское."),
    )
}

fn inbox_kind_label(kind: InboxKind) -> &'static str {
    match kind {
        InboxKind::Unregistered => "не зарегистрирован",
        InboxKind::PotentialReport => "похоже на отчет",
        InboxKind::Unknown => "непонятное",
        InboxKind::StepInput => "шаг сценария",
    }
}

fn snippet(text: Option<&str>) -> String {
    match text {
        Some(text) => {
            let text = text.trim();
            let cut: String = text.chars().take(60).collect();
            if text.chars().count() > 60 {
                format!("{cut}…")
            } else {
                cut
            }
        }
        None => "без текста".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_task, seed_user, test_pool};
    use crate::domain::models::{InboxPayload, SubmissionKind, SubmissionStatus};
    use crate::state::AppState;
    use chrono::Duration;

    // The test config allows only user 99.
    const ADMIN: i64 = 99;

    #[tokio::test]
    async fn outsiders_are_turned_away() {
        let state = AppState::for_tests().await;
        let replies = handle(&state, 5, &AdminCommand::Help).await.unwrap();
        assert!(replies[0].text.contains("только организаторам"));
    }

    #[tokio::test]
    async fn verdict_notifies_the_author() {
        let state = AppState::for_tests().await;
        seed_user(&state.pool, 1).await;
        let task = seed_task(&state.pool, None).await;
        let submission_id = db::insert_submission(
            &state.pool,
            &db::NewSubmission {
                user_id: 1,
                task_id: task.id,
                kind: SubmissionKind::Text,
                content: Some("готово".to_string()),
                file_id: None,
                file_path: None,
                status: SubmissionStatus::Pending,
                is_on_time: true,
                submitted_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let replies = handle(&state, ADMIN, &AdminCommand::Approve(submission_id))
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].to, ADMIN);
        assert_eq!(replies[1].to, 1);
        assert!(replies[1].text.contains("зачтен"));
    }

    #[tokio::test]
    async fn assigning_an_entry_reports_to_both_sides() {
        let state = AppState::for_tests().await;
        seed_user(&state.pool, 1).await;
        let task = seed_task(&state.pool, Some(Utc::now() + Duration::days(1))).await;
        let payload = InboxPayload {
            text: Some("Посадил три дерева".to_string()),
            ..Default::default()
        };
        let entry_id = db::insert_inbox_entry(
            &state.pool,
            1,
            InboxKind::PotentialReport,
            &payload,
            Utc::now(),
        )
        .await
        .unwrap();

        let replies = handle(
            &state,
            ADMIN,
            &AdminCommand::Assign {
                entry_id,
                task_id: task.id,
            },
        )
        .await
        .unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].text.contains("зачтена"));
        assert_eq!(replies[1].to, 1);

        let again = handle(
            &state,
            ADMIN,
            &AdminCommand::Assign {
                entry_id,
                task_id: task.id,
            },
        )
        .await
        .unwrap();
        assert!(again[0].text.contains("уже разобрана"));
    }

    #[tokio::test]
    async fn newtask_parses_the_pipe_format() {
        let state = AppState::for_tests().await;
        let replies = handle(
            &state,
            ADMIN,
            &AdminCommand::NewTask(
                "Собери макулатуру | Сдай не меньше 5 кг | | | 07.03.2026 23:59".to_string(),
            ),
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("#1"));

        let task = db::get_task(&state.pool, 1).await.unwrap().unwrap();
        assert_eq!(task.title, "Собери макулатуру");
        assert_eq!(task.description.as_deref(), Some("Сдай не меньше 5 кг"));
        assert!(task.link.is_none());
        assert!(task.deadline_at.is_some());
        assert!(task.is_open);
    }

    #[tokio::test]
    async fn newtask_rejects_a_broken_date() {
        let state = AppState::for_tests().await;
        let replies = handle(
            &state,
            ADMIN,
            &AdminCommand::NewTask("Задание | | | позавчера | ".to_string()),
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("Не понял дату"));
        assert!(db::get_task(&state.pool, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deadline_can_be_cleared_with_a_word() {
        let state = AppState::for_tests().await;
        let task = seed_task(&state.pool, Some(Utc::now())).await;
        let replies = handle(
            &state,
            ADMIN,
            &AdminCommand::SetDeadline {
                task_id: task.id,
                value: "нет".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("снят"));
        let task = db::get_task(&state.pool, task.id).await.unwrap().unwrap();
        assert!(task.deadline_at.is_none());
    }

    #[tokio::test]
    async fn toggle_flips_the_open_flag() {
        let state = AppState::for_tests().await;
        let task = seed_task(&state.pool, None).await;
        handle(&state, ADMIN, &AdminCommand::ToggleTask(task.id))
            .await
            .unwrap();
        let closed = db::get_task(&state.pool, task.id).await.unwrap().unwrap();
        assert!(!closed.is_open);
        handle(&state, ADMIN, &AdminCommand::ToggleTask(task.id))
            .await
            .unwrap();
        let reopened = db::get_task(&state.pool, task.id).await.unwrap().unwrap();
        assert!(reopened.is_open);
    }

    #[tokio::test]
    async fn sweep_reports_the_numbers() {
        let state = AppState::for_tests().await;
        let replies = handle(&state, ADMIN, &AdminCommand::Sweep).await.unwrap();
        assert!(replies[0].text.contains("Очистка завершена"));
    }
}
