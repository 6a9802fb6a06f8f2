pub mod admin;
pub mod conversation;
pub mod reply;
pub mod submission;
pub mod triage;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::db::{self, SubmissionStats, Task, User};
use crate::domain::event::{
    AttachmentRef, CallbackCommand, EventPayload, InboundEvent, MenuCommand,
};
use crate::domain::models::{InboxKind, InboxPayload, SubmissionKind};
use crate::engine::conversation::{ConversationState, StepInput};
use crate::engine::reply::{Keyboard, Reply, TaskButton};
use crate::state::AppState;
use crate::time_utils;

const GAME_RULES: &str = "📋 Правила игры\n\n\
1. Зарегистрируйтесь и выберите форму участия.\n\
2. Каждую неделю в банке появляются новые экозадания.\n\
3. Выполняйте задания и сдавайте отчеты через «📤 Отправить задание на проверку».\n\
4. Организаторы проверяют отчеты и ставят зачет.\n\
5. Отчеты после дедлайна принимаются, но помечаются как поздние.\n\n\
Удачи! 🌱";

const INSTRUCTIONS: &str = "📖 Как сдать отчет\n\n\
1. Нажмите «📤 Отправить задание на проверку».\n\
2. Выберите задание из списка.\n\
3. Пришлите отчет одним сообщением: текст, фото, видео или документ.\n\n\
Статусы отчетов смотрите в «📊 Мой результат». \
Вопросы задавайте через «💬 Поддержка».";

const ABOUT: &str = "ℹ️ Об экодвижении\n\n\
Мы объединяем семьи и волонтеров, чтобы каждую неделю делать для природы города \
что-то ощутимое. Игра с заданиями превращает полезные привычки в общее дело.\n\n\
По любым вопросам пишите через «💬 Поддержка».";

/// Single entry point for everything the transport delivers. Runs under the
/// per-user lock, so transitions for one user never interleave. A storage
/// error is caught here: the step is left as it was and the user gets an
/// apology instead of silence.
pub async fn handle_event(state: &AppState, event: InboundEvent) -> Result<Vec<Reply>> {
    let user_id = event.user_id;
    let _guard = state.locks.acquire(user_id).await;

    if let Err(err) = db::upsert_contact(&state.pool, user_id, &event.profile, event.received_at)
        .await
    {
        tracing::error!(user_id, error = %err, "contact upsert failed");
        return Ok(vec![storage_trouble(user_id)]);
    }

    match dispatch(state, &event).await {
        Ok(replies) => Ok(replies),
        Err(err) => {
            tracing::error!(user_id, error = %err, "event handling failed, step left as it was");
            Ok(vec![storage_trouble(user_id)])
        }
    }
}

fn storage_trouble(user_id: i64) -> Reply {
    Reply::text(
        user_id,
        "⚠️ Временный сбой на нашей стороне. Ваше сообщение не потеряно, повторите действие чуть позже.",
    )
}

async fn dispatch(state: &AppState, event: &InboundEvent) -> Result<Vec<Reply>> {
    let pool = &state.pool;
    let user = db::find_user(pool, event.user_id)
        .await?
        .context("user row missing right after contact upsert")?;
    let (conv, _) = db::load_conversation(pool, event.user_id).await?;

    match &event.payload {
        EventPayload::Admin(command) => admin::handle(state, event.user_id, command).await,
        EventPayload::AdminUsage(usage) => Ok(admin::usage_reply(state, event.user_id, usage)),
        EventPayload::Command(command) => {
            handle_menu(state, &user, &conv, *command, event.received_at).await
        }
        EventPayload::Callback(command) => {
            handle_callback(state, &user, *command, event.received_at).await
        }
        EventPayload::Text(text) => {
            handle_content(state, &user, conv, Some(text.as_str()), None, event.received_at).await
        }
        EventPayload::Media {
            kind,
            caption,
            attachment,
        } => {
            handle_content(
                state,
                &user,
                conv,
                caption.as_deref(),
                Some((*kind, attachment)),
                event.received_at,
            )
            .await
        }
    }
}

// ========== Menu commands ==========

async fn handle_menu(
    state: &AppState,
    user: &User,
    conv: &ConversationState,
    command: MenuCommand,
    received_at: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    let pool = &state.pool;
    let user_id = user.user_id;

    // /start picks a persisted step back up instead of dropping it.
    if command == MenuCommand::Start && *conv != ConversationState::Idle {
        return Ok(vec![conversation::resume_prompt(conv).into_reply(user_id)]);
    }
    // Every other top-level command abandons whatever step was active.
    if command != MenuCommand::Start {
        db::clear_conversation(pool, user_id).await?;
    }

    match command {
        MenuCommand::Start => Ok(vec![start_reply(user)]),
        MenuCommand::MainMenu => Ok(vec![menu_reply(user)]),
        MenuCommand::Register => {
            if user.registered {
                Ok(vec![Reply::with_keyboard(
                    user_id,
                    "Вы уже зарегистрированы ✅",
                    Keyboard::MainMenu,
                )])
            } else {
                conversation::enter(
                    pool,
                    user_id,
                    ConversationState::RegisterLastName,
                    received_at,
                )
                .await
            }
        }
        MenuCommand::SubmitReport => {
            if !user.registered {
                return Ok(vec![need_registration(user_id)]);
            }
            let tasks = db::list_open_tasks(pool, received_at).await?;
            if tasks.is_empty() {
                return Ok(vec![Reply::with_keyboard(
                    user_id,
                    "Сейчас нет заданий, открытых для сдачи. Загляните позже 🌿",
                    Keyboard::MainMenu,
                )]);
            }
            let buttons = tasks.iter().map(TaskButton::from_task).collect();
            Ok(vec![Reply::with_keyboard(
                user_id,
                "Выберите задание, по которому сдаете отчет:",
                Keyboard::TaskPicker(buttons),
            )])
        }
        MenuCommand::TaskBank => {
            let tasks = db::list_open_tasks(pool, received_at).await?;
            Ok(vec![Reply::with_keyboard(
                user_id,
                task_bank_text(&tasks),
                page_keyboard(user),
            )])
        }
        MenuCommand::MyResults => {
            if !user.registered {
                return Ok(vec![need_registration(user_id)]);
            }
            let stats = db::user_submission_stats(pool, user_id).await?;
            Ok(vec![Reply::with_keyboard(
                user_id,
                results_text(user, &stats),
                Keyboard::MainMenu,
            )])
        }
        MenuCommand::EditProfile => {
            if !user.registered {
                return Ok(vec![need_registration(user_id)]);
            }
            Ok(vec![Reply::with_keyboard(
                user_id,
                "✏️ Что изменить?",
                Keyboard::EditProfile,
            )])
        }
        MenuCommand::EditFirstName => {
            if !user.registered {
                return Ok(vec![need_registration(user_id)]);
            }
            conversation::enter(pool, user_id, ConversationState::EditFirstName, received_at).await
        }
        MenuCommand::EditLastName => {
            if !user.registered {
                return Ok(vec![need_registration(user_id)]);
            }
            conversation::enter(pool, user_id, ConversationState::EditLastName, received_at).await
        }
        MenuCommand::Support => {
            conversation::enter(pool, user_id, ConversationState::SupportMessage, received_at)
                .await
        }
        MenuCommand::GameRules => Ok(vec![Reply::with_keyboard(
            user_id,
            GAME_RULES,
            page_keyboard(user),
        )]),
        MenuCommand::Instructions => Ok(vec![Reply::with_keyboard(
            user_id,
            INSTRUCTIONS,
            page_keyboard(user),
        )]),
        MenuCommand::About => Ok(vec![Reply::with_keyboard(
            user_id,
            ABOUT,
            page_keyboard(user),
        )]),
    }
}

fn start_reply(user: &User) -> Reply {
    if user.registered {
        Reply::with_keyboard(
            user.user_id,
            format!(
                "С возвращением, {}! 🌱\nВыбирайте действие в меню.",
                user.display_name()
            ),
            Keyboard::MainMenu,
        )
    } else {
        Reply::with_keyboard(
            user.user_id,
            "🌱 Привет! Это игра экодвижения: каждую неделю задания, отчеты и общий результат.\n\n\
             Чтобы участвовать, зарегистрируйтесь.",
            Keyboard::Register,
        )
    }
}

fn menu_reply(user: &User) -> Reply {
    if user.registered {
        Reply::with_keyboard(
            user.user_id,
            "Главное меню. Выберите действие:",
            Keyboard::MainMenu,
        )
    } else {
        Reply::with_keyboard(
            user.user_id,
            "Сначала зарегистрируйтесь, это быстро 🙂",
            Keyboard::Register,
        )
    }
}

fn need_registration(user_id: i64) -> Reply {
    Reply::with_keyboard(
        user_id,
        "Этот раздел доступен после регистрации 🙂",
        Keyboard::Register,
    )
}

fn page_keyboard(user: &User) -> Keyboard {
    if user.registered {
        Keyboard::MainMenu
    } else {
        Keyboard::Register
    }
}

fn task_bank_text(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "📚 Банк заданий пока пуст. Новые задания появляются каждую неделю.".to_string();
    }
    let mut lines = vec!["📚 Открытые задания:".to_string()];
    for task in tasks {
        match task.week_number {
            Some(week) => lines.push(format!("\n🌿 Неделя {week}: {}", task.title)),
            None => lines.push(format!("\n🌿 {}", task.title)),
        }
        if let Some(description) = &task.description {
            lines.push(description.clone());
        }
        if let Some(link) = &task.link {
            lines.push(format!("🔗 {link}"));
        }
        match task.deadline_at {
            Some(deadline) => lines.push(format!(
                "⏰ До {} (МСК)",
                time_utils::format_program_datetime(deadline)
            )),
            None => lines.push("⏰ Без дедлайна".to_string()),
        }
    }
    lines.join("\n")
}

fn results_text(user: &User, stats: &SubmissionStats) -> String {
    format!(
        "📊 Результат: {}\n\n\
         Отправлено отчетов: {}\n\
         ✅ Зачтено: {}\n\
         ⏳ На проверке: {}\n\
         ❌ Отклонено: {}\n\
         ⏰ Сдано в срок: {}",
        user.display_name(),
        stats.total,
        stats.approved,
        stats.pending,
        stats.rejected,
        stats.on_time
    )
}

// ========== Callbacks ==========

async fn handle_callback(
    state: &AppState,
    user: &User,
    command: CallbackCommand,
    received_at: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    let pool = &state.pool;
    let user_id = user.user_id;
    match command {
        CallbackCommand::MainMenu => {
            db::clear_conversation(pool, user_id).await?;
            Ok(vec![menu_reply(user)])
        }
        CallbackCommand::SubmitTask(task_id) => {
            if !user.registered {
                return Ok(vec![need_registration(user_id)]);
            }
            let Some(task) = db::get_task(pool, task_id).await? else {
                return Ok(vec![Reply::with_keyboard(
                    user_id,
                    "⚠️ Это задание больше недоступно.",
                    Keyboard::MainMenu,
                )]);
            };
            let open_now = task.is_open
                && task.opens_at.map(|at| at <= received_at).unwrap_or(true)
                && task.deadline_at.map(|at| at > received_at).unwrap_or(true);
            if !open_now {
                return Ok(vec![Reply::with_keyboard(
                    user_id,
                    format!("⏰ Прием отчетов по заданию «{}» закрыт.", task.title),
                    Keyboard::MainMenu,
                )]);
            }
            if db::has_submission(pool, user_id, task_id).await? {
                return Ok(vec![Reply::with_keyboard(
                    user_id,
                    format!("Вы уже отправляли отчет по заданию «{}».", task.title),
                    Keyboard::MainMenu,
                )]);
            }
            let next = ConversationState::SubmitReport { task_id };
            db::save_conversation(pool, user_id, &next, received_at).await?;
            let prompt = conversation::prompt_for(&next);
            Ok(vec![Reply {
                to: user_id,
                text: format!("📌 Задание «{}»\n\n{}", task.title, prompt.text),
                keyboard: prompt.keyboard,
            }])
        }
    }
}

// ========== Free-form content ==========

/// Text and media that are not commands. An active step consumes them,
/// otherwise they fall through to triage.
async fn handle_content(
    state: &AppState,
    user: &User,
    conv: ConversationState,
    text: Option<&str>,
    media: Option<(SubmissionKind, &AttachmentRef)>,
    received_at: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    let pool = &state.pool;
    if conv == ConversationState::Idle {
        return triage::handle_unclaimed(
            pool,
            user,
            text,
            media,
            state.config.report_min_chars,
            received_at,
        )
        .await;
    }

    // Journal first: if the process dies inside the transition, the input
    // survives in the inbox and the step itself was not advanced yet.
    let journal_id = journal_input(pool, user.user_id, text, media, received_at).await;
    let input = match (media, text) {
        (Some((kind, attachment)), caption) => StepInput::Media {
            kind,
            caption,
            attachment,
        },
        (None, Some(text)) => StepInput::Text(text),
        (None, None) => StepInput::Text(""),
    };
    let replies = conversation::advance(
        pool,
        user,
        conv,
        input,
        received_at,
        state.config.admin_ids.notify_targets(),
    )
    .await?;
    if let Some(entry_id) = journal_id {
        if let Err(err) = db::mark_inbox_processed(pool, entry_id).await {
            tracing::warn!(user_id = user.user_id, entry_id, error = %err, "journal entry left unprocessed");
        }
    }
    Ok(replies)
}

async fn journal_input(
    pool: &sqlx::SqlitePool,
    user_id: i64,
    text: Option<&str>,
    media: Option<(SubmissionKind, &AttachmentRef)>,
    received_at: DateTime<Utc>,
) -> Option<i64> {
    let payload = InboxPayload {
        text: text.map(str::to_string),
        media: media.map(|(kind, _)| kind),
        file_id: media.map(|(_, attachment)| attachment.file_id.clone()),
        file_path: media.and_then(|(_, attachment)| attachment.stored_path.clone()),
    };
    match db::insert_inbox_entry(pool, user_id, InboxKind::StepInput, &payload, received_at).await {
        Ok(entry_id) => Some(entry_id),
        Err(err) => {
            tracing::error!(user_id, error = %err, "journal write failed, continuing without it");
            None
        }
    }
}
