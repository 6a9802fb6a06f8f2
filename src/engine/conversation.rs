use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::{self, User};
use crate::domain::event::AttachmentRef;
use crate::domain::models::{Participation, SubmissionKind};
use crate::engine::reply::{Keyboard, Reply};
use crate::engine::submission;

/// The persisted step of a multi-step flow. Stored as JSON in a single
/// column, so adding a variant never needs a schema change. An unknown
/// `step` tag from an older build deserializes as an error and the loader
/// falls back to `Idle`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", content = "data", rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    RegisterLastName,
    RegisterFirstName {
        last_name: String,
    },
    RegisterParticipation {
        last_name: String,
        first_name: String,
    },
    RegisterFamilySize {
        last_name: String,
        first_name: String,
    },
    RegisterChildrenInfo {
        last_name: String,
        first_name: String,
        family_size: i64,
    },
    SubmitReport {
        task_id: i64,
    },
    EditFirstName,
    EditLastName,
    SupportMessage,
}

/// What the user sent into the current step, already stripped of transport
/// details by the bot layer.
#[derive(Clone, Copy, Debug)]
pub enum StepInput<'a> {
    Text(&'a str),
    Media {
        kind: SubmissionKind,
        caption: Option<&'a str>,
        attachment: &'a AttachmentRef,
    },
}

/// A failed validation. The display text doubles as the correction prompt
/// sent back to the user, so the step can be retried immediately.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Слишком коротко. Введите минимум 2 символа:")]
    NameTooShort,
    #[error("Не получилось прочитать число. Введите число от 1 до 10:")]
    FamilySizeNotANumber,
    #[error("Количество участников должно быть от 1 до 10. Попробуйте еще раз:")]
    FamilySizeOutOfRange,
    #[error("Пожалуйста, выберите форму участия кнопкой ниже.")]
    UnknownParticipation,
    #[error("Здесь нужен текстовый ответ. Отправьте сообщение текстом:")]
    TextExpected,
    #[error("Сообщение получилось пустым. Напишите текст и отправьте еще раз:")]
    EmptyText,
}

// ========== Validators ==========

pub fn validate_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.chars().count() < 2 {
        return Err(ValidationError::NameTooShort);
    }
    Ok(name.to_string())
}

pub fn parse_participation(raw: &str) -> Result<Participation, ValidationError> {
    let lowered = raw.trim().to_lowercase();
    if lowered.contains("индивид") {
        return Ok(Participation::Individual);
    }
    if lowered.contains("семе") || lowered.contains("семь") {
        return Ok(Participation::Family);
    }
    Err(ValidationError::UnknownParticipation)
}

pub fn validate_family_size(raw: &str) -> Result<i64, ValidationError> {
    let size: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::FamilySizeNotANumber)?;
    if !(1..=10).contains(&size) {
        return Err(ValidationError::FamilySizeOutOfRange);
    }
    Ok(size)
}

/// "нет" and its spellings mean the family participates without children.
pub fn validate_children_info(raw: &str) -> Result<Option<String>, ValidationError> {
    let info = raw.trim();
    if info.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let lowered = info.to_lowercase();
    if lowered == "нет" || lowered == "-" || lowered == "без детей" {
        return Ok(None);
    }
    Ok(Some(info.to_string()))
}

fn validate_free_text(raw: &str) -> Result<String, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(text.to_string())
}

fn require_text<'a>(input: &StepInput<'a>) -> Result<&'a str, ValidationError> {
    match input {
        StepInput::Text(text) => Ok(text),
        StepInput::Media { .. } => Err(ValidationError::TextExpected),
    }
}

// ========== Prompts ==========

#[derive(Clone, Debug)]
pub struct Prompt {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Prompt {
    pub fn into_reply(self, to: i64) -> Reply {
        Reply {
            to,
            text: self.text,
            keyboard: self.keyboard,
        }
    }
}

/// The message asking for the current step's input. Pure, so entering a
/// step and resuming it after a restart render exactly the same prompt.
pub fn prompt_for(state: &ConversationState) -> Prompt {
    let (text, keyboard) = match state {
        ConversationState::Idle => (
            "Вы в главном меню. Выберите действие:".to_string(),
            Some(Keyboard::MainMenu),
        ),
        ConversationState::RegisterLastName => (
            "📝 Регистрация\n\nВведите вашу фамилию:".to_string(),
            None,
        ),
        ConversationState::RegisterFirstName { .. } => ("Введите ваше имя:".to_string(), None),
        ConversationState::RegisterParticipation { .. } => (
            "Выберите форму участия:".to_string(),
            Some(Keyboard::Participation),
        ),
        ConversationState::RegisterFamilySize { .. } => (
            "Сколько человек участвует от вашей семьи? Введите число от 1 до 10:".to_string(),
            None,
        ),
        ConversationState::RegisterChildrenInfo { .. } => (
            "Укажите имена и возраст детей-участников. Если дети не участвуют, напишите «нет»:"
                .to_string(),
            None,
        ),
        ConversationState::SubmitReport { task_id } => (
            format!(
                "📤 Отправьте отчет по заданию #{task_id}: текстом, фото, видео или документом."
            ),
            None,
        ),
        ConversationState::EditFirstName => ("Введите новое имя:".to_string(), None),
        ConversationState::EditLastName => ("Введите новую фамилию:".to_string(), None),
        ConversationState::SupportMessage => (
            "💬 Опишите ваш вопрос одним сообщением, мы передадим его организаторам:".to_string(),
            None,
        ),
    };
    Prompt { text, keyboard }
}

/// Prompt shown when an inbound event finds a step persisted before a
/// restart. Same prompt as on entry, with a banner explaining the replay.
pub fn resume_prompt(state: &ConversationState) -> Prompt {
    let prompt = prompt_for(state);
    Prompt {
        text: format!("🔄 Восстановление сессии\n\n{}", prompt.text),
        keyboard: prompt.keyboard,
    }
}

// ========== Transitions ==========

/// Persists `next` and renders its prompt. Menu handlers call this to start
/// a flow; `advance` calls it to move to the following step.
pub async fn enter(
    pool: &SqlitePool,
    user_id: i64,
    next: ConversationState,
    now: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    db::save_conversation(pool, user_id, &next, now).await?;
    Ok(vec![prompt_for(&next).into_reply(user_id)])
}

/// Rejected input: the step stays as it is, only the attempt counter moves.
/// From the third failure on, the correction prompt mentions /cancel.
pub(crate) async fn reject(
    pool: &SqlitePool,
    user_id: i64,
    error: ValidationError,
    now: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    let attempts = db::bump_invalid_attempts(pool, user_id, now).await?;
    let mut text = error.to_string();
    if attempts >= 3 {
        text.push_str("\n\nℹ️ Выйти в главное меню: /cancel");
    }
    Ok(vec![Reply::text(user_id, text)])
}

/// Feeds one piece of input into the persisted step. Valid input moves the
/// flow forward (or completes it), invalid input re-prompts without moving.
pub async fn advance(
    pool: &SqlitePool,
    user: &User,
    state: ConversationState,
    input: StepInput<'_>,
    received_at: DateTime<Utc>,
    admin_targets: &[i64],
) -> Result<Vec<Reply>> {
    let user_id = user.user_id;
    match state {
        ConversationState::Idle => {
            Ok(vec![prompt_for(&ConversationState::Idle).into_reply(user_id)])
        }
        ConversationState::RegisterLastName => {
            match require_text(&input).and_then(validate_name) {
                Ok(last_name) => {
                    enter(
                        pool,
                        user_id,
                        ConversationState::RegisterFirstName { last_name },
                        received_at,
                    )
                    .await
                }
                Err(err) => reject(pool, user_id, err, received_at).await,
            }
        }
        ConversationState::RegisterFirstName { last_name } => {
            match require_text(&input).and_then(validate_name) {
                Ok(first_name) => {
                    enter(
                        pool,
                        user_id,
                        ConversationState::RegisterParticipation {
                            last_name,
                            first_name,
                        },
                        received_at,
                    )
                    .await
                }
                Err(err) => reject(pool, user_id, err, received_at).await,
            }
        }
        ConversationState::RegisterParticipation {
            last_name,
            first_name,
        } => match require_text(&input).and_then(parse_participation) {
            Ok(Participation::Individual) => {
                db::complete_registration(
                    pool,
                    user_id,
                    &first_name,
                    &last_name,
                    Participation::Individual,
                    1,
                    None,
                )
                .await?;
                db::clear_conversation(pool, user_id).await?;
                tracing::info!(user_id, "registration completed");
                Ok(vec![Reply::with_keyboard(
                    user_id,
                    registered_text(&first_name, &last_name, Participation::Individual, 1),
                    Keyboard::MainMenu,
                )])
            }
            Ok(Participation::Family) => {
                enter(
                    pool,
                    user_id,
                    ConversationState::RegisterFamilySize {
                        last_name,
                        first_name,
                    },
                    received_at,
                )
                .await
            }
            Err(err) => reject(pool, user_id, err, received_at).await,
        },
        ConversationState::RegisterFamilySize {
            last_name,
            first_name,
        } => match require_text(&input).and_then(validate_family_size) {
            Ok(family_size) => {
                enter(
                    pool,
                    user_id,
                    ConversationState::RegisterChildrenInfo {
                        last_name,
                        first_name,
                        family_size,
                    },
                    received_at,
                )
                .await
            }
            Err(err) => reject(pool, user_id, err, received_at).await,
        },
        ConversationState::RegisterChildrenInfo {
            last_name,
            first_name,
            family_size,
        } => match require_text(&input).and_then(validate_children_info) {
            Ok(children_info) => {
                db::complete_registration(
                    pool,
                    user_id,
                    &first_name,
                    &last_name,
                    Participation::Family,
                    family_size,
                    children_info.as_deref(),
                )
                .await?;
                db::clear_conversation(pool, user_id).await?;
                tracing::info!(user_id, family_size, "registration completed");
                Ok(vec![Reply::with_keyboard(
                    user_id,
                    registered_text(&first_name, &last_name, Participation::Family, family_size),
                    Keyboard::MainMenu,
                )])
            }
            Err(err) => reject(pool, user_id, err, received_at).await,
        },
        ConversationState::SubmitReport { task_id } => {
            submission::handle_report(pool, user, task_id, input, received_at, admin_targets).await
        }
        ConversationState::EditFirstName => match require_text(&input).and_then(validate_name) {
            Ok(first_name) => {
                db::update_first_name(pool, user_id, &first_name).await?;
                db::clear_conversation(pool, user_id).await?;
                Ok(vec![Reply::with_keyboard(
                    user_id,
                    format!("✅ Имя обновлено: {first_name}"),
                    Keyboard::MainMenu,
                )])
            }
            Err(err) => reject(pool, user_id, err, received_at).await,
        },
        ConversationState::EditLastName => match require_text(&input).and_then(validate_name) {
            Ok(last_name) => {
                db::update_last_name(pool, user_id, &last_name).await?;
                db::clear_conversation(pool, user_id).await?;
                Ok(vec![Reply::with_keyboard(
                    user_id,
                    format!("✅ Фамилия обновлена: {last_name}"),
                    Keyboard::MainMenu,
                )])
            }
            Err(err) => reject(pool, user_id, err, received_at).await,
        },
        ConversationState::SupportMessage => match require_text(&input).and_then(validate_free_text)
        {
            Ok(message) => {
                let request_id =
                    db::insert_support_request(pool, user_id, &message, received_at).await?;
                db::clear_conversation(pool, user_id).await?;
                tracing::info!(user_id, request_id, "support request filed");
                let mut replies = vec![Reply::with_keyboard(
                    user_id,
                    format!("✅ Обращение #{request_id} передано организаторам. Ответ придет сюда же."),
                    Keyboard::MainMenu,
                )];
                for &admin in admin_targets {
                    replies.push(Reply::text(
                        admin,
                        format!(
                            "💬 Обращение #{request_id} от {}:\n{message}\n\nЗакрыть: /close_support {request_id}",
                            user.display_name()
                        ),
                    ));
                }
                Ok(replies)
            }
            Err(err) => reject(pool, user_id, err, received_at).await,
        },
    }
}

fn registered_text(
    first_name: &str,
    last_name: &str,
    participation: Participation,
    family_size: i64,
) -> String {
    let mut text =
        format!("🎉 Регистрация завершена!\n\n{first_name} {last_name}, добро пожаловать в игру!");
    if participation == Participation::Family {
        text.push_str(&format!("\nФормат участия: семейный, {family_size} чел."));
    }
    text.push_str("\n\nВыбирайте задание в банке заданий и присылайте отчеты.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::domain::event::ChatProfile;

    async fn contact(pool: &SqlitePool, user_id: i64) -> User {
        let profile = ChatProfile {
            username: None,
            first_name: Some("Тест".to_string()),
            last_name: None,
        };
        db::upsert_contact(pool, user_id, &profile, Utc::now())
            .await
            .unwrap();
        db::find_user(pool, user_id).await.unwrap().unwrap()
    }

    async fn drive(pool: &SqlitePool, user: &User, text: &str) -> Vec<Reply> {
        let (state, _) = db::load_conversation(pool, user.user_id).await.unwrap();
        advance(pool, user, state, StepInput::Text(text), Utc::now(), &[])
            .await
            .unwrap()
    }

    #[test]
    fn names_need_at_least_two_characters() {
        assert_eq!(validate_name("Я"), Err(ValidationError::NameTooShort));
        assert_eq!(validate_name("  Ли  "), Ok("Ли".to_string()));
    }

    #[test]
    fn family_size_is_bounded() {
        assert_eq!(validate_family_size("1"), Ok(1));
        assert_eq!(validate_family_size(" 10 "), Ok(10));
        assert_eq!(
            validate_family_size("0"),
            Err(ValidationError::FamilySizeOutOfRange)
        );
        assert_eq!(
            validate_family_size("11"),
            Err(ValidationError::FamilySizeOutOfRange)
        );
        assert_eq!(
            validate_family_size("трое"),
            Err(ValidationError::FamilySizeNotANumber)
        );
    }

    #[test]
    fn children_answer_no_means_none() {
        assert_eq!(validate_children_info(" НЕТ "), Ok(None));
        assert_eq!(
            validate_children_info("Маша, 8 лет"),
            Ok(Some("Маша, 8 лет".to_string()))
        );
    }

    #[test]
    fn participation_accepts_buttons_and_plain_words() {
        assert_eq!(
            parse_participation("👤 Индивидуальное участие"),
            Ok(Participation::Individual)
        );
        assert_eq!(parse_participation("семейное"), Ok(Participation::Family));
        assert_eq!(parse_participation("семья"), Ok(Participation::Family));
        assert_eq!(
            parse_participation("не знаю"),
            Err(ValidationError::UnknownParticipation)
        );
    }

    #[test]
    fn persisted_step_format_is_stable() {
        let state = ConversationState::RegisterFirstName {
            last_name: "Петров".to_string(),
        };
        let raw = serde_json::to_string(&state).unwrap();
        assert_eq!(
            raw,
            r#"{"step":"register_first_name","data":{"last_name":"Петров"}}"#
        );
        assert_eq!(
            serde_json::to_string(&ConversationState::Idle).unwrap(),
            r#"{"step":"idle"}"#
        );
    }

    #[tokio::test]
    async fn family_registration_walks_every_step() {
        let pool = test_pool().await;
        let user = contact(&pool, 1).await;
        enter(&pool, 1, ConversationState::RegisterLastName, Utc::now())
            .await
            .unwrap();

        drive(&pool, &user, "Сидорова").await;
        drive(&pool, &user, "Анна").await;
        drive(&pool, &user, "👨‍👩‍👧‍👦 Семейное участие").await;
        drive(&pool, &user, "4").await;
        let replies = drive(&pool, &user, "Маша 8 лет, Петя 5 лет").await;
        assert!(replies[0].text.contains("Регистрация завершена"));

        let user = db::find_user(&pool, 1).await.unwrap().unwrap();
        assert!(user.registered);
        assert_eq!(user.participation, Participation::Family);
        assert_eq!(user.family_size, 4);
        assert_eq!(user.first_name.as_deref(), Some("Анна"));
        assert_eq!(user.last_name.as_deref(), Some("Сидорова"));
        assert_eq!(
            user.children_info.as_deref(),
            Some("Маша 8 лет, Петя 5 лет")
        );
        let (state, _) = db::load_conversation(&pool, 1).await.unwrap();
        assert_eq!(state, ConversationState::Idle);
    }

    #[tokio::test]
    async fn individual_registration_skips_family_steps() {
        let pool = test_pool().await;
        let user = contact(&pool, 2).await;
        enter(&pool, 2, ConversationState::RegisterLastName, Utc::now())
            .await
            .unwrap();

        drive(&pool, &user, "Иванов").await;
        drive(&pool, &user, "Петр").await;
        let replies = drive(&pool, &user, "индивидуальное").await;
        assert!(replies[0].text.contains("Регистрация завершена"));

        let user = db::find_user(&pool, 2).await.unwrap().unwrap();
        assert!(user.registered);
        assert_eq!(user.participation, Participation::Individual);
        assert_eq!(user.family_size, 1);
        assert!(user.children_info.is_none());
    }

    #[tokio::test]
    async fn invalid_input_keeps_the_step_and_counts_attempts() {
        let pool = test_pool().await;
        let user = contact(&pool, 3).await;
        enter(&pool, 3, ConversationState::RegisterLastName, Utc::now())
            .await
            .unwrap();

        let first = drive(&pool, &user, "Я").await;
        assert!(first[0].text.contains("минимум 2 символа"));
        assert!(!first[0].text.contains("/cancel"));

        let (state, attempts) = db::load_conversation(&pool, 3).await.unwrap();
        assert_eq!(state, ConversationState::RegisterLastName);
        assert_eq!(attempts, 1);

        drive(&pool, &user, "ю").await;
        let third = drive(&pool, &user, "ё").await;
        assert!(third[0].text.contains("/cancel"));

        // A valid answer afterwards resets the counter along the transition.
        drive(&pool, &user, "Кузнецова").await;
        let (state, attempts) = db::load_conversation(&pool, 3).await.unwrap();
        assert!(matches!(state, ConversationState::RegisterFirstName { .. }));
        assert_eq!(attempts, 0);
    }

    #[tokio::test]
    async fn media_is_rejected_on_text_steps() {
        let pool = test_pool().await;
        let user = db::seed_user(&pool, 4).await;
        enter(&pool, 4, ConversationState::EditFirstName, Utc::now())
            .await
            .unwrap();

        let attachment = AttachmentRef {
            file_id: "f1".to_string(),
            stored_path: None,
        };
        let (state, _) = db::load_conversation(&pool, 4).await.unwrap();
        let replies = advance(
            &pool,
            &user,
            state,
            StepInput::Media {
                kind: SubmissionKind::Photo,
                caption: None,
                attachment: &attachment,
            },
            Utc::now(),
            &[],
        )
        .await
        .unwrap();
        assert!(replies[0].text.contains("текст"));
        let (state, _) = db::load_conversation(&pool, 4).await.unwrap();
        assert_eq!(state, ConversationState::EditFirstName);
    }

    #[tokio::test]
    async fn support_message_reaches_admins() {
        let pool = test_pool().await;
        let user = db::seed_user(&pool, 5).await;
        enter(&pool, 5, ConversationState::SupportMessage, Utc::now())
            .await
            .unwrap();

        let (state, _) = db::load_conversation(&pool, 5).await.unwrap();
        let replies = advance(
            &pool,
            &user,
            state,
            StepInput::Text("Не открывается ссылка в задании"),
            Utc::now(),
            &[99],
        )
        .await
        .unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].to, 5);
        assert!(replies[0].text.contains("Обращение #1"));
        assert_eq!(replies[1].to, 99);
        assert!(replies[1].text.contains("Не открывается ссылка"));

        assert!(db::close_support_request(&pool, 1).await.unwrap());
        let (state, _) = db::load_conversation(&pool, 5).await.unwrap();
        assert_eq!(state, ConversationState::Idle);
    }
}
