pub mod attachments;
pub mod commands;
pub mod keyboards;

use anyhow::Result;
use chrono::Utc;
use teloxide::adaptors::throttle::{Limits, Throttle};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, ChatKind, Message, Update};

use crate::db;
use crate::domain::event::{ChatProfile, EventPayload, InboundEvent};
use crate::domain::models::SubmissionKind;
use crate::engine::{self, conversation::ConversationState, reply::Reply};
use crate::state::{AppState, SharedState};

pub type EcoBot = Throttle<Bot>;

/// Long polling until the process is stopped. All updates funnel into
/// [`engine::handle_event`]; this layer only parses, downloads and sends.
pub async fn run(state: SharedState) -> Result<()> {
    let bot = Bot::new(state.config.bot_token.clone()).throttle(Limits::default());
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    tracing::info!("starting long polling");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

async fn on_message(bot: EcoBot, state: SharedState, msg: Message) -> Result<()> {
    // The game runs in direct chats only.
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }
    let user_id = msg.chat.id.0;
    let Some(payload) = extract_payload(&bot, &state, user_id, &msg).await else {
        return Ok(());
    };
    let event = InboundEvent {
        user_id,
        profile: profile_from(&msg),
        payload,
        received_at: msg.date,
    };
    let replies = engine::handle_event(&state, event).await?;
    send_replies(&bot, replies).await;
    Ok(())
}

async fn on_callback(bot: EcoBot, state: SharedState, q: CallbackQuery) -> Result<()> {
    if let Err(err) = bot.answer_callback_query(q.id.clone()).await {
        tracing::warn!(error = %err, "answering a callback failed");
    }
    let Some(command) = q.data.as_deref().and_then(commands::parse_callback) else {
        return Ok(());
    };
    let event = InboundEvent {
        user_id: q.from.id.0 as i64,
        profile: ChatProfile {
            username: q.from.username.clone(),
            first_name: Some(q.from.first_name.clone()),
            last_name: q.from.last_name.clone(),
        },
        payload: EventPayload::Callback(command),
        received_at: Utc::now(),
    };
    let replies = engine::handle_event(&state, event).await?;
    send_replies(&bot, replies).await;
    Ok(())
}

/// One update becomes one typed payload, or nothing for update kinds the
/// game ignores (stickers, voice, locations).
async fn extract_payload(
    bot: &EcoBot,
    state: &AppState,
    user_id: i64,
    msg: &Message,
) -> Option<EventPayload> {
    if let Some(text) = msg.text() {
        return Some(commands::parse_text(text));
    }

    let caption = msg.caption().map(str::to_string);
    let (kind, file_id) = if let Some(sizes) = msg.photo() {
        // Telegram sends several sizes, the last one is the largest.
        (SubmissionKind::Photo, sizes.last()?.file.id.clone())
    } else if let Some(video) = msg.video() {
        (SubmissionKind::Video, video.file.id.clone())
    } else if let Some(document) = msg.document() {
        (SubmissionKind::Document, document.file.id.clone())
    } else {
        return None;
    };

    let task_hint = submission_task_hint(state, user_id).await;
    let attachment = attachments::fetch(
        bot,
        state.files.as_ref(),
        user_id,
        task_hint,
        kind,
        &file_id,
        Utc::now(),
    )
    .await;
    Some(EventPayload::Media {
        kind,
        caption,
        attachment,
    })
}

/// Best-effort peek at the active step, used only to name the stored file.
/// Runs outside the user lock; a racing transition costs nothing but a
/// less descriptive filename.
async fn submission_task_hint(state: &AppState, user_id: i64) -> Option<i64> {
    match db::load_conversation(&state.pool, user_id).await {
        Ok((ConversationState::SubmitReport { task_id }, _)) => Some(task_id),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(user_id, error = %err, "task hint lookup failed");
            None
        }
    }
}

fn profile_from(msg: &Message) -> ChatProfile {
    match msg.from() {
        Some(user) => ChatProfile {
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
        },
        None => ChatProfile::default(),
    }
}

/// Failures here are logged and skipped: one blocked chat must not stop
/// the admin notifications that follow it.
async fn send_replies(bot: &EcoBot, replies: Vec<Reply>) {
    for reply in replies {
        let mut request = bot.send_message(ChatId(reply.to), reply.text);
        if let Some(keyboard) = &reply.keyboard {
            request = request.reply_markup(keyboards::render(keyboard));
        }
        if let Err(err) = request.await {
            tracing::error!(chat_id = reply.to, error = %err, "sending a reply failed");
        }
    }
}
