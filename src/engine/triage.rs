use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{self, User};
use crate::domain::event::AttachmentRef;
use crate::domain::models::{InboxKind, InboxPayload, SubmissionKind};
use crate::engine::reply::{Keyboard, Reply};

/// Where a message lands when no flow claimed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Unregistered,
    PotentialReport,
    Noise,
}

/// Classification is deliberately coarse. Anyone not registered goes to the
/// same bucket whatever they sent, any attachment looks like a report, and
/// for bare text the character count decides.
pub fn classify(
    registered: bool,
    text: Option<&str>,
    has_attachment: bool,
    min_chars: usize,
) -> Disposition {
    if !registered {
        return Disposition::Unregistered;
    }
    if has_attachment {
        return Disposition::PotentialReport;
    }
    let length = text.map(|t| t.trim().chars().count()).unwrap_or(0);
    if length >= min_chars {
        Disposition::PotentialReport
    } else {
        Disposition::Noise
    }
}

/// Files a message nothing was waiting for. Every such message lands in the
/// inbox so admins can rescue reports sent outside the submit flow, and the
/// user is told right away that nothing got counted.
pub async fn handle_unclaimed(
    pool: &SqlitePool,
    user: &User,
    text: Option<&str>,
    media: Option<(SubmissionKind, &AttachmentRef)>,
    min_chars: usize,
    received_at: DateTime<Utc>,
) -> Result<Vec<Reply>> {
    let disposition = classify(user.registered, text, media.is_some(), min_chars);
    let kind = match disposition {
        Disposition::Unregistered => InboxKind::Unregistered,
        Disposition::PotentialReport => InboxKind::PotentialReport,
        Disposition::Noise => InboxKind::Unknown,
    };
    let payload = InboxPayload {
        text: text.map(str::to_string),
        media: media.map(|(kind, _)| kind),
        file_id: media.map(|(_, attachment)| attachment.file_id.clone()),
        file_path: media.and_then(|(_, attachment)| attachment.stored_path.clone()),
    };
    let entry_id = db::insert_inbox_entry(pool, user.user_id, kind, &payload, received_at).await?;
    tracing::info!(
        user_id = user.user_id,
        entry_id,
        kind = ?kind,
        "unclaimed message filed"
    );

    let reply = match disposition {
        Disposition::Unregistered => Reply::with_keyboard(
            user.user_id,
            "👋 Чтобы участвовать в игре, сначала зарегистрируйтесь.",
            Keyboard::Register,
        ),
        Disposition::PotentialReport => Reply::with_keyboard(
            user.user_id,
            "⚠️ ВНИМАНИЕ! Ваше задание НЕ ПРИНЯТО!\n\n\
             Похоже, вы прислали отчет вне режима сдачи. Сообщение передано организаторам, \
             но НЕ засчитано.\n\n\
             Чтобы отчет засчитался, нажмите «📤 Отправить задание на проверку» и пришлите \
             работу заново.",
            Keyboard::MainMenu,
        ),
        Disposition::Noise => Reply::with_keyboard(
            user.user_id,
            "Не совсем понял вас 🙂 Выберите действие в меню.",
            Keyboard::MainMenu,
        ),
    };
    Ok(vec![reply])
}
