use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::config::RetentionConfig;
use crate::db;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub inbox_purged: u64,
    pub support_archived: u64,
    pub conversations_cleared: u64,
}

/// Ages out what nobody will look at again: processed inbox entries and
/// closed support requests past their windows, plus conversation steps
/// untouched for so long the user has clearly walked away. Running the
/// sweep twice in a row is safe, the second pass finds nothing.
pub async fn run_sweep(
    pool: &SqlitePool,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let report = SweepReport {
        inbox_purged: db::purge_processed_inbox(pool, now - Duration::days(retention.inbox_days))
            .await?,
        support_archived: db::archive_closed_support(
            pool,
            now - Duration::days(retention.support_days),
        )
        .await?,
        conversations_cleared: db::purge_stale_conversations(
            pool,
            now - Duration::days(retention.state_days),
        )
        .await?,
    };
    tracing::info!(
        inbox = report.inbox_purged,
        support = report.support_archived,
        conversations = report.conversations_cleared,
        "retention sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_user, test_pool};
    use crate::domain::models::{InboxKind, InboxPayload};
    use crate::engine::conversation::ConversationState;

    #[tokio::test]
    async fn sweep_touches_only_expired_rows_and_repeats_safely() {
        let pool = test_pool().await;
        seed_user(&pool, 1).await;
        let now = Utc::now();
        let retention = RetentionConfig {
            inbox_days: 30,
            support_days: 30,
            state_days: 7,
        };

        let payload = InboxPayload::default();
        let old = db::insert_inbox_entry(
            &pool,
            1,
            InboxKind::Unknown,
            &payload,
            now - Duration::days(45),
        )
        .await
        .unwrap();
        let fresh = db::insert_inbox_entry(&pool, 1, InboxKind::Unknown, &payload, now)
            .await
            .unwrap();
        db::mark_inbox_processed(&pool, old).await.unwrap();
        db::mark_inbox_processed(&pool, fresh).await.unwrap();

        db::insert_support_request(&pool, 1, "старый вопрос", now - Duration::days(60))
            .await
            .unwrap();
        db::close_support_request(&pool, 1).await.unwrap();

        db::save_conversation(
            &pool,
            1,
            &ConversationState::RegisterLastName,
            now - Duration::days(10),
        )
        .await
        .unwrap();

        let report = run_sweep(&pool, &retention, now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                inbox_purged: 1,
                support_archived: 1,
                conversations_cleared: 1,
            }
        );
        assert!(db::get_inbox_entry(&pool, old).await.unwrap().is_none());
        assert!(db::get_inbox_entry(&pool, fresh).await.unwrap().is_some());
        let (state, _) = db::load_conversation(&pool, 1).await.unwrap();
        assert_eq!(state, ConversationState::Idle);

        let again = run_sweep(&pool, &retention, now).await.unwrap();
        assert_eq!(again, SweepReport::default());
    }
}
