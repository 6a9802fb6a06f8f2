use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::domain::event::ChatProfile;
use crate::domain::models::{
    InboxKind, InboxPayload, Participation, SubmissionKind, SubmissionStatus, SupportStatus,
};
use crate::engine::conversation::ConversationState;
use crate::time_utils;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub tg_first_name: Option<String>,
    pub tg_last_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub participation: Participation,
    pub family_size: i64,
    pub children_info: Option<String>,
    pub registered: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Self-declared name first, platform name as fallback.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.tg_first_name.clone())
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| format!("участник #{}", self.user_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub is_open: bool,
    pub week_number: Option<i64>,
    pub opens_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub opens_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub task_id: i64,
    pub kind: SubmissionKind,
    pub content: Option<String>,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub status: SubmissionStatus,
    pub is_on_time: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub user_id: i64,
    pub task_id: i64,
    pub kind: SubmissionKind,
    pub content: Option<String>,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub status: SubmissionStatus,
    pub is_on_time: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct SubmissionStats {
    pub total: i64,
    pub approved: i64,
    pub pending: i64,
    pub rejected: i64,
    pub on_time: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct InboxEntry {
    pub id: i64,
    pub user_id: i64,
    pub kind: InboxKind,
    pub payload: Json<InboxPayload>,
    pub processed: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SupportRequest {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub status: SupportStatus,
    pub created_at: DateTime<Utc>,
}

// ========== Users ==========

/// Creates the user row on first contact and refreshes the
/// platform-supplied fields on every later one. Self-declared fields are
/// owned by the registration and profile-edit flows and are never touched.
pub async fn upsert_contact(
    pool: &SqlitePool,
    user_id: i64,
    profile: &ChatProfile,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, username, tg_first_name, tg_last_name, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(user_id) DO UPDATE SET
            username = excluded.username,
            tg_first_name = excluded.tg_first_name,
            tg_last_name = excluded.tg_last_name
        "#,
    )
    .bind(user_id)
    .bind(&profile.username)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_user(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT user_id, username, tg_first_name, tg_last_name, first_name, last_name,
               participation, family_size, children_info, registered, created_at
        FROM users
        WHERE user_id = ?1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn complete_registration(
    pool: &SqlitePool,
    user_id: i64,
    first_name: &str,
    last_name: &str,
    participation: Participation,
    family_size: i64,
    children_info: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET first_name = ?2, last_name = ?3, participation = ?4,
            family_size = ?5, children_info = ?6, registered = TRUE
        WHERE user_id = ?1
        "#,
    )
    .bind(user_id)
    .bind(first_name)
    .bind(last_name)
    .bind(participation)
    .bind(family_size)
    .bind(children_info)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_first_name(pool: &SqlitePool, user_id: i64, first_name: &str) -> Result<()> {
    sqlx::query("UPDATE users SET first_name = ?2 WHERE user_id = ?1")
        .bind(user_id)
        .bind(first_name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_last_name(pool: &SqlitePool, user_id: i64, last_name: &str) -> Result<()> {
    sqlx::query("UPDATE users SET last_name = ?2 WHERE user_id = ?1")
        .bind(user_id)
        .bind(last_name)
        .execute(pool)
        .await?;
    Ok(())
}

// ========== Tasks ==========

pub async fn create_task(pool: &SqlitePool, new: &NewTask, now: DateTime<Utc>) -> Result<i64> {
    let week_anchor = new.opens_at.unwrap_or(now);
    let week_number = week_anchor
        .with_timezone(&time_utils::PROGRAM_TZ)
        .iso_week()
        .week() as i64;
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO tasks (title, description, link, is_open, week_number, opens_at, deadline_at, created_at)
        VALUES (?1, ?2, ?3, TRUE, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.link)
    .bind(week_number)
    .bind(new.opens_at)
    .bind(new.deadline_at)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_task(pool: &SqlitePool, task_id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        r#"
        SELECT id, title, description, link, is_open, week_number, opens_at, deadline_at, created_at
        FROM tasks
        WHERE id = ?1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;
    Ok(task)
}

/// Tasks users may still submit against: flagged open, opened by now, and
/// with the deadline (when set) still ahead. The time window is filtered in
/// Rust so instants are compared as instants, not as encoded text.
pub async fn list_open_tasks(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        r#"
        SELECT id, title, description, link, is_open, week_number, opens_at, deadline_at, created_at
        FROM tasks
        WHERE is_open = TRUE
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(tasks
        .into_iter()
        .filter(|t| t.opens_at.map_or(true, |open| open <= now))
        .filter(|t| t.deadline_at.map_or(true, |deadline| deadline > now))
        .collect())
}

pub async fn list_all_tasks(pool: &SqlitePool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        r#"
        SELECT id, title, description, link, is_open, week_number, opens_at, deadline_at, created_at
        FROM tasks
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

pub async fn set_task_title(pool: &SqlitePool, task_id: i64, title: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET title = ?2 WHERE id = ?1")
        .bind(task_id)
        .bind(title)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_task_description(
    pool: &SqlitePool,
    task_id: i64,
    description: &str,
) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET description = ?2 WHERE id = ?1")
        .bind(task_id)
        .bind(description)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_task_link(pool: &SqlitePool, task_id: i64, link: Option<&str>) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET link = ?2 WHERE id = ?1")
        .bind(task_id)
        .bind(link)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Edits the deadline going forward. Existing submissions keep the on-time
/// flag they were created with.
pub async fn set_task_deadline(
    pool: &SqlitePool,
    task_id: i64,
    deadline_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET deadline_at = ?2 WHERE id = ?1")
        .bind(task_id)
        .bind(deadline_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_task_open(pool: &SqlitePool, task_id: i64, is_open: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET is_open = ?2 WHERE id = ?1")
        .bind(task_id)
        .bind(is_open)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Removes the task together with every submission referencing it, in one
/// transaction. Returns the number of submissions removed, or `None` when
/// the task was already gone.
pub async fn delete_task_cascade(pool: &SqlitePool, task_id: i64) -> Result<Option<u64>> {
    let mut tx = pool.begin().await?;
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE id = ?1")
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
    if existing == 0 {
        tx.rollback().await?;
        return Ok(None);
    }
    let submissions = sqlx::query("DELETE FROM submissions WHERE task_id = ?1")
        .bind(task_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM tasks WHERE id = ?1")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(submissions))
}

// ========== Submissions ==========

pub async fn insert_submission(pool: &SqlitePool, new: &NewSubmission) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO submissions (user_id, task_id, kind, content, file_id, file_path,
                                 status, is_on_time, submitted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        RETURNING id
        "#,
    )
    .bind(new.user_id)
    .bind(new.task_id)
    .bind(new.kind)
    .bind(&new.content)
    .bind(&new.file_id)
    .bind(&new.file_path)
    .bind(new.status)
    .bind(new.is_on_time)
    .bind(new.submitted_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_submission(pool: &SqlitePool, submission_id: i64) -> Result<Option<Submission>> {
    let submission = sqlx::query_as::<_, Submission>(
        r#"
        SELECT id, user_id, task_id, kind, content, file_id, file_path,
               status, is_on_time, submitted_at
        FROM submissions
        WHERE id = ?1
        "#,
    )
    .bind(submission_id)
    .fetch_optional(pool)
    .await?;
    Ok(submission)
}

pub async fn has_submission(pool: &SqlitePool, user_id: i64, task_id: i64) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM submissions WHERE user_id = ?1 AND task_id = ?2",
    )
    .bind(user_id)
    .bind(task_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn list_pending_submissions(pool: &SqlitePool, limit: i64) -> Result<Vec<Submission>> {
    let submissions = sqlx::query_as::<_, Submission>(
        r#"
        SELECT id, user_id, task_id, kind, content, file_id, file_path,
               status, is_on_time, submitted_at
        FROM submissions
        WHERE status = 'pending'
        ORDER BY submitted_at
        LIMIT ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(submissions)
}

pub async fn set_submission_status(
    pool: &SqlitePool,
    submission_id: i64,
    status: SubmissionStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE submissions SET status = ?2 WHERE id = ?1")
        .bind(submission_id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn user_submission_stats(pool: &SqlitePool, user_id: i64) -> Result<SubmissionStats> {
    let stats = sqlx::query_as::<_, SubmissionStats>(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
               COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
               COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected,
               COALESCE(SUM(CASE WHEN is_on_time = 1 THEN 1 ELSE 0 END), 0) AS on_time
        FROM submissions
        WHERE user_id = ?1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(stats)
}

// ========== Conversation state ==========

/// Loads the persisted step and its invalid-attempt counter. A missing row
/// is the idle sentinel; a stored document that no longer deserializes is
/// ignored the same way, so stale formats cannot wedge a user.
pub async fn load_conversation(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<(ConversationState, i64)> {
    let row = sqlx::query_as::<_, (String, i64)>(
        "SELECT state, invalid_attempts FROM conversation_states WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    let Some((raw, attempts)) = row else {
        return Ok((ConversationState::Idle, 0));
    };
    match serde_json::from_str::<ConversationState>(&raw) {
        Ok(state) => Ok((state, attempts)),
        Err(err) => {
            tracing::warn!(user_id, error = %err, "stored conversation state unreadable, resetting to idle");
            Ok((ConversationState::Idle, 0))
        }
    }
}

/// Idempotent upsert of the current step. Every transition goes through
/// here, so a crash at any point resumes from the last persisted step.
pub async fn save_conversation(
    pool: &SqlitePool,
    user_id: i64,
    state: &ConversationState,
    now: DateTime<Utc>,
) -> Result<()> {
    let raw = serde_json::to_string(state)?;
    sqlx::query(
        r#"
        INSERT INTO conversation_states (user_id, state, invalid_attempts, updated_at)
        VALUES (?1, ?2, 0, ?3)
        ON CONFLICT(user_id) DO UPDATE SET
            state = excluded.state,
            invalid_attempts = 0,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(raw)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn bump_invalid_attempts(
    pool: &SqlitePool,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    let attempts = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE conversation_states
        SET invalid_attempts = invalid_attempts + 1, updated_at = ?2
        WHERE user_id = ?1
        RETURNING invalid_attempts
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(attempts.unwrap_or(0))
}

pub async fn clear_conversation(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM conversation_states WHERE user_id = ?1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn purge_stale_conversations(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM conversation_states WHERE updated_at < ?1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ========== Inbox ==========

pub async fn insert_inbox_entry(
    pool: &SqlitePool,
    user_id: i64,
    kind: InboxKind,
    payload: &InboxPayload,
    received_at: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO inbox_entries (user_id, kind, payload, processed, received_at)
        VALUES (?1, ?2, ?3, FALSE, ?4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(Json(payload))
    .bind(received_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_inbox_entry(pool: &SqlitePool, entry_id: i64) -> Result<Option<InboxEntry>> {
    let entry = sqlx::query_as::<_, InboxEntry>(
        r#"
        SELECT id, user_id, kind, payload, processed, received_at
        FROM inbox_entries
        WHERE id = ?1
        "#,
    )
    .bind(entry_id)
    .fetch_optional(pool)
    .await?;
    Ok(entry)
}

pub async fn list_unprocessed_inbox(pool: &SqlitePool, limit: i64) -> Result<Vec<InboxEntry>> {
    let entries = sqlx::query_as::<_, InboxEntry>(
        r#"
        SELECT id, user_id, kind, payload, processed, received_at
        FROM inbox_entries
        WHERE processed = FALSE
        ORDER BY received_at
        LIMIT ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

pub async fn mark_inbox_processed(pool: &SqlitePool, entry_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE inbox_entries SET processed = TRUE WHERE id = ?1")
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_inbox_entry(pool: &SqlitePool, entry_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM inbox_entries WHERE id = ?1")
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn purge_processed_inbox(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result =
        sqlx::query("DELETE FROM inbox_entries WHERE processed = TRUE AND received_at < ?1")
            .bind(cutoff)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

// ========== Support requests ==========

pub async fn insert_support_request(
    pool: &SqlitePool,
    user_id: i64,
    message: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO support_requests (user_id, message, status, created_at)
        VALUES (?1, ?2, 'open', ?3)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(message)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn close_support_request(pool: &SqlitePool, request_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE support_requests SET status = 'closed' WHERE id = ?1")
        .bind(request_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn archive_closed_support(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE support_requests SET status = 'archived' WHERE status = 'closed' AND created_at < ?1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ========== Test support ==========

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // A pool with more than one connection would open several independent
    // in-memory databases.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
pub async fn seed_user(pool: &SqlitePool, user_id: i64) -> User {
    let profile = ChatProfile {
        username: Some(format!("user{user_id}")),
        first_name: Some("Тест".to_string()),
        last_name: None,
    };
    upsert_contact(pool, user_id, &profile, Utc::now())
        .await
        .unwrap();
    complete_registration(
        pool,
        user_id,
        "Иван",
        "Петров",
        Participation::Individual,
        1,
        None,
    )
    .await
    .unwrap();
    find_user(pool, user_id).await.unwrap().unwrap()
}

#[cfg(test)]
pub async fn seed_task(pool: &SqlitePool, deadline_at: Option<DateTime<Utc>>) -> Task {
    let id = create_task(
        pool,
        &NewTask {
            title: "Посади дерево".to_string(),
            description: Some("Посади дерево и пришли фото".to_string()),
            link: None,
            opens_at: None,
            deadline_at,
        },
        Utc::now(),
    )
    .await
    .unwrap();
    get_task(pool, id).await.unwrap().unwrap()
}
