use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub admin_ids: AdminIds,
    pub files_dir: PathBuf,
    pub report_min_chars: usize,
    pub retention: RetentionConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct RetentionConfig {
    pub inbox_days: i64,
    pub support_days: i64,
    pub state_days: i64,
}

/// Admin allow-list. `all` is a deliberate escape hatch for small pilots;
/// it opens staff commands to every user and is logged loudly at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminIds {
    Everyone,
    List(Vec<i64>),
}

impl AdminIds {
    pub fn parse(raw: &str) -> Result<AdminIds> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("ADMIN_IDS is empty");
        }
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(AdminIds::Everyone);
        }
        let mut ids = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let id: i64 = part
                .parse()
                .with_context(|| format!("ADMIN_IDS entry {part:?} is not a numeric id"))?;
            ids.push(id);
        }
        if ids.is_empty() {
            bail!("ADMIN_IDS contains no usable ids");
        }
        Ok(AdminIds::List(ids))
    }

    pub fn allows(&self, user_id: i64) -> bool {
        match self {
            AdminIds::Everyone => true,
            AdminIds::List(ids) => ids.contains(&user_id),
        }
    }

    /// Chats to notify about staff-facing events. The open sentinel has no
    /// finite set to write to, so it notifies nobody.
    pub fn notify_targets(&self) -> &[i64] {
        match self {
            AdminIds::Everyone => &[],
            AdminIds::List(ids) => ids,
        }
    }
}

impl Config {
    /// Reads configuration from the environment. Missing or malformed
    /// credentials and allow-lists abort startup before any event is served.
    pub fn from_env() -> Result<Config> {
        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?;
        if bot_token.trim().is_empty() {
            bail!("BOT_TOKEN is empty");
        }

        let admin_raw = env::var("ADMIN_IDS").context("ADMIN_IDS is not set")?;
        let admin_ids = AdminIds::parse(&admin_raw)?;
        if matches!(admin_ids, AdminIds::Everyone) {
            tracing::warn!(
                "ADMIN_IDS=all: staff commands are open to EVERY user; set explicit ids in production"
            );
        }

        Ok(Config {
            bot_token,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://eco_bot.db".to_string()),
            admin_ids,
            files_dir: PathBuf::from(env::var("FILES_DIR").unwrap_or_else(|_| "files".to_string())),
            report_min_chars: parse_or("REPORT_MIN_CHARS", 10)?,
            retention: RetentionConfig {
                inbox_days: parse_or("INBOX_RETENTION_DAYS", 30)?,
                support_days: parse_or("SUPPORT_ARCHIVE_DAYS", 30)?,
                state_days: parse_or("STATE_RETENTION_DAYS", 7)?,
            },
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be numeric, got {value:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Config {
        Config {
            bot_token: "test-token".to_string(),
            database_url: "sqlite::memory:".to_string(),
            admin_ids: AdminIds::List(vec![99]),
            files_dir: PathBuf::from("files"),
            report_min_chars: 10,
            retention: RetentionConfig {
                inbox_days: 30,
                support_days: 30,
                state_days: 7,
            },
        }
    }
}
