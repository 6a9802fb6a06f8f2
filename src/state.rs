use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Config;
use crate::files::FileStore;

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub files: Arc<dyn FileStore>,
    pub locks: UserLocks,
}

pub type SharedState = Arc<AppState>;

/// One async mutex per chat id. Transitions for a single user run strictly
/// one after another, while different users proceed in parallel.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let handle = {
            let mut map = self.inner.lock().await;
            map.entry(user_id).or_default().clone()
        };
        handle.lock_owned().await
    }
}

#[cfg(test)]
impl AppState {
    pub async fn for_tests() -> SharedState {
        let pool = crate::db::test_pool().await;
        Arc::new(AppState {
            pool,
            config: Config::for_tests(),
            files: Arc::new(crate::files::LocalFileStore::new(std::env::temp_dir())),
            locks: UserLocks::new(),
        })
    }
}
