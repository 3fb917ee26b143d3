use crate::config::AppConfig;
use crate::error::{AppError, StorageError};
use crate::services::StorageManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StorageManager>,
    pub config: Arc<AppConfig>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(manager: StorageManager) -> Self {
        let config = Arc::new(manager.config().clone());
        Self {
            manager: Arc::new(manager),
            config,
            start_time: chrono::Utc::now(),
        }
    }

    /// Run a storage operation on the blocking pool. Engine calls do file
    /// I/O and take the commit lock, so they never run on a runtime thread.
    pub async fn run_blocking<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(&StorageManager) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || op(&manager))
            .await
            .map_err(|e| AppError::Internal(format!("storage task failed: {}", e)))?
            .map_err(AppError::from)
    }
}
