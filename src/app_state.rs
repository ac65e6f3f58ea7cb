use sqlx::PgPool;
use std::sync::Arc;

use crate::db::PgRecordStore;
use crate::services::{queue::JobQueue, store::RecordStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub records: Arc<dyn RecordStore>,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn new(db: PgPool, queue: JobQueue) -> Self {
        Self {
            records: Arc::new(PgRecordStore::new(db.clone())),
            db,
            queue: Arc::new(queue),
        }
    }
}
