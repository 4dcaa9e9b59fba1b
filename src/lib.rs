pub mod asr;
pub mod config;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod translate;
pub mod utils;
pub mod web;

use std::sync::Arc;

use schedule::AdmissionController;
use storage::task::TaskRepository;

/// State shared with the HTTP handlers.
pub struct AppContext {
    pub repository: Arc<dyn TaskRepository>,
    pub admission: Arc<AdmissionController>,
}
