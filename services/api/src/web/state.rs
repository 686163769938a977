//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use revision_core::chat::ChatOrchestrator;
use revision_core::lifecycle::SessionLifecycle;
use revision_core::ports::RepositoryService;
use revision_core::worker::GradingQueue;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
///
/// Every component receives its repository handle explicitly; nothing in the
/// service reaches for ambient connection state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn RepositoryService>,
    pub lifecycle: SessionLifecycle,
    pub chat: Arc<ChatOrchestrator>,
    pub grading_queue: GradingQueue,
}
