//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-request notifier.

use crate::config::Config;
use feeled_core::generation::LessonPipeline;
use feeled_core::ports::{IdentityService, Notice, NoticeKind, Notifier};
use std::sync::Arc;
use std::sync::Mutex;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LessonPipeline>,
    pub identity: Arc<dyn IdentityService>,
    pub config: Arc<Config>,
}

//=========================================================================================
// CollectingNotifier (Specific to One Request)
//=========================================================================================

/// Buffers the notices a pipeline call emits so the handler can return them
/// in the response body.
#[derive(Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    pub fn into_notices(self) -> Vec<Notice> {
        self.notices.into_inner().unwrap()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        self.notices.lock().unwrap().push(Notice {
            kind,
            message: message.to_string(),
        });
    }
}
