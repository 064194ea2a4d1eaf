//! Per-request audit state shared between the filters of one request.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};

use super::event::{Event, Level, ResponseStatus, Stage};
use super::{AuditError, Backend};
use crate::authn::UserInfo;

#[derive(Debug)]
struct State {
    event: Event,
    omit_stages: Vec<Stage>,
}

/// The event of one request. Cloning shares it.
#[derive(Debug, Clone)]
pub struct AuditContext {
    state: Arc<Mutex<State>>,
}

impl AuditContext {
    pub fn new(event: Event, omit_stages: Vec<Stage>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State { event, omit_stages })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn level(&self) -> Level {
        self.with(|s| s.event.level)
    }

    pub fn audit_id(&self) -> String {
        self.with(|s| s.event.audit_id.clone())
    }

    pub fn add_annotation(&self, key: &str, value: &str) {
        self.with(|s| s.event.log_annotation(key, value));
    }

    pub fn set_response_status(&self, status: ResponseStatus) {
        self.with(|s| s.event.response_status = Some(status));
    }

    /// The event was built for the impersonated user; record who really asked.
    pub fn set_impersonation(&self, original: UserInfo) {
        self.with(|s| {
            let acting = std::mem::replace(&mut s.event.user, original);
            if s.event.level.at_least(Level::Metadata) {
                s.event.impersonated_user = Some(acting);
            }
        });
    }

    /// Kept only at `Request` level and above.
    pub fn set_request_object(&self, object: serde_json::Value) {
        self.with(|s| {
            if s.event.level.at_least(Level::Request) {
                s.event.request_object = Some(object);
            }
        });
    }

    /// Kept only at `RequestResponse` level.
    pub fn set_response_object(&self, object: serde_json::Value) {
        self.with(|s| {
            if s.event.level.at_least(Level::RequestResponse) {
                s.event.response_object = Some(object);
            }
        });
    }

    /// Whether the response status has been recorded already.
    pub fn has_response_status(&self) -> bool {
        self.with(|s| s.event.response_status.is_some())
    }

    /// The event as of `stage`, or `None` when the stage is omitted.
    pub fn snapshot(&self, stage: Stage) -> Option<Arc<Event>> {
        self.with(|s| {
            if s.event.level == Level::None || s.omit_stages.contains(&stage) {
                return None;
            }
            s.event.stage = stage;
            s.event.stage_timestamp = Utc::now();
            Some(Arc::new(s.event.clone()))
        })
    }

    /// Emit the event for `stage` to `backend`.
    pub async fn process(&self, stage: Stage, backend: &dyn Backend) -> Result<(), AuditError> {
        match self.snapshot(stage) {
            Some(event) => backend.process_events(&[event]).await,
            None => Ok(()),
        }
    }
}
