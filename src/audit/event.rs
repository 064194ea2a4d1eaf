//! Audit event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::authn::UserInfo;

pub const API_VERSION: &str = "audit.k8s.io/v1";
pub const EVENT_KIND: &str = "Event";
pub const EVENT_LIST_KIND: &str = "EventList";

/// Longest user agent recorded verbatim.
pub const MAX_USER_AGENT_LENGTH: usize = 1024;
const USER_AGENT_TRUNCATE_SUFFIX: &str = "...TRUNCATED";

/// How much of a request is recorded. Ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Level {
    #[default]
    None,
    Metadata,
    Request,
    RequestResponse,
}

impl Level {
    pub fn at_least(self, other: Level) -> bool {
        self >= other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    RequestReceived,
    ResponseStarted,
    ResponseComplete,
    Panic,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::RequestReceived => "RequestReceived",
            Stage::ResponseStarted => "ResponseStarted",
            Stage::ResponseComplete => "ResponseComplete",
            Stage::Panic => "Panic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subresource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl ResponseStatus {
    pub fn code(code: u16) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: String,
    pub api_version: String,
    pub level: Level,
    #[serde(rename = "auditID")]
    pub audit_id: String,
    pub stage: Stage,
    #[serde(rename = "requestURI")]
    pub request_uri: String,
    pub verb: String,
    pub user: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_user: Option<UserInfo>,
    #[serde(default, rename = "sourceIPs", skip_serializing_if = "Vec::is_empty")]
    pub source_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<ResponseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_object: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_object: Option<serde_json::Value>,
    pub request_received_timestamp: DateTime<Utc>,
    pub stage_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Event {
    pub fn new(audit_id: impl Into<String>, level: Level) -> Self {
        let now = Utc::now();
        Self {
            kind: EVENT_KIND.to_string(),
            api_version: API_VERSION.to_string(),
            level,
            audit_id: audit_id.into(),
            stage: Stage::RequestReceived,
            request_uri: String::new(),
            verb: String::new(),
            user: UserInfo::default(),
            impersonated_user: None,
            source_ips: Vec::new(),
            user_agent: String::new(),
            object_ref: None,
            response_status: None,
            request_object: None,
            response_object: None,
            request_received_timestamp: now,
            stage_timestamp: now,
            annotations: BTreeMap::new(),
        }
    }

    /// Record an annotation. Existing keys are kept; events below
    /// `Metadata` carry none.
    pub fn log_annotation(&mut self, key: &str, value: &str) {
        if !self.level.at_least(Level::Metadata) {
            return;
        }
        if let Some(existing) = self.annotations.get(key) {
            if existing != value {
                tracing::warn!(
                    audit_id = %self.audit_id,
                    key,
                    existing = %existing,
                    "Audit annotation already set, keeping the first value"
                );
            }
            return;
        }
        self.annotations.insert(key.to_string(), value.to_string());
    }
}

/// Cap a user agent, marking the cut.
pub fn truncate_user_agent(agent: &str) -> String {
    if agent.len() <= MAX_USER_AGENT_LENGTH {
        return agent.to_string();
    }
    let mut cut = MAX_USER_AGENT_LENGTH;
    while !agent.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{USER_AGENT_TRUNCATE_SUFFIX}", &agent[..cut])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventList {
    pub kind: String,
    pub api_version: String,
    pub items: Vec<Event>,
}

impl EventList {
    pub fn new(items: Vec<Event>) -> Self {
        Self {
            kind: EVENT_LIST_KIND.to_string(),
            api_version: API_VERSION.to_string(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Level::RequestResponse.at_least(Level::Request));
        assert!(Level::Metadata.at_least(Level::Metadata));
        assert!(!Level::None.at_least(Level::Metadata));
    }

    #[test]
    fn annotations_never_overwrite() {
        let mut event = Event::new("id", Level::Metadata);
        event.log_annotation("k", "first");
        event.log_annotation("k", "second");
        assert_eq!(event.annotations["k"], "first");

        let mut quiet = Event::new("id", Level::None);
        quiet.log_annotation("k", "v");
        assert!(quiet.annotations.is_empty());
    }

    #[test]
    fn user_agent_is_capped() {
        assert_eq!(truncate_user_agent("curl/8.0"), "curl/8.0");
        let long = "a".repeat(MAX_USER_AGENT_LENGTH + 5);
        let cut = truncate_user_agent(&long);
        assert!(cut.ends_with("...TRUNCATED"));
        assert_eq!(cut.len(), MAX_USER_AGENT_LENGTH + "...TRUNCATED".len());
    }

    #[test]
    fn wire_field_names() {
        let mut event = Event::new("abc", Level::Metadata);
        event.request_uri = "/api/v1/pods".into();
        event.source_ips = vec!["10.0.0.1".into()];
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["auditID"], "abc");
        assert_eq!(json["requestURI"], "/api/v1/pods");
        assert_eq!(json["sourceIPs"][0], "10.0.0.1");
        assert_eq!(json["apiVersion"], API_VERSION);
        assert_eq!(json["stage"], "RequestReceived");
    }
}
