//! Audit policy: which requests are recorded, and how much of them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::event::{Level, Stage};
use super::AuditError;
use crate::authz::Attributes;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub omit_stages: Vec<Stage>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub level: Level,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub user_groups: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub resources: Vec<GroupResources>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default, rename = "nonResourceURLs")]
    pub non_resource_urls: Vec<String>,
    #[serde(default)]
    pub omit_stages: Vec<Stage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResources {
    /// Empty is the core group.
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub resource_names: Vec<String>,
}

impl Policy {
    pub fn from_yaml(content: &str) -> Result<Self, AuditError> {
        let policy: Policy =
            serde_yaml::from_str(content).map_err(|e| AuditError::Policy(e.to_string()))?;
        if policy.rules.is_empty() {
            return Err(AuditError::Policy("policy has no rules".into()));
        }
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AuditError::Policy(format!("reading {}: {e}", path.display())))?;
        let policy = Self::from_yaml(&content)?;
        tracing::info!(path = %path.display(), rules = policy.rules.len(), "Loaded audit policy");
        Ok(policy)
    }
}

/// Audit settings for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAuditConfig {
    pub level: Level,
    pub omit_stages: Vec<Stage>,
}

/// Decides the audit level of a request, once, at `RequestReceived`.
pub trait PolicyChecker: Send + Sync {
    fn level_and_stages(&self, attrs: &Attributes) -> RequestAuditConfig;
}

/// Applies the same level to every request.
#[derive(Debug, Clone)]
pub struct FixedLevelChecker {
    pub level: Level,
    pub omit_stages: Vec<Stage>,
}

impl PolicyChecker for FixedLevelChecker {
    fn level_and_stages(&self, _attrs: &Attributes) -> RequestAuditConfig {
        RequestAuditConfig {
            level: self.level,
            omit_stages: self.omit_stages.clone(),
        }
    }
}

/// First matching rule wins; no match records nothing.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    policy: Policy,
}

impl RuleEvaluator {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }
}

impl PolicyChecker for RuleEvaluator {
    fn level_and_stages(&self, attrs: &Attributes) -> RequestAuditConfig {
        for rule in &self.policy.rules {
            if rule_matches(rule, attrs) {
                let mut omit_stages = self.policy.omit_stages.clone();
                for stage in &rule.omit_stages {
                    if !omit_stages.contains(stage) {
                        omit_stages.push(*stage);
                    }
                }
                return RequestAuditConfig {
                    level: rule.level,
                    omit_stages,
                };
            }
        }
        RequestAuditConfig {
            level: Level::None,
            omit_stages: self.policy.omit_stages.clone(),
        }
    }
}

fn has(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v == value)
}

fn rule_matches(rule: &PolicyRule, attrs: &Attributes) -> bool {
    if !rule.users.is_empty() && !has(&rule.users, &attrs.user.name) {
        return false;
    }
    if !rule.user_groups.is_empty()
        && !attrs.user.groups.iter().any(|g| has(&rule.user_groups, g))
    {
        return false;
    }
    if !rule.verbs.is_empty() && !has(&rule.verbs, &attrs.verb) {
        return false;
    }
    if !rule.namespaces.is_empty() || !rule.resources.is_empty() {
        return matches_resource(rule, attrs);
    }
    if !rule.non_resource_urls.is_empty() {
        return matches_non_resource(rule, attrs);
    }
    true
}

fn matches_non_resource(rule: &PolicyRule, attrs: &Attributes) -> bool {
    if attrs.resource_request {
        return false;
    }
    rule.non_resource_urls.iter().any(|spec| path_matches(&attrs.path, spec))
}

fn path_matches(path: &str, spec: &str) -> bool {
    if spec == "*" || spec == path {
        return true;
    }
    match spec.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix.trim_end_matches('*')),
        None => false,
    }
}

fn matches_resource(rule: &PolicyRule, attrs: &Attributes) -> bool {
    if !attrs.resource_request {
        return false;
    }
    if !rule.namespaces.is_empty() && !has(&rule.namespaces, &attrs.namespace) {
        return false;
    }
    if rule.resources.is_empty() {
        return true;
    }

    let resource = attrs.resource.as_str();
    let subresource = attrs.subresource.as_str();
    let combined = if subresource.is_empty() {
        resource.to_string()
    } else {
        format!("{resource}/{subresource}")
    };

    for gr in rule.resources.iter().filter(|gr| gr.group == attrs.api_group) {
        if gr.resources.is_empty() {
            return true;
        }
        if !gr.resource_names.is_empty() && !has(&gr.resource_names, &attrs.name) {
            continue;
        }
        for res in &gr.resources {
            if *res == combined || res == "*" {
                return true;
            }
            if !subresource.is_empty() && res.strip_prefix("*/") == Some(subresource) {
                return true;
            }
            if res.strip_suffix("/*") == Some(resource) {
                return true;
            }
        }
    }
    false
}
