//! Alert rules
//!
//! A rule is either a threshold or a pattern condition over a time window,
//! optionally narrowed by equality filters. Rules are validated when they are
//! created or updated; evaluation never sees an invalid rule and never
//! mutates one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::alerts::pattern::compile_pattern;
use crate::chain::{LogEntry, Severity};
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{LogFilter, StorageBackend};

pub const DEFAULT_WINDOW_SECONDS: i64 = 3600;
const DEFAULT_RULES_PER_PAGE: u32 = 20;
const MAX_RULES_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Threshold,
    Pattern,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Threshold => "threshold",
            RuleKind::Pattern => "pattern",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    Threshold { threshold_count: u32 },
    Pattern { pattern: String },
}

impl RuleCondition {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleCondition::Threshold { .. } => RuleKind::Threshold,
            RuleCondition::Pattern { .. } => RuleKind::Pattern,
        }
    }
}

/// Equality filters an entry must satisfy to be considered by a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl RuleFilters {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.to_log_filter(None, None).matches(entry)
    }

    pub fn to_log_filter(&self, from: Option<i64>, to: Option<i64>) -> LogFilter {
        LogFilter {
            module: self.module.clone(),
            action: self.action.clone(),
            user: self.user.clone(),
            severity: self.severity,
            success: self.success,
            from,
            to,
            text: None,
        }
    }
}

/// Everything about a rule except its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub enabled: bool,
    pub window_seconds: i64,
    #[serde(flatten)]
    pub filters: RuleFilters,
    #[serde(flatten)]
    pub condition: RuleCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    #[serde(flatten)]
    pub spec: RuleSpec,
}

impl AlertRule {
    pub fn kind(&self) -> RuleKind {
        self.spec.condition.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.enabled
    }

    fn search_haystack(&self) -> String {
        let filters = &self.spec.filters;
        let pattern = match &self.spec.condition {
            RuleCondition::Pattern { pattern } => pattern.as_str(),
            RuleCondition::Threshold { .. } => "",
        };
        format!(
            "{}|{}|{}|{}|{}",
            filters.module.as_deref().unwrap_or(""),
            filters.action.as_deref().unwrap_or(""),
            filters.user.as_deref().unwrap_or(""),
            filters.severity.map(|s| s.as_str()).unwrap_or(""),
            pattern
        )
        .to_lowercase()
    }
}

/// Loosely-typed rule input used for both creation and partial updates.
///
/// `success` accepts `0`, `1`, booleans, or `""` to clear the filter. Empty
/// strings clear the string filters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleDraft {
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, alias = "window")]
    pub window_seconds: Option<i64>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub success: Option<Value>,
    #[serde(default, alias = "threshold")]
    pub threshold_count: Option<i64>,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Partial update; absent fields keep their current value.
pub type RulePatch = RuleDraft;

impl RuleDraft {
    pub fn threshold(threshold_count: i64, window_seconds: i64) -> Self {
        Self {
            kind: Some("threshold".to_string()),
            window_seconds: Some(window_seconds),
            threshold_count: Some(threshold_count),
            ..Default::default()
        }
    }

    pub fn pattern(pattern: impl Into<String>, window_seconds: i64) -> Self {
        Self {
            kind: Some("pattern".to_string()),
            window_seconds: Some(window_seconds),
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity.as_str().to_string());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(Value::from(u8::from(success)));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Overlay `patch` on top of this draft. Switching kind drops the other
    /// variant's field unless the patch supplies it.
    pub fn merge(self, patch: RulePatch) -> RuleDraft {
        let kind_changed = patch.kind.is_some() && patch.kind != self.kind;
        let (threshold_count, pattern) = if kind_changed {
            (patch.threshold_count, patch.pattern)
        } else {
            (
                patch.threshold_count.or(self.threshold_count),
                patch.pattern.or(self.pattern),
            )
        };

        RuleDraft {
            kind: patch.kind.or(self.kind),
            enabled: patch.enabled.or(self.enabled),
            window_seconds: patch.window_seconds.or(self.window_seconds),
            module: patch.module.or(self.module),
            action: patch.action.or(self.action),
            user: patch.user.or(self.user),
            severity: patch.severity.or(self.severity),
            success: patch.success.or(self.success),
            threshold_count,
            pattern,
        }
    }

    /// Validate the draft into a well-formed [`RuleSpec`].
    pub fn validate(&self) -> LedgerResult<RuleSpec> {
        let window_seconds = self.window_seconds.unwrap_or(DEFAULT_WINDOW_SECONDS);
        if window_seconds <= 0 {
            return Err(LedgerError::Validation(
                "window_seconds must be a positive integer".to_string(),
            ));
        }

        let severity = match non_empty(&self.severity) {
            Some(raw) => Some(raw.parse::<Severity>()?),
            None => None,
        };

        let filters = RuleFilters {
            module: non_empty(&self.module),
            action: non_empty(&self.action),
            user: non_empty(&self.user),
            severity,
            success: parse_success_filter(self.success.as_ref())?,
        };

        let condition = match self.kind.as_deref() {
            Some("threshold") => {
                if non_empty(&self.pattern).is_some() {
                    return Err(LedgerError::Validation(
                        "threshold rules do not take a pattern".to_string(),
                    ));
                }
                let count = self.threshold_count.unwrap_or(1);
                if count <= 0 || count > i64::from(u32::MAX) {
                    return Err(LedgerError::Validation(
                        "threshold_count must be a positive integer".to_string(),
                    ));
                }
                RuleCondition::Threshold {
                    threshold_count: count as u32,
                }
            }
            Some("pattern") => {
                if self.threshold_count.is_some() {
                    return Err(LedgerError::Validation(
                        "pattern rules do not take a threshold_count".to_string(),
                    ));
                }
                let pattern = non_empty(&self.pattern).ok_or_else(|| {
                    LedgerError::Validation("pattern is required for pattern rules".to_string())
                })?;
                compile_pattern(&pattern)?;
                RuleCondition::Pattern { pattern }
            }
            _ => {
                return Err(LedgerError::Validation(
                    "kind must be threshold or pattern".to_string(),
                ))
            }
        };

        Ok(RuleSpec {
            enabled: self.enabled.unwrap_or(true),
            window_seconds,
            filters,
            condition,
        })
    }
}

impl From<&RuleSpec> for RuleDraft {
    fn from(spec: &RuleSpec) -> Self {
        let (threshold_count, pattern) = match &spec.condition {
            RuleCondition::Threshold { threshold_count } => (Some(i64::from(*threshold_count)), None),
            RuleCondition::Pattern { pattern } => (None, Some(pattern.clone())),
        };
        RuleDraft {
            kind: Some(spec.condition.kind().as_str().to_string()),
            enabled: Some(spec.enabled),
            window_seconds: Some(spec.window_seconds),
            module: spec.filters.module.clone(),
            action: spec.filters.action.clone(),
            user: spec.filters.user.clone(),
            severity: spec.filters.severity.map(|s| s.as_str().to_string()),
            success: spec.filters.success.map(|s| Value::from(u8::from(s))),
            threshold_count,
            pattern,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn parse_success_filter(value: Option<&Value>) -> LedgerResult<Option<bool>> {
    let invalid = || LedgerError::Validation("success must be 0, 1, or \"\"".to_string());
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(invalid()),
        },
        Some(Value::String(s)) => match s.as_str() {
            "" => Ok(None),
            "0" => Ok(Some(false)),
            "1" => Ok(Some(true)),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

/// Listing filters for the rule store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleListFilter {
    #[serde(default, alias = "type")]
    pub kind: Option<RuleKind>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulePage {
    pub supported: [RuleKind; 2],
    pub rules: Vec<AlertRule>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// CRUD over persisted alert rules.
#[derive(Clone)]
pub struct RuleStore {
    backend: Arc<dyn StorageBackend>,
}

impl RuleStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn create(&self, draft: RuleDraft) -> LedgerResult<AlertRule> {
        let spec = draft.validate()?;
        let rule = self.backend.insert_rule(&spec).await?;
        info!("Created {} alert rule {}", rule.kind().as_str(), rule.id);
        Ok(rule)
    }

    pub async fn get(&self, id: i64) -> LedgerResult<AlertRule> {
        self.backend
            .get_rule(id)
            .await?
            .ok_or_else(|| LedgerError::rule_not_found(id))
    }

    pub async fn update(&self, id: i64, patch: RulePatch) -> LedgerResult<AlertRule> {
        let current = self.get(id).await?;
        let spec = RuleDraft::from(&current.spec).merge(patch).validate()?;
        let rule = AlertRule { id, spec };
        if !self.backend.update_rule(&rule).await? {
            return Err(LedgerError::rule_not_found(id));
        }
        info!("Updated alert rule {}", id);
        Ok(rule)
    }

    pub async fn delete(&self, id: i64) -> LedgerResult<()> {
        if !self.backend.delete_rule(id).await? {
            return Err(LedgerError::rule_not_found(id));
        }
        info!("Deleted alert rule {}", id);
        Ok(())
    }

    pub async fn all(&self) -> LedgerResult<Vec<AlertRule>> {
        self.backend.list_rules().await
    }

    pub async fn enabled(&self) -> LedgerResult<Vec<AlertRule>> {
        Ok(self
            .backend
            .list_rules()
            .await?
            .into_iter()
            .filter(AlertRule::is_enabled)
            .collect())
    }

    pub async fn list(&self, filter: &RuleListFilter) -> LedgerResult<RulePage> {
        let page = filter.page.unwrap_or(1).max(1);
        let per_page = filter
            .per_page
            .unwrap_or(DEFAULT_RULES_PER_PAGE)
            .clamp(1, MAX_RULES_PER_PAGE);
        let needle = filter
            .q
            .as_deref()
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);

        let matching: Vec<AlertRule> = self
            .backend
            .list_rules()
            .await?
            .into_iter()
            .filter(|rule| filter.kind.map_or(true, |k| rule.kind() == k))
            .filter(|rule| filter.enabled.map_or(true, |e| rule.is_enabled() == e))
            .filter(|rule| {
                needle
                    .as_deref()
                    .map_or(true, |n| rule.search_haystack().contains(n))
            })
            .collect();

        let total = matching.len() as u64;
        let offset = (page - 1).saturating_mul(per_page) as usize;
        let rules = matching
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        Ok(RulePage {
            supported: [RuleKind::Threshold, RuleKind::Pattern],
            rules,
            total,
            page,
            per_page,
        })
    }
}
