//! Rule-based alerting over the action log.

pub mod engine;
pub mod notifier;
pub mod pattern;
pub mod rules;

pub use engine::{AlertEngine, Evaluation, MAX_SAMPLES};
pub use notifier::{
    AlertEvent, AlertNotification, AlertStats, NotificationDispatcher, Notifier, WebhookNotifier,
};
pub use pattern::compile_pattern;
pub use rules::{
    AlertRule, RuleCondition, RuleDraft, RuleFilters, RuleKind, RuleListFilter, RulePage,
    RulePatch, RuleSpec, RuleStore, DEFAULT_WINDOW_SECONDS,
};
