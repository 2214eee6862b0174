use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MnemoError, Result};
use crate::types::Metadata;

// ── Forgetting ─────────────────────────────────────────────────

/// Upper bound for time- and access-based thresholds, in days.
pub const MAX_FORGET_DAYS: f64 = 36_500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForgettingStrategy {
    /// Forget memories created more than `threshold` days ago.
    TimeBased,
    /// Forget memories not accessed for `threshold` days (creation time if never accessed).
    AccessBased,
    /// Forget memories with importance strictly below `threshold`.
    ImportanceBased,
}

/// Per-agent rule set governing scheduled memory deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgettingPolicy {
    pub enabled: bool,
    pub strategy: ForgettingStrategy,
    pub threshold: f64,
    #[serde(default)]
    pub archive_before_delete: bool,
}

impl ForgettingPolicy {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(MnemoError::validation(
                "threshold",
                "must be a non-negative number",
            ));
        }
        match self.strategy {
            ForgettingStrategy::ImportanceBased if self.threshold > 10.0 => {
                Err(MnemoError::validation(
                    "threshold",
                    "importance threshold must be within 0..=10",
                ))
            }
            ForgettingStrategy::TimeBased | ForgettingStrategy::AccessBased
                if self.threshold > MAX_FORGET_DAYS =>
            {
                Err(MnemoError::validation(
                    "threshold",
                    format!("age threshold must be at most {MAX_FORGET_DAYS} days"),
                ))
            }
            _ => Ok(()),
        }
    }
}

// ── Filters ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Case-insensitive substring match on content.
    Content,
    /// Presence of a metadata key.
    Metadata,
    /// Comparison such as `>= 5` against the write's importance.
    Importance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Reject,
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(rename = "type")]
    pub rule_type: FilterType,
    pub condition: String,
    pub action: FilterAction,
}

/// The parts of a write a filter rule can inspect.
#[derive(Debug, Clone, Copy)]
pub struct FilterSubject<'a> {
    pub content: &'a str,
    pub metadata: &'a Metadata,
    pub importance: Option<f64>,
}

/// Outcome of running an agent's filter rules over a write.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Accept { flagged: Vec<FilterRule> },
    Reject { rule: FilterRule },
}

impl FilterVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, FilterVerdict::Reject { .. })
    }
}

impl FilterRule {
    pub fn new(rule_type: FilterType, condition: impl Into<String>, action: FilterAction) -> Self {
        Self {
            rule_type,
            condition: condition.into(),
            action,
        }
    }

    pub fn matches(&self, subject: &FilterSubject<'_>) -> Result<bool> {
        match self.rule_type {
            FilterType::Content => Ok(subject
                .content
                .to_lowercase()
                .contains(&self.condition.to_lowercase())),
            FilterType::Metadata => Ok(subject.metadata.contains_key(self.condition.trim())),
            FilterType::Importance => {
                let Some(importance) = subject.importance else {
                    return Ok(false);
                };
                let (op, threshold) = parse_comparison(&self.condition)?;
                Ok(op.apply(importance, threshold))
            }
        }
    }
}

impl std::fmt::Display for FilterRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.rule_type {
            FilterType::Content => "content",
            FilterType::Metadata => "metadata",
            FilterType::Importance => "importance",
        };
        write!(f, "{kind} '{}'", self.condition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl Comparison {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Gt => lhs > rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Eq => (lhs - rhs).abs() < f64::EPSILON,
        }
    }
}

fn parse_comparison(condition: &str) -> Result<(Comparison, f64)> {
    // Two-character operators first so ">=" is not read as ">".
    const OPS: [(&str, Comparison); 5] = [
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        ("==", Comparison::Eq),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ];
    let trimmed = condition.trim();
    for (token, op) in OPS {
        if let Some(rest) = trimmed.strip_prefix(token) {
            let value = rest.trim().parse::<f64>().map_err(|e| {
                MnemoError::validation("condition", format!("bad threshold in '{condition}': {e}"))
            })?;
            return Ok((op, value));
        }
    }
    Err(MnemoError::validation(
        "condition",
        format!("unsupported comparison '{condition}'"),
    ))
}

/// Evaluate rules in order. The first matching `reject` rule rejects;
/// `flag` rules are collected and evaluation continues. A rule that fails
/// to evaluate is logged and treated as not matching.
pub fn evaluate_rules(rules: &[FilterRule], subject: &FilterSubject<'_>) -> FilterVerdict {
    let mut flagged = Vec::new();
    for rule in rules {
        match rule.matches(subject) {
            Ok(true) => match rule.action {
                FilterAction::Reject => return FilterVerdict::Reject { rule: rule.clone() },
                FilterAction::Flag => flagged.push(rule.clone()),
            },
            Ok(false) => {}
            Err(e) => warn!(rule = %rule, error = %e, "filter rule failed to evaluate, skipping"),
        }
    }
    FilterVerdict::Accept { flagged }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_char_operators() {
        assert_eq!(parse_comparison(">= 5").unwrap(), (Comparison::Ge, 5.0));
        assert_eq!(parse_comparison("<=2.5").unwrap(), (Comparison::Le, 2.5));
        assert_eq!(parse_comparison("== 7").unwrap(), (Comparison::Eq, 7.0));
        assert_eq!(parse_comparison(" > 1").unwrap(), (Comparison::Gt, 1.0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_comparison("about 5").is_err());
        assert!(parse_comparison("> five").is_err());
    }
}
