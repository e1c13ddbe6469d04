//! Rule-based failure signals
//!
//! A quick keyword/regex library evaluated over `templated + raw` text; used
//! for per-line candidacy and for majority-vote labeling of batch clusters.

use std::path::Path;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::warn;

/// Bundled default rule set; a file at `failure_rules_path` overrides it
const DEFAULT_RULES: &str = include_str!("../../rules/rules.yml");

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    pattern: String,
}

#[derive(Debug)]
struct FailureRule {
    name: String,
    pattern: Regex,
}

/// Result of evaluating the rule library over one text
#[derive(Debug, Clone, Default)]
pub struct SignalMatch {
    pub has_signal: bool,
    pub label: String,
    pub score: f64,
    pub evidence: Vec<String>,
}

#[derive(Debug)]
pub struct FailureRules {
    rules: Vec<FailureRule>,
}

impl FailureRules {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(raw).context("Failed to parse rules YAML")?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for spec in file.rules {
            let pattern = RegexBuilder::new(&spec.pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid rule pattern name={}", spec.name))?;
            rules.push(FailureRule {
                name: spec.name,
                pattern,
            });
        }
        Ok(Self { rules })
    }

    /// Load from a file, falling back to the bundled rule set
    pub fn load(path: &str) -> Self {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path).map_err(anyhow::Error::from).and_then(|raw| Self::from_yaml(&raw)) {
                Ok(rules) => return rules,
                Err(e) => warn!("failed to load rules from {}: {:#}; using defaults", path, e),
            }
        }
        Self::from_yaml(DEFAULT_RULES).unwrap_or(Self { rules: Vec::new() })
    }

    /// Evaluate all rules; the first matching label wins, score grows with
    /// the number of matches capped at 1.0.
    pub fn match_signals(&self, text: &str) -> SignalMatch {
        let mut labels: Vec<String> = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(text) {
                labels.push(rule.name.clone());
            }
        }
        if labels.is_empty() {
            return SignalMatch {
                has_signal: false,
                label: "unknown".to_string(),
                score: 0.0,
                evidence: Vec::new(),
            };
        }
        let score = (0.2 * labels.len() as f64).min(1.0);
        SignalMatch {
            has_signal: true,
            label: labels[0].clone(),
            score,
            evidence: labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_rules() -> FailureRules {
        FailureRules::from_yaml(DEFAULT_RULES).unwrap()
    }

    #[test]
    fn test_security_signal() {
        let rules = default_rules();
        let m = rules.match_signals("sshd[1234]: Failed password for invalid user root");
        assert!(m.has_signal);
        assert_eq!(m.label, "security");
        assert!(m.score > 0.0);
    }

    #[test]
    fn test_no_signal() {
        let rules = default_rules();
        let m = rules.match_signals("session opened for user alice");
        assert!(!m.has_signal);
        assert_eq!(m.label, "unknown");
        assert_eq!(m.score, 0.0);
    }

    #[test]
    fn test_multiple_matches_raise_score() {
        let rules = default_rules();
        let m = rules.match_signals("i/o error on nvme0: controller reset after thermal shutdown");
        assert!(m.has_signal);
        assert!(m.evidence.len() >= 2);
        assert!(m.score >= 0.4);
    }

    #[test]
    fn test_case_insensitive() {
        let rules = default_rules();
        assert!(rules.match_signals("KERNEL PANIC - not syncing").has_signal);
    }
}
