//! Automations
//!
//! Matches alerts against YAML-backed rules and dispatches remediation
//! actions to external providers. A `SET NX EX` cooldown key per
//! `(rule, alert key)` guarantees at most one action per window; dry-run
//! mode logs what would have fired.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::pipeline::PipelineContext;

pub const GROUP_NAME: &str = "automations";
pub const CONSUMER_NAME: &str = "auto_1";

const READ_COUNT: usize = 50;
const BLOCK_MS: usize = 1000;
const DEFAULT_COOLDOWN_SECS: u64 = 900;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchSpec {
    pub failure_type: Option<String>,
    pub issue_key: Option<String>,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub provider: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    #[serde(default, rename = "match")]
    pub match_spec: MatchSpec,
    pub action: ActionSpec,
    #[serde(default)]
    pub cooldown: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<AutomationRule>,
}

impl RuleSet {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("Failed to parse automation rules")
    }

    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_yaml(&raw).unwrap_or_else(|e| {
                warn!("invalid automation rules at {}: {:#}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

/// Parse a cooldown like "15m" / "1h" / "30s" (bare numbers are seconds)
pub fn parse_cooldown(cooldown: &str) -> u64 {
    let trimmed = cooldown.trim();
    if trimmed.is_empty() {
        return DEFAULT_COOLDOWN_SECS;
    }
    let (number, multiplier) = match trimmed.chars().last() {
        Some('s') | Some('S') => (&trimmed[..trimmed.len() - 1], 1),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 60),
        Some('h') | Some('H') => (&trimmed[..trimmed.len() - 1], 3600),
        _ => (trimmed, 1),
    };
    number
        .parse::<u64>()
        .map(|n| n * multiplier)
        .unwrap_or(DEFAULT_COOLDOWN_SECS)
}

/// Render `{{ alert.<field> }}` and `{{ alert.result.<field> }}` placeholders
pub fn render_template(template: &str, alert: &Value) -> String {
    let mut out = template.to_string();
    if let Some(map) = alert.as_object() {
        for (key, value) in map {
            if value.is_object() || value.is_array() {
                continue;
            }
            out = out.replace(
                &format!("{{{{ alert.{key} }}}}"),
                &scalar_to_string(value),
            );
        }
        if let Some(result) = map.get("result").and_then(Value::as_object) {
            for (key, value) in result {
                if value.is_object() || value.is_array() {
                    continue;
                }
                out = out.replace(
                    &format!("{{{{ alert.result.{key} }}}}"),
                    &scalar_to_string(value),
                );
            }
        }
    }
    out
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a rule's match block accepts an alert
pub fn rule_matches(rule: &AutomationRule, alert: &Value) -> bool {
    let failure_type = alert
        .get("failure_type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| alert.pointer("/result/failure_type").and_then(Value::as_str))
        .unwrap_or("");
    let issue_key = alert.get("issue_key").and_then(Value::as_str).unwrap_or("");
    let confidence = alert
        .get("confidence")
        .and_then(parse_confidence)
        .or_else(|| alert.pointer("/result/confidence").and_then(parse_confidence))
        .unwrap_or(0.0);

    if let Some(expected) = &rule.match_spec.failure_type {
        if expected != failure_type {
            return false;
        }
    }
    if let Some(expected) = &rule.match_spec.issue_key {
        if expected != issue_key {
            return false;
        }
    }
    confidence >= rule.match_spec.min_confidence.unwrap_or(0.0)
}

fn parse_confidence(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Runtime status snapshot for the automations role
#[derive(Debug, Clone, serde::Serialize)]
pub struct AutomationsStatus {
    pub enabled: bool,
    pub dry_run: bool,
    pub total_triggered: u64,
    pub provider_counts: std::collections::HashMap<String, u64>,
    pub last_trigger_time: Option<String>,
}

#[derive(Clone)]
pub struct Automations {
    ctx: PipelineContext,
    rules: Arc<RwLock<RuleSet>>,
    http: reqwest::Client,
    enabled: Arc<AtomicBool>,
    dry_run: Arc<AtomicBool>,
    total_triggered: Arc<AtomicU64>,
    provider_counts: Arc<DashMap<String, u64>>,
    last_trigger: Arc<RwLock<Option<String>>>,
}

impl Automations {
    pub fn new(ctx: PipelineContext) -> Self {
        let rules = RuleSet::load(&ctx.settings.automation_rules_path);
        let enabled = ctx.settings.enable_automations;
        let dry_run = ctx.settings.automations_dry_run;
        Self {
            ctx,
            rules: Arc::new(RwLock::new(rules)),
            http: reqwest::Client::new(),
            enabled: Arc::new(AtomicBool::new(enabled)),
            dry_run: Arc::new(AtomicBool::new(dry_run)),
            total_triggered: Arc::new(AtomicU64::new(0)),
            provider_counts: Arc::new(DashMap::new()),
            last_trigger: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::SeqCst);
    }

    pub fn set_dry_run(&self, value: bool) {
        self.dry_run.store(value, Ordering::SeqCst);
    }

    pub fn reload_rules(&self) {
        *self.rules.write() = RuleSet::load(&self.ctx.settings.automation_rules_path);
    }

    pub fn status(&self) -> AutomationsStatus {
        AutomationsStatus {
            enabled: self.enabled.load(Ordering::SeqCst),
            dry_run: self.dry_run.load(Ordering::SeqCst),
            total_triggered: self.total_triggered.load(Ordering::SeqCst),
            provider_counts: self
                .provider_counts
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            last_trigger_time: self.last_trigger.read().clone(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let stream = self.ctx.settings.alerts_stream.clone();
        self.ctx.broker.create_group(&stream, GROUP_NAME).await?;

        while !self.ctx.shutdown.is_set() {
            if !self.enabled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            let messages = match self
                .ctx
                .broker
                .read_group(&stream, GROUP_NAME, CONSUMER_NAME, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    info!("automations read failed err={:#}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if messages.is_empty() {
                continue;
            }

            let mut to_ack = Vec::new();
            for message in messages {
                to_ack.push(message.id.clone());
                let alert = json!({
                    "id": message.id,
                    "os": message.fields.get("os").cloned().unwrap_or_default(),
                    "issue_key": message.fields.get("issue_key").cloned().unwrap_or_default(),
                    "failure_type": message.fields.get("failure_type").cloned().unwrap_or_default(),
                    "confidence": message.fields.get("confidence").cloned().unwrap_or_default(),
                    "result": crate::infra::alerts::parse_result(
                        message.fields.get("result").map(String::as_str)
                    ),
                });
                let rules = self.rules.read().clone();
                for rule in &rules.rules {
                    if let Err(e) = self.apply_rule(rule, &alert).await {
                        info!("automation exec failed rule={} err={:#}", rule.id, e);
                    }
                }
            }
            if let Err(e) = self.ctx.broker.ack(&stream, GROUP_NAME, &to_ack).await {
                info!("automations ack failed err={:#}", e);
            }
        }
        Ok(())
    }

    async fn apply_rule(&self, rule: &AutomationRule, alert: &Value) -> Result<()> {
        if !rule_matches(rule, alert) {
            return Ok(());
        }
        let alert_key = alert
            .get("issue_key")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .or_else(|| alert.get("id").and_then(Value::as_str))
            .unwrap_or("unknown");
        let cooldown_secs = parse_cooldown(rule.cooldown.as_deref().unwrap_or("15m"));
        let cooldown_key = format!("auto:cooldown:{}:{}", rule.id, alert_key);
        if !self.ctx.broker.acquire_nx_ttl(&cooldown_key, cooldown_secs).await? {
            return Ok(());
        }

        let provider = rule.action.provider.as_str();
        if self.dry_run.load(Ordering::SeqCst) {
            info!(
                "[dry-run] would trigger provider={} rule={} alert={}",
                provider,
                rule.id,
                alert.get("id").and_then(serde_json::Value::as_str).unwrap_or("")
            );
        } else {
            match provider {
                "ansible_tower" => self.ansible_tower(&rule.action.params, alert).await?,
                "terraform_cloud" => self.terraform_cloud(&rule.action.params, alert).await?,
                "servicenow" => self.servicenow(&rule.action.params, alert).await?,
                other => return Err(anyhow!("unknown automation provider: {other}")),
            }
        }

        self.total_triggered.fetch_add(1, Ordering::Relaxed);
        *self
            .provider_counts
            .entry(provider.to_string())
            .or_insert(0) += 1;
        *self.last_trigger.write() = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    async fn ansible_tower(&self, params: &Value, alert: &Value) -> Result<()> {
        let base = params
            .get("base_url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim_end_matches('/');
        let Some(job_template) = params.get("job_template_id") else {
            return Ok(());
        };
        if base.is_empty() {
            return Ok(());
        }
        let url = format!("{base}/api/v2/job_templates/{job_template}/launch/");
        let token = std::env::var("TOWER_TOKEN")
            .ok()
            .or_else(|| params.get("token").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let mut extra_vars = serde_json::Map::new();
        if let Some(vars) = params.get("extra_vars").and_then(Value::as_object) {
            for (key, value) in vars {
                extra_vars.insert(
                    key.clone(),
                    Value::String(render_template(&scalar_to_string(value), alert)),
                );
            }
        }
        let mut request = self.http.post(&url).json(&json!({"extra_vars": extra_vars}));
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
        request
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn terraform_cloud(&self, params: &Value, alert: &Value) -> Result<()> {
        let Some(workspace) = params.get("workspace_id").and_then(Value::as_str) else {
            return Ok(());
        };
        let token = std::env::var("TFC_TOKEN")
            .ok()
            .or_else(|| params.get("token").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let message = render_template(
            params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Automated run"),
            alert,
        );
        let payload = json!({
            "data": {
                "attributes": {"message": message, "plan-only": false},
                "type": "runs",
                "relationships": {
                    "workspace": {"data": {"type": "workspaces", "id": workspace}},
                },
            },
        });
        let mut request = self
            .http
            .post("https://app.terraform.io/api/v2/runs")
            .json(&payload);
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
        request
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn servicenow(&self, params: &Value, alert: &Value) -> Result<()> {
        let base = params
            .get("base_url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim_end_matches('/');
        if base.is_empty() {
            return Ok(());
        }
        let table = params
            .get("table")
            .and_then(Value::as_str)
            .unwrap_or("incident");
        let user = std::env::var("SN_USER")
            .ok()
            .or_else(|| params.get("user").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let password = std::env::var("SN_PASSWORD")
            .ok()
            .or_else(|| params.get("password").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        let mut payload = serde_json::Map::new();
        if let Some(fields) = params.get("payload").and_then(Value::as_object) {
            for (key, value) in fields {
                payload.insert(
                    key.clone(),
                    Value::String(render_template(&scalar_to_string(value), alert)),
                );
            }
        }
        let mut request = self
            .http
            .post(format!("{base}/api/now/table/{table}"))
            .json(&payload);
        if !user.is_empty() || !password.is_empty() {
            request = request.basic_auth(user, Some(password));
        }
        request
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(failure_type: Option<&str>, issue_key: Option<&str>, min_confidence: Option<f64>) -> AutomationRule {
        AutomationRule {
            id: "r1".to_string(),
            match_spec: MatchSpec {
                failure_type: failure_type.map(String::from),
                issue_key: issue_key.map(String::from),
                min_confidence,
            },
            action: ActionSpec {
                provider: "ansible_tower".to_string(),
                params: json!({}),
            },
            cooldown: Some("15m".to_string()),
        }
    }

    #[test]
    fn test_parse_cooldown_units() {
        assert_eq!(parse_cooldown("30s"), 30);
        assert_eq!(parse_cooldown("15m"), 900);
        assert_eq!(parse_cooldown("1h"), 3600);
        assert_eq!(parse_cooldown("45"), 45);
        assert_eq!(parse_cooldown("bogus"), 900);
        assert_eq!(parse_cooldown(""), 900);
    }

    #[test]
    fn test_rule_matching() {
        let alert = json!({
            "issue_key": "linux|smartd|42",
            "failure_type": "disk",
            "confidence": "0.9",
            "result": {},
        });
        assert!(rule_matches(&rule(Some("disk"), None, Some(0.8)), &alert));
        assert!(!rule_matches(&rule(Some("memory"), None, None), &alert));
        assert!(!rule_matches(&rule(Some("disk"), None, Some(0.95)), &alert));
        assert!(rule_matches(
            &rule(Some("disk"), Some("linux|smartd|42"), None),
            &alert
        ));
        assert!(!rule_matches(
            &rule(Some("disk"), Some("other|key|1"), None),
            &alert
        ));
    }

    #[test]
    fn test_rule_matching_falls_back_to_result_fields() {
        let alert = json!({
            "issue_key": "k",
            "failure_type": "",
            "confidence": "",
            "result": {"failure_type": "thermal", "confidence": 0.7},
        });
        assert!(rule_matches(&rule(Some("thermal"), None, Some(0.6)), &alert));
    }

    #[test]
    fn test_render_template() {
        let alert = json!({
            "issue_key": "linux|smartd|42",
            "result": {"summary": "disk failing"},
        });
        let rendered = render_template(
            "Remediate {{ alert.issue_key }}: {{ alert.result.summary }}",
            &alert,
        );
        assert_eq!(rendered, "Remediate linux|smartd|42: disk failing");
    }

    #[test]
    fn test_ruleset_yaml() {
        let raw = r#"
rules:
  - id: r1
    match:
      failure_type: disk
      min_confidence: 0.8
    action:
      provider: ansible_tower
      params:
        base_url: https://tower
        job_template_id: 42
    cooldown: 15m
"#;
        let rules = RuleSet::from_yaml(raw).unwrap();
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.rules[0].action.provider, "ansible_tower");
        assert_eq!(rules.rules[0].match_spec.min_confidence, Some(0.8));
    }
}
