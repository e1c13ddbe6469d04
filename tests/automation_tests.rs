//! Automation rule semantics: bundled rules parse, matching honors every
//! match field, and rendering fills alert placeholders.

use log_sentinel::pipeline::automations::{
    parse_cooldown, render_template, rule_matches, RuleSet,
};
use serde_json::json;

#[test]
fn test_bundled_rules_parse() {
    let raw = std::fs::read_to_string("rules/automations.yml").unwrap();
    let rules = RuleSet::from_yaml(&raw).unwrap();
    assert!(rules.rules.len() >= 2);

    let disk_rule = rules
        .rules
        .iter()
        .find(|r| r.id == "disk-failure-remediation")
        .expect("disk rule present");
    assert_eq!(disk_rule.action.provider, "ansible_tower");
    assert_eq!(parse_cooldown(disk_rule.cooldown.as_deref().unwrap()), 900);

    let snow_rule = rules
        .rules
        .iter()
        .find(|r| r.id == "security-ticket")
        .expect("security rule present");
    assert_eq!(parse_cooldown(snow_rule.cooldown.as_deref().unwrap()), 3600);
}

#[test]
fn test_bundled_disk_rule_matches_confident_disk_alert() {
    let raw = std::fs::read_to_string("rules/automations.yml").unwrap();
    let rules = RuleSet::from_yaml(&raw).unwrap();
    let disk_rule = rules
        .rules
        .iter()
        .find(|r| r.id == "disk-failure-remediation")
        .unwrap();

    let alert = json!({
        "id": "1722400000000-0",
        "os": "linux",
        "issue_key": "linux|smartd|991",
        "failure_type": "disk",
        "confidence": "0.92",
        "result": {"summary": "smart errors increasing"},
    });
    assert!(rule_matches(disk_rule, &alert));

    let weak = json!({
        "issue_key": "linux|smartd|991",
        "failure_type": "disk",
        "confidence": "0.5",
        "result": {},
    });
    assert!(!rule_matches(disk_rule, &weak));
}

#[test]
fn test_template_rendering_for_extra_vars() {
    let alert = json!({
        "id": "1-0",
        "issue_key": "linux|smartd|991",
        "failure_type": "disk",
        "result": {"summary": "smart errors increasing", "recommendation": "replace sda"},
    });
    assert_eq!(
        render_template("{{ alert.issue_key }}", &alert),
        "linux|smartd|991"
    );
    assert_eq!(
        render_template("fix: {{ alert.result.recommendation }}", &alert),
        "fix: replace sda"
    );
    // unknown placeholders are left untouched
    assert_eq!(
        render_template("{{ alert.nope }}", &alert),
        "{{ alert.nope }}"
    );
}
