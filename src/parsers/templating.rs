//! Log templating
//!
//! Volatile tokens (addresses, UUIDs, hex, versions, numbers) are masked with
//! a sentinel so that two lines differing only in those tokens collapse to the
//! same cluster-stable fingerprint.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Patterns ordered from most specific to most general to avoid over-masking
    static ref MAC_ADDRESS: Regex =
        Regex::new(r"\b(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}\b").unwrap();
    static ref IPV4_ADDRESS: Regex = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
    static ref IPV6_ADDRESS: Regex =
        Regex::new(r"\b(?:[A-Fa-f0-9]{1,4}:){2,}[A-Fa-f0-9]{1,4}\b").unwrap();
    static ref UUID_PATTERN: Regex =
        Regex::new(r"\b[0-9a-fA-F]{8}(?:-[0-9a-fA-F]{4}){3}-[0-9a-fA-F]{12}\b").unwrap();
    static ref HEX_LITERAL: Regex = Regex::new(r"\b0x[0-9A-Fa-f]+\b").unwrap();
    static ref VERSION_PATTERN: Regex = Regex::new(r"\b\d+(?:\.\d+){1,3}\b").unwrap();
    static ref HASH_NUMBER: Regex = Regex::new(r"#\d+").unwrap();
    static ref NUMBER: Regex = Regex::new(r"[-+]?\b\d+(?:\.\d+)?\b").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

const SENTINEL: &str = "<*>";

/// Mask volatile tokens in a log message body
pub fn template_content(message: &str) -> String {
    let templated = MAC_ADDRESS.replace_all(message, SENTINEL);
    let templated = IPV4_ADDRESS.replace_all(&templated, SENTINEL);
    let templated = IPV6_ADDRESS.replace_all(&templated, SENTINEL);
    let templated = UUID_PATTERN.replace_all(&templated, SENTINEL);
    let templated = HEX_LITERAL.replace_all(&templated, SENTINEL);
    let templated = VERSION_PATTERN.replace_all(&templated, SENTINEL);
    let templated = HASH_NUMBER.replace_all(&templated, "#<*>");
    let templated = NUMBER.replace_all(&templated, SENTINEL);
    // collapse whitespace introduced by substitutions
    WHITESPACE.replace_all(&templated, " ").trim().to_string()
}

/// Build a templated full line like `component[PID]: <templated content>`.
/// When `pid` is absent, the bracketed segment is omitted.
pub fn render_templated_line(component: &str, pid: Option<&str>, content: &str) -> String {
    let templated_body = template_content(content);
    let pid_part = match pid {
        Some(p) if !p.is_empty() => format!("[{p}]"),
        _ => String::new(),
    };
    let separator = if templated_body.is_empty() { "" } else { ": " };
    format!("{component}{pid_part}{separator}{templated_body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_masks_ipv4_and_numbers() {
        let out = template_content("Failed password for root from 10.0.0.1 port 22");
        assert_eq!(out, "Failed password for root from <*> port <*>");
    }

    #[test]
    fn test_masks_mac_and_ipv6() {
        let out = template_content("lease de:ad:be:ef:00:01 via fe80:0:0:1 expired");
        assert_eq!(out, "lease <*> via <*> expired");
    }

    #[test]
    fn test_masks_uuid_hex_version() {
        let out =
            template_content("job 6f1ed002-ab5c-4d6e-9aaa-1234567890ab at 0xDEADBEEF version 2.1.3");
        assert_eq!(out, "job <*> at <*> version <*>");
    }

    #[test]
    fn test_hash_number_keeps_hash() {
        assert_eq!(template_content("retry #4 of #12"), "retry #<*> of #<*>");
    }

    #[test]
    fn test_embedded_digits_not_masked() {
        // digits glued to a word are part of the token, not a volatile value
        assert_eq!(template_content("md0 resync"), "md0 resync");
        assert_eq!(template_content("eth0 up"), "eth0 up");
    }

    #[test]
    fn test_masked_variants_produce_identical_templates() {
        let a = template_content("sshd accepted connection from 10.0.0.1 port 22");
        let b = template_content("sshd accepted connection from 192.168.4.250 port 60111");
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_with_and_without_pid() {
        assert_eq!(
            render_templated_line("sshd", Some("1234"), "session opened for user root"),
            "sshd[1234]: session opened for user root"
        );
        assert_eq!(render_templated_line("kernel", None, ""), "kernel");
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(template_content("a   b\t c"), "a b c");
    }
}
