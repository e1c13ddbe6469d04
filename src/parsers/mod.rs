//! OS-specific log line parsers and the templating masker

pub mod linux;
pub mod macos;
pub mod templating;
pub mod windows;

use crate::schemas::logs::ParsedLog;
use templating::render_templated_line;

/// Parse a line with the OS-specific regex (when one exists) and render the
/// templated form. Parse failures fall back to `component="unknown"` with the
/// raw line as content; the line is still templated and ingested.
pub fn parse_and_template(os_name: &str, line: &str) -> (String, ParsedLog) {
    let parsed = match os_name {
        "linux" => linux::parse_linux_line(line),
        "macos" => macos::parse_macos_line(line),
        "windows" => windows::parse_windows_line(line),
        _ => None,
    };
    match parsed {
        Some(parsed) => {
            let templated = render_templated_line(
                &parsed.component,
                parsed.pid.as_deref(),
                &parsed.content,
            );
            (templated, parsed)
        }
        None => {
            let parsed = ParsedLog::unknown(line);
            let templated = render_templated_line("unknown", None, line);
            (templated, parsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_template_linux() {
        let (templated, parsed) = parse_and_template(
            "linux",
            "Jun 14 15:16:01 combo sshd[1234]: Failed password for root from 10.0.0.1",
        );
        assert_eq!(parsed.component, "sshd");
        assert!(templated.starts_with("sshd[1234]:"));
        assert!(templated.contains("<*>"));
    }

    #[test]
    fn test_parse_and_template_fallback() {
        let (templated, parsed) = parse_and_template("network", "latency spike 300ms");
        assert_eq!(parsed.component, "unknown");
        assert!(templated.starts_with("unknown:"));
    }
}
