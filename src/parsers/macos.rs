//! macOS system.log parser
//!
//! Example: `Jul  1 09:00:55 host component[PID]: message`

use lazy_static::lazy_static;
use regex::Regex;

use crate::schemas::logs::ParsedLog;

lazy_static! {
    static ref MACOS_REGEX: Regex = Regex::new(
        r"^(?P<month>\w{3})\s+(?P<date>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2})\s+(?P<user>\S+)\s+(?P<component>[^\[]+?)\[(?P<pid>\d+)\]:\s+(?P<content>.*)$"
    )
    .unwrap();
    // Some messages include an address-like token
    static ref ADDRESS_REGEX: Regex =
        Regex::new(r"((?:\d{1,3}\.){3}\d{1,3})|([A-Fa-f0-9:]{2,})").unwrap();
}

pub fn parse_macos_line(line: &str) -> Option<ParsedLog> {
    let caps = MACOS_REGEX.captures(line.trim_end_matches('\n'))?;
    let content = caps.name("content").map(|m| m.as_str()).unwrap_or("");
    let address = ADDRESS_REGEX.find(content).map(|m| m.as_str().to_string());
    Some(ParsedLog {
        component: caps
            .name("component")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        pid: caps.name("pid").map(|m| m.as_str().to_string()),
        content: content.to_string(),
        level: None,
        month: caps.name("month").map(|m| m.as_str().to_string()),
        date: caps.name("date").map(|m| m.as_str().to_string()),
        time: caps.name("time").map(|m| m.as_str().to_string()),
        host: None,
        user: caps.name("user").map(|m| m.as_str().to_string()),
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_airport_line() {
        let line = "Jul  1 09:00:55 calvisitor-10-105-160-95 kernel[0]: AirPort: Link Down on awdl0";
        let parsed = parse_macos_line(line).expect("line should parse");
        assert_eq!(parsed.component, "kernel");
        assert_eq!(parsed.pid.as_deref(), Some("0"));
        assert_eq!(parsed.user.as_deref(), Some("calvisitor-10-105-160-95"));
    }

    #[test]
    fn test_unparseable_line() {
        assert!(parse_macos_line("###").is_none());
    }
}
