//! Windows CBS log parser
//!
//! Sample: `2016-09-28 04:30:30, Info  CBS    Message`

use lazy_static::lazy_static;
use regex::Regex;

use crate::schemas::logs::ParsedLog;

lazy_static! {
    static ref WINDOWS_REGEX: Regex = Regex::new(
        r"^(?P<date>\d{4}-\d{2}-\d{2})\s+(?P<time>\d{2}:\d{2}:\d{2}),\s+(?P<level>\w+)\s+(?P<component>\S+)\s+(?P<content>.*)$"
    )
    .unwrap();
}

pub fn parse_windows_line(line: &str) -> Option<ParsedLog> {
    let caps = WINDOWS_REGEX.captures(line.trim_end_matches('\n'))?;
    Some(ParsedLog {
        component: caps
            .name("component")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        pid: None,
        content: caps
            .name("content")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        level: caps.name("level").map(|m| m.as_str().to_string()),
        month: None,
        date: caps.name("date").map(|m| m.as_str().to_string()),
        time: caps.name("time").map(|m| m.as_str().to_string()),
        host: None,
        user: None,
        address: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cbs_line() {
        let line = "2016-09-28 04:30:30, Info  CBS    Loaded Servicing Stack v6.1.7601.23505";
        let parsed = parse_windows_line(line).expect("line should parse");
        assert_eq!(parsed.component, "CBS");
        assert_eq!(parsed.level.as_deref(), Some("Info"));
        assert!(parsed.content.starts_with("Loaded Servicing Stack"));
    }

    #[test]
    fn test_unparseable_line() {
        assert!(parse_windows_line("no structure here").is_none());
    }
}
