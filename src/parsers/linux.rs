//! Linux syslog parser
//!
//! Typical format: `Jun 14 15:16:01 host component[PID]: level? message`

use lazy_static::lazy_static;
use regex::Regex;

use crate::schemas::logs::ParsedLog;

lazy_static! {
    static ref LINUX_REGEX: Regex = Regex::new(
        r"^(?P<month>\w{3})\s+(?P<date>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2})\s+(?P<host>\S+)\s+(?P<component>[^\[]+?)\[(?P<pid>\d+)\]:\s+(?P<content>.*)$"
    )
    .unwrap();
    // Best-effort log level token inside the content
    static ref LEVEL_REGEX: Regex =
        Regex::new(r"(?i)\b(INFO|DEBUG|WARN|WARNING|ERROR|CRITICAL|ALERT)\b").unwrap();
}

pub fn parse_linux_line(line: &str) -> Option<ParsedLog> {
    let caps = LINUX_REGEX.captures(line.trim_end_matches('\n'))?;
    let content = caps.name("content").map(|m| m.as_str()).unwrap_or("");
    let level = LEVEL_REGEX
        .find(content)
        .map(|m| m.as_str().to_uppercase());
    Some(ParsedLog {
        component: caps
            .name("component")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        pid: caps.name("pid").map(|m| m.as_str().to_string()),
        content: content.to_string(),
        level,
        month: caps.name("month").map(|m| m.as_str().to_string()),
        date: caps.name("date").map(|m| m.as_str().to_string()),
        time: caps.name("time").map(|m| m.as_str().to_string()),
        host: caps.name("host").map(|m| m.as_str().to_string()),
        user: None,
        address: None,
    })
}
