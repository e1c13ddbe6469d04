//! Table-driven parser and routing tests.

use log_sentinel::common::os::{canonical_os, infer_os};
use log_sentinel::parsers::linux::parse_linux_line;
use log_sentinel::parsers::macos::parse_macos_line;
use log_sentinel::parsers::templating::{render_templated_line, template_content};
use log_sentinel::parsers::windows::parse_windows_line;
use rstest::rstest;
use test_case::test_case;

#[rstest]
#[case(
    "Jun 14 15:16:01 combo sshd[28960]: Failed password for root from 10.0.0.1 port 22",
    "sshd",
    Some("28960")
)]
#[case(
    "Jun 15 02:04:59 combo su[5092]: pam_unix(su:auth): authentication failure",
    "su",
    Some("5092")
)]
#[case(
    "Jul 27 14:41:58 combo kernel[0]: Bluetooth: HCI device and connection manager initialized",
    "kernel",
    Some("0")
)]
fn test_linux_parser_cases(
    #[case] line: &str,
    #[case] component: &str,
    #[case] pid: Option<&str>,
) {
    let parsed = parse_linux_line(line).expect("line should parse");
    assert_eq!(parsed.component, component);
    assert_eq!(parsed.pid.as_deref(), pid);
    assert!(!parsed.content.is_empty());
}

#[rstest]
#[case(
    "Jul  1 09:00:55 calvisitor-10-105-160-95 kernel[0]: AirPort: Link Down on awdl0",
    "kernel"
)]
#[case(
    "Jul  2 19:28:03 authorMacBook-Pro corecaptured[40446]: CCFile::captureLogRun",
    "corecaptured"
)]
fn test_macos_parser_cases(#[case] line: &str, #[case] component: &str) {
    let parsed = parse_macos_line(line).expect("line should parse");
    assert_eq!(parsed.component, component);
}

#[rstest]
#[case("2016-09-28 04:30:30, Info  CBS    Starting TrustedInstaller initialization.", "CBS", "Info")]
#[case("2016-09-29 11:15:00, Error CSI    Corrupt manifest detected", "CSI", "Error")]
fn test_windows_parser_cases(#[case] line: &str, #[case] component: &str, #[case] level: &str) {
    let parsed = parse_windows_line(line).expect("line should parse");
    assert_eq!(parsed.component, component);
    assert_eq!(parsed.level.as_deref(), Some(level));
}

#[test_case("Linux.log:filetail", "linux")]
#[test_case("Mac.log", "macos")]
#[test_case("windows_cbs.log", "windows")]
#[test_case("snmp:10.0.0.1", "network")]
#[test_case("scom:mgmt-01", "windows")]
#[test_case("unknown_kind:host", "unknown")]
fn test_os_inference(source: &str, expected: &str) {
    assert_eq!(infer_os(source), expected);
}

#[test_case("Mac", "macos")]
#[test_case("osx", "macos")]
#[test_case("WIN", "windows")]
#[test_case("network", "network")]
fn test_canonical_os(input: &str, expected: &str) {
    assert_eq!(canonical_os(input), expected);
}

#[test]
fn test_templated_line_matches_component_pid_shape() {
    let parsed = parse_linux_line(
        "Jun 14 15:16:01 combo sshd[28960]: Failed password for root from 10.0.0.1 port 22",
    )
    .unwrap();
    let templated = render_templated_line(&parsed.component, parsed.pid.as_deref(), &parsed.content);
    assert_eq!(
        templated,
        "sshd[28960]: Failed password for root from <*> port <*>"
    );
}

#[test]
fn test_template_content_masks_every_class() {
    let line = "node 6f1ed002-ab5c-4d6e-9aaa-1234567890ab at 10.1.2.3 mac de:ad:be:ef:00:01 \
                fw 0xBEEF rev 1.2.3 job #42 size 1024";
    let templated = template_content(line);
    assert_eq!(
        templated,
        "node <*> at <*> mac <*> fw <*> rev <*> job #<*> size <*>"
    );
}
