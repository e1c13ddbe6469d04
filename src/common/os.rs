//! OS/domain inference and canonicalization
//!
//! Collection names, issue keys, and prototype lookups are all routed by a
//! canonical OS name. Sources carry either an explicit hint in their name
//! (`Linux.log`, `Mac.log`) or a producer kind that maps to a domain.

/// Domains with their own collections and prototype stores
pub const SUPPORTED_OSES: [&str; 4] = ["linux", "macos", "windows", "network"];

/// Canonicalize OS spellings (`mac`/`osx` -> `macos`, `win` -> `windows`)
pub fn canonical_os(os_name: &str) -> String {
    let key = os_name.trim().to_lowercase();
    match key.as_str() {
        "mac" | "macos" | "osx" => "macos".to_string(),
        "windows" | "win" => "windows".to_string(),
        "linux" => "linux".to_string(),
        "" => "unknown".to_string(),
        _ => key,
    }
}

/// The producer kind is everything before the first `:` in the source
pub fn kind_of(source: &str) -> &str {
    source.split(':').next().unwrap_or("")
}

/// Map a producer kind to its domain when the source name itself is mute
pub fn os_for_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "scom" | "squaredup" => Some("windows"),
        "thousandeyes" | "catalyst" | "snmp" | "dcim_http" => Some("network"),
        "redfish" | "redfish_log" => Some("linux"),
        _ => None,
    }
}

/// Infer the OS/domain from a full source string
pub fn infer_os(source: &str) -> String {
    let s = source.to_lowercase();
    if s.contains("linux.log") {
        return "linux".to_string();
    }
    if s.contains("mac.log") {
        return "macos".to_string();
    }
    if s.contains("windows") {
        return "windows".to_string();
    }
    if let Some(os) = os_for_kind(kind_of(&s)) {
        return os.to_string();
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_os() {
        assert_eq!(canonical_os("Mac"), "macos");
        assert_eq!(canonical_os("OSX"), "macos");
        assert_eq!(canonical_os("win"), "windows");
        assert_eq!(canonical_os("linux"), "linux");
        assert_eq!(canonical_os(""), "unknown");
        assert_eq!(canonical_os("network"), "network");
    }

    #[test]
    fn test_infer_os_from_file_sources() {
        assert_eq!(infer_os("Linux.log:filetail"), "linux");
        assert_eq!(infer_os("Mac.log"), "macos");
        assert_eq!(infer_os("windows_cbs"), "windows");
    }

    #[test]
    fn test_infer_os_from_kind() {
        assert_eq!(infer_os("snmp:10.0.0.1"), "network");
        assert_eq!(infer_os("thousandeyes:agent-1"), "network");
        assert_eq!(infer_os("scom:mgmt-server"), "windows");
        assert_eq!(infer_os("redfish:https://bmc-1"), "linux");
        assert_eq!(infer_os("mystery:host"), "unknown");
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(kind_of("snmp:10.0.0.1"), "snmp");
        assert_eq!(kind_of("plainsource"), "plainsource");
        assert_eq!(kind_of(""), "");
    }
}
