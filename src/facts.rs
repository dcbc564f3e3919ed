//! Operating-system facts shared by both connector backends.
//!
//! The parsers here are pure; the connectors feed them the output of
//! `/etc/os-release`, `lsb_release -a`, and `uname` probes.

/// Facts recovered from a host's operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Os {
    /// Lowercased distro id, e.g. `ubuntu`, `debian`, `darwin`, `linux`.
    pub id: String,
    /// Release version, e.g. `22.04`.
    pub version_id: String,
    /// Human-readable name, e.g. `Ubuntu 22.04.4 LTS`.
    pub pretty_name: String,
    /// Release codename, e.g. `jammy`.
    pub codename: String,
    /// Normalized machine architecture: `amd64`, `arm64`, or as reported.
    pub arch: String,
    /// Kernel release, e.g. `5.15.0-105-generic`.
    pub kernel: String,
}

/// Normalize `uname -m` output to the architecture names the provisioning
/// engine uses for artifact selection.
pub fn normalize_arch(arch: &str) -> String {
    match arch.trim() {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Fill `os` from the `KEY=VALUE` lines of an os-release file.
///
/// Values may be double-quoted; quotes are stripped. Only the fields this
/// crate cares about are pulled out.
pub fn apply_os_release(os: &mut Os, content: &str) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "ID" => os.id = value.to_lowercase(),
            "VERSION_ID" => os.version_id = value.to_string(),
            "PRETTY_NAME" => os.pretty_name = value.to_string(),
            "VERSION_CODENAME" => os.codename = value.to_string(),
            _ => {}
        }
    }
}

/// Fill `os` from `lsb_release -a` output (`Key: value` lines).
///
/// Only fields still missing after the os-release pass are taken.
pub fn apply_lsb_release(os: &mut Os, content: &str) {
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Distributor ID" if os.id.is_empty() => os.id = value.to_lowercase(),
            "Release" if os.version_id.is_empty() => os.version_id = value.to_string(),
            "Description" if os.pretty_name.is_empty() => os.pretty_name = value.to_string(),
            "Codename" if os.codename.is_empty() => os.codename = value.to_string(),
            _ => {}
        }
    }
}

/// Map `uname -s` output to a distro id of last resort.
pub fn id_from_uname(kernel_name: &str) -> Option<&'static str> {
    let lowered = kernel_name.trim().to_lowercase();
    if lowered.starts_with("linux") {
        Some("linux")
    } else if lowered.starts_with("darwin") {
        Some("darwin")
    } else {
        None
    }
}
