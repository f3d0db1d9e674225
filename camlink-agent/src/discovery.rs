//! System identification for CamLink agents
//!
//! The agent id is the primary MAC address without colons (Ethernet first,
//! then WiFi, then anything else). Hosts without a usable interface fall back
//! to their hostname.

use if_addrs::get_if_addrs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub agent_id: String,
    pub hostname: String,
    pub os: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum InterfaceKind {
    Ethernet,
    Wireless,
    Other,
}

impl SystemInfo {
    pub fn discover(agent_id_override: Option<&str>) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let os = std::env::consts::OS.to_string();
        let architecture = std::env::consts::ARCH.to_string();

        let agent_id = match agent_id_override.map(topic_safe_id) {
            Some(id) if !id.is_empty() => id,
            _ => primary_mac().map(|mac| agent_id_from_mac(&mac)).unwrap_or_else(|| {
                warn!("No network interface with a MAC address, using hostname as agent id");
                topic_safe_id(&hostname)
            }),
        };

        info!("Discovery complete - Agent ID: {agent_id}, Hostname: {hostname}, OS: {os}");
        Self { agent_id, hostname, os, architecture }
    }
}

pub fn agent_id_from_mac(mac: &str) -> String {
    mac.replace(':', "").to_lowercase()
}

/// The id ends up as a topic level: `/`, `+`, `#` and anything outside
/// `[A-Za-z0-9._-]` become `-`.
pub fn topic_safe_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
        .collect()
}

fn primary_mac() -> Option<String> {
    let addrs = match get_if_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {e}");
            return None;
        }
    };

    let mut candidates: Vec<(InterfaceKind, String, String)> = addrs
        .into_iter()
        .filter(|a| !a.is_loopback())
        .filter_map(|a| match mac_address::mac_address_by_name(&a.name) {
            Ok(Some(mac)) => Some((classify_interface(&a.name), a.name, mac.to_string())),
            Ok(None) => None,
            Err(e) => {
                debug!("Error getting MAC for {}: {e}", a.name);
                None
            }
        })
        .collect();
    candidates.sort();

    candidates.into_iter().next().map(|(kind, name, mac)| {
        info!("Selected {kind:?} interface {name} as primary ({mac})");
        mac
    })
}

fn classify_interface(name: &str) -> InterfaceKind {
    let name = name.to_lowercase();
    if ["wlan", "wlp", "wlo", "wifi"].iter().any(|p| name.contains(p)) {
        InterfaceKind::Wireless
    } else if ["eth", "en"].iter().any(|p| name.starts_with(p)) {
        InterfaceKind::Ethernet
    } else {
        InterfaceKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_classification() {
        assert_eq!(classify_interface("eth0"), InterfaceKind::Ethernet);
        assert_eq!(classify_interface("en0"), InterfaceKind::Ethernet);
        assert_eq!(classify_interface("wlan0"), InterfaceKind::Wireless);
        assert_eq!(classify_interface("docker0"), InterfaceKind::Other);
        assert!(InterfaceKind::Ethernet < InterfaceKind::Wireless);
    }

    #[test]
    fn test_agent_id_from_mac() {
        assert_eq!(agent_id_from_mac("A1:B2:C3:D4:E5:F6"), "a1b2c3d4e5f6");
    }

    #[test]
    fn test_topic_safe_id() {
        assert_eq!(topic_safe_id("build-mac.lan"), "build-mac.lan");
        assert_eq!(topic_safe_id("lab/#"), "lab--");
        assert_eq!(topic_safe_id(" rack+1 "), "rack-1");
        assert_eq!(topic_safe_id("Poste Dév"), "Poste-D-v");
    }

    #[test]
    fn test_override_cannot_escape_command_topic() {
        let info = SystemInfo::discover(Some("bench/+"));
        assert_eq!(info.agent_id, "bench--");
        let topic = camlink_kernel::protocol::command_topic(&info.agent_id);
        assert_eq!(topic.matches('/').count(), 3);
        assert!(!topic.contains(['+', '#']));
    }

    #[test]
    fn test_override_wins() {
        let info = SystemInfo::discover(Some("bench-mac"));
        assert_eq!(info.agent_id, "bench-mac");
        assert_eq!(info.os, std::env::consts::OS);
    }
}
