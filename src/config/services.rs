//! Service (dispatch target) configuration.

use serde::Deserialize;
use std::path::PathBuf;

use super::defaults::default_binkp_node;

/// One service offered to interactive callers.
///
/// Each service owns a contiguous node range `[start_node, end_node]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Menu key (single character, matched case-insensitively).
    pub key: String,
    /// Display name.
    pub name: String,
    /// Menu description.
    #[serde(default)]
    pub description: String,
    /// Refuse callers whose terminal does not answer the ANSI probe.
    #[serde(default)]
    pub require_ansi: bool,
    /// Worker command template for telnet callers.
    pub telnet_command: String,
    /// Worker command template for SSH callers (falls back to `telnet_command`).
    pub ssh_command: Option<String>,
    /// First node number.
    pub start_node: u16,
    /// Last node number (inclusive).
    pub end_node: u16,
    /// Working directory for the worker.
    pub working_directory: Option<PathBuf>,
}

impl ServiceConfig {
    /// Command template for SSH callers.
    pub fn ssh_template(&self) -> &str {
        self.ssh_command.as_deref().unwrap_or(&self.telnet_command)
    }

    /// The menu key as a single character.
    pub fn key_char(&self) -> Option<char> {
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

/// Binkp mailer configuration. Binkp sessions use their own node pool.
#[derive(Debug, Clone, Deserialize)]
pub struct BinkpConfig {
    /// Mailer command template.
    pub command: String,
    /// Working directory for the mailer.
    pub working_directory: Option<PathBuf>,
    /// First binkp node number (default: 1).
    #[serde(default = "default_binkp_node")]
    pub start_node: u16,
    /// Last binkp node number (default: 1).
    #[serde(default = "default_binkp_node")]
    pub end_node: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(key: &str) -> ServiceConfig {
        ServiceConfig {
            key: key.to_string(),
            name: "Main".to_string(),
            description: String::new(),
            require_ansi: false,
            telnet_command: "bbs @N".to_string(),
            ssh_command: None,
            start_node: 1,
            end_node: 2,
            working_directory: None,
        }
    }

    #[test]
    fn ssh_template_falls_back_to_telnet() {
        let mut svc = service("M");
        assert_eq!(svc.ssh_template(), "bbs @N");
        svc.ssh_command = Some("bbs --ssh @N".to_string());
        assert_eq!(svc.ssh_template(), "bbs --ssh @N");
    }

    #[test]
    fn key_must_be_one_character() {
        assert_eq!(service("M").key_char(), Some('M'));
        assert_eq!(service("").key_char(), None);
        assert_eq!(service("MM").key_char(), None);
    }
}
