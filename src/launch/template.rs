//! Command line templates.
//!
//! | Placeholder | Expands to                      |
//! |-------------|---------------------------------|
//! | `@N`        | node number                     |
//! | `@H`        | socket handle seen by the worker |
//! | `@P`        | daemon process id               |
//!
//! Anything else after `@` is copied through unchanged, `@` included.

/// Prefix that turns a command into an outbound TCP relay.
pub const RELAY_PREFIX: &str = "@telnet:";

/// Values substituted into a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateVars {
    pub node: u16,
    pub handle: i64,
    pub pid: u32,
}

/// Expand `@` placeholders.
pub fn expand(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '@' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('N') => {
                chars.next();
                out.push_str(&vars.node.to_string());
            }
            Some('H') => {
                chars.next();
                out.push_str(&vars.handle.to_string());
            }
            Some('P') => {
                chars.next();
                out.push_str(&vars.pid.to_string());
            }
            _ => out.push('@'),
        }
    }
    out
}

/// `host:port` of a `@telnet:host:port` command, if it is one.
pub fn relay_target(command: &str) -> Option<&str> {
    command
        .trim()
        .strip_prefix(RELAY_PREFIX)
        .map(str::trim)
        .filter(|target| !target.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: TemplateVars = TemplateVars {
        node: 5,
        handle: 42,
        pid: 999,
    };

    #[test]
    fn expands_known_placeholders() {
        assert_eq!(expand("login @N @H @P", &VARS), "login 5 42 999");
        assert_eq!(expand("bbs -N@N -H@H", &VARS), "bbs -N5 -H42");
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        assert_eq!(expand("mail @X user@host", &VARS), "mail @X user@host");
        assert_eq!(expand("trailing @", &VARS), "trailing @");
        assert_eq!(expand("lower @n", &VARS), "lower @n");
    }

    #[test]
    fn repeated_at_passes_through() {
        assert_eq!(expand("echo @@N", &VARS), "echo @5");
        assert_eq!(expand("@@", &VARS), "@@");
        assert_eq!(expand("@@@H", &VARS), "@@42");
    }

    #[test]
    fn recognizes_relay_commands() {
        assert_eq!(relay_target("@telnet:bbs.example.org:23"), Some("bbs.example.org:23"));
        assert_eq!(relay_target("  @telnet:10.0.0.2:2323 "), Some("10.0.0.2:2323"));
        assert_eq!(relay_target("@telnet:"), None);
        assert_eq!(relay_target("bbs -N@N"), None);
    }
}
