//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Longest accepted burst window (one day).
pub const MAX_WINDOW_SECONDS: u64 = 86_400;

/// Longest accepted ban step (ten years).
pub const MAX_BAN_STEP: Duration = Duration::from_secs(3_650 * 86_400);

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("at least one [[service]] is required")]
    NoServices,
    #[error("service '{0}' key must be exactly one character")]
    InvalidKey(String),
    #[error("service key '{0}' is used more than once")]
    DuplicateKey(String),
    #[error("service '{name}' has start_node {start} greater than end_node {end}")]
    InvalidNodeRange { name: String, start: u16, end: u16 },
    #[error("services '{first}' and '{second}' have overlapping node ranges")]
    OverlappingNodes { first: String, second: String },
    #[error("service '{0}' has an empty telnet_command")]
    EmptyCommand(String),
    #[error("binkp start_node {start} greater than end_node {end}")]
    InvalidBinkpRange { start: u16, end: u16 },
    #[error("ports.binkp is set but there is no [binkp] section")]
    MissingBinkpSection,
    #[error("blocking.session_threshold must be at least 1")]
    ZeroThreshold,
    #[error("blocking.window_seconds must be at least 1")]
    ZeroWindow,
    #[error("blocking.window_seconds must be at most {MAX_WINDOW_SECONDS}")]
    WindowTooLong,
    #[error("blocking.ban_ladder step '{0}' is longer than ten years")]
    LadderStepTooLong(String),
    #[error("blocking.max_concurrent_per_peer must be at least 1")]
    ZeroConcurrency,
    #[error("blocking.ban_ladder: {0}")]
    InvalidLadder(String),
    #[error("blocking.use_dns_rbl is set but dns_rbl_server is empty")]
    EmptyRblServer,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.services.is_empty() {
        errors.push(ValidationError::NoServices);
    }

    let mut keys = HashSet::new();
    for svc in &config.services {
        match svc.key_char() {
            Some(c) => {
                if !keys.insert(c.to_ascii_uppercase()) {
                    errors.push(ValidationError::DuplicateKey(svc.key.clone()));
                }
            }
            None => errors.push(ValidationError::InvalidKey(svc.name.clone())),
        }
        if svc.start_node > svc.end_node {
            errors.push(ValidationError::InvalidNodeRange {
                name: svc.name.clone(),
                start: svc.start_node,
                end: svc.end_node,
            });
        }
        if svc.telnet_command.trim().is_empty() {
            errors.push(ValidationError::EmptyCommand(svc.name.clone()));
        }
    }

    // Node numbers name semaphore files, so ranges must not collide.
    for (i, a) in config.services.iter().enumerate() {
        for b in config.services.iter().skip(i + 1) {
            if a.start_node <= b.end_node && b.start_node <= a.end_node {
                errors.push(ValidationError::OverlappingNodes {
                    first: a.name.clone(),
                    second: b.name.clone(),
                });
            }
        }
    }

    match &config.binkp {
        Some(binkp) if binkp.start_node > binkp.end_node => {
            errors.push(ValidationError::InvalidBinkpRange {
                start: binkp.start_node,
                end: binkp.end_node,
            });
        }
        Some(_) => {}
        None => {
            if matches!(config.ports.binkp, Some(port) if port != 0) {
                errors.push(ValidationError::MissingBinkpSection);
            }
        }
    }

    let blocking = &config.blocking;
    if blocking.session_threshold == 0 {
        errors.push(ValidationError::ZeroThreshold);
    }
    if blocking.window_seconds == 0 {
        errors.push(ValidationError::ZeroWindow);
    }
    if blocking.max_concurrent_per_peer == 0 {
        errors.push(ValidationError::ZeroConcurrency);
    }
    if blocking.window_seconds > MAX_WINDOW_SECONDS {
        errors.push(ValidationError::WindowTooLong);
    }
    match blocking.ladder() {
        Ok(steps) => {
            for (raw, step) in blocking.ban_ladder.iter().zip(steps) {
                if step > MAX_BAN_STEP {
                    errors.push(ValidationError::LadderStepTooLong(raw.clone()));
                }
            }
        }
        Err(e) => errors.push(ValidationError::InvalidLadder(e.to_string())),
    }
    if blocking.use_dns_rbl && blocking.dns_rbl_server.trim().is_empty() {
        errors.push(ValidationError::EmptyRblServer);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
