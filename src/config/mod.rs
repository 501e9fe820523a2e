//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig)
//! - [`listen`]: Listening ports (PortsConfig)
//! - [`security`]: Admission policy (BlockingConfig, ban ladder parsing)
//! - [`services`]: Dispatch targets (ServiceConfig, BinkpConfig)
//! - [`validation`]: Startup sanity checks

mod defaults;
mod listen;
mod security;
mod services;
mod types;
pub mod validation;

pub use security::DurationParseError;
pub use services::{BinkpConfig, ServiceConfig};
pub use types::{Config, LaunchMode};
