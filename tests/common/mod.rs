//! Integration test common infrastructure.
//!
//! Provides utilities for spawning the daemon, connecting callers, and
//! asserting on what they are sent.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::{TestConfig, TestServer};
