//! Network module.
//!
//! Contains the listener set (accept loop), the per-connection dispatcher,
//! and the telnet preludes.

pub mod dispatch;
pub mod listener;
pub mod prelude;

pub use dispatch::Dispatcher;
pub use listener::ListenerSet;
