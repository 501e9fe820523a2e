//! Handing a live connection to a worker process.
//!
//! - [`InheritHandoff`]: the socket itself becomes the worker's stdin and
//!   stdout, switched back to blocking mode first.
//! - [`PipeHandoff`]: the worker gets pipes; a relay task copies bytes
//!   between them and the socket until either side closes.
//!
//! In both modes the worker reads and writes the caller on handle 0.

use crate::error::LaunchError;
use async_trait::async_trait;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle number the worker sees for the caller's connection.
pub const WORKER_HANDLE: i64 = 0;

/// How long a pipe relay may keep draining after the worker exits.
const RELAY_DRAIN: Duration = Duration::from_secs(5);

/// Strategy for connecting a worker to the caller's socket.
#[async_trait]
pub trait Handoff: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Spawn `command` wired to `stream`. The stream is consumed; the daemon
    /// keeps no copy of it once the worker is running.
    async fn spawn(&self, stream: TcpStream, command: Command) -> Result<Worker, LaunchError>;
}

/// A running worker.
#[derive(Debug)]
pub struct Worker {
    child: Child,
    relay: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the worker to exit, then for the relay (if any) to drain.
    pub async fn wait(mut self) -> Result<ExitStatus, LaunchError> {
        let status = self.child.wait().await.map_err(LaunchError::Wait)?;
        if let Some(mut relay) = self.relay.take() {
            if tokio::time::timeout(RELAY_DRAIN, &mut relay).await.is_err() {
                debug!("relay still open after worker exit, aborting");
                relay.abort();
            }
        }
        Ok(status)
    }
}

fn program_of(command: &Command) -> String {
    command.as_std().get_program().to_string_lossy().into_owned()
}

fn spawn_error(program: String) -> impl FnOnce(std::io::Error) -> LaunchError {
    move |source| LaunchError::Spawn { program, source }
}

/// Socket inheritance.
#[derive(Debug, Default, Clone, Copy)]
pub struct InheritHandoff;

#[async_trait]
impl Handoff for InheritHandoff {
    fn name(&self) -> &'static str {
        "inherit"
    }

    async fn spawn(&self, stream: TcpStream, mut command: Command) -> Result<Worker, LaunchError> {
        let socket = stream.into_std().map_err(LaunchError::Handoff)?;
        socket.set_nonblocking(false).map_err(LaunchError::Handoff)?;
        let input: OwnedFd = socket.into();
        let output = input.try_clone().map_err(LaunchError::Handoff)?;

        command.stdin(Stdio::from(input)).stdout(Stdio::from(output));
        let program = program_of(&command);
        let child = command.spawn().map_err(spawn_error(program))?;
        // The command holds the parent's copies of the socket.
        drop(command);

        Ok(Worker { child, relay: None })
    }
}

/// Pipe relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipeHandoff;

#[async_trait]
impl Handoff for PipeHandoff {
    fn name(&self) -> &'static str {
        "pipe"
    }

    async fn spawn(&self, stream: TcpStream, mut command: Command) -> Result<Worker, LaunchError> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let program = program_of(&command);
        let mut child = command.spawn().map_err(spawn_error(program))?;

        let (Some(mut to_worker), Some(mut from_worker)) = (child.stdin.take(), child.stdout.take())
        else {
            let _ = child.start_kill();
            return Err(LaunchError::Handoff(std::io::Error::other(
                "worker pipes unavailable",
            )));
        };

        let relay = tokio::spawn(async move {
            let (mut from_caller, mut to_caller) = stream.into_split();
            tokio::select! {
                r = tokio::io::copy(&mut from_caller, &mut to_worker) => {
                    debug!(result = ?r, "caller side of relay closed");
                }
                r = tokio::io::copy(&mut from_worker, &mut to_caller) => {
                    debug!(result = ?r, "worker side of relay closed");
                }
            }
        });

        Ok(Worker {
            child,
            relay: Some(relay),
        })
    }
}
