//! Worker launch: template expansion, process handoff, outbound relays.
//!
//! A launch consumes the caller's socket. Either the expanded command is
//! `@telnet:host:port` and the daemon relays to that address itself, or the
//! command is split with shell quoting rules and spawned through the
//! configured [`Handoff`].

mod handoff;
mod registry;
pub mod template;

pub use handoff::{Handoff, InheritHandoff, PipeHandoff, WORKER_HANDLE};
pub use registry::WorkerRegistry;

use crate::config::LaunchMode;
use crate::error::LaunchError;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use template::TemplateVars;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{info, warn};

/// Outbound relay connect timeout.
const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// What to run for one session.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Command template (may be `@telnet:host:port`).
    pub template: &'a str,
    pub node: u16,
    pub working_directory: Option<&'a Path>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The worker exited.
    Exited(ExitStatus),
    /// An outbound relay closed after moving this many bytes.
    Relayed { to_remote: u64, to_client: u64 },
}

/// Spawns workers and waits for them.
pub struct ProcessLauncher {
    handoff: Box<dyn Handoff>,
    registry: Arc<WorkerRegistry>,
    daemon_pid: u32,
}

impl ProcessLauncher {
    pub fn new(mode: LaunchMode, registry: Arc<WorkerRegistry>) -> Self {
        let handoff: Box<dyn Handoff> = match mode {
            LaunchMode::Inherit => Box::new(InheritHandoff),
            LaunchMode::Pipe => Box::new(PipeHandoff),
        };
        Self::with_handoff(handoff, registry)
    }

    pub fn with_handoff(handoff: Box<dyn Handoff>, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            handoff,
            registry,
            daemon_pid: std::process::id(),
        }
    }

    /// Expand the request's template for this daemon.
    pub fn command_line(&self, request: &LaunchRequest<'_>) -> String {
        template::expand(
            request.template,
            &TemplateVars {
                node: request.node,
                handle: WORKER_HANDLE,
                pid: self.daemon_pid,
            },
        )
    }

    /// Run one session to completion. `on_spawn` receives the worker pid.
    pub async fn launch(
        &self,
        stream: TcpStream,
        request: LaunchRequest<'_>,
        on_spawn: impl FnOnce(u32),
    ) -> Result<SessionOutcome, LaunchError> {
        let command_line = self.command_line(&request);

        if let Some(target) = template::relay_target(&command_line) {
            return relay(stream, target, request.node).await;
        }

        let command = build_command(&command_line, request.working_directory)?;
        let worker = self.handoff.spawn(stream, command).await?;
        let pid = worker.id();
        if let Some(pid) = pid {
            self.registry.record(pid);
            on_spawn(pid);
        }
        info!(
            node = request.node,
            pid,
            handoff = self.handoff.name(),
            command = %command_line,
            "worker started"
        );

        let result = worker.wait().await;
        if let Some(pid) = pid {
            self.registry.forget(pid);
        }
        let status = result?;
        if status.success() {
            info!(node = request.node, pid, %status, "worker exited");
        } else {
            warn!(node = request.node, pid, %status, "worker exited abnormally");
        }
        Ok(SessionOutcome::Exited(status))
    }
}

/// Split a command line and prepare it for spawning.
fn build_command(command_line: &str, working_directory: Option<&Path>) -> Result<Command, LaunchError> {
    let words = shell_words::split(command_line).map_err(|source| LaunchError::InvalidCommand {
        command: command_line.to_string(),
        source,
    })?;
    let (program, args) = words.split_first().ok_or(LaunchError::EmptyCommand)?;

    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = working_directory {
        command.current_dir(dir);
    }
    Ok(command)
}

async fn relay(mut stream: TcpStream, target: &str, node: u16) -> Result<SessionOutcome, LaunchError> {
    let connect_error = |source| LaunchError::Connect {
        target: target.to_string(),
        source,
    };
    let mut remote = tokio::time::timeout(RELAY_CONNECT_TIMEOUT, TcpStream::connect(target))
        .await
        .map_err(|_| connect_error(std::io::ErrorKind::TimedOut.into()))?
        .map_err(connect_error)?;
    info!(node, %target, "relay connected");

    // Reset or half-close from either side just ends the session.
    let (to_remote, to_client) = match tokio::io::copy_bidirectional(&mut stream, &mut remote).await {
        Ok(counts) => counts,
        Err(e) => {
            info!(node, %target, error = %e, "relay ended with error");
            (0, 0)
        }
    };
    info!(node, %target, to_remote, to_client, "relay closed");
    Ok(SessionOutcome::Relayed { to_remote, to_client })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn launcher(mode: LaunchMode) -> ProcessLauncher {
        ProcessLauncher::new(mode, Arc::new(WorkerRegistry::new()))
    }

    #[test]
    fn command_line_uses_daemon_pid_and_handle_zero() {
        let launcher = launcher(LaunchMode::Inherit);
        let request = LaunchRequest {
            template: "bbs -N@N -H@H -P@P",
            node: 7,
            working_directory: None,
        };
        assert_eq!(
            launcher.command_line(&request),
            format!("bbs -N7 -H0 -P{}", std::process::id())
        );
    }

    #[test]
    fn splits_with_shell_quoting() {
        let command = build_command("sh -c 'echo a b'", None).unwrap();
        let std = command.as_std();
        assert_eq!(std.get_program(), "sh");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(args, ["-c", "echo a b"]);
    }

    #[test]
    fn rejects_empty_and_unbalanced_commands() {
        assert!(matches!(build_command("   ", None), Err(LaunchError::EmptyCommand)));
        assert!(matches!(
            build_command("sh -c 'unterminated", None),
            Err(LaunchError::InvalidCommand { .. })
        ));
    }

    #[tokio::test]
    async fn launch_reports_pid_and_exit() {
        let registry = Arc::new(WorkerRegistry::new());
        let launcher = ProcessLauncher::new(LaunchMode::Pipe, Arc::clone(&registry));
        let (mut client, server) = socket_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let seen = Mutex::new(None);

        let request = LaunchRequest {
            template: "sh -c 'echo node @N in $(pwd)'",
            node: 3,
            working_directory: Some(dir.path()),
        };
        let outcome = launcher
            .launch(server, request, |pid| *seen.lock().unwrap() = Some(pid))
            .await
            .unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(output.starts_with("node 3 in "));
        assert!(output.trim_end().ends_with(&dir_name));

        assert!(matches!(outcome, SessionOutcome::Exited(status) if status.success()));
        assert!(seen.lock().unwrap().is_some());
        assert_eq!(registry.latest(), None);
    }

    #[tokio::test]
    async fn telnet_target_relays_to_remote() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = echo.accept().await.unwrap();
            let (mut rd, mut wr) = conn.split();
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });

        let launcher = launcher(LaunchMode::Inherit);
        let (mut client, server) = socket_pair().await;
        let template = format!("@telnet:{echo_addr}");
        let session = tokio::spawn(async move {
            let request = LaunchRequest {
                template: &template,
                node: 1,
                working_directory: None,
            };
            launcher.launch(server, request, |_| {}).await
        });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.shutdown().await.unwrap();

        let outcome = session.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::Relayed {
                to_remote: 4,
                to_client: 4
            }
        );
    }

    #[tokio::test]
    async fn unreachable_relay_target_is_a_connect_error() {
        // Reserve a port, then free it so nothing listens there.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let launcher = launcher(LaunchMode::Inherit);
        let (_client, server) = socket_pair().await;
        let template = format!("@telnet:{addr}");
        let request = LaunchRequest {
            template: &template,
            node: 1,
            working_directory: None,
        };
        let err = launcher.launch(server, request, |_| {}).await.unwrap_err();
        assert_eq!(err.error_code(), "connect");
    }
}
