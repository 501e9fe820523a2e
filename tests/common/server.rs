//! Test server management.
//!
//! Spawns and manages nodegated instances for integration testing.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Settings a test varies. Everything else uses the daemon defaults.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub telnet_command: String,
    pub start_node: u16,
    pub end_node: u16,
    pub max_concurrent_per_peer: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            telnet_command: "sh -c 'echo WELCOME @N; sleep 1'".to_string(),
            start_node: 1,
            end_node: 2,
            max_concurrent_per_peer: 10,
        }
    }
}

/// A test server instance.
pub struct TestServer {
    child: Child,
    telnet_port: u16,
    http_port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Spawn a server with the default test configuration.
    #[allow(dead_code)]
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(TestConfig::default()).await
    }

    /// Spawn a server with the given settings.
    pub async fn spawn_with(settings: TestConfig) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let telnet_port = free_port()?;
        let http_port = free_port()?;

        let config_path = data_dir.path().join("nodegate.toml");
        let config_content = format!(
            r#"
[server]
name = "testgate"
data_dir = "{data_dir}"
bind_address = "127.0.0.1"
launch_mode = "pipe"

[ports]
telnet = {telnet_port}
http = {http_port}

[blocking]
use_auto_blocklist = false
max_concurrent_per_peer = {max_concurrent}
mailer_mode_enabled = false

[[service]]
key = "M"
name = "Main"
telnet_command = "{command}"
start_node = {start}
end_node = {end}
"#,
            data_dir = data_dir.path().display(),
            http_port = http_port,
            max_concurrent = settings.max_concurrent_per_peer,
            command = settings.telnet_command.replace('\\', "\\\\").replace('"', "\\\""),
            start = settings.start_node,
            end = settings.end_node,
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(binary_path())
            .arg(&config_path)
            .env("RUST_LOG", "nodegate=debug")
            .stdout(Stdio::null())
            .spawn()?;

        let server = Self {
            child,
            telnet_port,
            http_port,
            _data_dir: data_dir,
        };

        // Wait for server to start listening
        server.wait_until_ready().await?;

        Ok(server)
    }

    /// Wait until the server is accepting connections.
    ///
    /// Probes the HTTP port so readiness checks never claim a node. Both
    /// listeners are bound before the accept loop starts.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.http_port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Server failed to start within 5 seconds")
    }

    /// Address of the telnet listener.
    pub fn telnet_address(&self) -> String {
        format!("127.0.0.1:{}", self.telnet_port)
    }

    /// Address of the HTTP status listener.
    #[allow(dead_code)]
    pub fn http_address(&self) -> String {
        format!("127.0.0.1:{}", self.http_port)
    }

    /// Connect a caller to the telnet port.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.telnet_address()).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Kill the server process
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nodegated"))
}

/// Ask the OS for an unused port.
fn free_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
