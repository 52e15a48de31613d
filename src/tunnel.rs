use crate::kubectl::Kubectl;
use futures::FutureExt;
use regex::Regex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, trace, warn};

static FORWARDING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Forwarding from .+:(\d+) -> \d+$").expect("forwarding pattern is valid")
});

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to start port-forward: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("port-forward exited without reporting a local port: {0}")]
    NoForwardingLine(String),
    #[error("port-forward did not report a local port within {0:?}")]
    Timeout(Duration),
}

/// Extracts the local port from a `kubectl port-forward` status line.
pub fn parse_forwarding_line(line: &str) -> Option<u16> {
    FORWARDING_LINE
        .captures(line.trim_end())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A running port-forward. The subprocess dies with the value; `close` waits for it.
#[derive(Debug)]
pub struct Tunnel {
    child: Child,
    local_port: u16,
}

impl Tunnel {
    pub async fn open(
        kubectl: &Kubectl,
        namespace: &str,
        pod: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Tunnel, TunnelError> {
        debug!(
            "[{}/{}] Opening port-forward to port {}",
            namespace, pod, port
        );
        let tunnel = Tunnel::spawn(kubectl.port_forward(namespace, pod, port), timeout).await?;
        debug!(
            "[{}/{}] Port-forward (pid {:?}) listening on {}",
            namespace,
            pod,
            tunnel.pid(),
            tunnel.local_address()
        );
        Ok(tunnel)
    }

    /// Starts `command` and reads its stdout until a forwarding line shows up.
    pub async fn spawn(mut command: Command, timeout: Duration) -> Result<Tunnel, TunnelError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(TunnelError::Spawn)?;

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child).await;
            return Err(TunnelError::NoForwardingLine("stdout unavailable".to_string()));
        };
        let mut lines = LinesStream::new(BufReader::new(stdout).lines());

        let wait_for_port = async {
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        trace!("port-forward: {}", line);
                        if let Some(port) = parse_forwarding_line(&line) {
                            return Some(port);
                        }
                    }
                    Err(e) => {
                        debug!("Failed to read port-forward output: {}", e);
                        return None;
                    }
                }
            }
            None
        };
        let found = tokio::time::timeout(timeout, wait_for_port).await;

        let local_port = match found {
            Ok(Some(port)) => port,
            Ok(None) => {
                let stderr = read_stderr(&mut child).await;
                terminate(&mut child).await;
                return Err(TunnelError::NoForwardingLine(stderr));
            }
            Err(_) => {
                terminate(&mut child).await;
                return Err(TunnelError::Timeout(timeout));
            }
        };

        // kubectl keeps reporting handled connections; keep the pipes from filling up.
        tokio::spawn(async move {
            while let Some(Ok(line)) = lines.next().await {
                trace!("port-forward: {}", line);
            }
        });
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(stderr));
        }

        Ok(Tunnel { child, local_port })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn local_address(&self) -> String {
        format!("localhost:{}", self.local_port())
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminates the subprocess and reaps it.
    pub async fn close(mut self) {
        terminate(&mut self.child).await;
    }

    /// Runs `f` with the tunnel's local address and closes the tunnel afterwards,
    /// also when `f` panics.
    pub async fn scoped<F, Fut, T>(self, f: F) -> T
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let address = self.local_address();
        let result = AssertUnwindSafe(f(address)).catch_unwind().await;
        self.close().await;
        match result {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        // Already exited.
        trace!("Failed to kill port-forward: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to stop port-forward: {}", e);
    }
}

async fn read_stderr(child: &mut Child) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    let read = tokio::time::timeout(Duration::from_secs(1), stderr.read_to_string(&mut buf)).await;
    if read.is_err() {
        debug!("Timed out reading port-forward stderr");
    }
    buf.trim().to_string()
}

async fn drain<R: AsyncRead + Unpin>(reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!("port-forward: {}", line);
    }
}
