use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_PREFIX: &str = "# Executed command: ";
const STARTED_PREFIX: &str = "# Started at: ";
const ERROR_PREFIX: &str = "# Resulted in error: ";
const FOOTER_PREFIX: &str = "# Total execution time: ";
const FOOTER_SUFFIX: &str = " millis";

/// The text layout every collected file shares. Downstream tooling parses it,
/// so `render` must stay byte-compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub command: String,
    pub started_at: String,
    pub errors: Vec<String>,
    pub body: String,
    pub elapsed_millis: u128,
}

impl OutputRecord {
    pub fn render(&self) -> String {
        let mut content = format!(
            "{}{}\n{}{}",
            COMMAND_PREFIX, self.command, STARTED_PREFIX, self.started_at
        );
        for err in &self.errors {
            content.push('\n');
            content.push_str(ERROR_PREFIX);
            content.push_str(err);
        }
        content.push_str("\n\n");
        content.push_str(&self.body);
        content.push_str(&format!(
            "\n\n{}{}{}",
            FOOTER_PREFIX, self.elapsed_millis, FOOTER_SUFFIX
        ));
        content.trim().to_string()
    }

    #[cfg(test)]
    pub fn parse(text: &str) -> Option<OutputRecord> {
        let header_end = text.find("\n\n")?;
        let footer_start = text.rfind(&format!("\n\n{}", FOOTER_PREFIX))?;
        if footer_start < header_end {
            return None;
        }

        let mut header = text[..header_end].lines();
        let command = header.next()?.strip_prefix(COMMAND_PREFIX)?.to_string();
        let started_at = header.next()?.strip_prefix(STARTED_PREFIX)?.to_string();
        let errors = header
            .map(|line| line.strip_prefix(ERROR_PREFIX).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;

        let body = text
            .get(header_end + 2..footer_start)
            .unwrap_or_default()
            .to_string();
        let elapsed_millis = text[footer_start + 2..]
            .strip_prefix(FOOTER_PREFIX)?
            .strip_suffix(FOOTER_SUFFIX)?
            .parse()
            .ok()?;

        Some(OutputRecord {
            command,
            started_at,
            errors,
            body,
            elapsed_millis,
        })
    }
}

/// RFC 3339 timestamp in local time, second precision.
pub fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Creates parent directories on demand. Failures are logged, never raised.
pub async fn write_to_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        warn!("Failed to create directory '{}': {}", parent.display(), e);
        return;
    }
    if let Err(e) = tokio::fs::write(path, content).await {
        warn!("Failed to write '{}': {}", path.display(), e);
    }
}

/// Replaces the `%d` placeholder in the file name with the execution index.
pub fn expand_template(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(path.to_string_lossy().replace("%d", &index.to_string()))
}

/// Pretty-prints JSON with tab indentation, `None` if `body` is not JSON.
pub fn pretty_json(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    to_tab_indented_json(&value).ok()
}

fn to_tab_indented_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub async fn add_json_output<T: Serialize>(path: &Path, content: &T) {
    let text = match to_tab_indented_json(content) {
        Ok(json) => json,
        Err(e) => format!("# Failed to JSON serialize: {}", e),
    };
    write_to_file(path, text.as_bytes()).await;
}

/// A subprocess whose combined output becomes one record per execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    pub args: Vec<String>,
    pub output_path: PathBuf,
    pub executions: usize,
    pub delay: Duration,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub context: String,
    pub log_errors: bool,
}

impl CommandOutput {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_path: PathBuf) -> Self {
        CommandOutput {
            program: program.into(),
            args,
            output_path,
            executions: 1,
            delay: Duration::from_secs(1),
            stdin: None,
            timeout: None,
            context: String::new(),
            log_errors: false,
        }
    }

    /// `output_path` must contain `%d` when `executions > 1`.
    pub fn repeated(mut self, executions: usize, delay: Duration) -> Self {
        self.executions = executions.max(1);
        self.delay = delay;
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn log_errors(mut self) -> Self {
        self.log_errors = true;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn run(self) {
        for i in 0..self.executions {
            let path = if self.executions > 1 {
                expand_template(&self.output_path, i)
            } else {
                self.output_path.clone()
            };
            let record = self.execute_once().await;
            write_to_file(&path, record.render().as_bytes()).await;

            if i + 1 < self.executions {
                tokio::time::sleep(self.delay).await;
            }
        }
    }

    async fn execute_once(&self) -> OutputRecord {
        let start = Instant::now();
        let started_at = now_rfc3339();
        let command_line = self.command_line();
        debug!("Executing: {}", command_line);

        let (body, error) = self.spawn_and_collect().await;

        if let Some(err) = &error {
            if self.log_errors {
                error!(
                    "[{}] Error executing command '{}': {}",
                    self.context, command_line, err
                );
            } else {
                debug!(
                    "[{}] Error executing command '{}': {}",
                    self.context, command_line, err
                );
            }
        }

        OutputRecord {
            command: command_line,
            started_at,
            errors: error.into_iter().collect(),
            body,
            elapsed_millis: start.elapsed().as_millis(),
        }
    }

    /// Returns the combined output plus an error description for a failed, non-zero or
    /// timed out run. Output produced before a timeout is kept.
    async fn spawn_and_collect(&self) -> (String, Option<String>) {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return (String::new(), Some(e.to_string())),
        };

        if let Some(input) = &self.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            let input = input.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Failed to write stdin: {}", e);
                }
            });
        }

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            capture(child.stdout.take(), stdout.clone()),
            capture(child.stderr.take(), stderr.clone()),
        ];

        let error = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => exit_error(status),
                Err(_) => {
                    if let Err(e) = child.start_kill() {
                        debug!("Failed to kill timed out command: {}", e);
                    }
                    if let Err(e) = child.wait().await {
                        debug!("Failed to reap timed out command: {}", e);
                    }
                    Some(format!("timed out after {} seconds", limit.as_secs()))
                }
            },
            None => exit_error(child.wait().await),
        };

        // Descendants of the command may still hold the pipes open.
        for mut reader in readers {
            if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }

        let mut combined = String::from_utf8_lossy(&take_buffer(&stdout)).into_owned();
        combined.push_str(&String::from_utf8_lossy(&take_buffer(&stderr)));
        (combined, error)
    }
}

const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Copies `reader` into `buffer` chunk by chunk until EOF, so a killed command
/// still leaves what it wrote so far.
fn capture<R>(reader: Option<R>, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("Failed to read command output: {}", e);
                    break;
                }
            }
        }
    })
}

fn take_buffer(buffer: &Mutex<Vec<u8>>) -> Vec<u8> {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner))
}

/// `None` on success, `exit status <code>` for a non-zero exit.
fn exit_error(status: std::io::Result<ExitStatus>) -> Option<String> {
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(match status.code() {
            Some(code) => format!("exit status {}", code),
            None => status.to_string(),
        }),
        Err(e) => Some(e.to_string()),
    }
}

/// Creates `<base>/steadybit-debug-<unix seconds>`.
pub async fn create_output_directory(base: &Path, no_cleanup: bool) -> anyhow::Result<PathBuf> {
    let name = format!("steadybit-debug-{}", chrono::Utc::now().timestamp());
    let root = base.join(name);
    tokio::fs::create_dir(&root).await.with_context(|| {
        format!(
            "Failed create target directory '{}' for debugging information",
            root.display()
        )
    })?;

    let hint = if no_cleanup {
        ""
    } else {
        " (directory will be deleted on command completion)"
    };
    info!(
        "Debugging output will be collected at {}{}",
        root.display(),
        hint
    );
    Ok(root)
}

/// Archives `root` into `<root>.tar.gz` with short relative paths inside.
pub async fn archive_output_directory(root: &Path) -> anyhow::Result<PathBuf> {
    let parent = root
        .parent()
        .context("Output directory has no parent directory")?;
    let name = root
        .file_name()
        .context("Output directory has no name")?
        .to_string_lossy()
        .into_owned();
    let target = parent.join(format!("{}.tar.gz", name));

    let status = Command::new("tar")
        .arg("-czf")
        .arg(&target)
        .arg(&name)
        .current_dir(parent)
        .status()
        .await
        .with_context(|| format!("Failed to run tar for '{}'", root.display()))?;
    if !status.success() {
        anyhow::bail!(
            "Failed turn target directory '{}' into tar archive at '{}': tar exited with {}",
            root.display(),
            target.display(),
            status
        );
    }

    info!("Debugging output collected at: {}", target.display());
    Ok(target)
}
