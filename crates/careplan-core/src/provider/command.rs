//! Provider adapter that delegates to an external command.
//!
//! The command receives the [`ObjectRequest`] as JSON on stdin and must
//! print exactly one JSON object on stdout before exiting 0. This keeps
//! vendor SDKs and credentials out of this process.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::{ModelProvider, ObjectRequest};

/// Bytes of stderr kept in error messages.
const STDERR_SNIPPET_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    name: String,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = format!("command:{program}");
        Self {
            program,
            args,
            env: HashMap::new(),
            name,
        }
    }

    /// Add an environment variable passed to every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl ModelProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_object(&self, request: &ObjectRequest) -> Result<serde_json::Value> {
        let payload = serde_json::to_vec(request).context("failed to serialize object request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A dropped future (timeout, cancellation) must not leave the
            // provider process running.
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn provider command {:?}", self.program))?;

        let mut stdin = child.stdin.take().context("provider stdin unavailable")?;
        let mut stdout_pipe = child.stdout.take().context("provider stdout unavailable")?;
        let mut stderr_pipe = child.stderr.take().context("provider stderr unavailable")?;

        let write_request = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
            drop(stdin);
            Ok::<_, std::io::Error>(())
        };
        let read_stdout = async {
            let mut buf = Vec::new();
            stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        };

        let (written, stdout, stderr, status) =
            tokio::join!(write_request, read_stdout, read_stderr, child.wait());

        let status = status.context("failed to wait on provider command")?;
        if !status.success() {
            let snippet = String::from_utf8_lossy(&stderr[..stderr.len().min(STDERR_SNIPPET_BYTES)])
                .into_owned();
            bail!(
                "provider command {:?} exited with {status}: {}",
                self.program,
                snippet.trim()
            );
        }
        if let Err(e) = written {
            // The command may answer without draining stdin.
            debug!(provider = %self.name, error = %e, "provider closed stdin early");
        }
        let stdout = stdout.context("failed to read provider output")?;

        debug!(provider = %self.name, bytes = stdout.len(), "provider responded");
        parse_object(&stdout)
    }
}

/// Parse provider output: the whole of stdout, or failing that its last
/// non-empty line (to tolerate progress chatter before the object).
fn parse_object(stdout: &[u8]) -> Result<serde_json::Value> {
    let text = String::from_utf8_lossy(stdout);
    let value = match serde_json::from_str::<serde_json::Value>(text.trim()) {
        Ok(v) => v,
        Err(_) => {
            let last = text
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .context("provider produced no output")?;
            serde_json::from_str(last.trim()).context("provider output is not valid JSON")?
        }
    };
    if !value.is_object() {
        bail!("provider output is JSON but not an object");
    }
    Ok(value)
}
