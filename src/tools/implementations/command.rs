// Command execution tool - runs one program in a fixed working directory
//
// Invocations are structured (program + argument list) and never go through
// a shell. Every run is bounded by a timeout. When the program exits, times
// out, or the run is dropped, its whole process group is killed.

use crate::errors::ToolError;
use crate::tools::policy::{CommandPolicy, PolicyDecision};
use crate::tools::registry::Tool;
use crate::tools::types::ToolInputSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16_000;

/// How long output is still collected after the program has exited
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line into program and arguments
    ///
    /// Quotes group words; no expansion, globbing or operators are applied.
    pub fn parse(command_line: &str) -> Result<Self, ToolError> {
        let mut words = split_words(command_line).map_err(|reason| ToolError::InvalidArguments {
            tool: CommandTool::NAME.to_string(),
            reason,
        })?;
        if words.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: CommandTool::NAME.to_string(),
                reason: "command is empty".to_string(),
            });
        }
        let program = words.remove(0);
        Ok(Self::new(program, words))
    }

    /// Build from tool input: `{command, args?}`
    ///
    /// With `args`, `command` is the program itself. Without, it is split.
    pub fn from_input(input: &Value) -> Result<Self, ToolError> {
        let invalid = |reason: &str| ToolError::InvalidArguments {
            tool: CommandTool::NAME.to_string(),
            reason: reason.to_string(),
        };

        let command = input["command"]
            .as_str()
            .ok_or_else(|| invalid("missing 'command' parameter"))?;

        match input.get("args") {
            None | Some(Value::Null) => Self::parse(command),
            Some(Value::Array(items)) => {
                let args = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| invalid("'args' must contain only strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let program = command.trim();
                if program.is_empty() {
                    return Err(invalid("command is empty"));
                }
                Ok(Self::new(program, args))
            }
            Some(_) => Err(invalid("'args' must be an array of strings")),
        }
    }

    /// Human-readable form for logs and errors
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Split on whitespace, honouring single quotes, double quotes and backslashes
fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs commands chosen by a model
pub struct CommandTool {
    working_dir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
    policy: CommandPolicy,
}

impl CommandTool {
    pub const NAME: &'static str = "run_terminal_command";

    /// Create a tool bound to an existing directory
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let working_dir = working_dir.into();
        if !working_dir.is_dir() {
            return Err(ToolError::Failed(format!(
                "Working directory does not exist: {}",
                working_dir.display()
            )));
        }

        Ok(Self {
            working_dir,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            policy: CommandPolicy::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Run one invocation to completion or timeout
    ///
    /// A non-zero exit is reported in the output, not as an error. The result
    /// is ready when the program exits; whatever is left of its process group
    /// is killed at that point.
    #[instrument(skip(self), fields(command = %invocation.display()))]
    pub async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ToolError> {
        if let PolicyDecision::Deny(reason) =
            self.policy.check_invocation(&invocation.program, &invocation.args)
        {
            warn!(reason = %reason, "Command rejected by policy");
            return Err(ToolError::CommandDenied(reason));
        }

        info!(dir = %self.working_dir.display(), "Running command");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&self.working_dir)
            .envs(non_interactive_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: invocation.display(),
            source,
        })?;
        let mut group = ProcessGroup::new(child.id());

        let stop_reading = CancellationToken::new();
        let limit = self.max_output_bytes;
        let stdout = tokio::spawn(read_capped(child.stdout.take(), limit, stop_reading.clone()));
        let stderr = tokio::spawn(read_capped(child.stderr.take(), limit, stop_reading.clone()));
        let _stop_on_return = stop_reading.clone().drop_guard();

        let waited = timeout(self.timeout, child.wait()).await;
        group.kill();

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                terminate(&mut child).await;
                return Err(ToolError::Failed(format!("Process error: {}", e)));
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Command timed out");
                terminate(&mut child).await;
                return Err(ToolError::ExecutionTimeout {
                    command: invocation.display(),
                    timeout: self.timeout,
                });
            }
        };

        // Descendants that left the group can keep the pipes open
        let grace = tokio::spawn(async move {
            tokio::time::sleep(OUTPUT_GRACE).await;
            stop_reading.cancel();
        });
        let (stdout, stderr) = tokio::join!(stdout, stderr);
        grace.abort();

        let (stdout, out_truncated) = reader_output(stdout)?;
        let (stderr, err_truncated) = reader_output(stderr)?;
        let output = CommandOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: out_truncated || err_truncated,
        };
        debug!(exit_code = ?output.exit_code, "Command finished");
        Ok(output)
    }
}

/// Kills the process group once, at the latest when dropped
///
/// Dropping a `run` future (session cancellation) takes the group down
/// with it.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        let Some(_pgid) = self.pgid.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(_pgid as i32), Signal::SIGKILL) {
                debug!("Process group already gone: {}", e);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the child, then reap it
async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Child already gone: {}", e);
    }
}

fn reader_output(
    joined: Result<std::io::Result<(Vec<u8>, bool)>, tokio::task::JoinError>,
) -> Result<(Vec<u8>, bool), ToolError> {
    joined
        .map_err(|e| ToolError::Failed(format!("Output reader failed: {}", e)))?
        .map_err(|e| ToolError::Failed(format!("Process error: {}", e)))
}

/// Drain a pipe, keeping at most `limit` bytes
///
/// Stops at end of file, or once `stop` is cancelled and nothing more is
/// buffered.
async fn read_capped<R>(
    reader: Option<R>,
    limit: usize,
    stop: CancellationToken,
) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        let n = tokio::select! {
            biased;
            read = reader.read(&mut buf) => read?,
            _ = stop.cancelled() => break,
        };
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }

    Ok((kept, truncated))
}

fn non_interactive_env() -> [(&'static str, &'static str); 6] {
    [
        ("CI", "true"),
        ("NO_COLOR", "1"),
        ("TERM", "dumb"),
        ("PAGER", "cat"),
        ("GIT_PAGER", "cat"),
        ("DEBIAN_FRONTEND", "noninteractive"),
    ]
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run a terminal command on the host and capture its output. \
         Pass the program in 'command' and its arguments in 'args'. \
         No shell is involved: pipes, redirects and variables are not interpreted."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::object()
            .property(
                "command",
                "string",
                "Program to run, or a full command line when 'args' is omitted",
                true,
            )
            .property("args", "array", "Arguments passed verbatim to the program", false)
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let invocation = CommandInvocation::from_input(&input)?;
        let output = self.run(&invocation).await?;
        serde_json::to_string(&output).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
