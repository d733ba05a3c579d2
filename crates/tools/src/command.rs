//! Command tool: run an external program as a tool.
//!
//! The invocation input is written to the program's stdin as JSON. Whatever
//! the program prints on stdout becomes the tool output: parsed as JSON when
//! it is JSON, passed through as a string otherwise. A non-zero exit status
//! is a failure carrying stderr.

use agentloop_config::ToolConfig;
use agentloop_core::error::ToolError;
use agentloop_core::tool::Tool;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A tool backed by an external program.
pub struct CommandTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    program: String,
    args: Vec<String>,
}

impl CommandTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            program: expand_home(&program.into()),
            args,
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(
            &config.name,
            &config.description,
            config.input_schema.clone(),
            &config.command,
            config.args.clone(),
        )
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(program: &str) -> String {
    match (program.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{rest}", home.trim_end_matches('/')),
        _ => program.to_string(),
    }
}

/// Interpret program stdout.
fn parse_output(stdout: &str) -> serde_json::Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()))
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let payload = serde_json::to_vec(&input).map_err(|e| {
            ToolError::InvalidArguments(format!("{}: input is not serializable: {e}", self.name))
        })?;

        debug!(tool = %self.name, program = %self.program, "Running tool command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("failed to start '{}': {e}", self.program)))?;

        // stdin is written while stdout is drained, so filters that stream
        // output before reading all input cannot fill the pipe and stall.
        let stdin = child.stdin.take();
        let feed = async {
            if let Some(mut stdin) = stdin {
                // Programs that ignore stdin may exit before we finish writing
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(tool = %self.name, error = %e, "Tool command closed stdin early");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| self.failed(e.to_string()))?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(tool = %self.name, exit_code = code, "Tool command failed");
            return Err(self.failed(format!("exit code {code}: {}", stderr.trim())));
        }

        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}
