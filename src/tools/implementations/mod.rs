// Tool implementations
//
// Concrete tools a route may expose to its backend

pub mod command;
pub mod weather;

pub use command::{CommandInvocation, CommandOutput, CommandTool};
pub use weather::WeatherTool;

use crate::config::CommandToolConfig;
use crate::tools::registry::ToolRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Registry holding every built-in tool
///
/// Routes pick their tools out of this catalog by name.
pub fn builtin_catalog(command: &CommandToolConfig) -> Result<ToolRegistry> {
    let working_dir = command.resolved_working_dir()?;
    let command_tool = CommandTool::new(&working_dir)
        .with_context(|| "Failed to set up the command execution tool")?
        .with_timeout(Duration::from_secs(command.timeout_secs))
        .with_max_output_bytes(command.max_output_bytes)
        .with_policy(command.policy.clone());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WeatherTool))?;
    registry.register(Arc::new(command_tool))?;
    Ok(registry)
}
