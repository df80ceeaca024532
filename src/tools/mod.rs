// Tool execution system
//
// Local tools a backend may ask to have executed during a session.

pub mod executor;
pub mod implementations;
pub mod policy;
pub mod registry;
pub mod types;

pub use executor::ToolExecutor;
pub use policy::{CommandPolicy, PolicyDecision};
pub use registry::{Tool, ToolRegistry, ToolSet};
pub use types::{ToolCall, ToolDefinition, ToolInputSchema, ToolResult};
