// CLI module
// Interactive terminal front-end

mod input;
mod repl;

pub use input::InputHandler;
pub use repl::{Repl, ReplInput, AGENT_PROMPT, USER_PROMPT};
