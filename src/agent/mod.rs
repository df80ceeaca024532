// Tool-use sessions
//
// The transcript model and the bounded session state machine that drives a
// backend through tool-call rounds.

pub mod session;
pub mod transcript;

pub use session::{SessionConfig, SessionOutcome, SessionState, ToolCallSession};
pub use transcript::{Message, Role, Transcript};
