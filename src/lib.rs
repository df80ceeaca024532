// Krypton - routed chat agents with tool calling
// Library exports

pub mod agent; // Tool-call session loop and transcripts
pub mod cli;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod providers; // Model backends (OpenAI-compatible, Gemini)
pub mod router;
pub mod server; // HTTP endpoints
pub mod speech;
pub mod tools; // Tool execution system
