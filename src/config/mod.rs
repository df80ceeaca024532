// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;

pub use loader::{default_config_path, load_config, load_config_from};
pub use settings::{
    default_backends, default_routes, BackendKind, BackendSettings, CommandToolConfig, Config,
    RouteSettings, ServerConfig, SpeechConfig, ToolsConfig, DEFAULT_BIND, DEFAULT_LIVE_INSTRUCTION,
    DEFAULT_MAX_ROUNDS,
};
