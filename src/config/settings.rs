// Configuration structs
//
// Every section has defaults that reproduce the stock service, so an empty or
// missing config file still yields a working router.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::providers::gemini::{GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL};
use crate::providers::openai::{
    GROQ_BASE_URL, GROQ_DEFAULT_MODEL, OLLAMA_BASE_URL, OLLAMA_DEFAULT_MODEL,
};
use crate::tools::implementations::command::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS};
use crate::tools::implementations::{CommandTool, WeatherTool};
use crate::tools::policy::CommandPolicy;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_LIVE_INSTRUCTION: &str =
    "use less words to reply with max 200 words no more then that";
pub const DEFAULT_MAX_ROUNDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backends: Vec<BackendSettings>,
    pub routes: Vec<RouteSettings>,
    pub tools: ToolsConfig,
    pub speech: SpeechConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: default_backends(),
            routes: default_routes(),
            tools: ToolsConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

impl Config {
    pub fn backend(&self, name: &str) -> Option<&BackendSettings> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn route(&self, name: &str) -> Option<&RouteSettings> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// Check the cross references between sections
    pub fn validate(&self) -> Result<()> {
        let mut backend_names = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                bail!("Backend entries need a name");
            }
            if !backend_names.insert(backend.name.as_str()) {
                bail!("Backend '{}' is defined twice", backend.name);
            }
        }

        for backend in &self.backends {
            for fallback in &backend.fallback {
                if fallback == &backend.name {
                    bail!("Backend '{}' lists itself as a fallback", backend.name);
                }
                if !backend_names.contains(fallback.as_str()) {
                    bail!(
                        "Backend '{}' falls back to unknown backend '{}'",
                        backend.name,
                        fallback
                    );
                }
            }
        }

        let known_tools = [WeatherTool::NAME, CommandTool::NAME];
        let mut route_names = HashSet::new();
        for route in &self.routes {
            if !route_names.insert(route.name.as_str()) {
                bail!("Route '{}' is defined twice", route.name);
            }
            if !backend_names.contains(route.backend.as_str()) {
                bail!(
                    "Route '{}' uses unknown backend '{}'",
                    route.name,
                    route.backend
                );
            }
            for tool in &route.tools {
                if !known_tools.contains(&tool.as_str()) {
                    bail!("Route '{}' lists unknown tool '{}'", route.name, tool);
                }
            }
            if route.max_rounds == 0 {
                bail!("Route '{}' needs max_rounds of at least 1", route.name);
            }
        }

        let command = &self.tools.command;
        if command.timeout_secs == 0 {
            bail!("tools.command.timeout_secs must be at least 1");
        }
        if command.max_output_bytes == 0 {
            bail!("tools.command.max_output_bytes must be at least 1");
        }

        if !route_names.contains(self.server.live_route.as_str()) {
            bail!(
                "Live conversation route '{}' is not defined",
                self.server.live_route
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8000)
    pub bind: String,

    /// Route answering /v1/live/conv/
    pub live_route: String,

    /// Prefixed to transcribed speech before it reaches the live route
    pub live_reply_instruction: String,

    /// Answer cross-origin requests from browser clients
    pub allow_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            live_route: "gpt".to_string(),
            live_reply_instruction: DEFAULT_LIVE_INSTRUCTION.to_string(),
            allow_cors: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Any chat completions compatible server (Groq, Ollama, OpenAI)
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub name: String,
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Attempts per request on transient failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backends tried in order when this one is unavailable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

impl BackendSettings {
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.kind) {
            (Some(url), _) => url,
            (None, BackendKind::OpenAi) => OLLAMA_BASE_URL,
            (None, BackendKind::Gemini) => GEMINI_BASE_URL,
        }
    }

    pub fn model(&self) -> &str {
        match (&self.model, self.kind) {
            (Some(model), _) => model,
            (None, BackendKind::OpenAi) => OLLAMA_DEFAULT_MODEL,
            (None, BackendKind::Gemini) => GEMINI_DEFAULT_MODEL,
        }
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

pub fn default_backends() -> Vec<BackendSettings> {
    vec![
        BackendSettings {
            name: "krypton".to_string(),
            kind: BackendKind::OpenAi,
            base_url: Some(OLLAMA_BASE_URL.to_string()),
            model: Some(OLLAMA_DEFAULT_MODEL.to_string()),
            api_key_env: None,
            temperature: Some(0.8),
            max_tokens: Some(1000),
            max_attempts: default_max_attempts(),
            fallback: Vec::new(),
        },
        BackendSettings {
            name: "gpt".to_string(),
            kind: BackendKind::OpenAi,
            base_url: Some(GROQ_BASE_URL.to_string()),
            model: Some(GROQ_DEFAULT_MODEL.to_string()),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            temperature: None,
            max_tokens: None,
            max_attempts: default_max_attempts(),
            fallback: Vec::new(),
        },
        BackendSettings {
            name: "gemini".to_string(),
            kind: BackendKind::Gemini,
            base_url: Some(GEMINI_BASE_URL.to_string()),
            model: Some(GEMINI_DEFAULT_MODEL.to_string()),
            api_key_env: Some("GOOGLE_API_KEY".to_string()),
            temperature: None,
            max_tokens: None,
            max_attempts: default_max_attempts(),
            fallback: Vec::new(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    pub name: String,
    pub backend: String,
    /// Tools this route's sessions may call, by name
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl RouteSettings {
    pub fn new(name: &str, backend: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            backend: backend.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            system_prompt: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// The command tool is in the catalog but no stock route exposes it
pub fn default_routes() -> Vec<RouteSettings> {
    vec![
        RouteSettings::new("krypton", "krypton", &[]),
        RouteSettings::new("krypton-agent", "krypton", &[WeatherTool::NAME]),
        RouteSettings::new("gpt", "gpt", &[]),
        RouteSettings::new("gemini", "gemini", &[]),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub command: CommandToolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandToolConfig {
    /// Directory every command runs in (default: home directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    #[serde(flatten)]
    pub policy: CommandPolicy,
}

impl Default for CommandToolConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            policy: CommandPolicy::default(),
        }
    }
}

impl CommandToolConfig {
    pub fn resolved_working_dir(&self) -> Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .or_else(|| std::env::current_dir().ok())
                .context("Could not determine a working directory for commands"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// OpenAI-compatible audio API root
    pub base_url: String,
    pub api_key_env: String,
    pub transcription_model: String,
    pub language: String,
    pub tts_model: String,
    pub voice: String,
    pub response_format: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: GROQ_BASE_URL.to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            transcription_model: "whisper-large-v3".to_string(),
            language: "en".to_string(),
            tts_model: "canopylabs/orpheus-v1-english".to_string(),
            voice: "autumn".to_string(),
            response_format: "wav".to_string(),
        }
    }
}

impl SpeechConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}
