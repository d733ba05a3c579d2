//! Configuration loading, validation, and management for agentloop.
//!
//! Loads configuration from `~/.agentloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! A config declares one or more agent *profiles*. A profile is everything a
//! single loop execution needs: the system prompt, the task template, the
//! tools and the completion tool, the safety bounds, and where the final
//! answer is delivered.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider base URL (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Agent profiles
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> u32 {
    10
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_task_template() -> String {
    "{input}".into()
}
fn default_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("profiles", &self.profiles)
            .finish()
    }
}

/// Where the final answer of a loop is delivered.
///
/// Decides which markup cleanup runs on the final text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Read aloud (text-to-speech); all markup is stripped
    Speech,
    /// Posted to Slack; Markdown is rewritten to mrkdwn
    Slack,
    /// Printed as-is apart from whitespace cleanup
    #[default]
    Plain,
}

/// One agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Unique profile name (e.g. "briefing", "slack")
    pub name: String,

    /// System prompt; `{date}` is replaced with today's date
    pub system_prompt: String,

    /// First user message; `{input}` and `{date}` are substituted
    #[serde(default = "default_task_template")]
    pub task_template: String,

    /// Override the default model for this profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override the default max tokens for this profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum model calls per loop execution
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget for one loop execution
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub destination: Destination,

    /// The tool the model calls to hand over its final answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionConfig>,

    /// Canned answers used when a loop ends without usable text
    #[serde(default)]
    pub fallbacks: FallbackConfig,

    /// Tools available to the model
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

impl ProfileConfig {
    /// The system prompt with placeholders filled in.
    pub fn render_system_prompt(&self, date: &str) -> String {
        self.system_prompt.replace("{date}", date)
    }

    /// The first user message with placeholders filled in.
    pub fn render_task(&self, input: &str, date: &str) -> String {
        self.task_template
            .replace("{date}", date)
            .replace("{input}", input)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| {
            Err(ConfigError::ValidationError(format!(
                "profile '{}': {reason}",
                self.name
            )))
        };

        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".into());
        }
        if self.timeout_secs == 0 {
            return invalid("timeout_secs must be at least 1".into());
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return invalid("tool names must not be empty".into());
            }
            if tool.command.trim().is_empty() {
                return invalid(format!("tool '{}' has no command", tool.name));
            }
            if !names.insert(tool.name.as_str()) {
                return invalid(format!("tool '{}' is declared twice", tool.name));
            }
        }

        for (key, text) in self.fallbacks.entries() {
            if text.trim().is_empty() {
                return invalid(format!("fallbacks.{key} must not be empty"));
            }
        }

        if let Some(completion) = &self.completion {
            if completion.answer_field.trim().is_empty() {
                return invalid("completion.answer_field must not be empty".into());
            }
            if names.contains(completion.name.as_str()) {
                return invalid(format!(
                    "completion tool '{}' collides with a declared tool",
                    completion.name
                ));
            }
        }

        Ok(())
    }
}

/// Declaration of the completion tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub name: String,

    pub description: String,

    /// Input field holding the final answer
    pub answer_field: String,

    /// Schema description for the answer field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_description: Option<String>,
}

/// Reason-specific canned answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_max_iterations")]
    pub max_iterations: String,

    #[serde(default = "default_fallback_timeout")]
    pub timeout: String,

    /// Used when the model finished without any text; `{date}` is substituted
    #[serde(default = "default_fallback_no_output")]
    pub no_output: String,

    /// Used when the loop itself failed (model call error, protocol desync)
    #[serde(default = "default_fallback_error")]
    pub error: String,
}

fn default_fallback_max_iterations() -> String {
    "I ran into some technical difficulties and could not finish this task. Please try again or check the sources directly.".into()
}
fn default_fallback_timeout() -> String {
    "This took longer than expected, so I stopped before finishing. Please try again in a moment.".into()
}
fn default_fallback_no_output() -> String {
    "There was an issue producing an answer for {date}. Please try rephrasing the request.".into()
}
fn default_fallback_error() -> String {
    "Sorry, something went wrong while working on this. The details have been logged.".into()
}

impl FallbackConfig {
    fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("max_iterations", self.max_iterations.as_str()),
            ("timeout", self.timeout.as_str()),
            ("no_output", self.no_output.as_str()),
            ("error", self.error.as_str()),
        ]
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_fallback_max_iterations(),
            timeout: default_fallback_timeout(),
            no_output: default_fallback_no_output(),
            error: default_fallback_error(),
        }
    }
}

/// A tool backed by an external program.
///
/// The program receives the invocation input as JSON on stdin and answers
/// with JSON on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    pub description: String,

    /// JSON Schema of the input
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,

    /// Program to run
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Run the program once per turn and share its output with every
    /// invocation of this tool in that turn
    #[serde(default)]
    pub shared: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentloop/config.toml).
    ///
    /// Also checks environment variables:
    /// - `AGENTLOOP_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    /// - `AGENTLOOP_MODEL` overrides the default model
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("AGENTLOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("AGENTLOOP_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloop")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "default_max_tokens must be greater than 0".into(),
            ));
        }

        let mut names = HashSet::new();
        for profile in &self.profiles {
            if !names.insert(profile.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "profile '{}' is declared twice",
                    profile.name
                )));
            }
            profile.validate()?;
        }

        Ok(())
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&ProfileConfig, ConfigError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// The config written by `agentloop init`.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG_TOML
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            default_model: default_model(),
            default_max_tokens: default_max_tokens(),
            profiles: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("No profile named '{0}' in config")]
    UnknownProfile(String),
}

const DEFAULT_CONFIG_TOML: &str = r#"# agentloop configuration
#
# api_key = "sk-ant-..."        # or set AGENTLOOP_API_KEY / ANTHROPIC_API_KEY
default_model = "claude-sonnet-4-20250514"
default_max_tokens = 4096

# Morning briefing: gathers context with tools, then hands the script to the
# completion tool. The script is read aloud, so all markup is stripped.
[[profiles]]
name = "briefing"
destination = "speech"
max_iterations = 10
timeout_secs = 120
system_prompt = """
You are a personal assistant preparing a morning briefing.

TODAY: {date}

Gather the information needed for a comprehensive briefing, then call
generate-briefing. Start with the calendar, then tasks, then email and chat.
Three to five tool calls is usually enough. Do not over-fetch.

The briefing is read aloud: 400-600 words, no markdown or bullets, natural
speech, numbers written as words. Skip empty sections entirely.
"""
task_template = """
Please prepare my morning briefing for today ({date}).

Gather what you need with the available tools, then call generate-briefing
with the complete briefing text.
"""

[profiles.completion]
name = "generate-briefing"
description = "Signal that you have gathered enough context and deliver the final briefing."
answer_field = "briefing_text"
answer_description = "The complete morning briefing, formatted for speech (no markdown, 400-600 words)"

[profiles.fallbacks]
max_iterations = "Good morning. I ran into some technical difficulties preparing your full briefing today. I'd recommend checking your calendar and email directly. Have a good day."
timeout = "Good morning. The briefing preparation took longer than expected. Please check your calendar and tasks directly for today's schedule."
no_output = "Good morning. There was an issue generating your briefing for {date}. Please check your calendar and email for today's schedule."

[[profiles.tools]]
name = "get-calendar-events"
description = "Get today's calendar events with start time, end time, title, location, and attendees."
command = "~/.agentloop/tools/calendar"
shared = true

[[profiles.tools]]
name = "get-emails"
description = "Get recent unread important emails. Returns sender, subject, and snippet for each email."
command = "~/.agentloop/tools/emails"
shared = true
[profiles.tools.input_schema]
type = "object"
required = []
[profiles.tools.input_schema.properties.limit]
type = "number"
description = "Maximum number of emails to return (default: 20)"

[[profiles.tools]]
name = "notion-search"
description = "Search across all Notion pages and databases to find relevant documentation."
command = "~/.agentloop/tools/notion-search"
[profiles.tools.input_schema]
type = "object"
required = ["query"]
[profiles.tools.input_schema.properties.query]
type = "string"
description = "The search query text"

# Slack bot: answers a mention in a thread. Finishes on its own (end_turn),
# and the answer is rewritten to Slack mrkdwn.
[[profiles]]
name = "slack"
destination = "slack"
max_iterations = 10
timeout_secs = 120
system_prompt = "You are LegacyAI, a helpful assistant that manages Notion documentation. Search before you fetch, and fetch before you summarize."
task_template = "User command: \"{input}\""

[profiles.fallbacks]
no_output = "I'm not sure how to help with that. Try asking me to search, create, or update Notion pages."

[[profiles.tools]]
name = "notion-search"
description = "Search across all Notion pages and databases."
command = "~/.agentloop/tools/notion-search"
[profiles.tools.input_schema]
type = "object"
required = ["query"]
[profiles.tools.input_schema.properties.query]
type = "string"
description = "The search query text"

[[profiles.tools]]
name = "notion-fetch"
description = "Fetch the full content of a Notion page by ID. Use after notion-search."
command = "~/.agentloop/tools/notion-fetch"
[profiles.tools.input_schema]
type = "object"
required = ["id"]
[profiles.tools.input_schema.properties.id]
type = "string"
description = "The page ID from search results"
"#;
