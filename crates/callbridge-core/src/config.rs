//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level CallBridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini: Option<GeminiConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// HTTP / WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Public hostname the telephony provider uses to reach `/audio_stream`
    /// (e.g. an ngrok hostname, without scheme).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_hostname: Option<String>,

    /// Phrase spoken to the caller before the media stream connects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

fn default_port() -> u16 {
    5000
}

/// Gemini Live backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Path to a file holding the system prompt. Ignored when `system_prompt` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: None,
            voice: None,
            system_prompt: None,
            system_prompt_file: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl GeminiConfig {
    /// Resolve the API key: check `api_key` first, then `api_key_env`, then `GEMINI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            resolve_secret_field(&None, &Some("GEMINI_API_KEY".to_string()))
        })
    }
}

/// Sample rates on each side of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_telephony_rate")]
    pub telephony_rate: u32,
    #[serde(default = "default_input_rate")]
    pub input_rate: u32,
    #[serde(default = "default_output_rate")]
    pub output_rate: u32,
}

fn default_telephony_rate() -> u32 {
    8000
}

fn default_input_rate() -> u32 {
    16000
}

fn default_output_rate() -> u32 {
    24000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            telephony_rate: default_telephony_rate(),
            input_rate: default_input_rate(),
            output_rate: default_output_rate(),
        }
    }
}

/// Per-call session limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time allowed for in-flight work after the inbound stream ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_queue_capacity: Option<usize>,
}

/// Telephony-side behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Send a `mark` message to the telephony transport at each end of turn.
    #[serde(default)]
    pub send_turn_marks: bool,
}

/// Tool registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definitions_path: Option<String>,

    /// Expose compiled-in tools that the definitions file does not mention.
    #[serde(default = "default_true")]
    pub include_builtins: bool,

    /// Reload the registry when the definitions file changes.
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Run the calls of one tool-call batch concurrently.
    #[serde(default)]
    pub parallel_calls: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            definitions_path: None,
            include_builtins: true,
            watch: true,
            parallel_calls: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "callbridge_session=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret from a direct value or an environment variable name.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Replace `${VAR}` references with environment values (missing vars become empty).
fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

fn expand_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    PathBuf::from(expanded.as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::CallBridgeError::Io)?;

        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::CallBridgeError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Server port.
    pub fn port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or(5000)
    }

    /// Bind address.
    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Public hostname used in the TwiML stream URL.
    pub fn public_hostname(&self) -> Option<String> {
        self.server
            .as_ref()
            .and_then(|s| s.public_hostname.clone())
            .filter(|h| !h.is_empty())
    }

    /// Greeting spoken before the stream connects.
    pub fn greeting(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.greeting.clone())
            .unwrap_or_else(|| "Hello! Please wait while I connect you to our AI assistant.".into())
    }

    /// Gemini Live model name.
    pub fn gemini_model(&self) -> String {
        self.gemini
            .as_ref()
            .and_then(|g| g.model.clone())
            .unwrap_or_else(|| "gemini-2.0-flash-live-001".to_string())
    }

    /// Prebuilt voice for synthesized audio.
    pub fn gemini_voice(&self) -> String {
        self.gemini
            .as_ref()
            .and_then(|g| g.voice.clone())
            .unwrap_or_else(|| "Puck".to_string())
    }

    /// Resolve the system instruction: inline prompt, then prompt file, then a built-in default.
    pub fn system_prompt(&self) -> crate::error::Result<String> {
        let gemini = self.gemini.as_ref();
        if let Some(prompt) = gemini.and_then(|g| g.system_prompt.as_ref()) {
            return Ok(prompt.trim().to_string());
        }
        if let Some(file) = gemini.and_then(|g| g.system_prompt_file.as_ref()) {
            let raw = std::fs::read_to_string(expand_path(file))?;
            return Ok(raw.trim().to_string());
        }
        Ok("You are a friendly voice assistant answering phone calls for a restaurant. \
            Keep answers short and conversational, and use the available tools to look up \
            the menu, place orders, check order status, and book tables."
            .to_string())
    }

    /// Backend connect/handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.gemini
                .as_ref()
                .map(|g| g.connect_timeout_secs)
                .unwrap_or(10),
        )
    }

    /// Audio sample rates (defaults when the section is missing).
    pub fn audio(&self) -> AudioConfig {
        self.audio.clone().unwrap_or_default()
    }

    /// Shutdown grace period for a session.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(
            self.session
                .as_ref()
                .and_then(|s| s.grace_period_ms)
                .unwrap_or(5000),
        )
    }

    /// Capacity of the telephony → AI audio queue.
    pub fn inbound_queue_capacity(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.inbound_queue_capacity)
            .unwrap_or(256)
    }

    /// Capacity of the AI → telephony audio queue.
    pub fn outbound_queue_capacity(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.outbound_queue_capacity)
            .unwrap_or(256)
    }

    /// Whether end-of-turn markers are forwarded as telephony `mark` messages.
    pub fn send_turn_marks(&self) -> bool {
        self.telephony.as_ref().is_some_and(|t| t.send_turn_marks)
    }

    /// Tool settings (defaults when the section is missing).
    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    /// Path of the tool definitions store.
    pub fn tool_definitions_path(&self) -> PathBuf {
        self.tools
            .as_ref()
            .and_then(|t| t.definitions_path.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("tools.json"))
    }

    /// Validate the configuration. Returns `(warnings, errors)`.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match &self.gemini {
            Some(g) if g.resolve_api_key().is_some() => {}
            _ => warnings.push(
                "No Gemini API key configured (gemini.api_key, gemini.api_key_env or GEMINI_API_KEY)"
                    .to_string(),
            ),
        }

        if self.public_hostname().is_none() {
            warnings.push(
                "server.public_hostname is not set; /incoming_call will point at localhost"
                    .to_string(),
            );
        }

        let audio = self.audio();
        for (name, rate) in [
            ("audio.telephony_rate", audio.telephony_rate),
            ("audio.input_rate", audio.input_rate),
            ("audio.output_rate", audio.output_rate),
        ] {
            if rate == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        if self.inbound_queue_capacity() == 0 {
            errors.push("session.inbound_queue_capacity must be greater than zero".to_string());
        }
        if self.outbound_queue_capacity() == 0 {
            errors.push("session.outbound_queue_capacity must be greater than zero".to_string());
        }

        if let Some(file) = self.gemini.as_ref().and_then(|g| g.system_prompt_file.as_ref()) {
            if !expand_path(file).exists() {
                errors.push(format!("gemini.system_prompt_file not found: {file}"));
            }
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                errors.push(format!("logging.format must be \"plain\" or \"json\", got \"{}\"", logging.format));
            }
        }

        (warnings, errors)
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Data directory (`~/.callbridge`).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".callbridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_CB_KEY", "key-123") };
        let input = r#"{"key": "${TEST_CB_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("key-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_CB_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_CB_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port(), 5000);
        assert_eq!(config.gemini_voice(), "Puck");
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.audio().telephony_rate, 8000);
        assert_eq!(config.audio().input_rate, 16000);
        assert_eq!(config.audio().output_rate, 24000);
        assert!(!config.send_turn_marks());
        assert!(config.tools().include_builtins);
        assert!(!config.tools().parallel_calls);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert!(config.server.is_none());
    }

    #[test]
    fn test_load_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                server: { port: 7000, public_hostname: "abc.ngrok.app" },
                session: { grace_period_ms: 250 },
                tools: { parallel_calls: true },
            }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port(), 7000);
        assert_eq!(config.public_hostname().as_deref(), Some("abc.ngrok.app"));
        assert_eq!(config.grace_period(), Duration::from_millis(250));
        assert!(config.tools().parallel_calls);
        assert!(config.tools().watch);
    }

    #[test]
    fn test_gemini_resolve_api_key() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_CB_GEMINI_KEY", "from-env") };
        let gemini = GeminiConfig {
            api_key: None,
            api_key_env: Some("TEST_CB_GEMINI_KEY".into()),
            base_url: None,
            model: None,
            voice: None,
            system_prompt: None,
            system_prompt_file: None,
            connect_timeout_secs: 10,
        };
        assert_eq!(gemini.resolve_api_key(), Some("from-env".into()));

        let direct = GeminiConfig {
            api_key: Some("direct-key".into()),
            ..gemini
        };
        assert_eq!(direct.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_CB_GEMINI_KEY") };
    }

    #[test]
    fn test_system_prompt_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("system.md");
        std::fs::write(&prompt_path, "  Be brief.\n").unwrap();
        let config = Config {
            gemini: Some(GeminiConfig {
                api_key: None,
                api_key_env: None,
                base_url: None,
                model: None,
                voice: None,
                system_prompt: None,
                system_prompt_file: Some(prompt_path.to_string_lossy().into_owned()),
                connect_timeout_secs: 10,
            }),
            ..Default::default()
        };
        assert_eq!(config.system_prompt().unwrap(), "Be brief.");
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_zero_rate_errors() {
        let config = Config {
            audio: Some(AudioConfig {
                telephony_rate: 0,
                input_rate: 16000,
                output_rate: 24000,
            }),
            ..Default::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("audio.telephony_rate")));
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config::default();
        let (warnings, errors) = config.validate();
        if std::env::var("GEMINI_API_KEY").is_err() {
            assert!(warnings.iter().any(|w| w.contains("Gemini API key")));
        }
        assert!(errors.is_empty());
    }
}
