use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub airtable: AirtableConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind to (default: "127.0.0.1").
    /// Set to "0.0.0.0" to listen on all interfaces.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirtableConfig {
    /// Personal Access Token. The comments endpoint rejects legacy API keys.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_id: String,
    /// Overridable for tests against a local stub.
    #[serde(default = "default_airtable_api_url")]
    pub api_url: String,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_id: String::new(),
            api_url: default_airtable_api_url(),
        }
    }
}

fn default_airtable_api_url() -> String {
    "https://api.airtable.com/v0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_provider_base_url(),
            model: default_model(),
        }
    }
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "basechat.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Reasoning/tool rounds the model gets per user turn before a text
    /// answer is forced.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_schema_ttl_secs")]
    pub schema_ttl_secs: u64,
    /// Per-request ceiling for a whole streamed turn.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            schema_ttl_secs: default_schema_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_max_steps() -> usize {
    5
}

fn default_schema_ttl_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_history_limit() -> usize {
    50
}

/// Session handling is an external collaborator; its contract is reduced to
/// a bearer-token -> user-id map.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl AppConfig {
    /// Load the TOML config, falling back to defaults when the file does
    /// not exist. Environment variables fill remaining empty secrets.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: AppConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            toml::from_str("").map_err(|e| anyhow::anyhow!("default config: {}", e))?
        };
        config.resolve_env();
        Ok(config)
    }

    /// Environment variables fill in empty config values so secrets can be
    /// kept out of the TOML file.
    fn resolve_env(&mut self) {
        if self.airtable.api_key.is_empty() {
            if let Ok(v) = std::env::var("AIRTABLE_API_KEY") {
                self.airtable.api_key = v;
            }
        }
        if self.airtable.base_id.is_empty() {
            if let Ok(v) = std::env::var("AIRTABLE_BASE_ID") {
                self.airtable.base_id = v;
            }
        }
        if self.provider.api_key.is_empty() {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                self.provider.api_key = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_for_missing_sections() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chat.max_steps, 5);
        assert_eq!(config.chat.schema_ttl_secs, 300);
        assert_eq!(config.state.db_path, "basechat.db");
        assert_eq!(config.airtable.api_url, "https://api.airtable.com/v0");
    }

    #[test]
    fn auth_tokens_parsed() {
        let config: AppConfig = toml::from_str(
            r#"
            [auth.tokens]
            "secret-token" = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.auth.tokens.get("secret-token").unwrap(), "alice");
    }
}
