mod artifacts;
mod lifecycle;
mod llm;
mod queue;
mod server;
mod sessions;
mod storage;

pub use artifacts::*;
pub use lifecycle::*;
pub use llm::*;
pub use queue::*;
pub use server::*;
pub use sessions::*;
pub use storage::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl Config {
    /// Loads from the file named by `GATEWAY_CONFIG` (default
    /// `config.toml`) if it exists, else falls back to defaults.
    /// Mirrors the gateway's own config-loading convention.
    pub fn load() -> crate::error::Result<(Config, String)> {
        let config_path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config.toml".into());

        let config = if std::path::Path::new(&config_path).exists() {
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str(&raw)
                .map_err(|e| crate::error::Error::Validation(format!("parsing {config_path}: {e}")))?
        } else {
            Config::default()
        };

        Ok((config, config_path))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. Invalid
    /// configuration aborts startup (spec §9 "validated once at startup").
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.storage.model_root.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "storage.model_root".into(),
                message: "model_root must not be empty".into(),
            });
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(provider.id.clone()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }
            let needs_credentials = matches!(provider.auth.mode, AuthMode::ApiKey);
            if needs_credentials && provider.auth.env.as_ref().map_or(true, |v| v.is_empty()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].auth"),
                    message: format!(
                        "provider \"{}\" uses api_key auth mode but has no auth.env configured",
                        provider.id
                    ),
                });
            }
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        if self.queue.max_queue_depth == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "queue.max_queue_depth".into(),
                message: "max_queue_depth must be greater than 0".into(),
            });
        }

        if self.lifecycle.max_loaded_models == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "lifecycle.max_loaded_models".into(),
                message: "max_loaded_models must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "openai".into(),
                    kind: ProviderKind::Openai,
                    base_url: Some("https://api.openai.com/v1".into()),
                    auth: AuthConfig { mode: AuthMode::ApiKey, env: Some("OPENAI_API_KEY".into()) },
                }],
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "server.port" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn no_providers_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "llm.providers" && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn duplicate_provider_ids_is_warning() {
        let mut cfg = valid_config();
        let dup = cfg.llm.providers[0].clone();
        cfg.llm.providers.push(dup);
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.message.contains("duplicate provider id") && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn api_key_mode_without_env_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth.env = None;
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "llm.providers[0].auth"));
    }

    #[test]
    fn zero_queue_depth_is_error() {
        let mut cfg = valid_config();
        cfg.queue.max_queue_depth = 0;
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "queue.max_queue_depth"));
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] server.port: port must be greater than 0");
    }
}
