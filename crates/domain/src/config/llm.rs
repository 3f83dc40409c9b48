use serde::{Deserialize, Serialize};

/// Static provider catalog entry: credentials and connection details for
/// one commercial or local backend (spec §4.F/4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Path to the local CLI runner binary invoked for `kind = local`
    /// models (spec §4.G local adapter family). Ignored for remote kinds.
    #[serde(default)]
    pub runner_bin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    Openai,
    Anthropic,
    Google,
    Azure,
    Xai,
    Huggingface,
    Bedrock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    None,
    ApiKey,
    OauthToken,
    ServiceAccount,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Environment variable name holding the credential, preferred over
    /// inlining secrets in the config file.
    #[serde(default)]
    pub env: Option<String>,
}

/// Seed defaults (spec §4.A "Seed defaults") and generation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_image_model: Option<String>,
    #[serde(default)]
    pub default_3d_model: Option<String>,
    /// If true, startup aborts when a configured default model id cannot
    /// be resolved against the seeded registry (spec §9 "validated once
    /// at startup; invalid configuration aborts startup").
    #[serde(default = "d_true")]
    pub strict_startup_validation: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            strict_startup_validation: true,
        }
    }
}

fn d_true() -> bool {
    true
}
