//! Bridges a configured `ProviderConfig` plus a resolved model descriptor
//! into a constructed `gwy_providers::Adapter` (spec §4.G/4.H boundary:
//! the selector decides WHICH provider/model serves a request, this
//! module decides HOW to materialize the adapter that serves it).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gwy_domain::config::{AuthMode, ProviderConfig, ProviderKind};
use gwy_domain::error::{Error, Result};
use gwy_domain::model::Modality;
use gwy_providers::anthropic::AnthropicAdapter;
use gwy_providers::google::GoogleAdapter;
use gwy_providers::local::{Local3dAdapter, LocalImageAdapter, LocalTextAdapter};
use gwy_providers::openai_compat::OpenAiCompatAdapter;
use gwy_providers::Adapter;

fn resolve_credential(cfg: &ProviderConfig) -> Result<String> {
    match cfg.auth.mode {
        AuthMode::None => Ok(String::new()),
        _ => {
            let env = cfg.auth.env.as_ref().ok_or_else(|| {
                Error::ProviderNotConfigured(format!("provider '{}' has no auth.env configured", cfg.id))
            })?;
            std::env::var(env).map_err(|_| {
                Error::ProviderNotConfigured(format!(
                    "provider '{}' credential env var '{env}' is not set",
                    cfg.id
                ))
            })
        }
    }
}

fn default_runner_bin(modality: Modality) -> &'static str {
    match modality {
        Modality::Text => "llama-cli",
        Modality::Image => "sd-cli",
        Modality::ThreeD => "mesh-cli",
    }
}

/// Constructs the adapter for one (provider, model, modality) resolution.
/// `local_model_path` is only consulted for `kind = local`; it is the
/// registry descriptor's `local_path`.
pub fn build_adapter(
    cfg: &ProviderConfig,
    modality: Modality,
    local_model_path: Option<&str>,
    local_output_dir: &Path,
) -> Result<Adapter> {
    match cfg.kind {
        ProviderKind::Local => {
            let runner_bin = cfg.runner_bin.clone().unwrap_or_else(|| default_runner_bin(modality).to_string());
            let model_path = local_model_path
                .map(PathBuf::from)
                .ok_or_else(|| Error::ModelNotFound(format!("provider '{}' has no local_path for this model", cfg.id)))?;
            match modality {
                Modality::Text => {
                    Ok(Adapter::Text(Arc::new(LocalTextAdapter::new(cfg.id.clone(), runner_bin, model_path))))
                }
                Modality::Image => Ok(Adapter::Image(Arc::new(LocalImageAdapter::new(
                    cfg.id.clone(),
                    runner_bin,
                    model_path,
                    local_output_dir.to_path_buf(),
                )))),
                Modality::ThreeD => Ok(Adapter::ThreeD(Arc::new(Local3dAdapter::new(
                    cfg.id.clone(),
                    runner_bin,
                    model_path,
                    local_output_dir.to_path_buf(),
                )))),
            }
        }
        ProviderKind::Openai | ProviderKind::Xai | ProviderKind::Azure => {
            require_text(&cfg.id, modality)?;
            let api_key = resolve_credential(cfg)?;
            let is_azure = matches!(cfg.kind, ProviderKind::Azure);
            Ok(Adapter::Text(Arc::new(OpenAiCompatAdapter::new(cfg, api_key, is_azure)?)))
        }
        ProviderKind::Anthropic => {
            require_text(&cfg.id, modality)?;
            let api_key = resolve_credential(cfg)?;
            Ok(Adapter::Text(Arc::new(AnthropicAdapter::new(cfg, api_key)?)))
        }
        ProviderKind::Google => {
            require_text(&cfg.id, modality)?;
            let api_key = resolve_credential(cfg)?;
            Ok(Adapter::Text(Arc::new(GoogleAdapter::new(cfg, api_key)?)))
        }
        ProviderKind::Huggingface | ProviderKind::Bedrock => Err(Error::UnsupportedProvider(format!(
            "provider '{}' is cataloged for discovery only; no adapter is implemented for it",
            cfg.id
        ))),
    }
}

/// Commercial providers in this gateway only ever serve text: none of the
/// configured remote kinds expose an image or mesh generation adapter, so
/// image/3d requests are local-only. A request resolved to a non-local
/// provider for a non-text modality is a selector/registry seeding bug,
/// not a runtime condition to recover from gracefully.
fn require_text(provider_id: &str, modality: Modality) -> Result<()> {
    if modality != Modality::Text {
        return Err(Error::UnsupportedProvider(format!(
            "provider '{provider_id}' only serves the text modality; image and 3d generation are local-only"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwy_domain::config::AuthConfig;

    fn cfg(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig { id: "p1".into(), kind, base_url: None, auth: AuthConfig::default(), runner_bin: None }
    }

    #[test]
    fn local_text_adapter_requires_local_path() {
        let err = build_adapter(&cfg(ProviderKind::Local), Modality::Text, None, Path::new("/tmp")).unwrap_err();
        assert_eq!(err.code(), "model_not_found");
    }

    #[test]
    fn local_text_adapter_builds_with_default_runner() {
        let adapter = build_adapter(&cfg(ProviderKind::Local), Modality::Text, Some("/models/m.gguf"), Path::new("/tmp")).unwrap();
        matches!(adapter, Adapter::Text(_));
    }

    #[test]
    fn remote_provider_rejects_image_modality() {
        let err = build_adapter(&cfg(ProviderKind::Openai), Modality::Image, None, Path::new("/tmp")).unwrap_err();
        assert_eq!(err.code(), "unsupported_provider");
    }

    #[test]
    fn huggingface_kind_has_no_adapter() {
        let err = build_adapter(&cfg(ProviderKind::Huggingface), Modality::Text, None, Path::new("/tmp")).unwrap_err();
        assert_eq!(err.code(), "unsupported_provider");
    }
}
