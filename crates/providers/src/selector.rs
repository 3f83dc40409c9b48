//! Backend Selector: resolves a generate request's `model`/`provider`
//! hints (or lack thereof) into a concrete model + provider, per the
//! 8-step order in spec §4.H. First match wins.

use gwy_domain::error::{Error, Result};
use gwy_domain::generate::{
    CreditsState, CreditsStatus, GenerateRequest, SelectionInfo, SelectionMode,
};
use gwy_domain::model::{Modality, ModelDescriptor, ModelStatus};
use gwy_registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::discovery::{ProviderAvailability, ProviderDiscovery};

const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "google", "azure", "xai", "local"];

/// Case-insensitive prefix → provider inference table (spec §4.H step 4).
fn infer_provider_from_model_name(model: &str) -> Option<&'static str> {
    let m = model.to_ascii_lowercase();
    let openai_prefixes = [
        "gpt-4", "gpt-3.5", "o1", "o3", "chatgpt", "text-davinci", "dall-e", "whisper", "tts",
    ];
    if openai_prefixes.iter().any(|p| m.starts_with(p)) {
        return Some("openai");
    }
    if m.starts_with("claude-3") || m.starts_with("claude-2") || m.starts_with("claude-instant") || m.starts_with("claude-") {
        return Some("anthropic");
    }
    if m.starts_with("gemini-") || m.starts_with("palm-") || m.starts_with("gemma-") {
        return Some("google");
    }
    if m.starts_with("grok-") {
        return Some("xai");
    }
    None
}

/// Static, deployment-supplied facts the selector needs but does not own:
/// which providers have credentials configured, and the configured
/// default model per modality.
pub struct SelectorContext<'a> {
    pub configured_providers: &'a HashMap<String, bool>,
    pub default_model: Option<&'a str>,
    pub default_image_model: Option<&'a str>,
    pub default_3d_model: Option<&'a str>,
    pub credits: Option<CreditsStatus>,
    pub has_provider_access: bool,
    /// Per-user, per-provider discovery cache (component F). Consulted in
    /// step 3 when the registry has no model tracked for the requested
    /// provider yet.
    pub discovery: &'a ProviderDiscovery,
    pub user_id: &'a str,
}

impl<'a> SelectorContext<'a> {
    fn credentials_present(&self, provider: &str) -> bool {
        self.configured_providers.get(provider).copied().unwrap_or(false)
    }

    fn default_for_modality(&self, modality: Modality) -> Option<&'a str> {
        match modality {
            Modality::Image => self.default_image_model,
            Modality::ThreeD => self.default_3d_model,
            Modality::Text => self.default_model,
        }
    }
}

fn is_commercial(provider: &str) -> bool {
    provider != "local"
}

fn check_selection_mode(mode: SelectionMode, provider: &str) -> Result<()> {
    match mode {
        SelectionMode::FreeOnly if is_commercial(provider) => Err(Error::Validation(format!(
            "selection_mode=free_only cannot use commercial provider '{provider}'"
        ))),
        SelectionMode::CommercialOnly if provider == "local" => Err(Error::Validation(
            "selection_mode=commercial_only cannot use provider 'local'".into(),
        )),
        _ => Ok(()),
    }
}

fn synth_descriptor(provider: &str, model: &str, modality: Modality) -> ModelDescriptor {
    ModelDescriptor {
        id: model.to_string(),
        name: model.to_string(),
        version: "latest".to_string(),
        modality,
        provider: Some(provider.to_string()),
        status: ModelStatus::Available,
        local_path: None,
        size_bytes: None,
        source: None,
        capabilities: None,
        fallback_model_id: None,
        created_at: chrono::Utc::now(),
        last_used_at: None,
        is_default: None,
    }
}

pub struct Resolution {
    pub descriptor: ModelDescriptor,
    pub selection: SelectionInfo,
    pub credits: Option<CreditsStatus>,
}

pub fn resolve(registry: &Arc<Registry>, req: &GenerateRequest, ctx: &SelectorContext) -> Result<Resolution> {
    let mode = req.selection_mode.unwrap_or_default();

    // Step 6: selection_mode=model requires an explicit model_id.
    if mode == SelectionMode::Model && req.model.is_none() {
        return Err(Error::Validation(
            "selection_mode=model requires an explicit model id".into(),
        ));
    }

    if let Some(model_id) = &req.model {
        // Step 1: explicit provider:model prefix, split on the first colon.
        if let Some(idx) = model_id.find(':') {
            let provider = model_id[..idx].to_ascii_lowercase();
            let model_name = &model_id[idx + 1..];

            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                return Err(Error::UnsupportedProvider(provider));
            }
            check_selection_mode(mode, &provider)?;
            if !ctx.credentials_present(&provider) {
                return Err(Error::ProviderNotConfigured(format!(
                    "provider '{provider}' has no credentials configured"
                )));
            }

            let descriptor = synth_descriptor(&provider, model_name, req.modality);
            return Ok(Resolution {
                descriptor,
                selection: SelectionInfo {
                    selected_model: model_name.to_string(),
                    selected_provider: Some(provider),
                    fallback_used: false,
                    fallback_reason: None,
                },
                credits: ctx.credits.clone(),
            });
        }

        // Step 2: registry hit.
        if let Some(descriptor) = registry.peek_model(model_id) {
            if descriptor.is_available() {
                let provider = descriptor.provider.clone();
                if let Some(p) = &provider {
                    check_selection_mode(mode, p)?;
                }
                return Ok(Resolution {
                    descriptor: descriptor.clone(),
                    selection: SelectionInfo {
                        selected_model: descriptor.id.clone(),
                        selected_provider: provider,
                        fallback_used: false,
                        fallback_reason: None,
                    },
                    credits: ctx.credits.clone(),
                });
            }

            if let Some(fallback_id) = &descriptor.fallback_model_id {
                if let Some(fallback) = registry.peek_model(fallback_id) {
                    if fallback.is_available() {
                        let provider = fallback.provider.clone();
                        if let Some(p) = &provider {
                            check_selection_mode(mode, p)?;
                        }
                        return Ok(Resolution {
                            descriptor: fallback.clone(),
                            selection: SelectionInfo {
                                selected_model: fallback.id.clone(),
                                selected_provider: provider,
                                fallback_used: true,
                                fallback_reason: Some("primary_unavailable".into()),
                            },
                            credits: ctx.credits.clone(),
                        });
                    }
                }
                return Err(Error::ModelNotFound(fallback_id.clone()));
            }
            return Err(Error::ModelNotFound(model_id.clone()));
        }

        // Step 4: pattern inference from naming convention.
        if let Some(provider) = infer_provider_from_model_name(model_id) {
            check_selection_mode(mode, provider)?;
            if !ctx.credentials_present(provider) {
                return Err(Error::ProviderNotConfigured(format!(
                    "provider '{provider}' has no credentials configured"
                )));
            }
            let descriptor = synth_descriptor(provider, model_id, req.modality);
            return Ok(Resolution {
                descriptor,
                selection: SelectionInfo {
                    selected_model: model_id.clone(),
                    selected_provider: Some(provider.to_string()),
                    fallback_used: false,
                    fallback_reason: None,
                },
                credits: ctx.credits.clone(),
            });
        }

        return Err(Error::ModelNotFound(model_id.clone()));
    }

    // Step 3: provider given, no model_id.
    if let Some(provider) = &req.provider {
        check_selection_mode(mode, provider)?;

        if matches!(ctx.credits.as_ref().map(|c| &c.state), Some(CreditsState::Exhausted)) {
            if let Some(default_model) = ctx.default_for_modality(req.modality) {
                let descriptor = synth_descriptor("local", default_model, req.modality);
                return Ok(Resolution {
                    descriptor,
                    selection: SelectionInfo {
                        selected_model: default_model.to_string(),
                        selected_provider: Some("local".into()),
                        fallback_used: true,
                        fallback_reason: Some("credits_exhausted".into()),
                    },
                    credits: ctx.credits.clone(),
                });
            }
            return Err(Error::ModelNotFound("no default local model configured".into()));
        }

        if !ctx.has_provider_access {
            if let Some(default_model) = ctx.default_for_modality(req.modality) {
                let descriptor = synth_descriptor("local", default_model, req.modality);
                return Ok(Resolution {
                    descriptor,
                    selection: SelectionInfo {
                        selected_model: default_model.to_string(),
                        selected_provider: Some("local".into()),
                        fallback_used: true,
                        fallback_reason: Some("no_access".into()),
                    },
                    credits: ctx.credits.clone(),
                });
            }
            return Err(Error::ModelNotFound("no default local model configured".into()));
        }

        let candidates = registry.list_models(Some(req.modality));
        let pick = candidates
            .into_iter()
            .find(|d| d.provider.as_deref() == Some(provider.as_str()) && d.is_available());
        if let Some(descriptor) = pick {
            return Ok(Resolution {
                descriptor: descriptor.clone(),
                selection: SelectionInfo {
                    selected_model: descriptor.id.clone(),
                    selected_provider: Some(provider.clone()),
                    fallback_used: false,
                    fallback_reason: None,
                },
                credits: ctx.credits.clone(),
            });
        }

        // Registry has nothing tracked for this provider yet; fall back to
        // the discovery cache, filling it from the static catalog on a cold
        // miss, before giving up.
        let now = chrono::Utc::now();
        let mut discovered = ctx.discovery.get(ctx.user_id, provider, now);
        if discovered.is_none() {
            ctx.discovery.put_static_fallback(ctx.user_id, provider, now);
            discovered = ctx.discovery.get(ctx.user_id, provider, now);
        }
        if let Some((models, ProviderAvailability::Available)) = discovered {
            if let Some(model_name) = models.first() {
                let descriptor = synth_descriptor(provider, model_name, req.modality);
                return Ok(Resolution {
                    descriptor,
                    selection: SelectionInfo {
                        selected_model: model_name.clone(),
                        selected_provider: Some(provider.clone()),
                        fallback_used: false,
                        fallback_reason: None,
                    },
                    credits: ctx.credits.clone(),
                });
            }
        }

        return Err(Error::ModelNotFound(format!(
            "no discovered model for provider '{provider}' and modality {}",
            req.modality.as_str()
        )));
    }

    // Step 5: no hint at all, fall through to the modality default.
    if let Some(default_model) = ctx.default_for_modality(req.modality) {
        if let Some(descriptor) = registry.peek_model(default_model) {
            if descriptor.is_available() {
                if let Some(p) = &descriptor.provider {
                    check_selection_mode(mode, p)?;
                }
                return Ok(Resolution {
                    descriptor: descriptor.clone(),
                    selection: SelectionInfo {
                        selected_model: descriptor.id.clone(),
                        selected_provider: descriptor.provider.clone(),
                        fallback_used: false,
                        fallback_reason: None,
                    },
                    credits: ctx.credits.clone(),
                });
            }
        }
    }

    if let Some(default_id) = registry.get_default_for_modality(req.modality) {
        if let Some(descriptor) = registry.peek_model(&default_id) {
            if let Some(p) = &descriptor.provider {
                check_selection_mode(mode, p)?;
            }
            return Ok(Resolution {
                descriptor: descriptor.clone(),
                selection: SelectionInfo {
                    selected_model: descriptor.id.clone(),
                    selected_provider: descriptor.provider.clone(),
                    fallback_used: false,
                    fallback_reason: None,
                },
                credits: ctx.credits.clone(),
            });
        }
    }

    Err(Error::ModelNotFound(format!(
        "no model available for modality {}",
        req.modality.as_str()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwy_domain::generate::{GenerateInput, GenerateParameters};

    fn base_request(model: Option<&str>, provider: Option<&str>, modality: Modality) -> GenerateRequest {
        GenerateRequest {
            model: model.map(String::from),
            provider: provider.map(String::from),
            session_id: None,
            state_tokens: None,
            modality,
            input: GenerateInput { prompt: Some("hi".into()), images: None, mesh: None },
            parameters: Some(GenerateParameters::default()),
            stream: false,
            selection_mode: Some(SelectionMode::Auto),
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new())
    }

    #[test]
    fn explicit_prefix_requires_known_provider() {
        let reg = registry();
        let req = base_request(Some("bogus:some-model"), None, Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let err = resolve(&reg, &req, &ctx).unwrap_err();
        assert_eq!(err.code(), "unsupported_provider");
    }

    #[test]
    fn explicit_prefix_requires_credentials() {
        let reg = registry();
        let req = base_request(Some("openai:gpt-4o"), None, Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let err = resolve(&reg, &req, &ctx).unwrap_err();
        assert_eq!(err.code(), "provider_not_configured");
    }

    #[test]
    fn explicit_prefix_succeeds_with_credentials() {
        let reg = registry();
        let mut creds = HashMap::new();
        creds.insert("openai".to_string(), true);
        let req = base_request(Some("openai:gpt-4o"), None, Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &creds,
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let res = resolve(&reg, &req, &ctx).unwrap();
        assert_eq!(res.selection.selected_model, "gpt-4o");
        assert_eq!(res.selection.selected_provider.as_deref(), Some("openai"));
        assert!(!res.selection.fallback_used);
    }

    #[test]
    fn pattern_inference_maps_claude_to_anthropic() {
        let reg = registry();
        let mut creds = HashMap::new();
        creds.insert("anthropic".to_string(), true);
        let req = base_request(Some("claude-sonnet-4-20250514"), None, Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &creds,
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let res = resolve(&reg, &req, &ctx).unwrap();
        assert_eq!(res.selection.selected_provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn unresolvable_model_id_fails_model_not_found() {
        let reg = registry();
        let req = base_request(Some("totally-unknown-xyz"), None, Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let err = resolve(&reg, &req, &ctx).unwrap_err();
        assert_eq!(err.code(), "model_not_found");
    }

    #[test]
    fn selection_mode_model_without_id_is_rejected() {
        let reg = registry();
        let mut req = base_request(None, None, Modality::Text);
        req.selection_mode = Some(SelectionMode::Model);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: Some("local-default"),
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let err = resolve(&reg, &req, &ctx).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn free_only_rejects_commercial_explicit_prefix() {
        let reg = registry();
        let mut creds = HashMap::new();
        creds.insert("openai".to_string(), true);
        let mut req = base_request(Some("openai:gpt-4o"), None, Modality::Text);
        req.selection_mode = Some(SelectionMode::FreeOnly);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &creds,
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let err = resolve(&reg, &req, &ctx).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn no_hint_falls_back_to_configured_default() {
        let reg = registry();
        reg.add_model(synth_descriptor("local", "local-default", Modality::Text)).unwrap();
        let req = base_request(None, None, Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: Some("local-default"),
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let res = resolve(&reg, &req, &ctx).unwrap();
        assert_eq!(res.selection.selected_model, "local-default");
    }

    #[test]
    fn credits_exhausted_falls_back_to_default_local_model() {
        let reg = registry();
        let req = base_request(None, Some("openai"), Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: Some("local-default"),
            default_image_model: None,
            default_3d_model: None,
            credits: Some(CreditsStatus { state: CreditsState::Exhausted, retry_after_seconds: None }),
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let res = resolve(&reg, &req, &ctx).unwrap();
        assert!(res.selection.fallback_used);
        assert_eq!(res.selection.fallback_reason.as_deref(), Some("credits_exhausted"));
    }

    #[test]
    fn provider_hint_falls_back_to_discovery_cache_when_registry_is_empty() {
        let reg = registry();
        let req = base_request(None, Some("openai"), Modality::Text);
        let disc = ProviderDiscovery::new();
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let res = resolve(&reg, &req, &ctx).unwrap();
        assert_eq!(res.selection.selected_provider.as_deref(), Some("openai"));
        assert!(!res.selection.fallback_used);
        // A cold-cache miss fills the static catalog, so a second call hits it directly.
        assert!(disc.get("u1", "openai", chrono::Utc::now()).is_some());
    }

    #[test]
    fn provider_hint_errors_when_discovery_reports_rate_limited() {
        let reg = registry();
        let req = base_request(None, Some("openai"), Modality::Text);
        let disc = ProviderDiscovery::new();
        let now = chrono::Utc::now();
        disc.put("u1", "openai", vec!["gpt-4o".into()], now);
        disc.mark_rate_limited("u1", "openai", now);
        let ctx = SelectorContext {
            configured_providers: &HashMap::new(),
            default_model: None,
            default_image_model: None,
            default_3d_model: None,
            credits: None,
            has_provider_access: true,
            discovery: &disc,
            user_id: "u1",
        };
        let err = resolve(&reg, &req, &ctx).unwrap_err();
        assert_eq!(err.code(), "model_not_found");
    }
}
