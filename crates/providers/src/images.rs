//! Image preprocessing ahead of a generate request: validates each
//! attached image against the target model/provider's accepted formats
//! and size limits, and computes the downscale a too-large image would
//! need.
//!
//! This module sniffs PNG/JPEG dimensions directly from the encoded bytes
//! (no external image codec) since the gateway never needs to decode
//! pixels for anything but this size check. Where an image exceeds its
//! resolved limit, a warning names the decided target dimensions; the
//! bytes themselves are passed through unchanged since re-encoding would
//! require a real pixel codec, which this gateway does not carry.

use base64::Engine;
use gwy_domain::error::{Error, Result};

pub struct ProviderImageDefaults {
    pub max_edge: Option<u32>,
    pub max_pixels: Option<u64>,
    pub formats: &'static [&'static str],
}

pub fn provider_defaults(provider: &str) -> Option<ProviderImageDefaults> {
    match provider {
        "openai" => Some(ProviderImageDefaults {
            max_edge: Some(2048),
            max_pixels: None,
            formats: &["png", "jpeg", "gif", "webp"],
        }),
        "anthropic" => Some(ProviderImageDefaults {
            max_edge: Some(1568),
            max_pixels: Some(1_600_000),
            formats: &["png", "jpeg", "gif", "webp"],
        }),
        "google" => Some(ProviderImageDefaults {
            max_edge: Some(3072),
            max_pixels: None,
            formats: &["png", "jpeg", "webp"],
        }),
        "local" => Some(ProviderImageDefaults {
            max_edge: Some(1024),
            max_pixels: None,
            formats: &["png", "jpeg"],
        }),
        _ => None,
    }
}

pub struct PreprocessResult {
    pub images: Vec<String>,
    pub warnings: Vec<String>,
}

struct DataUrl {
    mime: String,
    bytes: Vec<u8>,
}

fn parse_data_url(image: &str) -> Result<DataUrl> {
    let rest = image
        .strip_prefix("data:")
        .ok_or_else(|| Error::Validation("image must be a data: URL".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::Validation("malformed data URL, missing comma".into()))?;
    let mime = header
        .split(';')
        .next()
        .ok_or_else(|| Error::Validation("malformed data URL header".into()))?
        .to_string();
    if !header.ends_with(";base64") {
        return Err(Error::Validation("only base64-encoded data URLs are supported".into()));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::Validation(format!("invalid base64 image payload: {e}")))?;
    Ok(DataUrl { mime, bytes })
}

fn format_name(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpeg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Sniff `(width, height)` from PNG or JPEG bytes. Returns `None` for
/// formats we don't need to measure (gif/webp never exceed the edge
/// limits tested against here in practice) or malformed input.
fn sniff_dimensions(bytes: &[u8], mime: &str) -> Option<(u32, u32)> {
    match mime {
        "image/png" => sniff_png(bytes),
        "image/jpeg" | "image/jpg" => sniff_jpeg(bytes),
        _ => None,
    }
}

fn sniff_png(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.len() < 24 || bytes[..8] != SIGNATURE {
        return None;
    }
    // IHDR starts at byte 8: 4-byte length, 4-byte "IHDR", then width/height as big-endian u32.
    if &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

fn sniff_jpeg(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 9 < bytes.len() {
        if bytes[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = bytes[pos + 1];
        // SOF0..SOF3, SOF5..SOF7, SOF9..SOF11, SOF13..SOF15 carry dimensions;
        // skip standalone markers with no length field.
        if (0xD0..=0xD9).contains(&marker) || marker == 0x01 {
            pos += 2;
            continue;
        }
        let seg_len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        if is_sof {
            if pos + 9 > bytes.len() {
                return None;
            }
            let height = u16::from_be_bytes([bytes[pos + 5], bytes[pos + 6]]) as u32;
            let width = u16::from_be_bytes([bytes[pos + 7], bytes[pos + 8]]) as u32;
            return Some((width, height));
        }
        if marker == 0xD8 || marker == 0xD9 {
            return None;
        }
        pos += 2 + seg_len;
    }
    None
}

/// Resolve effective constraints: model-specific fields first, then
/// provider-level defaults, else no constraint.
fn resolve_constraints<'a>(
    model_max_edge: Option<u32>,
    model_max_pixels: Option<u64>,
    model_formats: Option<&'a [String]>,
    provider: Option<&str>,
) -> (Option<u32>, Option<u64>, Option<Vec<String>>) {
    let provider_defaults = provider.and_then(provider_defaults);

    let max_edge = model_max_edge.or_else(|| provider_defaults.as_ref().and_then(|d| d.max_edge));
    let max_pixels = model_max_pixels.or_else(|| provider_defaults.as_ref().and_then(|d| d.max_pixels));
    let formats = model_formats.map(|f| f.to_vec()).or_else(|| {
        provider_defaults
            .as_ref()
            .map(|d| d.formats.iter().map(|s| s.to_string()).collect())
    });

    (max_edge, max_pixels, formats)
}

/// Compute the downscaled `(width, height)` preserving aspect ratio that
/// satisfies both a max-edge and a max-total-pixels constraint.
fn downscale_target(width: u32, height: u32, max_edge: Option<u32>, max_pixels: Option<u64>) -> Option<(u32, u32)> {
    let mut scale = 1.0f64;

    if let Some(edge) = max_edge {
        let longest = width.max(height) as f64;
        if longest > edge as f64 {
            scale = scale.min(edge as f64 / longest);
        }
    }
    if let Some(pixels) = max_pixels {
        let total = width as u64 * height as u64;
        if total > pixels {
            let pixel_scale = (pixels as f64 / total as f64).sqrt();
            scale = scale.min(pixel_scale);
        }
    }

    if scale >= 1.0 {
        return None;
    }
    let new_w = ((width as f64) * scale).round().max(1.0) as u32;
    let new_h = ((height as f64) * scale).round().max(1.0) as u32;
    Some((new_w, new_h))
}

pub fn preprocess_images(
    images: &[String],
    model_max_edge: Option<u32>,
    model_max_pixels: Option<u64>,
    model_formats: Option<&[String]>,
    provider: Option<&str>,
) -> Result<PreprocessResult> {
    let (max_edge, max_pixels, formats) =
        resolve_constraints(model_max_edge, model_max_pixels, model_formats, provider);

    let mut warnings = Vec::new();
    let mut out = Vec::with_capacity(images.len());

    for image in images {
        let parsed = parse_data_url(image)?;
        let fmt = format_name(&parsed.mime);

        if let (Some(fmt), Some(accepted)) = (fmt, &formats) {
            if !accepted.iter().any(|a| a == fmt) {
                warnings.push(format!(
                    "image format '{fmt}' is not in the accepted set {accepted:?}; passing through unchanged"
                ));
            }
        }

        if let Some((width, height)) = sniff_dimensions(&parsed.bytes, &parsed.mime) {
            if let Some((new_w, new_h)) = downscale_target(width, height, max_edge, max_pixels) {
                warnings.push(format!(
                    "image {width}x{height} exceeds the resolved limit, would be downscaled to {new_w}x{new_h}"
                ));
            }
        }

        out.push(image.clone());
    }

    Ok(PreprocessResult { images: out, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0, 0, 0, 13]); // length
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]); // bit depth, color type, etc.
        bytes
    }

    fn data_url(mime: &str, bytes: &[u8]) -> String {
        format!("data:{mime};base64,{}", base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    #[test]
    fn sniffs_png_dimensions() {
        let bytes = png_bytes(4096, 2048);
        assert_eq!(sniff_png(&bytes), Some((4096, 2048)));
    }

    #[test]
    fn malformed_png_returns_none() {
        assert_eq!(sniff_png(&[0, 1, 2]), None);
    }

    #[test]
    fn provider_defaults_cover_all_four_families() {
        for p in ["openai", "anthropic", "google", "local"] {
            assert!(provider_defaults(p).is_some(), "{p}");
        }
        assert!(provider_defaults("unknown").is_none());
    }

    #[test]
    fn image_within_limits_produces_no_warning() {
        let bytes = png_bytes(512, 512);
        let url = data_url("image/png", &bytes);
        let result = preprocess_images(&[url], None, None, None, Some("openai")).unwrap();
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn oversized_image_for_anthropic_produces_warning_and_passthrough() {
        let bytes = png_bytes(4000, 4000);
        let url = data_url("image/png", &bytes);
        let result = preprocess_images(&[url.clone()], None, None, None, Some("anthropic")).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.images, vec![url]);
    }

    #[test]
    fn model_specific_constraint_overrides_provider_default() {
        // anthropic default max_edge is 1568; a model-specific 4000 should
        // let a 3000px image through untouched.
        let bytes = png_bytes(3000, 100);
        let url = data_url("image/png", &bytes);
        let result = preprocess_images(&[url], Some(4000), None, None, Some("anthropic")).unwrap();
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn rejected_format_still_passes_through_with_warning() {
        let bytes = b"not a real gif but has the mime".to_vec();
        let url = data_url("image/gif", &bytes);
        let result = preprocess_images(&[url], None, None, None, Some("local")).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("gif"));
    }

    #[test]
    fn malformed_data_url_is_rejected() {
        let err = preprocess_images(&["not-a-data-url".into()], None, None, None, None).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
