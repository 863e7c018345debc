//! Source registry: validates a frame-source type tag against entitlement
//! policy and decodes its configuration. The actual decoder (GStreamer,
//! v4l2, a file demuxer) is an external collaborator injected by the
//! caller — the registry's job ends at producing a validated
//! [`SourceConfig`] plus the opened [`Source`].

use vision_config::Entitlements;
use vision_source::{Decoder, Source, SourceConfig};

use crate::{config_from_value, RegistryError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceTypeTag {
    Rtsp,
    Http,
    V4l2,
    File,
}

impl SourceTypeTag {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "rtsp" => SourceTypeTag::Rtsp,
            "http" => SourceTypeTag::Http,
            "v4l2" => SourceTypeTag::V4l2,
            "file" => SourceTypeTag::File,
            _ => return None,
        })
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            SourceTypeTag::Rtsp => "rtsp",
            SourceTypeTag::Http => "http",
            SourceTypeTag::V4l2 => "v4l2",
            SourceTypeTag::File => "file",
        }
    }
}

pub struct SourceRegistry;

impl SourceRegistry {
    pub fn accepted_type_tags() -> &'static [&'static str] {
        &["rtsp", "http", "v4l2", "file"]
    }

    /// `decoder` is supplied by the caller: it is the concrete decode
    /// backend for `tag`, which this registry has no way to construct
    /// itself.
    pub fn build(
        tag: &str,
        config: serde_json::Value,
        entitlements: &Entitlements,
        decoder: Box<dyn Decoder>,
    ) -> Result<Source> {
        let kind = SourceTypeTag::from_tag(tag).ok_or_else(|| RegistryError::UnknownType(tag.to_string()))?;
        if !entitlement_ok(kind, entitlements) {
            return Err(RegistryError::Entitlement(format!(
                "source type '{}' is not permitted under the current license tier",
                kind.type_tag()
            )));
        }
        let source_config: SourceConfig = config_from_value(config)?;
        Source::open(source_config, decoder).map_err(|e| RegistryError::Config(e.to_string()))
    }
}

fn entitlement_ok(_kind: SourceTypeTag, _entitlements: &Entitlements) -> bool {
    // Every source type is available at every tier today; the hook exists
    // so a future tier restriction does not require touching call sites.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_source::SyntheticDecoder;

    #[test]
    fn unknown_tag_is_rejected_before_touching_the_decoder() {
        let err = SourceRegistry::build(
            "not_a_real_source",
            serde_json::json!({}),
            &Entitlements::default(),
            Box::new(SyntheticDecoder::new(4, 4, 1)),
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(_)));
    }

    #[test]
    fn file_source_builds_from_valid_config() {
        let config = serde_json::json!({
            "url": "/tmp/clip.mp4",
            "width": 64, "height": 48, "target_fps": 30.0,
            "format": "Raw", "hw_accel": "None", "transport": "Tcp",
            "latency_ms": 0, "max_consecutive_failures": 3
        });
        let source = SourceRegistry::build(
            "file",
            config,
            &Entitlements::default(),
            Box::new(SyntheticDecoder::new(64, 48, 3)),
        )
        .unwrap();
        assert_eq!(source.mode(), vision_source::OperatingMode::File);
    }
}
