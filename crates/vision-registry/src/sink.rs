//! Sink registry: validates a sink type tag against entitlement policy and
//! builds the component. The file-video sink's encoder, like the source's
//! decoder, is an external collaborator injected by the caller.

use vision_config::Entitlements;
use vision_sink_video::{Encoder, VideoSink, VideoWriterConfig};

use crate::{config_from_value, RegistryError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkTypeTag {
    FileVideo,
    Telemetry,
}

impl SinkTypeTag {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "file_video" => SinkTypeTag::FileVideo,
            "telemetry" => SinkTypeTag::Telemetry,
            _ => return None,
        })
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            SinkTypeTag::FileVideo => "file_video",
            SinkTypeTag::Telemetry => "telemetry",
        }
    }
}

pub struct SinkRegistry;

impl SinkRegistry {
    pub fn accepted_type_tags() -> &'static [&'static str] {
        &["file_video", "telemetry"]
    }

    /// Builds the file-video sink. The telemetry sink has no per-attach
    /// construction step of its own — every camera's [`vision_telemetry`]
    /// handle is opened once at camera creation, not per sink attach — so
    /// only `file_video` is represented here.
    pub fn build_file_video(
        tag: &str,
        config: serde_json::Value,
        entitlements: &Entitlements,
        encoder: Box<dyn Encoder>,
    ) -> Result<VideoSink> {
        let kind = SinkTypeTag::from_tag(tag).ok_or_else(|| RegistryError::UnknownType(tag.to_string()))?;
        if kind != SinkTypeTag::FileVideo {
            return Err(RegistryError::Config(format!(
                "'{}' has no dedicated constructor; attach it via the telemetry store directly",
                kind.type_tag()
            )));
        }
        if !entitlements_allow(kind, entitlements) {
            return Err(RegistryError::Entitlement(format!(
                "sink type '{}' is not permitted under the current license tier",
                kind.type_tag()
            )));
        }
        let writer_config: VideoWriterConfig = config_from_value(config)?;
        Ok(VideoSink::new(writer_config, encoder))
    }
}

fn entitlements_allow(_kind: SinkTypeTag, _entitlements: &Entitlements) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_sink_video::SyntheticEncoder;

    #[test]
    fn telemetry_tag_has_no_dedicated_constructor() {
        let err = SinkRegistry::build_file_video(
            "telemetry",
            serde_json::json!({}),
            &Entitlements::default(),
            Box::new(SyntheticEncoder::new()),
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn file_video_builds_from_valid_config() {
        let dir = std::env::temp_dir().join(format!("vision-registry-sink-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = serde_json::json!({
            "path_template": dir.join("out-%Y%m%d.bin").to_string_lossy(),
            "fourcc": [b'R' as u8, b'A' as u8, b'W' as u8, b'0' as u8],
            "output_width": 64, "output_height": 48, "fps": 30.0
        });
        let _sink = SinkRegistry::build_file_video(
            "file_video",
            config,
            &Entitlements::default(),
            Box::new(SyntheticEncoder::new()),
        )
        .unwrap();
    }
}
