//! Processor registry: builds chain [`Stage`]s from `(type_tag, config)`,
//! enforcing the fixed pipeline's dependency order. The order itself
//! (Detector -> Tracker -> LineZones -> PolygonZones -> Classification ->
//! AgeGender) is enforced by [`vision_tracking::ProcessorChain::push`]; this
//! registry only checks that a stage's prerequisite is already attached.

use serde::Deserialize;
use vision_config::{Entitlements, GlobalConfig, LicenseTier};
use vision_frame::{EventType, LineZone, Point, PolygonZone};
use vision_tracking::{
    ClassifierConfig, ClassifierStage, Detector, DetectorConfig, LineZoneStage, PolygonZoneStage,
    Stage, Tracker, TrackerConfig,
};

use crate::{config_from_value, RegistryError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Detector,
    Tracker,
    LineZones,
    PolygonZones,
    Classification,
    AgeGender,
}

impl StageKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "detector" => StageKind::Detector,
            "tracker" => StageKind::Tracker,
            "line_zones" => StageKind::LineZones,
            "polygon_zones" => StageKind::PolygonZones,
            "classification" => StageKind::Classification,
            "age_gender" => StageKind::AgeGender,
            _ => return None,
        })
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            StageKind::Detector => "detector",
            StageKind::Tracker => "tracker",
            StageKind::LineZones => "line_zones",
            StageKind::PolygonZones => "polygon_zones",
            StageKind::Classification => "classification",
            StageKind::AgeGender => "age_gender",
        }
    }

    /// The stage that must already be attached before this one may be, if any.
    ///
    /// The spec names two cases explicitly (tracker needs a detector; zone
    /// managers need a tracker); classification and age/gender crop each
    /// track's bounding box, so they carry the same prerequisite.
    fn required_dependency(&self) -> Option<StageKind> {
        match self {
            StageKind::Detector => None,
            StageKind::Tracker => Some(StageKind::Detector),
            StageKind::LineZones | StageKind::PolygonZones => Some(StageKind::Tracker),
            StageKind::Classification | StageKind::AgeGender => Some(StageKind::Tracker),
        }
    }
}

#[derive(Deserialize)]
struct LineZoneDto {
    id: String,
    start: Point,
    end: Point,
}

#[derive(Deserialize)]
struct LineZonesDto {
    zones: Vec<LineZoneDto>,
}

#[derive(Deserialize)]
struct PolygonZoneDto {
    id: String,
    vertices: Vec<Point>,
}

#[derive(Deserialize)]
struct PolygonZonesDto {
    zones: Vec<PolygonZoneDto>,
}

pub struct ProcessorRegistry;

impl ProcessorRegistry {
    pub fn accepted_type_tags() -> &'static [&'static str] {
        &[
            "detector",
            "tracker",
            "line_zones",
            "polygon_zones",
            "classification",
            "age_gender",
        ]
    }

    pub fn build(
        tag: &str,
        config: serde_json::Value,
        global_config: &GlobalConfig,
        entitlements: &Entitlements,
        already_attached: &[StageKind],
    ) -> Result<Stage> {
        let kind = StageKind::from_tag(tag).ok_or_else(|| RegistryError::UnknownType(tag.to_string()))?;
        check_entitlement(kind, entitlements)?;
        check_dependency(kind, already_attached)?;
        build_stage(kind, config, global_config)
    }
}

fn check_entitlement(kind: StageKind, entitlements: &Entitlements) -> Result<()> {
    let ok = match kind {
        StageKind::Detector | StageKind::Tracker | StageKind::LineZones | StageKind::PolygonZones => true,
        StageKind::Classification => entitlements.meets_tier(LicenseTier::Standard),
        StageKind::AgeGender => {
            entitlements.meets_tier(LicenseTier::Standard) && entitlements.has_pack("age_gender")
        }
    };
    if ok {
        Ok(())
    } else {
        Err(RegistryError::Entitlement(format!(
            "processor type '{}' is not permitted under the current license/growth-pack configuration",
            kind.type_tag()
        )))
    }
}

fn check_dependency(kind: StageKind, already_attached: &[StageKind]) -> Result<()> {
    if let Some(dep) = kind.required_dependency() {
        if !already_attached.contains(&dep) {
            return Err(RegistryError::Dependency(format!(
                "'{}' requires '{}' to be attached first",
                kind.type_tag(),
                dep.type_tag()
            )));
        }
    }
    Ok(())
}

fn build_stage(kind: StageKind, config: serde_json::Value, global_config: &GlobalConfig) -> Result<Stage> {
    Ok(match kind {
        StageKind::Detector => {
            let cfg: DetectorConfig = config_from_value(config)?;
            Stage::Detector(Detector::new(cfg, global_config.clone()))
        }
        StageKind::Tracker => {
            let cfg: TrackerConfig = config_from_value(config)?;
            Stage::Tracker(Tracker::new(cfg))
        }
        StageKind::LineZones => {
            let dto: LineZonesDto = config_from_value(config)?;
            let zones = dto
                .zones
                .into_iter()
                .map(|z| LineZone::new(z.id, z.start, z.end))
                .collect();
            Stage::LineZones(LineZoneStage::new(zones))
        }
        StageKind::PolygonZones => {
            let dto: PolygonZonesDto = config_from_value(config)?;
            let zones = dto
                .zones
                .into_iter()
                .map(|z| PolygonZone::new(z.id, z.vertices))
                .collect();
            Stage::PolygonZones(PolygonZoneStage::new(zones))
        }
        StageKind::Classification => {
            let mut cfg: ClassifierConfig = config_from_value(config)?;
            cfg.event_type = EventType::Classification;
            Stage::Classification(ClassifierStage::new(cfg, global_config.clone()))
        }
        StageKind::AgeGender => {
            let mut cfg: ClassifierConfig = config_from_value(config)?;
            cfg.event_type = EventType::Custom;
            cfg.parse_age_gender = true;
            Stage::AgeGender(ClassifierStage::new(cfg, global_config.clone()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_config() -> GlobalConfig {
        GlobalConfig {
            inference_server_url: "http://localhost:8000".into(),
            use_shared_memory: false,
            triton_server_url: None,
        }
    }

    #[test]
    fn tracker_rejected_without_detector() {
        let err = ProcessorRegistry::build(
            "tracker",
            serde_json::json!({
                "high_thresh": 0.6, "match_thresh": 0.3, "track_buffer": 30,
                "trajectory_max_length": 50, "max_allowed_distance_ratio": 0.5,
                "trajectory_cleanup_threshold": 30, "draw_annotations": false
            }),
            &global_config(),
            &Entitlements::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Dependency(_)));
    }

    #[test]
    fn age_gender_rejected_without_growth_pack() {
        let entitlements = Entitlements::new(vision_config::LicenseTier::Enterprise, vec![]);
        let err = ProcessorRegistry::build(
            "age_gender",
            serde_json::json!({
                "model": {
                    "model_id": "age_gender_v1", "transport": "HttpJson", "input_size": 64,
                    "confidence_threshold": 0.5, "nms_iou_threshold": 0.5, "class_names": []
                },
                "event_type": "custom", "confidence_threshold": 0.5
            }),
            &global_config(),
            &entitlements,
            &[StageKind::Detector, StageKind::Tracker],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Entitlement(_)));
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let err = ProcessorRegistry::build(
            "not_a_real_stage",
            serde_json::json!({}),
            &global_config(),
            &Entitlements::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(_)));
    }
}
