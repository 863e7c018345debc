//! The append-only telemetry [`Event`] record and its discriminated type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Detection,
    Tracking,
    Crossing,
    Classification,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Detection => "detection",
            EventType::Tracking => "tracking",
            EventType::Crossing => "crossing",
            EventType::Classification => "classification",
            EventType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "detection" => EventType::Detection,
            "tracking" => EventType::Tracking,
            "crossing" => EventType::Crossing,
            "classification" => EventType::Classification,
            _ => EventType::Custom,
        })
    }
}

/// One append-only telemetry record. `properties` carries the type-specific
/// payload (bbox, class, trajectory, zone_id, direction, crossing_point, age,
/// gender) as a JSON object so the schema can evolve without a new column
/// per field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source_id: String,
    pub camera_id: String,
    pub timestamp_ms: i64,
    pub properties: Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        camera_id: impl Into<String>,
        source_id: impl Into<String>,
        timestamp_ms: i64,
        properties: Value,
    ) -> Self {
        Self {
            event_type,
            camera_id: camera_id.into(),
            source_id: source_id.into(),
            timestamp_ms,
            properties,
        }
    }

    /// The `class_name` carried in `properties`, if this event's payload has one.
    pub fn class_name(&self) -> Option<&str> {
        self.properties.get("class_name").and_then(Value::as_str)
    }

    /// The `track_id` carried in `properties`, if this event's payload has one.
    pub fn track_id(&self) -> Option<u32> {
        self.properties
            .get("track_id")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
    }
}
