//! Component registry (C7): builds source, processor and sink instances
//! from a `(type_tag, id, config)` triple, enforcing entitlement policy and
//! processor dependency order before construction fails or succeeds.
//!
//! A passive factory. It holds no cross-camera state; every call is
//! independent of every other.

mod inference;
mod processor;
mod sink;
mod source;

pub use inference::InferenceRegistry;
pub use processor::{ProcessorRegistry, StageKind};
pub use sink::{SinkRegistry, SinkTypeTag};
pub use source::{SourceRegistry, SourceTypeTag};

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("unknown component type: {0}")]
    UnknownType(String),
    #[error("entitlement denied: {0}")]
    Entitlement(String),
    #[error("unmet dependency: {0}")]
    Dependency(String),
    #[error("invalid component config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

pub(crate) fn config_from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| RegistryError::Config(e.to_string()))
}
