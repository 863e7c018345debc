//! Inference client registry: gates which transport a model may use by
//! entitlement before handing off to [`vision_inference::InferenceClient::connect`].
//! gRPC tensor transport requires at least the Standard tier; the
//! shared-memory transport additionally requires the `shared_memory_inference`
//! growth pack, since it assumes a co-located Triton-style inference server.

use vision_config::{Entitlements, GlobalConfig, LicenseTier};
use vision_inference::{InferError, InferenceClient, Transport};

use crate::{RegistryError, Result};

pub struct InferenceRegistry;

impl InferenceRegistry {
    pub fn build(
        transport: Transport,
        global_config: &GlobalConfig,
        entitlements: &Entitlements,
    ) -> Result<InferenceClient> {
        check_entitlement(transport, entitlements)?;
        InferenceClient::connect(transport, global_config).map_err(to_registry_error)
    }
}

fn check_entitlement(transport: Transport, entitlements: &Entitlements) -> Result<()> {
    let ok = match transport {
        Transport::HttpJson => true,
        Transport::GrpcTensor => entitlements.meets_tier(LicenseTier::Standard),
        Transport::SharedMemory => {
            entitlements.meets_tier(LicenseTier::Standard) && entitlements.has_pack("shared_memory_inference")
        }
    };
    if ok {
        Ok(())
    } else {
        Err(RegistryError::Entitlement(format!(
            "inference transport {transport:?} is not permitted under the current license/growth-pack configuration"
        )))
    }
}

fn to_registry_error(e: InferError) -> RegistryError {
    RegistryError::Config(e.to_string())
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
    fn shared_memory_rejected_without_growth_pack() {
        let entitlements = Entitlements::new(LicenseTier::Enterprise, vec![]);
        let err = InferenceRegistry::build(Transport::SharedMemory, &global_config(), &entitlements).unwrap_err();
        assert!(matches!(err, RegistryError::Entitlement(_)));
    }

    #[test]
    fn grpc_rejected_below_standard_tier() {
        let entitlements = Entitlements::new(LicenseTier::Free, vec![]);
        let err = InferenceRegistry::build(Transport::GrpcTensor, &global_config(), &entitlements).unwrap_err();
        assert!(matches!(err, RegistryError::Entitlement(_)));
    }
}
