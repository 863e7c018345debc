//! License-tier and growth-pack entitlement checks consulted by the
//! component registry before it constructs a source, processor or sink.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LicenseTier {
    Free,
    Standard,
    Professional,
    Enterprise,
}

/// The tenant's active license tier plus any a-la-carte growth packs, e.g.
/// `"age_gender"` or `"shared_memory_inference"`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Entitlements {
    pub tier: Option<LicenseTier>,
    pub growth_packs: Vec<String>,
}

impl Entitlements {
    pub fn new(tier: LicenseTier, growth_packs: Vec<String>) -> Self {
        Self {
            tier: Some(tier),
            growth_packs,
        }
    }

    pub fn has_pack(&self, pack: &str) -> bool {
        self.growth_packs.iter().any(|p| p == pack)
    }

    /// True if `self.tier >= required`, inclusive.
    pub fn meets_tier(&self, required: LicenseTier) -> bool {
        self.tier.map(|t| t >= required).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_is_meaningful() {
        let ent = Entitlements::new(LicenseTier::Standard, vec![]);
        assert!(ent.meets_tier(LicenseTier::Free));
        assert!(ent.meets_tier(LicenseTier::Standard));
        assert!(!ent.meets_tier(LicenseTier::Professional));
    }

    #[test]
    fn growth_pack_membership() {
        let ent = Entitlements::new(LicenseTier::Free, vec!["age_gender".into()]);
        assert!(ent.has_pack("age_gender"));
        assert!(!ent.has_pack("shared_memory_inference"));
    }
}
