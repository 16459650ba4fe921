//! IPS loader contract: normalizes raw factor weights to Σ=1
//! and asserts every factor key is known to the registry before a run can
//! begin. Stage code never reaches past this interface into wherever IPS
//! rows actually live.

use std::collections::HashMap;

use crate::domain::IpsConfig;
use crate::error::AgentError;

use super::registry;

pub trait IpsStore: Send + Sync {
    fn load(&self, ips_id: &str) -> Result<IpsConfig, AgentError>;
}

/// Validates factor shapes and registry membership, then normalizes weights
/// so enabled factors sum to 1 (disabled factors contribute 0).
pub fn normalize_and_validate(mut config: IpsConfig) -> Result<IpsConfig, AgentError> {
    for factor in &config.factors {
        factor.validate_shape()?;
        if registry::lookup(&factor.key).is_none() {
            return Err(AgentError::IpsSchemaError(format!(
                "ips {}: unknown factor key `{}`",
                config.id, factor.key
            )));
        }
    }

    let raw_sum: f64 = config.factors.iter().filter(|f| f.enabled).map(|f| f.weight).sum();
    if raw_sum <= 0.0 {
        return Err(AgentError::IpsSchemaError(format!("ips {}: no enabled factors with positive weight", config.id)));
    }

    for factor in &mut config.factors {
        factor.weight = if factor.enabled { factor.weight / raw_sum } else { 0.0 };
    }

    Ok(config)
}

#[derive(Default)]
pub struct InMemoryIpsStore {
    raw: HashMap<String, IpsConfig>,
}

impl InMemoryIpsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: IpsConfig) {
        self.raw.insert(config.id.clone(), config);
    }
}

impl IpsStore for InMemoryIpsStore {
    fn load(&self, ips_id: &str) -> Result<IpsConfig, AgentError> {
        let raw = self
            .raw
            .get(ips_id)
            .cloned()
            .ok_or_else(|| AgentError::IpsSchemaError(format!("unknown ips id: {ips_id}")))?;
        normalize_and_validate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Factor, FactorScope};

    fn factor(key: &str, weight: f64, enabled: bool) -> Factor {
        Factor {
            key: key.into(),
            display_name: key.into(),
            scope: FactorScope::Chain,
            weight,
            direction: Direction::Gte,
            threshold: 0.0,
            threshold_max: None,
            enabled,
        }
    }

    #[test]
    fn weights_normalize_to_one_and_disabled_contribute_zero() {
        let config = IpsConfig {
            id: "ips1".into(),
            name: "Test".into(),
            factors: vec![factor("opt-delta", 30.0, true), factor("opt-open-interest", 60.0, true), factor("opt-gamma", 100.0, false)],
        };
        let normalized = normalize_and_validate(config).unwrap();
        let sum: f64 = normalized.factors.iter().map(|f| f.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(normalized.factors[2].weight, 0.0);
        assert!((normalized.factors[0].weight - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_key_is_schema_error() {
        let config = IpsConfig { id: "ips1".into(), name: "Test".into(), factors: vec![factor("totally-made-up", 10.0, true)] };
        let err = normalize_and_validate(config).unwrap_err();
        assert_eq!(err.kind(), "IPSSchemaError");
    }

    #[test]
    fn in_memory_store_round_trips() {
        let mut store = InMemoryIpsStore::new();
        store.insert(IpsConfig { id: "ips1".into(), name: "Test".into(), factors: vec![factor("opt-delta", 1.0, true)] });
        let loaded = store.load("ips1").unwrap();
        assert_eq!(loaded.factors[0].weight, 1.0);
        assert_eq!(store.load("missing").unwrap_err().kind(), "IPSSchemaError");
    }
}
