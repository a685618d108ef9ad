//! Inverter register metadata
//!
//! The register table is data, not code: every register carries its cloud
//! alias so remote configuration requests can name registers either by
//! address or by alias without a hardcoded mapping anywhere else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Access mode of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterAccess {
    Read,
    Write,
    ReadWrite,
}

/// Immutable metadata for one register address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub address: u8,
    pub name: String,
    /// Short name used by the cloud configuration protocol
    pub alias: String,
    pub unit: String,
    /// Scaling divisor: engineering value = raw / gain
    pub gain: f32,
    pub access: RegisterAccess,
}

/// Lookup table over register metadata, keyed by address
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    by_address: BTreeMap<u8, RegisterConfig>,
}

impl RegisterMap {
    pub fn new(configs: Vec<RegisterConfig>) -> Self {
        let mut by_address = BTreeMap::new();
        for config in configs {
            by_address.insert(config.address, config);
        }
        Self { by_address }
    }

    /// The register bank of the reference inverter
    pub fn default_inverter() -> Self {
        let mk = |address: u8, name: &str, alias: &str, unit: &str, gain: f32, access: RegisterAccess| {
            RegisterConfig {
                address,
                name: name.to_string(),
                alias: alias.to_string(),
                unit: unit.to_string(),
                gain,
                access,
            }
        };

        Self::new(vec![
            mk(0, "Vac1_L1_Phase_voltage", "voltage", "V", 10.0, RegisterAccess::Read),
            mk(1, "Iac1_L1_Phase_current", "current", "A", 10.0, RegisterAccess::Read),
            mk(2, "Fac1_L1_Phase_frequency", "frequency", "Hz", 100.0, RegisterAccess::Read),
            mk(3, "Vpv1_PV1_input_voltage", "pv1_voltage", "V", 10.0, RegisterAccess::Read),
            mk(4, "Vpv2_PV2_input_voltage", "pv2_voltage", "V", 10.0, RegisterAccess::Read),
            mk(5, "Ipv1_PV1_input_current", "pv1_current", "A", 10.0, RegisterAccess::Read),
            mk(6, "Ipv2_PV2_input_current", "pv2_current", "A", 10.0, RegisterAccess::Read),
            mk(7, "Inverter_internal_temperature", "temperature", "C", 10.0, RegisterAccess::Read),
            mk(8, "Export_power_percentage", "export_power", "%", 1.0, RegisterAccess::ReadWrite),
            mk(9, "Pac_L_Inverter_output_power", "output_power", "W", 1.0, RegisterAccess::Read),
        ])
    }

    pub fn get(&self, address: u8) -> Option<&RegisterConfig> {
        self.by_address.get(&address)
    }

    pub fn contains(&self, address: u8) -> bool {
        self.by_address.contains_key(&address)
    }

    /// Resolve a cloud alias to a register address
    pub fn resolve_alias(&self, alias: &str) -> Option<u8> {
        self.by_address
            .values()
            .find(|c| c.alias == alias)
            .map(|c| c.address)
    }

    /// Resolve a register by cloud alias or full name
    pub fn resolve_name(&self, name: &str) -> Option<u8> {
        self.by_address
            .values()
            .find(|c| c.alias == name || c.name == name)
            .map(|c| c.address)
    }

    /// All addresses in ascending order
    pub fn addresses(&self) -> Vec<u8> {
        self.by_address.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u8, &RegisterConfig)> {
        self.by_address.iter()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_shape() {
        let map = RegisterMap::default_inverter();
        assert_eq!(map.len(), 10);
        assert_eq!(map.addresses(), (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_alias_resolution() {
        let map = RegisterMap::default_inverter();
        assert_eq!(map.resolve_alias("voltage"), Some(0));
        assert_eq!(map.resolve_alias("output_power"), Some(9));
        assert_eq!(map.resolve_alias("bogus"), None);
    }

    #[test]
    fn test_name_resolution_accepts_alias_and_full_name() {
        let map = RegisterMap::default_inverter();
        assert_eq!(map.resolve_name("export_power"), Some(8));
        assert_eq!(map.resolve_name("Export_power_percentage"), Some(8));
        assert_eq!(map.resolve_name("Vac1_L1_Phase_voltage"), Some(0));
        assert_eq!(map.resolve_name("bogus"), None);
    }

    #[test]
    fn test_gain_metadata() {
        let map = RegisterMap::default_inverter();
        let freq = map.get(2).unwrap();
        assert_eq!(freq.gain, 100.0);
        assert_eq!(freq.unit, "Hz");
        assert_eq!(freq.access, RegisterAccess::Read);
    }

    #[test]
    fn test_writable_register() {
        let map = RegisterMap::default_inverter();
        assert_eq!(map.get(8).unwrap().access, RegisterAccess::ReadWrite);
    }
}
