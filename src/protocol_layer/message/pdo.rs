//! Power data objects, as advertised in source and sink capabilities.
//!
//! See [6.4.1].
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// The kind of a power data object, as encoded in its two most significant bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Kind {
    /// Fixed voltage supply.
    FixedSupply,
    /// Battery.
    Battery,
    /// Variable voltage supply.
    VariableSupply,
    /// Augmented power data object, for example PPS.
    Augmented,
}

impl From<u8> for Kind {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Self::FixedSupply,
            0b01 => Self::Battery,
            0b10 => Self::VariableSupply,
            _ => Self::Augmented,
        }
    }
}

/// A decoded power data object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDataObject {
    /// Fixed supply.
    FixedSupply(FixedSupply),
    /// Battery.
    Battery(Battery),
    /// Variable supply.
    VariableSupply(VariableSupply),
    /// Augmented supply, kept raw.
    Augmented(u32),
}

impl PowerDataObject {
    /// The kind of this object.
    pub fn kind(&self) -> Kind {
        match self {
            Self::FixedSupply(_) => Kind::FixedSupply,
            Self::Battery(_) => Kind::Battery,
            Self::VariableSupply(_) => Kind::VariableSupply,
            Self::Augmented(_) => Kind::Augmented,
        }
    }
}

impl From<u32> for PowerDataObject {
    fn from(raw: u32) -> Self {
        match Kind::from((raw >> 30) as u8) {
            Kind::FixedSupply => Self::FixedSupply(FixedSupply(raw)),
            Kind::Battery => Self::Battery(Battery(raw)),
            Kind::VariableSupply => Self::VariableSupply(VariableSupply(raw)),
            Kind::Augmented => Self::Augmented(raw),
        }
    }
}

impl From<PowerDataObject> for u32 {
    fn from(value: PowerDataObject) -> Self {
        match value {
            PowerDataObject::FixedSupply(supply) => supply.0,
            PowerDataObject::Battery(battery) => battery.0,
            PowerDataObject::VariableSupply(supply) => supply.0,
            PowerDataObject::Augmented(raw) => raw,
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// A fixed supply object.
    ///
    /// Sinks reuse the layout, where bit 28 means "higher capability" and bit 27 "unconstrained power".
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply
        pub kind: u8 @ 30..=31,
        /// Dual-role power
        pub dual_role_power: bool @ 29,
        /// USB suspend supported
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power
        pub unconstrained_power: bool @ 27,
        /// USB communications capable
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data
        pub dual_role_data: bool @ 25,
        /// Unchunked extended messages supported
        pub unchunked_extended_messages_supported: bool @ 24,
        /// Peak current
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl Default for FixedSupply {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedSupply {
    /// An empty fixed supply object.
    pub fn new() -> Self {
        Self(0)
    }

    /// The vSafe5V object that a dual-role port advertises as its own source capability.
    ///
    /// 5 V at 0.5 A.
    pub fn new_dual_role_5v() -> Self {
        Self::new()
            .with_dual_role_power(true)
            .with_usb_suspend_supported(true)
            .with_usb_communications_capable(true)
            .with_dual_role_data(true)
            .with_raw_voltage(100)
            .with_raw_max_current(50)
    }

    /// Voltage of the supply.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// Maximum current of the supply.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// A battery supply object.
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum allowable power in 250 mW units
        pub raw_max_power: u16 @ 0..=9,
    }
}

impl Battery {
    /// Maximum voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// Minimum voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// Maximum allowable power.
    pub fn max_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_power().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// A variable supply object.
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply (non-battery)
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl VariableSupply {
    /// Maximum voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// Minimum voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// Maximum current.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;

    use super::{FixedSupply, Kind, PowerDataObject};

    #[test]
    fn dual_role_5v() {
        let supply = FixedSupply::new_dual_role_5v();

        assert_eq!(supply.0, 0x3601_9032);
        assert!((supply.voltage().get::<millivolt>() - 5000.0).abs() < 0.5);
        assert!((supply.max_current().get::<milliampere>() - 500.0).abs() < 0.5);
    }

    #[test]
    fn decode_kinds() {
        assert_eq!(PowerDataObject::from(0x3601_9032).kind(), Kind::FixedSupply);
        assert_eq!(PowerDataObject::from(0x4000_0000).kind(), Kind::Battery);
        assert_eq!(PowerDataObject::from(0x8000_0000).kind(), Kind::VariableSupply);
        assert_eq!(PowerDataObject::from(0xC000_0000).kind(), Kind::Augmented);
    }
}
