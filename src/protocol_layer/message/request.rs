//! Definitions of request data objects.
//!
//! See [6.4.2].
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, Power};

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// A request for a fixed or variable supply.
    pub struct FixedVariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        /// Operating current in 10 mA units
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current in 10 mA units
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedVariableSupply {
    /// Create a request for the object at `object_position`.
    pub fn new(object_position: u8, raw_operating_current: u16, raw_max_operating_current: u16) -> Self {
        Self(0)
            .with_object_position(object_position)
            .with_raw_operating_current(raw_operating_current)
            .with_raw_max_operating_current(raw_max_operating_current)
    }

    /// Requested operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    /// Requested maximum operating current.
    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// A request for a battery supply.
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        /// Operating power in 250 mW units
        pub raw_operating_power: u16 @ 10..=19,
        /// Maximum operating power in 250 mW units
        pub raw_max_operating_power: u16 @ 0..=9,
    }
}

impl Battery {
    /// Requested operating power.
    pub fn operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_operating_power().into())
    }

    /// Requested maximum operating power.
    pub fn max_operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_operating_power().into())
    }
}

#[cfg(test)]
mod tests {
    use super::FixedVariableSupply;

    #[test]
    fn fixed_request_layout() {
        let request = FixedVariableSupply::new(1, 50, 50).with_capability_mismatch(true);

        assert_eq!(request.0, 0x1400_C832);
        assert_eq!(request.object_position(), 1);
        assert!(request.capability_mismatch());
    }
}
