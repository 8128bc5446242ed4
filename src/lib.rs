//! USB Power Delivery policy engine for `[no_std]`.
//!
//! The policy engine negotiates power contracts as source or sink, performs data role, power role
//! and VCONN swaps, and handles vendor defined messages for alternate mode discovery.
//! It drives three collaborators: a [`protocol_layer::ProtocolLayer`] for message transport,
//! a [`PortController`] for the Type-C port hardware, and a
//! [`device_policy_manager::DevicePolicyManager`] for policy decisions.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod fmt;

pub mod counters;
pub mod device_policy_manager;
pub mod events;
pub mod policy_engine;
pub mod protocol_layer;
pub mod timers;

#[cfg(test)]
mod dummy;

#[macro_use]
extern crate uom;

pub use usbpd_policy_traits::{CcControl, DataRole, PortController, PowerRole, RpLevel, VbusState};

/// Physical quantities, as used in power data objects.
pub mod units {
    pub use uom::si::f32::{ElectricCurrent, ElectricPotential, Power};
}

mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}
