//! USB PD policy engine traits.
//!
//! Provides the port controller trait, through which the policy engine drives the Type-C port hardware:
//! pull resistors, VBUS and VCONN switching, and reset signalling.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

/// The power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerRole {
    /// The port provides power.
    Source,
    /// The port consumes power.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// The data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataRole {
    /// Upstream facing port.
    Ufp,
    /// Downstream facing port.
    Dfp,
}

impl DataRole {
    /// The opposite data role, as assumed after a data role swap.
    pub fn swapped(self) -> Self {
        match self {
            Self::Ufp => Self::Dfp,
            Self::Dfp => Self::Ufp,
        }
    }
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}

/// Rp pull-up level that a source advertises on CC.
///
/// With PD 3.0 collision avoidance, 3.0 A signals `SinkTxOK` and 1.5 A signals `SinkTxNG`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RpLevel {
    /// No Rp asserted.
    Rp0,
    /// Default USB power.
    Rp80,
    /// 1.5 A.
    Rp180,
    /// 3.0 A.
    Rp330,
}

/// CC line (BMC receiver) control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcControl {
    /// CC communication enabled.
    On,
    /// CC communication disabled.
    Off,
}

/// Result of a VBUS presence check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VbusState {
    /// VBUS is below the vSafe0V threshold.
    Absent,
    /// VBUS is at vSafe5V or above.
    Present,
    /// The controller could not tell.
    Unknown,
}

/// Port controller trait, through which the policy engine talks to the Type-C port hardware.
///
/// All calls are expected to be synchronous and idempotent.
pub trait PortController {
    /// Apply a new power role to the port.
    fn set_power_role(&mut self, role: PowerRole);

    /// Apply a new data role to the port.
    fn set_data_role(&mut self, role: DataRole);

    /// Enable dual-role toggling.
    fn set_dual_role(&mut self) {}

    /// Enable or disable sourcing of VCONN.
    fn set_vconn_source(&mut self, enable: bool);

    /// Select the asserted Rp level.
    fn set_rp_control(&mut self, level: RpLevel);

    /// Read the Rp level currently seen on CC.
    ///
    /// For a sink, this is the level asserted by the port partner.
    fn rp_level(&self) -> RpLevel;

    /// Switch the VBUS source (OTG boost) on or off.
    fn set_otg_control(&mut self, enable: bool);

    /// Enable or disable CC communication.
    fn set_cc_control(&mut self, control: CcControl);

    /// Check presence of VBUS.
    fn vbus_on_check(&mut self) -> VbusState;

    /// Apply a new power supply, as selected by a request for the given object position.
    ///
    /// `power_data_object` is the raw PDO that was advertised at this position.
    fn apply_supply(&mut self, _object_position: u8, _power_data_object: u32) {}

    /// Signal hard reset on the wire.
    fn hard_reset(&mut self);

    /// Reset the PHY after a soft reset.
    fn soft_reset(&mut self) {}

    /// Reset the whole port driver to its default configuration.
    fn driver_reset(&mut self) {}
}
