//! Vendor defined messages, used for identity and alternate mode discovery.
//!
//! See [6.4.4].
use proc_bitfield::bitfield;

/// The standard ID for power delivery discovery commands.
pub const PD_SID: u16 = 0xFF00;

/// The standard ID of DisplayPort alternate mode.
pub const DISPLAYPORT_SID: u16 = 0xFF01;

/// Structured VDM command types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommandType {
    /// A request.
    InitiatorReq,
    /// Positive response.
    ResponderAck,
    /// Negative response.
    ResponderNak,
    /// The responder is busy.
    ResponderBusy,
}

impl From<VdmCommandType> for u8 {
    fn from(value: VdmCommandType) -> Self {
        match value {
            VdmCommandType::InitiatorReq => 0,
            VdmCommandType::ResponderAck => 1,
            VdmCommandType::ResponderNak => 2,
            VdmCommandType::ResponderBusy => 3,
        }
    }
}

impl From<u8> for VdmCommandType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0 => VdmCommandType::InitiatorReq,
            1 => VdmCommandType::ResponderAck,
            2 => VdmCommandType::ResponderNak,
            _ => VdmCommandType::ResponderBusy,
        }
    }
}

/// Structured VDM commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmCommand {
    /// Discover identity.
    DiscoverIdentity,
    /// Discover SVIDs.
    DiscoverSvids,
    /// Discover modes.
    DiscoverModes,
    /// Enter mode.
    EnterMode,
    /// Exit mode.
    ExitMode,
    /// Attention.
    Attention,
    /// DisplayPort status update.
    DisplayPortStatus,
    /// DisplayPort configure.
    DisplayPortConfigure,
    /// Reserved or SVID specific.
    Other(u8),
}

impl From<VdmCommand> for u8 {
    fn from(value: VdmCommand) -> Self {
        match value {
            VdmCommand::DiscoverIdentity => 0x01,
            VdmCommand::DiscoverSvids => 0x02,
            VdmCommand::DiscoverModes => 0x03,
            VdmCommand::EnterMode => 0x04,
            VdmCommand::ExitMode => 0x05,
            VdmCommand::Attention => 0x06,
            VdmCommand::DisplayPortStatus => 0x10,
            VdmCommand::DisplayPortConfigure => 0x11,
            VdmCommand::Other(x) => x,
        }
    }
}

impl From<u8> for VdmCommand {
    fn from(value: u8) -> Self {
        match value {
            0x01 => VdmCommand::DiscoverIdentity,
            0x02 => VdmCommand::DiscoverSvids,
            0x03 => VdmCommand::DiscoverModes,
            0x04 => VdmCommand::EnterMode,
            0x05 => VdmCommand::ExitMode,
            0x06 => VdmCommand::Attention,
            0x10 => VdmCommand::DisplayPortStatus,
            0x11 => VdmCommand::DisplayPortConfigure,
            x => VdmCommand::Other(x),
        }
    }
}

/// Structured VDM version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VdmVersion {
    /// Version 1.0, used with PD 2.0.
    V1_0,
    /// Version 2.1, used with PD 3.x.
    V2_1,
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// Header of a structured VDM.
    pub struct VdmHeaderStructured(pub u32): FromStorage, IntoStorage {
        /// VDM standard or vendor ID
        pub svid: u16 @ 16..=31,
        /// Structured (1) or unstructured (0)
        pub structured: bool @ 15,
        /// Structured VDM version, major
        pub vdm_version_major: u8 @ 13..=14,
        /// Structured VDM version, minor
        pub vdm_version_minor: u8 @ 11..=12,
        /// Object position
        pub object_position: u8 @ 8..=10,
        /// Command type
        pub command_type: u8 [VdmCommandType] @ 6..=7,
        /// Command
        pub command: u8 [VdmCommand] @ 0..=4,
    }
}

impl VdmHeaderStructured {
    /// Create a structured VDM header.
    pub fn new(svid: u16, version: VdmVersion, command: VdmCommand, command_type: VdmCommandType) -> Self {
        let (major, minor) = match version {
            VdmVersion::V1_0 => (0, 0),
            VdmVersion::V2_1 => (1, 1),
        };

        Self(0)
            .with_svid(svid)
            .with_structured(true)
            .with_vdm_version_major(major)
            .with_vdm_version_minor(minor)
            .with_command(command)
            .with_command_type(command_type)
    }
}

bitfield! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// Header of an unstructured VDM.
    pub struct VdmHeaderUnstructured(pub u32): FromStorage, IntoStorage {
        /// Vendor ID
        pub vid: u16 @ 16..=31,
        /// Structured (1) or unstructured (0)
        pub structured: bool @ 15,
        /// Vendor defined content
        pub data: u16 @ 0..=14,
    }
}

/// UFP product types in the identity header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProductTypeUfp {
    /// Not a UFP.
    NotUfp,
    /// PDUSB hub.
    PdUsbHub,
    /// PDUSB peripheral.
    PdUsbPeripheral,
    /// Power sink device.
    Psd,
    /// Reserved.
    Reserved(u8),
}

impl From<ProductTypeUfp> for u8 {
    fn from(value: ProductTypeUfp) -> Self {
        match value {
            ProductTypeUfp::NotUfp => 0b000,
            ProductTypeUfp::PdUsbHub => 0b001,
            ProductTypeUfp::PdUsbPeripheral => 0b010,
            ProductTypeUfp::Psd => 0b011,
            ProductTypeUfp::Reserved(x) => x,
        }
    }
}

impl From<u8> for ProductTypeUfp {
    fn from(value: u8) -> Self {
        match value {
            0b000 => ProductTypeUfp::NotUfp,
            0b001 => ProductTypeUfp::PdUsbHub,
            0b010 => ProductTypeUfp::PdUsbPeripheral,
            0b011 => ProductTypeUfp::Psd,
            x => ProductTypeUfp::Reserved(x),
        }
    }
}

/// DFP product types in the identity header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProductTypeDfp {
    /// Not a DFP.
    NotDfp,
    /// PDUSB hub.
    PdUsbHub,
    /// PDUSB host.
    PdUsbHost,
    /// Power brick.
    PowerBrick,
    /// Reserved.
    Reserved(u8),
}

impl From<ProductTypeDfp> for u8 {
    fn from(value: ProductTypeDfp) -> Self {
        match value {
            ProductTypeDfp::NotDfp => 0b000,
            ProductTypeDfp::PdUsbHub => 0b001,
            ProductTypeDfp::PdUsbHost => 0b010,
            ProductTypeDfp::PowerBrick => 0b011,
            ProductTypeDfp::Reserved(x) => x,
        }
    }
}

impl From<u8> for ProductTypeDfp {
    fn from(value: u8) -> Self {
        match value {
            0b000 => ProductTypeDfp::NotDfp,
            0b001 => ProductTypeDfp::PdUsbHub,
            0b010 => ProductTypeDfp::PdUsbHost,
            0b011 => ProductTypeDfp::PowerBrick,
            x => ProductTypeDfp::Reserved(x),
        }
    }
}

bitfield! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The ID header VDO of a Discover Identity response.
    pub struct IdentityHeader(pub u32): FromStorage, IntoStorage {
        /// USB communications capable as USB host
        pub host_data: bool @ 31,
        /// USB communications capable as USB device
        pub device_data: bool @ 30,
        /// Product type as UFP
        pub product_type_ufp: u8 [ProductTypeUfp] @ 27..=29,
        /// Modal operation supported
        pub modal_supported: bool @ 26,
        /// Product type as DFP
        pub product_type_dfp: u8 [ProductTypeDfp] @ 23..=25,
        /// Connector type (0b10: receptacle, 0b11: plug)
        pub connector_type: u8 @ 21..=22,
        /// USB vendor ID
        pub vid: u16 @ 0..=15,
    }
}

/// Connector type value for a Type-C receptacle.
pub const CONNECTOR_RECEPTACLE: u8 = 0b10;

bitfield! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The product VDO of a Discover Identity response.
    pub struct ProductVdo(pub u32): FromStorage, IntoStorage {
        /// USB product ID
        pub pid: u16 @ 16..=31,
        /// Device release number
        pub bcd_device: u16 @ 0..=15,
    }
}

bitfield! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// An entry of a Discover SVIDs response, holding two SVIDs.
    pub struct SvidVdo(pub u32): FromStorage, IntoStorage {
        /// First SVID
        pub svid_0: u16 @ 16..=31,
        /// Second SVID
        pub svid_1: u16 @ 0..=15,
    }
}

bitfield! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The alert data object.
    pub struct AlertDataObject(pub u32): FromStorage, IntoStorage {
        /// Over-voltage protection event
        pub ovp: bool @ 30,
        /// Source input change event
        pub source_input_change: bool @ 29,
        /// Operating condition change
        pub operating_condition_change: bool @ 28,
        /// Over-temperature protection event
        pub otp: bool @ 27,
        /// Over-current protection event
        pub ocp: bool @ 26,
        /// Battery status change event
        pub battery_status_change: bool @ 25,
        /// Fixed batteries whose status changed
        pub fixed_batteries: u8 @ 20..=23,
        /// Hot swappable batteries whose status changed
        pub hot_swappable_batteries: u8 @ 16..=19,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_header() {
        let header = VdmHeaderStructured::new(
            PD_SID,
            VdmVersion::V2_1,
            VdmCommand::DiscoverIdentity,
            VdmCommandType::ResponderAck,
        );

        assert_eq!(header.0, 0xFF00_A841);
        assert_eq!(header.command(), VdmCommand::DiscoverIdentity);
        assert_eq!(header.command_type(), VdmCommandType::ResponderAck);
    }

    #[test]
    fn unknown_command_is_kept() {
        let header = VdmHeaderStructured(0xFF01_8012);

        assert_eq!(header.command(), VdmCommand::Other(0x12));
        assert_eq!(header.svid(), DISPLAYPORT_SID);
    }
}
