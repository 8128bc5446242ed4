//! Definitions of message content.
//!
//! A [`Message`] holds a header and its raw data objects. Typed views on the objects are
//! provided by the submodules.
pub mod extended;
pub mod header;
pub mod pdo;
pub mod request;
pub mod vendor_defined;

use byteorder::{ByteOrder, LittleEndian};
use header::{ControlMessageType, DataMessageType, ExtendedMessageType, Header, MessageType};
use heapless::Vec;
use vendor_defined::{VdmCommand, VdmHeaderStructured};

use crate::events::MessageEvent;

/// The maximum number of data objects in a message.
pub const MAX_DATA_OBJECTS: usize = 7;

/// Errors that can occur during message parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field is not supported.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
    /// More data objects than a message can carry.
    #[error("too many data objects ({0})")]
    TooManyObjects(usize),
}

/// A USB PD message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    /// The message header.
    pub header: Header,
    data_objects: Vec<u32, MAX_DATA_OBJECTS>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new(Header(0))
    }
}

impl Message {
    /// Create a new message without data objects.
    pub fn new(header: Header) -> Self {
        Self {
            header: header.with_num_objects(0),
            data_objects: Vec::new(),
        }
    }

    /// Create a new message with data objects.
    ///
    /// The object count of the header follows the number of objects. Objects beyond
    /// [`MAX_DATA_OBJECTS`] are dropped.
    pub fn new_with_objects(header: Header, objects: &[u32]) -> Self {
        let len = objects.len().min(MAX_DATA_OBJECTS);
        let mut data_objects = Vec::new();
        let _ = data_objects.extend_from_slice(&objects[..len]);

        Self {
            header: header.with_num_objects(len as u8),
            data_objects,
        }
    }

    /// Create a control message.
    pub fn control(template: Header, message_type: ControlMessageType) -> Self {
        Self::new(Header::new_control(template, message_type))
    }

    /// Create a data message.
    pub fn data(template: Header, message_type: DataMessageType, objects: &[u32]) -> Self {
        Self::new_with_objects(Header::new_data(template, message_type, 0), objects)
    }

    /// Create a single-chunk extended message from its payload.
    pub fn extended(template: Header, message_type: ExtendedMessageType, payload: &[u8]) -> Self {
        Self::new_with_objects(
            Header::new_extended(template, message_type, 0),
            &extended::pack(payload),
        )
    }

    /// The data objects, as declared by the header.
    pub fn objects(&self) -> &[u32] {
        let len = self.header.num_objects().min(self.data_objects.len());
        &self.data_objects[..len]
    }

    /// A single data object, if the header declares it.
    pub fn object(&self, index: usize) -> Option<u32> {
        self.objects().get(index).copied()
    }

    /// The header of a structured VDM.
    pub fn vdm_header(&self) -> Option<VdmHeaderStructured> {
        match self.header.message_type() {
            MessageType::Data(DataMessageType::VendorDefined) => self.object(0).map(VdmHeaderStructured),
            _ => None,
        }
    }

    /// The header of an extended message.
    pub fn extended_header(&self) -> Option<extended::ExtendedHeader> {
        if self.header.extended() {
            extended::header(self.objects())
        } else {
            None
        }
    }

    /// A byte of the extended payload.
    pub fn extended_payload_byte(&self, index: usize) -> Option<u8> {
        if self.header.extended() {
            extended::payload_byte(self.objects(), index)
        } else {
            None
        }
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    ///
    /// The buffer holds at least the two header bytes and four bytes per data object.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, ParseError> {
        let expected = 2 + 4 * self.objects().len();
        if buffer.len() < expected {
            return Err(ParseError::InvalidLength {
                expected,
                found: buffer.len(),
            });
        }

        let mut written = self.header.to_bytes(buffer);

        for object in self.objects() {
            LittleEndian::write_u32(&mut buffer[written..written + 4], *object);
            written += 4;
        }

        Ok(written)
    }

    /// Parse a message from a slice of bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: data.len(),
            });
        }

        let header = Header::from_bytes(&data[..2])?;
        let expected = 2 + 4 * header.num_objects();
        if data.len() < expected {
            return Err(ParseError::InvalidLength {
                expected,
                found: data.len(),
            });
        }

        let mut data_objects = Vec::new();
        for chunk in data[2..expected].chunks_exact(4) {
            data_objects
                .push(LittleEndian::read_u32(chunk))
                .map_err(|_| ParseError::TooManyObjects(header.num_objects()))?;
        }

        Ok(Self { header, data_objects })
    }

    /// The received-message marker that this message sets.
    pub fn event(&self) -> MessageEvent {
        match self.header.message_type() {
            MessageType::Control(message_type) => match message_type {
                ControlMessageType::GotoMin => MessageEvent::GotoMin,
                ControlMessageType::Accept => MessageEvent::Accept,
                ControlMessageType::Reject => MessageEvent::Reject,
                ControlMessageType::Ping => MessageEvent::Ping,
                ControlMessageType::PsRdy => MessageEvent::PsRdy,
                ControlMessageType::GetSourceCap => MessageEvent::GetSourceCap,
                ControlMessageType::GetSinkCap => MessageEvent::GetSinkCap,
                ControlMessageType::DrSwap => MessageEvent::DrSwap,
                ControlMessageType::PrSwap => MessageEvent::PrSwap,
                ControlMessageType::VconnSwap => MessageEvent::VconnSwap,
                ControlMessageType::Wait => MessageEvent::Wait,
                ControlMessageType::NotSupported => MessageEvent::NotSupported,
                ControlMessageType::GetSourceCapExtended => MessageEvent::GetSourceCapExtended,
                ControlMessageType::GetStatus => MessageEvent::GetStatus,
                ControlMessageType::FrSwap => MessageEvent::FrSwap,
                ControlMessageType::GetPpsStatus => MessageEvent::GetPpsStatus,
                ControlMessageType::GetCountryCodes => MessageEvent::GetCountryCodes,
                ControlMessageType::GetSinkCapExtended => MessageEvent::GetSinkCapExtended,
                ControlMessageType::GetSourceInfo => MessageEvent::GetSourceInfo,
                ControlMessageType::GetRevision => MessageEvent::GetRevision,
                // GoodCRC and Soft_Reset are consumed below the policy engine.
                ControlMessageType::GoodCRC | ControlMessageType::SoftReset | ControlMessageType::Reserved => {
                    MessageEvent::Reserved
                }
            },
            MessageType::Data(message_type) => match message_type {
                DataMessageType::SourceCapabilities => MessageEvent::SourceCapabilities,
                DataMessageType::Request => MessageEvent::Request,
                DataMessageType::Bist => MessageEvent::Bist,
                DataMessageType::SinkCapabilities => MessageEvent::SinkCapabilities,
                DataMessageType::BatteryStatus => MessageEvent::BatteryStatus,
                DataMessageType::Alert => MessageEvent::Alert,
                DataMessageType::GetCountryInfo => MessageEvent::GetCountryInfo,
                DataMessageType::EnterUsb => MessageEvent::EnterUsb,
                DataMessageType::SourceInfo => MessageEvent::SourceInfo,
                DataMessageType::Revision => MessageEvent::Revision,
                DataMessageType::VendorDefined => self.vdm_event(),
                DataMessageType::Reserved => MessageEvent::Reserved,
            },
            MessageType::Extended(message_type) => match message_type {
                ExtendedMessageType::SourceCapabilitiesExtended => MessageEvent::SourceCapabilitiesExtended,
                ExtendedMessageType::Status => MessageEvent::Status,
                ExtendedMessageType::GetBatteryCap => MessageEvent::GetBatteryCap,
                ExtendedMessageType::GetBatteryStatus => MessageEvent::GetBatteryStatus,
                ExtendedMessageType::BatteryCapabilities => MessageEvent::BatteryCapabilities,
                ExtendedMessageType::GetManufacturerInfo => MessageEvent::GetManufacturerInfo,
                ExtendedMessageType::ManufacturerInfo => MessageEvent::ManufacturerInfo,
                ExtendedMessageType::SecurityRequest => MessageEvent::SecurityRequest,
                ExtendedMessageType::SecurityResponse => MessageEvent::SecurityResponse,
                ExtendedMessageType::FirmwareUpdateRequest => MessageEvent::FirmwareUpdateRequest,
                ExtendedMessageType::FirmwareUpdateResponse => MessageEvent::FirmwareUpdateResponse,
                ExtendedMessageType::PpsStatus => MessageEvent::PpsStatus,
                ExtendedMessageType::CountryInfo => MessageEvent::CountryInfo,
                ExtendedMessageType::CountryCodes => MessageEvent::CountryCodes,
                ExtendedMessageType::SinkCapabilitiesExtended => MessageEvent::SinkCapabilitiesExtended,
                ExtendedMessageType::Reserved => MessageEvent::Reserved,
            },
        }
    }

    fn vdm_event(&self) -> MessageEvent {
        let Some(header) = self.vdm_header() else {
            return MessageEvent::Reserved;
        };

        if !header.structured() {
            return MessageEvent::UnstructuredVdm;
        }

        match header.command() {
            VdmCommand::DiscoverIdentity => MessageEvent::DiscoverIdentity,
            VdmCommand::DiscoverSvids => MessageEvent::DiscoverSvids,
            VdmCommand::DiscoverModes => MessageEvent::DiscoverModes,
            VdmCommand::EnterMode => MessageEvent::EnterMode,
            VdmCommand::ExitMode => MessageEvent::ExitMode,
            VdmCommand::Attention => MessageEvent::Attention,
            VdmCommand::DisplayPortStatus => MessageEvent::DisplayPortStatus,
            VdmCommand::DisplayPortConfigure => MessageEvent::DisplayPortConfigure,
            VdmCommand::Other(_) => MessageEvent::Reserved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::header::{ControlMessageType, DataMessageType, Header, SpecificationRevision};
    use super::{Message, ParseError};
    use crate::events::MessageEvent;
    use crate::{DataRole, PowerRole};

    fn template() -> Header {
        Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X)
    }

    #[test]
    fn object_count_follows_objects() {
        let message = Message::data(template(), DataMessageType::Request, &[0x1400_C832]);

        assert_eq!(message.header.num_objects(), 1);
        assert_eq!(message.objects(), &[0x1400_C832]);
        assert_eq!(message.object(1), None);
        assert_eq!(message.event(), MessageEvent::Request);
    }

    #[test]
    fn parse_truncated() {
        let message = Message::data(template(), DataMessageType::Request, &[0x1400_C832]);
        let mut buf = [0u8; 30];
        let len = message.to_bytes(&mut buf).unwrap();
        assert_eq!(len, 6);

        assert_eq!(Message::from_bytes(&buf[..len]), Ok(message));
        assert_eq!(
            Message::from_bytes(&buf[..4]),
            Err(ParseError::InvalidLength { expected: 6, found: 4 })
        );
    }

    #[test]
    fn serialize_into_short_buffer() {
        let message = Message::data(template(), DataMessageType::Request, &[0x1400_C832]);
        let mut buf = [0u8; 5];

        assert_eq!(
            message.to_bytes(&mut buf),
            Err(ParseError::InvalidLength { expected: 6, found: 5 })
        );
        assert_eq!(buf, [0; 5]);
    }

    #[test]
    fn control_events() {
        assert_eq!(
            Message::control(template(), ControlMessageType::PsRdy).event(),
            MessageEvent::PsRdy
        );
        assert_eq!(
            Message::control(template(), ControlMessageType::SoftReset).event(),
            MessageEvent::Reserved
        );
    }
}
