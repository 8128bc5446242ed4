//! Extended message headers and payloads, along with the PD 3.x data objects that answer
//! status queries.
//!
//! See [6.5].
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;

/// The largest payload that fits into a single chunk.
pub const MAX_CHUNK_DATA_SIZE: usize = 26;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// The header that precedes every extended message payload.
    pub struct ExtendedHeader(pub u16): Debug, FromStorage, IntoStorage {
        /// Whether the message is chunked.
        pub chunked: bool @ 15,
        /// Chunk number of this extended message.
        pub chunk_number: u8 @ 11..=14,
        /// Request chunk flag.
        pub request_chunk: bool @ 10,
        /// Payload size in bytes.
        pub data_size: u16 @ 0..=8,
    }
}

impl ExtendedHeader {
    /// Create the header of a single-chunk message with a given payload size.
    pub fn new(data_size: u16) -> Self {
        Self(0).with_chunked(true).with_data_size(data_size)
    }

    /// Whether this is a chunk of a message that does not fit into a single chunk.
    pub fn is_large_chunked(&self) -> bool {
        self.chunked() && usize::from(self.data_size()) >= MAX_CHUNK_DATA_SIZE
    }
}

/// A byte payload of a single-chunk extended message.
pub type Payload = Vec<u8, MAX_CHUNK_DATA_SIZE>;

/// Pack an extended header and its payload into 32 bit data objects.
///
/// The payload is truncated to a single chunk.
pub fn pack(payload: &[u8]) -> Vec<u32, 7> {
    let len = payload.len().min(MAX_CHUNK_DATA_SIZE);
    let mut bytes = [0u8; 2 + MAX_CHUNK_DATA_SIZE];

    LittleEndian::write_u16(&mut bytes[..2], ExtendedHeader::new(len as u16).0);
    bytes[2..2 + len].copy_from_slice(&payload[..len]);

    bytes[..(2 + len).div_ceil(4) * 4]
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            LittleEndian::read_u32(&word)
        })
        .collect()
}

/// Unpack the byte at `index` of an extended payload, from its data objects.
pub fn payload_byte(objects: &[u32], index: usize) -> Option<u8> {
    let offset = index + 2;
    objects.get(offset / 4).map(|word| (word >> (8 * (offset % 4))) as u8)
}

/// The extended header of a message, from its first data object.
pub fn header(objects: &[u32]) -> Option<ExtendedHeader> {
    objects.first().map(|word| ExtendedHeader(*word as u16))
}

/// Product information, as reported in extended messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identity {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Device release number.
    pub bcd_device: u16,
}

/// Source_Capabilities_Extended payload for a port with one battery slot and a 2 W PDP.
pub fn source_capabilities_extended(identity: &Identity) -> Payload {
    let mut payload = [0u8; 25];
    LittleEndian::write_u16(&mut payload[0..2], identity.vendor_id);
    LittleEndian::write_u16(&mut payload[2..4], identity.product_id);
    // Number of batteries and battery slots.
    payload[22] = 0x01;
    // Source PDP in watts.
    payload[23] = 2;

    to_payload(&payload)
}

/// Status payload: 25 °C, external power present, normal temperature.
pub fn status() -> Payload {
    let mut payload = [0u8; 7];
    payload[0] = 25;
    payload[1] = 0x08;
    payload[4] = 0x02;

    to_payload(&payload)
}

/// Battery_Capabilities payload for a battery reference.
///
/// Only reference zero is valid; its capacities are unknown.
pub fn battery_capabilities(identity: &Identity, battery_reference: u8) -> Payload {
    let mut payload = [0u8; 9];

    if battery_reference == 0 {
        LittleEndian::write_u16(&mut payload[0..2], identity.vendor_id);
        LittleEndian::write_u16(&mut payload[2..4], identity.product_id);
        LittleEndian::write_u16(&mut payload[4..6], 0xFFFF);
        LittleEndian::write_u16(&mut payload[6..8], 0xFFFF);
    } else {
        LittleEndian::write_u16(&mut payload[0..2], 0xFFFF);
        // Invalid battery reference.
        payload[8] = 0x01;
    }

    to_payload(&payload)
}

/// Manufacturer_Info payload for a target and reference.
///
/// Port information (target 0) and battery zero (target 1, reference 0) are answered.
pub fn manufacturer_info(identity: &Identity, target: u8, reference: u8) -> Payload {
    let valid = target == 0 || (target == 1 && reference == 0);
    let (vendor_id, product_id, text): (u16, u16, &[u8]) = if valid {
        (identity.vendor_id, identity.product_id, b"0\0")
    } else {
        (0xFFFF, 0, b"Not Supported\0")
    };

    let mut payload = [0u8; 4 + 14];
    LittleEndian::write_u16(&mut payload[0..2], vendor_id);
    LittleEndian::write_u16(&mut payload[2..4], product_id);
    payload[4..4 + text.len()].copy_from_slice(text);

    to_payload(&payload[..4 + text.len()])
}

/// Country_Codes payload.
pub fn country_codes(codes: &[[u8; 2]]) -> Payload {
    let mut payload = Payload::new();
    let count = codes.len().min((MAX_CHUNK_DATA_SIZE - 2) / 2);

    let _ = payload.push(count as u8);
    let _ = payload.push(0);
    for code in &codes[..count] {
        let _ = payload.extend_from_slice(code);
    }

    payload
}

/// Country_Info payload, without country specific data.
pub fn country_info(code: [u8; 2]) -> Payload {
    to_payload(&[code[0], code[1], 0, 0])
}

/// A request that carries a single byte, for example a battery reference.
pub fn single_byte(value: u8) -> Payload {
    to_payload(&[value])
}

fn to_payload(bytes: &[u8]) -> Payload {
    let mut payload = Payload::new();
    let len = bytes.len().min(MAX_CHUNK_DATA_SIZE);
    let _ = payload.extend_from_slice(&bytes[..len]);
    payload
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Battery status data object.
    pub struct BatteryStatusDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Present capacity in 0.1 Wh units, 0xFFFF if unknown
        pub present_capacity: u16 @ 16..=31,
        /// The battery reference is invalid
        pub invalid_reference: bool @ 8,
        /// A battery is present
        pub present: bool @ 9,
        /// Charging status (0: charging, 1: discharging, 2: idle)
        pub charging_status: u8 @ 10..=11,
    }
}

impl BatteryStatusDataObject {
    /// Battery status for a battery reference.
    ///
    /// The battery is reported as discharging while the port acts as source.
    pub fn new(battery_reference: u8, discharging: bool) -> Self {
        let status = Self(0).with_present_capacity(0xFFFF);

        if battery_reference == 0 {
            status.with_present(true).with_charging_status(discharging.into())
        } else {
            status.with_invalid_reference(true)
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Revision message data object.
    pub struct RevisionDataObject(pub u32): Debug, FromStorage, IntoStorage {
        pub revision_major: u8 @ 28..=31,
        pub revision_minor: u8 @ 24..=27,
        pub version_major: u8 @ 20..=23,
        pub version_minor: u8 @ 16..=19,
    }
}

impl RevisionDataObject {
    /// Revision 3.1, version 1.8.
    pub fn current() -> Self {
        Self(0)
            .with_revision_major(3)
            .with_revision_minor(1)
            .with_version_major(1)
            .with_version_minor(8)
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Source information data object.
    pub struct SourceInfoDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Managed (0) or guaranteed (1) capability port
        pub port_type: bool @ 31,
        /// Port maximum PDP in watts
        pub maximum_pdp: u8 @ 16..=23,
        /// Port present PDP in watts
        pub present_pdp: u8 @ 8..=15,
        /// Port reported PDP in watts
        pub reported_pdp: u8 @ 0..=7,
    }
}

impl SourceInfoDataObject {
    /// A guaranteed capability port with a 2 W PDP.
    pub fn guaranteed_2w() -> Self {
        Self(0)
            .with_port_type(true)
            .with_maximum_pdp(2)
            .with_present_pdp(2)
            .with_reported_pdp(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_status() {
        let objects = pack(&status());

        // Two bytes of extended header and seven bytes of status.
        assert_eq!(objects.len(), 3);
        let header = header(&objects).unwrap();
        assert_eq!(header.data_size(), 7);
        assert!(header.chunked());
        assert_eq!(payload_byte(&objects, 0), Some(25));
        assert_eq!(payload_byte(&objects, 1), Some(0x08));
        assert_eq!(payload_byte(&objects, 4), Some(0x02));
    }

    #[test]
    fn payload_sizes() {
        let identity = Identity {
            vendor_id: 0x1234,
            product_id: 0x5678,
            bcd_device: 0x0100,
        };

        assert_eq!(pack(&source_capabilities_extended(&identity)).len(), 7);
        assert_eq!(pack(&battery_capabilities(&identity, 0)).len(), 3);
        assert_eq!(pack(&manufacturer_info(&identity, 2, 0)).len(), 5);
        assert_eq!(pack(&single_byte(0)).len(), 1);
    }

    #[test]
    fn invalid_battery_reference() {
        let identity = Identity {
            vendor_id: 0x1234,
            product_id: 0x5678,
            bcd_device: 0x0100,
        };
        let objects = pack(&battery_capabilities(&identity, 3));

        assert_eq!(payload_byte(&objects, 0), Some(0xFF));
        assert_eq!(payload_byte(&objects, 1), Some(0xFF));
        assert_eq!(payload_byte(&objects, 8), Some(0x01));

        let status = BatteryStatusDataObject::new(3, false);
        assert!(status.invalid_reference());
        assert_eq!(status.present_capacity(), 0xFFFF);
    }

    #[test]
    fn revision() {
        assert_eq!(RevisionDataObject::current().0, 0x3118_0000);
        assert_eq!(SourceInfoDataObject::guaranteed_2w().0, 0x8002_0202);
    }
}
