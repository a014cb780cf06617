//! NTCIP 1201/1203 MIB objects
//!
//! Object identifiers are built from a named node plus instance index, so
//! error reports can name the exact object (`pixelFailureXLocation.3`).

use bytes::BytesMut;
use std::fmt;
use tms_codec::ber::{self, BerReader};

use crate::error::CommResult;
use crate::property::ControllerProperty;

/// NEMA enterprise subtree
const NEMA: [u32; 7] = [1, 3, 6, 1, 4, 1, 1206];

/// A named MIB node below the NEMA subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MibNode {
    pub name: &'static str,
    /// Arcs below 1.3.6.1.4.1.1206
    pub path: &'static [u32],
}

impl MibNode {
    pub const fn new(name: &'static str, path: &'static [u32]) -> Self {
        Self { name, path }
    }

    /// Scalar instance (`.0`)
    pub fn scalar(&self) -> ObjectId {
        self.index(&[0])
    }

    /// Table instance with the given index arcs
    pub fn index(&self, index: &[u32]) -> ObjectId {
        let mut oid = Vec::with_capacity(NEMA.len() + self.path.len() + index.len());
        oid.extend_from_slice(&NEMA);
        oid.extend_from_slice(self.path);
        oid.extend_from_slice(index);
        let suffix: Vec<String> = index.iter().map(u32::to_string).collect();
        ObjectId {
            name: format!("{}.{}", self.name, suffix.join(".")),
            oid,
        }
    }
}

/// Fully qualified object instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectId {
    name: String,
    oid: Vec<u32>,
}

impl ObjectId {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arcs(&self) -> &[u32] {
        &self.oid
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// dms: 1206.4.2.3
pub const DMS_SIGN_TYPE: MibNode = MibNode::new("dmsSignType", &[4, 2, 3, 1, 2]);
pub const DMS_SIGN_HEIGHT: MibNode = MibNode::new("dmsSignHeight", &[4, 2, 3, 1, 3]);
pub const DMS_SIGN_WIDTH: MibNode = MibNode::new("dmsSignWidth", &[4, 2, 3, 1, 4]);
pub const DMS_HORIZONTAL_BORDER: MibNode = MibNode::new("dmsHorizontalBorder", &[4, 2, 3, 1, 5]);
pub const DMS_VERTICAL_BORDER: MibNode = MibNode::new("dmsVerticalBorder", &[4, 2, 3, 1, 6]);
pub const DMS_BEACON_TYPE: MibNode = MibNode::new("dmsBeaconType", &[4, 2, 3, 1, 8]);
pub const DMS_SIGN_TECHNOLOGY: MibNode = MibNode::new("dmsSignTechnology", &[4, 2, 3, 1, 9]);

pub const VMS_CHARACTER_HEIGHT_PIXELS: MibNode =
    MibNode::new("vmsCharacterHeightPixels", &[4, 2, 3, 2, 1]);
pub const VMS_CHARACTER_WIDTH_PIXELS: MibNode =
    MibNode::new("vmsCharacterWidthPixels", &[4, 2, 3, 2, 2]);
pub const VMS_SIGN_HEIGHT_PIXELS: MibNode = MibNode::new("vmsSignHeightPixels", &[4, 2, 3, 2, 3]);
pub const VMS_SIGN_WIDTH_PIXELS: MibNode = MibNode::new("vmsSignWidthPixels", &[4, 2, 3, 2, 4]);
pub const VMS_HORIZONTAL_PITCH: MibNode = MibNode::new("vmsHorizontalPitch", &[4, 2, 3, 2, 5]);
pub const VMS_VERTICAL_PITCH: MibNode = MibNode::new("vmsVerticalPitch", &[4, 2, 3, 2, 6]);

pub const DMS_MESSAGE_TIME_REMAINING: MibNode =
    MibNode::new("dmsMessageTimeRemaining", &[4, 2, 3, 6, 4]);

// statError: dms.9.7
pub const PIXEL_FAILURE_TABLE_NUM_ROWS: MibNode =
    MibNode::new("pixelFailureTableNumRows", &[4, 2, 3, 9, 7, 2]);
pub const PIXEL_FAILURE_X_LOCATION: MibNode =
    MibNode::new("pixelFailureXLocation", &[4, 2, 3, 9, 7, 3, 1, 3]);
pub const PIXEL_FAILURE_Y_LOCATION: MibNode =
    MibNode::new("pixelFailureYLocation", &[4, 2, 3, 9, 7, 3, 1, 4]);
pub const PIXEL_FAILURE_STATUS: MibNode =
    MibNode::new("pixelFailureStatus", &[4, 2, 3, 9, 7, 3, 1, 5]);
pub const PIXEL_TEST_ACTIVATION: MibNode =
    MibNode::new("pixelTestActivation", &[4, 2, 3, 9, 7, 4]);
pub const LAMP_FAILURE_STUCK_ON: MibNode =
    MibNode::new("lampFailureStuckOn", &[4, 2, 3, 9, 7, 5]);
pub const LAMP_FAILURE_STUCK_OFF: MibNode =
    MibNode::new("lampFailureStuckOff", &[4, 2, 3, 9, 7, 6]);
pub const LAMP_TEST_ACTIVATION: MibNode = MibNode::new("lampTestActivation", &[4, 2, 3, 9, 7, 7]);

// global: 1206.4.2.6
pub const GLOBAL_MAX_MODULES: MibNode = MibNode::new("globalMaxModules", &[4, 2, 6, 1, 2]);
pub const MODULE_MAKE: MibNode = MibNode::new("moduleMake", &[4, 2, 6, 1, 3, 1, 3]);
pub const MODULE_MODEL: MibNode = MibNode::new("moduleModel", &[4, 2, 6, 1, 3, 1, 4]);
pub const MODULE_VERSION: MibNode = MibNode::new("moduleVersion", &[4, 2, 6, 1, 3, 1, 5]);
pub const MODULE_TYPE: MibNode = MibNode::new("moduleType", &[4, 2, 6, 1, 3, 1, 6]);

/// pixelTestActivation / lampTestActivation values
pub mod test_activation {
    pub const NO_TEST: i32 = 2;
    pub const TEST: i32 = 3;
}

/// pixelFailureStatus bit: pixel is stuck on
pub const PIXEL_STUCK_ON: i32 = 0x01;

/// A property addressed by an object identifier
///
/// For SNMP the property bodies are complete BER values (tag, length,
/// content), paired with `oid()` in a varbind.
pub trait MibProperty: ControllerProperty {
    fn oid(&self) -> &ObjectId;
}

/// INTEGER object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MibInteger {
    id: ObjectId,
    value: i32,
}

impl MibInteger {
    pub fn new(id: ObjectId) -> Self {
        Self { id, value: 0 }
    }

    pub fn with_value(id: ObjectId, value: i32) -> Self {
        Self { id, value }
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// Value clamped into `u16`
    pub fn as_u16(&self) -> u16 {
        self.value.clamp(0, i32::from(u16::MAX)) as u16
    }
}

impl fmt::Display for MibInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.value)
    }
}

impl ControllerProperty for MibInteger {
    fn decode_query(&mut self, body: &[u8]) -> CommResult<()> {
        self.value = BerReader::new(body).read_integer()?;
        Ok(())
    }

    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        ber::encode_integer(buf, self.value);
        Ok(())
    }
}

impl MibProperty for MibInteger {
    fn oid(&self) -> &ObjectId {
        &self.id
    }
}

/// OCTET STRING object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MibOctetString {
    id: ObjectId,
    value: Vec<u8>,
}

impl MibOctetString {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            value: Vec::new(),
        }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Value as text, replacing invalid UTF-8
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

impl fmt::Display for MibOctetString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, common::hex::format_hex_pretty(&self.value))
    }
}

impl ControllerProperty for MibOctetString {
    fn decode_query(&mut self, body: &[u8]) -> CommResult<()> {
        self.value = BerReader::new(body).read_octet_string()?.to_vec();
        Ok(())
    }

    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        ber::encode_octet_string(buf, &self.value)?;
        Ok(())
    }
}

impl MibProperty for MibOctetString {
    fn oid(&self) -> &ObjectId {
        &self.id
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_object_names() {
        let id = PIXEL_FAILURE_X_LOCATION.index(&[3]);
        assert_eq!(id.name(), "pixelFailureXLocation.3");
        assert_eq!(
            id.arcs(),
            &[1, 3, 6, 1, 4, 1, 1206, 4, 2, 3, 9, 7, 3, 1, 3, 3]
        );
        assert_eq!(DMS_SIGN_TYPE.scalar().to_string(), "dmsSignType.0");
    }

    #[test]
    fn test_integer_value() {
        let mut prop = MibInteger::new(VMS_SIGN_WIDTH_PIXELS.scalar());
        prop.decode_query(&[0x02, 0x01, 0x60]).unwrap();
        assert_eq!(prop.value(), 96);

        let store = MibInteger::with_value(DMS_MESSAGE_TIME_REMAINING.scalar(), 300);
        let mut buf = BytesMut::new();
        store.encode_store(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x02, 0x02, 0x01, 0x2C]);
    }

    #[test]
    fn test_octet_string_rejects_integer() {
        let mut prop = MibOctetString::new(MODULE_VERSION.index(&[1]));
        assert!(prop.decode_query(&[0x02, 0x01, 0x05]).is_err());
        prop.decode_query(&[0x04, 0x03, b'1', b'.', b'2']).unwrap();
        assert_eq!(prop.as_text(), "1.2");
    }
}
