//! Wire codec primitives for roadway field device protocols
//!
//! Pure functions over byte buffers, shared by every protocol driver:
//! - `ber`: the BER/ASN.1 subset used by SNMP (NTCIP)
//! - `bcd`: binary coded decimal fields used by 170 controllers
//! - `binary`: bounds-checked big-endian reads
//! - `checksum`: single byte XOR and SUM checksums
//! - `header`: drop address / category header byte packing

pub mod bcd;
pub mod ber;
pub mod binary;
pub mod checksum;
pub mod error;
pub mod header;

pub use binary::ByteReader;
pub use error::{CodecError, Result};
pub use header::DropAddressing;
