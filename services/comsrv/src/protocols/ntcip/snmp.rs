//! SNMPv1 message encoding
//!
//! Message = SEQUENCE { version INTEGER (0), community OCTET STRING, PDU }
//! PDU = [tag] { request-id, error-status, error-index, SEQUENCE OF varbind }

use bytes::BytesMut;
use tms_codec::ber::{self, BerReader, Tag};

use crate::error::{CommError, CommResult, DeviceFault};
use crate::transport::Transport;

/// Version field of an SNMPv1 message
pub const SNMP_VERSION_1: i32 = 0;

/// Community used for read requests
pub const PUBLIC: &str = "public";

/// Largest message accepted from a device
pub const MAX_MESSAGE_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    GetResponse,
    SetRequest,
}

impl PduType {
    /// Context-specific constructed tag (0xA0..=0xA3)
    pub fn tag(self) -> Tag {
        let number = match self {
            PduType::GetRequest => 0,
            PduType::GetNextRequest => 1,
            PduType::GetResponse => 2,
            PduType::SetRequest => 3,
        };
        Tag::context(number, true)
    }
}

/// error-status field of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    Unknown(i32),
}

impl ErrorStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorStatus::NoError,
            1 => ErrorStatus::TooBig,
            2 => ErrorStatus::NoSuchName,
            3 => ErrorStatus::BadValue,
            4 => ErrorStatus::ReadOnly,
            5 => ErrorStatus::GenErr,
            other => ErrorStatus::Unknown(other),
        }
    }

    /// Translate into an error naming the offending object
    pub fn check(self, object: &str) -> CommResult<()> {
        let fault = match self {
            ErrorStatus::NoError => return Ok(()),
            ErrorStatus::TooBig => DeviceFault::TooBig,
            ErrorStatus::NoSuchName => DeviceFault::NoSuchName(object.to_string()),
            ErrorStatus::BadValue => DeviceFault::BadValue(object.to_string()),
            ErrorStatus::ReadOnly => DeviceFault::ReadOnly(object.to_string()),
            ErrorStatus::GenErr => DeviceFault::GenError(object.to_string()),
            ErrorStatus::Unknown(code) => {
                return Err(CommError::parsing(format!("bad error status {code}")))
            },
        };
        Err(CommError::Device(fault))
    }
}

/// One decoded variable binding; `value` is the complete BER value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind<'a> {
    pub oid: Vec<u32>,
    pub value: &'a [u8],
}

/// Decoded GetResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<'a> {
    pub community: &'a [u8],
    pub request_id: i32,
    pub error_status: ErrorStatus,
    /// 1-based index of the varbind in error, 0 when not applicable
    pub error_index: i32,
    pub varbinds: Vec<VarBind<'a>>,
}

/// Encode a complete request message into `buf`
///
/// Each varbind pairs an OID with an already encoded value (NULL for gets).
pub fn encode_request(
    buf: &mut BytesMut,
    community: &str,
    pdu: PduType,
    request_id: i32,
    varbinds: &[(&[u32], &[u8])],
) -> CommResult<()> {
    encode_message(buf, community, pdu, request_id, (0, 0), varbinds)
}

/// Encode a GetResponse, as sent by a device
pub fn encode_response(
    buf: &mut BytesMut,
    community: &str,
    request_id: i32,
    error: (i32, i32),
    varbinds: &[(&[u32], &[u8])],
) -> CommResult<()> {
    encode_message(buf, community, PduType::GetResponse, request_id, error, varbinds)
}

fn encode_message(
    buf: &mut BytesMut,
    community: &str,
    pdu: PduType,
    request_id: i32,
    (error_status, error_index): (i32, i32),
    varbinds: &[(&[u32], &[u8])],
) -> CommResult<()> {
    let mut list = BytesMut::new();
    for (oid, value) in varbinds {
        let mut varbind = BytesMut::new();
        ber::encode_oid(&mut varbind, oid)?;
        varbind.extend_from_slice(value);
        ber::encode_sequence(&mut list, &varbind)?;
    }

    let mut body = BytesMut::new();
    ber::encode_integer(&mut body, request_id);
    ber::encode_integer(&mut body, error_status);
    ber::encode_integer(&mut body, error_index);
    ber::encode_sequence(&mut body, &list)?;

    let mut message = BytesMut::new();
    ber::encode_integer(&mut message, SNMP_VERSION_1);
    ber::encode_octet_string(&mut message, community.as_bytes())?;
    ber::encode_tlv(&mut message, pdu.tag(), &body)?;

    ber::encode_sequence(buf, &message)?;
    Ok(())
}

/// Decode a GetResponse message
pub fn decode_response(frame: &[u8]) -> CommResult<Response<'_>> {
    let mut outer = BerReader::new(frame);
    let mut message = outer.read_sequence()?;
    if !outer.is_empty() {
        return Err(CommError::parsing(format!(
            "{} bytes after message",
            outer.remaining()
        )));
    }

    let version = message.read_integer()?;
    if version != SNMP_VERSION_1 {
        return Err(CommError::parsing(format!("SNMP version {version}")));
    }
    let community = message.read_octet_string()?;
    let mut pdu = message.read_constructed(PduType::GetResponse.tag())?;
    let request_id = pdu.read_integer()?;
    let error_status = ErrorStatus::from_code(pdu.read_integer()?);
    let error_index = pdu.read_integer()?;

    let mut list = pdu.read_sequence()?;
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let content = list.read_expected(Tag::SEQUENCE)?;
        let mut varbind = BerReader::new(content);
        let oid = varbind.read_oid()?;
        let value = &content[varbind.position()..];
        // the value must be exactly one element
        let mut check = BerReader::new(value);
        check.read_tlv()?;
        if !check.is_empty() {
            return Err(CommError::parsing("extra data in varbind"));
        }
        varbinds.push(VarBind { oid, value });
    }

    Ok(Response {
        community,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

/// Read one BER encoded message from a stream transport
///
/// Reads the outer SEQUENCE header first, then exactly the announced content.
pub async fn read_message(transport: &mut dyn Transport) -> CommResult<Vec<u8>> {
    let mut head = [0u8; 2];
    transport.read_exact(&mut head).await?;
    if head[0] != 0x30 {
        return Err(CommError::parsing(format!(
            "expected SEQUENCE, got {:#04X}",
            head[0]
        )));
    }

    let mut frame = head.to_vec();
    let len = match head[1] {
        0x80 => return Err(tms_codec::CodecError::IndefiniteLength.into()),
        short if short < 0x80 => usize::from(short),
        long => {
            let count = usize::from(long & 0x7F);
            if count > 2 {
                return Err(tms_codec::CodecError::UnsupportedLength(count).into());
            }
            let mut octets = [0u8; 2];
            transport.read_exact(&mut octets[..count]).await?;
            frame.extend_from_slice(&octets[..count]);
            octets[..count]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
        },
    };
    if len > MAX_MESSAGE_SIZE {
        return Err(CommError::parsing(format!("message length {len}")));
    }

    let start = frame.len();
    frame.resize(start + len, 0);
    transport.read_exact(&mut frame[start..]).await?;
    Ok(frame)
}
