//! MnDOT 170 framing
//!
//! Request:  `[drop|category, n, payload(n), xor]`
//! Response: `[drop|status, n, data(n), xor]`
//!
//! The xor covers every byte before it. One property per exchange.

use async_trait::async_trait;
use bytes::BytesMut;
use tms_codec::checksum::xor8;
use tms_codec::DropAddressing;
use tracing::debug;

use crate::controller::ControllerHandle;
use crate::error::{CommError, CommResult, DeviceFault};
use crate::message::{CommMessage, LinkIo};
use crate::property::ControllerProperty;
use crate::protocols::CommProtocol;

/// Request category (low bits of the first request byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Category {
    ShutUp = 0,
    Level1Restart = 1,
    SynchronizeClock = 2,
    QueryRecordCount = 3,
    SendNextRecord = 4,
    DeleteOldestRecord = 5,
    WriteMemory = 6,
    ReadMemory = 7,
}

/// Response status codes
pub mod status {
    pub const OK: u8 = 0;
    pub const BAD_MESSAGE: u8 = 1;
    pub const BAD_POLL_CHECKSUM: u8 = 2;
    pub const DOWNLOAD_REQUEST: u8 = 3;
    pub const WRITE_PROTECT: u8 = 4;
    pub const MESSAGE_SIZE: u8 = 5;
    pub const NO_DATA: u8 = 6;
    pub const NO_RAM: u8 = 7;
    /// 4-bit addressing only
    pub const DOWNLOAD_REQUEST_4: u8 = 8;
}

/// Translate a response status into an error
pub fn check_status(code: u8) -> CommResult<()> {
    match code {
        status::OK => Ok(()),
        status::BAD_MESSAGE => Err(CommError::parsing("BAD MESSAGE")),
        status::BAD_POLL_CHECKSUM => Err(CommError::Checksum {
            scanned: "CONTROLLER I/O CHECKSUM ERROR".to_string(),
        }),
        status::DOWNLOAD_REQUEST | status::DOWNLOAD_REQUEST_4 => Err(CommError::DownloadRequest),
        status::WRITE_PROTECT => Err(CommError::Device(DeviceFault::WriteProtect)),
        status::MESSAGE_SIZE => Err(CommError::parsing("MESSAGE SIZE")),
        status::NO_DATA => Err(CommError::Device(DeviceFault::NoData)),
        status::NO_RAM => Err(CommError::Device(DeviceFault::NoRam)),
        other => Err(CommError::parsing(format!("BAD STATUS: {other}"))),
    }
}

/// Header layout for a 170 protocol revision
pub fn addressing(protocol: CommProtocol) -> CommResult<DropAddressing> {
    match protocol {
        CommProtocol::Mndot4 => Ok(DropAddressing::FourBit),
        CommProtocol::Mndot5 => Ok(DropAddressing::FiveBit),
        other => Err(CommError::internal(format!("{other} is not a 170 protocol"))),
    }
}

/// Build a request frame
pub fn encode_frame(
    addressing: DropAddressing,
    drop: u8,
    category: Category,
    payload: &[u8],
) -> CommResult<Vec<u8>> {
    let len = u8::try_from(payload.len())
        .map_err(|_| CommError::internal(format!("payload of {} bytes", payload.len())))?;
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(addressing.pack(drop, category as u8)?);
    frame.push(len);
    frame.extend_from_slice(payload);
    frame.push(xor8(&frame));
    Ok(frame)
}

/// Validate a complete response and return its data bytes
///
/// Checked in order: length field, checksum, drop echo, status.
pub fn parse_response(addressing: DropAddressing, drop: u8, response: &[u8]) -> CommResult<&[u8]> {
    if response.len() < 3 || response.len() != usize::from(response[1]) + 3 {
        return Err(CommError::parsing("INVALID LENGTH"));
    }
    let (body, check) = response.split_at(response.len() - 1);
    if xor8(body) != check[0] {
        return Err(CommError::checksum(response));
    }
    let (received, code) = addressing.unpack(response[0]);
    if received != drop {
        return Err(CommError::DropMismatch {
            expected: u32::from(drop),
            received: u32::from(received),
        });
    }
    check_status(code)?;
    Ok(&body[2..])
}

/// A property carried by a 170 frame
pub trait MndotProperty: ControllerProperty {
    fn query_category(&self) -> Category {
        Category::ReadMemory
    }

    fn store_category(&self) -> Category {
        Category::WriteMemory
    }
}

/// One exchange with a 170 controller
pub struct MndotMessage<'a> {
    io: &'a mut LinkIo,
    addressing: DropAddressing,
    drop: u8,
    prop: Option<&'a mut dyn MndotProperty>,
}

impl<'a> MndotMessage<'a> {
    pub fn new(io: &'a mut LinkIo, controller: &ControllerHandle) -> CommResult<Self> {
        let addressing = addressing(controller.protocol())?;
        let drop = u8::try_from(controller.drop_address())
            .ok()
            .filter(|&d| addressing.is_valid_drop(d))
            .ok_or_else(|| {
                CommError::internal(format!("invalid drop {}", controller.drop_address()))
            })?;
        Ok(Self {
            io,
            addressing,
            drop,
            prop: None,
        })
    }

    async fn exchange(&mut self, store: bool) -> CommResult<()> {
        let prop = self
            .prop
            .as_deref_mut()
            .ok_or_else(|| CommError::internal("no property"))?;
        let mut payload = BytesMut::new();
        let category = if store {
            prop.encode_store(&mut payload)?;
            prop.store_category()
        } else {
            prop.encode_query(&mut payload)?;
            prop.query_category()
        };
        let frame = encode_frame(self.addressing, self.drop, category, &payload)?;

        let link = self.io.name().to_string();
        let transport = self.io.transport();
        let stale = transport.drain().await?;
        if stale > 0 {
            debug!("[170] {} discarded {} stale bytes", link, stale);
        }
        debug!("[170] {} send: {}", link, common::hex::format_hex_pretty(&frame));
        transport.send(&frame).await?;

        let mut response = vec![0u8; 2];
        transport.read_exact(&mut response).await?;
        let rest = usize::from(response[1]) + 1;
        response.resize(2 + rest, 0);
        transport.read_exact(&mut response[2..]).await?;
        debug!("[170] {} recv: {}", link, common::hex::format_hex_pretty(&response));

        // anything left over means the length field was wrong
        if transport.drain().await? > 0 {
            return Err(CommError::parsing("INVALID LENGTH"));
        }

        let data = parse_response(self.addressing, self.drop, &response)?;
        if store {
            prop.decode_store(data)
        } else {
            prop.decode_query(data)
        }
    }
}

#[async_trait]
impl<'a> CommMessage<'a> for MndotMessage<'a> {
    type Property = dyn MndotProperty + 'a;

    /// Replaces any property added before
    fn add(&mut self, prop: &'a mut Self::Property) {
        self.prop = Some(prop);
    }

    async fn send_get_request(&mut self) -> CommResult<()> {
        self.exchange(false).await
    }

    async fn send_set_request(&mut self) -> CommResult<()> {
        self.exchange(true).await
    }
}
