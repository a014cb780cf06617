//! Pelco D camera receivers
//!
//! Frame: `FF addr cmd1 cmd2 data1 data2 sum`, where sum is the modulo 256
//! sum of bytes 1 through 5.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::sync::Arc;
use tms_codec::checksum::sum8;

use super::message::{PelcoMessage, PelcoProperty};
use crate::controller::ControllerHandle;
use crate::error::{CommError, CommResult};
use crate::message::{CommMessage, LinkIo};
use crate::operation::{DeviceOp, OpOutcome, OpPhases, Operation};
use crate::priority::PriorityLevel;
use crate::property::ControllerProperty;
use crate::sink::{DeviceEvent, DeviceSink};

const SYNC: u8 = 0xFF;

/// cmd2 bits
const PAN_RIGHT: u8 = 0x02;
const PAN_LEFT: u8 = 0x04;
const TILT_UP: u8 = 0x08;
const TILT_DOWN: u8 = 0x10;
const ZOOM_TELE: u8 = 0x20;
const ZOOM_WIDE: u8 = 0x40;

/// Fastest pan/tilt speed short of turbo
pub const MAX_SPEED: u8 = 0x3F;

/// Pan/tilt/zoom motion; each axis signed, zero stops it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtzCommand {
    address: u8,
    pan: i8,
    tilt: i8,
    zoom: i8,
}

impl PtzCommand {
    pub fn new(address: u8, pan: i8, tilt: i8, zoom: i8) -> Self {
        Self {
            address,
            pan,
            tilt,
            zoom,
        }
    }

    fn command(&self) -> u8 {
        let axis = |value: i8, positive: u8, negative: u8| match value {
            v if v > 0 => positive,
            v if v < 0 => negative,
            _ => 0,
        };
        axis(self.pan, PAN_RIGHT, PAN_LEFT)
            | axis(self.tilt, TILT_UP, TILT_DOWN)
            | axis(self.zoom, ZOOM_TELE, ZOOM_WIDE)
    }

    fn speed(value: i8) -> u8 {
        value.unsigned_abs().min(MAX_SPEED)
    }
}

impl fmt::Display for PtzCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ptz pan {} tilt {} zoom {}", self.pan, self.tilt, self.zoom)
    }
}

impl ControllerProperty for PtzCommand {
    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        let body = [
            self.address,
            0x00,
            self.command(),
            Self::speed(self.pan),
            Self::speed(self.tilt),
        ];
        buf.put_u8(SYNC);
        buf.put_slice(&body);
        buf.put_u8(sum8(&body));
        Ok(())
    }
}

impl PelcoProperty for PtzCommand {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzPhase {
    Command,
}

/// Send one PTZ motion command
#[derive(Debug)]
pub struct OpPtzCommand {
    pan: i8,
    tilt: i8,
    zoom: i8,
}

impl OpPtzCommand {
    pub fn new(pan: i8, tilt: i8, zoom: i8) -> Self {
        Self { pan, tilt, zoom }
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Command)
    }
}

#[async_trait]
impl OpPhases for OpPtzCommand {
    type Phase = PtzPhase;

    fn name(&self) -> &str {
        "PTZ command"
    }

    fn phase_one(&self) -> PtzPhase {
        PtzPhase::Command
    }

    async fn poll(
        &mut self,
        _phase: &PtzPhase,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<PtzPhase>> {
        let address = u8::try_from(controller.drop_address())
            .map_err(|_| {
                CommError::internal(format!("invalid drop {}", controller.drop_address()))
            })?;
        let mut ptz = PtzCommand::new(address, self.pan, self.tilt, self.zoom);
        let mut mess = PelcoMessage::new(io);
        mess.add(&mut ptz);
        mess.send_set_request().await?;
        Ok(None)
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if outcome.success {
            sink.publish(
                controller.name(),
                DeviceEvent::CameraPtz {
                    pan: self.pan,
                    tilt: self.tilt,
                    zoom: self.zoom,
                },
            );
        }
    }
}
