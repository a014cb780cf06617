//! Pelco video switcher (ASCII keyboard commands)

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::sync::Arc;

use super::message::{PelcoMessage, PelcoProperty};
use crate::controller::ControllerHandle;
use crate::error::CommResult;
use crate::message::{CommMessage, LinkIo};
use crate::operation::{DeviceOp, OpOutcome, OpPhases, Operation};
use crate::priority::PriorityLevel;
use crate::property::ControllerProperty;
use crate::sink::{DeviceEvent, DeviceSink};

/// `{monitor}Ma`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectMonitor {
    monitor: u16,
}

impl SelectMonitor {
    pub fn new(monitor: u16) -> Self {
        Self { monitor }
    }
}

impl fmt::Display for SelectMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select monitor {}", self.monitor)
    }
}

impl ControllerProperty for SelectMonitor {
    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        buf.put_slice(format!("{}Ma", self.monitor).as_bytes());
        Ok(())
    }
}

impl PelcoProperty for SelectMonitor {}

/// `{camera}#a`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectCamera {
    camera: u32,
}

impl SelectCamera {
    pub fn new(camera: u32) -> Self {
        Self { camera }
    }
}

impl fmt::Display for SelectCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select camera {}", self.camera)
    }
}

impl ControllerProperty for SelectCamera {
    fn encode_store(&self, buf: &mut BytesMut) -> CommResult<()> {
        buf.put_slice(format!("{}#a", self.camera).as_bytes());
        Ok(())
    }
}

impl PelcoProperty for SelectCamera {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectPhase {
    Select,
}

/// Switch a camera onto a monitor
#[derive(Debug)]
pub struct OpSelectMonitorCamera {
    monitor: u16,
    camera: u32,
}

impl OpSelectMonitorCamera {
    pub fn new(monitor: u16, camera: u32) -> Self {
        Self { monitor, camera }
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Command)
    }
}

#[async_trait]
impl OpPhases for OpSelectMonitorCamera {
    type Phase = SelectPhase;

    fn name(&self) -> &str {
        "Select monitor camera"
    }

    fn phase_one(&self) -> SelectPhase {
        SelectPhase::Select
    }

    async fn poll(
        &mut self,
        _phase: &SelectPhase,
        _controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<SelectPhase>> {
        let mut monitor = SelectMonitor::new(self.monitor);
        let mut camera = SelectCamera::new(self.camera);
        let mut mess = PelcoMessage::new(io);
        mess.add(&mut monitor);
        mess.add(&mut camera);
        mess.send_set_request().await?;
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("monitor:{}:{}:{}", controller.name(), self.monitor, self.camera))
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
                DeviceEvent::MonitorCamera {
                    monitor: self.monitor,
                    camera: self.camera,
                },
            );
        }
    }
}
