//! Device state updates produced by completed operations

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::protocols::mndot::SampleData;
use crate::protocols::ntcip::{ModuleInfo, PixelStatus, SignConfig};

/// A state change decoded from a controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    SignConfiguration(SignConfig),
    ModuleVersions { modules: Vec<ModuleInfo> },
    PixelStatus(PixelStatus),
    LampStatus { stuck_on: Vec<u8>, stuck_off: Vec<u8> },
    MessageTimeRemaining { minutes: u16 },
    BeaconState { flashing: bool },
    RedTime { meter: u8, tenths: u16 },
    SampleData(SampleData),
    PromVersion { major: u8, minor: u8 },
    ClockSynchronized { time: String },
    ControllerRestarted,
    MonitorCamera { monitor: u16, camera: u32 },
    CameraPtz { pan: i8, tilt: i8, zoom: i8 },
}

/// Receiver of device state updates
pub trait DeviceSink: Send + Sync {
    fn publish(&self, controller: &str, event: DeviceEvent);
}

/// Sink that writes each event to the log as JSON
#[derive(Debug, Default)]
pub struct LoggingSink;

impl DeviceSink for LoggingSink {
    fn publish(&self, controller: &str, event: DeviceEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(controller, "Device update: {json}"),
            Err(e) => warn!(controller, "Unserializable device update {event:?}: {e}"),
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, DeviceEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, DeviceEvent)> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, controller: &str) -> Vec<DeviceEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(name, _)| name == controller)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl DeviceSink for RecordingSink {
    fn publish(&self, controller: &str, event: DeviceEvent) {
        self.events.lock().push((controller.to_string(), event));
    }
}
