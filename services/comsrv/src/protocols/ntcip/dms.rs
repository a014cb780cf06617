//! Dynamic message sign operations (NTCIP 1203)

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::message::SnmpMessage;
use super::mib::{self, test_activation, MibInteger, MibOctetString};
use crate::config::SignPixels;
use crate::controller::ControllerHandle;
use crate::error::CommResult;
use crate::message::{CommMessage, LinkIo};
use crate::operation::{DeviceOp, OpOutcome, OpPhases, Operation};
use crate::priority::PriorityLevel;
use crate::sink::{DeviceEvent, DeviceSink};

/// Time allowed for a pixel or lamp test to complete
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// dmsSignType (low 7 bits)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DmsType {
    #[default]
    Other,
    /// Blank-out sign
    Bos,
    /// Changeable message sign
    Cms,
    VmsChar,
    VmsLine,
    VmsFull,
}

impl DmsType {
    pub fn from_code(code: i32) -> Self {
        match code & 0x7F {
            2 => DmsType::Bos,
            3 => DmsType::Cms,
            4 => DmsType::VmsChar,
            5 => DmsType::VmsLine,
            6 => DmsType::VmsFull,
            _ => DmsType::Other,
        }
    }
}

/// Physical and pixel geometry of a sign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignConfig {
    pub sign_type: DmsType,
    pub portable: bool,
    pub height_mm: u16,
    pub width_mm: u16,
    pub horizontal_border_mm: u16,
    pub vertical_border_mm: u16,
    pub beacon_type: i32,
    pub technology: i32,
    /// 0 means variable
    pub char_height_pixels: u16,
    pub char_width_pixels: u16,
    pub height_pixels: u16,
    pub width_pixels: u16,
    pub horizontal_pitch_mm: u16,
    pub vertical_pitch_mm: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    #[default]
    Other,
    Hardware,
    Software,
}

impl ModuleType {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => ModuleType::Hardware,
            3 => ModuleType::Software,
            _ => ModuleType::Other,
        }
    }
}

/// One row of the global module table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub number: u32,
    pub make: String,
    pub model: String,
    pub version: String,
    pub module_type: ModuleType,
}

/// Stuck pixel bitmaps, one bit per pixel, row-major, MSB first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PixelStatus {
    pub width: u16,
    pub height: u16,
    /// Rows read from the pixel failure table
    pub failures: u32,
    pub stuck_on: Vec<u8>,
    pub stuck_off: Vec<u8>,
}

impl PixelStatus {
    fn new(pixels: SignPixels) -> Self {
        let bytes = (usize::from(pixels.width) * usize::from(pixels.height)).div_ceil(8);
        Self {
            width: pixels.width,
            height: pixels.height,
            failures: 0,
            stuck_on: vec![0; bytes],
            stuck_off: vec![0; bytes],
        }
    }

    fn bit(&self, x: u32, y: u32) -> Option<(usize, u8)> {
        if x >= u32::from(self.width) || y >= u32::from(self.height) {
            return None;
        }
        let index = (y * u32::from(self.width) + x) as usize;
        Some((index / 8, 0x80 >> (index % 8)))
    }

    /// Record a failed pixel at a 1-based table location
    fn record(&mut self, x: i32, y: i32, stuck_on: bool) -> bool {
        let (Ok(x), Ok(y)) = (
            u32::try_from(x.saturating_sub(1)),
            u32::try_from(y.saturating_sub(1)),
        ) else {
            return false;
        };
        let Some((byte, mask)) = self.bit(x, y) else {
            return false;
        };
        self.failures += 1;
        if stuck_on {
            self.stuck_on[byte] |= mask;
        } else {
            self.stuck_off[byte] |= mask;
        }
        true
    }

    pub fn is_stuck_on(&self, x: u32, y: u32) -> bool {
        self.bit(x, y)
            .is_some_and(|(byte, mask)| self.stuck_on[byte] & mask != 0)
    }

    pub fn is_stuck_off(&self, x: u32, y: u32) -> bool {
        self.bit(x, y)
            .is_some_and(|(byte, mask)| self.stuck_off[byte] & mask != 0)
    }
}

// ============================================================================
// Query configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigPhase {
    SignConfig,
    VmsConfig,
    ModuleCount,
    /// 1-based module table row
    ModuleRow(u32),
}

/// Read sign geometry and the module version table
#[derive(Debug, Default)]
pub struct DmsQueryConfiguration {
    config: SignConfig,
    module_count: u32,
    modules: Vec<ModuleInfo>,
}

impl DmsQueryConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Download)
    }

    pub fn config(&self) -> &SignConfig {
        &self.config
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    async fn query_sign_config(
        &mut self,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<()> {
        let mut sign_type = MibInteger::new(mib::DMS_SIGN_TYPE.scalar());
        let mut height = MibInteger::new(mib::DMS_SIGN_HEIGHT.scalar());
        let mut width = MibInteger::new(mib::DMS_SIGN_WIDTH.scalar());
        let mut h_border = MibInteger::new(mib::DMS_HORIZONTAL_BORDER.scalar());
        let mut v_border = MibInteger::new(mib::DMS_VERTICAL_BORDER.scalar());
        let mut beacon = MibInteger::new(mib::DMS_BEACON_TYPE.scalar());
        let mut technology = MibInteger::new(mib::DMS_SIGN_TECHNOLOGY.scalar());
        let mut mess = SnmpMessage::new(io, controller);
        mess.add(&mut sign_type);
        mess.add(&mut height);
        mess.add(&mut width);
        mess.add(&mut h_border);
        mess.add(&mut v_border);
        mess.add(&mut beacon);
        mess.add(&mut technology);
        mess.send_get_request().await?;

        self.config.sign_type = DmsType::from_code(sign_type.value());
        self.config.portable = sign_type.value() & 0x80 != 0;
        self.config.height_mm = height.as_u16();
        self.config.width_mm = width.as_u16();
        self.config.horizontal_border_mm = h_border.as_u16();
        self.config.vertical_border_mm = v_border.as_u16();
        self.config.beacon_type = beacon.value();
        self.config.technology = technology.value();
        Ok(())
    }

    async fn query_vms_config(
        &mut self,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<()> {
        let mut char_height = MibInteger::new(mib::VMS_CHARACTER_HEIGHT_PIXELS.scalar());
        let mut char_width = MibInteger::new(mib::VMS_CHARACTER_WIDTH_PIXELS.scalar());
        let mut height = MibInteger::new(mib::VMS_SIGN_HEIGHT_PIXELS.scalar());
        let mut width = MibInteger::new(mib::VMS_SIGN_WIDTH_PIXELS.scalar());
        let mut h_pitch = MibInteger::new(mib::VMS_HORIZONTAL_PITCH.scalar());
        let mut v_pitch = MibInteger::new(mib::VMS_VERTICAL_PITCH.scalar());
        let mut mess = SnmpMessage::new(io, controller);
        mess.add(&mut char_height);
        mess.add(&mut char_width);
        mess.add(&mut height);
        mess.add(&mut width);
        mess.add(&mut h_pitch);
        mess.add(&mut v_pitch);
        mess.send_get_request().await?;

        self.config.char_height_pixels = char_height.as_u16();
        self.config.char_width_pixels = char_width.as_u16();
        self.config.height_pixels = height.as_u16();
        self.config.width_pixels = width.as_u16();
        self.config.horizontal_pitch_mm = h_pitch.as_u16();
        self.config.vertical_pitch_mm = v_pitch.as_u16();
        Ok(())
    }

    async fn query_module_count(
        &mut self,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<()> {
        let mut count = MibInteger::new(mib::GLOBAL_MAX_MODULES.scalar());
        let mut mess = SnmpMessage::new(io, controller);
        mess.add(&mut count);
        mess.send_get_request().await?;
        self.module_count = u32::try_from(count.value()).unwrap_or(0);
        Ok(())
    }

    async fn query_module(
        &mut self,
        row: u32,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<()> {
        let mut make = MibOctetString::new(mib::MODULE_MAKE.index(&[row]));
        let mut model = MibOctetString::new(mib::MODULE_MODEL.index(&[row]));
        let mut version = MibOctetString::new(mib::MODULE_VERSION.index(&[row]));
        let mut module_type = MibInteger::new(mib::MODULE_TYPE.index(&[row]));
        let mut mess = SnmpMessage::new(io, controller);
        mess.add(&mut make);
        mess.add(&mut model);
        mess.add(&mut version);
        mess.add(&mut module_type);
        mess.send_get_request().await?;

        debug!(controller = %controller.name(), "{version}");
        // a retried row replaces the earlier attempt
        self.modules.retain(|m| m.number != row);
        self.modules.push(ModuleInfo {
            number: row,
            make: make.as_text(),
            model: model.as_text(),
            version: version.as_text(),
            module_type: ModuleType::from_code(module_type.value()),
        });
        Ok(())
    }
}

#[async_trait]
impl OpPhases for DmsQueryConfiguration {
    type Phase = ConfigPhase;

    fn name(&self) -> &str {
        "Query DMS configuration"
    }

    fn phase_one(&self) -> ConfigPhase {
        ConfigPhase::SignConfig
    }

    async fn poll(
        &mut self,
        phase: &ConfigPhase,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<ConfigPhase>> {
        match phase {
            ConfigPhase::SignConfig => {
                self.query_sign_config(controller, io).await?;
                Ok(Some(ConfigPhase::VmsConfig))
            },
            ConfigPhase::VmsConfig => {
                self.query_vms_config(controller, io).await?;
                Ok(Some(ConfigPhase::ModuleCount))
            },
            ConfigPhase::ModuleCount => {
                self.query_module_count(controller, io).await?;
                Ok((self.module_count > 0).then_some(ConfigPhase::ModuleRow(1)))
            },
            ConfigPhase::ModuleRow(row) => {
                self.query_module(*row, controller, io).await?;
                Ok((*row < self.module_count).then_some(ConfigPhase::ModuleRow(row + 1)))
            },
        }
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("dms_config:{}", controller.name()))
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if outcome.success {
            sink.publish(controller.name(), DeviceEvent::SignConfiguration(self.config.clone()));
            sink.publish(
                controller.name(),
                DeviceEvent::ModuleVersions {
                    modules: std::mem::take(&mut self.modules),
                },
            );
        }
    }
}

// ============================================================================
// Query pixel failures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelPhase {
    QueryTestStatus,
    ActivateTest,
    /// Poll until the test ends or `expire` passes
    CheckTestCompletion { expire: Instant },
    QueryRows,
    /// 1-based pixel failure table row
    QueryRow(u32),
}

/// Read the pixel failure table into stuck on/off bitmaps
///
/// With `perform_test`, a pixel test is activated first (unless one is
/// already running) and polled until done or the test timeout expires.
#[derive(Debug)]
pub struct DmsQueryPixelFailures {
    perform_test: bool,
    test_timeout: Duration,
    rows: u32,
    status: PixelStatus,
    /// Set when the table ended early
    note: Option<String>,
}

impl DmsQueryPixelFailures {
    pub fn new(pixels: SignPixels, perform_test: bool) -> Self {
        Self {
            perform_test,
            test_timeout: DEFAULT_TEST_TIMEOUT,
            rows: 0,
            status: PixelStatus::new(pixels),
            note: None,
        }
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Data)
    }

    pub fn status(&self) -> &PixelStatus {
        &self.status
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    async fn query_row(
        &mut self,
        row: u32,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<PixelPhase>> {
        let mut x = MibInteger::new(mib::PIXEL_FAILURE_X_LOCATION.index(&[row]));
        let mut y = MibInteger::new(mib::PIXEL_FAILURE_Y_LOCATION.index(&[row]));
        let mut status = MibInteger::new(mib::PIXEL_FAILURE_STATUS.index(&[row]));
        let mut mess = SnmpMessage::new(io, controller);
        mess.add(&mut x);
        mess.add(&mut y);
        mess.add(&mut status);
        match mess.send_get_request().await {
            Ok(()) => {},
            Err(e) if e.is_no_such_name() => {
                // fewer rows than advertised
                info!(controller = %controller.name(), "Pixel failure table ended: {e}");
                self.note = Some(e.to_string());
                return Ok(None);
            },
            Err(e) => return Err(e),
        }

        let stuck_on = status.value() & mib::PIXEL_STUCK_ON != 0;
        if !self.status.record(x.value(), y.value(), stuck_on) {
            warn!(
                controller = %controller.name(),
                "Pixel ({}, {}) outside {}x{} sign",
                x.value(),
                y.value(),
                self.status.width,
                self.status.height
            );
        }
        Ok((row < self.rows).then_some(PixelPhase::QueryRow(row + 1)))
    }
}

#[async_trait]
impl OpPhases for DmsQueryPixelFailures {
    type Phase = PixelPhase;

    fn name(&self) -> &str {
        "Query pixel failures"
    }

    fn phase_one(&self) -> PixelPhase {
        if self.perform_test {
            PixelPhase::QueryTestStatus
        } else {
            PixelPhase::QueryRows
        }
    }

    async fn poll(
        &mut self,
        phase: &PixelPhase,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<PixelPhase>> {
        match phase {
            PixelPhase::QueryTestStatus => {
                let mut test = MibInteger::new(mib::PIXEL_TEST_ACTIVATION.scalar());
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut test);
                mess.send_get_request().await?;
                if test.value() == test_activation::NO_TEST {
                    Ok(Some(PixelPhase::ActivateTest))
                } else {
                    info!(controller = %controller.name(), "Pixel test already active: {test}");
                    Ok(Some(PixelPhase::QueryRows))
                }
            },
            PixelPhase::ActivateTest => {
                let mut test = MibInteger::with_value(
                    mib::PIXEL_TEST_ACTIVATION.scalar(),
                    test_activation::TEST,
                );
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut test);
                mess.send_set_request().await?;
                Ok(Some(PixelPhase::CheckTestCompletion {
                    expire: Instant::now() + self.test_timeout,
                }))
            },
            PixelPhase::CheckTestCompletion { expire } => {
                let mut test = MibInteger::new(mib::PIXEL_TEST_ACTIVATION.scalar());
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut test);
                mess.send_get_request().await?;
                if test.value() == test_activation::NO_TEST {
                    Ok(Some(PixelPhase::QueryRows))
                } else if Instant::now() > *expire {
                    warn!(controller = %controller.name(), "Pixel test timeout expired, giving up");
                    Ok(Some(PixelPhase::QueryRows))
                } else {
                    Ok(Some(phase.clone()))
                }
            },
            PixelPhase::QueryRows => {
                let mut rows = MibInteger::new(mib::PIXEL_FAILURE_TABLE_NUM_ROWS.scalar());
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut rows);
                mess.send_get_request().await?;
                info!(controller = %controller.name(), "{rows}");
                self.rows = u32::try_from(rows.value()).unwrap_or(0);
                Ok((self.rows > 0).then_some(PixelPhase::QueryRow(1)))
            },
            PixelPhase::QueryRow(row) => self.query_row(*row, controller, io).await,
        }
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("pixel_failures:{}", controller.name()))
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if outcome.success {
            sink.publish(controller.name(), DeviceEvent::PixelStatus(self.status.clone()));
        }
    }
}

// ============================================================================
// Lamp test
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LampPhase {
    Activate,
    CheckCompletion { expire: Instant },
    QueryFailures,
}

/// Run a lamp test and read the stuck on/off lamp bitmaps
#[derive(Debug)]
pub struct DmsLampTest {
    test_timeout: Duration,
    stuck_on: Vec<u8>,
    stuck_off: Vec<u8>,
}

impl Default for DmsLampTest {
    fn default() -> Self {
        Self {
            test_timeout: DEFAULT_TEST_TIMEOUT,
            stuck_on: Vec::new(),
            stuck_off: Vec::new(),
        }
    }
}

impl DmsLampTest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Data)
    }
}

#[async_trait]
impl OpPhases for DmsLampTest {
    type Phase = LampPhase;

    fn name(&self) -> &str {
        "Lamp test"
    }

    fn phase_one(&self) -> LampPhase {
        LampPhase::Activate
    }

    async fn poll(
        &mut self,
        phase: &LampPhase,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<LampPhase>> {
        match phase {
            LampPhase::Activate => {
                let mut test = MibInteger::with_value(
                    mib::LAMP_TEST_ACTIVATION.scalar(),
                    test_activation::TEST,
                );
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut test);
                mess.send_set_request().await?;
                Ok(Some(LampPhase::CheckCompletion {
                    expire: Instant::now() + self.test_timeout,
                }))
            },
            LampPhase::CheckCompletion { expire } => {
                let mut test = MibInteger::new(mib::LAMP_TEST_ACTIVATION.scalar());
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut test);
                mess.send_get_request().await?;
                if test.value() == test_activation::NO_TEST {
                    Ok(Some(LampPhase::QueryFailures))
                } else if Instant::now() > *expire {
                    warn!(controller = %controller.name(), "Lamp test timeout expired, giving up");
                    Ok(Some(LampPhase::QueryFailures))
                } else {
                    Ok(Some(phase.clone()))
                }
            },
            LampPhase::QueryFailures => {
                let mut stuck_on = MibOctetString::new(mib::LAMP_FAILURE_STUCK_ON.scalar());
                let mut stuck_off = MibOctetString::new(mib::LAMP_FAILURE_STUCK_OFF.scalar());
                let mut mess = SnmpMessage::new(io, controller);
                mess.add(&mut stuck_on);
                mess.add(&mut stuck_off);
                mess.send_get_request().await?;
                self.stuck_on = stuck_on.value().to_vec();
                self.stuck_off = stuck_off.value().to_vec();
                Ok(None)
            },
        }
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("lamp_test:{}", controller.name()))
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
                DeviceEvent::LampStatus {
                    stuck_on: std::mem::take(&mut self.stuck_on),
                    stuck_off: std::mem::take(&mut self.stuck_off),
                },
            );
        }
    }
}

// ============================================================================
// Set message time remaining
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRemainingPhase {
    SetTimeRemaining,
}

/// Update dmsMessageTimeRemaining for the displayed message
#[derive(Debug)]
pub struct DmsSetTimeRemaining {
    minutes: u16,
}

impl DmsSetTimeRemaining {
    pub fn new(minutes: u16) -> Self {
        Self { minutes }
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Command)
    }
}

#[async_trait]
impl OpPhases for DmsSetTimeRemaining {
    type Phase = TimeRemainingPhase;

    fn name(&self) -> &str {
        "Set message time remaining"
    }

    fn phase_one(&self) -> TimeRemainingPhase {
        TimeRemainingPhase::SetTimeRemaining
    }

    async fn poll(
        &mut self,
        _phase: &TimeRemainingPhase,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<TimeRemainingPhase>> {
        let mut remaining = MibInteger::with_value(
            mib::DMS_MESSAGE_TIME_REMAINING.scalar(),
            i32::from(self.minutes),
        );
        let mut mess = SnmpMessage::new(io, controller);
        mess.add(&mut remaining);
        mess.send_set_request().await?;
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("time_remaining:{}:{}", controller.name(), self.minutes))
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
                DeviceEvent::MessageTimeRemaining {
                    minutes: self.minutes,
                },
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::operation::PollResult;
    use crate::protocols::ntcip::snmp::{encode_response, PUBLIC};
    use crate::protocols::CommProtocol;
    use crate::sink::RecordingSink;
    use crate::transport::{MockResponse, MockTransport, Transport};
    use bytes::BytesMut;
    use std::collections::HashMap;
    use tms_codec::ber::{self, BerReader};

    /// Simulated sign: answers gets from `values`, noSuchName otherwise;
    /// sets are echoed back
    fn sign(
        values: HashMap<Vec<u32>, Vec<u8>>) -> impl FnMut(&[u8],
    ) -> MockResponse + Send + 'static {
        move |frame| {
            let mut outer = BerReader::new(frame);
            let mut message = outer.read_sequence().unwrap();
            message.read_integer().unwrap();
            message.read_octet_string().unwrap();
            let (_, body) = message.read_tlv().unwrap();
            let mut pdu = BerReader::new(body);
            let request_id = pdu.read_integer().unwrap();
            pdu.read_integer().unwrap();
            pdu.read_integer().unwrap();
            let mut list = pdu.read_sequence().unwrap();
            let mut bindings = Vec::new();
            let mut error = (0, 0);
            let mut index = 0;
            while !list.is_empty() {
                index += 1;
                let content = list.read_expected(ber::Tag::SEQUENCE).unwrap();
                let mut vb = BerReader::new(content);
                let oid = vb.read_oid().unwrap();
                let request_value = content[vb.position()..].to_vec();
                let value = if request_value == [0x05, 0x00] {
                    match values.get(&oid) {
                        Some(v) => v.clone(),
                        None => {
                            if error.0 == 0 {
                                error = (2, index);
                            }
                            request_value
                        },
                    }
                } else {
                    request_value
                };
                bindings.push((oid, value));
            }
            let varbinds: Vec<(&[u32], &[u8])> = bindings
                .iter()
                .map(|(o, v)| (o.as_slice(), v.as_slice()))
                .collect();
            let mut buf = BytesMut::new();
            encode_response(&mut buf, PUBLIC, request_id, error, &varbinds).unwrap();
            MockResponse::Bytes(buf.to_vec())
        }
    }

    fn int(value: i32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        ber::encode_integer(&mut buf, value);
        buf.to_vec()
    }

    fn text(value: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        ber::encode_octet_string(&mut buf, value.as_bytes()).unwrap();
        buf.to_vec()
    }

    async fn run<T: OpPhases>(
        phases: T,
        values: HashMap<Vec<u32>, Vec<u8>>) -> (DeviceOp<T>, RecordingSink,
    ) {
        let handle = MockTransport::new("dms");
        handle.set_responder(sign(values));
        let mut transport = handle.clone();
        transport.open().await.unwrap();
        let mut io = LinkIo::new("dms_link", Box::new(transport));
        let controller = Arc::new(ControllerHandle::new("V1", "dms_link", 0, CommProtocol::Ntcip));
        let mut op = DeviceOp::new(phases, controller, PriorityLevel::Data);
        op.set_retry_limit(2);
        while op.poll(&mut io).await == PollResult::Continue {}
        let sink = RecordingSink::new();
        op.cleanup(&sink);
        (op, sink)
    }

    fn sign_values() -> HashMap<Vec<u32>, Vec<u8>> {
        let mut values = HashMap::new();
        let mut put = |node: mib::MibNode, index: &[u32], value: Vec<u8>| {
            values.insert(node.index(index).arcs().to_vec(), value);
        };
        put(mib::DMS_SIGN_TYPE, &[0], int(0x86));
        put(mib::DMS_SIGN_HEIGHT, &[0], int(1400));
        put(mib::DMS_SIGN_WIDTH, &[0], int(6000));
        put(mib::DMS_HORIZONTAL_BORDER, &[0], int(50));
        put(mib::DMS_VERTICAL_BORDER, &[0], int(60));
        put(mib::DMS_BEACON_TYPE, &[0], int(1));
        put(mib::DMS_SIGN_TECHNOLOGY, &[0], int(2));
        put(mib::VMS_CHARACTER_HEIGHT_PIXELS, &[0], int(0));
        put(mib::VMS_CHARACTER_WIDTH_PIXELS, &[0], int(0));
        put(mib::VMS_SIGN_HEIGHT_PIXELS, &[0], int(24));
        put(mib::VMS_SIGN_WIDTH_PIXELS, &[0], int(96));
        put(mib::VMS_HORIZONTAL_PITCH, &[0], int(66));
        put(mib::VMS_VERTICAL_PITCH, &[0], int(66));
        put(mib::GLOBAL_MAX_MODULES, &[0], int(2));
        for row in 1..=2 {
            put(mib::MODULE_MAKE, &[row], text("Daktronics"));
            put(mib::MODULE_MODEL, &[row], text("VF-2020"));
            put(mib::MODULE_VERSION, &[row], text(&format!("v{row}.0")));
            put(mib::MODULE_TYPE, &[row], int(3));
        }
        values
    }

    #[tokio::test]
    async fn test_query_configuration() {
        let (op, sink) = run(DmsQueryConfiguration::new(), sign_values()).await;
        assert!(op.is_success());
        let events = sink.events_for("V1");
        assert_eq!(events.len(), 2);
        let DeviceEvent::SignConfiguration(config) = &events[0] else {
            panic!("unexpected event {:?}", events[0]);
        };
        assert_eq!(config.sign_type, DmsType::VmsFull);
        assert!(config.portable);
        assert_eq!((config.width_pixels, config.height_pixels), (96, 24));
        assert_eq!(config.vertical_border_mm, 60);
        let DeviceEvent::ModuleVersions { modules } = &events[1] else {
            panic!("unexpected event {:?}", events[1]);
        };
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[1].version, "v2.0");
        assert_eq!(modules[0].module_type, ModuleType::Software);
    }

    fn pixel_values(rows: i32, failures: &[(i32, i32, i32)]) -> HashMap<Vec<u32>, Vec<u8>> {
        let mut values = HashMap::new();
        values.insert(
            mib::PIXEL_FAILURE_TABLE_NUM_ROWS.scalar().arcs().to_vec(),
            int(rows),
        );
        for (i, (x, y, status)) in failures.iter().enumerate() {
            let row = [i as u32 + 1];
            values.insert(mib::PIXEL_FAILURE_X_LOCATION.index(&row).arcs().to_vec(), int(*x));
            values.insert(mib::PIXEL_FAILURE_Y_LOCATION.index(&row).arcs().to_vec(), int(*y));
            values.insert(mib::PIXEL_FAILURE_STATUS.index(&row).arcs().to_vec(), int(*status));
        }
        values
    }

    #[tokio::test]
    async fn test_pixel_failures_read_every_row() {
        let pixels = SignPixels { width: 16, height: 2 };
        let values = pixel_values(3, &[(1, 1, 1), (16, 2, 0x10), (9, 1, 0x04)]);
        let (op, sink) = run(DmsQueryPixelFailures::new(pixels, false), values).await;
        assert!(op.is_success());
        let status = op.phases().status();
        assert_eq!(status.failures, 3);
        assert!(status.is_stuck_on(0, 0));
        assert!(status.is_stuck_off(15, 1));
        assert!(status.is_stuck_off(8, 0));
        assert!(!status.is_stuck_on(8, 0));
        assert_eq!(status.stuck_on, vec![0x80, 0x00, 0x00, 0x00]);
        assert_eq!(status.stuck_off, vec![0x00, 0x80, 0x00, 0x01]);
        assert_eq!(sink.events_for("V1").len(), 1);
    }

    #[tokio::test]
    async fn test_pixel_table_ends_on_no_such_name() {
        let pixels = SignPixels { width: 8, height: 1 };
        let values = pixel_values(4, &[(2, 1, 1), (3, 1, 1)]);
        let (op, _) = run(DmsQueryPixelFailures::new(pixels, false), values).await;
        assert!(op.is_success());
        assert_eq!(op.phases().status().failures, 2);
        assert_eq!(
            op.phases().note(),
            Some("Controller error: NO SUCH NAME: pixelFailureXLocation.3")
        );
    }

    #[tokio::test]
    async fn test_pixel_test_activation() {
        let pixels = SignPixels { width: 8, height: 1 };
        let mut values = pixel_values(0, &[]);
        values.insert(
            mib::PIXEL_TEST_ACTIVATION.scalar().arcs().to_vec(),
            int(test_activation::NO_TEST),
        );
        let (op, _) = run(DmsQueryPixelFailures::new(pixels, true), values).await;
        assert!(op.is_success());
        assert_eq!(op.phases().status().failures, 0);
    }

    #[tokio::test]
    async fn test_lamp_test_gives_up_after_expiry() {
        let mut values = HashMap::new();
        values.insert(
            mib::LAMP_TEST_ACTIVATION.scalar().arcs().to_vec(),
            int(test_activation::TEST),
        );
        values.insert(mib::LAMP_FAILURE_STUCK_ON.scalar().arcs().to_vec(), text("\u{1}"));
        values.insert(mib::LAMP_FAILURE_STUCK_OFF.scalar().arcs().to_vec(), text(""));
        let lamp = DmsLampTest::new().with_test_timeout(Duration::from_millis(20));
        let (op, sink) = run(lamp, values).await;
        assert!(op.is_success());
        assert_eq!(
            sink.events_for("V1"),
            vec![DeviceEvent::LampStatus {
                stuck_on: vec![1],
                stuck_off: vec![]
            }]
        );
    }

    #[tokio::test]
    async fn test_set_time_remaining() {
        let (op, sink) = run(DmsSetTimeRemaining::new(15), HashMap::new()).await;
        assert!(op.is_success());
        assert_eq!(
            sink.events_for("V1"),
            vec![DeviceEvent::MessageTimeRemaining { minutes: 15 }]
        );
    }
}
