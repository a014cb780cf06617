//! 170 controller operations

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Timelike};
use serde::Serialize;
use std::sync::Arc;
use tms_codec::{bcd, ByteReader};
use tracing::info;

use super::address::{self, meter_rate, DETECTOR_INPUTS};
use super::message::{MndotMessage, MndotProperty};
use super::property::{Level1Restart, MemoryProperty, SynchronizeClock};
use crate::controller::ControllerHandle;
use crate::error::{CommError, CommResult};
use crate::message::{CommMessage, LinkIo};
use crate::operation::{DeviceOp, OpOutcome, OpPhases, Operation};
use crate::priority::PriorityLevel;
use crate::sink::{DeviceEvent, DeviceSink};

/// Single exchange operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Exchange,
}

async fn query<P: MndotProperty>(
    io: &mut LinkIo,
    controller: &ControllerHandle,
    prop: &mut P,
) -> CommResult<()> {
    let mut mess = MndotMessage::new(io, controller)?;
    mess.add(prop);
    mess.send_get_request().await
}

async fn store<P: MndotProperty>(
    io: &mut LinkIo,
    controller: &ControllerHandle,
    prop: &mut P,
) -> CommResult<()> {
    let mut mess = MndotMessage::new(io, controller)?;
    mess.add(prop);
    mess.send_set_request().await
}

/// Binned volume and scan counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleData {
    pub period_secs: u32,
    pub volumes: Vec<u8>,
    /// Occupancy scans (1/60 s)
    pub scans: Vec<u16>,
}

impl SampleData {
    /// Parse a record of volumes followed by big-endian scan counts
    pub fn parse(period_secs: u32, record: &[u8]) -> CommResult<Self> {
        let mut reader = ByteReader::new(record);
        let volumes = reader.read_bytes(DETECTOR_INPUTS)?.to_vec();
        let mut scans = Vec::with_capacity(DETECTOR_INPUTS);
        for _ in 0..DETECTOR_INPUTS {
            scans.push(reader.read_u16()?);
        }
        reader.finish()?;
        Ok(Self {
            period_secs,
            volumes,
            scans,
        })
    }
}

/// Turn a beacon on (central rate) or off (forced flash)
#[derive(Debug)]
pub struct OpSendBeaconState {
    flashing: bool,
    rate: u8,
}

impl OpSendBeaconState {
    pub fn new(flashing: bool) -> Self {
        let rate = if flashing {
            meter_rate::CENTRAL
        } else {
            meter_rate::FORCED_FLASH
        };
        Self { flashing, rate }
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Command)
    }
}

#[async_trait]
impl OpPhases for OpSendBeaconState {
    type Phase = Step;

    fn name(&self) -> &str {
        "Send beacon state"
    }

    fn phase_one(&self) -> Step {
        Step::Exchange
    }

    async fn poll(
        &mut self,
        _phase: &Step,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Step>> {
        let rate_address = address::RAMP_METER_DATA + address::OFF_REMOTE_RATE;
        let mut prop = MemoryProperty::write(rate_address, vec![self.rate]);
        store(io, controller, &mut prop).await?;
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("beacon:{}:{}", controller.name(), self.rate))
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
                DeviceEvent::BeaconState {
                    flashing: self.flashing,
                },
            );
        }
    }
}

/// Write the central-rate red time of a meter
#[derive(Debug)]
pub struct OpSetRedTime {
    meter: u8,
    tenths: u16,
    afternoon: bool,
}

impl OpSetRedTime {
    /// Red time for `meter` (1 or 2) in tenths of a second, written to
    /// the timing table of the current half day
    pub fn new(meter: u8, tenths: u16) -> Self {
        Self::with_afternoon(meter, tenths, Local::now().hour() >= 12)
    }

    pub fn with_afternoon(meter: u8, tenths: u16, afternoon: bool) -> Self {
        Self {
            meter,
            tenths,
            afternoon,
        }
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Command)
    }
}

#[async_trait]
impl OpPhases for OpSetRedTime {
    type Phase = Step;

    fn name(&self) -> &str {
        "Set red time"
    }

    fn phase_one(&self) -> Step {
        Step::Exchange
    }

    async fn poll(
        &mut self,
        _phase: &Step,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Step>> {
        let address = address::red_time(self.meter, self.afternoon)
            .ok_or_else(|| CommError::internal(format!("no meter {}", self.meter)))?;
        let value = bcd::encode_u16(self.tenths)
            .map_err(|e| CommError::internal(format!("red time {}: {e}", self.tenths)))?;
        let mut prop = MemoryProperty::write(address, value.to_vec());
        store(io, controller, &mut prop).await?;
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("red_time:{}:{}:{}", controller.name(), self.meter, self.tenths))
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
                DeviceEvent::RedTime {
                    meter: self.meter,
                    tenths: self.tenths,
                },
            );
        }
    }
}

/// Read the 30-second sample buffer
#[derive(Debug, Default)]
pub struct OpQuerySamples30Sec {
    samples: Option<SampleData>,
}

impl OpQuerySamples30Sec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Data)
    }

    pub fn samples(&self) -> Option<&SampleData> {
        self.samples.as_ref()
    }
}

#[async_trait]
impl OpPhases for OpQuerySamples30Sec {
    type Phase = Step;

    fn name(&self) -> &str {
        "Query 30-second samples"
    }

    fn phase_one(&self) -> Step {
        Step::Exchange
    }

    async fn poll(
        &mut self,
        _phase: &Step,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Step>> {
        let len = (DETECTOR_INPUTS * 3) as u8;
        let mut prop = MemoryProperty::read(address::DATA_BUFFER_30_SECOND, len);
        query(io, controller, &mut prop).await?;
        self.samples = Some(SampleData::parse(30, prop.data())?);
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("samples_30s:{}", controller.name()))
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if let (true, Some(samples)) = (outcome.success, self.samples.take()) {
            sink.publish(controller.name(), DeviceEvent::SampleData(samples));
        }
    }
}

/// Read the controller PROM version
#[derive(Debug, Default)]
pub struct OpQueryPromVersion {
    version: Option<(u8, u8)>,
}

impl OpQueryPromVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Diagnostic)
    }
}

#[async_trait]
impl OpPhases for OpQueryPromVersion {
    type Phase = Step;

    fn name(&self) -> &str {
        "Query PROM version"
    }

    fn phase_one(&self) -> Step {
        Step::Exchange
    }

    async fn poll(
        &mut self,
        _phase: &Step,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Step>> {
        let mut prop = MemoryProperty::read(address::PROM_VERSION, 2);
        query(io, controller, &mut prop).await?;
        let mut reader = ByteReader::new(prop.data());
        self.version = Some((reader.read_u8()?, reader.read_u8()?));
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("prom_version:{}", controller.name()))
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if let (true, Some((major, minor))) = (outcome.success, self.version) {
            info!(controller = %controller.name(), "PROM version {major}.{minor}");
            sink.publish(controller.name(), DeviceEvent::PromVersion { major, minor });
        }
    }
}

/// Set the controller clock to local time
#[derive(Debug, Default)]
pub struct OpSynchronizeClock {
    sent: Option<NaiveDateTime>,
}

impl OpSynchronizeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Download)
    }
}

#[async_trait]
impl OpPhases for OpSynchronizeClock {
    type Phase = Step;

    fn name(&self) -> &str {
        "Synchronize clock"
    }

    fn phase_one(&self) -> Step {
        Step::Exchange
    }

    async fn poll(
        &mut self,
        _phase: &Step,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Step>> {
        // taken per attempt so a retry sends the current time
        let now = Local::now().naive_local();
        let mut prop = SynchronizeClock::new(now);
        store(io, controller, &mut prop).await?;
        self.sent = Some(now);
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("sync_clock:{}", controller.name()))
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if let (true, Some(sent)) = (outcome.success, self.sent) {
            sink.publish(
                controller.name(),
                DeviceEvent::ClockSynchronized {
                    time: sent.format("%Y-%m-%d %H:%M:%S").to_string(),
                },
            );
        }
    }
}

/// Restart the controller program
#[derive(Debug, Default)]
pub struct OpLevel1Restart;

impl OpLevel1Restart {
    pub fn operation(self, controller: Arc<ControllerHandle>) -> Box<dyn Operation> {
        DeviceOp::boxed(self, controller, PriorityLevel::Download)
    }
}

#[async_trait]
impl OpPhases for OpLevel1Restart {
    type Phase = Step;

    fn name(&self) -> &str {
        "Level 1 restart"
    }

    fn phase_one(&self) -> Step {
        Step::Exchange
    }

    async fn poll(
        &mut self,
        _phase: &Step,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Step>> {
        let mut prop = Level1Restart;
        store(io, controller, &mut prop).await?;
        Ok(None)
    }

    fn key(&self, controller: &ControllerHandle) -> Option<String> {
        Some(format!("restart:{}", controller.name()))
    }

    fn cleanup(
        &mut self,
        controller: &ControllerHandle,
        outcome: &OpOutcome<'_>,
        sink: &dyn DeviceSink,
    ) {
        if outcome.success {
            sink.publish(controller.name(), DeviceEvent::ControllerRestarted);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::operation::PollResult;
    use crate::protocols::mndot::message::{encode_frame, Category};
    use crate::protocols::CommProtocol;
    use crate::sink::RecordingSink;
    use crate::transport::{MockResponse, MockTransport, Transport};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tms_codec::checksum::xor8;
    use tms_codec::DropAddressing;

    type Memory = Arc<Mutex<HashMap<u16, u8>>>;

    /// 5-bit 170 controller answering memory reads and writes
    fn controller_170(memory: Memory) -> impl FnMut(&[u8]) -> MockResponse + Send + 'static {
        move |frame| {
            let (drop, category) = DropAddressing::FiveBit.unpack(frame[0]);
            let payload = &frame[2..frame.len() - 1];
            let mut memory = memory.lock();
            let data: Vec<u8> = match category {
                7 => {
                    let address = u16::from_be_bytes([payload[0], payload[1]]);
                    (0..u16::from(payload[2]))
                        .map(|i| memory.get(&(address + i)).copied().unwrap_or(0))
                        .collect()
                },
                6 => {
                    let address = u16::from_be_bytes([payload[0], payload[1]]);
                    for (i, byte) in payload[2..].iter().enumerate() {
                        memory.insert(address + i as u16, *byte);
                    }
                    Vec::new()
                },
                _ => Vec::new(),
            };
            let mut reply = vec![DropAddressing::FiveBit.pack(drop, 0).unwrap(), data.len() as u8];
            reply.extend_from_slice(&data);
            reply.push(xor8(&reply));
            MockResponse::Bytes(reply)
        }
    }

    async fn run<T: OpPhases>(
        phases: T,
        memory: Memory) -> (DeviceOp<T>, MockTransport, RecordingSink,
    ) {
        let handle = MockTransport::new("rmeter");
        handle.set_responder(controller_170(memory));
        let mut transport = handle.clone();
        transport.open().await.unwrap();
        let mut io = LinkIo::new("rmeter_link", Box::new(transport));
        let controller =
            Arc::new(ControllerHandle::new("ctl_5", "rmeter_link", 5, CommProtocol::Mndot5));
        let mut op = DeviceOp::new(phases, controller, PriorityLevel::Data);
        op.set_retry_limit(3);
        while op.poll(&mut io).await == PollResult::Continue {}
        let sink = RecordingSink::new();
        op.cleanup(&sink);
        (op, handle, sink)
    }

    #[tokio::test]
    async fn test_red_time_written_as_bcd() {
        let memory = Memory::default();
        let red_time = OpSetRedTime::with_afternoon(1, 45, false);
        let (op, handle, sink) = run(red_time, memory.clone()).await;
        assert!(op.is_success());
        assert_eq!(
            handle.sent_frames()[0],
            encode_frame(
                DropAddressing::FiveBit,
                5,
                Category::WriteMemory,
                &[0x01, 0x4A, 0x00, 0x45],
            )
            .unwrap()
        );
        assert_eq!(memory.lock().get(&0x014B), Some(&0x45));
        assert_eq!(
            sink.events_for("ctl_5"),
            vec![DeviceEvent::RedTime { meter: 1, tenths: 45 }]
        );
    }

    #[tokio::test]
    async fn test_red_time_out_of_range_fails_without_io() {
        let red_time = OpSetRedTime::with_afternoon(1, 10_000, true);
        let (op, handle, sink) = run(red_time, Memory::default()).await;
        assert!(!op.is_success());
        assert!(matches!(op.error_status(), Some(CommError::Internal(_))));
        assert_eq!(handle.exchange_count(), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_beacon_rate() {
        let memory = Memory::default();
        let (op, _, _) = run(OpSendBeaconState::new(false), memory.clone()).await;
        assert!(op.is_success());
        assert_eq!(memory.lock().get(&0x0111), Some(&meter_rate::FORCED_FLASH));

        let controller = ControllerHandle::new("b1", "l", 1, CommProtocol::Mndot5);
        assert_eq!(OpSendBeaconState::new(true).key(&controller).as_deref(), Some("beacon:b1:1"));
    }

    #[tokio::test]
    async fn test_samples_parsed() {
        let memory = Memory::default();
        {
            let mut memory = memory.lock();
            for i in 0..24u16 {
                memory.insert(0x0300 + i, i as u8);
                let scans = (i * 100).to_be_bytes();
                memory.insert(0x0318 + i * 2, scans[0]);
                memory.insert(0x0319 + i * 2, scans[1]);
            }
        }
        let (op, _, sink) = run(OpQuerySamples30Sec::new(), memory).await;
        assert!(op.is_success());
        let events = sink.events_for("ctl_5");
        let DeviceEvent::SampleData(samples) = &events[0] else {
            panic!("unexpected event {:?}", events[0]);
        };
        assert_eq!(samples.period_secs, 30);
        assert_eq!(samples.volumes[7], 7);
        assert_eq!(samples.scans[23], 2300);
    }

    #[tokio::test]
    async fn test_prom_version() {
        let memory = Memory::default();
        memory.lock().insert(0xFFF6, 4);
        memory.lock().insert(0xFFF7, 18);
        let (_, _, sink) = run(OpQueryPromVersion::new(), memory).await;
        assert_eq!(
            sink.events_for("ctl_5"),
            vec![DeviceEvent::PromVersion { major: 4, minor: 18 }]
        );
    }

    #[tokio::test]
    async fn test_restart_and_clock_categories() {
        let (_, handle, sink) = run(OpLevel1Restart, Memory::default()).await;
        assert_eq!(handle.sent_frames()[0][0], 0x29);
        assert_eq!(sink.events_for("ctl_5"), vec![DeviceEvent::ControllerRestarted]);

        let (op, handle, _) = run(OpSynchronizeClock::new(), Memory::default()).await;
        assert!(op.is_success());
        let frame = &handle.sent_frames()[0];
        assert_eq!(frame[0], 0x2A);
        assert_eq!(frame[1], 6);
    }

    #[test]
    fn test_sample_record_length() {
        assert!(SampleData::parse(30, &[0; 71]).is_err());
        assert!(SampleData::parse(30, &[0; 73]).is_err());
        assert!(SampleData::parse(30, &[0; 72]).is_ok());
    }
}
