//! Service runtime: startup work, periodic tick and shutdown

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use comsrv::config::AppConfig;
use comsrv::sink::{DeviceEvent, RecordingSink};
use comsrv::transport::{MockResponse, MockTransport};
use comsrv::CommService;
use tms_codec::checksum::xor8;
use tms_codec::DropAddressing;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
service:
  poll_interval_secs: 30
protocols:
  mndot:
    max_retries: 1
    timeout_ms: 50
links:
  - name: dms_link
    protocol: ntcip
    transport: { type: udp, host: 127.0.0.1, port: 161 }
    controllers:
      - { name: V35W01, sign_pixels: { width: 96, height: 24 } }
  - name: rm_link
    protocol: mndot4
    transport: { type: tcp, host: 127.0.0.1, port: 8001 }
    controllers:
      - { name: ctl_9, drop: 9 }
"#;

fn service(sink: Arc<RecordingSink>) -> CommService {
    let config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    CommService::new(&config, sink, CancellationToken::new())
}

/// 4-bit 170 controller: memory reads return the PROM version or zeros
fn controller_170(frame: &[u8]) -> MockResponse {
    let (drop, category) = DropAddressing::FourBit.unpack(frame[0]);
    let payload = &frame[2..frame.len() - 1];
    let data = match category {
        7 if payload[..2] == [0xFF, 0xF6] => vec![5, 2],
        7 => vec![0; usize::from(payload[2])],
        _ => Vec::new(),
    };
    let mut reply = vec![DropAddressing::FourBit.pack(drop, 0).unwrap(), data.len() as u8];
    reply.extend_from_slice(&data);
    reply.push(xor8(&reply));
    MockResponse::Bytes(reply)
}

async fn wait_for(sink: &RecordingSink, controller: &str, count: usize) -> Vec<DeviceEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = sink.events_for(controller);
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_startup_operations_reach_the_sink() {
    let sink = Arc::new(RecordingSink::new());
    let svc = service(sink.clone());
    let mock = MockTransport::new("rm_link");
    mock.set_responder(controller_170);
    svc.start_link("rm_link", Box::new(mock.clone())).unwrap();

    assert_eq!(svc.submit_startup(), 3);
    let events = wait_for(&sink, "ctl_9", 2).await;
    // clock sync (download) outranks the PROM query (diagnostic)
    assert!(matches!(events[0], DeviceEvent::ClockSynchronized { .. }));
    assert_eq!(events[1], DeviceEvent::PromVersion { major: 5, minor: 2 });
    assert_eq!(mock.exchange_count(), 2);

    // the sign link was never started, so its configuration query is cancelled
    assert_eq!(svc.shutdown().await, 1);
    assert!(sink.events_for("V35W01").is_empty());
    assert_eq!(svc.registry().get("V35W01").unwrap().counters().failed_ops, 1);
}

#[tokio::test]
async fn test_periodic_samples() {
    let sink = Arc::new(RecordingSink::new());
    let svc = service(sink.clone());
    let mock = MockTransport::new("rm_link");
    mock.set_responder(controller_170);
    svc.start_link("rm_link", Box::new(mock.clone())).unwrap();

    // pixel query for the sign, sample query for the meter
    assert_eq!(svc.submit_periodic(), 2);
    let events = wait_for(&sink, "ctl_9", 1).await;
    let DeviceEvent::SampleData(samples) = &events[0] else {
        panic!("unexpected event {:?}", events[0]);
    };
    assert_eq!(samples.volumes.len(), 24);
    assert!(samples.volumes.iter().all(|v| *v == 0));

    svc.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_everything_without_io() {
    let sink = Arc::new(RecordingSink::new());
    let svc = service(sink.clone());
    let mock = MockTransport::new("rm_link");
    svc.start_link("rm_link", Box::new(mock.clone())).unwrap();

    // queue work while the link task is parked on the cancelled token
    svc.cancel_token().cancel();
    svc.submit_startup();
    svc.submit_periodic();
    svc.shutdown().await;

    assert_eq!(mock.exchange_count(), 0);
    assert_eq!(mock.open_count(), 0);
    assert!(sink.events().is_empty());
    let ctl = svc.registry().get("ctl_9").unwrap();
    assert_eq!(ctl.counters().failed_ops, 3);
    assert_eq!(ctl.counters().success_ops, 0);
}
