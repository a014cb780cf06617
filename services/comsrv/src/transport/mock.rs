//! Mock Transport for Testing
//!
//! Scripted device responses for exercising protocol and poller logic
//! without network or serial hardware. Clones share state, so a test can
//! keep one handle for inspection while the poller owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::traits::{Transport, TransportError, TransportStats};

/// Device reaction to one sent request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Reply with these bytes
    Bytes(Vec<u8>),
    /// No reply; the next receive times out
    Silence,
    /// Peer closes the channel
    Eof,
}

type Responder = Box<dyn FnMut(&[u8]) -> MockResponse + Send>;

#[derive(Default)]
struct MockState {
    open: bool,
    eof: bool,
    fail_open: bool,
    script: VecDeque<MockResponse>,
    responder: Option<Responder>,
    rx: VecDeque<u8>,
    sent: Vec<Vec<u8>>,
    open_count: u32,
    stats: TransportStats,
}

#[derive(Clone)]
pub struct MockTransport {
    name: String,
    timeout: Duration,
    state: Arc<Mutex<MockState>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("exchanges", &self.exchange_count())
            .finish()
    }
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: Duration::from_millis(100),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queue the reaction to the next unanswered request
    pub fn push_response(&self, response: MockResponse) {
        self.state.lock().script.push_back(response);
    }

    /// Queue a byte reply
    pub fn push_bytes(&self, bytes: impl Into<Vec<u8>>) {
        self.push_response(MockResponse::Bytes(bytes.into()));
    }

    /// Answer requests dynamically once the script is exhausted
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> MockResponse + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Make subsequent `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Put unsolicited bytes on the input side
    pub fn inject_stale(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// Number of requests sent through this transport
    pub fn exchange_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Every request sent so far
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.stats.record_open_attempt();
        if state.fail_open {
            state.stats.record_failed_open();
            return Err(TransportError::ConnectionFailed(format!(
                "{}: simulated open failure",
                self.name
            )));
        }
        state.open = true;
        state.eof = false;
        state.open_count += 1;
        state.stats.record_open();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.rx.clear();
            state.stats.record_close();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn drain(&mut self) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::EndOfChannel("mock not open".to_string()));
        }
        let drained = state.rx.len();
        state.rx.clear();
        state.stats.record_drained(drained);
        Ok(drained)
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.open || state.eof {
            return Err(TransportError::EndOfChannel("mock not open".to_string()));
        }
        state.sent.push(data.to_vec());
        state.stats.record_bytes_sent(data.len());

        let response = match state.script.pop_front() {
            Some(response) => response,
            None => match state.responder.as_mut() {
                Some(responder) => responder(data),
                None => MockResponse::Silence,
            },
        };
        debug!("[Mock] {} -> {:?}", self.name, response);
        match response {
            MockResponse::Bytes(bytes) => state.rx.extend(bytes),
            MockResponse::Silence => {},
            MockResponse::Eof => state.eof = true,
        }
        Ok(data.len())
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::EndOfChannel("mock not open".to_string()));
        }
        if state.rx.is_empty() {
            return if state.eof {
                Err(TransportError::EndOfChannel("mock peer closed".to_string()))
            } else {
                Err(TransportError::Timeout(format!(
                    "no data within {:?}",
                    self.timeout
                )))
            };
        }
        let n = buffer.len().min(state.rx.len());
        for (slot, byte) in buffer.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        state.stats.record_bytes_received(n);
        Ok(n)
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_exchange() {
        let handle = MockTransport::new("mock1");
        let mut transport = handle.clone();
        transport.open().await.unwrap();

        handle.push_bytes(vec![0xAA, 0xBB]);
        transport.send(&[0x01]).await.unwrap();
        let mut buf = [0u8; 2];
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xAA, 0xBB]);

        handle.push_response(MockResponse::Silence);
        transport.send(&[0x02]).await.unwrap();
        assert!(matches!(
            transport.receive(&mut buf).await,
            Err(TransportError::Timeout(_))
        ));

        handle.push_response(MockResponse::Eof);
        transport.send(&[0x03]).await.unwrap();
        assert!(matches!(
            transport.receive(&mut buf).await,
            Err(TransportError::EndOfChannel(_))
        ));
        assert_eq!(handle.exchange_count(), 3);
    }

    #[tokio::test]
    async fn test_drain_discards_stale_bytes() {
        let handle = MockTransport::new("mock2");
        let mut transport = handle.clone();
        transport.open().await.unwrap();
        handle.inject_stale(&[1, 2, 3]);
        assert_eq!(transport.drain().await.unwrap(), 3);
        assert_eq!(transport.stats().bytes_drained, 3);
    }

    #[tokio::test]
    async fn test_responder_and_open_failure() {
        let handle = MockTransport::new("mock3");
        handle.set_responder(|request| {
            MockResponse::Bytes(request.iter().rev().copied().collect())
        });
        let mut transport = handle.clone();
        transport.open().await.unwrap();
        transport.send(&[1, 2]).await.unwrap();
        let mut buf = [0u8; 2];
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [2, 1]);

        transport.close().await.unwrap();
        handle.set_fail_open(true);
        assert!(transport.open().await.is_err());
        assert_eq!(handle.open_count(), 1);
    }
}
