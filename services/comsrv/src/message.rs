//! Link I/O context and the protocol message contract

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CommResult;
use crate::transport::Transport;

/// Per-link I/O state handed to each operation phase
///
/// Owned by the link poller task; phases borrow it for the duration of one
/// exchange.
#[derive(Debug)]
pub struct LinkIo {
    name: String,
    transport: Box<dyn Transport>,
    request_id: i32,
}

impl LinkIo {
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            request_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn transport_ref(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.transport.set_timeout(timeout);
    }

    /// Next SNMP request id on this link, always positive
    pub fn next_request_id(&mut self) -> i32 {
        self.request_id = if self.request_id >= i32::MAX - 1 {
            1
        } else {
            self.request_id + 1
        };
        self.request_id
    }
}

/// One protocol request/response carrying a set of properties
///
/// Properties are borrowed mutably so the response can be decoded straight
/// into them.
#[async_trait]
pub trait CommMessage<'a>: Send {
    type Property: ?Sized + Send + 'a;

    /// Add a property to the next request
    fn add(&mut self, prop: &'a mut Self::Property);

    /// Query every added property
    async fn send_get_request(&mut self) -> CommResult<()>;

    /// Store every added property
    async fn send_set_request(&mut self) -> CommResult<()>;
}
