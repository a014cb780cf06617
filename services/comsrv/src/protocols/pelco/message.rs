//! Write-only Pelco message
//!
//! Pelco devices never answer, so a store is a single write of every added
//! property body and a query is rejected.

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::debug;

use crate::error::{CommError, CommResult};
use crate::message::{CommMessage, LinkIo};
use crate::property::ControllerProperty;

/// A property written to a Pelco device
pub trait PelcoProperty: ControllerProperty {}

pub struct PelcoMessage<'a> {
    io: &'a mut LinkIo,
    props: Vec<&'a mut dyn PelcoProperty>,
}

impl<'a> PelcoMessage<'a> {
    pub fn new(io: &'a mut LinkIo) -> Self {
        Self {
            io,
            props: Vec::new(),
        }
    }
}

#[async_trait]
impl<'a> CommMessage<'a> for PelcoMessage<'a> {
    type Property = dyn PelcoProperty + 'a;

    fn add(&mut self, prop: &'a mut Self::Property) {
        self.props.push(prop);
    }

    async fn send_get_request(&mut self) -> CommResult<()> {
        Err(CommError::unsupported("GET request not supported"))
    }

    async fn send_set_request(&mut self) -> CommResult<()> {
        if self.props.is_empty() {
            return Err(CommError::internal("no property"));
        }
        let mut frame = BytesMut::new();
        for prop in &self.props {
            prop.encode_store(&mut frame)?;
        }
        let link = self.io.name().to_string();
        debug!("[Pelco] {} send: {}", link, common::hex::format_hex_pretty(&frame));
        self.io.transport().send(&frame).await?;
        Ok(())
    }
}
