//! Controller properties
//!
//! A property is one device variable carried by a request/response exchange.
//! It only produces and consumes message bodies; framing, addressing and
//! integrity checks belong to the protocol message that carries it.

use bytes::BytesMut;
use std::fmt;

use crate::error::{CommError, CommResult};

pub trait ControllerProperty: fmt::Display + Send {
    /// Encode the body of a query (get) request
    fn encode_query(&self, _buf: &mut BytesMut) -> CommResult<()> {
        Err(CommError::unsupported(format!("query {self}")))
    }

    /// Decode the body of a query response
    fn decode_query(&mut self, _body: &[u8]) -> CommResult<()> {
        Err(CommError::unsupported(format!("query {self}")))
    }

    /// Encode the body of a store (set) request
    fn encode_store(&self, _buf: &mut BytesMut) -> CommResult<()> {
        Err(CommError::unsupported(format!("store {self}")))
    }

    /// Decode the body of a store response
    fn decode_store(&mut self, _body: &[u8]) -> CommResult<()> {
        Ok(())
    }
}
