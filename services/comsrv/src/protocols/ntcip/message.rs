//! SNMP request/response exchange

use async_trait::async_trait;
use bytes::BytesMut;
use tms_codec::ber;
use tracing::debug;

use super::mib::MibProperty;
use super::snmp::{self, PduType, PUBLIC};
use crate::controller::ControllerHandle;
use crate::error::{CommError, CommResult};
use crate::message::{CommMessage, LinkIo};

/// One SNMP exchange with a sign controller
pub struct SnmpMessage<'a> {
    io: &'a mut LinkIo,
    controller: &'a ControllerHandle,
    props: Vec<&'a mut dyn MibProperty>,
}

impl<'a> SnmpMessage<'a> {
    pub fn new(io: &'a mut LinkIo, controller: &'a ControllerHandle) -> Self {
        Self {
            io,
            controller,
            props: Vec::new(),
        }
    }

    fn write_community(&self) -> &str {
        self.controller.password().unwrap_or(PUBLIC)
    }

    async fn exchange(&mut self, pdu: PduType) -> CommResult<()> {
        if self.props.is_empty() {
            return Err(CommError::internal("no property"));
        }
        let community = match pdu {
            PduType::SetRequest => self.write_community().to_string(),
            _ => PUBLIC.to_string(),
        };

        let mut values = Vec::with_capacity(self.props.len());
        for prop in &self.props {
            let mut value = BytesMut::new();
            match pdu {
                PduType::SetRequest => prop.encode_store(&mut value)?,
                _ => ber::encode_null(&mut value),
            }
            values.push(value);
        }
        let varbinds: Vec<(&[u32], &[u8])> = self
            .props
            .iter()
            .zip(&values)
            .map(|(prop, value)| (prop.oid().arcs(), &value[..]))
            .collect();

        let request_id = self.io.next_request_id();
        let mut frame = BytesMut::new();
        snmp::encode_request(&mut frame, &community, pdu, request_id, &varbinds)?;

        let link = self.io.name().to_string();
        let transport = self.io.transport();
        transport.drain().await?;
        debug!("[SNMP] {} send: {}", link, common::hex::format_hex_pretty(&frame));
        transport.send(&frame).await?;

        let response = snmp::read_message(transport).await?;
        debug!("[SNMP] {} recv: {}", link, common::hex::format_hex_pretty(&response));
        self.decode(pdu, request_id, &response)
    }

    fn decode(&mut self, pdu: PduType, request_id: i32, frame: &[u8]) -> CommResult<()> {
        let response = snmp::decode_response(frame)?;
        if response.request_id != request_id {
            return Err(CommError::DropMismatch {
                expected: request_id as u32,
                received: response.request_id as u32,
            });
        }

        let index = usize::try_from(response.error_index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .filter(|&i| i < self.props.len())
            .unwrap_or(0);
        response.error_status.check(self.props[index].oid().name())?;

        if response.varbinds.len() != self.props.len() {
            return Err(CommError::parsing(format!(
                "{} varbinds for {} objects",
                response.varbinds.len(),
                self.props.len()
            )));
        }
        for (prop, varbind) in self.props.iter_mut().zip(&response.varbinds) {
            if varbind.oid.as_slice() != prop.oid().arcs() {
                return Err(CommError::parsing(format!(
                    "OID mismatch for {}",
                    prop.oid().name()
                )));
            }
            match pdu {
                PduType::SetRequest => prop.decode_store(varbind.value)?,
                _ => prop.decode_query(varbind.value)?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> CommMessage<'a> for SnmpMessage<'a> {
    type Property = dyn MibProperty + 'a;

    fn add(&mut self, prop: &'a mut Self::Property) {
        self.props.push(prop);
    }

    async fn send_get_request(&mut self) -> CommResult<()> {
        self.exchange(PduType::GetRequest).await
    }

    async fn send_set_request(&mut self) -> CommResult<()> {
        self.exchange(PduType::SetRequest).await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::DeviceFault;
    use crate::protocols::ntcip::mib::{self, MibInteger};
    use crate::protocols::ntcip::snmp::{decode_response, encode_response};
    use crate::protocols::CommProtocol;
    use crate::transport::{MockResponse, MockTransport, Transport};
    use tms_codec::ber::{BerReader, Tag};

    /// Parse a request and pull out (community, pdu tag, request id, oids)
    fn parse_request(frame: &[u8]) -> (String, Tag, i32, Vec<Vec<u32>>) {
        let mut outer = BerReader::new(frame);
        let mut message = outer.read_sequence().unwrap();
        message.read_integer().unwrap();
        let community = String::from_utf8(message.read_octet_string().unwrap().to_vec()).unwrap();
        let (tag, body) = message.read_tlv().unwrap();
        let mut pdu = BerReader::new(body);
        let request_id = pdu.read_integer().unwrap();
        pdu.read_integer().unwrap();
        pdu.read_integer().unwrap();
        let mut list = pdu.read_sequence().unwrap();
        let mut oids = Vec::new();
        while !list.is_empty() {
            let mut vb = list.read_sequence().unwrap();
            oids.push(vb.read_oid().unwrap());
        }
        (community, tag, request_id, oids)
    }

    /// Sign answering every OID with INTEGER `value`
    fn answer(frame: &[u8], value: i32, request_id_offset: i32) -> MockResponse {
        let (_, _, request_id, oids) = parse_request(frame);
        let mut encoded = BytesMut::new();
        ber::encode_integer(&mut encoded, value);
        let varbinds: Vec<(&[u32], &[u8])> =
            oids.iter().map(|o| (o.as_slice(), &encoded[..])).collect();
        let mut buf = BytesMut::new();
        let request_id = request_id + request_id_offset;
        encode_response(&mut buf, PUBLIC, request_id, (0, 0), &varbinds).unwrap();
        MockResponse::Bytes(buf.to_vec())
    }

    async fn setup(password: Option<&str>) -> (MockTransport, LinkIo, ControllerHandle) {
        let handle = MockTransport::new("dms");
        let mut transport = handle.clone();
        transport.open().await.unwrap();
        let io = LinkIo::new("dms_link", Box::new(transport));
        let controller = ControllerHandle::new("V35W01", "dms_link", 0, CommProtocol::Ntcip)
            .with_password(password.map(str::to_string));
        (handle, io, controller)
    }

    #[tokio::test]
    async fn test_get_decodes_in_order() {
        let (handle, mut io, controller) = setup(None).await;
        handle.set_responder(|frame| answer(frame, 24, 0));

        let mut height = MibInteger::new(mib::VMS_SIGN_HEIGHT_PIXELS.scalar());
        let mut width = MibInteger::new(mib::VMS_SIGN_WIDTH_PIXELS.scalar());
        let mut mess = SnmpMessage::new(&mut io, &controller);
        mess.add(&mut height);
        mess.add(&mut width);
        mess.send_get_request().await.unwrap();
        assert_eq!(height.value(), 24);
        assert_eq!(width.value(), 24);

        let (community, tag, request_id, oids) = parse_request(&handle.sent_frames()[0]);
        assert_eq!(community, "public");
        assert_eq!(tag, PduType::GetRequest.tag());
        assert_eq!(request_id, 1);
        assert_eq!(oids.len(), 2);
    }

    #[tokio::test]
    async fn test_set_uses_password_community() {
        let (handle, mut io, controller) = setup(Some("secret")).await;
        handle.set_responder(|frame| answer(frame, 15, 0));

        let mut remaining = MibInteger::with_value(mib::DMS_MESSAGE_TIME_REMAINING.scalar(), 15);
        let mut mess = SnmpMessage::new(&mut io, &controller);
        mess.add(&mut remaining);
        mess.send_set_request().await.unwrap();

        let (community, tag, _, _) = parse_request(&handle.sent_frames()[0]);
        assert_eq!(community, "secret");
        assert_eq!(tag, PduType::SetRequest.tag());
    }

    #[tokio::test]
    async fn test_request_id_mismatch() {
        let (handle, mut io, controller) = setup(None).await;
        handle.set_responder(|frame| answer(frame, 1, 1));

        let mut rows = MibInteger::new(mib::PIXEL_FAILURE_TABLE_NUM_ROWS.scalar());
        let mut mess = SnmpMessage::new(&mut io, &controller);
        mess.add(&mut rows);
        let err = mess.send_get_request().await.unwrap_err();
        assert_eq!(
            err,
            CommError::DropMismatch {
                expected: 1,
                received: 2
            }
        );
    }

    #[tokio::test]
    async fn test_no_such_name_names_object() {
        let (handle, mut io, controller) = setup(None).await;
        handle.set_responder(|frame| {
            let (_, _, request_id, oids) = parse_request(frame);
            let null = [0x05u8, 0x00];
            let varbinds: Vec<(&[u32], &[u8])> =
                oids.iter().map(|o| (o.as_slice(), &null[..])).collect();
            let mut buf = BytesMut::new();
            encode_response(&mut buf, PUBLIC, request_id, (2, 2), &varbinds).unwrap();
            MockResponse::Bytes(buf.to_vec())
        });

        let mut x = MibInteger::new(mib::PIXEL_FAILURE_X_LOCATION.index(&[4]));
        let mut y = MibInteger::new(mib::PIXEL_FAILURE_Y_LOCATION.index(&[4]));
        let mut mess = SnmpMessage::new(&mut io, &controller);
        mess.add(&mut x);
        mess.add(&mut y);
        let err = mess.send_get_request().await.unwrap_err();
        assert_eq!(
            err,
            CommError::Device(DeviceFault::NoSuchName("pixelFailureYLocation.4".into()))
        );
    }

    #[tokio::test]
    async fn test_oid_order_enforced() {
        let (handle, mut io, controller) = setup(None).await;
        handle.set_responder(|frame| {
            let (_, _, request_id, mut oids) = parse_request(frame);
            oids.reverse();
            let value = [0x02u8, 0x01, 0x01];
            let varbinds: Vec<(&[u32], &[u8])> =
                oids.iter().map(|o| (o.as_slice(), &value[..])).collect();
            let mut buf = BytesMut::new();
            encode_response(&mut buf, PUBLIC, request_id, (0, 0), &varbinds).unwrap();
            MockResponse::Bytes(buf.to_vec())
        });

        let mut a = MibInteger::new(mib::DMS_SIGN_HEIGHT.scalar());
        let mut b = MibInteger::new(mib::DMS_SIGN_WIDTH.scalar());
        let mut mess = SnmpMessage::new(&mut io, &controller);
        mess.add(&mut a);
        mess.add(&mut b);
        assert!(matches!(
            mess.send_get_request().await,
            Err(CommError::Parsing(_))
        ));
    }

    #[test]
    fn test_response_helper_roundtrip() {
        let mut buf = BytesMut::new();
        encode_response(&mut buf, PUBLIC, 9, (0, 0), &[]).unwrap();
        assert_eq!(decode_response(&buf).unwrap().request_id, 9);
    }
}
