//! BER (Basic Encoding Rules) subset used by SNMP v1
//!
//! Supports identifiers with multi-byte tag numbers, short and long form
//! lengths (up to two length octets), INTEGER, OCTET STRING, NULL,
//! OBJECT IDENTIFIER and SEQUENCE. Encoders write into any `BufMut`;
//! decoding goes through [`BerReader`], a cursor over a borrowed slice.

use std::fmt;

use bytes::BufMut;

use crate::error::{CodecError, Result};

/// ASN.1 tag class (top two bits of the identifier octet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    Universal,
    Application,
    Context,
    Private,
}

impl TagClass {
    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0x00,
            TagClass::Application => 0x40,
            TagClass::Context => 0x80,
            TagClass::Private => 0xC0,
        }
    }

    fn from_bits(octet: u8) -> Self {
        match octet & 0xC0 {
            0x00 => TagClass::Universal,
            0x40 => TagClass::Application,
            0x80 => TagClass::Context,
            _ => TagClass::Private,
        }
    }
}

/// ASN.1 identifier: class, primitive/constructed flag and tag number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub class: TagClass,
    pub constructed: bool,
    pub number: u32,
}

impl Tag {
    pub const INTEGER: Tag = Tag::universal(2, false);
    pub const OCTET_STRING: Tag = Tag::universal(4, false);
    pub const NULL: Tag = Tag::universal(5, false);
    pub const OBJECT_IDENTIFIER: Tag = Tag::universal(6, false);
    pub const SEQUENCE: Tag = Tag::universal(16, true);

    pub const fn new(class: TagClass, constructed: bool, number: u32) -> Self {
        Self {
            class,
            constructed,
            number,
        }
    }

    pub const fn universal(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Universal, constructed, number)
    }

    pub const fn application(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Application, constructed, number)
    }

    pub const fn context(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Context, constructed, number)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = if self.constructed { "C" } else { "P" };
        write!(f, "{:?}/{}[{}]", self.class, form, self.number)
    }
}

/// Write a value as base-128 groups, most significant first
fn put_base128(buf: &mut impl BufMut, value: u32) {
    let mut groups = [0u8; 5];
    let mut count = 0;
    let mut v = value;
    loop {
        groups[count] = (v & 0x7F) as u8;
        count += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i > 0 { 0x80 } else { 0x00 };
        buf.put_u8(groups[i] | continuation);
    }
}

/// Encode an identifier octet (plus tag number octets when >= 31)
pub fn encode_tag(buf: &mut impl BufMut, tag: Tag) {
    let mut first = tag.class.bits();
    if tag.constructed {
        first |= 0x20;
    }
    if tag.number < 0x1F {
        buf.put_u8(first | tag.number as u8);
    } else {
        buf.put_u8(first | 0x1F);
        put_base128(buf, tag.number);
    }
}

/// Encode a definite length (short form, or long form with 1-2 octets)
pub fn encode_length(buf: &mut impl BufMut, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len <= 0xFF {
        buf.put_u8(0x81);
        buf.put_u8(len as u8);
    } else if len <= 0xFFFF {
        buf.put_u8(0x82);
        buf.put_u16(len as u16);
    } else {
        return Err(CodecError::OutOfRange(format!("BER length {len}")));
    }
    Ok(())
}

/// Encode a complete tag-length-value triple
pub fn encode_tlv(buf: &mut impl BufMut, tag: Tag, content: &[u8]) -> Result<()> {
    encode_tag(buf, tag);
    encode_length(buf, content.len())?;
    buf.put_slice(content);
    Ok(())
}

/// Index of the first significant octet of a big-endian two's complement value.
///
/// A leading 0x00 is redundant when the next octet is non-negative, a leading
/// 0xFF when the next octet is negative.
fn minimal_start(octets: &[u8; 4]) -> usize {
    let mut start = 0;
    while start < 3 {
        let redundant = match octets[start] {
            0x00 => octets[start + 1] & 0x80 == 0,
            0xFF => octets[start + 1] & 0x80 != 0,
            _ => false,
        };
        if !redundant {
            break;
        }
        start += 1;
    }
    start
}

/// Encode an INTEGER using the fewest two's complement octets
pub fn encode_integer(buf: &mut impl BufMut, value: i32) {
    let octets = value.to_be_bytes();
    let start = minimal_start(&octets);
    encode_tag(buf, Tag::INTEGER);
    buf.put_u8((4 - start) as u8);
    buf.put_slice(&octets[start..]);
}

pub fn encode_octet_string(buf: &mut impl BufMut, value: &[u8]) -> Result<()> {
    encode_tlv(buf, Tag::OCTET_STRING, value)
}

pub fn encode_null(buf: &mut impl BufMut) {
    encode_tag(buf, Tag::NULL);
    buf.put_u8(0);
}

/// Content octets of an OBJECT IDENTIFIER
pub fn oid_content(oid: &[u32]) -> Result<Vec<u8>> {
    if oid.len() < 2 {
        return Err(CodecError::InvalidOid(
            "at least two components required".to_string(),
        ));
    }
    let (x, y) = (oid[0], oid[1]);
    if x > 2 || (x < 2 && y >= 40) {
        return Err(CodecError::InvalidOid(format!(
            "invalid leading arcs {x}.{y}"
        )));
    }
    let first = (x * 40)
        .checked_add(y)
        .ok_or_else(|| CodecError::InvalidOid(format!("arc {y} too large")))?;
    let mut content = Vec::with_capacity(oid.len() + 4);
    put_base128(&mut content, first);
    for &arc in &oid[2..] {
        put_base128(&mut content, arc);
    }
    Ok(content)
}

pub fn encode_oid(buf: &mut impl BufMut, oid: &[u32]) -> Result<()> {
    let content = oid_content(oid)?;
    encode_tlv(buf, Tag::OBJECT_IDENTIFIER, &content)
}

/// Wrap already encoded elements in a SEQUENCE
pub fn encode_sequence(buf: &mut impl BufMut, content: &[u8]) -> Result<()> {
    encode_tlv(buf, Tag::SEQUENCE, content)
}

/// Decode INTEGER content octets (1 to 4 octets, sign extended)
pub fn decode_integer_content(content: &[u8]) -> Result<i32> {
    if content.is_empty() || content.len() > 4 {
        return Err(CodecError::InvalidInteger(content.len()));
    }
    let mut value: i32 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &octet in content {
        value = (value << 8) | i32::from(octet);
    }
    Ok(value)
}

/// Decode OBJECT IDENTIFIER content octets
pub fn decode_oid_content(content: &[u8]) -> Result<Vec<u32>> {
    if content.is_empty() {
        return Err(CodecError::InvalidOid("empty content".to_string()));
    }
    let mut arcs = Vec::with_capacity(content.len() + 1);
    let mut value: u32 = 0;
    let mut pending = false;
    for &octet in content {
        if value > (u32::MAX >> 7) {
            return Err(CodecError::InvalidOid(
                "sub-identifier overflow".to_string(),
            ));
        }
        value = (value << 7) | u32::from(octet & 0x7F);
        if octet & 0x80 != 0 {
            pending = true;
        } else {
            arcs.push(value);
            value = 0;
            pending = false;
        }
    }
    if pending {
        return Err(CodecError::InvalidOid(
            "truncated sub-identifier".to_string(),
        ));
    }

    let first = arcs[0];
    let (x, y) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut oid = Vec::with_capacity(arcs.len() + 1);
    oid.push(x);
    oid.push(y);
    oid.extend_from_slice(&arcs[1..]);
    Ok(oid)
}

/// Cursor over BER encoded data
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn next_octet(&mut self) -> Result<u8> {
        let octet = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::InvalidLength {
                needed: 1,
                available: 0,
            })?;
        self.pos += 1;
        Ok(octet)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(CodecError::InvalidLength {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_tag(&mut self) -> Result<Tag> {
        let first = self.next_octet()?;
        let class = TagClass::from_bits(first);
        let constructed = first & 0x20 != 0;
        let mut number = u32::from(first & 0x1F);
        if number == 0x1F {
            number = 0;
            loop {
                let octet = self.next_octet()?;
                if number > (u32::MAX >> 7) {
                    return Err(CodecError::OutOfRange("tag number".to_string()));
                }
                number = (number << 7) | u32::from(octet & 0x7F);
                if octet & 0x80 == 0 {
                    break;
                }
            }
        }
        Ok(Tag::new(class, constructed, number))
    }

    pub fn peek_tag(&self) -> Result<Tag> {
        self.clone().read_tag()
    }

    /// Read a definite length and check it against the remaining data
    pub fn read_length(&mut self) -> Result<usize> {
        let first = self.next_octet()?;
        let len = match first {
            0x80 => return Err(CodecError::IndefiniteLength),
            0xFF => return Err(CodecError::ReservedLength),
            octet if octet < 0x80 => usize::from(octet),
            octet => {
                let count = usize::from(octet & 0x7F);
                if count > 2 {
                    return Err(CodecError::UnsupportedLength(count));
                }
                self.take(count)?
                    .iter()
                    .fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
            },
        };
        if len > self.remaining() {
            return Err(CodecError::InvalidLength {
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(len)
    }

    pub fn read_tlv(&mut self) -> Result<(Tag, &'a [u8])> {
        let tag = self.read_tag()?;
        let len = self.read_length()?;
        Ok((tag, self.take(len)?))
    }

    /// Read a TLV and require a specific tag
    pub fn read_expected(&mut self, expected: Tag) -> Result<&'a [u8]> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(CodecError::UnexpectedTag {
                expected: expected.to_string(),
                found: tag.to_string(),
            });
        }
        Ok(content)
    }

    pub fn read_integer(&mut self) -> Result<i32> {
        decode_integer_content(self.read_expected(Tag::INTEGER)?)
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8]> {
        self.read_expected(Tag::OCTET_STRING)
    }

    pub fn read_null(&mut self) -> Result<()> {
        let content = self.read_expected(Tag::NULL)?;
        if !content.is_empty() {
            return Err(CodecError::InvalidNull(content.len()));
        }
        Ok(())
    }

    pub fn read_oid(&mut self) -> Result<Vec<u32>> {
        decode_oid_content(self.read_expected(Tag::OBJECT_IDENTIFIER)?)
    }

    pub fn read_sequence(&mut self) -> Result<BerReader<'a>> {
        self.read_constructed(Tag::SEQUENCE)
    }

    /// Read a constructed element and return a reader over its content
    pub fn read_constructed(&mut self, tag: Tag) -> Result<BerReader<'a>> {
        Ok(BerReader::new(self.read_expected(tag)?))
    }
}
