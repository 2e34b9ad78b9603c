// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ASN.1 DER tag-length-value codec.
//!
//! [DerObject] is the parsed form of a single TLV. Primitive values hold
//! their content bytes; constructed values hold their child objects.
//!
//! Decoding accepts non-minimal long-form lengths (common in the wild)
//! but rejects indefinite lengths, truncated values, and constructed
//! content whose children don't consume exactly the declared length.
//! Encoding always produces canonical DER: minimal length octets, SET
//! children sorted by their encoded bytes, and BOOLEAN TRUE as 0xFF.

use {
    crate::{oid::Oid, X509DerError as Error},
    bytes::Bytes,
    std::fmt::{Debug, Formatter},
};

/// Nesting bound for constructed values. Real X.509/PKCS structures stay
/// far below this; crafted input must not be able to exhaust the stack.
const MAX_NESTING: usize = 64;

/// ASN.1 tag class.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

/// An ASN.1 tag: class, constructed bit, and tag number.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Tag {
    pub class: Class,
    pub constructed: bool,
    pub number: u32,
}

impl Tag {
    pub const BOOLEAN: Self = Self::universal(1);
    pub const INTEGER: Self = Self::universal(2);
    pub const BIT_STRING: Self = Self::universal(3);
    pub const OCTET_STRING: Self = Self::universal(4);
    pub const NULL: Self = Self::universal(5);
    pub const OBJECT_IDENTIFIER: Self = Self::universal(6);
    pub const UTF8_STRING: Self = Self::universal(12);
    pub const PRINTABLE_STRING: Self = Self::universal(19);
    pub const T61_STRING: Self = Self::universal(20);
    pub const IA5_STRING: Self = Self::universal(22);
    pub const UTC_TIME: Self = Self::universal(23);
    pub const GENERALIZED_TIME: Self = Self::universal(24);
    pub const BMP_STRING: Self = Self::universal(30);

    pub const SEQUENCE: Self = Self {
        class: Class::Universal,
        constructed: true,
        number: 16,
    };
    pub const SET: Self = Self {
        class: Class::Universal,
        constructed: true,
        number: 17,
    };

    const fn universal(number: u32) -> Self {
        Self {
            class: Class::Universal,
            constructed: false,
            number,
        }
    }

    /// Context-specific constructed tag `[n]`.
    pub const fn context(number: u32) -> Self {
        Self {
            class: Class::Context,
            constructed: true,
            number,
        }
    }

    /// Context-specific primitive tag `[n]` (IMPLICIT over a primitive type).
    pub const fn context_primitive(number: u32) -> Self {
        Self {
            class: Class::Context,
            constructed: false,
            number,
        }
    }

    /// Name of a recognized universal tag, if any.
    pub fn name(&self) -> Option<&'static str> {
        if self.class != Class::Universal {
            return None;
        }

        Some(match self.number {
            1 => "BOOLEAN",
            2 => "INTEGER",
            3 => "BIT STRING",
            4 => "OCTET STRING",
            5 => "NULL",
            6 => "OBJECT IDENTIFIER",
            12 => "UTF8String",
            16 => "SEQUENCE",
            17 => "SET",
            19 => "PrintableString",
            20 => "T61String",
            22 => "IA5String",
            23 => "UTCTime",
            24 => "GeneralizedTime",
            30 => "BMPString",
            _ => return None,
        })
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.name() {
            f.write_str(name)
        } else {
            let class = match self.class {
                Class::Universal => "UNIVERSAL ",
                Class::Application => "APPLICATION ",
                Class::Context => "",
                Class::Private => "PRIVATE ",
            };
            let constructed = if self.constructed { "+" } else { "" };
            write!(f, "[{}{}{}]", class, self.number, constructed)
        }
    }
}

/// Content of a DER object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DerValue {
    Primitive(Bytes),
    Constructed(Vec<DerObject>),
}

/// A single decoded DER tag-length-value.
#[derive(Clone, Eq, PartialEq)]
pub struct DerObject {
    tag: Tag,
    value: DerValue,
}

impl Debug for DerObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            DerValue::Primitive(bytes) => {
                write!(f, "{:?}(", self.tag)?;
                for b in bytes.iter() {
                    write!(f, "{:02x}", b)?;
                }
                f.write_str(")")
            }
            DerValue::Constructed(children) => {
                write!(f, "{:?}", self.tag)?;
                f.debug_list().entries(children).finish()
            }
        }
    }
}

impl DerObject {
    /// Decode exactly one TLV from `data`.
    ///
    /// Trailing bytes after the value are an error.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let (obj, used) = Self::decode_prefix(data)?;

        if used != data.len() {
            return Err(Error::malformed(format!(
                "{} trailing bytes after value",
                data.len() - used
            )));
        }

        Ok(obj)
    }

    /// Decode one TLV from the front of `data`, returning the object and
    /// the number of bytes consumed.
    pub fn decode_prefix(data: &[u8]) -> Result<(Self, usize), Error> {
        parse_tlv(data, 0)
    }

    /// Encode this object as canonical DER.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }

    pub fn encode_to(&self, out: &mut Vec<u8>) {
        let content = match &self.value {
            DerValue::Primitive(bytes) => bytes.to_vec(),
            DerValue::Constructed(children) => {
                let mut encoded = children.iter().map(|c| c.encode()).collect::<Vec<_>>();

                // DER orders SET-of members by their encoded octets.
                // Decoded order is preserved in memory; the sort happens
                // only when emitting.
                if self.tag == Tag::SET {
                    encoded.sort();
                }

                encoded.concat()
            }
        };

        encode_tag(self.tag, out);
        encode_length(content.len(), out);
        out.extend_from_slice(&content);
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn value(&self) -> &DerValue {
        &self.value
    }

    // Constructors.

    pub fn primitive(tag: Tag, content: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: DerValue::Primitive(content.into()),
        }
    }

    pub fn constructed(tag: Tag, children: Vec<DerObject>) -> Self {
        Self {
            tag,
            value: DerValue::Constructed(children),
        }
    }

    pub fn sequence(children: Vec<DerObject>) -> Self {
        Self::constructed(Tag::SEQUENCE, children)
    }

    pub fn set(children: Vec<DerObject>) -> Self {
        Self::constructed(Tag::SET, children)
    }

    /// EXPLICIT `[n]` wrapper around a single child.
    pub fn explicit(number: u32, child: DerObject) -> Self {
        Self::constructed(Tag::context(number), vec![child])
    }

    pub fn null() -> Self {
        Self::primitive(Tag::NULL, Bytes::new())
    }

    pub fn boolean(value: bool) -> Self {
        Self::primitive(Tag::BOOLEAN, vec![if value { 0xff } else { 0x00 }])
    }

    /// INTEGER from a native value.
    pub fn integer(value: i64) -> Self {
        let bytes = value.to_be_bytes();

        // Minimal two's complement form: drop redundant leading octets.
        let mut start = 0;
        while start < 7 {
            let drop = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
            if !drop {
                break;
            }
            start += 1;
        }

        Self::primitive(Tag::INTEGER, bytes[start..].to_vec())
    }

    /// INTEGER from an unsigned big-endian magnitude.
    pub fn integer_from_unsigned(magnitude: &[u8]) -> Self {
        let stripped = strip_leading_zeros(magnitude);

        let mut content = Vec::with_capacity(stripped.len() + 1);
        if stripped.is_empty() || stripped[0] & 0x80 != 0 {
            content.push(0x00);
        }
        content.extend_from_slice(stripped);

        Self::primitive(Tag::INTEGER, content)
    }

    pub fn octet_string(content: impl Into<Bytes>) -> Self {
        Self::primitive(Tag::OCTET_STRING, content)
    }

    /// BIT STRING with the given count of unused trailing bits.
    pub fn bit_string(unused_bits: u8, content: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(content.len() + 1);
        bytes.push(unused_bits);
        bytes.extend_from_slice(content);

        Self::primitive(Tag::BIT_STRING, bytes)
    }

    pub fn oid(oid: &Oid) -> Self {
        Self::primitive(Tag::OBJECT_IDENTIFIER, oid.der_content())
    }

    pub fn utf8_string(value: &str) -> Self {
        Self::primitive(Tag::UTF8_STRING, value.as_bytes().to_vec())
    }

    pub fn printable_string(value: &str) -> Self {
        Self::primitive(Tag::PRINTABLE_STRING, value.as_bytes().to_vec())
    }

    pub fn ia5_string(value: &str) -> Self {
        Self::primitive(Tag::IA5_STRING, value.as_bytes().to_vec())
    }

    /// BMPString (UTF-16BE), used by PKCS#12 friendly names.
    pub fn bmp_string(value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() * 2);
        for unit in value.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }

        Self::primitive(Tag::BMP_STRING, bytes)
    }

    // Accessors.

    /// Child objects of a constructed value.
    pub fn children(&self) -> Result<&[DerObject], Error> {
        match &self.value {
            DerValue::Constructed(children) => Ok(children),
            DerValue::Primitive(_) => Err(Error::malformed(format!(
                "{:?} is primitive, expected constructed",
                self.tag
            ))),
        }
    }

    /// Content bytes of a primitive value.
    pub fn primitive_bytes(&self) -> Result<&Bytes, Error> {
        match &self.value {
            DerValue::Primitive(bytes) => Ok(bytes),
            DerValue::Constructed(_) => Err(Error::malformed(format!(
                "{:?} is constructed, expected primitive",
                self.tag
            ))),
        }
    }

    fn expect_tag(&self, tag: Tag) -> Result<&Self, Error> {
        if self.tag == tag {
            Ok(self)
        } else {
            Err(Error::malformed(format!(
                "expected {:?}, found {:?}",
                tag, self.tag
            )))
        }
    }

    pub fn as_sequence(&self) -> Result<&[DerObject], Error> {
        self.expect_tag(Tag::SEQUENCE)?.children()
    }

    pub fn as_set(&self) -> Result<&[DerObject], Error> {
        self.expect_tag(Tag::SET)?.children()
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        let bytes = self.expect_tag(Tag::BOOLEAN)?.primitive_bytes()?;

        if bytes.len() != 1 {
            return Err(Error::malformed("BOOLEAN content must be one byte"));
        }

        Ok(bytes[0] != 0x00)
    }

    /// Raw INTEGER content (big-endian two's complement).
    pub fn as_integer_bytes(&self) -> Result<&Bytes, Error> {
        self.expect_tag(Tag::INTEGER)?.primitive_bytes()
    }

    /// INTEGER as a non-negative native value.
    pub fn as_u64(&self) -> Result<u64, Error> {
        let bytes = self.as_integer_bytes()?;

        if bytes.is_empty() {
            return Err(Error::malformed("INTEGER content is empty"));
        }
        if bytes[0] & 0x80 != 0 {
            return Err(Error::malformed("INTEGER is negative"));
        }

        let magnitude = strip_leading_zeros(bytes);
        if magnitude.len() > 8 {
            return Err(Error::malformed("INTEGER too large for u64"));
        }

        let mut value = 0u64;
        for b in magnitude {
            value = value << 8 | u64::from(*b);
        }

        Ok(value)
    }

    pub fn as_oid(&self) -> Result<Oid, Error> {
        Oid::from_der_content(self.expect_tag(Tag::OBJECT_IDENTIFIER)?.primitive_bytes()?)
    }

    pub fn as_octet_string(&self) -> Result<&Bytes, Error> {
        self.expect_tag(Tag::OCTET_STRING)?.primitive_bytes()
    }

    /// BIT STRING content with the unused-bits octet stripped.
    ///
    /// Only byte-aligned strings (zero unused bits) are supported, which
    /// covers every X.509 use this crate has.
    pub fn as_bit_string(&self) -> Result<Bytes, Error> {
        let bytes = self.expect_tag(Tag::BIT_STRING)?.primitive_bytes()?;

        if bytes.is_empty() {
            return Err(Error::malformed("BIT STRING content is empty"));
        }
        if bytes[0] != 0 {
            return Err(Error::malformed("BIT STRING with unused bits"));
        }

        Ok(bytes.slice(1..))
    }

    pub fn is_null(&self) -> bool {
        self.tag == Tag::NULL
    }

    /// Decode any of the recognized character string types.
    pub fn as_string(&self) -> Result<String, Error> {
        let bytes = self.primitive_bytes()?;

        match self.tag {
            Tag::UTF8_STRING => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::malformed("UTF8String contains invalid UTF-8")),
            Tag::PRINTABLE_STRING | Tag::IA5_STRING => {
                if bytes.iter().any(|b| !b.is_ascii()) {
                    return Err(Error::malformed(format!(
                        "{:?} contains non-ASCII bytes",
                        self.tag
                    )));
                }
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            // T.61 is treated as Latin-1, the nearly universal practice.
            Tag::T61_STRING => Ok(bytes.iter().map(|&b| b as char).collect()),
            Tag::BMP_STRING => {
                if bytes.len() % 2 != 0 {
                    return Err(Error::malformed("BMPString has odd length"));
                }
                let units = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect::<Vec<_>>();
                String::from_utf16(&units).map_err(|_| Error::malformed("BMPString invalid UTF-16"))
            }
            _ => Err(Error::malformed(format!(
                "{:?} is not a character string type",
                self.tag
            ))),
        }
    }
}

/// Strip leading zero octets, keeping at least one octet.
pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    while start + 1 < bytes.len() && bytes[start] == 0 {
        start += 1;
    }
    &bytes[start..]
}

fn parse_tlv(data: &[u8], depth: usize) -> Result<(DerObject, usize), Error> {
    if depth > MAX_NESTING {
        return Err(Error::malformed("constructed values nested too deeply"));
    }

    let (tag, tag_len) = parse_tag(data)?;
    let (length, len_len) = parse_length(&data[tag_len..])?;

    let header = tag_len + len_len;
    let end = header
        .checked_add(length)
        .ok_or_else(|| Error::malformed("length overflows"))?;

    if data.len() < end {
        return Err(Error::malformed(format!(
            "value truncated: need {} content bytes, have {}",
            length,
            data.len() - header
        )));
    }

    let content = &data[header..end];

    let value = if tag.constructed {
        let mut children = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let (child, used) = parse_tlv(&content[pos..], depth + 1)?;
            children.push(child);
            pos += used;
        }

        DerValue::Constructed(children)
    } else {
        DerValue::Primitive(Bytes::copy_from_slice(content))
    };

    Ok((DerObject { tag, value }, end))
}

fn parse_tag(data: &[u8]) -> Result<(Tag, usize), Error> {
    let first = *data
        .first()
        .ok_or_else(|| Error::malformed("empty input"))?;

    let class = match first >> 6 {
        0 => Class::Universal,
        1 => Class::Application,
        2 => Class::Context,
        _ => Class::Private,
    };
    let constructed = first & 0x20 != 0;

    if first & 0x1f != 0x1f {
        return Ok((
            Tag {
                class,
                constructed,
                number: u32::from(first & 0x1f),
            },
            1,
        ));
    }

    // High tag number: base-128 continuation bytes.
    let mut number = 0u32;
    let mut used = 1;
    loop {
        let b = *data
            .get(used)
            .ok_or_else(|| Error::malformed("tag truncated"))?;
        used += 1;

        if number > u32::MAX >> 7 {
            return Err(Error::malformed("tag number too large"));
        }
        number = number << 7 | u32::from(b & 0x7f);

        if b & 0x80 == 0 {
            break;
        }
    }

    Ok((
        Tag {
            class,
            constructed,
            number,
        },
        used,
    ))
}

fn parse_length(data: &[u8]) -> Result<(usize, usize), Error> {
    let first = *data
        .first()
        .ok_or_else(|| Error::malformed("length truncated"))?;

    if first < 0x80 {
        return Ok((usize::from(first), 1));
    }

    if first == 0x80 {
        return Err(Error::malformed("indefinite length is not valid DER"));
    }

    let count = usize::from(first & 0x7f);
    if count > 8 {
        return Err(Error::malformed("length field too long"));
    }
    if data.len() < 1 + count {
        return Err(Error::malformed("length truncated"));
    }

    // Non-minimal long-form lengths are accepted on decode.
    let mut length = 0u64;
    for b in &data[1..1 + count] {
        length = length << 8 | u64::from(*b);
    }

    let length =
        usize::try_from(length).map_err(|_| Error::malformed("length exceeds address space"))?;

    Ok((length, 1 + count))
}

fn encode_tag(tag: Tag, out: &mut Vec<u8>) {
    let mut first = match tag.class {
        Class::Universal => 0x00,
        Class::Application => 0x40,
        Class::Context => 0x80,
        Class::Private => 0xc0,
    };
    if tag.constructed {
        first |= 0x20;
    }

    if tag.number < 0x1f {
        out.push(first | tag.number as u8);
        return;
    }

    out.push(first | 0x1f);

    let mut shift = (31 - tag.number.leading_zeros()) / 7 * 7;
    while shift > 0 {
        out.push(0x80 | (tag.number >> shift & 0x7f) as u8);
        shift -= 7;
    }
    out.push((tag.number & 0x7f) as u8);
}

fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }

    let bytes = (length as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();

    out.push(0x80 | (8 - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}
