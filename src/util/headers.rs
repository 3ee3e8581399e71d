/*
   Copyright 2020 Ilya Grishkov

   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

       http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
*/

//! Decoders for the fixed part of IPv4, ICMP and UDP headers.
//!
//! All multi-byte fields are big-endian on the wire and are returned as native
//! integers. Checksums are extracted but never verified.

use crate::error::ParseError;
use std::fmt;

/// Minimum IPv4 header length in bytes
pub const IPV4_HEADER_LEN: usize = 20;
/// ICMP type, code and checksum
pub const ICMP_HEADER_LEN: usize = 4;
/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

/// Offset of the original datagram quoted inside Time Exceeded and
/// Destination Unreachable messages.
pub(crate) const ICMP_QUOTE_OFFSET: usize = 8;

/// Decoded IPv4 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// Length in bytes, not the raw IHL nibble
    pub header_len: u8,
    pub tos: u8,
    /// Total length of the packet
    pub length: u16,
    pub id: u16,
    pub flags: u8,
    pub frag_offset: u16,
    pub ttl: u8,
    pub proto: u8,
    pub cksum: u16,
    pub src: String,
    pub dst: String,
}

/// Decoded ICMP header, without the message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub cksum: u16,
}

/// Decoded UDP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub len: u16,
    pub cksum: u16,
}

/// Reads the big-endian 16-bit value at `offset`. Callers check the length first.
pub(crate) fn read_u16_be(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

fn ensure_len(header: &'static str, buffer: &[u8], needed: usize) -> Result<(), ParseError> {
    if buffer.len() < needed {
        return Err(ParseError::TooShort {
            header,
            needed,
            got: buffer.len(),
        });
    }
    Ok(())
}

fn dotted_decimal(octets: &[u8]) -> String {
    octets
        .iter()
        .map(|octet| octet.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

impl Ipv4Header {
    /// Decodes the first 20 bytes of `buffer`. Options are not interpreted.
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        ensure_len("IPv4", buffer, IPV4_HEADER_LEN)?;

        let flags_and_offset = read_u16_be(buffer, 6);

        Ok(Ipv4Header {
            version: buffer[0] >> 4,
            header_len: (buffer[0] & 0x0F) * 4,
            tos: buffer[1],
            length: read_u16_be(buffer, 2),
            id: read_u16_be(buffer, 4),
            flags: (flags_and_offset >> 13) as u8,
            frag_offset: flags_and_offset & 0x1FFF,
            ttl: buffer[8],
            proto: buffer[9],
            cksum: read_u16_be(buffer, 10),
            src: dotted_decimal(&buffer[12..16]),
            dst: dotted_decimal(&buffer[16..20]),
        })
    }

    /// Bytes following this header in `buffer`, empty if `header_len` runs past the end
    pub fn payload<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        buffer.get(self.header_len as usize..).unwrap_or(&[])
    }
}

impl IcmpHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        ensure_len("ICMP", buffer, ICMP_HEADER_LEN)?;

        Ok(IcmpHeader {
            icmp_type: buffer[0],
            code: buffer[1],
            cksum: read_u16_be(buffer, 2),
        })
    }
}

impl UdpHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        ensure_len("UDP", buffer, UDP_HEADER_LEN)?;

        Ok(UdpHeader {
            src_port: read_u16_be(buffer, 0),
            dst_port: read_u16_be(buffer, 2),
            len: read_u16_be(buffer, 4),
            cksum: read_u16_be(buffer, 6),
        })
    }
}

impl fmt::Display for Ipv4Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv{} (tos 0x{:x}, ttl {}, id {}, flags 0x{:x}, offset {}, proto {}, header_len {}, len {}, cksum 0x{:x}) {} > {}",
            self.version,
            self.tos,
            self.ttl,
            self.id,
            self.flags,
            self.frag_offset,
            self.proto,
            self.header_len,
            self.length,
            self.cksum,
            self.src,
            self.dst
        )
    }
}

impl fmt::Display for IcmpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ICMP (type {}, code {}, cksum 0x{:x})",
            self.icmp_type, self.code, self.cksum
        )
    }
}

impl fmt::Display for UdpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UDP (src_port {}, dst_port {}, len {}, cksum 0x{:x})",
            self.src_port, self.dst_port, self.len, self.cksum
        )
    }
}
