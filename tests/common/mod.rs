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

#![allow(dead_code)]

use hoptrace::util::Transport;
use hoptrace::TransportError;
use pnet::packet::icmp::{IcmpCode, IcmpType, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::udp::MutableUdpPacket;
use pnet::packet::MutablePacket;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};

pub const PROBER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);

/// Builds the ICMP error `router` sends back for a UDP probe to `destination`,
/// as it arrives on a raw ICMP socket: IPv4 + ICMP + quoted IPv4 + UDP.
pub fn build_icmp_reply(
    router: Ipv4Addr,
    destination: Ipv4Addr,
    icmp_type: IcmpType,
    port: u16,
) -> Vec<u8> {
    let mut buf = vec![0u8; 56];
    {
        let mut outer = MutableIpv4Packet::new(&mut buf[..]).unwrap();
        outer.set_version(4);
        outer.set_header_length(5);
        outer.set_total_length(56);
        outer.set_identification(0x1c46);
        outer.set_ttl(250);
        outer.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        outer.set_source(router);
        outer.set_destination(PROBER);
        let checksum = pnet::packet::ipv4::checksum(&outer.to_immutable());
        outer.set_checksum(checksum);
    }
    {
        let mut quoted = MutableIpv4Packet::new(&mut buf[28..]).unwrap();
        quoted.set_version(4);
        quoted.set_header_length(5);
        quoted.set_total_length(28);
        quoted.set_ttl(1);
        quoted.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        quoted.set_source(PROBER);
        quoted.set_destination(destination);

        let mut udp = MutableUdpPacket::new(quoted.payload_mut()).unwrap();
        udp.set_source(50000);
        udp.set_destination(port);
        udp.set_length(18);
    }
    {
        let mut icmp = MutableIcmpPacket::new(&mut buf[20..]).unwrap();
        icmp.set_icmp_type(icmp_type);
        icmp.set_icmp_code(IcmpCode::new(0));
        let checksum = pnet::packet::icmp::checksum(&icmp.to_immutable());
        icmp.set_checksum(checksum);
    }
    buf
}

pub fn time_exceeded(router: Ipv4Addr, destination: Ipv4Addr) -> Vec<u8> {
    build_icmp_reply(router, destination, IcmpTypes::TimeExceeded, hoptrace::TRACEROUTE_PORT)
}

pub fn port_unreachable(destination: Ipv4Addr) -> Vec<u8> {
    build_icmp_reply(
        destination,
        destination,
        IcmpTypes::DestinationUnreachable,
        hoptrace::TRACEROUTE_PORT,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentProbe {
    pub ttl: u8,
    pub payload: Vec<u8>,
    pub destination: Ipv4Addr,
    pub port: u16,
}

/// In-memory transport: replies scripted per TTL become readable once the
/// TTL is set, and anything left over is dropped when the next TTL is set.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: HashMap<u8, Vec<Vec<u8>>>,
    inbox: VecDeque<Vec<u8>>,
    current_ttl: u8,
    pub sent: Vec<SentProbe>,
    pub ttls_set: Vec<u8>,
    pub polls: usize,
    pub fail_set_ttl: Vec<u8>,
    pub fail_receive: bool,
    pub fail_send: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn reply_at(mut self, ttl: u8, packet: Vec<u8>) -> Self {
        self.replies.entry(ttl).or_insert_with(Vec::new).push(packet);
        self
    }
}

impl Transport for ScriptedTransport {
    fn set_ttl(&mut self, ttl: u8) -> Result<(), TransportError> {
        self.ttls_set.push(ttl);
        self.inbox = self.replies.remove(&ttl).unwrap_or_default().into();
        if self.fail_set_ttl.contains(&ttl) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "setsockopt refused",
            )));
        }
        self.current_ttl = ttl;
        Ok(())
    }

    fn send_datagram(
        &mut self,
        payload: &[u8],
        destination: Ipv4Addr,
        port: u16,
    ) -> Result<(), TransportError> {
        // attempts are recorded whether or not they fail
        self.sent.push(SentProbe {
            ttl: self.current_ttl,
            payload: payload.to_vec(),
            destination,
            port,
        });
        if self.fail_send {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "network is unreachable",
            )));
        }
        Ok(())
    }

    fn poll_readable(&mut self) -> bool {
        self.polls += 1;
        !self.inbox.is_empty()
    }

    fn receive_datagram(&mut self) -> Result<(Vec<u8>, IpAddr), TransportError> {
        if self.fail_receive {
            return Err(TransportError::NothingPending);
        }
        let packet = self.inbox.pop_front().ok_or(TransportError::NothingPending)?;
        let sender = if packet.len() >= 16 {
            IpAddr::V4(Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]))
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        Ok((packet, sender))
    }
}
