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

extern crate pnet;

/// Header decoders for IPv4, ICMP and UDP
pub mod headers;

use crate::error::TransportError;
use log::{debug, warn};
use pnet::datalink::{MacAddr, NetworkInterface};
use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Large enough for any ICMP error quoting a probe
const RECV_BUFFER_SIZE: usize = 1500;
/// Dynamic/private ports the send socket binds to
const SOURCE_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Send and receive side of a trace
pub trait Transport {
    /// Sets the TTL used by subsequent sends
    fn set_ttl(&mut self, ttl: u8) -> Result<(), TransportError>;

    /// Best-effort send of one probe
    fn send_datagram(
        &mut self,
        payload: &[u8],
        destination: Ipv4Addr,
        port: u16,
    ) -> Result<(), TransportError>;

    /// Returns immediately; true iff a datagram can be received right now
    fn poll_readable(&mut self) -> bool;

    /// Returns the pending datagram and its sender
    fn receive_datagram(&mut self) -> Result<(Vec<u8>, IpAddr), TransportError>;
}

/// UDP send socket paired with a raw ICMPv4 receive socket
pub struct Channel {
    send_socket: Socket,
    recv_socket: Socket,
    pending: Pending,
}

/// Datagram read by a poll and held until it is received
#[derive(Debug, Default)]
struct Pending(Option<(Vec<u8>, IpAddr)>);

impl Pending {
    /// Reports whether a datagram is held, reading one with `recv` if not.
    /// A drained socket or a failed read counts as not ready.
    fn poll_with<F>(&mut self, recv: F) -> bool
    where
        F: FnOnce() -> io::Result<(Vec<u8>, IpAddr)>,
    {
        if self.0.is_some() {
            return true;
        }
        match recv() {
            Ok(datagram) => {
                self.0 = Some(datagram);
                true
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                false
            }
            Err(e) => {
                warn!("receive socket error: {}", e);
                false
            }
        }
    }

    fn take(&mut self) -> Result<(Vec<u8>, IpAddr), TransportError> {
        self.0.take().ok_or(TransportError::NothingPending)
    }
}

impl Channel {
    /// Opens both sockets. `poll_wait` of zero makes every poll a single
    /// non-blocking check; anything else bounds each poll by that duration.
    /// The raw receive socket needs root or CAP_NET_RAW.
    pub fn new(
        interface: Option<&NetworkInterface>,
        poll_wait: Duration,
    ) -> Result<Self, TransportError> {
        let source_ip = match interface {
            Some(interface) => interface_ipv4(interface)?,
            None => Ipv4Addr::UNSPECIFIED,
        };

        let send_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        let source_port = rand::thread_rng().gen_range(SOURCE_PORTS);
        send_socket.bind(&SockAddr::from(SocketAddrV4::new(source_ip, source_port)))?;

        let recv_socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        if poll_wait.is_zero() {
            recv_socket.set_nonblocking(true)?;
        } else {
            recv_socket.set_nonblocking(false)?;
            recv_socket.set_read_timeout(Some(poll_wait))?;
        }

        debug!("probing from {}:{}, poll wait {:?}", source_ip, source_port, poll_wait);

        Ok(Channel {
            send_socket,
            recv_socket,
            pending: Pending::default(),
        })
    }

}

fn try_recv(socket: &Socket) -> io::Result<(Vec<u8>, IpAddr)> {
    let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];
    let (len, addr) = socket.recv_from(&mut buf)?;
    // SAFETY: recv_from initialised the first `len` bytes
    let data = buf[..len].iter().map(|b| unsafe { b.assume_init() }).collect();
    let sender = addr
        .as_socket()
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    Ok((data, sender))
}

impl Transport for Channel {
    fn set_ttl(&mut self, ttl: u8) -> Result<(), TransportError> {
        self.send_socket.set_ttl(ttl as u32)?;
        Ok(())
    }

    fn send_datagram(
        &mut self,
        payload: &[u8],
        destination: Ipv4Addr,
        port: u16,
    ) -> Result<(), TransportError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(destination, port));
        self.send_socket.send_to(payload, &SockAddr::from(addr))?;
        Ok(())
    }

    fn poll_readable(&mut self) -> bool {
        let recv_socket = &self.recv_socket;
        self.pending.poll_with(|| try_recv(recv_socket))
    }

    fn receive_datagram(&mut self) -> Result<(Vec<u8>, IpAddr), TransportError> {
        self.pending.take()
    }
}

fn interface_ipv4(interface: &NetworkInterface) -> Result<Ipv4Addr, TransportError> {
    interface
        .ips
        .iter()
        .find_map(|network| match network.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| TransportError::NoIpv4Address(interface.name.clone()))
}

/// Returns the list of interfaces that are up, not loopback,
/// and have an IPv4 address associated with them.
pub fn get_available_interfaces() -> Vec<NetworkInterface> {
    pnet::datalink::interfaces()
        .into_iter()
        .filter(|e| {
            e.is_up()
                && !e.is_loopback()
                && e.ips.iter().any(|ip| ip.is_ipv4())
                && e.mac.map_or(true, |mac| mac != MacAddr::zero())
        })
        .collect()
}

/// Looks up an available interface by name
pub fn find_interface(name: &str) -> Result<NetworkInterface, TransportError> {
    get_available_interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| TransportError::NoSuchInterface(name.to_string()))
}

/// Resolves `host` (a name or a dotted-decimal address) to its first IPv4 address
pub fn resolve_host(host: &str) -> Result<Ipv4Addr, TransportError> {
    (host, 0)
        .to_socket_addrs()
        .map_err(|_| TransportError::Unresolvable(host.to_string()))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| TransportError::Unresolvable(host.to_string()))
}
