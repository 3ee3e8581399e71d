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

//! # hoptrace
//! `hoptrace` discovers the routers between this host and a destination by sending
//! UDP probes with increasing TTL and decoding the ICMP errors routers send back.
//!
//! ## Features
//! For every TTL the engine fires a fixed number of probes, then polls the receive
//! side once per attempt without waiting. Responders are recorded by the source
//! address of the returned IPv4 packet, deduplicated in first-seen order. The trace
//! stops at the first hop that includes the destination, or after the maximum
//! number of hops. The following parameters are configurable:
//! - Port
//! - Maximum number of hops
//! - Number of queries per hop
//! - Probe payload
//!
//! Sockets are abstracted behind [`util::Transport`], so the engine runs equally
//! against [`util::Channel`] (a UDP send socket plus a raw ICMP receive socket,
//! which requires root) or any scripted implementation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hoptrace::{Config, Traceroute};
//! use hoptrace::util::Channel;
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let destination_ip = Ipv4Addr::new(93, 184, 216, 34);  // example.com
//!     let channel = Channel::new(None, Duration::from_millis(50))?;
//!
//!     let mut traceroute_query = Traceroute::new(destination_ip, Config::default()
//!         .with_max_hops(20)
//!         .with_number_of_queries(2), channel);
//!
//!     let route = traceroute_query.perform_traceroute(&mut |ttl: u8, responders: &[String]| {
//!         println!("{}: {}", ttl, responders.join(" "));
//!     });
//!     println!("{} hops", route.len());
//!     Ok(())
//! }
//! ```

/// Header decoding and transport errors
pub mod error;
/// Transport, interfaces, name resolution and header decoding
pub mod util;

use crate::util::headers::{IcmpHeader, Ipv4Header, UdpHeader, ICMP_QUOTE_OFFSET};
use crate::util::Transport;
use log::{debug, trace, warn};
use std::net::Ipv4Addr;

pub use crate::error::{ParseError, TransportError};

/// Highest TTL probed by default
pub const MAX_TTL: u8 = 30;
/// Cisco-style traceroute destination port
pub const TRACEROUTE_PORT: u16 = 33434;
/// Probes sent, and receive attempts made, per TTL
pub const PROBE_ATTEMPT_COUNT: u32 = 3;
/// Marker carried by every probe
pub const PROBE_PAYLOAD: &[u8] = b"dataPacket";

/// Traceroute instance containing destination address, configuration and transport
pub struct Traceroute<T: Transport> {
    addr: Ipv4Addr,
    config: Config,
    transport: T,
    ttl: u16,
    done: bool,
}

/// Traceroute configurations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    port: u16,
    max_hops: u8,
    number_of_queries: u32,
    payload: Vec<u8>,
}

/// Responders discovered for a single TTL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerouteHop {
    /// Time-To-Live the probes were sent with
    pub ttl: u8,
    /// Source addresses of the replies, first-seen order, no duplicates.
    /// Empty when nothing answered.
    pub responders: Vec<String>,
}

/// Receives each hop as soon as it has been probed
pub trait HopReporter {
    fn report_hop(&mut self, ttl: u8, responders: &[String]);
}

impl<F> HopReporter for F
where
    F: FnMut(u8, &[String]),
{
    fn report_hop(&mut self, ttl: u8, responders: &[String]) {
        self(ttl, responders)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: TRACEROUTE_PORT,
            max_hops: MAX_TTL,
            number_of_queries: PROBE_ATTEMPT_COUNT,
            payload: PROBE_PAYLOAD.to_vec(),
        }
    }
}

impl Config {
    /// Builder: Destination port of every probe
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder: Maximum number of hops. At least one hop is always probed
    pub fn with_max_hops(mut self, max_hops: u8) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    /// Builder: Number of probes sent, and receive attempts made, per hop
    pub fn with_number_of_queries(mut self, number_of_queries: u32) -> Self {
        self.number_of_queries = number_of_queries;
        self
    }

    /// Builder: Payload carried by every probe
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Destination port of every probe
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Highest TTL that will be probed
    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }

    /// Probes sent, and receive attempts made, per hop
    pub fn number_of_queries(&self) -> u32 {
        self.number_of_queries
    }

    /// Payload carried by every probe
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl TracerouteHop {
    /// Whether `addr` answered at this hop
    pub fn contains(&self, addr: &str) -> bool {
        self.responders.iter().any(|responder| responder == addr)
    }
}

impl<T: Transport> Iterator for Traceroute<T> {
    type Item = TracerouteHop;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.ttl > u16::from(self.config.max_hops) {
            return None;
        }

        let hop = self.calculate_next_hop();
        self.done = hop.contains(&self.addr.to_string());
        if self.done {
            debug!("destination {} reached at ttl {}", self.addr, hop.ttl);
        }
        Some(hop)
    }
}

impl<T: Transport> Traceroute<T> {
    /// Creates new instance of Traceroute
    pub fn new(addr: Ipv4Addr, config: Config, transport: T) -> Self {
        Traceroute {
            addr,
            config,
            transport,
            ttl: 1,
            done: false,
        }
    }

    /// Probes every remaining hop, reporting each one, and returns them all.
    /// Hop `i` of the result was probed with TTL `i + 1`.
    pub fn perform_traceroute<R>(&mut self, reporter: &mut R) -> Vec<TracerouteHop>
    where
        R: HopReporter + ?Sized,
    {
        let mut hops = Vec::<TracerouteHop>::new();
        while let Some(hop) = self.next() {
            reporter.report_hop(hop.ttl, &hop.responders);
            hops.push(hop);
        }
        hops
    }

    /// Gives back the transport, e.g. to inspect a scripted one
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Probes the current TTL and advances to the next one
    fn calculate_next_hop(&mut self) -> TracerouteHop {
        let ttl = self.ttl as u8;
        self.ttl += 1;

        self.send_probes(ttl);
        let responders = self.collect_responders(ttl);
        debug!("ttl {}: {} responder(s)", ttl, responders.len());

        TracerouteHop { ttl, responders }
    }

    /// Fires all probes for `ttl` without waiting for replies
    fn send_probes(&mut self, ttl: u8) {
        if let Err(e) = self.transport.set_ttl(ttl) {
            warn!("unable to set ttl {}, skipping probes: {}", ttl, e);
            return;
        }

        for _ in 0..self.config.number_of_queries {
            let sent = self
                .transport
                .send_datagram(&self.config.payload, self.addr, self.config.port);
            if let Err(e) = sent {
                warn!("probe with ttl {} to {}:{} failed: {}", ttl, self.addr, self.config.port, e);
            }
        }
    }

    /// Collects distinct responders. Stops at the first empty poll, failed
    /// receive or undecodable packet.
    fn collect_responders(&mut self, ttl: u8) -> Vec<String> {
        let mut responders = Vec::<String>::new();

        for attempt in 0..self.config.number_of_queries {
            if !self.transport.poll_readable() {
                debug!("ttl {}: nothing to read on attempt {}", ttl, attempt + 1);
                break;
            }

            let (buf, sender) = match self.transport.receive_datagram() {
                Ok(datagram) => datagram,
                Err(e) => {
                    warn!("ttl {}: receive failed: {}", ttl, e);
                    break;
                }
            };

            let header = match Ipv4Header::parse(&buf) {
                Ok(header) => header,
                Err(e) => {
                    debug!("ttl {}: dropping packet from {}: {}", ttl, sender, e);
                    break;
                }
            };
            trace_reply(ttl, &header, &buf);

            if !responders.contains(&header.src) {
                responders.push(header.src);
            }
        }

        responders
    }
}

/// Logs the ICMP header and the quoted probe header of a reply, if present
fn trace_reply(ttl: u8, header: &Ipv4Header, buf: &[u8]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }
    trace!("ttl {}: {}", ttl, header);

    let icmp = header.payload(buf);
    if let Ok(icmp_header) = IcmpHeader::parse(icmp) {
        trace!("ttl {}:   {}", ttl, icmp_header);
    }

    let quoted = icmp.get(ICMP_QUOTE_OFFSET..).unwrap_or(&[]);
    if let Ok(inner) = Ipv4Header::parse(quoted) {
        if let Ok(udp) = UdpHeader::parse(inner.payload(quoted)) {
            trace!("ttl {}:   quoted {}", ttl, udp);
        }
    }
}
