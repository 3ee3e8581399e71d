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

extern crate hoptrace;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use hoptrace::util::{find_interface, resolve_host, Channel};
use hoptrace::{Config, Traceroute, MAX_TTL, PROBE_ATTEMPT_COUNT, TRACEROUTE_PORT};
use log::info;
use std::time::Duration;

/// Trace the route to a host with UDP probes of increasing TTL
#[derive(Parser, Debug)]
#[command(name = "hoptrace", author, version, about, long_about = None)]
struct Args {
    /// Destination host name or IPv4 address
    host: String,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-hops", default_value_t = MAX_TTL)]
    max_hops: u8,

    /// Destination port of the probes
    #[arg(short = 'p', long = "port", default_value_t = TRACEROUTE_PORT)]
    port: u16,

    /// Probes sent, and receive attempts made, per hop
    #[arg(short = 'q', long = "queries", default_value_t = PROBE_ATTEMPT_COUNT)]
    queries: u32,

    /// Send probes from this interface's IPv4 address
    #[arg(short = 'i', long = "interface")]
    interface: Option<String>,

    /// Payload carried by each probe
    #[arg(long = "payload", default_value = "dataPacket")]
    payload: String,

    /// How long each receive poll may wait, in milliseconds (0 = don't wait)
    #[arg(long = "poll-wait", default_value_t = 0)]
    poll_wait: u64,
}

fn print_hop(ttl: u8, responders: &[String]) {
    if responders.is_empty() {
        println!("{}: * * *", ttl);
    } else {
        println!("{}: {}", ttl, responders.join(" "));
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let destination = resolve_host(&args.host)?;
    println!("traceroute to {} ({})", args.host, destination);

    let interface = match &args.interface {
        Some(name) => Some(find_interface(name)?),
        None => None,
    };
    let channel = Channel::new(interface.as_ref(), Duration::from_millis(args.poll_wait))
        .context("unable to open probe sockets (raw ICMP needs root or CAP_NET_RAW)")?;

    let config = Config::default()
        .with_port(args.port)
        .with_max_hops(args.max_hops)
        .with_number_of_queries(args.queries)
        .with_payload(args.payload.as_bytes());

    let mut traceroute = Traceroute::new(destination, config, channel);
    let route = traceroute.perform_traceroute(&mut |ttl: u8, responders: &[String]| {
        print_hop(ttl, responders)
    });

    match route.last() {
        Some(hop) if hop.contains(&destination.to_string()) => {
            info!("reached {} in {} hops", destination, route.len())
        }
        _ => info!("{} not reached within {} hops", destination, route.len()),
    }

    Ok(())
}
