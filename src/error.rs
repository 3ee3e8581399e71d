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

use thiserror::Error;

/// Header decoding failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is shorter than the fixed part of the header
    #[error("{header} header needs at least {needed} bytes, got {got}")]
    TooShort {
        header: &'static str,
        needed: usize,
        got: usize,
    },
}

/// Failure in the send/receive side of a trace
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no datagram pending on the receive socket")]
    NothingPending,
    #[error("could not resolve {0} to an IPv4 address")]
    Unresolvable(String),
    #[error("no such interface: {0}")]
    NoSuchInterface(String),
    #[error("interface {0} has no IPv4 address")]
    NoIpv4Address(String),
}
