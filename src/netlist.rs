// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Accept/deny lists of IPv4 networks.
//!
//! A [`Netlist`] is an ordered list of network rules used to restrict
//! which clients are answered (`-a`) or logged (`-L`). The source
//! syntax is a comma-, semicolon-, or space-separated list of elements,
//! each a CIDR in short dot-notation or a hostname, optionally prefixed
//! with `!` to deny. Matching is first-match-wins, and an implicit
//! terminal rule with the inverse sense of the last explicit rule
//! decides everything left over, so `127.0.0.1,!127/8` admits localhost,
//! refuses the rest of the loopback net, and admits everyone else.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::ip4;

////////////////////////////////////////////////////////////////////////
// NETLISTS                                                           //
////////////////////////////////////////////////////////////////////////

/// An ordered accept/deny list of IPv4 networks.
#[derive(Clone, Debug)]
pub struct Netlist {
    rules: Vec<Rule>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Rule {
    net: u32,
    mask: u32,
    accept: bool,
}

impl Netlist {
    /// Parses a netlist from its source syntax. Hostname elements are
    /// resolved through the system resolver, producing one rule per
    /// address.
    pub fn parse(source: &str) -> Result<Self> {
        let mut rules = Vec::new();
        let mut accept = true;
        let separators = |c: char| c == ',' || c == ';' || c == ' ';
        for element in source.split(separators).filter(|e| !e.is_empty()) {
            let element = match element.strip_prefix('!') {
                Some(rest) => {
                    accept = false;
                    rest
                }
                None => {
                    accept = true;
                    element
                }
            };
            if element
                .bytes()
                .all(|b| b.is_ascii_digit() || b == b'.' || b == b'/')
            {
                let cidr = ip4::parse_cidr(element, true)
                    .map_err(|e| Error::InvalidNet(element.to_owned(), e))?;
                rules.push(Rule {
                    net: cidr.base,
                    mask: ip4::mask(cidr.bits),
                    accept,
                });
            } else {
                let (host, mask) = match element.split_once('/') {
                    Some((host, bits_part)) => {
                        let bits: u32 = bits_part
                            .parse()
                            .ok()
                            .filter(|b| (1..=32).contains(b))
                            .ok_or_else(|| Error::InvalidMask(element.to_owned()))?;
                        (host, ip4::mask(bits))
                    }
                    None => (element, u32::MAX),
                };
                let mut found = false;
                for addr in resolve(host)? {
                    rules.push(Rule {
                        net: addr & mask,
                        mask,
                        accept,
                    });
                    found = true;
                }
                if !found {
                    return Err(Error::UnknownHost(host.to_owned()));
                }
            }
        }
        // Whatever falls through gets the opposite of the last rule's
        // sense, so a deny-only list admits everything else.
        rules.push(Rule {
            net: 0,
            mask: 0,
            accept: !accept,
        });
        Ok(Self { rules })
    }

    /// Returns whether `addr` (host byte order) is accepted. The first
    /// matching rule decides.
    pub fn matches(&self, addr: u32) -> bool {
        self.rules
            .iter()
            .find(|r| addr & r.mask == r.net)
            .map(|r| r.accept)
            .unwrap_or(false)
    }
}

/// Resolves a hostname to its IPv4 addresses (host byte order).
fn resolve(host: &str) -> Result<Vec<u32>> {
    let addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|_| Error::UnknownHost(host.to_owned()))?;
    Ok(addrs
        .filter_map(|sa| match sa {
            SocketAddr::V4(v4) => Some(u32::from(*v4.ip())),
            SocketAddr::V6(_) => None,
        })
        .collect())
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a netlist could not be parsed.
#[derive(Clone, Debug)]
pub enum Error {
    InvalidNet(String, ip4::Error),
    InvalidMask(String),
    UnknownHost(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidNet(element, e) => write!(f, "invalid network range `{}': {}", element, e),
            Self::InvalidMask(element) => write!(f, "invalid mask in `{}'", element),
            Self::UnknownHost(host) => write!(f, "unknown host/net `{}'", host),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by [`Netlist::parse`].
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        let list = Netlist::parse("127.0.0.1,!127/8").unwrap();
        assert!(list.matches(0x7f000001));
        assert!(!list.matches(0x7f000002));
        assert!(list.matches(0x0a000001));
    }

    #[test]
    fn deny_only_list_admits_everything_else() {
        let list = Netlist::parse("!10/8").unwrap();
        assert!(!list.matches(0x0a123456));
        assert!(list.matches(0x7f000001));
    }

    #[test]
    fn accept_only_list_denies_everything_else() {
        let list = Netlist::parse("127/8").unwrap();
        assert!(list.matches(0x7f000001));
        assert!(!list.matches(0x0a000001));
    }

    #[test]
    fn alternate_separators_are_accepted() {
        let list = Netlist::parse("10/8; 192.168/16").unwrap();
        assert!(list.matches(0x0a000001));
        assert!(list.matches(0xc0a80101));
        assert!(!list.matches(0x08080808));
    }

    #[test]
    fn host_bits_in_netlist_nets_are_tolerated() {
        // -a 127.0.0.1/8 is common usage; the host bits are cleared.
        let list = Netlist::parse("127.0.0.1/8").unwrap();
        assert!(list.matches(0x7f123456));
    }

    #[test]
    fn bad_elements_are_rejected() {
        assert!(matches!(
            Netlist::parse("10//8"),
            Err(Error::InvalidNet(_, _)),
        ));
        assert!(matches!(
            Netlist::parse("300.1.2.3"),
            Err(Error::InvalidNet(_, _)),
        ));
    }
}
