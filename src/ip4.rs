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

//! IPv4 address, prefix, and range parsing.
//!
//! Addresses are plain [`u32`] values in host byte order everywhere in
//! this crate; conversion to network byte order happens only when
//! octets are written into a DNS message. The parsers here accept the
//! traditional blocklist short forms: `a.b.c.d`, `a.b.c`, `a.b`, and
//! `a`, each zero-filled on the right to 32 bits, with an optional
//! `/bits` prefix length. `10/8` therefore means `10.0.0.0/8`.

use std::fmt;

////////////////////////////////////////////////////////////////////////
// MASKS                                                              //
////////////////////////////////////////////////////////////////////////

/// Returns the network mask for a prefix of `bits` bits. `bits` must
/// be at most 32; `mask(0)` is zero.
pub fn mask(bits: u32) -> u32 {
    if bits == 0 {
        0
    } else {
        u32::MAX << (32 - bits)
    }
}

////////////////////////////////////////////////////////////////////////
// PARSED FORMS                                                       //
////////////////////////////////////////////////////////////////////////

/// A parsed CIDR prefix: the base address (host bits cleared) and the
/// prefix length in bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cidr {
    pub base: u32,
    pub bits: u32,
}

impl Cidr {
    /// Returns the first address of the prefix.
    pub fn first(&self) -> u32 {
        self.base
    }

    /// Returns the last address of the prefix.
    pub fn last(&self) -> u32 {
        self.base | !mask(self.bits)
    }
}

////////////////////////////////////////////////////////////////////////
// PARSERS                                                            //
////////////////////////////////////////////////////////////////////////

/// Parses an address in short dot-notation, returning the address and
/// the number of octets that were given. Missing trailing octets are
/// zero.
pub fn parse_addr(s: &str) -> Result<(u32, u32)> {
    let mut addr = 0u32;
    let mut n_octets = 0u32;
    for part in s.split('.') {
        if n_octets == 4 {
            return Err(Error::TooManyOctets);
        }
        let octet: u32 = part.parse().map_err(|_| Error::InvalidOctet)?;
        if octet > 255 {
            return Err(Error::InvalidOctet);
        }
        addr = (addr << 8) | octet;
        n_octets += 1;
    }
    Ok((addr << (8 * (4 - n_octets)), n_octets))
}

/// Parses a full dotted-quad address (all four octets required).
pub fn parse_full_addr(s: &str) -> Result<u32> {
    match parse_addr(s)? {
        (addr, 4) => Ok(addr),
        _ => Err(Error::NotFullAddr),
    }
}

/// Parses a CIDR prefix in short dot-notation with an optional `/bits`
/// suffix. When `/bits` is absent, the prefix length is eight times the
/// number of octets given, so a bare `127.0.0.2` is a host.
///
/// A base with host bits set is rejected unless `accept_in_cidr` is
/// set, in which case the host bits are cleared silently.
pub fn parse_cidr(s: &str, accept_in_cidr: bool) -> Result<Cidr> {
    let (addr_part, bits) = match s.split_once('/') {
        Some((addr_part, bits_part)) => {
            let bits: u32 = bits_part.parse().map_err(|_| Error::InvalidPrefixLen)?;
            if !(1..=32).contains(&bits) {
                return Err(Error::InvalidPrefixLen);
            }
            (addr_part, Some(bits))
        }
        None => (s, None),
    };
    let (addr, n_octets) = parse_addr(addr_part)?;
    let bits = bits.unwrap_or(8 * n_octets);
    if addr & !mask(bits) != 0 {
        if !accept_in_cidr {
            return Err(Error::HostBitsSet);
        }
        return Ok(Cidr {
            base: addr & mask(bits),
            bits,
        });
    }
    Ok(Cidr { base: addr, bits })
}

/// Parses an inclusive address range. The accepted forms are `a-b`
/// (both endpoints in short dot-notation, `a ≤ b`; the second endpoint
/// is zero-filled like the first, so `127.0.0.1-2` is rejected while
/// `127.0.0.1-127.0.0.2` works) and any form [`parse_cidr`] accepts.
pub fn parse_range(s: &str, accept_in_cidr: bool) -> Result<(u32, u32)> {
    if let Some((lo_part, hi_part)) = s.split_once('-') {
        let (lo, _) = parse_addr(lo_part)?;
        let (hi, n_octets) = parse_addr(hi_part)?;
        // An abbreviated upper bound covers everything under the given
        // octets: 127.0-127.1 means 127.0.0.0-127.1.255.255.
        let hi = hi | !mask(8 * n_octets);
        if lo > hi {
            return Err(Error::EmptyRange);
        }
        Ok((lo, hi))
    } else {
        let cidr = parse_cidr(s, accept_in_cidr)?;
        Ok((cidr.first(), cidr.last()))
    }
}

////////////////////////////////////////////////////////////////////////
// FORMATTING                                                         //
////////////////////////////////////////////////////////////////////////

/// Displays a host-order address as a dotted quad.
pub struct Display(pub u32);

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.0.to_be_bytes();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that an address, prefix, or range is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    InvalidOctet,
    TooManyOctets,
    NotFullAddr,
    InvalidPrefixLen,
    HostBitsSet,
    EmptyRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::InvalidOctet => f.write_str("invalid octet"),
            Self::TooManyOctets => f.write_str("more than four octets"),
            Self::NotFullAddr => f.write_str("not a full dotted-quad address"),
            Self::InvalidPrefixLen => f.write_str("prefix length not in 1..=32"),
            Self::HostBitsSet => f.write_str("address has bits set past the prefix"),
            Self::EmptyRange => f.write_str("range ends before it starts"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by the parsers in this module.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
