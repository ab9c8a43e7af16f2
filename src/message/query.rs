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

//! Parsing of received DNS queries.

use super::constants::*;
use super::{Opcode, Qclass, Qtype, Rcode};
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// QUERIES                                                            //
////////////////////////////////////////////////////////////////////////

/// A parsed DNS query.
///
/// The question section itself stays in the receive buffer (the
/// response is built around it in place); `question_end` records where
/// it ends. The query name is copied out and lowercased, since dataset
/// lookups need it in that form anyway.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub id: u16,
    pub rd: bool,
    pub qname: Name,
    pub qtype: Qtype,
    pub qclass: Qclass,
    pub question_end: usize,
}

/// Why a packet did not parse into a [`Query`]: either it is not worth
/// answering at all, or it earned an error RCODE.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseOutcome {
    /// No response is sent (short packet or a stray response message).
    Drop,
    /// A header-only response with the given RCODE is sent.
    Refuse(Rcode),
}

impl Query {
    /// Parses the received packet in `buf`.
    ///
    /// The accepted shape is deliberately restrictive: exactly one
    /// question, no records in the other sections, opcode QUERY, and a
    /// question name without compression pointers. QCLASSes other than
    /// IN, CH, and * are refused.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseOutcome> {
        if buf.len() < HEADER_SIZE {
            return Err(ParseOutcome::Drop);
        }
        if buf[QR_BYTE] & QR_MASK != 0 {
            // A response; never answer these.
            return Err(ParseOutcome::Drop);
        }

        let qdcount = u16::from_be_bytes([buf[QDCOUNT_START], buf[QDCOUNT_START + 1]]);
        if qdcount != 1 {
            return Err(ParseOutcome::Refuse(Rcode::FORMERR));
        }
        // No RRs belong in any other section of a query we serve.
        if buf[ANCOUNT_START..HEADER_SIZE].iter().any(|&b| b != 0) {
            return Err(ParseOutcome::Refuse(Rcode::FORMERR));
        }

        let opcode = Opcode::from_low_bits((buf[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT);
        if opcode != Opcode::QUERY {
            return Err(ParseOutcome::Refuse(Rcode::NOTIMP));
        }

        let (qname, qname_len) = Name::parse_uncompressed(buf, HEADER_SIZE)
            .map_err(|_| ParseOutcome::Refuse(Rcode::FORMERR))?;
        let fields_start = HEADER_SIZE + qname_len;
        let fields = buf
            .get(fields_start..fields_start + 4)
            .ok_or(ParseOutcome::Refuse(Rcode::FORMERR))?;
        let qtype = Qtype::from(u16::from_be_bytes([fields[0], fields[1]]));
        let qclass = Qclass::from(u16::from_be_bytes([fields[2], fields[3]]));

        if !matches!(qclass, Qclass::IN | Qclass::CH | Qclass::ANY) {
            return Err(ParseOutcome::Refuse(Rcode::REFUSED));
        }

        Ok(Self {
            id: u16::from_be_bytes([buf[ID_START], buf[ID_START + 1]]),
            rd: buf[RD_BYTE] & RD_MASK != 0,
            qname,
            qtype,
            qclass,
            question_end: fields_start + 4,
        })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
