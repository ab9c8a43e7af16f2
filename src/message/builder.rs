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

//! In-place construction of DNS responses.
//!
//! A response is built in the very buffer the query was received into:
//! the header and question section are kept, the header flags are
//! patched, and resource records are appended after the question with
//! owner names compressed as pointers into it. The message never grows
//! past 512 octets; a record that does not fit sets TC and is left out,
//! so the message always ends on a whole RR.

use super::constants::*;
use super::{Query, Rcode};

////////////////////////////////////////////////////////////////////////
// BUILDER                                                            //
////////////////////////////////////////////////////////////////////////

/// Builds a response around the question in the receive buffer.
pub struct Builder<'a> {
    buf: &'a mut [u8],
    cursor: usize,
    limit: usize,
    ancount: u16,
    nscount: u16,
}

impl<'a> Builder<'a> {
    /// Starts a response to `query`, whose question section must still
    /// be in `buf`. The header flags are patched for an authoritative
    /// answer (QR=1, AA=1, RD echoed, RA=0, RCODE initially NOERROR).
    pub fn respond(buf: &'a mut [u8], query: &Query) -> Self {
        buf[QR_BYTE] = (buf[QR_BYTE] & (OPCODE_MASK | RD_MASK)) | QR_MASK | AA_MASK;
        buf[RCODE_BYTE] = 0;
        let limit = buf.len().min(MAX_UDP_SIZE);
        Self {
            buf,
            cursor: query.question_end,
            limit,
            ancount: 0,
            nscount: 0,
        }
    }

    /// Builds a header-only response with the given RCODE over the
    /// received packet, echoing the id and opcode. Returns the response
    /// length. `buf` must hold at least a message header.
    pub fn refusal(buf: &mut [u8], rcode: Rcode) -> usize {
        buf[QR_BYTE] = (buf[QR_BYTE] & (OPCODE_MASK | RD_MASK)) | QR_MASK;
        buf[RCODE_BYTE] = u8::from(rcode);
        buf[QDCOUNT_START..HEADER_SIZE].fill(0);
        HEADER_SIZE
    }

    /// Sets the RCODE of the response.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.buf[RCODE_BYTE] = (self.buf[RCODE_BYTE] & !RCODE_MASK) | u8::from(rcode);
    }

    /// Sets or clears the AA bit. [`Builder::respond`] sets it; clear
    /// it for answers the server is not authoritative for (REFUSED).
    pub fn set_aa(&mut self, aa: bool) {
        if aa {
            self.buf[AA_BYTE] |= AA_MASK;
        } else {
            self.buf[AA_BYTE] &= !AA_MASK;
        }
    }

    /// Returns a compression pointer to the question name.
    pub fn qname_pointer(&self) -> u16 {
        QNAME_POINTER
    }

    /// Returns a compression pointer to the suffix of the question
    /// name that starts `skip` octets into its wire form.
    pub fn qname_suffix_pointer(&self, skip: usize) -> u16 {
        QNAME_POINTER + skip as u16
    }

    /// Appends a resource record to the answer section.
    pub fn add_answer_rr(
        &mut self,
        owner: u16,
        rr_type: u16,
        ttl: u32,
        rdata: &[u8],
    ) -> Result<()> {
        self.add_rr(owner, rr_type, ttl, rdata)?;
        self.ancount += 1;
        Ok(())
    }

    /// Appends a resource record to the authority section. All answer
    /// records must be added first.
    pub fn add_authority_rr(
        &mut self,
        owner: u16,
        rr_type: u16,
        ttl: u32,
        rdata: &[u8],
    ) -> Result<()> {
        self.add_rr(owner, rr_type, ttl, rdata)?;
        self.nscount += 1;
        Ok(())
    }

    /// Writes an RR at the cursor. On truncation the cursor is left
    /// unchanged and TC is set, so the message still ends on a whole
    /// record.
    fn add_rr(&mut self, owner: u16, rr_type: u16, ttl: u32, rdata: &[u8]) -> Result<()> {
        let size = 2 + 2 + 2 + 4 + 2 + rdata.len();
        if self.limit - self.cursor < size {
            self.buf[TC_BYTE] |= TC_MASK;
            return Err(Truncation);
        }
        self.push(&owner.to_be_bytes());
        self.push(&rr_type.to_be_bytes());
        self.push(&1u16.to_be_bytes()); // class IN
        self.push(&ttl.to_be_bytes());
        self.push(&(rdata.len() as u16).to_be_bytes());
        self.push(rdata);
        Ok(())
    }

    fn push(&mut self, data: &[u8]) {
        self.buf[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        self.cursor += data.len();
    }

    /// Returns the current number of answer records.
    pub fn ancount(&self) -> u16 {
        self.ancount
    }

    /// Finishes the response, writing the section counts. The final
    /// length of the message is returned.
    pub fn finish(self) -> usize {
        let Self {
            buf,
            cursor,
            ancount,
            nscount,
            ..
        } = self;
        buf[ANCOUNT_START..ANCOUNT_START + 2].copy_from_slice(&ancount.to_be_bytes());
        buf[NSCOUNT_START..NSCOUNT_START + 2].copy_from_slice(&nscount.to_be_bytes());
        buf[ARCOUNT_START..ARCOUNT_START + 2].copy_from_slice(&0u16.to_be_bytes());
        cursor
    }
}

////////////////////////////////////////////////////////////////////////
// RDATA HELPERS                                                      //
////////////////////////////////////////////////////////////////////////

/// Builds the RDATA of an A record from a host-order address.
pub fn a_rdata(addr: u32) -> [u8; 4] {
    addr.to_be_bytes()
}

/// Builds the RDATA of a TXT record holding a single character string.
/// Text longer than 255 octets is cut off.
pub fn txt_rdata(text: &[u8]) -> Vec<u8> {
    let text = &text[..text.len().min(255)];
    let mut rdata = Vec::with_capacity(text.len() + 1);
    rdata.push(text.len() as u8);
    rdata.extend_from_slice(text);
    rdata
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a record did not fit in the response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Truncation;

impl std::fmt::Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("record does not fit in the response")
    }
}

impl std::error::Error for Truncation {}

/// The type returned by fallible [`Builder`] methods.
pub type Result<T> = std::result::Result<T, Truncation>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::query::tests::SBL_QUERY;
    use super::super::Query;
    use super::*;

    #[test]
    fn respond_patches_the_header_and_appends_rrs() {
        let mut buf = [0u8; MAX_UDP_SIZE];
        buf[..SBL_QUERY.len()].copy_from_slice(SBL_QUERY);
        let query = Query::parse(&buf[..SBL_QUERY.len()]).unwrap();

        let mut builder = Builder::respond(&mut buf, &query);
        let owner = builder.qname_pointer();
        builder
            .add_answer_rr(owner, 1, 2048, &a_rdata(0x7f000002))
            .unwrap();
        let len = builder.finish();

        assert_eq!(len, SBL_QUERY.len() + 2 + 2 + 2 + 4 + 2 + 4);
        // The id and question are echoed.
        assert_eq!(&buf[..2], &SBL_QUERY[..2]);
        assert_eq!(&buf[HEADER_SIZE..SBL_QUERY.len()], &SBL_QUERY[HEADER_SIZE..]);
        // QR, AA set; opcode QUERY; RD echoed; RA clear.
        assert_eq!(buf[QR_BYTE], QR_MASK | AA_MASK | RD_MASK);
        assert_eq!(buf[RA_BYTE] & RA_MASK, 0);
        assert_eq!(buf[RCODE_BYTE] & RCODE_MASK, 0);
        // QDCOUNT=1, ANCOUNT=1, NSCOUNT=0, ARCOUNT=0.
        assert_eq!(&buf[QDCOUNT_START..HEADER_SIZE], b"\x00\x01\x00\x01\x00\x00\x00\x00");
        // The answer RR: pointer to the qname, A IN 2048 127.0.0.2.
        assert_eq!(
            &buf[SBL_QUERY.len()..len],
            b"\xc0\x0c\x00\x01\x00\x01\x00\x00\x08\x00\x00\x04\x7f\x00\x00\x02",
        );
    }

    #[test]
    fn refusal_builds_a_header_only_response() {
        let mut buf = [0u8; MAX_UDP_SIZE];
        buf[..SBL_QUERY.len()].copy_from_slice(SBL_QUERY);
        let len = Builder::refusal(&mut buf[..SBL_QUERY.len()], Rcode::FORMERR);
        assert_eq!(len, HEADER_SIZE);
        assert_eq!(&buf[..2], &SBL_QUERY[..2]);
        assert_eq!(buf[QR_BYTE], QR_MASK | RD_MASK);
        assert_eq!(buf[RCODE_BYTE], u8::from(Rcode::FORMERR));
        assert!(buf[QDCOUNT_START..HEADER_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversize_synthesis_sets_tc_and_keeps_whole_rrs() {
        let mut buf = [0u8; MAX_UDP_SIZE];
        buf[..SBL_QUERY.len()].copy_from_slice(SBL_QUERY);
        let query = Query::parse(&buf[..SBL_QUERY.len()]).unwrap();

        let mut builder = Builder::respond(&mut buf, &query);
        let owner = builder.qname_pointer();
        let text = [b'x'; 200];
        let rdata = txt_rdata(&text);
        let mut added = 0;
        let mut truncated = false;
        for _ in 0..10 {
            match builder.add_answer_rr(owner, 16, 2048, &rdata) {
                Ok(()) => added += 1,
                Err(Truncation) => {
                    truncated = true;
                    break;
                }
            }
        }
        assert!(truncated);
        let len = builder.finish();
        assert!(len <= MAX_UDP_SIZE);
        assert_eq!(buf[TC_BYTE] & TC_MASK, TC_MASK);
        assert_eq!(
            u16::from_be_bytes([buf[ANCOUNT_START], buf[ANCOUNT_START + 1]]),
            added,
        );
        // Every RR in the message is complete: walk them.
        let mut cursor = SBL_QUERY.len();
        for _ in 0..added {
            assert_eq!(&buf[cursor..cursor + 2], b"\xc0\x0c");
            let rdlength =
                u16::from_be_bytes([buf[cursor + 10], buf[cursor + 11]]) as usize;
            cursor += 12 + rdlength;
        }
        assert_eq!(cursor, len);
    }

    #[test]
    fn an_empty_response_still_parses_as_its_own_query() {
        // Building in place must leave the header id and the question
        // intact: a response with no records, with QR cleared again,
        // parses back to the original query.
        let mut buf = [0u8; MAX_UDP_SIZE];
        buf[..SBL_QUERY.len()].copy_from_slice(SBL_QUERY);
        let query = Query::parse(&buf[..SBL_QUERY.len()]).unwrap();

        let builder = Builder::respond(&mut buf, &query);
        let len = builder.finish();

        buf[QR_BYTE] &= !QR_MASK;
        let reparsed = Query::parse(&buf[..len]).unwrap();
        assert_eq!(reparsed.id, query.id);
        assert_eq!(reparsed.rd, query.rd);
        assert_eq!(reparsed.qname, query.qname);
        assert_eq!(reparsed.qtype, query.qtype);
        assert_eq!(reparsed.qclass, query.qclass);
        assert_eq!(reparsed.question_end, query.question_end);
    }

    #[test]
    fn txt_rdata_cuts_long_strings() {
        let text = [b'y'; 300];
        let rdata = txt_rdata(&text);
        assert_eq!(rdata.len(), 256);
        assert_eq!(rdata[0], 255);
    }
}
