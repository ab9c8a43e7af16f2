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

//! The query engine.
//!
//! [`answer`] is a pure function of the received packet and the loaded
//! zones: it parses the query, dispatches it to the zone whose origin
//! is the longest suffix of the query name, decodes the *subject* (the
//! labels above the dataset's binding point), consults the dataset,
//! and synthesizes the response in place in the packet buffer. The
//! event loop around it only moves packets and applies the netlists.

use crate::dataset::{DatasetKind, Hit, Subject};
use crate::ip4;
use crate::message::{a_rdata, constants, txt_rdata, Builder, ParseOutcome, Qtype, Query, Rcode};
use crate::name::Name;
use crate::zone::{BoundDataset, Zone, ZoneSet};

////////////////////////////////////////////////////////////////////////
// RESULTS                                                            //
////////////////////////////////////////////////////////////////////////

/// What to do with a received packet.
pub enum Answer {
    /// Send the first `len` bytes of the buffer back.
    Respond { len: usize, info: ResponseInfo },
    /// Send nothing.
    Drop,
}

/// What the response was, for logging and statistics.
pub struct ResponseInfo {
    pub rcode: Rcode,
    pub ancount: u16,
    /// The parsed query, when parsing got that far.
    pub query: Option<Query>,
}

////////////////////////////////////////////////////////////////////////
// THE ENGINE                                                         //
////////////////////////////////////////////////////////////////////////

/// Answers the packet in `buf[..len]` in place, returning how many
/// bytes to send back (if any).
pub fn answer(zones: &ZoneSet, default_ttl: u32, buf: &mut [u8], len: usize) -> Answer {
    let query = match Query::parse(&buf[..len]) {
        Ok(query) => query,
        Err(ParseOutcome::Drop) => return Answer::Drop,
        Err(ParseOutcome::Refuse(rcode)) => {
            let len = Builder::refusal(buf, rcode);
            return Answer::Respond {
                len,
                info: ResponseInfo {
                    rcode,
                    ancount: 0,
                    query: None,
                },
            };
        }
    };

    let zone = match zones.find(&query.qname) {
        Some(zone) => zone,
        None => {
            // Not our zone; refuse, without claiming authority.
            let mut response = Builder::respond(buf, &query);
            response.set_aa(false);
            response.set_rcode(Rcode::REFUSED);
            return finish(response, Rcode::REFUSED, query);
        }
    };

    let ttl = zone.ttl().unwrap_or(default_ttl);
    let mut response = Builder::respond(buf, &query);
    let rcode = if query.qname == *zone.origin() {
        answer_apex(zone, &query, ttl, &mut response)
    } else {
        answer_subject(zone, &query, ttl, &mut response)
    };
    response.set_rcode(rcode);
    finish(response, rcode, query)
}

fn finish(response: Builder<'_>, rcode: Rcode, query: Query) -> Answer {
    let ancount = response.ancount();
    Answer::Respond {
        len: response.finish(),
        info: ResponseInfo {
            rcode,
            ancount,
            query: Some(query),
        },
    }
}

/// Answers a query for the zone origin itself: the apex SOA and NS
/// records are all that exists there.
fn answer_apex(zone: &Zone, query: &Query, ttl: u32, response: &mut Builder) -> Rcode {
    let owner = response.qname_pointer();
    if matches!(query.qtype, Qtype::SOA | Qtype::ANY) {
        if let Some(soa) = zone.soa() {
            let _ = response.add_answer_rr(owner, constants::TYPE_SOA, ttl, &soa.rdata());
        }
    }
    if matches!(query.qtype, Qtype::NS | Qtype::ANY) {
        for ns in zone.ns() {
            if response
                .add_answer_rr(owner, constants::TYPE_NS, ttl, ns.wire_repr())
                .is_err()
            {
                break;
            }
        }
    }
    if response.ancount() == 0 {
        add_negative_soa(zone, query, ttl, response);
    }
    Rcode::NOERROR
}

/// Answers a query for a name below the zone origin by dataset lookup.
fn answer_subject(zone: &Zone, query: &Query, ttl: u32, response: &mut Builder) -> Rcode {
    let hit = zone.datasets().iter().find_map(|bound| {
        lookup_subject(bound, &query.qname).map(|(hit, subject)| (bound, hit, subject))
    });
    let (bound, hit, subject) = match hit {
        Some(found) => found,
        None => {
            add_negative_soa(zone, query, ttl, response);
            return Rcode::NXDOMAIN;
        }
    };

    let owner = response.qname_pointer();
    if matches!(query.qtype, Qtype::A | Qtype::ANY) {
        let addr = 0x7f000000 | hit.value as u32;
        let _ = response.add_answer_rr(owner, constants::TYPE_A, ttl, &a_rdata(addr));
    }
    if matches!(query.qtype, Qtype::TXT | Qtype::ANY) {
        if let Some(template) = bound.dataset.txt_template() {
            let text = substitute(template, &subject.to_text());
            let _ = response.add_answer_rr(owner, constants::TYPE_TXT, ttl, &txt_rdata(&text));
        }
    }
    if response.ancount() == 0 {
        // Listed, but the qtype is not one we serve for it.
        add_negative_soa(zone, query, ttl, response);
    }
    Rcode::NOERROR
}

/// A decoded subject, kept in decoded form so that its presentation
/// text (for TXT substitution) is only built when a template needs it.
enum DecodedSubject {
    Addr(u32),
    Domain(Name),
}

impl DecodedSubject {
    fn to_text(&self) -> String {
        match self {
            Self::Addr(addr) => ip4::Display(*addr).to_string(),
            Self::Domain(name) => {
                let mut text = name.to_string();
                text.pop(); // drop the trailing dot
                text
            }
        }
    }
}

/// Tries a dataset against the query name: the dataset's binding name
/// must be a proper suffix, and the labels above it must decode to a
/// subject of the dataset's kind.
fn lookup_subject(bound: &BoundDataset, qname: &Name) -> Option<(Hit, DecodedSubject)> {
    let n = qname.strip_suffix(&bound.name)?;
    if n == 0 {
        return None;
    }
    match bound.dataset.kind() {
        DatasetKind::Ip4Set => {
            let addr = decode_reversed_quad(qname, n)?;
            let hit = bound.dataset.lookup(Subject::Addr(addr))?;
            Some((hit, DecodedSubject::Addr(addr)))
        }
        DatasetKind::DnSet => {
            let subject = qname.prefix(n);
            let hit = bound.dataset.lookup(Subject::Domain(&subject))?;
            Some((hit, DecodedSubject::Domain(subject)))
        }
    }
}

/// Decodes the first `n` labels of `qname` as a reversed dotted quad
/// (the RBL convention: `2.0.0.127` encodes 127.0.0.2). Anything but
/// four numeric labels is not an address.
fn decode_reversed_quad(qname: &Name, n: usize) -> Option<u32> {
    if n != 4 {
        return None;
    }
    let mut addr = 0u32;
    for i in (0..4).rev() {
        let label = qname.label(i);
        if label.is_empty() || label.len() > 3 || !label.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let mut octet = 0u32;
        for &digit in label {
            octet = octet * 10 + (digit - b'0') as u32;
        }
        if octet > 255 {
            return None;
        }
        addr = (addr << 8) | octet;
    }
    Some(addr)
}

/// Adds the zone SOA to the authority section of a negative answer,
/// when the zone has one. The owner is compressed as a pointer to the
/// origin's occurrence inside the question name.
fn add_negative_soa(zone: &Zone, query: &Query, ttl: u32, response: &mut Builder) {
    if let Some(soa) = zone.soa() {
        let skip = query.qname.wire_repr().len() - zone.origin().wire_repr().len();
        let owner = response.qname_suffix_pointer(skip);
        let _ = response.add_authority_rr(owner, constants::TYPE_SOA, ttl, &soa.rdata());
    }
}

/// Instantiates a TXT template: every `$` becomes the subject.
fn substitute(template: &str, subject: &str) -> Vec<u8> {
    let mut text = Vec::with_capacity(template.len() + subject.len());
    for &octet in template.as_bytes() {
        if octet == b'$' {
            text.extend_from_slice(subject.as_bytes());
        } else {
            text.push(octet);
        }
    }
    text
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::constants::{
        ANCOUNT_START, HEADER_SIZE, NSCOUNT_START, QDCOUNT_START, QR_BYTE, QR_MASK, RCODE_BYTE,
        RCODE_MASK,
    };
    use crate::message::Qclass;
    use crate::zone::{load_zones, reload_zones, LoadOptions, ReloadOutcome, ZoneSpec};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    const TTL: u32 = 2048;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    /// Builds a wire query for `qname` with the given QTYPE.
    fn query_packet(qname: &str, qtype: u16) -> Vec<u8> {
        let qname = name(qname);
        let mut packet = vec![
            0xbe, 0xef, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        packet.extend_from_slice(qname.wire_repr());
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet
    }

    fn write_file(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
        let path = dir.join(file_name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    /// Loads the two example zones from temporary files. Each call
    /// gets its own directory so that concurrently running tests do
    /// not write over each other.
    fn example_zones() -> ZoneSet {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "dnsbl-query-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let sbl = write_file(
            &dir,
            "sbl.zone",
            "$SOA ns.sbl.example. host.sbl.example. 7 3600 600 86400 300\n\
             $NS ns.sbl.example.\n\
             $TXT \"Listed: $\"\n\
             10.0.0.0/8 :2\n",
        );
        let dbl = write_file(&dir, "dbl.zone", ".bad.example :3\nexact.example :4\n");
        let mut zones = load_zones(vec![
            ZoneSpec {
                origin: name("sbl.example."),
                kind: DatasetKind::Ip4Set,
                files: vec![sbl],
            },
            ZoneSpec {
                origin: name("dbl.example."),
                kind: DatasetKind::DnSet,
                files: vec![dbl],
            },
        ]);
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::Reloaded,
        );
        zones
    }

    /// Runs a packet through the engine, returning the response bytes
    /// and info.
    fn run(zones: &ZoneSet, packet: &[u8]) -> Option<(Vec<u8>, ResponseInfo)> {
        let mut buf = [0u8; 512];
        buf[..packet.len()].copy_from_slice(packet);
        match answer(zones, TTL, &mut buf, packet.len()) {
            Answer::Respond { len, info } => Some((buf[..len].to_vec(), info)),
            Answer::Drop => None,
        }
    }

    fn rcode_of(response: &[u8]) -> u8 {
        response[RCODE_BYTE] & RCODE_MASK
    }

    fn ancount_of(response: &[u8]) -> u16 {
        u16::from_be_bytes([response[ANCOUNT_START], response[ANCOUNT_START + 1]])
    }

    #[test]
    fn listed_address_yields_an_a_record() {
        let zones = example_zones();
        let packet = query_packet("1.0.0.10.sbl.example.", 1);
        let (response, info) = run(&zones, &packet).unwrap();

        assert_eq!(info.rcode, Rcode::NOERROR);
        assert_eq!(info.ancount, 1);
        // Header echo invariants.
        assert_eq!(&response[..2], &packet[..2]);
        assert_ne!(response[QR_BYTE] & QR_MASK, 0);
        assert_eq!(
            &response[QDCOUNT_START..QDCOUNT_START + 2],
            &1u16.to_be_bytes(),
        );
        assert_eq!(rcode_of(&response), 0);
        // The answer is 127.0.0.2 with the zone TTL.
        let rr = &response[packet.len()..];
        assert_eq!(&rr[..2], b"\xc0\x0c");
        assert_eq!(&rr[2..4], &1u16.to_be_bytes());
        assert_eq!(&rr[6..10], &TTL.to_be_bytes());
        assert_eq!(&rr[12..16], [127, 0, 0, 2]);
    }

    #[test]
    fn unlisted_address_yields_nxdomain_with_soa() {
        let zones = example_zones();
        let packet = query_packet("1.0.0.11.sbl.example.", 1);
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NXDOMAIN);
        assert_eq!(ancount_of(&response), 0);
        assert_eq!(
            u16::from_be_bytes([response[NSCOUNT_START], response[NSCOUNT_START + 1]]),
            1,
        );
        // The authority SOA's owner points at the origin inside the
        // question name.
        let rr = &response[packet.len()..];
        let skip = name("1.0.0.11.sbl.example.").wire_repr().len()
            - name("sbl.example.").wire_repr().len();
        assert_eq!(&rr[..2], (0xc00cu16 + skip as u16).to_be_bytes());
    }

    #[test]
    fn txt_queries_get_the_template_with_the_subject() {
        let zones = example_zones();
        let packet = query_packet("1.0.0.10.sbl.example.", 16);
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        assert_eq!(info.ancount, 1);
        let rr = &response[packet.len()..];
        let rdata = &rr[12..];
        assert_eq!(rdata[0] as usize, rdata.len() - 1);
        assert_eq!(&rdata[1..], b"Listed: 10.0.0.1");
    }

    #[test]
    fn any_queries_get_both_records() {
        let zones = example_zones();
        let packet = query_packet("1.0.0.10.sbl.example.", 255);
        let (_, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        assert_eq!(info.ancount, 2);
    }

    #[test]
    fn unserved_qtype_for_a_listed_entry_is_noerror_without_answers() {
        let zones = example_zones();
        let packet = query_packet("1.0.0.10.sbl.example.", 15); // MX
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        assert_eq!(ancount_of(&response), 0);
    }

    #[test]
    fn wildcard_domain_entries_match_subdomains_only() {
        let zones = example_zones();

        let packet = query_packet("x.y.bad.example.dbl.example.", 1);
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        let rr = &response[packet.len()..];
        assert_eq!(&rr[12..16], [127, 0, 0, 3]);

        // The wildcard entry does not match its own name.
        let packet = query_packet("bad.example.dbl.example.", 1);
        let (_, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NXDOMAIN);
    }

    #[test]
    fn exact_domain_entries_match_only_themselves() {
        let zones = example_zones();
        let packet = query_packet("exact.example.dbl.example.", 1);
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        let rr = &response[packet.len()..];
        assert_eq!(&rr[12..16], [127, 0, 0, 4]);

        let packet = query_packet("sub.exact.example.dbl.example.", 1);
        let (_, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NXDOMAIN);
    }

    #[test]
    fn non_address_subjects_under_an_ip4set_zone_are_nxdomain() {
        let zones = example_zones();
        for qname in [
            "not.an.address.here.sbl.example.",
            "1.0.0.sbl.example.",
            "1.0.0.999.sbl.example.",
            "1.0.0.10.20.sbl.example.",
        ] {
            let packet = query_packet(qname, 1);
            let (_, info) = run(&zones, &packet).unwrap();
            assert_eq!(info.rcode, Rcode::NXDOMAIN, "for {}", qname);
        }
    }

    #[test]
    fn apex_soa_and_ns_are_served() {
        let zones = example_zones();

        let packet = query_packet("sbl.example.", 6);
        let (_, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        assert_eq!(info.ancount, 1);

        let packet = query_packet("sbl.example.", 2);
        let (_, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.ancount, 1);

        // An apex A query finds nothing but is not NXDOMAIN.
        let packet = query_packet("sbl.example.", 1);
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
        assert_eq!(ancount_of(&response), 0);
    }

    #[test]
    fn names_outside_every_zone_are_refused() {
        let zones = example_zones();
        for qname in ["1.0.0.10.other.example.", "."] {
            let packet = query_packet(qname, 1);
            let (response, info) = run(&zones, &packet).unwrap();
            assert_eq!(info.rcode, Rcode::REFUSED, "for {}", qname);
            assert_eq!(rcode_of(&response), 5);
        }
    }

    #[test]
    fn multi_question_packets_get_formerr() {
        let zones = example_zones();
        let mut packet = query_packet("1.0.0.10.sbl.example.", 1);
        packet[QDCOUNT_START + 1] = 2;
        let (response, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::FORMERR);
        assert_eq!(response.len(), HEADER_SIZE);
        assert_eq!(ancount_of(&response), 0);
        assert!(info.query.is_none());
    }

    #[test]
    fn short_packets_are_dropped() {
        let zones = example_zones();
        assert!(run(&zones, &[0u8; 4]).is_none());
    }

    #[test]
    fn chaos_class_queries_are_answered() {
        let zones = example_zones();
        let mut packet = query_packet("1.0.0.10.sbl.example.", 1);
        let last = packet.len() - 1;
        packet[last] = u16::from(Qclass::CH) as u8;
        let (_, info) = run(&zones, &packet).unwrap();
        assert_eq!(info.rcode, Rcode::NOERROR);
    }

    #[test]
    fn decode_reversed_quad_works() {
        let qname = name("2.0.0.127.sbl.example.");
        assert_eq!(decode_reversed_quad(&qname, 4), Some(0x7f000002));
        assert_eq!(decode_reversed_quad(&qname, 3), None);
        let qname = name("255.255.255.255.sbl.example.");
        assert_eq!(decode_reversed_quad(&qname, 4), Some(u32::MAX));
        let qname = name("256.0.0.1.sbl.example.");
        assert_eq!(decode_reversed_quad(&qname, 4), None);
        let qname = name("a.0.0.1.sbl.example.");
        assert_eq!(decode_reversed_quad(&qname, 4), None);
    }

    #[test]
    fn substitute_replaces_every_dollar() {
        assert_eq!(substitute("Listed: $", "10.0.0.1"), b"Listed: 10.0.0.1");
        assert_eq!(substitute("$ and $", "x"), b"x and x");
        assert_eq!(substitute("none", "x"), b"none");
    }
}
